// Error taxonomy shared by the library and the API server.
// Each variant maps to one HTTP status class; the server layer does the mapping.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed input, reconciliation mismatch, invalid month.
    #[error("{0}")]
    Validation(String),

    /// Referenced entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Write would collide with existing state (duplicate category name).
    #[error("{0}")]
    Conflict(String),

    /// CSV import aborted: every row error, tagged with its line number.
    #[error("errors occurred during import, no bills were added ({} row error(s))", errors.len())]
    Import { errors: Vec<String> },

    /// A configured external service (AI provider) failed or was unreachable.
    #[error("{0}")]
    Upstream(String),

    /// Underlying persistence failure. The in-flight transaction is rolled back.
    #[error("database error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(what: &str, id: i64) -> Self {
        AppError::NotFound(format!("{} with ID {} not found", what, id))
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
