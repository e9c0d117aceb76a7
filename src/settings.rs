//! Key-value settings store.
//!
//! Default keys are seeded by `db::initialize` at startup, so reads never
//! create rows as a side effect.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub id: i64,
    pub key: String,
    pub value: Option<String>,
    pub description: Option<String>,
}

/// Keys the application expects to exist, with their default values.
pub const DEFAULT_SETTINGS: [(&str, &str, &str); 4] = [
    (
        "ai_provider",
        "none",
        "AI provider for analysis ('openai', 'local', or 'none')",
    ),
    (
        "openai_api_key",
        "",
        "Your OpenAI API Key (leave blank if using local)",
    ),
    (
        "local_llm_endpoint",
        "http://localhost:1234/v1/chat/completions",
        "API endpoint for your local LLM (LM Studio compatible)",
    ),
    (
        "local_llm_model_name",
        "",
        "(Optional) Model name required by your local LLM API",
    ),
];

/// Inserts any missing default keys. Existing values are never overwritten.
pub fn seed_defaults(conn: &Connection) -> Result<()> {
    for (key, value, description) in DEFAULT_SETTINGS {
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value, description) VALUES (?1, ?2, ?3)",
            params![key, value, description],
        )?;
    }
    Ok(())
}

fn setting_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Setting> {
    Ok(Setting {
        id: row.get(0)?,
        key: row.get(1)?,
        value: row.get(2)?,
        description: row.get(3)?,
    })
}

pub fn list_settings(conn: &Connection) -> Result<Vec<Setting>> {
    let mut stmt = conn.prepare("SELECT id, key, value, description FROM settings ORDER BY key")?;
    let settings = stmt
        .query_map([], setting_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(settings)
}

pub fn get_setting(conn: &Connection, key: &str) -> Result<Setting> {
    let mut stmt = conn.prepare("SELECT id, key, value, description FROM settings WHERE key = ?1")?;
    stmt.query_row(params![key], setting_from_row)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                AppError::NotFound(format!("Setting '{}' not found", key))
            }
            other => other.into(),
        })
}

/// Convenience: the setting's value, with empty strings treated as unset.
pub fn get_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let setting = get_setting(conn, key)?;
    Ok(setting.value.filter(|v| !v.is_empty()))
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<Setting> {
    get_setting(conn, key)?;
    conn.execute(
        "UPDATE settings SET value = ?1 WHERE key = ?2",
        params![value, key],
    )?;
    get_setting(conn, key)
}

/// Updates every known key in the map, skipping unknown keys. Returns the
/// keys actually updated.
pub fn set_many(conn: &Connection, values: &[(String, String)]) -> Result<Vec<String>> {
    let mut updated = Vec::new();
    for (key, value) in values {
        let changed = conn.execute(
            "UPDATE settings SET value = ?1 WHERE key = ?2",
            params![value, key],
        )?;
        if changed > 0 {
            updated.push(key.clone());
        }
    }
    Ok(updated)
}
