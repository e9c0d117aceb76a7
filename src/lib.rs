// Rent Ledger - Core Library
// Exposes all modules for use in the CLI, the API server, and tests

pub mod db;
pub mod entities;
pub mod error;
pub mod import;
pub mod invoice;
pub mod reports;
pub mod settings;
pub mod splits;

#[cfg(feature = "server")]
pub mod ai; // Usage analysis via an OpenAI-compatible endpoint

// Re-export commonly used types
pub use entities::{
    BillPatch, NewBill, NewPayment, NewTenant, PaymentPatch, RentPayment, Tenant, TenantPatch,
    UtilityBill, UtilityBillSplit, UtilityCategory,
};
pub use error::{AppError, Result};
pub use import::{import_bills, ImportSummary};
pub use invoice::{build_invoice, month_window, Invoice};
pub use reports::{export_bills, export_tenant_payments, CsvExport};
pub use splits::{replace_splits, update_split, SplitInput, SplitPatch, RECONCILE_TOLERANCE};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
