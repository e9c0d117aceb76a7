use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;
use crate::settings;

/// Open the database and bring it fully up to date: WAL mode, schema,
/// seeded default settings. Every entry point (CLI, server, tests) goes
/// through here so there is no lazy per-request initialization.
pub fn open(db_path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(db_path)?;
    initialize(&mut conn)?;
    Ok(conn)
}

pub fn initialize(conn: &mut Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    setup_schema(conn)?;

    // Default settings are seeded once at startup, inside one transaction,
    // rather than created as a side effect of the first settings read.
    let tx = conn.transaction()?;
    settings::seed_defaults(&tx)?;
    tx.commit()?;

    Ok(())
}

fn setup_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tenants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            move_in_date TEXT,
            base_rent_amount REAL NOT NULL DEFAULT 0.0,
            notes TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rent_payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL REFERENCES tenants(id),
            amount REAL NOT NULL,
            payment_date TEXT NOT NULL,
            payment_method TEXT,
            notes TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS utility_categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS utility_bills (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category_id INTEGER NOT NULL REFERENCES utility_categories(id),
            billing_period_start TEXT NOT NULL,
            billing_period_end TEXT NOT NULL,
            bill_date TEXT,
            total_amount REAL NOT NULL,
            usage_data TEXT,
            notes TEXT,
            file_path TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS utility_bill_splits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bill_id INTEGER NOT NULL REFERENCES utility_bills(id),
            tenant_id INTEGER NOT NULL REFERENCES tenants(id),
            amount_owed REAL NOT NULL,
            is_paid INTEGER NOT NULL DEFAULT 0,
            paid_date TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT UNIQUE NOT NULL,
            value TEXT,
            description TEXT
        )",
        [],
    )?;

    // Case-insensitive uniqueness for category names
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_category_name
         ON utility_categories(name COLLATE NOCASE)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_tenant_date
         ON rent_payments(tenant_id, payment_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bills_period_end
         ON utility_bills(billing_period_end)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_splits_bill ON utility_bill_splits(bill_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_splits_tenant ON utility_bill_splits(tenant_id)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
pub fn open_test() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    initialize(&mut conn).unwrap();
    conn
}
