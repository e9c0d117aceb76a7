use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use rent_ledger::{build_invoice, db, import_bills, reports};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(&db_path(&args, 2)),
        Some("import") => {
            let csv = args
                .get(2)
                .context("usage: rent-ledger import <bills.csv> [db-path]")?;
            run_import(Path::new(csv), &db_path(&args, 3))
        }
        Some("invoice") => {
            let tenant_id: i64 = args
                .get(2)
                .and_then(|s| s.parse().ok())
                .context("usage: rent-ledger invoice <tenant-id> <year> <month> [db-path]")?;
            let year: i32 = args
                .get(3)
                .and_then(|s| s.parse().ok())
                .context("invalid year")?;
            let month: u32 = args
                .get(4)
                .and_then(|s| s.parse().ok())
                .context("invalid month")?;
            run_invoice(tenant_id, year, month, &db_path(&args, 5))
        }
        _ => {
            eprintln!("rent-ledger {}", rent_ledger::VERSION);
            eprintln!();
            eprintln!("Usage:");
            eprintln!("  rent-ledger init [db-path]");
            eprintln!("  rent-ledger import <bills.csv> [db-path]");
            eprintln!("  rent-ledger invoice <tenant-id> <year> <month> [db-path]");
            Ok(())
        }
    }
}

fn db_path(args: &[String], index: usize) -> PathBuf {
    args.get(index)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("rent-ledger.db"))
}

fn run_init(db_path: &Path) -> Result<()> {
    db::open(db_path).context("Failed to initialize database")?;
    println!("Database initialized at {:?}", db_path);
    Ok(())
}

fn run_import(csv_path: &Path, db_path: &Path) -> Result<()> {
    let data = fs::read(csv_path)
        .with_context(|| format!("Failed to read CSV file {:?}", csv_path))?;

    let mut conn = db::open(db_path)?;

    match import_bills(&mut conn, &data) {
        Ok(summary) => {
            println!("Imported {} utility bills", summary.imported);
            Ok(())
        }
        Err(rent_ledger::AppError::Import { errors }) => {
            eprintln!("Import aborted, no bills were added:");
            for error in &errors {
                eprintln!("  {}", error);
            }
            bail!("{} row error(s)", errors.len());
        }
        Err(e) => Err(e.into()),
    }
}

fn run_invoice(tenant_id: i64, year: i32, month: u32, db_path: &Path) -> Result<()> {
    let conn = db::open(db_path)?;
    let invoice = build_invoice(&conn, tenant_id, year, month)?;
    print!("{}", reports::render_invoice_html(&invoice));
    Ok(())
}
