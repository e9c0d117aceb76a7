//! CSV bill import.
//!
//! Rows are validated independently and the outcome is all-or-nothing: one
//! bad row rolls back every bill AND every category the import created on
//! the fly, and the caller gets the full list of line-tagged errors back.

use std::collections::HashMap;

use chrono::{Local, NaiveDate};
use csv::StringRecord;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::{AppError, Result};

pub const REQUIRED_HEADERS: [&str; 4] =
    ["category_name", "billing_start", "billing_end", "total_amount"];
pub const OPTIONAL_HEADERS: [&str; 3] = ["bill_date", "usage", "notes"];

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub imported_ids: Vec<i64>,
}

struct HeaderMap {
    by_name: HashMap<String, usize>,
}

impl HeaderMap {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let by_name: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_string(), i))
            .collect();

        let missing: Vec<&str> = REQUIRED_HEADERS
            .iter()
            .filter(|h| !by_name.contains_key(**h))
            .copied()
            .collect();
        if !missing.is_empty() {
            let found: Vec<&str> = headers.iter().map(str::trim).collect();
            return Err(AppError::validation(format!(
                "CSV file must contain headers: {}. Found: {}",
                REQUIRED_HEADERS.join(", "),
                found.join(", ")
            )));
        }
        Ok(HeaderMap { by_name })
    }

    fn get<'r>(&self, record: &'r StringRecord, name: &str) -> &'r str {
        self.by_name
            .get(name)
            .and_then(|&i| record.get(i))
            .map(str::trim)
            .unwrap_or("")
    }
}

/// Parses and persists a CSV of utility bills.
///
/// Unknown category names (matched case-insensitively against a cache primed
/// at the start) create the category within the same transaction, so later
/// rows in the file can reuse it.
pub fn import_bills(conn: &mut Connection, data: &[u8]) -> Result<ImportSummary> {
    let mut reader = csv::Reader::from_reader(data);
    let headers = reader
        .headers()
        .map_err(|e| AppError::validation(format!("Failed to read CSV headers: {}", e)))?
        .clone();
    let header_map = HeaderMap::from_headers(&headers)?;

    let tx = conn.transaction()?;

    // Prime the category cache with lowercase names
    let mut categories: HashMap<String, i64> = {
        let mut stmt = tx.prepare("SELECT LOWER(name), id FROM utility_categories")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        rows.collect::<rusqlite::Result<HashMap<_, _>>>()?
    };

    let mut imported_ids = Vec::new();
    let mut errors = Vec::new();

    // Header is line 1, so the first data row is line 2
    for (idx, record) in reader.records().enumerate() {
        let line = idx + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                errors.push(format!("Line {}: Unreadable row - {}", line, e));
                continue;
            }
        };

        match import_row(&tx, &header_map, &record, &mut categories) {
            Ok(id) => imported_ids.push(id),
            Err(msg) => errors.push(format!("Line {}: {}", line, msg)),
        }
    }

    if !errors.is_empty() {
        // Dropping the transaction rolls back bills and on-the-fly categories
        return Err(AppError::Import { errors });
    }

    tx.commit()?;
    Ok(ImportSummary {
        imported: imported_ids.len(),
        imported_ids,
    })
}

fn import_row(
    tx: &rusqlite::Transaction<'_>,
    header_map: &HeaderMap,
    record: &StringRecord,
    categories: &mut HashMap<String, i64>,
) -> std::result::Result<i64, String> {
    let category_name = header_map.get(record, "category_name");
    let billing_start = header_map.get(record, "billing_start");
    let billing_end = header_map.get(record, "billing_end");
    let total_amount = header_map.get(record, "total_amount");

    if category_name.is_empty()
        || billing_start.is_empty()
        || billing_end.is_empty()
        || total_amount.is_empty()
    {
        return Err(format!(
            "Missing required data ({})",
            REQUIRED_HEADERS.join(", ")
        ));
    }

    let start = parse_date(billing_start, record)?;
    let end = parse_date(billing_end, record)?;
    let amount: f64 = total_amount
        .parse()
        .map_err(|_| format!("Invalid amount '{}'. Row: {:?}", total_amount, record))?;

    let bill_date = match header_map.get(record, "bill_date") {
        "" => Local::now().date_naive(),
        raw => parse_date(raw, record)?,
    };
    let usage = non_empty(header_map.get(record, "usage"));
    let notes = non_empty(header_map.get(record, "notes"));

    let category_id = match categories.get(&category_name.to_lowercase()) {
        Some(&id) => id,
        None => {
            tx.execute(
                "INSERT INTO utility_categories (name) VALUES (?1)",
                params![category_name],
            )
            .map_err(|e| format!("Could not create category '{}': {}", category_name, e))?;
            let id = tx.last_insert_rowid();
            categories.insert(category_name.to_lowercase(), id);
            id
        }
    };

    tx.execute(
        "INSERT INTO utility_bills (category_id, billing_period_start, billing_period_end,
                bill_date, total_amount, usage_data, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            category_id,
            start.to_string(),
            end.to_string(),
            bill_date.to_string(),
            amount,
            usage,
            notes,
        ],
    )
    .map_err(|e| format!("Database error - {}", e))?;

    Ok(tx.last_insert_rowid())
}

fn parse_date(raw: &str, record: &StringRecord) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date '{}' (expected YYYY-MM-DD). Row: {:?}", raw, record))
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
