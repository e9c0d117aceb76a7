use chrono::{Local, NaiveDate};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::entities::{date_from_sql, date_to_sql};
use crate::error::{AppError, Result};

// ============================================================================
// Records
// ============================================================================

/// A utility category (Internet, Water, Gas). Names are unique
/// case-insensitively; deleting a category cascades to its bills and splits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtilityCategory {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtilityBill {
    pub id: i64,
    pub category_id: i64,
    pub category_name: Option<String>,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub bill_date: Option<NaiveDate>,
    pub total_amount: f64,
    pub usage_data: Option<String>,
    pub notes: Option<String>,
    pub file_path: Option<String>,
    pub created_at: String,
}

/// One tenant's share of a bill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtilityBillSplit {
    pub id: i64,
    pub bill_id: i64,
    pub tenant_id: i64,
    pub tenant_name: Option<String>,
    pub amount_owed: f64,
    pub is_paid: bool,
    pub paid_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBill {
    pub category_id: i64,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub total_amount: f64,
    #[serde(default)]
    pub bill_date: Option<NaiveDate>,
    #[serde(default)]
    pub usage_data: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BillPatch {
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub billing_period_start: Option<NaiveDate>,
    #[serde(default)]
    pub billing_period_end: Option<NaiveDate>,
    #[serde(default, deserialize_with = "crate::entities::double_option")]
    pub bill_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub total_amount: Option<f64>,
    #[serde(default, deserialize_with = "crate::entities::double_option")]
    pub usage_data: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::entities::double_option")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::entities::double_option")]
    pub file_path: Option<Option<String>>,
}

// ============================================================================
// Categories
// ============================================================================

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<UtilityCategory> {
    Ok(UtilityCategory {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
    })
}

pub fn create_category(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
) -> Result<UtilityCategory> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("Missing required field: name"));
    }
    if find_category_by_name(conn, name)?.is_some() {
        return Err(AppError::conflict(format!(
            "Utility category '{}' already exists",
            name
        )));
    }

    conn.execute(
        "INSERT INTO utility_categories (name, description) VALUES (?1, ?2)",
        params![name, description],
    )?;
    get_category(conn, conn.last_insert_rowid())
}

pub fn get_category(conn: &Connection, category_id: i64) -> Result<UtilityCategory> {
    let mut stmt =
        conn.prepare("SELECT id, name, description FROM utility_categories WHERE id = ?1")?;
    stmt.query_row(params![category_id], category_from_row)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                AppError::not_found("Utility category", category_id)
            }
            other => other.into(),
        })
}

/// Case-insensitive lookup, used by both the write-time uniqueness check and
/// the CSV importer's category matching.
pub fn find_category_by_name(conn: &Connection, name: &str) -> Result<Option<UtilityCategory>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description FROM utility_categories
         WHERE name = ?1 COLLATE NOCASE",
    )?;
    let mut rows = stmt.query_map(params![name], category_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn list_categories(conn: &Connection) -> Result<Vec<UtilityCategory>> {
    let mut stmt =
        conn.prepare("SELECT id, name, description FROM utility_categories ORDER BY name")?;
    let categories = stmt
        .query_map([], category_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(categories)
}

pub fn update_category(
    conn: &Connection,
    category_id: i64,
    name: Option<&str>,
    description: Option<Option<&str>>,
) -> Result<UtilityCategory> {
    let mut category = get_category(conn, category_id)?;

    if let Some(new_name) = name {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(AppError::validation("name must not be empty"));
        }
        if let Some(existing) = find_category_by_name(conn, new_name)? {
            if existing.id != category_id {
                return Err(AppError::conflict(format!(
                    "Utility category '{}' already exists",
                    new_name
                )));
            }
        }
        category.name = new_name.to_string();
    }
    if let Some(desc) = description {
        category.description = desc.map(str::to_string);
    }

    conn.execute(
        "UPDATE utility_categories SET name = ?1, description = ?2 WHERE id = ?3",
        params![category.name, category.description, category_id],
    )?;
    Ok(category)
}

/// Deletes a category together with its bills and their splits, all in one
/// transaction. The cascade is explicit application logic, not a referential
/// action in the schema.
pub fn delete_category(conn: &mut Connection, category_id: i64) -> Result<UtilityCategory> {
    let category = get_category(conn, category_id)?;

    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM utility_bill_splits WHERE bill_id IN
         (SELECT id FROM utility_bills WHERE category_id = ?1)",
        params![category_id],
    )?;
    tx.execute(
        "DELETE FROM utility_bills WHERE category_id = ?1",
        params![category_id],
    )?;
    tx.execute(
        "DELETE FROM utility_categories WHERE id = ?1",
        params![category_id],
    )?;
    tx.commit()?;

    Ok(category)
}

// ============================================================================
// Bills
// ============================================================================

fn bill_from_row(row: &Row<'_>) -> rusqlite::Result<UtilityBill> {
    let start: String = row.get(3)?;
    let end: String = row.get(4)?;
    let bill_date: Option<String> = row.get(5)?;
    Ok(UtilityBill {
        id: row.get(0)?,
        category_id: row.get(1)?,
        category_name: row.get(2)?,
        billing_period_start: date_from_sql(Some(start)).unwrap_or_default(),
        billing_period_end: date_from_sql(Some(end)).unwrap_or_default(),
        bill_date: date_from_sql(bill_date),
        total_amount: row.get(6)?,
        usage_data: row.get(7)?,
        notes: row.get(8)?,
        file_path: row.get(9)?,
        created_at: row.get(10)?,
    })
}

const BILL_SELECT: &str = "SELECT b.id, b.category_id, c.name, b.billing_period_start,
        b.billing_period_end, b.bill_date, b.total_amount, b.usage_data, b.notes,
        b.file_path, b.created_at
 FROM utility_bills b
 LEFT JOIN utility_categories c ON c.id = b.category_id";

pub fn create_bill(conn: &Connection, new: &NewBill) -> Result<UtilityBill> {
    get_category(conn, new.category_id)?;

    if new.billing_period_start > new.billing_period_end {
        return Err(AppError::validation(
            "billing_period_start must not be after billing_period_end",
        ));
    }

    let bill_date = new.bill_date.unwrap_or_else(|| Local::now().date_naive());

    conn.execute(
        "INSERT INTO utility_bills (category_id, billing_period_start, billing_period_end,
                bill_date, total_amount, usage_data, notes, file_path)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            new.category_id,
            new.billing_period_start.to_string(),
            new.billing_period_end.to_string(),
            bill_date.to_string(),
            new.total_amount,
            new.usage_data,
            new.notes,
            new.file_path,
        ],
    )?;

    get_bill(conn, conn.last_insert_rowid())
}

pub fn get_bill(conn: &Connection, bill_id: i64) -> Result<UtilityBill> {
    let mut stmt = conn.prepare(&format!("{BILL_SELECT} WHERE b.id = ?1"))?;
    stmt.query_row(params![bill_id], bill_from_row)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::not_found("Utility bill", bill_id),
            other => other.into(),
        })
}

/// Most recent billing periods first.
pub fn list_bills(conn: &Connection) -> Result<Vec<UtilityBill>> {
    let mut stmt =
        conn.prepare(&format!("{BILL_SELECT} ORDER BY b.billing_period_end DESC, b.id DESC"))?;
    let bills = stmt
        .query_map([], bill_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(bills)
}

/// Bills whose period ends on or after the cutoff, newest first. Feeds the
/// usage-analysis summary.
pub fn list_bills_ending_since(conn: &Connection, cutoff: NaiveDate) -> Result<Vec<UtilityBill>> {
    let mut stmt = conn.prepare(&format!(
        "{BILL_SELECT} WHERE b.billing_period_end >= ?1
         ORDER BY b.billing_period_end DESC, b.id DESC"
    ))?;
    let bills = stmt
        .query_map(params![cutoff.to_string()], bill_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(bills)
}

pub fn update_bill(conn: &Connection, bill_id: i64, patch: &BillPatch) -> Result<UtilityBill> {
    let mut bill = get_bill(conn, bill_id)?;

    if let Some(category_id) = patch.category_id {
        let category = get_category(conn, category_id)?;
        bill.category_id = category.id;
        bill.category_name = Some(category.name);
    }
    if let Some(start) = patch.billing_period_start {
        bill.billing_period_start = start;
    }
    if let Some(end) = patch.billing_period_end {
        bill.billing_period_end = end;
    }
    if bill.billing_period_start > bill.billing_period_end {
        return Err(AppError::validation(
            "billing_period_start must not be after billing_period_end",
        ));
    }
    if let Some(date) = patch.bill_date {
        bill.bill_date = date;
    }
    if let Some(amount) = patch.total_amount {
        bill.total_amount = amount;
    }
    if let Some(usage) = &patch.usage_data {
        bill.usage_data = usage.clone();
    }
    if let Some(notes) = &patch.notes {
        bill.notes = notes.clone();
    }
    if let Some(path) = &patch.file_path {
        bill.file_path = path.clone();
    }

    conn.execute(
        "UPDATE utility_bills SET category_id = ?1, billing_period_start = ?2,
                billing_period_end = ?3, bill_date = ?4, total_amount = ?5,
                usage_data = ?6, notes = ?7, file_path = ?8
         WHERE id = ?9",
        params![
            bill.category_id,
            bill.billing_period_start.to_string(),
            bill.billing_period_end.to_string(),
            date_to_sql(bill.bill_date),
            bill.total_amount,
            bill.usage_data,
            bill.notes,
            bill.file_path,
            bill_id,
        ],
    )?;

    Ok(bill)
}

/// Deletes a bill and its splits in one transaction.
pub fn delete_bill(conn: &mut Connection, bill_id: i64) -> Result<()> {
    get_bill(conn, bill_id)?;

    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM utility_bill_splits WHERE bill_id = ?1",
        params![bill_id],
    )?;
    tx.execute("DELETE FROM utility_bills WHERE id = ?1", params![bill_id])?;
    tx.commit()?;
    Ok(())
}

// ============================================================================
// Splits (reads; writes live in the split engine)
// ============================================================================

pub(crate) fn split_from_row(row: &Row<'_>) -> rusqlite::Result<UtilityBillSplit> {
    let paid_date: Option<String> = row.get(6)?;
    Ok(UtilityBillSplit {
        id: row.get(0)?,
        bill_id: row.get(1)?,
        tenant_id: row.get(2)?,
        tenant_name: row.get(3)?,
        amount_owed: row.get(4)?,
        is_paid: row.get(5)?,
        paid_date: date_from_sql(paid_date),
    })
}

pub(crate) const SPLIT_SELECT: &str =
    "SELECT s.id, s.bill_id, s.tenant_id, t.name, s.amount_owed, s.is_paid, s.paid_date
     FROM utility_bill_splits s
     LEFT JOIN tenants t ON t.id = s.tenant_id";

pub fn list_splits_for_bill(conn: &Connection, bill_id: i64) -> Result<Vec<UtilityBillSplit>> {
    let mut stmt = conn.prepare(&format!("{SPLIT_SELECT} WHERE s.bill_id = ?1 ORDER BY s.id"))?;
    let splits = stmt
        .query_map(params![bill_id], split_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(splits)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;
    use crate::entities::tenant::{create_tenant, tests::sample};
    use crate::splits::{replace_splits, SplitInput};

    pub(crate) fn bill_for(category_id: i64, end: &str, total: f64) -> NewBill {
        let end = NaiveDate::parse_from_str(end, "%Y-%m-%d").unwrap();
        NewBill {
            category_id,
            billing_period_start: end.pred_opt().unwrap(),
            billing_period_end: end,
            total_amount: total,
            bill_date: None,
            usage_data: None,
            notes: None,
            file_path: None,
        }
    }

    #[test]
    fn test_category_names_conflict_case_insensitively() {
        let conn = db::open_test();
        create_category(&conn, "Water", None).unwrap();

        let err = create_category(&conn, "water", None).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_find_category_ignores_case() {
        let conn = db::open_test();
        let cat = create_category(&conn, "Internet", None).unwrap();

        let found = find_category_by_name(&conn, "INTERNET").unwrap().unwrap();
        assert_eq!(found.id, cat.id);
    }

    #[test]
    fn test_bill_rejects_inverted_period() {
        let conn = db::open_test();
        let cat = create_category(&conn, "Gas", None).unwrap();

        let mut bill = bill_for(cat.id, "2025-03-01", 80.0);
        bill.billing_period_start = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        let err = create_bill(&conn, &bill).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_bill_defaults_bill_date_to_today() {
        let conn = db::open_test();
        let cat = create_category(&conn, "Gas", None).unwrap();
        let bill = create_bill(&conn, &bill_for(cat.id, "2025-03-31", 80.0)).unwrap();
        assert_eq!(bill.bill_date, Some(Local::now().date_naive()));
    }

    #[test]
    fn test_json_null_clears_bill_date() {
        let conn = db::open_test();
        let cat = create_category(&conn, "Gas", None).unwrap();
        let bill = create_bill(&conn, &bill_for(cat.id, "2025-03-31", 80.0)).unwrap();
        assert!(bill.bill_date.is_some());

        let patch: BillPatch =
            serde_json::from_str(r#"{"bill_date": null, "notes": null}"#).unwrap();
        assert_eq!(patch.bill_date, Some(None));
        assert_eq!(patch.usage_data, None);

        let updated = update_bill(&conn, bill.id, &patch).unwrap();
        assert_eq!(updated.bill_date, None);
        assert_eq!(updated.notes, None);
    }

    #[test]
    fn test_delete_category_cascades_to_bills_and_splits() {
        let mut conn = db::open_test();
        let cat = create_category(&conn, "Water", None).unwrap();
        let t1 = create_tenant(&conn, &sample("Alice", 1000.0)).unwrap();
        let t2 = create_tenant(&conn, &sample("Bob", 800.0)).unwrap();

        for end in ["2025-02-28", "2025-03-31"] {
            let bill = create_bill(&conn, &bill_for(cat.id, end, 100.0)).unwrap();
            replace_splits(
                &mut conn,
                bill.id,
                &[
                    SplitInput { tenant_id: t1.id, amount_owed: 60.0, is_paid: None, paid_date: None },
                    SplitInput { tenant_id: t2.id, amount_owed: 40.0, is_paid: None, paid_date: None },
                ],
            )
            .unwrap();
        }

        delete_category(&mut conn, cat.id).unwrap();

        let bills: i64 = conn
            .query_row("SELECT COUNT(*) FROM utility_bills", [], |r| r.get(0))
            .unwrap();
        let splits: i64 = conn
            .query_row("SELECT COUNT(*) FROM utility_bill_splits", [], |r| r.get(0))
            .unwrap();
        assert_eq!(bills, 0);
        assert_eq!(splits, 0);
    }

    #[test]
    fn test_delete_bill_cascades_to_splits() {
        let mut conn = db::open_test();
        let cat = create_category(&conn, "Gas", None).unwrap();
        let t = create_tenant(&conn, &sample("Alice", 1000.0)).unwrap();
        let bill = create_bill(&conn, &bill_for(cat.id, "2025-03-31", 50.0)).unwrap();
        replace_splits(
            &mut conn,
            bill.id,
            &[SplitInput { tenant_id: t.id, amount_owed: 50.0, is_paid: None, paid_date: None }],
        )
        .unwrap();

        delete_bill(&mut conn, bill.id).unwrap();

        assert!(list_splits_for_bill(&conn, bill.id).unwrap().is_empty());
        assert!(matches!(
            get_bill(&conn, bill.id).unwrap_err(),
            AppError::NotFound(_)
        ));
    }
}
