use chrono::{Local, NaiveDate};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::entities::{date_from_sql, tenant};
use crate::error::{AppError, Result};

/// A rent payment made by one tenant. Hard-deleted, unlike tenants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RentPayment {
    pub id: i64,
    pub tenant_id: i64,
    pub amount: f64,
    pub payment_date: NaiveDate,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPayment {
    pub amount: f64,
    #[serde(default)]
    pub payment_date: Option<NaiveDate>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentPatch {
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub payment_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "crate::entities::double_option")]
    pub payment_method: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::entities::double_option")]
    pub notes: Option<Option<String>>,
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<RentPayment> {
    let date: String = row.get(3)?;
    Ok(RentPayment {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        amount: row.get(2)?,
        payment_date: date_from_sql(Some(date)).unwrap_or_default(),
        payment_method: row.get(4)?,
        notes: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const PAYMENT_COLS: &str =
    "id, tenant_id, amount, payment_date, payment_method, notes, created_at";

pub fn create_payment(conn: &Connection, tenant_id: i64, new: &NewPayment) -> Result<RentPayment> {
    // 404 on unknown tenant before touching the payments table
    tenant::get_tenant(conn, tenant_id)?;

    if new.amount <= 0.0 {
        return Err(AppError::validation("amount must be a positive number"));
    }

    let payment_date = new
        .payment_date
        .unwrap_or_else(|| Local::now().date_naive());

    conn.execute(
        "INSERT INTO rent_payments (tenant_id, amount, payment_date, payment_method, notes)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            tenant_id,
            new.amount,
            payment_date.to_string(),
            new.payment_method,
            new.notes,
        ],
    )?;

    get_payment(conn, conn.last_insert_rowid())
}

pub fn get_payment(conn: &Connection, payment_id: i64) -> Result<RentPayment> {
    let mut stmt =
        conn.prepare(&format!("SELECT {PAYMENT_COLS} FROM rent_payments WHERE id = ?1"))?;
    stmt.query_row(params![payment_id], payment_from_row)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::not_found("Payment", payment_id),
            other => other.into(),
        })
}

/// Newest first, matching how the payment history is displayed.
pub fn list_payments_for_tenant(conn: &Connection, tenant_id: i64) -> Result<Vec<RentPayment>> {
    tenant::get_tenant(conn, tenant_id)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {PAYMENT_COLS} FROM rent_payments
         WHERE tenant_id = ?1 ORDER BY payment_date DESC, id DESC"
    ))?;
    let payments = stmt
        .query_map(params![tenant_id], payment_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(payments)
}

/// Payments dated inside `[start, end]` inclusive, oldest first.
pub fn list_payments_in_range(
    conn: &Connection,
    tenant_id: i64,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<RentPayment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PAYMENT_COLS} FROM rent_payments
         WHERE tenant_id = ?1 AND payment_date >= ?2 AND payment_date <= ?3
         ORDER BY payment_date, id"
    ))?;
    let payments = stmt
        .query_map(
            params![tenant_id, start.to_string(), end.to_string()],
            payment_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(payments)
}

pub fn update_payment(
    conn: &Connection,
    payment_id: i64,
    patch: &PaymentPatch,
) -> Result<RentPayment> {
    let mut payment = get_payment(conn, payment_id)?;

    if let Some(amount) = patch.amount {
        if amount <= 0.0 {
            return Err(AppError::validation("amount must be a positive number"));
        }
        payment.amount = amount;
    }
    if let Some(date) = patch.payment_date {
        payment.payment_date = date;
    }
    if let Some(method) = &patch.payment_method {
        payment.payment_method = method.clone();
    }
    if let Some(notes) = &patch.notes {
        payment.notes = notes.clone();
    }

    conn.execute(
        "UPDATE rent_payments SET amount = ?1, payment_date = ?2, payment_method = ?3, notes = ?4
         WHERE id = ?5",
        params![
            payment.amount,
            payment.payment_date.to_string(),
            payment.payment_method,
            payment.notes,
            payment_id,
        ],
    )?;

    Ok(payment)
}

pub fn delete_payment(conn: &Connection, payment_id: i64) -> Result<()> {
    get_payment(conn, payment_id)?;
    conn.execute("DELETE FROM rent_payments WHERE id = ?1", params![payment_id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::entities::tenant::tests::sample;
    use crate::entities::tenant::create_tenant;

    fn payment(amount: f64, date: &str) -> NewPayment {
        NewPayment {
            amount,
            payment_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").ok(),
            payment_method: None,
            notes: None,
        }
    }

    #[test]
    fn test_create_payment_for_missing_tenant() {
        let conn = db::open_test();
        let err = create_payment(&conn, 7, &payment(500.0, "2025-03-01")).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_create_rejects_non_positive_amount() {
        let conn = db::open_test();
        let t = create_tenant(&conn, &sample("Alice", 1000.0)).unwrap();
        let err = create_payment(&conn, t.id, &payment(0.0, "2025-03-01")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_range_filter_is_inclusive() {
        let conn = db::open_test();
        let t = create_tenant(&conn, &sample("Alice", 1000.0)).unwrap();
        create_payment(&conn, t.id, &payment(100.0, "2025-03-01")).unwrap();
        create_payment(&conn, t.id, &payment(200.0, "2025-03-31")).unwrap();
        create_payment(&conn, t.id, &payment(300.0, "2025-04-01")).unwrap();

        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 3, 31).unwrap();
        let in_march = list_payments_in_range(&conn, t.id, start, end).unwrap();

        assert_eq!(in_march.len(), 2);
        assert_eq!(in_march.iter().map(|p| p.amount).sum::<f64>(), 300.0);
    }

    #[test]
    fn test_delete_is_hard() {
        let conn = db::open_test();
        let t = create_tenant(&conn, &sample("Alice", 1000.0)).unwrap();
        let p = create_payment(&conn, t.id, &payment(100.0, "2025-03-01")).unwrap();

        delete_payment(&conn, p.id).unwrap();
        assert!(matches!(
            get_payment(&conn, p.id).unwrap_err(),
            AppError::NotFound(_)
        ));
    }
}
