//! Invoice Aggregator.
//!
//! An invoice is a computed monthly summary for one tenant: base rent plus
//! the tenant's utility splits, against the payments received that month.
//! A bill is attributed to the calendar month its billing period ENDS in;
//! a bill spanning two months lands entirely in the later one.

use chrono::{Local, NaiveDate};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::entities::payment::{self, RentPayment};
use crate::entities::tenant::{self, Tenant};
use crate::entities::utility::{self, UtilityBillSplit};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub tenant: Tenant,
    /// Human-readable month label, e.g. "March 2025".
    pub month_label: String,
    pub invoice_date: NaiveDate,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub base_rent: f64,
    pub utility_splits: Vec<UtilityBillSplit>,
    pub total_utilities: f64,
    pub total_due: f64,
    pub payments: Vec<RentPayment>,
    pub total_paid: f64,
    /// Always zero: no cross-month carry is tracked.
    pub balance_forward: f64,
}

/// First and last day of the given calendar month. December rolls the "first
/// of next month" into January of the following year.
pub fn month_window(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate)> {
    if !(1..=12).contains(&month) {
        return Err(AppError::validation(format!(
            "Invalid month: {} (must be 1-12)",
            month
        )));
    }
    let start = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AppError::validation(format!("Invalid year/month: {}-{}", year, month)))?;
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .ok_or_else(|| AppError::validation(format!("Invalid year/month: {}-{}", year, month)))?
        .pred_opt()
        .ok_or_else(|| AppError::validation(format!("Invalid year/month: {}-{}", year, month)))?;
    Ok((start, end))
}

pub fn build_invoice(conn: &Connection, tenant_id: i64, year: i32, month: u32) -> Result<Invoice> {
    let (start, end) = month_window(year, month)?;
    let tenant = tenant::get_tenant(conn, tenant_id)?;

    let utility_splits = splits_ending_in_window(conn, tenant_id, start, end)?;
    let total_utilities: f64 = utility_splits.iter().map(|s| s.amount_owed).sum();
    let total_due = tenant.base_rent_amount + total_utilities;

    let payments = payment::list_payments_in_range(conn, tenant_id, start, end)?;
    let total_paid: f64 = payments.iter().map(|p| p.amount).sum();

    Ok(Invoice {
        month_label: format!("{} {}", month_name(month), year),
        invoice_date: Local::now().date_naive(),
        period_start: start,
        period_end: end,
        base_rent: tenant.base_rent_amount,
        tenant,
        utility_splits,
        total_utilities,
        total_due,
        payments,
        total_paid,
        balance_forward: 0.0,
    })
}

/// Splits for the tenant whose parent bill's billing period ends inside
/// `[start, end]` inclusive.
fn splits_ending_in_window(
    conn: &Connection,
    tenant_id: i64,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<UtilityBillSplit>> {
    let mut stmt = conn.prepare(&format!(
        "{} JOIN utility_bills b ON b.id = s.bill_id
         WHERE s.tenant_id = ?1
           AND b.billing_period_end >= ?2
           AND b.billing_period_end <= ?3
         ORDER BY b.billing_period_end, s.id",
        utility::SPLIT_SELECT
    ))?;
    let splits = stmt
        .query_map(
            params![tenant_id, start.to_string(), end.to_string()],
            utility::split_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(splits)
}

fn month_name(month: u32) -> &'static str {
    match month {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        _ => "December",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::entities::payment::{create_payment, NewPayment};
    use crate::entities::tenant::{create_tenant, tests::sample};
    use crate::entities::utility::{create_bill, create_category, tests::bill_for};
    use crate::splits::{replace_splits, SplitInput};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_month_window_rollover() {
        let (start, end) = month_window(2024, 12).unwrap();
        assert_eq!(start, date("2024-12-01"));
        assert_eq!(end, date("2024-12-31"));

        let (start, end) = month_window(2024, 2).unwrap();
        assert_eq!(start, date("2024-02-01"));
        assert_eq!(end, date("2024-02-29"));
    }

    #[test]
    fn test_month_window_rejects_bad_month() {
        assert!(matches!(
            month_window(2025, 0).unwrap_err(),
            AppError::Validation(_)
        ));
        assert!(matches!(
            month_window(2025, 13).unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[test]
    fn test_invoice_scenario_rent_split_payment() {
        // Tenant with base rent 1000; a 150 bill ending in March split 100/50
        // between two tenants; one 500 payment in March for the first tenant.
        let mut conn = db::open_test();
        let t1 = create_tenant(&conn, &sample("Alice", 1000.0)).unwrap();
        let t2 = create_tenant(&conn, &sample("Bob", 800.0)).unwrap();
        let cat = create_category(&conn, "Water", None).unwrap();
        let bill = create_bill(&conn, &bill_for(cat.id, "2025-03-15", 150.0)).unwrap();
        replace_splits(
            &mut conn,
            bill.id,
            &[
                SplitInput { tenant_id: t1.id, amount_owed: 100.0, is_paid: None, paid_date: None },
                SplitInput { tenant_id: t2.id, amount_owed: 50.0, is_paid: None, paid_date: None },
            ],
        )
        .unwrap();
        create_payment(
            &conn,
            t1.id,
            &NewPayment {
                amount: 500.0,
                payment_date: Some(date("2025-03-10")),
                payment_method: None,
                notes: None,
            },
        )
        .unwrap();

        let invoice = build_invoice(&conn, t1.id, 2025, 3).unwrap();

        assert_eq!(invoice.total_utilities, 100.0);
        assert_eq!(invoice.total_due, 1100.0);
        assert_eq!(invoice.total_paid, 500.0);
        assert_eq!(invoice.balance_forward, 0.0);
        assert_eq!(invoice.month_label, "March 2025");
        assert_eq!(invoice.utility_splits.len(), 1);
        assert_eq!(invoice.payments.len(), 1);
    }

    #[test]
    fn test_bill_attributed_to_period_end_month() {
        // Period spans Feb 15 - Mar 05: counts for March only
        let mut conn = db::open_test();
        let t = create_tenant(&conn, &sample("Alice", 1000.0)).unwrap();
        let cat = create_category(&conn, "Gas", None).unwrap();
        let mut new_bill = bill_for(cat.id, "2025-03-05", 90.0);
        new_bill.billing_period_start = date("2025-02-15");
        let bill = create_bill(&conn, &new_bill).unwrap();
        replace_splits(
            &mut conn,
            bill.id,
            &[SplitInput { tenant_id: t.id, amount_owed: 90.0, is_paid: None, paid_date: None }],
        )
        .unwrap();

        let february = build_invoice(&conn, t.id, 2025, 2).unwrap();
        assert_eq!(february.total_utilities, 0.0);

        let march = build_invoice(&conn, t.id, 2025, 3).unwrap();
        assert_eq!(march.total_utilities, 90.0);
    }

    #[test]
    fn test_invoice_is_idempotent() {
        let conn = db::open_test();
        let t = create_tenant(&conn, &sample("Alice", 1000.0)).unwrap();

        let first = build_invoice(&conn, t.id, 2025, 3).unwrap();
        let second = build_invoice(&conn, t.id, 2025, 3).unwrap();

        assert_eq!(first.total_due, second.total_due);
        assert_eq!(first.total_paid, second.total_paid);
        assert_eq!(first.total_utilities, second.total_utilities);
    }

    #[test]
    fn test_invoice_missing_tenant() {
        let conn = db::open_test();
        assert!(matches!(
            build_invoice(&conn, 41, 2025, 3).unwrap_err(),
            AppError::NotFound(_)
        ));
    }
}
