//! Bill-Split Engine.
//!
//! A bill's total is divided among tenants as `utility_bill_splits` rows.
//! The full split set for a bill is only ever written as a batch: validate,
//! delete the old set, insert the new one, all inside a single transaction.
//! Partial edits (`update_split`) deliberately skip the reconciliation check;
//! reconciliation is a batch-write invariant, not a continuous one.

use chrono::{Local, NaiveDate};
use rusqlite::{params, Connection, Transaction};
use serde::Deserialize;

use crate::entities::utility::{self, UtilityBillSplit};
use crate::error::{AppError, Result};

/// Tolerance for comparing a split sum against the bill total. Covers float
/// rounding when amounts are entered to the cent.
pub const RECONCILE_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Deserialize)]
pub struct SplitInput {
    pub tenant_id: i64,
    pub amount_owed: f64,
    #[serde(default)]
    pub is_paid: Option<bool>,
    #[serde(default)]
    pub paid_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SplitPatch {
    #[serde(default)]
    pub amount_owed: Option<f64>,
    #[serde(default)]
    pub is_paid: Option<bool>,
    #[serde(default, deserialize_with = "crate::entities::double_option")]
    pub paid_date: Option<Option<NaiveDate>>,
}

/// Replaces the entire split set for a bill.
///
/// All-or-nothing: the delete of the previous set and every insert of the new
/// set commit together or not at all. Fails with `Validation` when the set is
/// empty, an amount is negative, a tenant is unknown, or the sum strays from
/// the bill total by more than [`RECONCILE_TOLERANCE`].
pub fn replace_splits(
    conn: &mut Connection,
    bill_id: i64,
    inputs: &[SplitInput],
) -> Result<Vec<UtilityBillSplit>> {
    let bill = utility::get_bill(conn, bill_id)?;

    if inputs.is_empty() {
        return Err(AppError::validation("At least one split is required"));
    }
    for input in inputs {
        if input.amount_owed < 0.0 {
            return Err(AppError::validation(format!(
                "amount_owed must not be negative (tenant {})",
                input.tenant_id
            )));
        }
    }

    let split_total: f64 = inputs.iter().map(|s| s.amount_owed).sum();
    if (split_total - bill.total_amount).abs() > RECONCILE_TOLERANCE {
        return Err(AppError::validation(format!(
            "Total split amount (${:.2}) does not match bill total (${:.2})",
            split_total, bill.total_amount
        )));
    }

    let tx = conn.transaction()?;
    let ids = write_split_set(&tx, bill_id, inputs)?;
    tx.commit()?;

    let mut created = Vec::with_capacity(ids.len());
    for id in ids {
        created.push(get_split(conn, id)?);
    }
    Ok(created)
}

fn write_split_set(tx: &Transaction<'_>, bill_id: i64, inputs: &[SplitInput]) -> Result<Vec<i64>> {
    tx.execute(
        "DELETE FROM utility_bill_splits WHERE bill_id = ?1",
        params![bill_id],
    )?;

    let mut ids = Vec::with_capacity(inputs.len());
    for input in inputs {
        // Tenant check inside the transaction so an unknown tenant rolls the
        // delete back too.
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM tenants WHERE id = ?1)",
            params![input.tenant_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(AppError::not_found("Tenant", input.tenant_id));
        }

        let (is_paid, paid_date) = normalize_paid(input.is_paid.unwrap_or(false), input.paid_date);

        tx.execute(
            "INSERT INTO utility_bill_splits (bill_id, tenant_id, amount_owed, is_paid, paid_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                bill_id,
                input.tenant_id,
                input.amount_owed,
                is_paid,
                paid_date.map(|d| d.to_string()),
            ],
        )?;
        ids.push(tx.last_insert_rowid());
    }
    Ok(ids)
}

/// Paid-date consistency: a set date forces `is_paid`, and a newly paid split
/// without a date is stamped with today.
fn normalize_paid(is_paid: bool, paid_date: Option<NaiveDate>) -> (bool, Option<NaiveDate>) {
    match (is_paid, paid_date) {
        (_, Some(date)) => (true, Some(date)),
        (true, None) => (true, Some(Local::now().date_naive())),
        (false, None) => (false, None),
    }
}

pub fn get_split(conn: &Connection, split_id: i64) -> Result<UtilityBillSplit> {
    let mut stmt = conn.prepare(&format!("{} WHERE s.id = ?1", utility::SPLIT_SELECT))?;
    stmt.query_row(params![split_id], utility::split_from_row)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::not_found("Split", split_id),
            other => other.into(),
        })
}

/// Partial update of one split: amount, paid flag, paid date.
///
/// Does NOT re-check the parent bill's reconciliation, so editing
/// `amount_owed` here can leave the bill's splits out of balance. That drift
/// is accepted; the next full `replace_splits` restores the invariant.
pub fn update_split(
    conn: &Connection,
    split_id: i64,
    patch: &SplitPatch,
) -> Result<UtilityBillSplit> {
    let mut split = get_split(conn, split_id)?;

    if let Some(amount) = patch.amount_owed {
        if amount < 0.0 {
            return Err(AppError::validation("amount_owed must not be negative"));
        }
        split.amount_owed = amount;
    }

    if let Some(is_paid) = patch.is_paid {
        split.is_paid = is_paid;
        if is_paid && split.paid_date.is_none() && patch.paid_date.is_none() {
            split.paid_date = Some(Local::now().date_naive());
        }
        if !is_paid && patch.paid_date.is_none() {
            split.paid_date = None;
        }
    }

    if let Some(paid_date) = patch.paid_date {
        split.paid_date = paid_date;
        if paid_date.is_some() {
            split.is_paid = true;
        }
    }

    conn.execute(
        "UPDATE utility_bill_splits SET amount_owed = ?1, is_paid = ?2, paid_date = ?3
         WHERE id = ?4",
        params![
            split.amount_owed,
            split.is_paid,
            split.paid_date.map(|d| d.to_string()),
            split_id,
        ],
    )?;

    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::entities::tenant::{create_tenant, tests::sample};
    use crate::entities::utility::{create_bill, create_category, list_splits_for_bill, tests::bill_for};

    fn share(tenant_id: i64, amount: f64) -> SplitInput {
        SplitInput {
            tenant_id,
            amount_owed: amount,
            is_paid: None,
            paid_date: None,
        }
    }

    fn setup(conn: &Connection, total: f64) -> (i64, i64, i64) {
        let cat = create_category(conn, "Water", None).unwrap();
        let bill = create_bill(conn, &bill_for(cat.id, "2025-03-15", total)).unwrap();
        let t1 = create_tenant(conn, &sample("Alice", 1000.0)).unwrap();
        let t2 = create_tenant(conn, &sample("Bob", 800.0)).unwrap();
        (bill.id, t1.id, t2.id)
    }

    #[test]
    fn test_replace_splits_within_tolerance() {
        let mut conn = db::open_test();
        let (bill_id, t1, t2) = setup(&conn, 150.0);

        let splits =
            replace_splits(&mut conn, bill_id, &[share(t1, 100.0), share(t2, 50.0)]).unwrap();

        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].tenant_name.as_deref(), Some("Alice"));
        assert!(!splits[0].is_paid);
    }

    #[test]
    fn test_replace_rejects_mismatched_total() {
        let mut conn = db::open_test();
        let (bill_id, t1, t2) = setup(&conn, 150.0);

        let err =
            replace_splits(&mut conn, bill_id, &[share(t1, 100.0), share(t2, 49.0)]).unwrap_err();

        match err {
            AppError::Validation(msg) => {
                assert!(msg.contains("$149.00"), "message names split total: {msg}");
                assert!(msg.contains("$150.00"), "message names bill total: {msg}");
            }
            other => panic!("expected Validation, got {other:?}"),
        }
        assert!(list_splits_for_bill(&conn, bill_id).unwrap().is_empty());
    }

    #[test]
    fn test_replace_keeps_prior_splits_on_failure() {
        let mut conn = db::open_test();
        let (bill_id, t1, t2) = setup(&conn, 150.0);
        replace_splits(&mut conn, bill_id, &[share(t1, 100.0), share(t2, 50.0)]).unwrap();

        // Unknown tenant in the replacement set: delete + inserts roll back
        let err =
            replace_splits(&mut conn, bill_id, &[share(t1, 100.0), share(999, 50.0)]).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let kept = list_splits_for_bill(&conn, bill_id).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.iter().map(|s| s.amount_owed).sum::<f64>(), 150.0);
    }

    #[test]
    fn test_replace_rejects_empty_set() {
        let mut conn = db::open_test();
        let (bill_id, _, _) = setup(&conn, 150.0);
        let err = replace_splits(&mut conn, bill_id, &[]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_replace_discards_previous_set() {
        let mut conn = db::open_test();
        let (bill_id, t1, t2) = setup(&conn, 150.0);
        replace_splits(&mut conn, bill_id, &[share(t1, 150.0)]).unwrap();
        replace_splits(&mut conn, bill_id, &[share(t1, 75.0), share(t2, 75.0)]).unwrap();

        let splits = list_splits_for_bill(&conn, bill_id).unwrap();
        assert_eq!(splits.len(), 2);
        assert!(splits.iter().all(|s| s.amount_owed == 75.0));
    }

    #[test]
    fn test_tolerance_boundary() {
        let mut conn = db::open_test();
        let (bill_id, t1, t2) = setup(&conn, 150.0);

        // 0.01 off is allowed, anything further is not
        replace_splits(&mut conn, bill_id, &[share(t1, 100.0), share(t2, 49.99)]).unwrap();
        let err =
            replace_splits(&mut conn, bill_id, &[share(t1, 100.0), share(t2, 49.98)]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_mark_paid_without_date_stamps_today() {
        let mut conn = db::open_test();
        let (bill_id, t1, _) = setup(&conn, 150.0);
        let splits = replace_splits(&mut conn, bill_id, &[share(t1, 150.0)]).unwrap();

        let patch = SplitPatch {
            is_paid: Some(true),
            ..Default::default()
        };
        let updated = update_split(&conn, splits[0].id, &patch).unwrap();

        assert!(updated.is_paid);
        assert_eq!(updated.paid_date, Some(Local::now().date_naive()));
    }

    #[test]
    fn test_setting_paid_date_forces_is_paid() {
        let mut conn = db::open_test();
        let (bill_id, t1, _) = setup(&conn, 150.0);
        let splits = replace_splits(&mut conn, bill_id, &[share(t1, 150.0)]).unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 3, 20).unwrap();
        let patch = SplitPatch {
            paid_date: Some(Some(date)),
            ..Default::default()
        };
        let updated = update_split(&conn, splits[0].id, &patch).unwrap();

        assert!(updated.is_paid);
        assert_eq!(updated.paid_date, Some(date));
    }

    #[test]
    fn test_amount_edit_skips_reconciliation() {
        let mut conn = db::open_test();
        let (bill_id, t1, t2) = setup(&conn, 150.0);
        let splits =
            replace_splits(&mut conn, bill_id, &[share(t1, 100.0), share(t2, 50.0)]).unwrap();

        // Drifts the set away from the bill total; allowed by design
        let patch = SplitPatch {
            amount_owed: Some(10.0),
            ..Default::default()
        };
        update_split(&conn, splits[0].id, &patch).unwrap();

        let sum: f64 = list_splits_for_bill(&conn, bill_id)
            .unwrap()
            .iter()
            .map(|s| s.amount_owed)
            .sum();
        assert_eq!(sum, 60.0);
    }

    #[test]
    fn test_json_null_clears_paid_date() {
        let mut conn = db::open_test();
        let (bill_id, t1, _) = setup(&conn, 150.0);
        let splits = replace_splits(
            &mut conn,
            bill_id,
            &[SplitInput {
                tenant_id: t1,
                amount_owed: 150.0,
                is_paid: Some(true),
                paid_date: NaiveDate::from_ymd_opt(2025, 3, 5),
            }],
        )
        .unwrap();

        let patch: SplitPatch = serde_json::from_str(r#"{"paid_date": null}"#).unwrap();
        assert_eq!(patch.paid_date, Some(None));

        let updated = update_split(&conn, splits[0].id, &patch).unwrap();
        assert_eq!(updated.paid_date, None);

        // Absent field stays a no-op
        let patch: SplitPatch = serde_json::from_str("{}").unwrap();
        assert_eq!(patch.paid_date, None);
    }

    #[test]
    fn test_paid_split_in_initial_set_keeps_supplied_date() {
        let mut conn = db::open_test();
        let (bill_id, t1, _) = setup(&conn, 150.0);
        let date = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();

        let splits = replace_splits(
            &mut conn,
            bill_id,
            &[SplitInput {
                tenant_id: t1,
                amount_owed: 150.0,
                is_paid: Some(false),
                paid_date: Some(date),
            }],
        )
        .unwrap();

        // Supplying a date wins over the flag
        assert!(splits[0].is_paid);
        assert_eq!(splits[0].paid_date, Some(date));
    }
}
