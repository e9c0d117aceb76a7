// Domain entities and their SQLite stores.
// One file per aggregate: tenants, rent payments, utilities (categories,
// bills, splits). Structs are plain records; validation happens in the
// store functions at the write boundary.

pub mod payment;
pub mod tenant;
pub mod utility;

pub use payment::{NewPayment, PaymentPatch, RentPayment};
pub use tenant::{NewTenant, Tenant, TenantPatch};
pub use utility::{
    BillPatch, NewBill, UtilityBill, UtilityBillSplit, UtilityCategory,
};

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

/// For `Option<Option<T>>` patch fields: an explicit JSON `null` must come
/// through as `Some(None)` ("clear this field"), distinct from the field
/// being absent (`None`, "leave it alone"). Plain `#[serde(default)]` alone
/// would collapse both into `None`.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Dates are stored as ISO-8601 TEXT columns.
pub(crate) fn date_to_sql(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.to_string())
}

pub(crate) fn date_from_sql(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}
