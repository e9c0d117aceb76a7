use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::entities::{date_from_sql, date_to_sql};
use crate::error::{AppError, Result};

/// A tenant of the property. "Deleting" a tenant flips `is_active` to false;
/// the row and its history stay in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub move_in_date: Option<NaiveDate>,
    pub base_rent_amount: f64,
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTenant {
    pub name: String,
    pub base_rent_amount: f64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub move_in_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Partial update. Outer `Option` = field present in the request,
/// inner `Option` = nullable value; explicit `null` clears the field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "crate::entities::double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::entities::double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::entities::double_option")]
    pub move_in_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub base_rent_amount: Option<f64>,
    #[serde(default, deserialize_with = "crate::entities::double_option")]
    pub notes: Option<Option<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

fn tenant_from_row(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    let move_in: Option<String> = row.get(4)?;
    Ok(Tenant {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        move_in_date: date_from_sql(move_in),
        base_rent_amount: row.get(5)?,
        notes: row.get(6)?,
        is_active: row.get(7)?,
        created_at: row.get(8)?,
    })
}

const TENANT_COLS: &str =
    "id, name, email, phone, move_in_date, base_rent_amount, notes, is_active, created_at";

pub fn create_tenant(conn: &Connection, new: &NewTenant) -> Result<Tenant> {
    if new.name.trim().is_empty() {
        return Err(AppError::validation("Missing required field: name"));
    }
    if new.base_rent_amount < 0.0 {
        return Err(AppError::validation("base_rent_amount must not be negative"));
    }

    conn.execute(
        "INSERT INTO tenants (name, email, phone, move_in_date, base_rent_amount, notes, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new.name,
            new.email,
            new.phone,
            date_to_sql(new.move_in_date),
            new.base_rent_amount,
            new.notes,
            new.is_active.unwrap_or(true),
        ],
    )?;

    get_tenant(conn, conn.last_insert_rowid())
}

pub fn get_tenant(conn: &Connection, tenant_id: i64) -> Result<Tenant> {
    let mut stmt =
        conn.prepare(&format!("SELECT {TENANT_COLS} FROM tenants WHERE id = ?1"))?;
    stmt.query_row(params![tenant_id], tenant_from_row)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::not_found("Tenant", tenant_id),
            other => other.into(),
        })
}

/// Active tenants only, sorted by name. Inactive tenants must be asked for
/// explicitly via `get_tenant`.
pub fn list_active_tenants(conn: &Connection) -> Result<Vec<Tenant>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TENANT_COLS} FROM tenants WHERE is_active = 1 ORDER BY name"
    ))?;
    let tenants = stmt
        .query_map([], tenant_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tenants)
}

pub fn update_tenant(conn: &Connection, tenant_id: i64, patch: &TenantPatch) -> Result<Tenant> {
    let mut tenant = get_tenant(conn, tenant_id)?;

    if let Some(name) = &patch.name {
        if name.trim().is_empty() {
            return Err(AppError::validation("name must not be empty"));
        }
        tenant.name = name.clone();
    }
    if let Some(email) = &patch.email {
        tenant.email = email.clone();
    }
    if let Some(phone) = &patch.phone {
        tenant.phone = phone.clone();
    }
    if let Some(move_in) = patch.move_in_date {
        tenant.move_in_date = move_in;
    }
    if let Some(rent) = patch.base_rent_amount {
        if rent < 0.0 {
            return Err(AppError::validation("base_rent_amount must not be negative"));
        }
        tenant.base_rent_amount = rent;
    }
    if let Some(notes) = &patch.notes {
        tenant.notes = notes.clone();
    }
    if let Some(active) = patch.is_active {
        tenant.is_active = active;
    }

    conn.execute(
        "UPDATE tenants SET name = ?1, email = ?2, phone = ?3, move_in_date = ?4,
                base_rent_amount = ?5, notes = ?6, is_active = ?7
         WHERE id = ?8",
        params![
            tenant.name,
            tenant.email,
            tenant.phone,
            date_to_sql(tenant.move_in_date),
            tenant.base_rent_amount,
            tenant.notes,
            tenant.is_active,
            tenant_id,
        ],
    )?;

    Ok(tenant)
}

/// Soft delete: flips the lifecycle flag, keeps payments and splits intact.
pub fn deactivate_tenant(conn: &Connection, tenant_id: i64) -> Result<()> {
    // 404 before silently updating zero rows
    get_tenant(conn, tenant_id)?;
    conn.execute(
        "UPDATE tenants SET is_active = 0 WHERE id = ?1",
        params![tenant_id],
    )?;
    Ok(())
}
