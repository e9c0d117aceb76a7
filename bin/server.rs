// Rent Ledger - Web Server
// REST API with Axum over the shared SQLite store

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use rent_ledger::entities::{payment, tenant, utility};
use rent_ledger::{
    ai, build_invoice, db, import_bills, replace_splits, reports, settings, update_split,
    AppError, BillPatch, NewBill, NewPayment, NewTenant, PaymentPatch, SplitInput, SplitPatch,
    TenantPatch, UtilityBillSplit,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<rusqlite::Connection>>,
}

/// Newtype so `AppError` can cross the orphan rule into `IntoResponse`.
struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::Import { errors } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "Errors occurred during import. No bills were added.",
                    "details": errors,
                }),
            ),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, json!({ "error": msg })),
            AppError::Storage(e) => {
                error!("storage error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal database error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Tenant handlers
// ============================================================================

async fn create_tenant(
    State(state): State<AppState>,
    Json(new): Json<NewTenant>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    let created = tenant::create_tenant(&conn, &new)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_tenants(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(tenant::list_active_tenants(&conn)?))
}

async fn get_tenant(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(tenant::get_tenant(&conn, id)?))
}

async fn update_tenant(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<TenantPatch>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(tenant::update_tenant(&conn, id, &patch)?))
}

async fn deactivate_tenant(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    tenant::deactivate_tenant(&conn, id)?;
    Ok(Json(json!({ "message": format!("Tenant {id} marked as inactive") })))
}

// ============================================================================
// Payment handlers
// ============================================================================

async fn create_payment(
    State(state): State<AppState>,
    Path(tenant_id): Path<i64>,
    Json(new): Json<NewPayment>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    let created = payment::create_payment(&conn, tenant_id, &new)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_payments(
    State(state): State<AppState>,
    Path(tenant_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(payment::list_payments_for_tenant(&conn, tenant_id)?))
}

async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(payment::get_payment(&conn, id)?))
}

async fn update_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<PaymentPatch>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(payment::update_payment(&conn, id, &patch)?))
}

async fn delete_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    payment::delete_payment(&conn, id)?;
    Ok(Json(json!({ "message": format!("Payment {id} deleted successfully") })))
}

// ============================================================================
// Utility category handlers
// ============================================================================

#[derive(Deserialize)]
struct CategoryBody {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct CategoryPatch {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "rent_ledger::entities::double_option")]
    description: Option<Option<String>>,
}

async fn create_category(
    State(state): State<AppState>,
    Json(body): Json<CategoryBody>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    let created = utility::create_category(&conn, &body.name, body.description.as_deref())?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_categories(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(utility::list_categories(&conn)?))
}

async fn update_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<CategoryPatch>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    let updated = utility::update_category(
        &conn,
        id,
        patch.name.as_deref(),
        patch.description.as_ref().map(|d| d.as_deref()),
    )?;
    Ok(Json(updated))
}

async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let mut conn = state.db.lock().unwrap();
    let category = utility::delete_category(&mut conn, id)?;
    Ok(Json(json!({
        "message": format!(
            "Utility category '{}' and associated bills deleted successfully",
            category.name
        )
    })))
}

// ============================================================================
// Utility bill handlers
// ============================================================================

async fn create_bill(
    State(state): State<AppState>,
    Json(new): Json<NewBill>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    let created = utility::create_bill(&conn, &new)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_bills(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(utility::list_bills(&conn)?))
}

async fn get_bill(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    let bill = utility::get_bill(&conn, id)?;
    let splits = utility::list_splits_for_bill(&conn, id)?;
    let mut body = serde_json::to_value(&bill).map_err(|e| {
        ApiError(AppError::Validation(format!("serialization error: {e}")))
    })?;
    body["splits"] = serde_json::to_value(&splits).unwrap_or_default();
    Ok(Json(body))
}

async fn update_bill(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<BillPatch>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(utility::update_bill(&conn, id, &patch)?))
}

async fn delete_bill(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let mut conn = state.db.lock().unwrap();
    utility::delete_bill(&mut conn, id)?;
    Ok(Json(json!({ "message": format!("Utility bill {id} deleted successfully") })))
}

// ============================================================================
// Split handlers
// ============================================================================

#[derive(Deserialize)]
struct SplitRequest {
    splits: Vec<SplitInput>,
}

async fn split_bill(
    State(state): State<AppState>,
    Path(bill_id): Path<i64>,
    Json(request): Json<SplitRequest>,
) -> ApiResult<(StatusCode, Json<Vec<UtilityBillSplit>>)> {
    let mut conn = state.db.lock().unwrap();
    let created = replace_splits(&mut conn, bill_id, &request.splits)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn patch_split(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<SplitPatch>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(update_split(&conn, id, &patch)?))
}

// ============================================================================
// CSV import / export
// ============================================================================

async fn import_bills_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut data: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError(AppError::Validation(format!("Invalid multipart body: {e}")))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_lowercase();
        if !filename.ends_with(".csv") {
            return Err(ApiError(AppError::Validation(
                "Invalid file type. Please upload a CSV file.".to_string(),
            )));
        }
        let bytes = field.bytes().await.map_err(|e| {
            ApiError(AppError::Validation(format!("Failed to read upload: {e}")))
        })?;
        data = Some(bytes.to_vec());
    }

    let data = data.ok_or_else(|| {
        ApiError(AppError::Validation("No file part in the request".to_string()))
    })?;

    let mut conn = state.db.lock().unwrap();
    let summary = import_bills(&mut conn, &data)?;
    info!(imported = summary.imported, "CSV import committed");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": format!("Successfully imported {} utility bills", summary.imported),
            "imported_ids": summary.imported_ids,
        })),
    ))
}

fn csv_attachment(export: reports::CsvExport) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment;filename={}", export.filename),
            ),
        ],
        export.content,
    )
        .into_response()
}

async fn export_payments_csv(
    State(state): State<AppState>,
    Path(tenant_id): Path<i64>,
) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let export = reports::export_tenant_payments(&conn, tenant_id)?;
    Ok(csv_attachment(export))
}

async fn export_bills_csv(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let export = reports::export_bills(&conn)?;
    Ok(csv_attachment(export))
}

// ============================================================================
// Report handlers
// ============================================================================

async fn invoice_html(
    State(state): State<AppState>,
    Path((tenant_id, year, month)): Path<(i64, i32, u32)>,
) -> ApiResult<Html<String>> {
    let conn = state.db.lock().unwrap();
    let invoice = build_invoice(&conn, tenant_id, year, month)?;
    Ok(Html(reports::render_invoice_html(&invoice)))
}

async fn receipt_html(
    State(state): State<AppState>,
    Path(payment_id): Path<i64>,
) -> ApiResult<Html<String>> {
    let conn = state.db.lock().unwrap();
    let payment = payment::get_payment(&conn, payment_id)?;
    let tenant = tenant::get_tenant(&conn, payment.tenant_id)?;
    Ok(Html(reports::render_receipt_html(&payment, &tenant.name)))
}

// ============================================================================
// Settings handlers
// ============================================================================

async fn get_settings(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    let all = settings::list_settings(&conn)?;
    let map: HashMap<String, settings::Setting> =
        all.into_iter().map(|s| (s.key.clone(), s)).collect();
    Ok(Json(map))
}

async fn put_settings(
    State(state): State<AppState>,
    Json(body): Json<HashMap<String, serde_json::Value>>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    let values: Vec<(String, String)> = body
        .into_iter()
        .map(|(key, value)| (key, json_value_to_string(value)))
        .collect();
    let updated = settings::set_many(&conn, &values)?;
    if updated.is_empty() {
        return Err(ApiError(AppError::Validation(
            "No valid settings found to update".to_string(),
        )));
    }
    Ok(Json(json!({ "message": format!("Settings updated: {}", updated.join(", ")) })))
}

async fn get_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    Ok(Json(settings::get_setting(&conn, &key)?))
}

#[derive(Deserialize)]
struct SettingBody {
    value: serde_json::Value,
}

async fn put_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<SettingBody>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.db.lock().unwrap();
    let value = json_value_to_string(body.value);
    Ok(Json(settings::set_setting(&conn, &key, &value)?))
}

fn json_value_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

// ============================================================================
// AI handler
// ============================================================================

async fn analyze_utilities(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    // Read config and build the summary while holding the lock, then release
    // it before the network call.
    let (config, summary) = {
        let conn = state.db.lock().unwrap();
        let config = ai::AiConfig::from_settings(&conn)?;
        let summary = ai::usage_summary(&conn, 12)?;
        (config, summary)
    };

    let Some(summary) = summary else {
        return Ok(Json(json!({ "analysis": "No recent utility bill data found." })));
    };

    let analysis = ai::analyze(&config, &summary).await?;
    Ok(Json(json!({ "analysis": analysis })))
}

// ============================================================================
// Main Server
// ============================================================================

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": rent_ledger::VERSION }))
}

fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/tenants", post(create_tenant).get(list_tenants))
        .route(
            "/tenants/:id",
            get(get_tenant).put(update_tenant).delete(deactivate_tenant),
        )
        .route(
            "/payments/tenant/:tenant_id",
            post(create_payment).get(list_payments),
        )
        .route(
            "/payments/:id",
            get(get_payment).put(update_payment).delete(delete_payment),
        )
        .route(
            "/utilities/categories",
            post(create_category).get(list_categories),
        )
        .route(
            "/utilities/categories/:id",
            put(update_category).delete(delete_category),
        )
        .route("/utilities/bills", post(create_bill).get(list_bills))
        .route(
            "/utilities/bills/:id",
            get(get_bill).put(update_bill).delete(delete_bill),
        )
        .route("/utilities/bills/:id/split", post(split_bill))
        .route("/utilities/bills/import_csv", post(import_bills_csv))
        .route("/utilities/splits/:id", put(patch_split))
        .route(
            "/reports/invoice/tenant/:tenant_id/:year/:month",
            get(invoice_html),
        )
        .route("/reports/receipt/payment/:payment_id", get(receipt_html))
        .route(
            "/reports/export/payments/tenant/:tenant_id",
            get(export_payments_csv),
        )
        .route("/reports/export/bills", get(export_bills_csv))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/settings/:key", get(get_setting).put(put_setting))
        .route("/ai/analyze_utilities", get(analyze_utilities))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rent_server=info,rent_ledger=info".into()),
        )
        .init();

    let db_path = std::env::var("RENT_LEDGER_DB").unwrap_or_else(|_| "rent-ledger.db".to_string());
    let conn = db::open(std::path::Path::new(&db_path))?;
    info!(db = %db_path, "database opened");

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    let app = Router::new()
        .nest("/api", api_router(state))
        .layer(CorsLayer::permissive());

    let addr = std::env::var("RENT_LEDGER_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "rent-ledger server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
