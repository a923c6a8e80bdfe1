use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::{audit, booking, config, models::*, AppState};

use super::{booking_error_response, db_error_response, extract_client_ip};

type AdminError = (StatusCode, Json<ApiResponse<()>>);

fn not_found(what: &str) -> AdminError {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error(format!("{} introuvable", what))),
    )
}

// ── Bookings ──

/// GET /api/admin/bookings[?date=|from=&to=]
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<ApiResponse<Vec<Booking>>>, AdminError> {
    let bookings = if let Some(date) = &query.date {
        sqlx::query_as(
            "SELECT * FROM bookings WHERE preferred_date = ?
             ORDER BY preferred_time ASC, created_at ASC",
        )
        .bind(date)
        .fetch_all(&state.db)
        .await
    } else if let (Some(from), Some(to)) = (&query.from, &query.to) {
        sqlx::query_as(
            "SELECT * FROM bookings WHERE preferred_date BETWEEN ? AND ?
             ORDER BY preferred_date ASC, preferred_time ASC",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&state.db)
        .await
    } else {
        sqlx::query_as("SELECT * FROM bookings ORDER BY created_at DESC LIMIT 200")
            .fetch_all(&state.db)
            .await
    }
    .map_err(db_error_response)?;

    Ok(Json(ApiResponse::success(bookings)))
}

/// PUT /api/admin/bookings/:id/status — allow-listed transition + audit.
pub async fn update_booking_status(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<StatusUpdateRequest>,
) -> Result<Json<ApiResponse<&'static str>>, AdminError> {
    let ip = extract_client_ip(&headers, Some(addr)).to_string();

    let transition = booking::update_status(&state.db, id, &body.status)
        .await
        .map_err(booking_error_response)?
        .ok_or_else(|| not_found("Réservation"))?;

    let (old, new) = transition;
    audit::record(
        &state.db,
        "booking.status",
        "booking",
        id,
        Some(&serde_json::json!({"status": old})),
        Some(&serde_json::json!({"status": new})),
        "admin",
        Some(&ip),
    )
    .await;

    Ok(Json(ApiResponse::success("Statut mis à jour")))
}

// ── Quotes ──

/// GET /api/admin/quotes
pub async fn list_quotes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Quote>>>, AdminError> {
    let quotes: Vec<Quote> =
        sqlx::query_as("SELECT * FROM quotes ORDER BY created_at DESC LIMIT 200")
            .fetch_all(&state.db)
            .await
            .map_err(db_error_response)?;
    Ok(Json(ApiResponse::success(quotes)))
}

/// PUT /api/admin/quotes/:id/status
pub async fn update_quote_status(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<StatusUpdateRequest>,
) -> Result<Json<ApiResponse<&'static str>>, AdminError> {
    if !QUOTE_STATUSES.contains(&body.status.as_str()) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("Statut invalide : {}", body.status))),
        ));
    }

    let old: Option<String> = sqlx::query_scalar("SELECT status FROM quotes WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error_response)?;
    let old = old.ok_or_else(|| not_found("Devis"))?;

    sqlx::query("UPDATE quotes SET status = ? WHERE id = ?")
        .bind(&body.status)
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error_response)?;

    let ip = extract_client_ip(&headers, Some(addr)).to_string();
    audit::record(
        &state.db,
        "quote.status",
        "quote",
        id,
        Some(&serde_json::json!({"status": old})),
        Some(&serde_json::json!({"status": body.status})),
        "admin",
        Some(&ip),
    )
    .await;

    Ok(Json(ApiResponse::success("Statut mis à jour")))
}

// ── Config ──

/// GET /api/admin/config — the full key→value map.
pub async fn get_config(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<HashMap<String, String>>>, AdminError> {
    let pairs = state.config.all().await.map_err(db_error_response)?;
    Ok(Json(ApiResponse::success(pairs.into_iter().collect())))
}

/// PUT /api/admin/config — last-write-wins over the known key set.
pub async fn put_config(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<HashMap<String, String>>,
) -> Result<Json<ApiResponse<&'static str>>, AdminError> {
    for key in body.keys() {
        if !config::KNOWN_KEYS.contains(&key.as_str()) {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(format!("Clé de configuration inconnue : {}", key))),
            ));
        }
    }

    let ip = extract_client_ip(&headers, Some(addr)).to_string();
    for (key, value) in &body {
        let old = state.config.get(key).await.map_err(db_error_response)?;
        state.config.set(key, value).await.map_err(db_error_response)?;
        audit::record(
            &state.db,
            "config.set",
            "config",
            0,
            Some(&serde_json::json!({"key": key, "value": old})),
            Some(&serde_json::json!({"key": key, "value": value})),
            "admin",
            Some(&ip),
        )
        .await;
    }

    Ok(Json(ApiResponse::success("Configuration enregistrée")))
}

// ── Cities ──

/// GET /api/admin/cities — all cities, including disabled ones.
pub async fn list_cities(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<ServiceCity>>>, AdminError> {
    let cities: Vec<ServiceCity> =
        sqlx::query_as("SELECT * FROM service_cities ORDER BY name ASC")
            .fetch_all(&state.db)
            .await
            .map_err(db_error_response)?;
    Ok(Json(ApiResponse::success(cities)))
}

/// POST /api/admin/cities
pub async fn create_city(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CityUpsertRequest>,
) -> Result<Json<ApiResponse<ServiceCity>>, AdminError> {
    if body.name.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Le nom de la ville est obligatoire")),
        ));
    }

    let id = sqlx::query(
        "INSERT INTO service_cities (name, postal_code, enabled, passage1_week, passage1_weekday,
         passage2_week, passage2_weekday, cutoff_date)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(body.name.trim())
    .bind(&body.postal_code)
    .bind(body.enabled.unwrap_or(true))
    .bind(body.passage1_week)
    .bind(body.passage1_weekday)
    .bind(body.passage2_week)
    .bind(body.passage2_weekday)
    .bind(&body.cutoff_date)
    .execute(&state.db)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => (
            StatusCode::CONFLICT,
            Json(ApiResponse::error("Cette ville existe déjà")),
        ),
        other => db_error_response(other),
    })?
    .last_insert_rowid();

    let city: ServiceCity = sqlx::query_as("SELECT * FROM service_cities WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await
        .map_err(db_error_response)?;

    let ip = extract_client_ip(&headers, Some(addr)).to_string();
    audit::record(
        &state.db,
        "city.create",
        "city",
        id,
        None,
        Some(&serde_json::to_value(&city).unwrap_or_default()),
        "admin",
        Some(&ip),
    )
    .await;

    Ok(Json(ApiResponse::success(city)))
}

/// PUT /api/admin/cities/:id
pub async fn update_city(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<CityUpsertRequest>,
) -> Result<Json<ApiResponse<ServiceCity>>, AdminError> {
    let before: Option<ServiceCity> =
        sqlx::query_as("SELECT * FROM service_cities WHERE id = ?")
            .bind(id)
            .fetch_optional(&state.db)
            .await
            .map_err(db_error_response)?;
    let before = before.ok_or_else(|| not_found("Ville"))?;

    sqlx::query(
        "UPDATE service_cities SET name = ?, postal_code = ?, enabled = ?,
         passage1_week = ?, passage1_weekday = ?, passage2_week = ?, passage2_weekday = ?,
         cutoff_date = ? WHERE id = ?",
    )
    .bind(body.name.trim())
    .bind(&body.postal_code)
    .bind(body.enabled.unwrap_or(before.enabled))
    .bind(body.passage1_week)
    .bind(body.passage1_weekday)
    .bind(body.passage2_week)
    .bind(body.passage2_weekday)
    .bind(&body.cutoff_date)
    .bind(id)
    .execute(&state.db)
    .await
    .map_err(db_error_response)?;

    let after: ServiceCity = sqlx::query_as("SELECT * FROM service_cities WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await
        .map_err(db_error_response)?;

    let ip = extract_client_ip(&headers, Some(addr)).to_string();
    audit::record(
        &state.db,
        "city.update",
        "city",
        id,
        Some(&serde_json::to_value(&before).unwrap_or_default()),
        Some(&serde_json::to_value(&after).unwrap_or_default()),
        "admin",
        Some(&ip),
    )
    .await;

    Ok(Json(ApiResponse::success(after)))
}

/// DELETE /api/admin/cities/:id
pub async fn delete_city(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<&'static str>>, AdminError> {
    let before: Option<ServiceCity> =
        sqlx::query_as("SELECT * FROM service_cities WHERE id = ?")
            .bind(id)
            .fetch_optional(&state.db)
            .await
            .map_err(db_error_response)?;
    let before = before.ok_or_else(|| not_found("Ville"))?;

    sqlx::query("DELETE FROM service_cities WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error_response)?;

    let ip = extract_client_ip(&headers, Some(addr)).to_string();
    audit::record(
        &state.db,
        "city.delete",
        "city",
        id,
        Some(&serde_json::to_value(&before).unwrap_or_default()),
        None,
        "admin",
        Some(&ip),
    )
    .await;

    Ok(Json(ApiResponse::success("Ville supprimée")))
}

// ── Services & variants ──

/// POST /api/admin/services
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ServiceUpsertRequest>,
) -> Result<Json<ApiResponse<Service>>, AdminError> {
    if body.service_id.trim().is_empty() || body.name.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("serviceId et name sont obligatoires")),
        ));
    }

    let id = sqlx::query(
        "INSERT INTO services (service_id, name, price, enabled, sort_order,
         passage1_week, passage1_weekday, passage2_week, passage2_weekday,
         max_bookings_per_day, is_subscription)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(body.service_id.trim())
    .bind(body.name.trim())
    .bind(body.price)
    .bind(body.enabled.unwrap_or(true))
    .bind(body.sort_order.unwrap_or(0))
    .bind(body.passage1_week)
    .bind(body.passage1_weekday)
    .bind(body.passage2_week)
    .bind(body.passage2_weekday)
    .bind(body.max_bookings_per_day)
    .bind(body.is_subscription.unwrap_or(false))
    .execute(&state.db)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => (
            StatusCode::CONFLICT,
            Json(ApiResponse::error("Ce serviceId existe déjà")),
        ),
        other => db_error_response(other),
    })?
    .last_insert_rowid();

    let service: Service = sqlx::query_as("SELECT * FROM services WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await
        .map_err(db_error_response)?;

    let ip = extract_client_ip(&headers, Some(addr)).to_string();
    audit::record(
        &state.db,
        "service.create",
        "service",
        id,
        None,
        Some(&serde_json::to_value(&service).unwrap_or_default()),
        "admin",
        Some(&ip),
    )
    .await;

    Ok(Json(ApiResponse::success(service)))
}

/// PUT /api/admin/services/:id
pub async fn update_service(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<ServiceUpsertRequest>,
) -> Result<Json<ApiResponse<Service>>, AdminError> {
    let before: Option<Service> = sqlx::query_as("SELECT * FROM services WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error_response)?;
    let before = before.ok_or_else(|| not_found("Service"))?;

    sqlx::query(
        "UPDATE services SET service_id = ?, name = ?, price = ?, enabled = ?, sort_order = ?,
         passage1_week = ?, passage1_weekday = ?, passage2_week = ?, passage2_weekday = ?,
         max_bookings_per_day = ?, is_subscription = ? WHERE id = ?",
    )
    .bind(body.service_id.trim())
    .bind(body.name.trim())
    .bind(body.price)
    .bind(body.enabled.unwrap_or(before.enabled))
    .bind(body.sort_order.unwrap_or(before.sort_order))
    .bind(body.passage1_week)
    .bind(body.passage1_weekday)
    .bind(body.passage2_week)
    .bind(body.passage2_weekday)
    .bind(body.max_bookings_per_day)
    .bind(body.is_subscription.unwrap_or(before.is_subscription))
    .bind(id)
    .execute(&state.db)
    .await
    .map_err(db_error_response)?;

    let after: Service = sqlx::query_as("SELECT * FROM services WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await
        .map_err(db_error_response)?;

    let ip = extract_client_ip(&headers, Some(addr)).to_string();
    audit::record(
        &state.db,
        "service.update",
        "service",
        id,
        Some(&serde_json::to_value(&before).unwrap_or_default()),
        Some(&serde_json::to_value(&after).unwrap_or_default()),
        "admin",
        Some(&ip),
    )
    .await;

    Ok(Json(ApiResponse::success(after)))
}

/// POST /api/admin/services/:id/variants
pub async fn create_variant(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(service_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<VariantUpsertRequest>,
) -> Result<Json<ApiResponse<ServiceVariant>>, AdminError> {
    let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM services WHERE id = ?")
        .bind(service_id)
        .fetch_one(&state.db)
        .await
        .map_err(db_error_response)?;
    if !exists {
        return Err(not_found("Service"));
    }

    let id = sqlx::query(
        "INSERT INTO service_variants (service_id, name, price_delta, image_url, enabled, sort_order)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(service_id)
    .bind(body.name.trim())
    .bind(body.price_delta)
    .bind(&body.image_url)
    .bind(body.enabled.unwrap_or(true))
    .bind(body.sort_order.unwrap_or(0))
    .execute(&state.db)
    .await
    .map_err(db_error_response)?
    .last_insert_rowid();

    let variant: ServiceVariant = sqlx::query_as("SELECT * FROM service_variants WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await
        .map_err(db_error_response)?;

    let ip = extract_client_ip(&headers, Some(addr)).to_string();
    audit::record(
        &state.db,
        "variant.create",
        "variant",
        id,
        None,
        Some(&serde_json::to_value(&variant).unwrap_or_default()),
        "admin",
        Some(&ip),
    )
    .await;

    Ok(Json(ApiResponse::success(variant)))
}

/// PUT /api/admin/variants/:id
pub async fn update_variant(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<VariantUpsertRequest>,
) -> Result<Json<ApiResponse<ServiceVariant>>, AdminError> {
    let before: Option<ServiceVariant> =
        sqlx::query_as("SELECT * FROM service_variants WHERE id = ?")
            .bind(id)
            .fetch_optional(&state.db)
            .await
            .map_err(db_error_response)?;
    let before = before.ok_or_else(|| not_found("Variante"))?;

    sqlx::query(
        "UPDATE service_variants SET name = ?, price_delta = ?, image_url = ?,
         enabled = ?, sort_order = ? WHERE id = ?",
    )
    .bind(body.name.trim())
    .bind(body.price_delta)
    .bind(&body.image_url)
    .bind(body.enabled.unwrap_or(before.enabled))
    .bind(body.sort_order.unwrap_or(before.sort_order))
    .bind(id)
    .execute(&state.db)
    .await
    .map_err(db_error_response)?;

    let after: ServiceVariant = sqlx::query_as("SELECT * FROM service_variants WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await
        .map_err(db_error_response)?;

    let ip = extract_client_ip(&headers, Some(addr)).to_string();
    audit::record(
        &state.db,
        "variant.update",
        "variant",
        id,
        Some(&serde_json::to_value(&before).unwrap_or_default()),
        Some(&serde_json::to_value(&after).unwrap_or_default()),
        "admin",
        Some(&ip),
    )
    .await;

    Ok(Json(ApiResponse::success(after)))
}

/// DELETE /api/admin/variants/:id
pub async fn delete_variant(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<&'static str>>, AdminError> {
    let before: Option<ServiceVariant> =
        sqlx::query_as("SELECT * FROM service_variants WHERE id = ?")
            .bind(id)
            .fetch_optional(&state.db)
            .await
            .map_err(db_error_response)?;
    let before = before.ok_or_else(|| not_found("Variante"))?;

    sqlx::query("DELETE FROM service_variants WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error_response)?;

    let ip = extract_client_ip(&headers, Some(addr)).to_string();
    audit::record(
        &state.db,
        "variant.delete",
        "variant",
        id,
        Some(&serde_json::to_value(&before).unwrap_or_default()),
        None,
        "admin",
        Some(&ip),
    )
    .await;

    Ok(Json(ApiResponse::success("Variante supprimée")))
}

// ── Payment reconciliation ──

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRow {
    #[serde(flatten)]
    pub booking: Booking,
    /// Paid but cancelled: the money arrived without a fulfillable booking.
    pub refund_needed: bool,
}

/// GET /api/admin/payments — reconciliation view over paid bookings.
pub async fn list_payments(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<PaymentRow>>>, AdminError> {
    let bookings: Vec<Booking> = sqlx::query_as(
        "SELECT * FROM bookings WHERE payment_status = 'paid' ORDER BY created_at DESC LIMIT 500",
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error_response)?;

    let rows = bookings
        .into_iter()
        .map(|booking| PaymentRow {
            refund_needed: booking.status == "cancelled",
            booking,
        })
        .collect();

    Ok(Json(ApiResponse::success(rows)))
}

// ── Audit trail ──

/// GET /api/admin/audit — most recent entries first.
pub async fn list_audit(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<AuditEntry>>>, AdminError> {
    let entries: Vec<AuditEntry> =
        sqlx::query_as("SELECT * FROM audit_log ORDER BY id DESC LIMIT 200")
            .fetch_all(&state.db)
            .await
            .map_err(db_error_response)?;
    Ok(Json(ApiResponse::success(entries)))
}

// ── RGPD ──

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErasureResponse {
    pub bookings_erased: u64,
    pub quotes_erased: u64,
}

/// POST /api/admin/rgpd/erase — anonymise all personal data for an email.
/// Rows stay in place so capacity history and accounting remain intact.
pub async fn rgpd_erase(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ErasureRequest>,
) -> Result<Json<ApiResponse<ErasureResponse>>, AdminError> {
    if body.email.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("email est obligatoire")),
        ));
    }

    let bookings = sqlx::query(
        "UPDATE bookings SET name = '[effacé]', email = '[effacé]', phone = '',
         address = NULL, postal_code = NULL, message = NULL, consent_ip = NULL
         WHERE email = ?",
    )
    .bind(body.email.trim())
    .execute(&state.db)
    .await
    .map_err(db_error_response)?
    .rows_affected();

    let quotes = sqlx::query(
        "UPDATE quotes SET name = '[effacé]', email = '[effacé]', phone = '',
         postal_code = NULL, message = NULL
         WHERE email = ?",
    )
    .bind(body.email.trim())
    .execute(&state.db)
    .await
    .map_err(db_error_response)?
    .rows_affected();

    let ip = extract_client_ip(&headers, Some(addr)).to_string();
    audit::record(
        &state.db,
        "rgpd.erase",
        "email",
        0,
        None,
        Some(&serde_json::json!({"bookingsErased": bookings, "quotesErased": quotes})),
        "admin",
        Some(&ip),
    )
    .await;

    tracing::info!("RGPD erasure: {} bookings, {} quotes", bookings, quotes);

    Ok(Json(ApiResponse::success(ErasureResponse {
        bookings_erased: bookings,
        quotes_erased: quotes,
    })))
}
