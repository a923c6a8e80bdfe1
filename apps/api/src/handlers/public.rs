use axum::{
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::{availability, booking, models::*, AppState};

use super::{booking_error_response, db_error_response, extract_client_ip};

/// GET /api/services — enabled services with their enabled variants.
pub async fn list_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<ServiceWithVariants>>>, (StatusCode, Json<ApiResponse<()>>)> {
    let services: Vec<Service> =
        sqlx::query_as("SELECT * FROM services WHERE enabled = 1 ORDER BY sort_order ASC")
            .fetch_all(&state.db)
            .await
            .map_err(db_error_response)?;

    let mut result = Vec::with_capacity(services.len());
    for service in services {
        let variants: Vec<ServiceVariant> = sqlx::query_as(
            "SELECT * FROM service_variants WHERE service_id = ? AND enabled = 1 ORDER BY sort_order ASC",
        )
        .bind(service.id)
        .fetch_all(&state.db)
        .await
        .map_err(db_error_response)?;
        result.push(ServiceWithVariants { service, variants });
    }

    Ok(Json(ApiResponse::success(result)))
}

/// GET /api/cities — enabled cities.
pub async fn list_cities(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<ServiceCity>>>, (StatusCode, Json<ApiResponse<()>>)> {
    let cities: Vec<ServiceCity> =
        sqlx::query_as("SELECT * FROM service_cities WHERE enabled = 1 ORDER BY name ASC")
            .fetch_all(&state.db)
            .await
            .map_err(db_error_response)?;

    Ok(Json(ApiResponse::success(cities)))
}

/// GET /api/config — the public subset of runtime configuration.
pub async fn public_config(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<serde_json::Value>>, (StatusCode, Json<ApiResponse<()>>)> {
    let contact_phone = state
        .config
        .get("contact_phone")
        .await
        .map_err(db_error_response)?
        .unwrap_or_default();
    let time_selection = state
        .config
        .get_bool("time_selection_enabled")
        .await
        .map_err(db_error_response)?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "contactPhone": contact_phone,
        "timeSelectionEnabled": time_selection,
    }))))
}

/// GET /api/bookings/available-dates?startDate&endDate&city&serviceType
///
/// A date can appear in both lists; fullDates excludes, allowedDates
/// restricts, and exclusion wins.
pub async fn available_dates(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailableDatesQuery>,
) -> Result<Json<FlatResponse<AvailableDatesResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    let start = chrono::NaiveDate::parse_from_str(&query.start_date, "%Y-%m-%d");
    let end = chrono::NaiveDate::parse_from_str(&query.end_date, "%Y-%m-%d");
    let (start, end) = match (start, end) {
        (Ok(s), Ok(e)) if s <= e => (s, e),
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error("Plage de dates invalide")),
            ))
        }
    };

    let service: Option<Service> =
        sqlx::query_as("SELECT * FROM services WHERE service_id = ? AND enabled = 1")
            .bind(&query.service_type)
            .fetch_optional(&state.db)
            .await
            .map_err(db_error_response)?;
    let service = service.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!(
                "Service inconnu ou indisponible : {}",
                query.service_type
            ))),
        )
    })?;

    let city: Option<ServiceCity> =
        sqlx::query_as("SELECT * FROM service_cities WHERE name = ? AND enabled = 1")
            .bind(&query.city)
            .fetch_optional(&state.db)
            .await
            .map_err(db_error_response)?;
    let city = city.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!(
                "Ville non desservie : {}",
                query.city
            ))),
        )
    })?;

    let response = availability::resolve(&state.db, &state.config, &service, &city, start, end)
        .await
        .map_err(db_error_response)?;

    Ok(Json(FlatResponse::success(response)))
}

/// POST /api/booking — create a booking request (awaiting payment).
/// No notification is sent here; it is deferred to payment confirmation.
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CreateBookingRequest>,
) -> Result<Json<FlatResponse<CreateBookingResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    let client_ip = extract_client_ip(&headers, Some(addr)).to_string();

    let booking_id = booking::create(&state.db, &state.config, &body, Some(&client_ip))
        .await
        .map_err(booking_error_response)?;

    tracing::info!(
        "booking {} created for {} on {} (awaiting payment)",
        booking_id,
        body.city,
        body.preferred_date
    );

    Ok(Json(FlatResponse::success(CreateBookingResponse {
        booking_id,
    })))
}

/// POST /api/quote — public contact form.
pub async fn create_quote(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateQuoteRequest>,
) -> Result<Json<FlatResponse<CreateQuoteResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    let mut missing = Vec::new();
    for (field, value) in [
        ("name", &body.name),
        ("email", &body.email),
        ("phone", &body.phone),
    ] {
        if value.trim().is_empty() {
            missing.push(field);
        }
    }
    if !missing.is_empty() || !body.email.contains('@') {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!(
                "Champs obligatoires manquants : {}",
                if missing.is_empty() {
                    "email".to_string()
                } else {
                    missing.join(", ")
                }
            ))),
        ));
    }

    let quote_id = sqlx::query(
        "INSERT INTO quotes (name, email, phone, city, postal_code, message)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(body.name.trim())
    .bind(body.email.trim())
    .bind(body.phone.trim())
    .bind(&body.city)
    .bind(&body.postal_code)
    .bind(&body.message)
    .execute(&state.db)
    .await
    .map_err(db_error_response)?
    .last_insert_rowid();

    // Best-effort notification; the quote row is the source of truth
    state
        .mailer
        .quote_received(
            body.name.trim(),
            body.email.trim(),
            body.phone.trim(),
            body.message.as_deref().unwrap_or(""),
        )
        .await;

    Ok(Json(FlatResponse::success(CreateQuoteResponse { quote_id })))
}
