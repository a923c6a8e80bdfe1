pub mod admin;
pub mod health;
pub mod payment;
pub mod public;

use axum::{
    http::{HeaderMap, StatusCode},
    Json,
};
use std::net::{IpAddr, SocketAddr};

use crate::booking::BookingError;
use crate::models::ApiResponse;

/// Map domain errors to the response envelope. Validation and business
/// rejections carry their human-readable reason; persistence failures are
/// logged with context and answered generically.
pub fn booking_error_response(err: BookingError) -> (StatusCode, Json<ApiResponse<()>>) {
    match err {
        BookingError::SlotConflict | BookingError::DateFull => (
            StatusCode::CONFLICT,
            Json(ApiResponse::error(err.to_string())),
        ),
        BookingError::Db(e) => {
            tracing::error!("booking persistence error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Erreur interne, veuillez réessayer")),
            )
        }
        other => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(other.to_string())),
        ),
    }
}

pub fn db_error_response(e: sqlx::Error) -> (StatusCode, Json<ApiResponse<()>>) {
    tracing::error!("persistence error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error("Erreur interne, veuillez réessayer")),
    )
}

/// Extract client IP from X-Forwarded-For (reverse proxy) or the socket.
pub fn extract_client_ip(headers: &HeaderMap, addr: Option<SocketAddr>) -> IpAddr {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first_ip) = forwarded.split(',').next() {
            if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    addr.map(|a| a.ip())
        .unwrap_or_else(|| "127.0.0.1".parse().unwrap())
}
