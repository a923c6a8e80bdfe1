use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::booking::{self, ConfirmOutcome};
use crate::models::*;
use crate::{audit, AppState};

use super::extract_client_ip;

/// Apply the idempotent confirmation transition and run its side effects
/// (audit entry, operator mail). Side effects fire only on the first
/// delivery; replays fall through as `AlreadyConfirmed`.
async fn apply_confirmation(
    state: &AppState,
    booking_id: i64,
    session_id: &str,
    payment_intent: Option<&str>,
    client_ip: Option<&str>,
) -> Result<ConfirmOutcome, booking::BookingError> {
    let outcome = booking::confirm_payment(
        &state.db,
        &state.config,
        booking_id,
        session_id,
        payment_intent,
    )
    .await?;

    match &outcome {
        ConfirmOutcome::Confirmed(booking) => {
            audit::record(
                &state.db,
                "booking.payment_confirmed",
                "booking",
                booking.id,
                Some(&serde_json::json!({"status": "awaiting_payment", "paymentStatus": "unpaid"})),
                Some(&serde_json::json!({"status": booking.status, "paymentStatus": "paid"})),
                "payment",
                client_ip,
            )
            .await;

            let service_name: Option<String> =
                sqlx::query_scalar("SELECT name FROM services WHERE service_id = ?")
                    .bind(&booking.service_type)
                    .fetch_optional(&state.db)
                    .await
                    .ok()
                    .flatten();

            state
                .mailer
                .booking_confirmed(booking, service_name.as_deref().unwrap_or("?"))
                .await;
        }
        ConfirmOutcome::CapacityExceeded(booking) => {
            tracing::warn!(
                "payment received for booking {} but {} is full — refund required",
                booking.id,
                booking.preferred_date
            );
            audit::record(
                &state.db,
                "booking.payment_capacity_exceeded",
                "booking",
                booking.id,
                Some(&serde_json::json!({"status": booking.status})),
                Some(&serde_json::json!({"status": "cancelled", "paymentStatus": "paid"})),
                "payment",
                client_ip,
            )
            .await;
            state
                .mailer
                .refund_alert(booking, "Capacité du jour atteinte")
                .await;
        }
        ConfirmOutcome::SlotConflict(booking) => {
            tracing::warn!(
                "payment received for booking {} but the slot was taken — refund required",
                booking.id
            );
            audit::record(
                &state.db,
                "booking.payment_slot_conflict",
                "booking",
                booking.id,
                Some(&serde_json::json!({"status": booking.status})),
                Some(&serde_json::json!({"status": "cancelled", "paymentStatus": "paid"})),
                "payment",
                client_ip,
            )
            .await;
            state
                .mailer
                .refund_alert(booking, "Créneau horaire déjà réservé")
                .await;
        }
        ConfirmOutcome::AlreadyConfirmed => {
            tracing::info!("payment event replay for booking {} ignored", booking_id);
        }
        ConfirmOutcome::NotFound => {
            tracing::warn!("payment event for unknown booking {}", booking_id);
        }
    }

    Ok(outcome)
}

/// POST /api/payment/webhook — push-style payment confirmation event.
///
/// Always answers 200: the upstream event source must never be driven into
/// endless retries, even when fulfilment degrades to the refund path.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(event): Json<WebhookEvent>,
) -> StatusCode {
    let client_ip = extract_client_ip(&headers, Some(addr)).to_string();
    if event.event_type != "checkout.session.completed" {
        tracing::info!("ignoring payment event: {}", event.event_type);
        return StatusCode::OK;
    }

    let booking_id: Option<i64> = event
        .data
        .object
        .metadata
        .as_ref()
        .and_then(|m| m.get("bookingId"))
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))
        .and_then(|s| s.parse().ok());

    let booking_id = match booking_id {
        Some(id) => id,
        None => {
            tracing::warn!("payment webhook missing bookingId in metadata");
            return StatusCode::OK;
        }
    };

    if let Err(e) = apply_confirmation(
        &state,
        booking_id,
        &event.data.object.id,
        event.data.object.payment_intent.as_deref(),
        Some(&client_ip),
    )
    .await
    {
        // Acknowledge anyway; the failure is recorded for manual follow-up
        tracing::error!("payment confirmation failed for booking {}: {}", booking_id, e);
    }

    StatusCode::OK
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub confirmed: bool,
    pub status: String,
}

/// POST /api/payment/verify — pull-style verification from the client after
/// checkout returns. Same idempotent transition as the webhook.
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<VerifyPaymentRequest>,
) -> Result<Json<ApiResponse<VerifyPaymentResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    let client_ip = extract_client_ip(&headers, Some(addr)).to_string();
    let outcome = apply_confirmation(
        &state,
        body.booking_id,
        &body.session_id,
        None,
        Some(&client_ip),
    )
    .await
    .map_err(super::booking_error_response)?;

    let response = match outcome {
        ConfirmOutcome::Confirmed(booking) => VerifyPaymentResponse {
            confirmed: true,
            status: booking.status,
        },
        ConfirmOutcome::AlreadyConfirmed => {
            let status: Option<String> =
                sqlx::query_scalar("SELECT status FROM bookings WHERE id = ?")
                    .bind(body.booking_id)
                    .fetch_optional(&state.db)
                    .await
                    .ok()
                    .flatten();
            VerifyPaymentResponse {
                confirmed: true,
                status: status.unwrap_or_else(|| "pending".into()),
            }
        }
        ConfirmOutcome::CapacityExceeded(_) | ConfirmOutcome::SlotConflict(_) => {
            VerifyPaymentResponse {
                confirmed: false,
                status: "cancelled".into(),
            }
        }
        ConfirmOutcome::NotFound => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error("Réservation introuvable")),
            ))
        }
    };

    Ok(Json(ApiResponse::success(response)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::mail::MailClient;
    use crate::{booking, db};
    use std::time::Instant;

    async fn test_state() -> Arc<AppState> {
        let pool = db::test_pool().await;
        sqlx::query(
            "INSERT INTO services (service_id, name, price) VALUES ('cleaning', 'Nettoyage', 1500)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO service_cities (name) VALUES ('Lyon')")
            .execute(&pool)
            .await
            .unwrap();
        Arc::new(AppState {
            config: ConfigStore::new(pool.clone()),
            db: pool,
            mailer: MailClient::from_env(),
            admin_token: String::new(),
            started_at: Instant::now(),
        })
    }

    #[tokio::test]
    async fn test_confirmation_audit_carries_client_ip() {
        let state = test_state().await;
        let req = CreateBookingRequest {
            name: "Jean Dupont".into(),
            email: "jean@example.com".into(),
            phone: "0612345678".into(),
            city: "Lyon".into(),
            address: None,
            postal_code: None,
            service_type: "cleaning".into(),
            variant_id: None,
            bin_count: None,
            preferred_date: "2025-07-16".into(),
            preferred_time: None,
            message: None,
            rgpd_consent: true,
            marketing_consent: false,
        };
        let id = booking::create(&state.db, &state.config, &req, None)
            .await
            .unwrap();

        let outcome = apply_confirmation(&state, id, "cs_audit", None, Some("203.0.113.9"))
            .await
            .unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Confirmed(_)));

        let (action, ip): (String, Option<String>) =
            sqlx::query_as("SELECT action, ip FROM audit_log ORDER BY id DESC LIMIT 1")
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert_eq!(action, "booking.payment_confirmed");
        assert_eq!(ip.as_deref(), Some("203.0.113.9"));
    }
}
