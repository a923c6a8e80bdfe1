use std::time::Duration;

use crate::models::Booking;

/// Outbound mail timeout. The mailer is the only external call that can
/// stall a request, so it gets a hard cap.
const MAIL_TIMEOUT_SECS: u64 = 10;

/// HTTP client for the transactional mail microservice.
///
/// All sends are best-effort: the booking row is the source of truth and a
/// notification failure is logged, never surfaced to the caller.
#[derive(Debug, Clone)]
pub struct MailClient {
    http: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
    operator_email: String,
}

impl MailClient {
    pub fn from_env() -> Self {
        let base_url = std::env::var("MAIL_SERVICE_URL").ok().filter(|v| !v.is_empty());
        if base_url.is_none() {
            tracing::warn!("MAIL_SERVICE_URL not set — notifications disabled");
        }
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(MAIL_TIMEOUT_SECS))
                .build()
                .expect("reqwest client"),
            base_url,
            api_key: std::env::var("MAIL_API_KEY").ok().filter(|v| !v.is_empty()),
            operator_email: std::env::var("OPERATOR_EMAIL")
                .unwrap_or_else(|_| "contact@binfresh.fr".into()),
        }
    }

    async fn send(
        &self,
        to: &str,
        reply_to: Option<&str>,
        subject: &str,
        template: &str,
        vars: serde_json::Value,
    ) {
        let Some(base_url) = &self.base_url else {
            tracing::debug!("mail skipped (no MAIL_SERVICE_URL): {} to {}", template, to);
            return;
        };

        let body = serde_json::json!({
            "to": to,
            "replyTo": reply_to,
            "subject": subject,
            "template": template,
            "vars": vars,
        });

        let mut request = self.http.post(format!("{}/api/send", base_url)).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!("mail sent: {} to {}", template, to);
            }
            Ok(resp) => {
                tracing::error!("mailer returned {} for template {}", resp.status(), template);
            }
            Err(e) => {
                tracing::error!("mailer unreachable for template {}: {}", template, e);
            }
        }
    }

    /// Operator notification after a successful payment confirmation,
    /// with reply-to set to the customer.
    pub async fn booking_confirmed(&self, booking: &Booking, service_name: &str) {
        self.send(
            &self.operator_email,
            Some(&booking.email),
            &format!("Nouvelle réservation payée — {}", booking.preferred_date),
            "booking_confirmed",
            serde_json::json!({
                "name": booking.name,
                "email": booking.email,
                "phone": booking.phone,
                "city": booking.city,
                "service": service_name,
                "date": booking.preferred_date,
                "time": booking.preferred_time.as_deref().unwrap_or("—"),
            }),
        )
        .await;
    }

    /// Operator alert when a payment arrived but the booking could not be
    /// fulfilled; the refund is handled out-of-band.
    pub async fn refund_alert(&self, booking: &Booking, reason: &str) {
        self.send(
            &self.operator_email,
            Some(&booking.email),
            &format!("Remboursement requis — réservation #{}", booking.id),
            "refund_alert",
            serde_json::json!({
                "bookingId": booking.id.to_string(),
                "name": booking.name,
                "email": booking.email,
                "date": booking.preferred_date,
                "reason": reason,
            }),
        )
        .await;
    }

    /// Operator notification for a new quote request.
    pub async fn quote_received(&self, name: &str, email: &str, phone: &str, message: &str) {
        self.send(
            &self.operator_email,
            Some(email),
            "Nouvelle demande de devis",
            "quote_received",
            serde_json::json!({
                "name": name,
                "email": email,
                "phone": phone,
                "message": message,
            }),
        )
        .await;
    }
}
