use serde::{Deserialize, Serialize};

// ── Booking lifecycle ──

/// The five booking states. `AwaitingPayment` does not consume capacity;
/// only paid, non-cancelled bookings count toward a date being full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStatus {
    AwaitingPayment,
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::AwaitingPayment => "awaiting_payment",
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Allow-list for the admin status-update endpoint.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "awaiting_payment" => Some(BookingStatus::AwaitingPayment),
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

pub const QUOTE_STATUSES: &[&str] = &["pending", "contacted", "converted", "cancelled"];

// ── Database models ──

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub service_id: String,
    pub name: String,
    pub price: i64,
    pub enabled: bool,
    pub sort_order: i64,
    pub passage1_week: Option<i64>,
    pub passage1_weekday: Option<i64>,
    pub passage2_week: Option<i64>,
    pub passage2_weekday: Option<i64>,
    pub max_bookings_per_day: Option<i64>,
    pub is_subscription: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ServiceCity {
    pub id: i64,
    pub name: String,
    pub postal_code: Option<String>,
    pub enabled: bool,
    pub passage1_week: Option<i64>,
    pub passage1_weekday: Option<i64>,
    pub passage2_week: Option<i64>,
    pub passage2_weekday: Option<i64>,
    pub cutoff_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ServiceVariant {
    pub id: i64,
    pub service_id: i64,
    pub name: String,
    pub price_delta: i64,
    pub image_url: Option<String>,
    pub enabled: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Booking {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub city: String,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub service_type: String,
    pub variant_id: Option<i64>,
    pub bin_count: Option<i64>,
    pub preferred_date: String,
    pub preferred_time: Option<String>,
    pub message: Option<String>,
    pub status: String,
    pub payment_status: String,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent: Option<String>,
    pub rgpd_consent: bool,
    pub marketing_consent: bool,
    pub consent_at: Option<String>,
    pub consent_ip: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Quote {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub message: Option<String>,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    pub before_state: Option<String>,
    pub after_state: Option<String>,
    pub actor: String,
    pub ip: Option<String>,
    pub created_at: String,
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub city: String,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub service_type: String,
    pub variant_id: Option<i64>,
    pub bin_count: Option<i64>,
    pub preferred_date: String,
    pub preferred_time: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub rgpd_consent: bool,
    #[serde(default)]
    pub marketing_consent: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuoteRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableDatesQuery {
    pub start_date: String,
    pub end_date: String,
    pub city: String,
    pub service_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableDatesResponse {
    pub full_dates: Vec<String>,
    /// `None` means no passage restriction: any non-full date is allowed.
    pub allowed_dates: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingResponse {
    pub booking_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuoteResponse {
    pub quote_id: i64,
}

#[derive(Debug, Serialize)]
pub struct ServiceWithVariants {
    #[serde(flatten)]
    pub service: Service,
    pub variants: Vec<ServiceVariant>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityUpsertRequest {
    pub name: String,
    pub postal_code: Option<String>,
    pub enabled: Option<bool>,
    pub passage1_week: Option<i64>,
    pub passage1_weekday: Option<i64>,
    pub passage2_week: Option<i64>,
    pub passage2_weekday: Option<i64>,
    pub cutoff_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceUpsertRequest {
    pub service_id: String,
    pub name: String,
    pub price: i64,
    pub enabled: Option<bool>,
    pub sort_order: Option<i64>,
    pub passage1_week: Option<i64>,
    pub passage1_weekday: Option<i64>,
    pub passage2_week: Option<i64>,
    pub passage2_weekday: Option<i64>,
    pub max_bookings_per_day: Option<i64>,
    pub is_subscription: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantUpsertRequest {
    pub name: String,
    pub price_delta: i64,
    pub image_url: Option<String>,
    pub enabled: Option<bool>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BookingsQuery {
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

// ── Payment boundary (opaque external event, Stripe-shaped) ──

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: WebhookObject,
}

#[derive(Debug, Deserialize)]
pub struct WebhookObject {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub booking_id: i64,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ErasureRequest {
    pub email: String,
}

// ── Response envelope ──

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Envelope for the endpoints whose payload fields sit at the top level of
/// the body, next to `ok`, rather than nested under `data`.
#[derive(Debug, Serialize)]
pub struct FlatResponse<T: Serialize> {
    pub ok: bool,
    #[serde(flatten)]
    pub body: T,
}

impl<T: Serialize> FlatResponse<T> {
    pub fn success(body: T) -> Self {
        Self { ok: true, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_response_fields_at_top_level() {
        let v = serde_json::to_value(FlatResponse::success(CreateBookingResponse {
            booking_id: 7,
        }))
        .unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["bookingId"], 7);
        assert!(v.get("data").is_none());
    }

    #[test]
    fn test_available_dates_fields_at_top_level() {
        let v = serde_json::to_value(FlatResponse::success(AvailableDatesResponse {
            full_dates: vec!["2025-07-16".into()],
            allowed_dates: None,
        }))
        .unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["fullDates"][0], "2025-07-16");
        assert_eq!(v["allowedDates"], serde_json::Value::Null);
        assert!(v.get("data").is_none());
    }

    #[test]
    fn test_quote_response_fields_at_top_level() {
        let v = serde_json::to_value(FlatResponse::success(CreateQuoteResponse { quote_id: 3 }))
            .unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["quoteId"], 3);
    }
}
