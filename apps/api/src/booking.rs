use sqlx::SqlitePool;
use thiserror::Error;

use crate::availability::{self, CapacityScope, DEFAULT_MAX_BOOKINGS_PER_DAY};
use crate::config::ConfigStore;
use crate::models::{Booking, BookingStatus, CreateBookingRequest, Service, ServiceCity};

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Champs obligatoires manquants : {0}")]
    MissingFields(String),
    #[error("Date invalide : {0}")]
    InvalidDate(String),
    #[error("Ville non desservie : {0}")]
    CityNotServed(String),
    #[error("Les réservations pour {city} ne sont plus possibles après le {cutoff}")]
    CutoffExceeded { city: String, cutoff: String },
    #[error("Service inconnu ou indisponible : {0}")]
    UnknownService(String),
    #[error("Variante inconnue pour ce service")]
    UnknownVariant,
    #[error("Veuillez choisir un créneau horaire")]
    TimeRequired,
    #[error("Cette date est complète, veuillez en choisir une autre")]
    DateFull,
    #[error("Ce créneau est déjà réservé")]
    SlotConflict,
    #[error("Statut invalide : {0}")]
    InvalidStatus(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Result of the idempotent payment-confirmation transition.
#[derive(Debug)]
pub enum ConfirmOutcome {
    /// First confirmation: booking is now paid + pending.
    Confirmed(Booking),
    /// Session already processed; no state change, no second notification.
    AlreadyConfirmed,
    /// Payment recorded but the date filled up between request and
    /// confirmation. Booking is cancelled; the operator must refund by hand.
    CapacityExceeded(Booking),
    /// Payment recorded but the (date, time) slot was taken meanwhile.
    /// Same degraded path as `CapacityExceeded`.
    SlotConflict(Booking),
    NotFound,
}

/// Create a public booking request. On success the row is inserted as
/// awaiting_payment/unpaid; no notification is sent until payment confirms.
pub async fn create(
    pool: &SqlitePool,
    config: &ConfigStore,
    req: &CreateBookingRequest,
    client_ip: Option<&str>,
) -> Result<i64, BookingError> {
    let mut missing = Vec::new();
    for (field, value) in [
        ("name", &req.name),
        ("email", &req.email),
        ("phone", &req.phone),
        ("city", &req.city),
        ("serviceType", &req.service_type),
        ("preferredDate", &req.preferred_date),
    ] {
        if value.trim().is_empty() {
            missing.push(field);
        }
    }
    if !missing.is_empty() {
        return Err(BookingError::MissingFields(missing.join(", ")));
    }
    if !req.email.contains('@') {
        return Err(BookingError::MissingFields("email".into()));
    }

    let preferred_date = chrono::NaiveDate::parse_from_str(&req.preferred_date, "%Y-%m-%d")
        .map_err(|_| BookingError::InvalidDate(req.preferred_date.clone()))?;

    let city: Option<ServiceCity> = sqlx::query_as("SELECT * FROM service_cities WHERE name = ?")
        .bind(&req.city)
        .fetch_optional(pool)
        .await?;
    let city = match city {
        Some(c) if c.enabled => c,
        _ => return Err(BookingError::CityNotServed(req.city.clone())),
    };

    if let Some(cutoff) = &city.cutoff_date {
        let cutoff_date = chrono::NaiveDate::parse_from_str(cutoff, "%Y-%m-%d")
            .map_err(|_| BookingError::InvalidDate(cutoff.clone()))?;
        if preferred_date > cutoff_date {
            return Err(BookingError::CutoffExceeded {
                city: city.name.clone(),
                cutoff: cutoff.clone(),
            });
        }
    }

    let service: Option<Service> =
        sqlx::query_as("SELECT * FROM services WHERE service_id = ? AND enabled = 1")
            .bind(&req.service_type)
            .fetch_optional(pool)
            .await?;
    let service = service.ok_or_else(|| BookingError::UnknownService(req.service_type.clone()))?;

    if let Some(variant_id) = req.variant_id {
        let belongs: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM service_variants WHERE id = ? AND service_id = ? AND enabled = 1",
        )
        .bind(variant_id)
        .bind(service.id)
        .fetch_one(pool)
        .await?;
        if !belongs {
            return Err(BookingError::UnknownVariant);
        }
    }

    // Capacity is checked here so a full date is rejected before checkout;
    // confirm_payment re-counts inside its transaction for the race window.
    let scope = availability::effective_capacity(&service, config).await?;
    let paid_count = availability::paid_count_on_date(pool, &req.preferred_date, &scope).await?;
    if paid_count >= scope.limit {
        return Err(BookingError::DateFull);
    }

    // Time selection: when the flag is off, preferred_time is dropped so the
    // uniqueness backstop only ever sees deliberately chosen slots.
    let time_selection = config.get_bool("time_selection_enabled").await?;
    let preferred_time = if time_selection {
        let time = req
            .preferred_time
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(BookingError::TimeRequired)?;

        let taken: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM bookings
             WHERE preferred_date = ? AND preferred_time = ? AND status != 'cancelled'",
        )
        .bind(&req.preferred_date)
        .bind(time)
        .fetch_one(pool)
        .await?;
        if taken {
            return Err(BookingError::SlotConflict);
        }
        Some(time.to_string())
    } else {
        None
    };

    let consent_at = req
        .rgpd_consent
        .then(|| chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string());

    let result = sqlx::query(
        "INSERT INTO bookings (name, email, phone, city, address, postal_code, service_type,
         variant_id, bin_count, preferred_date, preferred_time, message,
         status, payment_status, rgpd_consent, marketing_consent, consent_at, consent_ip)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'awaiting_payment', 'unpaid', ?, ?, ?, ?)",
    )
    .bind(req.name.trim())
    .bind(req.email.trim())
    .bind(req.phone.trim())
    .bind(&city.name)
    .bind(&req.address)
    .bind(&req.postal_code)
    .bind(&service.service_id)
    .bind(req.variant_id)
    .bind(req.bin_count)
    .bind(&req.preferred_date)
    .bind(&preferred_time)
    .bind(&req.message)
    .bind(req.rgpd_consent)
    .bind(req.marketing_consent)
    .bind(&consent_at)
    .bind(client_ip)
    .execute(pool)
    .await;

    match result {
        Ok(done) => Ok(done.last_insert_rowid()),
        // The partial unique index on (date, time) backstops the check above
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(BookingError::SlotConflict)
        }
        Err(e) => Err(e.into()),
    }
}

/// Idempotent payment-confirmation transition.
///
/// Capacity is re-resolved here, not at creation time, inside one transaction
/// with the state write so concurrent confirmations cannot both pass the
/// count. Callers must ACK the payment event for every outcome.
pub async fn confirm_payment(
    pool: &SqlitePool,
    config: &ConfigStore,
    booking_id: i64,
    session_id: &str,
    payment_intent: Option<&str>,
) -> Result<ConfirmOutcome, BookingError> {
    // Config and capacity scope are read before the write transaction;
    // the count itself happens inside it.
    let time_selection = config.get_bool("time_selection_enabled").await?;
    let global_limit = config
        .get_i64("max_bookings_per_day", DEFAULT_MAX_BOOKINGS_PER_DAY)
        .await?;

    let mut tx = pool.begin().await?;

    let booking: Option<Booking> = sqlx::query_as("SELECT * FROM bookings WHERE id = ?")
        .bind(booking_id)
        .fetch_optional(&mut *tx)
        .await?;
    let booking = match booking {
        Some(b) => b,
        None => return Ok(ConfirmOutcome::NotFound),
    };

    if booking.payment_status == "paid" {
        return Ok(ConfirmOutcome::AlreadyConfirmed);
    }

    let service: Option<Service> = sqlx::query_as("SELECT * FROM services WHERE service_id = ?")
        .bind(&booking.service_type)
        .fetch_optional(&mut *tx)
        .await?;
    let scope = match service.as_ref().and_then(|s| s.max_bookings_per_day) {
        Some(limit) => CapacityScope {
            limit,
            service_type: Some(booking.service_type.clone()),
        },
        None => CapacityScope {
            limit: global_limit,
            service_type: None,
        },
    };

    let paid_count =
        availability::paid_count_on_date(&mut *tx, &booking.preferred_date, &scope).await?;

    if booking.status == BookingStatus::Cancelled.as_str() || paid_count >= scope.limit {
        // Record the payment but do not materialize the booking; the
        // operator is alerted to refund out-of-band.
        sqlx::query(
            "UPDATE bookings SET payment_status = 'paid', status = 'cancelled',
             stripe_session_id = COALESCE(stripe_session_id, ?),
             stripe_payment_intent = COALESCE(?, stripe_payment_intent)
             WHERE id = ?",
        )
        .bind(session_id)
        .bind(payment_intent)
        .bind(booking_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        return Ok(ConfirmOutcome::CapacityExceeded(booking));
    }

    if time_selection {
        if let Some(time) = &booking.preferred_time {
            let taken: bool = sqlx::query_scalar(
                "SELECT COUNT(*) > 0 FROM bookings
                 WHERE preferred_date = ? AND preferred_time = ?
                 AND status != 'cancelled' AND id != ?",
            )
            .bind(&booking.preferred_date)
            .bind(time)
            .bind(booking_id)
            .fetch_one(&mut *tx)
            .await?;
            if taken {
                sqlx::query(
                    "UPDATE bookings SET payment_status = 'paid', status = 'cancelled',
                     stripe_session_id = COALESCE(stripe_session_id, ?),
                     stripe_payment_intent = COALESCE(?, stripe_payment_intent)
                     WHERE id = ?",
                )
                .bind(session_id)
                .bind(payment_intent)
                .bind(booking_id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                return Ok(ConfirmOutcome::SlotConflict(booking));
            }
        }
    }

    sqlx::query(
        "UPDATE bookings SET payment_status = 'paid',
         status = CASE WHEN status = 'awaiting_payment' THEN 'pending' ELSE status END,
         stripe_session_id = COALESCE(stripe_session_id, ?),
         stripe_payment_intent = COALESCE(?, stripe_payment_intent)
         WHERE id = ?",
    )
    .bind(session_id)
    .bind(payment_intent)
    .bind(booking_id)
    .execute(&mut *tx)
    .await?;

    let confirmed: Booking = sqlx::query_as("SELECT * FROM bookings WHERE id = ?")
        .bind(booking_id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(ConfirmOutcome::Confirmed(confirmed))
}

/// Admin status transition over the fixed five-state allow-list.
/// Returns (old, new) for the audit trail, or None if the booking is missing.
pub async fn update_status(
    pool: &SqlitePool,
    booking_id: i64,
    new_status: &str,
) -> Result<Option<(String, String)>, BookingError> {
    let status = BookingStatus::parse(new_status)
        .ok_or_else(|| BookingError::InvalidStatus(new_status.to_string()))?;

    let old: Option<String> = sqlx::query_scalar("SELECT status FROM bookings WHERE id = ?")
        .bind(booking_id)
        .fetch_optional(pool)
        .await?;
    let old = match old {
        Some(s) => s,
        None => return Ok(None),
    };

    sqlx::query("UPDATE bookings SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(booking_id)
        .execute(pool)
        .await?;

    Ok(Some((old, status.as_str().to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::CreateBookingRequest;

    fn request(city: &str, date: &str, time: Option<&str>) -> CreateBookingRequest {
        CreateBookingRequest {
            name: "Jean Dupont".into(),
            email: "jean@example.com".into(),
            phone: "0612345678".into(),
            city: city.into(),
            address: Some("3 rue des Lilas".into()),
            postal_code: Some("69001".into()),
            service_type: "cleaning".into(),
            variant_id: None,
            bin_count: Some(2),
            preferred_date: date.into(),
            preferred_time: time.map(Into::into),
            message: None,
            rgpd_consent: true,
            marketing_consent: false,
        }
    }

    async fn setup() -> (SqlitePool, ConfigStore) {
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
        let config = ConfigStore::new(pool.clone());
        (pool, config)
    }

    async fn get_booking(pool: &SqlitePool, id: i64) -> Booking {
        sqlx::query_as("SELECT * FROM bookings WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    // ── create ──

    #[tokio::test]
    async fn test_create_starts_awaiting_payment() {
        let (pool, config) = setup().await;
        let id = create(&pool, &config, &request("Lyon", "2025-07-16", None), None)
            .await
            .unwrap();
        let booking = get_booking(&pool, id).await;
        assert_eq!(booking.status, "awaiting_payment");
        assert_eq!(booking.payment_status, "unpaid");
        assert!(booking.consent_at.is_some());
    }

    #[tokio::test]
    async fn test_create_missing_fields() {
        let (pool, config) = setup().await;
        let mut req = request("Lyon", "2025-07-16", None);
        req.name = "".into();
        req.phone = "  ".into();
        let err = create(&pool, &config, &req, None).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("name") && msg.contains("phone"), "{msg}");
    }

    #[tokio::test]
    async fn test_create_unknown_city() {
        let (pool, config) = setup().await;
        let err = create(&pool, &config, &request("Paris", "2025-07-16", None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::CityNotServed(_)));
    }

    #[tokio::test]
    async fn test_create_disabled_city() {
        let (pool, config) = setup().await;
        sqlx::query("INSERT INTO service_cities (name, enabled) VALUES ('Vienne', 0)")
            .execute(&pool)
            .await
            .unwrap();
        let err = create(&pool, &config, &request("Vienne", "2025-07-16", None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::CityNotServed(_)));
    }

    #[tokio::test]
    async fn test_create_cutoff_exceeded_names_the_date() {
        let (pool, config) = setup().await;
        sqlx::query("UPDATE service_cities SET cutoff_date = '2025-06-30' WHERE name = 'Lyon'")
            .execute(&pool)
            .await
            .unwrap();
        let err = create(&pool, &config, &request("Lyon", "2025-07-01", None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::CutoffExceeded { .. }));
        assert!(err.to_string().contains("2025-06-30"));
    }

    #[tokio::test]
    async fn test_create_on_cutoff_date_is_allowed() {
        let (pool, config) = setup().await;
        sqlx::query("UPDATE service_cities SET cutoff_date = '2025-06-30' WHERE name = 'Lyon'")
            .execute(&pool)
            .await
            .unwrap();
        assert!(create(&pool, &config, &request("Lyon", "2025-06-30", None), None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_create_unknown_service() {
        let (pool, config) = setup().await;
        let mut req = request("Lyon", "2025-07-16", None);
        req.service_type = "polishing".into();
        let err = create(&pool, &config, &req, None).await.unwrap_err();
        assert!(matches!(err, BookingError::UnknownService(_)));
    }

    #[tokio::test]
    async fn test_create_time_required_when_selection_enabled() {
        let (pool, config) = setup().await;
        config.set("time_selection_enabled", "true").await.unwrap();
        let err = create(&pool, &config, &request("Lyon", "2025-07-16", None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::TimeRequired));
    }

    #[tokio::test]
    async fn test_create_duplicate_slot_rejected() {
        let (pool, config) = setup().await;
        config.set("time_selection_enabled", "true").await.unwrap();
        create(&pool, &config, &request("Lyon", "2025-07-16", Some("10:00")), None)
            .await
            .unwrap();
        let err = create(&pool, &config, &request("Lyon", "2025-07-16", Some("10:00")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::SlotConflict));
    }

    #[tokio::test]
    async fn test_create_slot_freed_by_cancellation() {
        let (pool, config) = setup().await;
        config.set("time_selection_enabled", "true").await.unwrap();
        let id = create(&pool, &config, &request("Lyon", "2025-07-16", Some("10:00")), None)
            .await
            .unwrap();
        update_status(&pool, id, "cancelled").await.unwrap();
        assert!(
            create(&pool, &config, &request("Lyon", "2025-07-16", Some("10:00")), None)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_create_rejected_when_date_full() {
        let (pool, config) = setup().await;
        config.set("max_bookings_per_day", "1").await.unwrap();

        let first = create(&pool, &config, &request("Lyon", "2025-07-16", None), None)
            .await
            .unwrap();
        confirm_payment(&pool, &config, first, "cs_full", None).await.unwrap();

        let err = create(&pool, &config, &request("Lyon", "2025-07-16", None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::DateFull));

        // Another date stays open
        assert!(create(&pool, &config, &request("Lyon", "2025-07-17", None), None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_create_full_check_ignores_unpaid() {
        let (pool, config) = setup().await;
        config.set("max_bookings_per_day", "1").await.unwrap();

        // Abandoned checkout: awaiting_payment/unpaid must not block the date
        create(&pool, &config, &request("Lyon", "2025-07-16", None), None)
            .await
            .unwrap();
        assert!(create(&pool, &config, &request("Lyon", "2025-07-16", None), None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_create_time_dropped_when_selection_disabled() {
        let (pool, config) = setup().await;
        let id = create(&pool, &config, &request("Lyon", "2025-07-16", Some("10:00")), None)
            .await
            .unwrap();
        assert_eq!(get_booking(&pool, id).await.preferred_time, None);
    }

    // ── confirm_payment ──

    #[tokio::test]
    async fn test_confirm_advances_to_pending_paid() {
        let (pool, config) = setup().await;
        let id = create(&pool, &config, &request("Lyon", "2025-07-16", None), None)
            .await
            .unwrap();

        let outcome = confirm_payment(&pool, &config, id, "cs_test_1", Some("pi_test_1"))
            .await
            .unwrap();
        let booking = match outcome {
            ConfirmOutcome::Confirmed(b) => b,
            other => panic!("expected Confirmed, got {other:?}"),
        };
        assert_eq!(booking.status, "pending");
        assert_eq!(booking.payment_status, "paid");
        assert_eq!(booking.stripe_session_id.as_deref(), Some("cs_test_1"));
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent() {
        let (pool, config) = setup().await;
        let id = create(&pool, &config, &request("Lyon", "2025-07-16", None), None)
            .await
            .unwrap();

        let first = confirm_payment(&pool, &config, id, "cs_test_1", None).await.unwrap();
        assert!(matches!(first, ConfirmOutcome::Confirmed(_)));

        // Second delivery of the same event: no state change, no notification
        let second = confirm_payment(&pool, &config, id, "cs_test_1", None).await.unwrap();
        assert!(matches!(second, ConfirmOutcome::AlreadyConfirmed));
        assert_eq!(get_booking(&pool, id).await.status, "pending");
    }

    #[tokio::test]
    async fn test_confirm_capacity_exceeded_cancels_and_records_payment() {
        let (pool, config) = setup().await;
        config.set("max_bookings_per_day", "1").await.unwrap();

        let first = create(&pool, &config, &request("Lyon", "2025-07-16", None), None)
            .await
            .unwrap();
        let second = create(&pool, &config, &request("Lyon", "2025-07-16", None), None)
            .await
            .unwrap();

        assert!(matches!(
            confirm_payment(&pool, &config, first, "cs_1", None).await.unwrap(),
            ConfirmOutcome::Confirmed(_)
        ));
        // The date filled up between request and confirmation
        assert!(matches!(
            confirm_payment(&pool, &config, second, "cs_2", None).await.unwrap(),
            ConfirmOutcome::CapacityExceeded(_)
        ));

        let booking = get_booking(&pool, second).await;
        assert_eq!(booking.status, "cancelled");
        assert_eq!(booking.payment_status, "paid");
    }

    #[tokio::test]
    async fn test_confirm_service_scoped_capacity() {
        let (pool, config) = setup().await;
        sqlx::query(
            "INSERT INTO services (service_id, name, price, max_bookings_per_day)
             VALUES ('premium', 'Premium', 2500, 1)",
        )
        .execute(&pool)
        .await
        .unwrap();

        // A paid booking of another service does not consume premium capacity
        let other = create(&pool, &config, &request("Lyon", "2025-07-16", None), None)
            .await
            .unwrap();
        confirm_payment(&pool, &config, other, "cs_other", None).await.unwrap();

        // Both requested while the date was open; only one payment can land
        let mut req = request("Lyon", "2025-07-16", None);
        req.service_type = "premium".into();
        let premium1 = create(&pool, &config, &req, None).await.unwrap();
        let mut req = request("Lyon", "2025-07-16", None);
        req.service_type = "premium".into();
        let premium2 = create(&pool, &config, &req, None).await.unwrap();

        assert!(matches!(
            confirm_payment(&pool, &config, premium1, "cs_p1", None).await.unwrap(),
            ConfirmOutcome::Confirmed(_)
        ));
        assert!(matches!(
            confirm_payment(&pool, &config, premium2, "cs_p2", None).await.unwrap(),
            ConfirmOutcome::CapacityExceeded(_)
        ));
    }

    #[tokio::test]
    async fn test_confirm_unknown_booking() {
        let (pool, config) = setup().await;
        let outcome = confirm_payment(&pool, &config, 999, "cs_x", None).await.unwrap();
        assert!(matches!(outcome, ConfirmOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_confirm_cancelled_booking_goes_to_refund_path() {
        let (pool, config) = setup().await;
        let id = create(&pool, &config, &request("Lyon", "2025-07-16", None), None)
            .await
            .unwrap();
        update_status(&pool, id, "cancelled").await.unwrap();

        let outcome = confirm_payment(&pool, &config, id, "cs_late", None).await.unwrap();
        assert!(matches!(outcome, ConfirmOutcome::CapacityExceeded(_)));
        let booking = get_booking(&pool, id).await;
        assert_eq!(booking.status, "cancelled");
        assert_eq!(booking.payment_status, "paid");
    }

    // ── update_status ──

    #[tokio::test]
    async fn test_update_status_allow_list() {
        let (pool, config) = setup().await;
        let id = create(&pool, &config, &request("Lyon", "2025-07-16", None), None)
            .await
            .unwrap();

        let (old, new) = update_status(&pool, id, "confirmed").await.unwrap().unwrap();
        assert_eq!(old, "awaiting_payment");
        assert_eq!(new, "confirmed");

        let err = update_status(&pool, id, "archived").await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidStatus(_)));
    }

    #[tokio::test]
    async fn test_update_status_missing_booking() {
        let (pool, _) = setup().await;
        assert!(update_status(&pool, 42, "confirmed").await.unwrap().is_none());
    }
}
