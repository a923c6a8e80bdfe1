use std::collections::HashMap;

use chrono::NaiveDate;
use sqlx::SqlitePool;

use crate::config::ConfigStore;
use crate::models::{AvailableDatesResponse, Service, ServiceCity};
use crate::passage;

/// Fallback when the config row is missing or unparseable.
pub const DEFAULT_MAX_BOOKINGS_PER_DAY: i64 = 5;

/// The effective per-day booking limit and the scope it counts over.
///
/// A service-level override scopes counting to that service alone; the
/// global default counts paid bookings across all services.
#[derive(Debug, Clone)]
pub struct CapacityScope {
    pub limit: i64,
    pub service_type: Option<String>,
}

pub async fn effective_capacity(
    service: &Service,
    config: &ConfigStore,
) -> sqlx::Result<CapacityScope> {
    match service.max_bookings_per_day {
        Some(limit) => Ok(CapacityScope {
            limit,
            service_type: Some(service.service_id.clone()),
        }),
        None => Ok(CapacityScope {
            limit: config
                .get_i64("max_bookings_per_day", DEFAULT_MAX_BOOKINGS_PER_DAY)
                .await?,
            service_type: None,
        }),
    }
}

/// Paid, non-cancelled bookings grouped by date in [start, end].
/// Awaiting-payment rows never appear here, so an abandoned checkout
/// cannot block a date.
pub async fn paid_counts_by_date(
    pool: &SqlitePool,
    start: &str,
    end: &str,
    scope: &CapacityScope,
) -> sqlx::Result<HashMap<String, i64>> {
    let rows: Vec<(String, i64)> = match &scope.service_type {
        Some(service_type) => {
            sqlx::query_as(
                "SELECT preferred_date, COUNT(*) FROM bookings
                 WHERE payment_status = 'paid' AND status != 'cancelled'
                 AND preferred_date BETWEEN ? AND ? AND service_type = ?
                 GROUP BY preferred_date",
            )
            .bind(start)
            .bind(end)
            .bind(service_type)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                "SELECT preferred_date, COUNT(*) FROM bookings
                 WHERE payment_status = 'paid' AND status != 'cancelled'
                 AND preferred_date BETWEEN ? AND ?
                 GROUP BY preferred_date",
            )
            .bind(start)
            .bind(end)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows.into_iter().collect())
}

/// Paid, non-cancelled count for a single date under the given scope.
/// Used by the payment-confirmation re-check inside its transaction.
pub async fn paid_count_on_date<'e, E>(
    executor: E,
    date: &str,
    scope: &CapacityScope,
) -> sqlx::Result<i64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    match &scope.service_type {
        Some(service_type) => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM bookings
                 WHERE payment_status = 'paid' AND status != 'cancelled'
                 AND preferred_date = ? AND service_type = ?",
            )
            .bind(date)
            .bind(service_type)
            .fetch_one(executor)
            .await
        }
        None => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM bookings
                 WHERE payment_status = 'paid' AND status != 'cancelled'
                 AND preferred_date = ?",
            )
            .bind(date)
            .fetch_one(executor)
            .await
        }
    }
}

/// Full availability answer for a (city, service) pair over [start, end].
///
/// `full_dates` and `allowed_dates` can overlap: a passage day that already
/// hit capacity appears in both, and callers must apply `full_dates` as an
/// exclusion filter after `allowed_dates`.
pub async fn resolve(
    pool: &SqlitePool,
    config: &ConfigStore,
    service: &Service,
    city: &ServiceCity,
    start: NaiveDate,
    end: NaiveDate,
) -> sqlx::Result<AvailableDatesResponse> {
    let start_s = start.format("%Y-%m-%d").to_string();
    let end_s = end.format("%Y-%m-%d").to_string();

    let scope = effective_capacity(service, config).await?;
    let counts = paid_counts_by_date(pool, &start_s, &end_s, &scope).await?;

    let mut full_dates: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count >= scope.limit)
        .map(|(date, _)| date)
        .collect();
    full_dates.sort();

    let allowed_dates = passage::resolve_passage(service, city).map(|rules| {
        passage::allowed_dates_in_range(start, end, &rules)
            .into_iter()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect()
    });

    Ok(AvailableDatesResponse {
        full_dates,
        allowed_dates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn seed_service(pool: &SqlitePool, service_id: &str, max_per_day: Option<i64>) {
        sqlx::query(
            "INSERT INTO services (service_id, name, price, passage1_week, passage1_weekday, max_bookings_per_day)
             VALUES (?, ?, 1500, 3, 3, ?)",
        )
        .bind(service_id)
        .bind(service_id)
        .bind(max_per_day)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn seed_city(pool: &SqlitePool, name: &str) {
        sqlx::query("INSERT INTO service_cities (name) VALUES (?)")
            .bind(name)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn seed_booking(
        pool: &SqlitePool,
        service_type: &str,
        date: &str,
        payment_status: &str,
        status: &str,
    ) {
        sqlx::query(
            "INSERT INTO bookings (name, email, phone, city, service_type, preferred_date, status, payment_status)
             VALUES ('Client', 'c@example.com', '0600000000', 'Lyon', ?, ?, ?, ?)",
        )
        .bind(service_type)
        .bind(date)
        .bind(status)
        .bind(payment_status)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn get_service(pool: &SqlitePool, service_id: &str) -> Service {
        sqlx::query_as("SELECT * FROM services WHERE service_id = ?")
            .bind(service_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn get_city(pool: &SqlitePool, name: &str) -> ServiceCity {
        sqlx::query_as("SELECT * FROM service_cities WHERE name = ?")
            .bind(name)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_allowed_dates_third_wednesday() {
        // City has no passage config; service passage1 = (3, Wednesday)
        let pool = db::test_pool().await;
        seed_service(&pool, "cleaning", None).await;
        seed_city(&pool, "Lyon").await;
        let service = get_service(&pool, "cleaning").await;
        let city = get_city(&pool, "Lyon").await;

        let config = ConfigStore::new(pool.clone());
        let resp = resolve(&pool, &config, &service, &city, d("2025-07-01"), d("2025-07-31"))
            .await
            .unwrap();

        assert_eq!(resp.allowed_dates, Some(vec!["2025-07-16".to_string()]));
        assert!(resp.full_dates.is_empty());
    }

    #[tokio::test]
    async fn test_full_date_can_also_be_allowed() {
        // 5 paid bookings on the passage day with the default capacity of 5:
        // the date is full AND still the scheduled passage day.
        let pool = db::test_pool().await;
        seed_service(&pool, "cleaning", None).await;
        seed_city(&pool, "Lyon").await;
        for _ in 0..5 {
            seed_booking(&pool, "cleaning", "2025-07-16", "paid", "pending").await;
        }
        let service = get_service(&pool, "cleaning").await;
        let city = get_city(&pool, "Lyon").await;

        let config = ConfigStore::new(pool.clone());
        let resp = resolve(&pool, &config, &service, &city, d("2025-07-01"), d("2025-07-31"))
            .await
            .unwrap();

        assert_eq!(resp.full_dates, vec!["2025-07-16".to_string()]);
        assert_eq!(resp.allowed_dates, Some(vec!["2025-07-16".to_string()]));
    }

    #[tokio::test]
    async fn test_unpaid_bookings_never_block() {
        let pool = db::test_pool().await;
        seed_service(&pool, "cleaning", None).await;
        seed_city(&pool, "Lyon").await;
        for _ in 0..10 {
            seed_booking(&pool, "cleaning", "2025-07-16", "unpaid", "awaiting_payment").await;
        }
        let service = get_service(&pool, "cleaning").await;
        let city = get_city(&pool, "Lyon").await;

        let config = ConfigStore::new(pool.clone());
        let resp = resolve(&pool, &config, &service, &city, d("2025-07-01"), d("2025-07-31"))
            .await
            .unwrap();

        assert!(resp.full_dates.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_paid_bookings_never_block() {
        let pool = db::test_pool().await;
        seed_service(&pool, "cleaning", None).await;
        seed_city(&pool, "Lyon").await;
        for _ in 0..6 {
            seed_booking(&pool, "cleaning", "2025-07-16", "paid", "cancelled").await;
        }
        let service = get_service(&pool, "cleaning").await;
        let city = get_city(&pool, "Lyon").await;

        let config = ConfigStore::new(pool.clone());
        let resp = resolve(&pool, &config, &service, &city, d("2025-07-01"), d("2025-07-31"))
            .await
            .unwrap();

        assert!(resp.full_dates.is_empty());
    }

    #[tokio::test]
    async fn test_service_override_scopes_counting() {
        // "premium" caps at 1/day; paid bookings of another service on the
        // same date must not count toward its limit.
        let pool = db::test_pool().await;
        seed_service(&pool, "premium", Some(1)).await;
        seed_service(&pool, "cleaning", None).await;
        seed_city(&pool, "Lyon").await;
        seed_booking(&pool, "cleaning", "2025-07-16", "paid", "pending").await;

        let premium = get_service(&pool, "premium").await;
        let city = get_city(&pool, "Lyon").await;
        let config = ConfigStore::new(pool.clone());

        let resp = resolve(&pool, &config, &premium, &city, d("2025-07-01"), d("2025-07-31"))
            .await
            .unwrap();
        assert!(resp.full_dates.is_empty());

        seed_booking(&pool, "premium", "2025-07-16", "paid", "pending").await;
        let resp = resolve(&pool, &config, &premium, &city, d("2025-07-01"), d("2025-07-31"))
            .await
            .unwrap();
        assert_eq!(resp.full_dates, vec!["2025-07-16".to_string()]);
    }

    #[tokio::test]
    async fn test_global_default_counts_across_services() {
        let pool = db::test_pool().await;
        seed_service(&pool, "cleaning", None).await;
        seed_service(&pool, "other", None).await;
        seed_city(&pool, "Lyon").await;
        let config = ConfigStore::new(pool.clone());
        config.set("max_bookings_per_day", "2").await.unwrap();

        seed_booking(&pool, "cleaning", "2025-07-16", "paid", "pending").await;
        seed_booking(&pool, "other", "2025-07-16", "paid", "pending").await;

        let service = get_service(&pool, "cleaning").await;
        let city = get_city(&pool, "Lyon").await;
        let resp = resolve(&pool, &config, &service, &city, d("2025-07-01"), d("2025-07-31"))
            .await
            .unwrap();
        assert_eq!(resp.full_dates, vec!["2025-07-16".to_string()]);
    }

    #[tokio::test]
    async fn test_no_passage_anywhere_means_unrestricted() {
        let pool = db::test_pool().await;
        sqlx::query("INSERT INTO services (service_id, name, price) VALUES ('basic', 'Basic', 900)")
            .execute(&pool)
            .await
            .unwrap();
        seed_city(&pool, "Lyon").await;
        let service = get_service(&pool, "basic").await;
        let city = get_city(&pool, "Lyon").await;

        let config = ConfigStore::new(pool.clone());
        let resp = resolve(&pool, &config, &service, &city, d("2025-07-01"), d("2025-07-31"))
            .await
            .unwrap();
        assert_eq!(resp.allowed_dates, None);
    }
}
