use sqlx::SqlitePool;

/// Runtime configuration backed by the `config` table.
///
/// Values are read fresh from the store on every request, so admin PUT
/// changes take effect immediately (last-write-wins, no caching layer).
#[derive(Debug, Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
}

/// Keys accepted by the admin config endpoint.
pub const KNOWN_KEYS: &[&str] = &[
    "max_bookings_per_day",
    "time_selection_enabled",
    "contact_phone",
];

impl ConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> sqlx::Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_i64(&self, key: &str, default: i64) -> sqlx::Result<i64> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }

    pub async fn get_bool(&self, key: &str) -> sqlx::Result<bool> {
        Ok(self
            .get(key)
            .await?
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false))
    }

    pub async fn set(&self, key: &str, value: &str) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn all(&self) -> sqlx::Result<Vec<(String, String)>> {
        sqlx::query_as("SELECT key, value FROM config ORDER BY key")
            .fetch_all(&self.pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_seeded_defaults() {
        let pool = db::test_pool().await;
        let config = ConfigStore::new(pool);
        assert_eq!(config.get_i64("max_bookings_per_day", 0).await.unwrap(), 5);
        assert!(!config.get_bool("time_selection_enabled").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let pool = db::test_pool().await;
        let config = ConfigStore::new(pool);
        config.set("max_bookings_per_day", "3").await.unwrap();
        assert_eq!(config.get_i64("max_bookings_per_day", 0).await.unwrap(), 3);
        config.set("max_bookings_per_day", "8").await.unwrap();
        assert_eq!(config.get_i64("max_bookings_per_day", 0).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_missing_key_falls_back() {
        let pool = db::test_pool().await;
        let config = ConfigStore::new(pool);
        assert_eq!(config.get("no_such_key").await.unwrap(), None);
        assert_eq!(config.get_i64("no_such_key", 42).await.unwrap(), 42);
    }
}
