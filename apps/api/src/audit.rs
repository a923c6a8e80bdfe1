use sqlx::SqlitePool;

/// Append an entry to the audit trail. Audit writes are best-effort: a
/// failed insert is logged and never fails the mutation it describes.
pub async fn record(
    pool: &SqlitePool,
    action: &str,
    entity: &str,
    entity_id: i64,
    before: Option<&serde_json::Value>,
    after: Option<&serde_json::Value>,
    actor: &str,
    ip: Option<&str>,
) {
    let result = sqlx::query(
        "INSERT INTO audit_log (action, entity, entity_id, before_state, after_state, actor, ip)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(action)
    .bind(entity)
    .bind(entity_id.to_string())
    .bind(before.map(|v| v.to_string()))
    .bind(after.map(|v| v.to_string()))
    .bind(actor)
    .bind(ip)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::error!("audit write failed for {} {} {}: {}", action, entity, entity_id, e);
    }
}
