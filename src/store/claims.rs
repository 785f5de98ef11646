use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{StoreError, format_utc};
use crate::types::Source;

/// Claims a request-level dedup key. Returns `false` when another delivery
/// already holds it, including one racing on a concurrent connection.
///
/// A claim older than `stale_before` whose delivery never left `received`
/// belongs to a run that died mid-flight; it is taken over.
pub async fn claim_dedup_key(
    pool: &SqlitePool,
    source: Source,
    dedup_key: &str,
    delivery_id: Uuid,
    claimed_at: DateTime<Utc>,
    stale_before: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO dedup_claims (source, dedup_key, delivery_id, claimed_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(source, dedup_key) DO UPDATE SET
            delivery_id = excluded.delivery_id,
            claimed_at = excluded.claimed_at
        WHERE dedup_claims.claimed_at <= ?
          AND EXISTS (
              SELECT 1 FROM webhook_deliveries d
              WHERE d.id = dedup_claims.delivery_id
                AND d.status = 'received'
          )
        "#,
    )
    .bind(source.as_str())
    .bind(dedup_key)
    .bind(delivery_id.to_string())
    .bind(format_utc(claimed_at))
    .bind(format_utc(stale_before))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Gives a claim back so a redelivery can be processed. Only the delivery
/// that made the claim can release it.
pub async fn release_dedup_key(
    pool: &SqlitePool,
    source: Source,
    dedup_key: &str,
    delivery_id: Uuid,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        DELETE FROM dedup_claims
        WHERE source = ?
          AND dedup_key = ?
          AND delivery_id = ?
        "#,
    )
    .bind(source.as_str())
    .bind(dedup_key)
    .bind(delivery_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}
