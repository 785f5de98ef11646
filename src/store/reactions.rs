use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{StoreError, format_utc, parse_uuid};
use crate::types::{ReactionRecord, ReactionStatus};

#[derive(Debug, Clone)]
pub struct NewReaction {
    pub event_id: Uuid,
    pub rule_name: String,
    pub priority: i64,
    pub entity_key: String,
    pub message: String,
    pub reacted_at: DateTime<Utc>,
}

pub async fn find_reaction(
    pool: &SqlitePool,
    event_id: Uuid,
) -> Result<Option<ReactionRecord>, StoreError> {
    let row = sqlx::query_as::<_, ReactionRow>(
        r"
        SELECT event_id, rule_name, priority, entity_key, status, message, dispatched_at
        FROM reaction_records
        WHERE event_id = ?
        ",
    )
    .bind(event_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(ReactionRecord::try_from).transpose()
}

/// Inserts a `dispatched` record unless the same rule already dispatched for
/// the same entity after `window_start`, or the event already has a record.
/// One statement, so concurrent reactors cannot both pass the cooldown check.
pub async fn insert_dispatch_outside_cooldown(
    pool: &SqlitePool,
    reaction: &NewReaction,
    window_start: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO reaction_records (
            event_id,
            rule_name,
            priority,
            entity_key,
            status,
            message,
            dispatched_at
        )
        SELECT ?, ?, ?, ?, 'dispatched', ?, ?
        WHERE NOT EXISTS (
            SELECT 1
            FROM reaction_records
            WHERE rule_name = ?
              AND entity_key = ?
              AND status = 'dispatched'
              AND dispatched_at > ?
        )
        ON CONFLICT(event_id) DO NOTHING
        "#,
    )
    .bind(reaction.event_id.to_string())
    .bind(&reaction.rule_name)
    .bind(reaction.priority)
    .bind(&reaction.entity_key)
    .bind(&reaction.message)
    .bind(format_utc(reaction.reacted_at))
    .bind(&reaction.rule_name)
    .bind(&reaction.entity_key)
    .bind(format_utc(window_start))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Records a cooldown suppression. Returns `false` if the event already has
/// a record.
pub async fn insert_suppressed(
    pool: &SqlitePool,
    reaction: &NewReaction,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO reaction_records (
            event_id,
            rule_name,
            priority,
            entity_key,
            status,
            message,
            dispatched_at
        )
        VALUES (?, ?, ?, ?, 'suppressed', ?, ?)
        ON CONFLICT(event_id) DO NOTHING
        "#,
    )
    .bind(reaction.event_id.to_string())
    .bind(&reaction.rule_name)
    .bind(reaction.priority)
    .bind(&reaction.entity_key)
    .bind(&reaction.message)
    .bind(format_utc(reaction.reacted_at))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

#[derive(sqlx::FromRow)]
struct ReactionRow {
    event_id: String,
    rule_name: String,
    priority: i64,
    entity_key: String,
    status: String,
    message: String,
    dispatched_at: String,
}

impl TryFrom<ReactionRow> for ReactionRecord {
    type Error = StoreError;

    fn try_from(row: ReactionRow) -> Result<Self, Self::Error> {
        let status = ReactionStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Parse(format!("unknown reaction status: {}", row.status)))?;

        Ok(ReactionRecord {
            event_id: parse_uuid("event id", &row.event_id)?,
            rule_name: row.rule_name,
            priority: row.priority,
            entity_key: row.entity_key,
            status,
            message: row.message,
            dispatched_at: row.dispatched_at,
        })
    }
}
