use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{StoreError, format_utc, parse_uuid};
use crate::types::{EventAction, Source};

/// A normalized event produced by a source adapter, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub source: Source,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: EventAction,
    pub payload: Value,
    /// Deterministic identity of the provider change; unique in the store.
    pub dedup_key: String,
    /// Provider-side time of the change, when the envelope carries one.
    pub occurred_at: Option<DateTime<Utc>>,
}

/// A row of the canonical event store. Never mutated after insert.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationEvent {
    pub id: Uuid,
    pub source: Source,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: EventAction,
    pub payload: Value,
    pub latency_ms: i64,
    pub dedup_key: String,
    pub delivery_id: Option<Uuid>,
    pub created_at: String,
    pub processed_at: String,
}

impl IntegrationEvent {
    /// Scope used for reaction cooldowns.
    pub fn entity_key(&self) -> String {
        format!("{}:{}", self.entity_type, self.entity_id)
    }
}

/// Appends an event. Returns `None` when an event with the same dedup key
/// already exists; the caller treats that as a normal duplicate.
pub async fn insert_event(
    pool: &SqlitePool,
    event: &NewEvent,
    delivery_id: Option<Uuid>,
    latency_ms: i64,
) -> Result<Option<IntegrationEvent>, StoreError> {
    let id = Uuid::new_v4();
    let processed_at = format_utc(Utc::now());
    let created_at = event
        .occurred_at
        .map(format_utc)
        .unwrap_or_else(|| processed_at.clone());
    let payload = serde_json::to_string(&event.payload)
        .map_err(|err| StoreError::Parse(format!("invalid payload JSON: {err}")))?;

    let result = sqlx::query(
        r#"
        INSERT INTO integration_events (
            id,
            source,
            event_type,
            entity_type,
            entity_id,
            action,
            payload,
            latency_ms,
            dedup_key,
            delivery_id,
            created_at,
            processed_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(dedup_key) DO NOTHING
        "#,
    )
    .bind(id.to_string())
    .bind(event.source.as_str())
    .bind(&event.event_type)
    .bind(&event.entity_type)
    .bind(&event.entity_id)
    .bind(event.action.as_str())
    .bind(&payload)
    .bind(latency_ms)
    .bind(&event.dedup_key)
    .bind(delivery_id.map(|id| id.to_string()))
    .bind(&created_at)
    .bind(&processed_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    Ok(Some(IntegrationEvent {
        id,
        source: event.source,
        event_type: event.event_type.clone(),
        entity_type: event.entity_type.clone(),
        entity_id: event.entity_id.clone(),
        action: event.action,
        payload: event.payload.clone(),
        latency_ms,
        dedup_key: event.dedup_key.clone(),
        delivery_id,
        created_at,
        processed_at,
    }))
}

pub async fn get_event(
    pool: &SqlitePool,
    event_id: Uuid,
) -> Result<Option<IntegrationEvent>, StoreError> {
    let row = sqlx::query_as::<_, EventRow>(
        r"
        SELECT
            id,
            source,
            event_type,
            entity_type,
            entity_id,
            action,
            payload,
            latency_ms,
            dedup_key,
            delivery_id,
            created_at,
            processed_at
        FROM integration_events
        WHERE id = ?
        ",
    )
    .bind(event_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(IntegrationEvent::try_from).transpose()
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    source: String,
    event_type: String,
    entity_type: String,
    entity_id: String,
    action: String,
    payload: String,
    latency_ms: i64,
    dedup_key: String,
    delivery_id: Option<String>,
    created_at: String,
    processed_at: String,
}

impl TryFrom<EventRow> for IntegrationEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let source = Source::parse(&row.source)
            .ok_or_else(|| StoreError::Parse(format!("unknown source: {}", row.source)))?;
        let action = EventAction::parse(&row.action)
            .ok_or_else(|| StoreError::Parse(format!("unknown action: {}", row.action)))?;
        let payload: Value = serde_json::from_str(&row.payload)
            .map_err(|err| StoreError::Parse(format!("invalid payload JSON: {err}")))?;
        let delivery_id = match row.delivery_id.as_deref() {
            Some(value) => Some(parse_uuid("delivery id", value)?),
            None => None,
        };

        Ok(IntegrationEvent {
            id: parse_uuid("event id", &row.id)?,
            source,
            event_type: row.event_type,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            action,
            payload,
            latency_ms: row.latency_ms,
            dedup_key: row.dedup_key,
            delivery_id,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}
