use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool};
use uuid::Uuid;

use super::{StoreError, format_utc, parse_uuid};
use crate::types::{DeliveryStatus, Source, WebhookDelivery};

/// Writes the `received` audit row. Runs before any verification so even
/// rejected deliveries can be replayed forensically.
pub async fn open_delivery(
    pool: &SqlitePool,
    source: Source,
    event_type: Option<&str>,
    raw_body: &str,
    received_at: DateTime<Utc>,
) -> Result<Uuid, StoreError> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO webhook_deliveries (
            id,
            source,
            event_type,
            status,
            raw_body,
            error,
            received_at,
            processed_at
        )
        VALUES (?, ?, ?, 'received', ?, NULL, ?, NULL)
        "#,
    )
    .bind(id.to_string())
    .bind(source.as_str())
    .bind(event_type)
    .bind(raw_body)
    .bind(format_utc(received_at))
    .execute(pool)
    .await?;

    Ok(id)
}

/// Moves a delivery to its terminal status. Only `status`, `processed_at`
/// and `error` are ever rewritten.
pub async fn close_delivery(
    pool: &SqlitePool,
    delivery_id: Uuid,
    status: DeliveryStatus,
    error: Option<&str>,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_deliveries
        SET status = ?,
            error = ?,
            processed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(error)
    .bind(format_utc(Utc::now()))
    .bind(delivery_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("delivery not found".to_string()));
    }

    Ok(())
}

/// Annotates a delivery that stays `received`, e.g. after a signature
/// rejection.
pub async fn note_delivery_error(
    pool: &SqlitePool,
    delivery_id: Uuid,
    error: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE webhook_deliveries
        SET error = ?
        WHERE id = ?
        "#,
    )
    .bind(error)
    .bind(delivery_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct DeliveryCursor {
    pub received_at: String,
    pub id: Uuid,
}

#[derive(Debug, Clone)]
pub struct ListDeliveriesParams {
    pub limit: i64,
    pub before: Option<DeliveryCursor>,
    pub source: Option<Source>,
    pub status: Option<DeliveryStatus>,
}

#[derive(Debug, Clone)]
pub struct ListDeliveriesResult {
    pub deliveries: Vec<WebhookDelivery>,
    pub next_before: Option<DeliveryCursor>,
}

pub async fn list_deliveries(
    pool: &SqlitePool,
    params: &ListDeliveriesParams,
) -> Result<ListDeliveriesResult, StoreError> {
    let mut query = QueryBuilder::new(
        "SELECT \
            id, \
            source, \
            event_type, \
            status, \
            raw_body, \
            error, \
            received_at, \
            processed_at \
        FROM webhook_deliveries \
        WHERE 1 = 1",
    );

    if let Some(source) = params.source {
        query.push(" AND source = ");
        query.push_bind(source.as_str());
    }

    if let Some(status) = params.status {
        query.push(" AND status = ");
        query.push_bind(status.as_str());
    }

    if let Some(cursor) = &params.before {
        query.push(" AND (received_at < ");
        query.push_bind(&cursor.received_at);
        query.push(" OR (received_at = ");
        query.push_bind(&cursor.received_at);
        query.push(" AND id < ");
        query.push_bind(cursor.id.to_string());
        query.push("))");
    }

    query.push(" ORDER BY received_at DESC, id DESC LIMIT ");
    query.push_bind(params.limit + 1);

    let rows: Vec<DeliveryRow> = query.build_query_as().fetch_all(pool).await?;

    let has_more = rows.len() > params.limit as usize;
    let take_count = if has_more {
        params.limit as usize
    } else {
        rows.len()
    };

    let mut deliveries = Vec::with_capacity(take_count);
    for row in rows.into_iter().take(take_count) {
        deliveries.push(WebhookDelivery::try_from(row)?);
    }

    let next_before = if has_more {
        deliveries.last().map(|delivery| DeliveryCursor {
            received_at: delivery.received_at.clone(),
            id: delivery.id,
        })
    } else {
        None
    };

    Ok(ListDeliveriesResult {
        deliveries,
        next_before,
    })
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    id: String,
    source: String,
    event_type: Option<String>,
    status: String,
    raw_body: String,
    error: Option<String>,
    received_at: String,
    processed_at: Option<String>,
}

impl TryFrom<DeliveryRow> for WebhookDelivery {
    type Error = StoreError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        let source = Source::parse(&row.source)
            .ok_or_else(|| StoreError::Parse(format!("unknown source: {}", row.source)))?;
        let status = DeliveryStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Parse(format!("unknown status: {}", row.status)))?;

        Ok(WebhookDelivery {
            id: parse_uuid("delivery id", &row.id)?,
            source,
            event_type: row.event_type,
            status,
            raw_body: row.raw_body,
            error: row.error,
            received_at: row.received_at,
            processed_at: row.processed_at,
        })
    }
}
