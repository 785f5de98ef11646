use axum::{Json, extract::State};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    extractors::{ValidPath, ValidQuery},
    state::AppState,
    store::{self, DeliveryCursor, IntegrationEvent, ListDeliveriesParams},
    types::{DeliveryStatus, ListDeliveriesResponse, ReactionRecord, Source},
};

#[derive(Debug, Deserialize)]
pub struct ListDeliveriesQuery {
    limit: Option<i64>,
    before: Option<String>,
    source: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorPayload {
    received_at: String,
    id: String,
}

#[derive(Debug, Serialize)]
pub struct EventDetailResponse {
    pub event: IntegrationEvent,
    pub reaction: Option<ReactionRecord>,
}

pub async fn list_deliveries_handler(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<ListDeliveriesQuery>,
) -> Result<Json<ListDeliveriesResponse>, ApiError> {
    let limit = parse_limit(query.limit)?;
    let before = query.before.as_deref().map(decode_cursor).transpose()?;
    let source = query
        .source
        .as_deref()
        .map(|raw| Source::parse(raw.trim()).ok_or_else(|| ApiError::validation("source is invalid")))
        .transpose()?;
    let status = query
        .status
        .as_deref()
        .map(|raw| {
            DeliveryStatus::parse(raw.trim()).ok_or_else(|| ApiError::validation("status is invalid"))
        })
        .transpose()?;

    let params = ListDeliveriesParams {
        limit,
        before,
        source,
        status,
    };

    let result = store::list_deliveries(&state.pool, &params).await?;
    let next_before = result.next_before.as_ref().map(encode_cursor).transpose()?;

    Ok(Json(ListDeliveriesResponse {
        deliveries: result.deliveries,
        next_before,
    }))
}

pub async fn get_event_handler(
    State(state): State<AppState>,
    ValidPath(event_id): ValidPath<String>,
) -> Result<Json<EventDetailResponse>, ApiError> {
    let event_id = parse_uuid("event_id", &event_id)?;
    let event = store::get_event(&state.pool, event_id)
        .await?
        .ok_or_else(|| ApiError::not_found("event not found"))?;
    let reaction = store::find_reaction(&state.pool, event_id).await?;
    Ok(Json(EventDetailResponse { event, reaction }))
}

fn parse_limit(limit: Option<i64>) -> Result<i64, ApiError> {
    let limit = limit.unwrap_or(50);
    if !(1..=200).contains(&limit) {
        return Err(ApiError::validation("limit must be between 1 and 200"));
    }
    Ok(limit)
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(value).map_err(|_| ApiError::validation(format!("{field} must be a UUID")))
}

fn decode_cursor(raw: &str) -> Result<DeliveryCursor, ApiError> {
    let invalid = || ApiError::validation("before must be a valid cursor");
    let decoded = URL_SAFE_NO_PAD.decode(raw).map_err(|_| invalid())?;
    let payload: CursorPayload = serde_json::from_slice(&decoded).map_err(|_| invalid())?;
    DateTime::parse_from_rfc3339(&payload.received_at).map_err(|_| invalid())?;
    let id = Uuid::parse_str(&payload.id).map_err(|_| invalid())?;
    Ok(DeliveryCursor {
        received_at: payload.received_at,
        id,
    })
}

fn encode_cursor(cursor: &DeliveryCursor) -> Result<String, ApiError> {
    let payload = CursorPayload {
        received_at: cursor.received_at.clone(),
        id: cursor.id.to_string(),
    };
    let encoded = serde_json::to_vec(&payload)
        .map_err(|_| ApiError::Internal("failed to encode cursor".to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(encoded))
}
