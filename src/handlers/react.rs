use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::ApiError,
    extractors::ValidJson,
    reactor::{Reaction, log_reaction},
    state::AppState,
    store,
    types::ReactResponse,
};

const EVENTS_TABLE: &str = "integration_events";

/// Database change notification: `{type, table, schema, record}`. Every
/// field is optional; shapes other than an events INSERT are skipped.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReactRequest {
    #[serde(rename = "type")]
    kind: Option<String>,
    table: Option<String>,
    record: Option<Value>,
}

impl ReactRequest {
    fn is_event_insert(&self) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|kind| kind.eq_ignore_ascii_case("INSERT"))
            && self.table.as_deref() == Some(EVENTS_TABLE)
    }
}

pub async fn react_handler(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<Value>,
) -> Result<Json<ReactResponse>, ApiError> {
    let req: ReactRequest = serde_json::from_value(body).unwrap_or_default();

    if !req.is_event_insert() {
        return Ok(Json(ReactResponse {
            ok: true,
            outcome: None,
            rule_name: None,
            skipped: Some(true),
            reason: Some(format!(
                "ignoring {} on {}",
                req.kind.as_deref().unwrap_or("unknown change"),
                req.table.as_deref().unwrap_or("unknown table"),
            )),
        }));
    }

    let event_id = req
        .record
        .as_ref()
        .and_then(|record| record.get("id"))
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id.trim()).ok())
        .ok_or_else(|| ApiError::validation("record.id must be a UUID"))?;

    let event = store::get_event(&state.pool, event_id)
        .await?
        .ok_or_else(|| ApiError::not_found("event not found"))?;

    let reaction = state.reactor.react(&event).await?;
    log_reaction(&event, &reaction);

    let reason = match &reaction {
        Reaction::DispatchFailed { error, .. } => Some(error.clone()),
        _ => None,
    };

    Ok(Json(ReactResponse {
        ok: true,
        outcome: Some(reaction.outcome()),
        rule_name: reaction.rule_name().map(str::to_string),
        skipped: None,
        reason,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: Value) -> ReactRequest {
        serde_json::from_value(body).unwrap_or_default()
    }

    #[test]
    fn only_event_inserts_are_handled() {
        assert!(request(json!({ "type": "insert", "table": EVENTS_TABLE })).is_event_insert());
        assert!(!request(json!({ "type": "UPDATE", "table": EVENTS_TABLE })).is_event_insert());
        assert!(!request(json!({ "type": "INSERT" })).is_event_insert());
        assert!(!request(json!({ "event": "ping" })).is_event_insert());
        assert!(!request(json!({ "type": 5 })).is_event_insert());
        assert!(!request(json!([1, 2])).is_event_insert());
    }
}
