//! Accounting-ledger webhooks (Xero style).
//!
//! One endpoint receives both the ownership-verification handshake and
//! event batches. The handshake is `firstEventSequence == 0`,
//! `lastEventSequence == 0` and no events; everything else is a batch, even
//! an empty one. Each batch entry maps 1:1 to a canonical event.

use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{
    AdapterError, InboundRequest, Normalized, Outcome, Parsed, RetryPolicy, SourceAdapter,
    Verification, json_response, parse_provider_time, scalar_text,
};
use crate::signature::{SignatureEncoding, verify_hmac};
use crate::store::NewEvent;
use crate::types::{EventAction, Source, WebhookAck};

pub const SIGNATURE_HEADER: &str = "x-xero-signature";

/// One entry of an event batch. Every field is optional so malformed entries
/// still normalize.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerEvent {
    pub resource_id: Option<String>,
    pub resource_url: Option<String>,
    pub event_category: Option<String>,
    pub event_type: Option<String>,
    pub event_date_utc: Option<String>,
    pub tenant_id: Option<String>,
    pub tenant_type: Option<String>,
    pub raw: Value,
}

impl LedgerEvent {
    fn from_value(raw: Value) -> Self {
        let text = |key: &str| raw.get(key).and_then(scalar_text);
        Self {
            resource_id: text("resourceId"),
            resource_url: text("resourceUrl"),
            event_category: text("eventCategory").or_else(|| text("resourceType")),
            event_type: text("eventType"),
            event_date_utc: text("eventDateUtc"),
            tenant_id: text("tenantId"),
            tenant_type: text("tenantType"),
            raw,
        }
    }

    /// `ledger:{resourceId}:{eventType}:{eventDateUtc}`. Entries without a
    /// resource id are keyed by a digest of their raw JSON so a redelivery
    /// still collapses onto the same row.
    pub fn dedup_key(&self) -> String {
        match &self.resource_id {
            Some(resource_id) => format!(
                "ledger:{}:{}:{}",
                resource_id,
                self.event_type.as_deref().unwrap_or(""),
                self.event_date_utc.as_deref().unwrap_or("")
            ),
            None => {
                let digest = Sha256::digest(self.raw.to_string().as_bytes());
                format!("ledger:unidentified:{}", hex::encode(digest))
            }
        }
    }

    fn action(&self) -> EventAction {
        if self.resource_id.is_none() {
            return EventAction::Skipped;
        }
        match self
            .event_type
            .as_deref()
            .map(str::to_ascii_uppercase)
            .as_deref()
        {
            Some("CREATE") => EventAction::Created,
            _ => EventAction::Updated,
        }
    }

    fn normalize(self) -> NewEvent {
        let dedup_key = self.dedup_key();
        let action = self.action();
        let occurred_at = self.event_date_utc.as_deref().and_then(parse_provider_time);
        let mut payload = match self.raw {
            Value::Object(map) => Value::Object(map),
            other => json!({ "raw": other }),
        };
        if action == EventAction::Skipped
            && let Value::Object(map) = &mut payload
        {
            map.insert(
                "skip_reason".to_string(),
                Value::String("missing resourceId".to_string()),
            );
        }

        NewEvent {
            source: Source::Ledger,
            event_type: self.event_type.unwrap_or_else(|| "UNKNOWN".to_string()),
            entity_type: self
                .event_category
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            entity_id: self.resource_id.unwrap_or_default(),
            action,
            payload,
            dedup_key,
            occurred_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerBatch {
    pub first_event_sequence: Option<i64>,
    pub last_event_sequence: Option<i64>,
    pub entropy: Option<String>,
    pub events: Vec<LedgerEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerPayload {
    Handshake,
    Batch(LedgerBatch),
}

/// Classifies a ledger body. Never fails: a missing, null or non-array
/// `events` field is an empty list.
pub fn classify(body: &Value) -> LedgerPayload {
    let first_event_sequence = body.get("firstEventSequence").and_then(Value::as_i64);
    let last_event_sequence = body.get("lastEventSequence").and_then(Value::as_i64);
    let events: Vec<LedgerEvent> = match body.get("events") {
        Some(Value::Array(entries)) => entries
            .iter()
            .cloned()
            .map(LedgerEvent::from_value)
            .collect(),
        _ => Vec::new(),
    };

    if first_event_sequence == Some(0) && last_event_sequence == Some(0) && events.is_empty() {
        return LedgerPayload::Handshake;
    }

    LedgerPayload::Batch(LedgerBatch {
        first_event_sequence,
        last_event_sequence,
        entropy: body.get("entropy").and_then(scalar_text),
        events,
    })
}

pub struct LedgerAdapter {
    webhook_key: Option<String>,
}

impl LedgerAdapter {
    pub fn new(webhook_key: Option<String>) -> Self {
        Self { webhook_key }
    }
}

#[async_trait]
impl SourceAdapter for LedgerAdapter {
    type Envelope = LedgerBatch;

    fn source(&self) -> Source {
        Source::Ledger
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::AlwaysAcknowledge
    }

    fn event_type_hint(&self, body: &Value) -> Option<String> {
        let hint = match classify(body) {
            LedgerPayload::Handshake => "handshake",
            LedgerPayload::Batch(_) => "event_batch",
        };
        Some(hint.to_string())
    }

    fn verify_signature(&self, request: &InboundRequest) -> Verification {
        let Some(key) = &self.webhook_key else {
            return Verification::Unconfigured;
        };
        if verify_hmac(
            &request.body,
            request.header(SIGNATURE_HEADER),
            key.as_bytes(),
            SignatureEncoding::Base64,
        ) {
            Verification::Verified
        } else {
            Verification::Rejected("invalid ledger signature")
        }
    }

    fn parse(&self, request: &InboundRequest) -> Result<Parsed<LedgerBatch>, AdapterError> {
        let body: Value = serde_json::from_slice(&request.body)
            .map_err(|err| AdapterError::Malformed(format!("invalid JSON body: {err}")))?;
        if !body.is_object() {
            return Err(AdapterError::Malformed(
                "body must be a JSON object".to_string(),
            ));
        }

        match classify(&body) {
            LedgerPayload::Handshake => Ok(Parsed::Handshake),
            LedgerPayload::Batch(batch) => Ok(Parsed::Envelope(batch)),
        }
    }

    fn dedup_key(&self, _: &LedgerBatch) -> Option<String> {
        // Batches are deduplicated per entry by the event store.
        None
    }

    async fn normalize(&self, batch: LedgerBatch) -> Result<Normalized, AdapterError> {
        debug!(
            first_event_sequence = ?batch.first_event_sequence,
            last_event_sequence = ?batch.last_event_sequence,
            entries = batch.events.len(),
            "normalizing ledger batch"
        );
        if let (Some(first), Some(last)) = (batch.first_event_sequence, batch.last_event_sequence)
            && last < first
        {
            warn!(first, last, "ledger batch sequence range is inverted");
        }

        Ok(Normalized {
            events: batch.events.into_iter().map(LedgerEvent::normalize).collect(),
            summary: None,
        })
    }

    fn render(&self, outcome: &Outcome) -> Response {
        match outcome {
            Outcome::Handshake => StatusCode::OK.into_response(),
            Outcome::Rejected(_) => StatusCode::UNAUTHORIZED.into_response(),
            Outcome::Malformed(error) => json_response(
                StatusCode::BAD_REQUEST,
                WebhookAck {
                    success: false,
                    error: Some(error.clone()),
                    ..WebhookAck::default()
                },
            ),
            Outcome::Accepted { .. } | Outcome::Duplicate | Outcome::Ignored(_) => {
                json_response(
                    StatusCode::OK,
                    WebhookAck {
                        success: true,
                        ..WebhookAck::default()
                    },
                )
            }
            Outcome::Failed(error) => json_response(
                self.retry_policy().failure_status(),
                WebhookAck {
                    success: false,
                    error: Some(error.clone()),
                    ..WebhookAck::default()
                },
            ),
        }
    }
}
