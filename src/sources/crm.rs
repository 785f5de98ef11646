//! CRM webhooks: contact and opportunity changes.
//!
//! Governance-sensitive fields are stripped from the payload before anything
//! is stored or forwarded, including the raw audit row.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{http::StatusCode, response::Response};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{
    AdapterError, InboundRequest, Normalized, Outcome, Parsed, RetryPolicy, SourceAdapter,
    Verification, json_response, parse_provider_time, scalar_text,
};
use crate::config::CrmSignatureMode;
use crate::signature::{SignatureEncoding, verify_hmac, verify_shared_secret};
use crate::store::NewEvent;
use crate::sync::{ContactSync, SyncError};
use crate::types::{EventAction, Source, WebhookAck};

pub const SIGNATURE_HEADER: &str = "x-crm-signature";

/// Fields that never leave the community-held store.
pub const BLOCKED_FIELDS: &[&str] = &["elder_consent", "sacred_knowledge"];

const CUSTOM_FIELD_NAME_KEYS: &[&str] = &["key", "name", "fieldKey"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrmFamily {
    Contact,
    Opportunity,
}

impl CrmFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            CrmFamily::Contact => "contact",
            CrmFamily::Opportunity => "opportunity",
        }
    }

    /// Family of an event type such as `contact.updated`.
    pub fn of(event_type: &str) -> Option<Self> {
        let family = event_type.split('.').next()?.trim().to_ascii_lowercase();
        match family.as_str() {
            "contact" => Some(CrmFamily::Contact),
            "opportunity" => Some(CrmFamily::Opportunity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrmEnvelope {
    pub family: CrmFamily,
    pub event_type: String,
    pub entity_id: String,
    pub timestamp: String,
    /// Scrubbed and, for contacts, annotated with review flags.
    pub record: Value,
}

impl CrmEnvelope {
    pub fn dedup_key(&self) -> String {
        format!("crm:{}:{}:{}", self.entity_id, self.event_type, self.timestamp)
    }

    fn action(&self) -> EventAction {
        let verb = self
            .event_type
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if verb == "created" || verb == "create" {
            EventAction::Created
        } else {
            EventAction::Updated
        }
    }

    fn occurred_at(&self) -> Option<DateTime<Utc>> {
        if let Ok(millis) = self.timestamp.parse::<i64>() {
            return DateTime::from_timestamp_millis(millis);
        }
        parse_provider_time(&self.timestamp)
    }
}

/// Removes blocked fields at any depth: as object keys, and as custom-field
/// list entries (`[{"key": "sacred_knowledge", "value": ...}]`).
pub fn scrub_governed_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for field in BLOCKED_FIELDS {
                map.remove(*field);
            }
            for nested in map.values_mut() {
                scrub_governed_fields(nested);
            }
        }
        Value::Array(items) => {
            items.retain(|item| !names_blocked_field(item));
            for item in items.iter_mut() {
                scrub_governed_fields(item);
            }
        }
        _ => {}
    }
}

fn names_blocked_field(item: &Value) -> bool {
    let Some(map) = item.as_object() else {
        return false;
    };
    CUSTOM_FIELD_NAME_KEYS.iter().any(|key| {
        map.get(*key)
            .and_then(Value::as_str)
            .is_some_and(|name| BLOCKED_FIELDS.contains(&name.trim()))
    })
}

/// Why a contact needs human cultural review before any outreach, if it does.
pub fn review_reason(contact: &Value) -> Option<String> {
    let tags: Vec<String> = contact
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(|tag| tag.trim().to_ascii_lowercase())
                .collect()
        })
        .unwrap_or_default();

    if tags.iter().any(|tag| tag == "role:elder" || tag.contains("elder")) {
        return Some("contact is tagged as an Elder".to_string());
    }
    if custom_field_is_set(contact, "elder_review_required") {
        return Some("contact has elder_review_required set".to_string());
    }
    let cultural: Vec<&str> = tags
        .iter()
        .filter(|tag| tag.starts_with("cultural:"))
        .map(String::as_str)
        .collect();
    if !cultural.is_empty() {
        return Some(format!("contact has cultural tags: {}", cultural.join(", ")));
    }
    None
}

fn custom_field_is_set(contact: &Value, name: &str) -> bool {
    let truthy = |value: &Value| match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => matches!(text.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(number) => number.as_i64().is_some_and(|n| n != 0),
        _ => false,
    };

    if contact.get(name).is_some_and(truthy) {
        return true;
    }
    match contact.get("customFields") {
        Some(Value::Object(fields)) => fields.get(name).is_some_and(truthy),
        Some(Value::Array(fields)) => fields.iter().any(|field| {
            CUSTOM_FIELD_NAME_KEYS.iter().any(|key| {
                field.get(*key).and_then(Value::as_str) == Some(name)
            }) && field.get("value").is_some_and(truthy)
        }),
        _ => false,
    }
}

fn annotate_review(record: &mut Value) {
    let reason = review_reason(record);
    if let Value::Object(map) = record {
        map.insert("review_required".to_string(), Value::Bool(reason.is_some()));
        map.insert(
            "review_reason".to_string(),
            reason.map(Value::String).unwrap_or(Value::Null),
        );
    }
}

/// Picks the entity record out of the envelope: `data`, then the family-named
/// object, then the envelope itself.
fn extract_record(body: &Map<String, Value>, family: CrmFamily) -> Value {
    if let Some(Value::Object(data)) = body.get("data") {
        return Value::Object(data.clone());
    }
    if let Some(Value::Object(record)) = body.get(family.as_str()) {
        return Value::Object(record.clone());
    }
    Value::Object(body.clone())
}

fn extract_entity_id(body: &Map<String, Value>, record: &Value, family: CrmFamily) -> Option<String> {
    let family_id_key = match family {
        CrmFamily::Contact => "contactId",
        CrmFamily::Opportunity => "opportunityId",
    };
    record
        .get("id")
        .and_then(scalar_text)
        .or_else(|| body.get(family_id_key).and_then(scalar_text))
        .or_else(|| body.get("id").and_then(scalar_text))
}

pub struct CrmAdapter {
    secret: Option<String>,
    mode: CrmSignatureMode,
    sync: Arc<dyn ContactSync>,
    timeout: Duration,
}

impl CrmAdapter {
    pub fn new(
        secret: Option<String>,
        mode: CrmSignatureMode,
        sync: Arc<dyn ContactSync>,
        timeout: Duration,
    ) -> Self {
        Self {
            secret,
            mode,
            sync,
            timeout,
        }
    }

    fn ack(status: StatusCode, ack: WebhookAck) -> Response {
        json_response(status, ack)
    }
}

#[async_trait]
impl SourceAdapter for CrmAdapter {
    type Envelope = CrmEnvelope;

    fn source(&self) -> Source {
        Source::Crm
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::RequestRedelivery
    }

    fn event_type_hint(&self, body: &Value) -> Option<String> {
        body.get("type")
            .or_else(|| body.get("event"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn audit_body(&self, request: &InboundRequest) -> String {
        match serde_json::from_slice::<Value>(&request.body) {
            Ok(mut body) => {
                scrub_governed_fields(&mut body);
                body.to_string()
            }
            // Unparseable bodies cannot be scrubbed field by field.
            Err(_) => "[unparseable body withheld]".to_string(),
        }
    }

    fn verify_signature(&self, request: &InboundRequest) -> Verification {
        let Some(secret) = &self.secret else {
            return Verification::Unconfigured;
        };
        let header = request.header(SIGNATURE_HEADER);
        let valid = match self.mode {
            CrmSignatureMode::Equality => verify_shared_secret(header, secret),
            CrmSignatureMode::Hmac => verify_hmac(
                &request.body,
                header,
                secret.as_bytes(),
                SignatureEncoding::Hex,
            ),
        };
        if valid {
            Verification::Verified
        } else {
            Verification::Rejected("invalid crm signature")
        }
    }

    fn parse(&self, request: &InboundRequest) -> Result<Parsed<CrmEnvelope>, AdapterError> {
        let body: Value = serde_json::from_slice(&request.body)
            .map_err(|err| AdapterError::Malformed(format!("invalid JSON body: {err}")))?;
        let Value::Object(mut body) = body else {
            return Err(AdapterError::Malformed(
                "body must be a JSON object".to_string(),
            ));
        };

        let event_type = body
            .get("type")
            .or_else(|| body.get("event"))
            .and_then(scalar_text)
            .ok_or_else(|| AdapterError::Malformed("missing event type".to_string()))?;

        let Some(family) = CrmFamily::of(&event_type) else {
            return Ok(Parsed::Ignored(format!(
                "unsupported crm event family: {event_type}"
            )));
        };

        for field in BLOCKED_FIELDS {
            body.remove(*field);
        }
        let mut record = extract_record(&body, family);
        scrub_governed_fields(&mut record);

        let entity_id = extract_entity_id(&body, &record, family)
            .ok_or_else(|| AdapterError::Malformed(format!("missing {} id", family.as_str())))?;
        let timestamp = body
            .get("timestamp")
            .or_else(|| body.get("dateAdded"))
            .and_then(scalar_text)
            .ok_or_else(|| AdapterError::Malformed("missing timestamp".to_string()))?;

        if family == CrmFamily::Contact {
            annotate_review(&mut record);
        }

        Ok(Parsed::Envelope(CrmEnvelope {
            family,
            event_type,
            entity_id,
            timestamp,
            record,
        }))
    }

    fn dedup_key(&self, envelope: &CrmEnvelope) -> Option<String> {
        Some(envelope.dedup_key())
    }

    async fn normalize(&self, envelope: CrmEnvelope) -> Result<Normalized, AdapterError> {
        tokio::time::timeout(
            self.timeout,
            self.sync.sync_record(envelope.family.as_str(), &envelope.record),
        )
        .await
        .map_err(|_| SyncError::Timeout(self.timeout))??;

        let action = envelope.action();
        let occurred_at = envelope.occurred_at();
        let dedup_key = envelope.dedup_key();

        Ok(Normalized {
            events: vec![NewEvent {
                source: Source::Crm,
                event_type: envelope.event_type,
                entity_type: envelope.family.as_str().to_string(),
                entity_id: envelope.entity_id,
                action,
                payload: envelope.record,
                dedup_key,
                occurred_at,
            }],
            summary: None,
        })
    }

    fn render(&self, outcome: &Outcome) -> Response {
        match outcome {
            Outcome::Accepted { .. } | Outcome::Handshake => Self::ack(
                StatusCode::OK,
                WebhookAck {
                    success: true,
                    ..WebhookAck::default()
                },
            ),
            Outcome::Duplicate => Self::ack(
                StatusCode::OK,
                WebhookAck {
                    success: true,
                    skipped: Some(true),
                    duplicate: Some(true),
                    ..WebhookAck::default()
                },
            ),
            Outcome::Ignored(_) => Self::ack(
                StatusCode::OK,
                WebhookAck {
                    success: true,
                    skipped: Some(true),
                    ..WebhookAck::default()
                },
            ),
            Outcome::Rejected(reason) => Self::ack(
                StatusCode::UNAUTHORIZED,
                WebhookAck {
                    success: false,
                    error: Some(reason.clone()),
                    ..WebhookAck::default()
                },
            ),
            Outcome::Malformed(error) => Self::ack(
                StatusCode::BAD_REQUEST,
                WebhookAck {
                    success: false,
                    error: Some(error.clone()),
                    ..WebhookAck::default()
                },
            ),
            Outcome::Failed(error) => Self::ack(
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
