//! Provider adapters driven by the generic webhook processor.
//!
//! Each adapter owns one provider's signing scheme, envelope format, dedup
//! key, retry contract and response shape. The processor owns the sequence.

pub mod crm;
pub mod email_push;
pub mod ledger;

use std::borrow::Cow;
use std::collections::HashMap;

use async_trait::async_trait;
use axum::{
    Json,
    body::Bytes,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::store::NewEvent;
use crate::sync::{SyncError, SyncSummary};
use crate::types::Source;

pub use crm::CrmAdapter;
pub use email_push::EmailPushAdapter;
pub use ledger::LedgerAdapter;

/// How a source wants processing failures reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Answer 200 even on internal failure. Used where a provider's retry
    /// storm does more harm than one missed event.
    AlwaysAcknowledge,
    /// Answer 500 so the provider redelivers later.
    RequestRedelivery,
}

impl RetryPolicy {
    pub fn failure_status(self) -> StatusCode {
        match self {
            RetryPolicy::AlwaysAcknowledge => StatusCode::OK,
            RetryPolicy::RequestRedelivery => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The parts of an HTTP delivery adapters may inspect.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Verified,
    /// No secret configured; the delivery is accepted unverified.
    Unconfigured,
    /// Sender identity is checked after parsing (allowlist sources).
    Deferred,
    Rejected(&'static str),
}

#[derive(Debug)]
pub enum Parsed<E> {
    Envelope(E),
    Handshake,
    /// Acknowledged but not for us: unsupported family, unknown mailbox.
    Ignored(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

#[derive(Debug, Default)]
pub struct Normalized {
    pub events: Vec<NewEvent>,
    pub summary: Option<SyncSummary>,
}

/// Result of one pass through the processor, rendered per source.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Rejected(String),
    Malformed(String),
    Handshake,
    Ignored(String),
    Duplicate,
    Accepted {
        inserted: usize,
        duplicates: usize,
        summary: Option<SyncSummary>,
    },
    Failed(String),
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    type Envelope: Send + 'static;

    fn source(&self) -> Source;

    fn retry_policy(&self) -> RetryPolicy;

    /// Best-effort event type for the audit row, read before verification.
    fn event_type_hint(&self, body: &Value) -> Option<String> {
        body.get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Body text written to the audit log. Sources carrying governed fields
    /// scrub them here, before the first storage write.
    fn audit_body(&self, request: &InboundRequest) -> String {
        request.body_text().into_owned()
    }

    fn verify_signature(&self, request: &InboundRequest) -> Verification;

    fn parse(&self, request: &InboundRequest) -> Result<Parsed<Self::Envelope>, AdapterError>;

    /// Request-level dedup key, claimed before `normalize` runs.
    fn dedup_key(&self, envelope: &Self::Envelope) -> Option<String>;

    async fn normalize(&self, envelope: Self::Envelope) -> Result<Normalized, AdapterError>;

    fn render(&self, outcome: &Outcome) -> Response;
}

pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    (status, Json(body)).into_response()
}

/// Parses provider timestamps: RFC 3339, or naive ISO 8601 taken as UTC.
pub(crate) fn parse_provider_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Reads a JSON scalar as text. Numbers keep their literal form.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
