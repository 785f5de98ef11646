//! Email push notifications (Pub/Sub push style).
//!
//! The envelope carries base64 JSON `{emailAddress, historyId}`. Only
//! delegated mailboxes are processed; the actual message fetch is delegated to
//! the [`MailboxSync`] collaborator. Every business failure is answered with
//! 200 because the provider's redelivery storm is worse than a missed push.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{http::StatusCode, response::Response};
use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    AdapterError, InboundRequest, Normalized, Outcome, Parsed, RetryPolicy, SourceAdapter,
    Verification, json_response, parse_provider_time, scalar_text,
};
use crate::signature::{Allowlist, constant_time_eq, normalize_identity};
use crate::store::NewEvent;
use crate::sync::{MailboxSync, SyncError};
use crate::types::{EmailPushAck, EventAction, Source};

pub const TOKEN_QUERY_PARAM: &str = "token";

#[derive(Debug, Deserialize)]
struct PushEnvelope {
    message: PushMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushMessage {
    data: String,
    #[serde(default, alias = "message_id")]
    message_id: Option<String>,
    #[serde(default, alias = "publish_time")]
    publish_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxNotification {
    pub email_address: String,
    pub history_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailPushEnvelope {
    pub notification: MailboxNotification,
    pub message_id: Option<String>,
    pub publish_time: Option<String>,
}

/// Decodes the push `data` field. Standard and URL-safe alphabets are both
/// accepted, with or without padding.
pub fn decode_notification(data: &str) -> Result<MailboxNotification, AdapterError> {
    let data = data.trim();
    let bytes = [&STANDARD, &URL_SAFE, &STANDARD_NO_PAD, &URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(data).ok())
        .ok_or_else(|| AdapterError::Malformed("message data is not base64".to_string()))?;

    let decoded: Value = serde_json::from_slice(&bytes)
        .map_err(|err| AdapterError::Malformed(format!("message data is not JSON: {err}")))?;

    let email_address = decoded
        .get("emailAddress")
        .and_then(Value::as_str)
        .map(normalize_identity)
        .filter(|address| !address.is_empty())
        .ok_or_else(|| AdapterError::Malformed("missing emailAddress".to_string()))?;
    let history_id = decoded
        .get("historyId")
        .and_then(scalar_text)
        .ok_or_else(|| AdapterError::Malformed("missing historyId".to_string()))?;

    Ok(MailboxNotification {
        email_address,
        history_id,
    })
}

pub struct EmailPushAdapter {
    allowlist: Allowlist,
    push_token: Option<String>,
    sync: Arc<dyn MailboxSync>,
    timeout: Duration,
}

impl EmailPushAdapter {
    pub fn new(
        allowlist: Allowlist,
        push_token: Option<String>,
        sync: Arc<dyn MailboxSync>,
        timeout: Duration,
    ) -> Self {
        Self {
            allowlist,
            push_token,
            sync,
            timeout,
        }
    }
}

#[async_trait]
impl SourceAdapter for EmailPushAdapter {
    type Envelope = EmailPushEnvelope;

    fn source(&self) -> Source {
        Source::EmailPush
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::AlwaysAcknowledge
    }

    fn event_type_hint(&self, _: &Value) -> Option<String> {
        Some("mailbox.push".to_string())
    }

    fn verify_signature(&self, request: &InboundRequest) -> Verification {
        let Some(expected) = &self.push_token else {
            return Verification::Deferred;
        };
        let provided = request
            .query
            .get(TOKEN_QUERY_PARAM)
            .map(String::as_str)
            .unwrap_or_default();
        if !provided.is_empty() && constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
            Verification::Verified
        } else {
            Verification::Rejected("invalid push token")
        }
    }

    fn parse(&self, request: &InboundRequest) -> Result<Parsed<EmailPushEnvelope>, AdapterError> {
        let envelope: PushEnvelope = serde_json::from_slice(&request.body)
            .map_err(|err| AdapterError::Malformed(format!("invalid push envelope: {err}")))?;
        let notification = decode_notification(&envelope.message.data)?;

        if !self.allowlist.contains(&notification.email_address) {
            return Ok(Parsed::Ignored(format!(
                "mailbox {} is not delegated",
                notification.email_address
            )));
        }

        Ok(Parsed::Envelope(EmailPushEnvelope {
            notification,
            message_id: envelope.message.message_id,
            publish_time: envelope.message.publish_time,
        }))
    }

    fn dedup_key(&self, envelope: &EmailPushEnvelope) -> Option<String> {
        Some(format!(
            "email:{}:{}",
            envelope.notification.email_address, envelope.notification.history_id
        ))
    }

    async fn normalize(&self, envelope: EmailPushEnvelope) -> Result<Normalized, AdapterError> {
        let MailboxNotification {
            email_address,
            history_id,
        } = envelope.notification;

        let summary = tokio::time::timeout(
            self.timeout,
            self.sync.sync_mailbox(&email_address, &history_id),
        )
        .await
        .map_err(|_| SyncError::Timeout(self.timeout))??;

        let action = if summary.messages_processed > 0 {
            EventAction::Created
        } else {
            EventAction::Skipped
        };
        let dedup_key = format!("email:{email_address}:{history_id}");
        let occurred_at = envelope
            .publish_time
            .as_deref()
            .and_then(parse_provider_time);

        Ok(Normalized {
            events: vec![NewEvent {
                source: Source::EmailPush,
                event_type: "mailbox.history".to_string(),
                entity_type: "mailbox".to_string(),
                entity_id: email_address.clone(),
                action,
                payload: json!({
                    "email_address": email_address,
                    "history_id": history_id,
                    "message_id": envelope.message_id,
                    "messages_processed": summary.messages_processed,
                    "errors": summary.errors,
                }),
                dedup_key,
                occurred_at,
            }],
            summary: Some(summary),
        })
    }

    fn render(&self, outcome: &Outcome) -> Response {
        let (status, ack) = match outcome {
            Outcome::Accepted { summary, .. } => {
                let summary = summary.unwrap_or_default();
                (
                    StatusCode::OK,
                    EmailPushAck {
                        ok: true,
                        messages_processed: Some(summary.messages_processed),
                        errors: Some(summary.errors),
                        ..EmailPushAck::default()
                    },
                )
            }
            Outcome::Ignored(_) | Outcome::Handshake => (
                StatusCode::OK,
                EmailPushAck {
                    ok: true,
                    skipped: Some(true),
                    ..EmailPushAck::default()
                },
            ),
            Outcome::Duplicate => (
                StatusCode::OK,
                EmailPushAck {
                    ok: true,
                    skipped: Some(true),
                    duplicate: Some(true),
                    ..EmailPushAck::default()
                },
            ),
            Outcome::Rejected(reason) => (
                StatusCode::UNAUTHORIZED,
                EmailPushAck {
                    ok: false,
                    error: Some(reason.clone()),
                    ..EmailPushAck::default()
                },
            ),
            Outcome::Malformed(error) => (
                StatusCode::BAD_REQUEST,
                EmailPushAck {
                    ok: false,
                    error: Some(error.clone()),
                    ..EmailPushAck::default()
                },
            ),
            Outcome::Failed(error) => (
                self.retry_policy().failure_status(),
                EmailPushAck {
                    ok: false,
                    error: Some(error.clone()),
                    ..EmailPushAck::default()
                },
            ),
        };
        json_response(status, ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::UnconfiguredMailboxSync;
    use axum::body::Bytes;

    fn encoded(value: Value) -> String {
        STANDARD.encode(value.to_string())
    }

    fn adapter(allowed: &[&str], token: Option<&str>) -> EmailPushAdapter {
        EmailPushAdapter::new(
            Allowlist::new(allowed.iter().copied()),
            token.map(str::to_string),
            Arc::new(UnconfiguredMailboxSync),
            Duration::from_secs(1),
        )
    }

    fn request(data: &str) -> InboundRequest {
        InboundRequest {
            body: Bytes::from(
                json!({ "message": { "data": data, "messageId": "m-1" }, "subscription": "s" })
                    .to_string(),
            ),
            ..InboundRequest::default()
        }
    }

    #[test]
    fn decodes_numeric_and_string_history_ids() {
        let numeric = decode_notification(&encoded(
            json!({ "emailAddress": "Ops@Example.com", "historyId": 9876 }),
        ))
        .unwrap();
        assert_eq!(numeric.email_address, "ops@example.com");
        assert_eq!(numeric.history_id, "9876");

        let text = decode_notification(&encoded(
            json!({ "emailAddress": "ops@example.com", "historyId": "9877" }),
        ))
        .unwrap();
        assert_eq!(text.history_id, "9877");
    }

    #[test]
    fn decodes_url_safe_unpadded_data() {
        let data = URL_SAFE_NO_PAD
            .encode(json!({ "emailAddress": "a@b.co", "historyId": 1 }).to_string());
        assert!(decode_notification(&data).is_ok());
    }

    #[test]
    fn rejects_undecodable_or_incomplete_data() {
        assert!(decode_notification("***").is_err());
        assert!(decode_notification(&STANDARD.encode("not json")).is_err());
        assert!(decode_notification(&encoded(json!({ "historyId": 1 }))).is_err());
        assert!(decode_notification(&encoded(json!({ "emailAddress": "a@b.co" }))).is_err());
    }

    #[test]
    fn unknown_mailbox_is_ignored() {
        let parsed = adapter(&["ops@example.com"], None)
            .parse(&request(&encoded(
                json!({ "emailAddress": "stranger@example.com", "historyId": 1 }),
            )))
            .unwrap();
        assert!(matches!(parsed, Parsed::Ignored(_)));
    }

    #[test]
    fn delegated_mailbox_yields_envelope_and_key() {
        let adapter = adapter(&["ops@example.com"], None);
        let parsed = adapter
            .parse(&request(&encoded(
                json!({ "emailAddress": "ops@example.com", "historyId": 5 }),
            )))
            .unwrap();
        let Parsed::Envelope(envelope) = parsed else {
            panic!("expected envelope");
        };
        assert_eq!(envelope.message_id.as_deref(), Some("m-1"));
        assert_eq!(
            adapter.dedup_key(&envelope).as_deref(),
            Some("email:ops@example.com:5")
        );
    }

    #[test]
    fn push_token_is_enforced_only_when_configured() {
        let mut with_token = request("");
        with_token
            .query
            .insert(TOKEN_QUERY_PARAM.to_string(), "t0ken".to_string());

        assert_eq!(
            adapter(&[], None).verify_signature(&with_token),
            Verification::Deferred
        );
        assert_eq!(
            adapter(&[], Some("t0ken")).verify_signature(&with_token),
            Verification::Verified
        );
        assert_eq!(
            adapter(&[], Some("t0ken")).verify_signature(&request("")),
            Verification::Rejected("invalid push token")
        );
    }
}
