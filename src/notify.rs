//! Outbound alert channel.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification endpoint returned status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub event_id: Uuid,
    pub rule_name: String,
    pub message: String,
    pub suggested_actions: Vec<String>,
}

impl Notification {
    /// Plain-text rendering used by chat channels.
    pub fn text(&self) -> String {
        let mut text = self.message.clone();
        if !self.suggested_actions.is_empty() {
            text.push_str("\nSuggested actions:");
            for action in &self.suggested_actions {
                text.push_str("\n• ");
                text.push_str(action);
            }
        }
        text
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Posts `{"text": ...}` to an incoming-webhook URL of a chat workspace.
#[derive(Clone)]
pub struct ChatWebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl ChatWebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for ChatWebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "text": notification.text() }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        Ok(())
    }
}

/// Writes alerts to the log when no channel is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            event_id = %notification.event_id,
            rule = %notification.rule_name,
            "{}",
            notification.text()
        );
        Ok(())
    }
}
