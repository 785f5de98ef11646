//! Collaborators invoked after a webhook is accepted.
//!
//! The mailbox fetcher and the CRM record sync live outside this service;
//! they are reached over HTTP with a bounded client timeout.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("sync request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sync endpoint returned status {0}")]
    Status(u16),
    #[error("sync timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

/// Result of an incremental mailbox sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    #[serde(default)]
    pub messages_processed: i64,
    #[serde(default)]
    pub errors: i64,
}

/// Fetches the messages added to a delegated mailbox since `history_id`.
#[async_trait]
pub trait MailboxSync: Send + Sync {
    async fn sync_mailbox(
        &self,
        email_address: &str,
        history_id: &str,
    ) -> Result<SyncSummary, SyncError>;
}

/// Pushes a scrubbed CRM record to the downstream contact store.
#[async_trait]
pub trait ContactSync: Send + Sync {
    async fn sync_record(&self, family: &str, record: &Value) -> Result<(), SyncError>;
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, SyncError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

#[derive(Clone)]
pub struct HttpMailboxSync {
    client: reqwest::Client,
    url: String,
}

impl HttpMailboxSync {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl MailboxSync for HttpMailboxSync {
    async fn sync_mailbox(
        &self,
        email_address: &str,
        history_id: &str,
    ) -> Result<SyncSummary, SyncError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "emailAddress": email_address, "historyId": history_id }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }

        Ok(response.json::<SyncSummary>().await?)
    }
}

/// Used when no mailbox fetcher is configured; every push then records a
/// processing failure instead of silently claiming success.
pub struct UnconfiguredMailboxSync;

#[async_trait]
impl MailboxSync for UnconfiguredMailboxSync {
    async fn sync_mailbox(&self, _: &str, _: &str) -> Result<SyncSummary, SyncError> {
        Err(SyncError::NotConfigured("MAILBOX_SYNC_URL"))
    }
}

#[derive(Clone)]
pub struct HttpContactSync {
    client: reqwest::Client,
    url: String,
}

impl HttpContactSync {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ContactSync for HttpContactSync {
    async fn sync_record(&self, family: &str, record: &Value) -> Result<(), SyncError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "family": family, "record": record }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }

        Ok(())
    }
}

/// The canonical event written by the CRM adapter is the only copy kept
/// when no downstream store is configured.
pub struct StoreOnlyContactSync;

#[async_trait]
impl ContactSync for StoreOnlyContactSync {
    async fn sync_record(&self, family: &str, _: &Value) -> Result<(), SyncError> {
        debug!(family, "no downstream contact sync configured");
        Ok(())
    }
}
