//! The fixed ingest sequence shared by every source: audit, verify, parse,
//! claim, normalize, persist, close, render.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::response::Response;
use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::sources::{
    AdapterError, InboundRequest, Normalized, Outcome, Parsed, SourceAdapter, Verification,
};
use crate::store::{self, IntegrationEvent, StoreError};
use crate::types::DeliveryStatus;

/// Claim age after which an unfinished run is presumed dead.
const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct WebhookProcessor {
    pool: SqlitePool,
    feed: Option<mpsc::Sender<IntegrationEvent>>,
    claim_ttl: Duration,
}

impl WebhookProcessor {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            feed: None,
            claim_ttl: DEFAULT_CLAIM_TTL,
        }
    }

    /// Lets a redelivery take over a claim older than `ttl` whose delivery
    /// never finished. Keep it above the slowest adapter call.
    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = ttl;
        self
    }

    /// Publishes newly inserted events on `feed` for the in-process reactor.
    pub fn with_feed(mut self, feed: mpsc::Sender<IntegrationEvent>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Runs the delivery on its own task, so a provider that hangs up early
    /// cannot strand a claim half way through.
    pub async fn handle<A>(&self, adapter: Arc<A>, request: InboundRequest) -> Response
    where
        A: SourceAdapter + 'static,
    {
        let processor = self.clone();
        let task_adapter = Arc::clone(&adapter);
        let task = tokio::spawn(async move {
            processor.process(task_adapter.as_ref(), request).await
        });

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(source = %adapter.source(), error = %err, "webhook task did not complete");
                Outcome::Failed("internal processing error".to_string())
            }
        };
        adapter.render(&outcome)
    }

    /// Runs one delivery to completion. Never returns an error: every failure
    /// is folded into the outcome.
    pub async fn process<A: SourceAdapter>(&self, adapter: &A, request: InboundRequest) -> Outcome {
        let started = Instant::now();
        let source = adapter.source();

        let hint = serde_json::from_slice::<Value>(&request.body)
            .ok()
            .and_then(|body| adapter.event_type_hint(&body));
        let delivery_id = match store::open_delivery(
            &self.pool,
            source,
            hint.as_deref(),
            &adapter.audit_body(&request),
            Utc::now(),
        )
        .await
        {
            Ok(id) => id,
            Err(err) => {
                error!(%source, error = %err, "failed to record webhook delivery");
                return Outcome::Failed("failed to record delivery".to_string());
            }
        };

        match adapter.verify_signature(&request) {
            Verification::Verified => {}
            Verification::Unconfigured => {
                warn!(%source, %delivery_id, "no signing secret configured; accepting unverified delivery");
            }
            Verification::Deferred => {
                debug!(%source, %delivery_id, "sender identity checked after parsing");
            }
            Verification::Rejected(reason) => {
                warn!(%source, %delivery_id, reason, "rejected webhook delivery");
                if let Err(err) = store::note_delivery_error(&self.pool, delivery_id, reason).await {
                    error!(%source, %delivery_id, error = %err, "failed to annotate rejected delivery");
                }
                return Outcome::Rejected(reason.to_string());
            }
        }

        let envelope = match adapter.parse(&request) {
            Ok(Parsed::Envelope(envelope)) => envelope,
            Ok(Parsed::Handshake) => {
                info!(%source, %delivery_id, "answered webhook handshake");
                return self.finish(delivery_id, Outcome::Handshake).await;
            }
            Ok(Parsed::Ignored(reason)) => {
                info!(%source, %delivery_id, reason = %reason, "skipped webhook delivery");
                return self.finish(delivery_id, Outcome::Ignored(reason)).await;
            }
            Err(err) => {
                warn!(%source, %delivery_id, error = %err, "malformed webhook payload");
                return self.finish(delivery_id, Outcome::Malformed(err.to_string())).await;
            }
        };

        let claim = match adapter.dedup_key(&envelope) {
            Some(key) => {
                let now = Utc::now();
                let stale_before = TimeDelta::from_std(self.claim_ttl)
                    .ok()
                    .and_then(|ttl| now.checked_sub_signed(ttl))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                match store::claim_dedup_key(&self.pool, source, &key, delivery_id, now, stale_before)
                    .await
                {
                    Ok(true) => Some(key),
                    Ok(false) => {
                        info!(%source, %delivery_id, dedup_key = %key, "duplicate delivery skipped");
                        return self.finish(delivery_id, Outcome::Duplicate).await;
                    }
                    Err(err) => {
                        error!(%source, %delivery_id, error = %err, "failed to claim dedup key");
                        return self.finish(delivery_id, Outcome::Failed(err.to_string())).await;
                    }
                }
            }
            None => None,
        };

        let outcome = match AssertUnwindSafe(adapter.normalize(envelope))
            .catch_unwind()
            .await
        {
            Ok(Ok(normalized)) => self.persist(delivery_id, normalized, started).await,
            Ok(Err(err)) => {
                error!(%source, %delivery_id, error = %err, "webhook processing failed");
                Outcome::Failed(failure_message(&err))
            }
            Err(panic) => {
                error!(%source, %delivery_id, panic = %panic_message(&*panic), "webhook processing panicked");
                Outcome::Failed("internal processing error".to_string())
            }
        };

        if let (Outcome::Failed(_), Some(key)) = (&outcome, &claim)
            && let Err(err) = store::release_dedup_key(&self.pool, source, key, delivery_id).await
        {
            error!(%source, %delivery_id, error = %err, "failed to release dedup claim");
        }

        self.finish(delivery_id, outcome).await
    }

    async fn persist(&self, delivery_id: Uuid, normalized: Normalized, started: Instant) -> Outcome {
        let latency_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        let mut inserted = 0;
        let mut duplicates = 0;

        for event in &normalized.events {
            match store::insert_event(&self.pool, event, Some(delivery_id), latency_ms).await {
                Ok(Some(stored)) => {
                    inserted += 1;
                    debug!(
                        event_id = %stored.id,
                        entity = %stored.entity_key(),
                        action = stored.action.as_str(),
                        "stored integration event"
                    );
                    self.publish(stored);
                }
                Ok(None) => {
                    duplicates += 1;
                    debug!(dedup_key = %event.dedup_key, "event already stored");
                }
                Err(err) => {
                    error!(%delivery_id, error = %err, "failed to store integration event");
                    return Outcome::Failed(persist_message(&err));
                }
            }
        }

        Outcome::Accepted {
            inserted,
            duplicates,
            summary: normalized.summary,
        }
    }

    fn publish(&self, event: IntegrationEvent) {
        let Some(feed) = &self.feed else {
            return;
        };
        match feed.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(event_id = %event.id, "change feed full; event left for /events/react");
            }
            Err(TrySendError::Closed(event)) => {
                debug!(event_id = %event.id, "change feed closed");
            }
        }
    }

    async fn finish(&self, delivery_id: Uuid, outcome: Outcome) -> Outcome {
        let (status, error) = match &outcome {
            Outcome::Malformed(error) | Outcome::Failed(error) => {
                (DeliveryStatus::Failed, Some(error.as_str()))
            }
            Outcome::Ignored(reason) => (DeliveryStatus::Processed, Some(reason.as_str())),
            _ => (DeliveryStatus::Processed, None),
        };

        if let Err(err) = store::close_delivery(&self.pool, delivery_id, status, error).await {
            error!(%delivery_id, error = %err, "failed to close webhook delivery");
        }

        outcome
    }
}

fn failure_message(err: &AdapterError) -> String {
    match err {
        AdapterError::Malformed(message) => message.clone(),
        AdapterError::Sync(err) => err.to_string(),
    }
}

fn persist_message(err: &StoreError) -> String {
    match err {
        StoreError::Db(_) => "failed to store event".to_string(),
        other => other.to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let borrowed: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);

        assert_eq!(panic_message(&*borrowed), "boom");
        assert_eq!(panic_message(&*owned), "bang");
        assert_eq!(panic_message(&*other), "non-string panic payload");
    }
}
