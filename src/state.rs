use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::AppConfig;
use crate::notify::Notifier;
use crate::processor::WebhookProcessor;
use crate::reactor::{Reactor, RuleSet};
use crate::signature::Allowlist;
use crate::sources::{CrmAdapter, EmailPushAdapter, LedgerAdapter};
use crate::store::IntegrationEvent;
use crate::sync::{ContactSync, MailboxSync};

/// Added to the outbound timeout to get the age after which an unfinished
/// dedup claim may be taken over by a redelivery.
const CLAIM_TTL_MARGIN: Duration = Duration::from_secs(30);

/// Outbound collaborators, injected so tests can substitute fakes.
#[derive(Clone)]
pub struct Services {
    pub mailbox_sync: Arc<dyn MailboxSync>,
    pub contact_sync: Arc<dyn ContactSync>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub processor: WebhookProcessor,
    pub ledger: Arc<LedgerAdapter>,
    pub crm: Arc<CrmAdapter>,
    pub email_push: Arc<EmailPushAdapter>,
    pub reactor: Arc<Reactor>,
    pub events_react_secret: Option<String>,
    pub inspector_api_token: Option<String>,
}

impl AppState {
    /// Wires adapters, processor and reactor. When the inline reactor is
    /// enabled the returned receiver must be drained with
    /// [`Reactor::run_feed`].
    pub fn build(
        pool: SqlitePool,
        config: &AppConfig,
        rules: RuleSet,
        services: Services,
    ) -> (Self, Option<mpsc::Receiver<IntegrationEvent>>) {
        let timeout = config.outbound_timeout();

        let mailboxes = Allowlist::new(config.delegated_mailboxes.iter());
        if mailboxes.is_empty() {
            warn!("EMAIL_DELEGATED_MAILBOXES is empty; every email push will be skipped");
        }

        let mut processor =
            WebhookProcessor::new(pool.clone()).with_claim_ttl(timeout + CLAIM_TTL_MARGIN);
        let feed = if config.inline_reactor {
            let (tx, rx) = mpsc::channel(config.feed_capacity.max(1));
            processor = processor.with_feed(tx);
            Some(rx)
        } else {
            None
        };

        let state = Self {
            processor,
            ledger: Arc::new(LedgerAdapter::new(config.ledger_webhook_key.clone())),
            crm: Arc::new(CrmAdapter::new(
                config.crm_webhook_secret.clone(),
                config.crm_signature_mode,
                services.contact_sync,
                timeout,
            )),
            email_push: Arc::new(EmailPushAdapter::new(
                mailboxes,
                config.email_push_token.clone(),
                services.mailbox_sync,
                timeout,
            )),
            reactor: Arc::new(Reactor::new(pool.clone(), rules, services.notifier, timeout)),
            events_react_secret: config.events_react_secret.clone(),
            inspector_api_token: config.inspector_api_token.clone(),
            pool,
        };

        (state, feed)
    }
}
