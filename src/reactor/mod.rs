//! Reacts to newly stored events: first matching rule, per-entity cooldown,
//! at most one reaction record per event, then a best-effort notification.

pub mod catalog;
pub mod rules;
pub mod template;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::notify::{Notification, Notifier};
use crate::store::{self, IntegrationEvent, NewReaction, StoreError};
use crate::types::{EventAction, ReactionOutcome};

pub use catalog::default_rules;
pub use rules::{Field, Predicate, ReactionRule, RuleError, RuleSet, load_rules_file};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    SkippedFailedEvent,
    AlreadyReacted,
    NoMatch,
    Suppressed { rule_name: String },
    Dispatched { rule_name: String },
    /// The record was written; only the notification failed.
    DispatchFailed { rule_name: String, error: String },
}

impl Reaction {
    pub fn outcome(&self) -> ReactionOutcome {
        match self {
            Reaction::SkippedFailedEvent => ReactionOutcome::SkippedFailedEvent,
            Reaction::AlreadyReacted => ReactionOutcome::AlreadyReacted,
            Reaction::NoMatch => ReactionOutcome::NoMatch,
            Reaction::Suppressed { .. } => ReactionOutcome::Suppressed,
            Reaction::Dispatched { .. } => ReactionOutcome::Dispatched,
            Reaction::DispatchFailed { .. } => ReactionOutcome::DispatchFailed,
        }
    }

    pub fn rule_name(&self) -> Option<&str> {
        match self {
            Reaction::Suppressed { rule_name }
            | Reaction::Dispatched { rule_name }
            | Reaction::DispatchFailed { rule_name, .. } => Some(rule_name),
            _ => None,
        }
    }
}

pub struct Reactor {
    pool: SqlitePool,
    rules: RuleSet,
    notifier: Arc<dyn Notifier>,
    dispatch_timeout: Duration,
}

impl Reactor {
    pub fn new(
        pool: SqlitePool,
        rules: RuleSet,
        notifier: Arc<dyn Notifier>,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            rules,
            notifier,
            dispatch_timeout,
        }
    }

    pub async fn react(&self, event: &IntegrationEvent) -> Result<Reaction, StoreError> {
        self.react_at(event, Utc::now()).await
    }

    /// Same as [`Reactor::react`] with an explicit clock, so cooldown
    /// windows can be exercised deterministically.
    pub async fn react_at(
        &self,
        event: &IntegrationEvent,
        now: DateTime<Utc>,
    ) -> Result<Reaction, StoreError> {
        if event.action == EventAction::Failed {
            return Ok(Reaction::SkippedFailedEvent);
        }

        if store::find_reaction(&self.pool, event.id).await?.is_some() {
            return Ok(Reaction::AlreadyReacted);
        }

        let Some(rule) = self.rules.first_match(event) else {
            return Ok(Reaction::NoMatch);
        };

        let message = template::render(&rule.template, event);
        let reaction = NewReaction {
            event_id: event.id,
            rule_name: rule.name.clone(),
            priority: rule.priority,
            entity_key: event.entity_key(),
            message: message.clone(),
            reacted_at: now,
        };

        let won = store::insert_dispatch_outside_cooldown(
            &self.pool,
            &reaction,
            cooldown_start(now, rule.cooldown_secs),
        )
        .await?;

        if !won {
            // Either another reactor recorded this event first, or the
            // (rule, entity) pair is cooling down.
            if store::find_reaction(&self.pool, event.id).await?.is_some() {
                return Ok(Reaction::AlreadyReacted);
            }
            if !store::insert_suppressed(&self.pool, &reaction).await? {
                return Ok(Reaction::AlreadyReacted);
            }
            return Ok(Reaction::Suppressed {
                rule_name: rule.name.clone(),
            });
        }

        let notification = Notification {
            event_id: event.id,
            rule_name: rule.name.clone(),
            message,
            suggested_actions: rule.suggested_actions.clone(),
        };

        let sent = match tokio::time::timeout(self.dispatch_timeout, self.notifier.send(&notification)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!(
                "notification timed out after {}ms",
                self.dispatch_timeout.as_millis()
            )),
        };

        match sent {
            Ok(()) => Ok(Reaction::Dispatched {
                rule_name: rule.name.clone(),
            }),
            Err(error) => {
                warn!(event_id = %event.id, rule = %rule.name, error = %error, "reaction dispatch failed");
                Ok(Reaction::DispatchFailed {
                    rule_name: rule.name.clone(),
                    error,
                })
            }
        }
    }

    /// Drains the in-process change feed until every sender is gone.
    pub async fn run_feed(self: Arc<Self>, mut feed: mpsc::Receiver<IntegrationEvent>) {
        while let Some(event) = feed.recv().await {
            match self.react(&event).await {
                Ok(reaction) => log_reaction(&event, &reaction),
                Err(err) => {
                    error!(event_id = %event.id, error = %err, "failed to react to event");
                }
            }
        }
        debug!("change feed closed; reactor stopped");
    }
}

pub fn log_reaction(event: &IntegrationEvent, reaction: &Reaction) {
    match reaction {
        Reaction::Dispatched { rule_name } => {
            info!(event_id = %event.id, rule = %rule_name, entity = %event.entity_key(), "reaction dispatched");
        }
        Reaction::Suppressed { rule_name } => {
            info!(event_id = %event.id, rule = %rule_name, entity = %event.entity_key(), "reaction suppressed by cooldown");
        }
        Reaction::DispatchFailed { .. } => {}
        other => {
            debug!(event_id = %event.id, outcome = ?other.outcome(), "no reaction");
        }
    }
}

fn cooldown_start(now: DateTime<Utc>, cooldown_secs: u64) -> DateTime<Utc> {
    i64::try_from(cooldown_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
