use serde::{Deserialize, Serialize};
use specta::Type;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct ReactionRecord {
    pub event_id: Uuid,
    pub rule_name: String,
    pub priority: i64,
    /// Cooldown scope, `{entity_type}:{entity_id}`.
    pub entity_key: String,
    pub status: ReactionStatus,
    pub message: String,
    pub dispatched_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReactionStatus {
    Dispatched,
    Suppressed,
}

impl ReactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReactionStatus::Dispatched => "dispatched",
            ReactionStatus::Suppressed => "suppressed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "dispatched" => Some(ReactionStatus::Dispatched),
            "suppressed" => Some(ReactionStatus::Suppressed),
            _ => None,
        }
    }
}
