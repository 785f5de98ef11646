use serde::{Deserialize, Serialize};
use specta::Type;
use uuid::Uuid;

use super::Source;

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub source: Source,
    pub event_type: Option<String>,
    pub status: DeliveryStatus,
    pub raw_body: String,
    pub error: Option<String>,
    pub received_at: String,
    pub processed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Received,
    Processed,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Received => "received",
            DeliveryStatus::Processed => "processed",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "received" => Some(DeliveryStatus::Received),
            "processed" => Some(DeliveryStatus::Processed),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}
