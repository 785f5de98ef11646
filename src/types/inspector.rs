use serde::{Deserialize, Serialize};
use specta::Type;

use super::WebhookDelivery;

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct ListDeliveriesResponse {
    pub deliveries: Vec<WebhookDelivery>,
    pub next_before: Option<String>,
}
