use serde::{Deserialize, Serialize};
use specta::Type;

/// Normalized verb of a canonical event. `Skipped` and `Failed` record an
/// explicit non-happening so that missing data is never ambiguous.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Created,
    Updated,
    Skipped,
    Failed,
}

impl EventAction {
    pub fn as_str(self) -> &'static str {
        match self {
            EventAction::Created => "created",
            EventAction::Updated => "updated",
            EventAction::Skipped => "skipped",
            EventAction::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(EventAction::Created),
            "updated" => Some(EventAction::Updated),
            "skipped" => Some(EventAction::Skipped),
            "failed" => Some(EventAction::Failed),
            _ => None,
        }
    }
}
