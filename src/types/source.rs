use serde::{Deserialize, Serialize};
use specta::Type;

/// External platform a webhook delivery or canonical event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Ledger,
    Crm,
    EmailPush,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Ledger => "ledger",
            Source::Crm => "crm",
            Source::EmailPush => "email_push",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ledger" => Some(Source::Ledger),
            "crm" => Some(Source::Crm),
            "email_push" => Some(Source::EmailPush),
            _ => None,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
