use std::path::PathBuf;
use std::time::Duration;

/// How the CRM proves a delivery came from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrmSignatureMode {
    /// The header carries the shared secret itself.
    Equality,
    /// The header carries a hex HMAC-SHA256 of the raw body.
    Hmac,
}

impl CrmSignatureMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "equality" | "shared_secret" => Some(CrmSignatureMode::Equality),
            "hmac" | "hmac_sha256" => Some(CrmSignatureMode::Hmac),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,

    pub ledger_webhook_key: Option<String>,
    pub crm_webhook_secret: Option<String>,
    pub crm_signature_mode: CrmSignatureMode,
    pub email_push_token: Option<String>,
    pub delegated_mailboxes: Vec<String>,

    pub events_react_secret: Option<String>,
    pub inspector_api_token: Option<String>,

    pub notify_webhook_url: Option<String>,
    pub mailbox_sync_url: Option<String>,
    pub crm_sync_url: Option<String>,
    pub outbound_timeout_ms: u64,

    pub reaction_rules_path: Option<PathBuf>,
    pub inline_reactor: bool,
    pub feed_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("DATABASE_URL") {
            config.database_url = value;
        }
        if let Ok(value) = std::env::var("INGEST_BIND_ADDR") {
            config.bind_addr = value;
        }

        config.ledger_webhook_key = non_empty_var("LEDGER_WEBHOOK_KEY");
        config.crm_webhook_secret = non_empty_var("CRM_WEBHOOK_SECRET");
        if let Ok(value) = std::env::var("CRM_SIGNATURE_MODE")
            && let Some(mode) = CrmSignatureMode::parse(&value)
        {
            config.crm_signature_mode = mode;
        }
        config.email_push_token = non_empty_var("EMAIL_PUSH_TOKEN");
        if let Ok(value) = std::env::var("EMAIL_DELEGATED_MAILBOXES") {
            config.delegated_mailboxes = parse_list(&value);
        }

        config.events_react_secret = non_empty_var("EVENTS_REACT_SECRET");
        config.inspector_api_token = non_empty_var("INSPECTOR_API_TOKEN");

        config.notify_webhook_url = non_empty_var("NOTIFY_WEBHOOK_URL");
        config.mailbox_sync_url = non_empty_var("MAILBOX_SYNC_URL");
        config.crm_sync_url = non_empty_var("CRM_SYNC_URL");
        if let Ok(value) = std::env::var("OUTBOUND_TIMEOUT_MS")
            && let Ok(parsed) = value.parse::<u64>()
        {
            config.outbound_timeout_ms = parsed.max(1);
        }

        config.reaction_rules_path = non_empty_var("REACTION_RULES_PATH").map(PathBuf::from);
        if let Ok(value) = std::env::var("INGEST_INLINE_REACTOR")
            && let Ok(parsed) = value.parse::<bool>()
        {
            config.inline_reactor = parsed;
        }
        if let Ok(value) = std::env::var("INGEST_FEED_CAPACITY")
            && let Ok(parsed) = value.parse::<usize>()
        {
            config.feed_capacity = parsed.max(1);
        }

        config
    }

    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_millis(self.outbound_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:ingest.db".to_string(),
            bind_addr: "127.0.0.1:3002".to_string(),
            ledger_webhook_key: None,
            crm_webhook_secret: None,
            crm_signature_mode: CrmSignatureMode::Equality,
            email_push_token: None,
            delegated_mailboxes: Vec::new(),
            events_react_secret: None,
            inspector_api_token: None,
            notify_webhook_url: None,
            mailbox_sync_url: None,
            crm_sync_url: None,
            outbound_timeout_ms: 10_000,
            reaction_rules_path: None,
            inline_reactor: true,
            feed_capacity: 1024,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
