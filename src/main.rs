use std::net::SocketAddr;
use std::sync::Arc;

use ingest::{
    config::AppConfig,
    notify::{ChatWebhookNotifier, LogNotifier, Notifier},
    reactor::{default_rules, load_rules_file},
    router,
    state::{AppState, Services},
    store,
    sync::{
        ContactSync, HttpContactSync, HttpMailboxSync, MailboxSync, StoreOnlyContactSync,
        UnconfiguredMailboxSync,
    },
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ingest=info,tower_http=info")),
        )
        .init();

    let config = AppConfig::from_env();
    let pool = store::connect(&config.database_url).await?;

    let rules = match &config.reaction_rules_path {
        Some(path) => load_rules_file(path)?,
        None => default_rules()?,
    };
    info!(count = rules.len(), "loaded reaction rules");

    let services = build_services(&config)?;
    let (state, feed) = AppState::build(pool, &config, rules, services);

    if let Some(feed) = feed {
        tokio::spawn(state.reactor.clone().run_feed(feed));
    } else {
        info!("inline reactor disabled; events react only through /events/react");
    }

    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn build_services(config: &AppConfig) -> Result<Services, Box<dyn std::error::Error>> {
    let timeout = config.outbound_timeout();

    let mailbox_sync: Arc<dyn MailboxSync> = match &config.mailbox_sync_url {
        Some(url) => Arc::new(HttpMailboxSync::new(url, timeout)?),
        None => {
            warn!("MAILBOX_SYNC_URL not set; email pushes will be acknowledged as failed");
            Arc::new(UnconfiguredMailboxSync)
        }
    };
    let contact_sync: Arc<dyn ContactSync> = match &config.crm_sync_url {
        Some(url) => Arc::new(HttpContactSync::new(url, timeout)?),
        None => Arc::new(StoreOnlyContactSync),
    };
    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(ChatWebhookNotifier::new(url, timeout)?),
        None => {
            warn!("NOTIFY_WEBHOOK_URL not set; reactions are written to the log");
            Arc::new(LogNotifier)
        }
    };

    Ok(Services {
        mailbox_sync,
        contact_sync,
        notifier,
    })
}
