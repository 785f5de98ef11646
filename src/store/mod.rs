//! SQLite persistence: the delivery audit log, request dedup claims, the
//! canonical event store and reaction records.
//!
//! All cross-request coordination goes through unique keys here; nothing in
//! the process keeps shared mutable state.

mod claims;
mod deliveries;
mod events;
mod reactions;

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

pub use claims::{claim_dedup_key, release_dedup_key};
pub use deliveries::{
    DeliveryCursor, ListDeliveriesParams, ListDeliveriesResult, close_delivery,
    list_deliveries, note_delivery_error, open_delivery,
};
pub use events::{IntegrationEvent, NewEvent, get_event, insert_event};
pub use reactions::{
    NewReaction, find_reaction, insert_dispatch_outside_cooldown, insert_suppressed,
};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("{0}")]
    NotFound(String),
    #[error("invalid stored data: {0}")]
    Parse(String),
}

/// Opens the pool used for the lifetime of the process and brings the schema
/// up to date.
pub async fn connect(database_url: &str) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    MIGRATOR
        .run(&pool)
        .await
        .map_err(|err| StoreError::Db(err.into()))?;

    Ok(pool)
}

/// Millisecond RFC 3339 in UTC; fixed width so stored strings sort
/// chronologically.
pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_uuid(field: &str, value: &str) -> Result<uuid::Uuid, StoreError> {
    uuid::Uuid::parse_str(value).map_err(|err| StoreError::Parse(format!("invalid {field}: {err}")))
}
