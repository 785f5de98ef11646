#![allow(clippy::expect_used, clippy::unwrap_used, dead_code)]

use std::fs;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::AUTHORIZATION},
};
use http_body_util::BodyExt;
use ingest::{
    config::{AppConfig, CrmSignatureMode},
    notify::{Notification, Notifier, NotifyError},
    reactor::{RuleSet, default_rules},
    router,
    state::{AppState, Services},
    store::IntegrationEvent,
    sync::{ContactSync, MailboxSync, SyncError, SyncSummary},
};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tower::ServiceExt;

pub const LEDGER_KEY: &str = "ledger-signing-key";
pub const CRM_SECRET: &str = "crm-shared-secret";
pub const PUSH_TOKEN: &str = "push-token";
pub const REACT_SECRET: &str = "react-secret";
pub const INSPECTOR_TOKEN: &str = "inspector-token";
pub const MAILBOX: &str = "ops@example.org";

pub struct TestDb {
    pub pool: sqlx::SqlitePool,
    _db_file: NamedTempFile,
}

pub async fn setup_db() -> TestDb {
    let db_file = NamedTempFile::new().expect("create temp sqlite file");
    let options = SqliteConnectOptions::new()
        .filename(db_file.path())
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let mut conn = sqlx::SqliteConnection::connect_with(&options)
        .await
        .expect("connect sqlite");

    let mut entries: Vec<_> = fs::read_dir("migrations")
        .expect("read migrations dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|ext| ext.to_str()) == Some("sql"))
        .collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let contents = fs::read_to_string(entry.path()).expect("read migration");
        for stmt in contents.split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt)
                    .execute(&mut conn)
                    .await
                    .expect("run migration");
            }
        }
    }

    use sqlx::Connection;
    conn.close().await.expect("close migration conn");

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .expect("connect pool");

    TestDb {
        pool,
        _db_file: db_file,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fake collaborators
// ─────────────────────────────────────────────────────────────────────────────

pub struct FakeMailboxSync {
    pub calls: AtomicUsize,
    pub summary: Mutex<Result<SyncSummary, u16>>,
}

impl FakeMailboxSync {
    pub fn returning(messages_processed: i64, errors: i64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            summary: Mutex::new(Ok(SyncSummary {
                messages_processed,
                errors,
            })),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            summary: Mutex::new(Err(status)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailboxSync for FakeMailboxSync {
    async fn sync_mailbox(&self, _: &str, _: &str) -> Result<SyncSummary, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = *self.summary.lock().unwrap();
        result.map_err(SyncError::Status)
    }
}

pub struct FakeContactSync {
    pub records: Mutex<Vec<(String, Value)>>,
    pub fail_with: Mutex<Option<u16>>,
    pub delay: Duration,
}

impl FakeContactSync {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
            delay: Duration::ZERO,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    pub fn fail_next(&self, status: Option<u16>) {
        *self.fail_with.lock().unwrap() = status;
    }

    pub fn calls(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn last_record(&self) -> Option<Value> {
        self.records.lock().unwrap().last().map(|(_, record)| record.clone())
    }
}

#[async_trait]
impl ContactSync for FakeContactSync {
    async fn sync_record(&self, family: &str, record: &Value) -> Result<(), SyncError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(status) = *self.fail_with.lock().unwrap() {
            return Err(SyncError::Status(status));
        }
        self.records
            .lock()
            .unwrap()
            .push((family.to_string(), record.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        if self.fail {
            return Err(NotifyError::Status(503));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// App wiring
// ─────────────────────────────────────────────────────────────────────────────

pub fn test_config() -> AppConfig {
    AppConfig {
        ledger_webhook_key: Some(LEDGER_KEY.to_string()),
        crm_webhook_secret: Some(CRM_SECRET.to_string()),
        crm_signature_mode: CrmSignatureMode::Equality,
        email_push_token: Some(PUSH_TOKEN.to_string()),
        delegated_mailboxes: vec![MAILBOX.to_string()],
        events_react_secret: Some(REACT_SECRET.to_string()),
        inspector_api_token: Some(INSPECTOR_TOKEN.to_string()),
        outbound_timeout_ms: 2_000,
        inline_reactor: false,
        ..AppConfig::default()
    }
}

pub struct TestApp {
    pub db: TestDb,
    pub state: AppState,
    pub app: Router,
    pub mailbox: Arc<FakeMailboxSync>,
    pub contacts: Arc<FakeContactSync>,
    pub notifier: Arc<RecordingNotifier>,
    pub feed: Option<mpsc::Receiver<IntegrationEvent>>,
}

pub struct TestAppBuilder {
    config: AppConfig,
    rules: Option<RuleSet>,
    mailbox: Arc<FakeMailboxSync>,
    contacts: Arc<FakeContactSync>,
    notifier: Arc<RecordingNotifier>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        Self {
            config: test_config(),
            rules: None,
            mailbox: Arc::new(FakeMailboxSync::returning(3, 0)),
            contacts: Arc::new(FakeContactSync::new()),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn config(mut self, edit: impl FnOnce(&mut AppConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn mailbox(mut self, mailbox: FakeMailboxSync) -> Self {
        self.mailbox = Arc::new(mailbox);
        self
    }

    pub fn contacts(mut self, contacts: FakeContactSync) -> Self {
        self.contacts = Arc::new(contacts);
        self
    }

    pub fn notifier(mut self, notifier: RecordingNotifier) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    pub async fn build(self) -> TestApp {
        let db = setup_db().await;
        let rules = match self.rules {
            Some(rules) => rules,
            None => default_rules().unwrap(),
        };
        let services = Services {
            mailbox_sync: self.mailbox.clone(),
            contact_sync: self.contacts.clone(),
            notifier: self.notifier.clone(),
        };
        let (state, feed) = AppState::build(db.pool.clone(), &self.config, rules, services);
        let app = router(state.clone());

        TestApp {
            db,
            state,
            app,
            mailbox: self.mailbox,
            contacts: self.contacts,
            notifier: self.notifier,
            feed,
        }
    }
}

pub async fn spawn_app() -> TestApp {
    TestAppBuilder::new().build().await
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

pub fn post(uri: &str, body: impl Into<String>, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.into())).unwrap()
}

pub fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

/// Sends a request and returns the status with the JSON body (`Null` when
/// the body is empty).
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

pub async fn count(pool: &sqlx::SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(sql)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn delivery_statuses(pool: &sqlx::SqlitePool) -> Vec<(String, Option<String>)> {
    sqlx::query_as::<_, (String, Option<String>)>(
        "SELECT status, error FROM webhook_deliveries ORDER BY received_at, rowid",
    )
    .fetch_all(pool)
    .await
    .unwrap()
}
