#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use axum::http::StatusCode;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use common::{
    FakeMailboxSync, MAILBOX, PUSH_TOKEN, TestAppBuilder, count, delivery_statuses, post, send,
    spawn_app,
};
use serde_json::json;

fn uri() -> String {
    format!("/webhooks/email-push?token={PUSH_TOKEN}")
}

fn push(email: &str, history_id: serde_json::Value) -> String {
    let data = STANDARD.encode(json!({ "emailAddress": email, "historyId": history_id }).to_string());
    json!({
        "message": {
            "data": data,
            "messageId": "msg-1",
            "publishTime": "2026-06-01T12:00:00.000Z"
        },
        "subscription": "projects/p/subscriptions/s"
    })
    .to_string()
}

#[tokio::test]
async fn delegated_mailbox_is_synced_and_recorded() {
    let app = TestAppBuilder::new()
        .mailbox(FakeMailboxSync::returning(4, 1))
        .build()
        .await;

    let (status, response) = send(&app.app, post(&uri(), push(MAILBOX, json!(1234)), &[])).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        response,
        json!({ "ok": true, "messagesProcessed": 4, "errors": 1 })
    );
    assert_eq!(app.mailbox.calls(), 1);

    let (entity_type, entity_id, action, dedup_key): (String, String, String, String) =
        sqlx::query_as("SELECT entity_type, entity_id, action, dedup_key FROM integration_events")
            .fetch_one(&app.db.pool)
            .await
            .unwrap();
    assert_eq!(entity_type, "mailbox");
    assert_eq!(entity_id, MAILBOX);
    assert_eq!(action, "created");
    assert_eq!(dedup_key, format!("email:{MAILBOX}:1234"));
}

#[tokio::test]
async fn empty_sync_is_recorded_as_skipped() {
    let app = TestAppBuilder::new()
        .mailbox(FakeMailboxSync::returning(0, 0))
        .build()
        .await;

    send(&app.app, post(&uri(), push(MAILBOX, json!("77")), &[])).await;

    let action: String = sqlx::query_scalar("SELECT action FROM integration_events")
        .fetch_one(&app.db.pool)
        .await
        .unwrap();
    assert_eq!(action, "skipped");
}

#[tokio::test]
async fn unknown_mailbox_is_acknowledged_without_sync() {
    let app = spawn_app().await;

    let (status, response) = send(
        &app.app,
        post(&uri(), push("someone@else.org", json!(1)), &[]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, json!({ "ok": true, "skipped": true }));
    assert_eq!(app.mailbox.calls(), 0);
    assert_eq!(count(&app.db.pool, "SELECT COUNT(*) FROM integration_events").await, 0);
}

#[tokio::test]
async fn repeated_history_id_is_a_duplicate() {
    let app = spawn_app().await;

    send(&app.app, post(&uri(), push(MAILBOX, json!(5)), &[])).await;
    let (status, response) = send(&app.app, post(&uri(), push(MAILBOX, json!("5")), &[])).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        response,
        json!({ "ok": true, "skipped": true, "duplicate": true })
    );
    assert_eq!(app.mailbox.calls(), 1);
}

#[tokio::test]
async fn undecodable_data_is_a_bad_request() {
    let app = spawn_app().await;
    let body = json!({ "message": { "data": "%%%" } }).to_string();

    let (status, response) = send(&app.app, post(&uri(), body, &[])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["ok"], false);
    assert_eq!(delivery_statuses(&app.db.pool).await[0].0, "failed");
}

#[tokio::test]
async fn sync_failure_is_still_acknowledged() {
    let app = TestAppBuilder::new()
        .mailbox(FakeMailboxSync::failing(503))
        .build()
        .await;

    let (status, response) = send(&app.app, post(&uri(), push(MAILBOX, json!(9)), &[])).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["ok"], false);
    assert!(response["error"].as_str().unwrap().contains("503"));
    assert_eq!(delivery_statuses(&app.db.pool).await[0].0, "failed");
    assert_eq!(count(&app.db.pool, "SELECT COUNT(*) FROM dedup_claims").await, 0);
}

#[tokio::test]
async fn wrong_push_token_is_rejected() {
    let app = spawn_app().await;

    let (status, _) = send(
        &app.app,
        post(
            "/webhooks/email-push?token=guess",
            push(MAILBOX, json!(1)),
            &[],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.mailbox.calls(), 0);
}
