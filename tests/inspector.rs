#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use axum::http::StatusCode;
use common::{CRM_SECRET, INSPECTOR_TOKEN, TestAppBuilder, get, post, send, spawn_app};
use ingest::store::{self, NewEvent};
use ingest::types::{EventAction, Source};
use serde_json::json;
use uuid::Uuid;

async fn ingest_contacts(app: &common::TestApp, n: usize) {
    for i in 0..n {
        let body = json!({
            "type": "contact.updated",
            "timestamp": format!("2026-05-01T09:00:0{i}Z"),
            "data": { "id": format!("c-{i}") }
        })
        .to_string();
        let (status, _) = send(
            &app.app,
            post("/webhooks/crm", body, &[("x-crm-signature", CRM_SECRET)]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn internal_routes_require_the_inspector_token() {
    let app = spawn_app().await;

    let (status, body) = send(&app.app, get("/internal/deliveries", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "missing or invalid Authorization header");

    let (status, body) = send(&app.app, get("/internal/deliveries", Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "invalid token");

    let (status, _) = send(&app.app, get("/internal/deliveries", Some(INSPECTOR_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn internal_routes_fail_closed_without_a_token() {
    let app = TestAppBuilder::new()
        .config(|config| config.inspector_api_token = None)
        .build()
        .await;

    let (status, _) = send(&app.app, get("/internal/deliveries", Some("anything"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_is_public() {
    let app = spawn_app().await;
    let (status, body) = send(&app.app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Delivery listing
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn deliveries_paginate_newest_first() {
    let app = spawn_app().await;
    ingest_contacts(&app, 5).await;

    let (status, page1) = send(
        &app.app,
        get("/internal/deliveries?limit=2", Some(INSPECTOR_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page1["deliveries"].as_array().unwrap().len(), 2);
    let cursor = page1["next_before"].as_str().unwrap().to_string();

    let mut seen: Vec<String> = page1["deliveries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["id"].as_str().unwrap().to_string())
        .collect();

    let mut next = Some(cursor);
    while let Some(cursor) = next {
        let (_, page) = send(
            &app.app,
            get(
                &format!("/internal/deliveries?limit=2&before={cursor}"),
                Some(INSPECTOR_TOKEN),
            ),
        )
        .await;
        for delivery in page["deliveries"].as_array().unwrap() {
            seen.push(delivery["id"].as_str().unwrap().to_string());
        }
        next = page["next_before"].as_str().map(str::to_string);
    }

    assert_eq!(seen.len(), 5);
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 5);
}

#[tokio::test]
async fn deliveries_filter_by_source_and_status() {
    let app = spawn_app().await;
    ingest_contacts(&app, 2).await;
    send(
        &app.app,
        post("/webhooks/crm", "{}", &[("x-crm-signature", "bad")]),
    )
    .await;

    let (_, processed) = send(
        &app.app,
        get(
            "/internal/deliveries?source=crm&status=processed",
            Some(INSPECTOR_TOKEN),
        ),
    )
    .await;
    assert_eq!(processed["deliveries"].as_array().unwrap().len(), 2);
    assert!(processed["next_before"].is_null());

    let (_, received) = send(
        &app.app,
        get("/internal/deliveries?status=received", Some(INSPECTOR_TOKEN)),
    )
    .await;
    let received = received["deliveries"].as_array().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["error"], "invalid crm signature");

    let (_, ledger) = send(
        &app.app,
        get("/internal/deliveries?source=ledger", Some(INSPECTOR_TOKEN)),
    )
    .await;
    assert!(ledger["deliveries"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_listing_parameters_are_rejected() {
    let app = spawn_app().await;

    for uri in [
        "/internal/deliveries?limit=0",
        "/internal/deliveries?limit=500",
        "/internal/deliveries?limit=abc",
        "/internal/deliveries?before=garbage",
        "/internal/deliveries?source=fax",
        "/internal/deliveries?status=lost",
    ] {
        let (status, body) = send(&app.app, get(uri, Some(INSPECTOR_TOKEN))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["code"], "validation", "{uri}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event detail
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn event_detail_includes_reaction() {
    let app = spawn_app().await;
    let event = store::insert_event(
        &app.db.pool,
        &NewEvent {
            source: Source::Crm,
            event_type: "opportunity.status_changed".to_string(),
            entity_type: "opportunity".to_string(),
            entity_id: "opp-1".to_string(),
            action: EventAction::Updated,
            payload: json!({ "status": "won", "name": "Roof" }),
            dedup_key: "k1".to_string(),
            occurred_at: None,
        },
        None,
        12,
    )
    .await
    .unwrap()
    .unwrap();

    let uri = format!("/internal/events/{}", event.id);
    let (status, before) = send(&app.app, get(&uri, Some(INSPECTOR_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(before["event"]["entity_id"], "opp-1");
    assert_eq!(before["event"]["latency_ms"], 12);
    assert!(before["reaction"].is_null());

    app.state.reactor.react(&event).await.unwrap();

    let (_, after) = send(&app.app, get(&uri, Some(INSPECTOR_TOKEN))).await;
    assert_eq!(after["reaction"]["rule_name"], "opportunity-won");
    assert_eq!(after["reaction"]["status"], "dispatched");
}

#[tokio::test]
async fn event_detail_validates_and_reports_missing() {
    let app = spawn_app().await;

    let (status, _) = send(&app.app, get("/internal/events/nope", Some(INSPECTOR_TOKEN))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = format!("/internal/events/{}", Uuid::new_v4());
    let (status, body) = send(&app.app, get(&uri, Some(INSPECTOR_TOKEN))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}
