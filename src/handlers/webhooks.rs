//! Provider endpoints. Each one hands the raw request to the shared
//! processor with its source adapter.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::Response,
};

use crate::{sources::InboundRequest, state::AppState};

pub async fn ledger_webhook_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = InboundRequest {
        headers,
        query,
        body,
    };
    state.processor.handle(state.ledger.clone(), request).await
}

pub async fn crm_webhook_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = InboundRequest {
        headers,
        query,
        body,
    };
    state.processor.handle(state.crm.clone(), request).await
}

pub async fn email_push_webhook_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = InboundRequest {
        headers,
        query,
        body,
    };
    state.processor.handle(state.email_push.clone(), request).await
}
