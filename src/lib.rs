pub mod auth;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod notify;
pub mod processor;
pub mod reactor;
pub mod signature;
pub mod sources;
pub mod state;
pub mod store;
pub mod sync;
pub mod types;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::{
    auth::{inspector_auth, react_auth},
    handlers::{
        health::health_handler,
        inspector::{get_event_handler, list_deliveries_handler},
        react::react_handler,
        webhooks::{crm_webhook_handler, email_push_webhook_handler, ledger_webhook_handler},
    },
    state::AppState,
};

/// Full HTTP surface: provider webhooks, the reactor trigger and the
/// bearer-protected inspection routes.
pub fn router(state: AppState) -> Router {
    let react = Router::new()
        .route("/events/react", post(react_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), react_auth));

    let internal = Router::new()
        .route("/internal/deliveries", get(list_deliveries_handler))
        .route("/internal/events/:id", get(get_event_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), inspector_auth));

    Router::new()
        .route("/webhooks/ledger", post(ledger_webhook_handler))
        .route("/webhooks/crm", post(crm_webhook_handler))
        .route("/webhooks/email-push", post(email_push_webhook_handler))
        .route("/health", get(health_handler))
        .merge(react)
        .merge(internal)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
