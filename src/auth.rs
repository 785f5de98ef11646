use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{error::ApiError, signature::constant_time_eq, state::AppState};

/// Guards `/events/react`. Fails closed when no secret is configured.
pub async fn react_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    check_bearer(req.headers(), state.events_react_secret.as_deref(), "EVENTS_REACT_SECRET")?;
    Ok(next.run(req).await)
}

/// Guards the `/internal` inspection routes. Fails closed when no token is
/// configured.
pub async fn inspector_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    check_bearer(req.headers(), state.inspector_api_token.as_deref(), "INSPECTOR_API_TOKEN")?;
    Ok(next.run(req).await)
}

fn check_bearer(
    headers: &HeaderMap,
    expected: Option<&str>,
    setting: &'static str,
) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        warn!(setting, "rejecting request: no bearer secret configured");
        return Err(ApiError::unauthorized("endpoint is not configured"));
    };

    let Some(provided) = bearer_token(headers) else {
        return Err(ApiError::unauthorized(
            "missing or invalid Authorization header",
        ));
    };

    if !constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
        return Err(ApiError::unauthorized("invalid token"));
    }

    Ok(())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim_start();
    let scheme = trimmed.get(..7)?;
    if !scheme.eq_ignore_ascii_case("bearer ") {
        return None;
    }
    let token = trimmed[7..].trim();
    (!token.is_empty()).then_some(token)
}
