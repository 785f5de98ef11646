//! Extractors whose rejections come back as `ApiError::Validation`, so every
//! bad request on the API surface has the same `{code, message}` body.

use axum::{
    async_trait,
    body::{Body, Bytes},
    extract::{FromRequest, FromRequestParts, Path, Query},
    http::{Request, request::Parts},
};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// JSON body parsed from the raw bytes. Change relays do not always send a
/// `content-type`, so the header is not required.
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request<Body>, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| rejected("request body", rejection.body_text()))?;
        serde_json::from_slice(&bytes)
            .map(ValidJson)
            .map_err(|err| rejected("JSON body", err.to_string()))
    }
}

pub struct ValidQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ValidQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| ValidQuery(value))
            .map_err(|rejection| rejected("query string", rejection.body_text()))
    }
}

pub struct ValidPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ValidPath<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Path::<T>::from_request_parts(parts, state)
            .await
            .map(|Path(value)| ValidPath(value))
            .map_err(|rejection| rejected("path parameter", rejection.body_text()))
    }
}

fn rejected(part: &str, detail: String) -> ApiError {
    ApiError::validation(format!("invalid {part}: {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn json_body_needs_no_content_type() {
        let ValidJson(value) = ValidJson::<Value>::from_request(request(r#"{"type":"INSERT"}"#), &())
            .await
            .unwrap();
        assert_eq!(value, json!({ "type": "INSERT" }));
    }

    #[tokio::test]
    async fn broken_json_is_a_validation_error() {
        let Err(ApiError::Validation(message)) =
            ValidJson::<Value>::from_request(request("{\"type\":"), &()).await
        else {
            panic!("expected a validation error");
        };
        assert!(message.starts_with("invalid JSON body: "), "{message}");
    }
}
