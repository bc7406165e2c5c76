//! Path and query extractors that reject with the JSON error body.
//!
//! Axum's own `Path` and `Query` reject with a plain-text 400. These wrap
//! them and turn the rejection into an [`ApiError`] with code
//! `INVALID_INPUT`, so every error a client sees has the same shape.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query},
    http::request::Parts,
};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// Typed path parameter, e.g. `PathId(id): PathId<ArtifactId>`.
#[derive(Debug, Clone, Copy)]
pub struct PathId<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for PathId<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(PathId(value)),
            Err(rejection) => Err(ApiError::invalid_input(format!(
                "Invalid path parameter in '{}': {}",
                parts.uri.path(),
                rejection.body_text()
            ))),
        }
    }
}

/// Typed query string.
#[derive(Debug, Clone, Copy)]
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
            .map_err(|rejection| {
                ApiError::invalid_input(format!("Invalid query string: {}", rejection.body_text()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use axum::{body::Body, http::Request, http::StatusCode, routing::get, Router};
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Debug, Deserialize)]
    struct Page {
        size: u32,
    }

    async fn by_id(PathId(id): PathId<i64>) -> String {
        id.to_string()
    }

    async fn paged(ValidQuery(page): ValidQuery<Page>) -> String {
        page.size.to_string()
    }

    fn app() -> Router {
        Router::new()
            .route("/items/:id", get(by_id))
            .route("/items", get(paged))
    }

    async fn call(uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_valid_parameters_pass_through() {
        let response = app()
            .oneshot(Request::builder().uri("/items/12").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bad_path_is_a_json_400() {
        let (status, body) = call("/items/twelve").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: ApiError = serde_json::from_value(body).unwrap();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.message.contains("/items/twelve"));
    }

    #[tokio::test]
    async fn test_bad_query_is_a_json_400() {
        let (status, body) = call("/items?size=-3").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INPUT");

        let (status, body) = call("/items").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INPUT");
    }
}
