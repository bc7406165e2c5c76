//! Artifact REST API Routes
//!
//! One set of handlers serves both kinds. Each is mounted per kind under
//! `/{kind}/text`.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use textlens_core::{ArtifactId, ArtifactKind};

use crate::{
    error::{ApiError, ApiResult},
    extractors::PathId,
    middleware::RequesterExtractor,
    services::ArtifactService,
    state::AppState,
    types::{
        ArtifactResponse, CreateArtifactRequest, DeleteArtifactRequest, MessageResponse,
        UpdateArtifactRequest,
    },
};

/// Unwrap a JSON body, reporting malformed or incomplete bodies as 400.
pub(crate) fn json_body<T: DeserializeOwned>(
    payload: Result<Json<T>, JsonRejection>,
) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::invalid_input(rejection.body_text()))
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /{kind}/text/:id - Fetch an owned artifact, cache first
pub async fn get_artifact<K: ArtifactKind>(
    State(service): State<Arc<ArtifactService<K>>>,
    RequesterExtractor(requester): RequesterExtractor,
    PathId(id): PathId<ArtifactId>,
) -> ApiResult<Json<ArtifactResponse<K>>> {
    let read = service.get_by_id(requester, id).await?;
    Ok(Json(read.into_value().into()))
}

/// POST /{kind}/text - Analyze a text, reusing an earlier result if any
///
/// 201 when a row was stored, 200 when an existing row was returned or the
/// caller is anonymous.
pub async fn create_artifact<K: ArtifactKind>(
    State(service): State<Arc<ArtifactService<K>>>,
    RequesterExtractor(requester): RequesterExtractor,
    payload: Result<Json<CreateArtifactRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let req = json_body(payload)?;
    req.validate()?;

    let outcome = service.create_or_get(requester, req.source_text).await?;
    let status = if outcome.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ArtifactResponse::from(outcome))))
}

/// PUT /{kind}/text - Re-analyze an owned artifact with revised text
pub async fn update_artifact<K: ArtifactKind>(
    State(service): State<Arc<ArtifactService<K>>>,
    RequesterExtractor(requester): RequesterExtractor,
    payload: Result<Json<UpdateArtifactRequest>, JsonRejection>,
) -> ApiResult<Json<ArtifactResponse<K>>> {
    let req = json_body(payload)?;
    req.validate()?;

    let artifact = service.update(requester, req.id, req.updated_text).await?;
    Ok(Json(artifact.into()))
}

/// DELETE /{kind}/text - Remove an owned artifact
pub async fn delete_artifact<K: ArtifactKind>(
    State(service): State<Arc<ArtifactService<K>>>,
    RequesterExtractor(requester): RequesterExtractor,
    payload: Result<Json<DeleteArtifactRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let req = json_body(payload)?;
    service.delete(requester, req.id).await?;
    Ok(Json(MessageResponse::ok()))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Routes for one artifact kind, relative to its mount point.
pub fn create_router<K: ArtifactKind>() -> Router<AppState>
where
    Arc<ArtifactService<K>>: FromRef<AppState>,
{
    Router::new()
        .route(
            "/",
            post(create_artifact::<K>)
                .put(update_artifact::<K>)
                .delete(delete_artifact::<K>),
        )
        .route("/:id", get(get_artifact::<K>))
}
