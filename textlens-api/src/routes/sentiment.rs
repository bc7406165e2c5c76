//! Sentiment-only routes.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use textlens_compute::ensemble_filter;
use textlens_core::{ArtifactId, Sentiment};

use crate::{
    error::{ApiError, ApiResult},
    extractors::{PathId, ValidQuery},
    middleware::RequesterExtractor,
    services::ArtifactService,
    state::AppState,
    types::{SmoothQuery, SmoothedResponse},
};

const MAX_FILTERS: usize = 100;

/// GET /sentiment/text/:id/smoothed - Stored scores with a smoothed curve
pub async fn smoothed_sentiment(
    State(service): State<Arc<ArtifactService<Sentiment>>>,
    RequesterExtractor(requester): RequesterExtractor,
    PathId(id): PathId<ArtifactId>,
    ValidQuery(query): ValidQuery<SmoothQuery>,
) -> ApiResult<Json<SmoothedResponse>> {
    if query.filters == 0 || query.filters > MAX_FILTERS {
        return Err(ApiError::invalid_input(format!(
            "filters must be between 1 and {}",
            MAX_FILTERS
        )));
    }

    let artifact = service.get_by_id(requester, id).await?.into_value();
    let smoothed = ensemble_filter(&artifact.result, query.filters);
    Ok(Json(SmoothedResponse {
        id: artifact.id,
        sentiments: artifact.result,
        smoothed,
        filters: query.filters,
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/:id/smoothed", get(smoothed_sentiment))
}
