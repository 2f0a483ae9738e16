//! Result retrieval
//!
//! GET /results/:job_id, GET /results?user_id=&song_id=&limit=&type=

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{ResultQuery, ResultStore, MAX_RESULT_LIMIT};
use crate::error::{ApiError, ApiResult};
use crate::models::{ResultDocument, ResultType};
use crate::AppState;

const DEFAULT_LIMIT: u32 = 20;

#[derive(Debug, Deserialize)]
pub struct ResultListParams {
    pub user_id: Option<String>,
    pub song_id: Option<String>,
    pub limit: Option<u32>,
    #[serde(rename = "type", default)]
    pub result_type: ResultType,
}

#[derive(Debug, Serialize)]
pub struct ResultListResponse {
    pub results: Vec<ResultDocument>,
    pub count: usize,
}

/// GET /results/:job_id
pub async fn get_result(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<ResultDocument>> {
    state
        .store
        .load_result(job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Result not found: {}", job_id)))
}

/// GET /results
///
/// Newest first. At least one of `user_id` or `song_id` is required.
pub async fn list_results(
    State(state): State<AppState>,
    Query(params): Query<ResultListParams>,
) -> ApiResult<Json<ResultListResponse>> {
    let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
    if blank(&params.user_id) && blank(&params.song_id) {
        return Err(ApiError::BadRequest(
            "user_id or song_id is required".to_string(),
        ));
    }

    let query = ResultQuery {
        user_id: params.user_id,
        song_id: params.song_id,
        result_type: params.result_type,
        limit: params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_RESULT_LIMIT),
    };
    let results = state.store.query_results(&query).await?;
    tracing::debug!(count = results.len(), result_type = query.result_type.as_str(), "Listed results");

    Ok(Json(ResultListResponse {
        count: results.len(),
        results,
    }))
}

pub fn result_routes() -> Router<AppState> {
    Router::new()
        .route("/results", get(list_results))
        .route("/results/:job_id", get(get_result))
}
