//! GET /references/:song_id

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::db::ReferenceStore;
use crate::error::{ApiError, ApiResult};
use crate::models::ReferenceDocument;
use crate::AppState;

pub async fn get_reference(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
) -> ApiResult<Json<ReferenceDocument>> {
    state
        .store
        .load_reference(&song_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Reference not found for song_id '{}'", song_id)))
}

pub fn reference_routes() -> Router<AppState> {
    Router::new().route("/references/:song_id", get(get_reference))
}
