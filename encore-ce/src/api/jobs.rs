//! Job submission, polling and cancellation
//!
//! POST /analysis, POST /comparison, POST /references, GET /jobs/:job_id,
//! POST /jobs/:job_id/cancel

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{AnalysisRequest, ComparisonRequest, JobRequest, RegistrationRequest};
use crate::services::{CancelOutcome, JobStatus, SubmitError};
use crate::AppState;

/// 202 body for every submission
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub cancel_requested: bool,
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Invalid(msg) => ApiError::BadRequest(msg),
            SubmitError::QueueFull | SubmitError::ShutDown => ApiError::Unavailable(err.to_string()),
            SubmitError::Store(e) => ApiError::Common(e),
        }
    }
}

async fn submit(
    state: &AppState,
    request: JobRequest,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let job_id = state.jobs.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

/// POST /analysis
pub async fn submit_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    submit(&state, JobRequest::Analysis(request)).await
}

/// POST /comparison
pub async fn submit_comparison(
    State(state): State<AppState>,
    Json(request): Json<ComparisonRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    submit(&state, JobRequest::Comparison(request)).await
}

/// POST /references
///
/// Registration runs as a job like any other; poll the returned id.
pub async fn submit_registration(
    State(state): State<AppState>,
    Json(request): Json<RegistrationRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    submit(&state, JobRequest::Registration(request)).await
}

/// GET /jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobStatus>> {
    state
        .jobs
        .poll(job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))
}

/// POST /jobs/:job_id/cancel
///
/// Cancellation takes effect at the job's next checkpoint.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    match state.jobs.cancel(job_id).await? {
        CancelOutcome::Requested => Ok((
            StatusCode::ACCEPTED,
            Json(CancelResponse {
                job_id,
                cancel_requested: true,
            }),
        )),
        CancelOutcome::AlreadyFinished => Err(ApiError::Conflict(format!(
            "Job already finished: {}",
            job_id
        ))),
        CancelOutcome::NotFound => Err(ApiError::NotFound(format!("Job not found: {}", job_id))),
    }
}

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/analysis", post(submit_analysis))
        .route("/comparison", post(submit_comparison))
        .route("/references", post(submit_registration))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
}
