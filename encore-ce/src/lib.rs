//! encore-ce library interface
//!
//! Performance-comparison engine and the asynchronous job machinery around
//! it. Exposed as a library for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, PipelineError};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use encore_common::events::EventBus;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::db::Store;
use crate::services::JobHandler;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobHandler>,
    pub store: Arc<dyn Store>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(jobs: Arc<dyn JobHandler>, store: Arc<dyn Store>, event_bus: EventBus) -> Self {
        Self {
            jobs,
            store,
            event_bus,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    use axum::routing::get;

    Router::new()
        .route("/jobs/events", get(api::job_event_stream))
        .merge(api::job_routes())
        .merge(api::result_routes())
        .merge(api::reference_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
