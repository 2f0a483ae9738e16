//! Test helper utilities
//!
//! Shared utilities for testing encore-ce

#![allow(dead_code)]

pub mod audio_generator;
pub mod db_utils;

pub use audio_generator::{melody_midi, melody_midi_from, melody_wav, MelodyConfig};
pub use db_utils::{assert_has_columns, count_rows};

use axum::Router;
use encore_ce::config::{ServiceConfig, WorkerConfig};
use encore_ce::db::{SqliteStore, Store};
use encore_ce::services::{
    DisabledFeedback, FeedbackGenerator, JobHandler, JobOrchestrator, JobStatus, Pipeline,
    SegmentInference, UnavailableTechniqueClassifier, WorkerPool, YinPitchEstimator,
};
use encore_ce::{build_router, AppState};
use encore_common::events::EventBus;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// A complete service over a temporary database
pub struct TestService {
    pub pool: WorkerPool,
    pub sqlite: Arc<SqliteStore>,
    pub store: Arc<dyn Store>,
    pub event_bus: EventBus,
    _dir: TempDir,
}

impl TestService {
    /// Service with running workers
    pub async fn start() -> Self {
        let service = Self::paused(WorkerConfig::default(), Arc::new(DisabledFeedback)).await;
        service.pool.start();
        service
    }

    /// Service whose workers are not started yet
    pub async fn paused(workers: WorkerConfig, feedback: Arc<dyn FeedbackGenerator>) -> Self {
        let dir = TempDir::new().unwrap();
        let sqlite = Arc::new(SqliteStore::open(&dir.path().join("encore.db")).await.unwrap());
        let store: Arc<dyn Store> = sqlite.clone();
        let event_bus = EventBus::new(256);

        let config = ServiceConfig::default();
        let inference = SegmentInference::new(
            Arc::new(YinPitchEstimator::default()),
            Arc::new(UnavailableTechniqueClassifier),
        );
        let pipeline = Arc::new(Pipeline::from_config(&config, inference));
        let orchestrator =
            JobOrchestrator::new(pipeline, Arc::clone(&store), event_bus.clone(), feedback);
        let pool = WorkerPool::new(orchestrator, workers, event_bus.clone());

        Self {
            pool,
            sqlite,
            store,
            event_bus,
            _dir: dir,
        }
    }

    pub fn router(&self) -> Router {
        let state = AppState::new(
            Arc::new(self.pool.clone()),
            Arc::clone(&self.store),
            self.event_bus.clone(),
        );
        build_router(state, 64 * 1024 * 1024)
    }

    /// Poll until the job is SUCCESS or FAILURE
    pub async fn wait_for_terminal(&self, job_id: Uuid) -> JobStatus {
        for _ in 0..600 {
            if let Some(status) = self.pool.poll(job_id).await.unwrap() {
                if status.state.is_terminal() {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("Job {} did not finish in time", job_id);
    }
}
