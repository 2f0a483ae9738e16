//! Job orchestrator
//!
//! Drives one job through its checkpoints:
//! STARTED → PROCESSING → FINALIZING → SUCCESS | FAILURE
//!
//! # Architecture
//! Each job kind is handled by a dedicated `run_*` method in its own file:
//!
//! - **analysis**: decode, features, onset segmentation, inference
//! - **comparison**: both recordings, alignment, note-guided segmentation,
//!   inference, scoring
//! - **registration**: reference features stored by song id
//!
//! Every checkpoint emits a `JobProgress` event and a fire-and-forget
//! progress write. Cancellation is checked at each checkpoint, i.e. only
//! between stages. CPU-bound stages run on the blocking pool.

use encore_common::events::{EncoreEvent, EventBus};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ServiceConfig;
use crate::db::{JobStore, ResultStore, Store};
use crate::error::PipelineError;
use crate::models::{
    Checkpoint, CheckpointCursor, FeatureSet, Job, JobOutput, JobRequest, Recording,
    ResultDocument, Segment,
};
use crate::services::alignment::AlignmentEngine;
use crate::services::feature_extractor::FeatureExtractor;
use crate::services::feedback::FeedbackGenerator;
use crate::services::inference::SegmentInference;
use crate::services::scoring::ScoringEngine;
use crate::services::segmenter::Segmenter;
use crate::utils::decode_audio_bytes;

mod analysis;
mod comparison;
mod registration;

/// Stateless processing components shared by all jobs
pub struct Pipeline {
    pub extractor: FeatureExtractor,
    pub aligner: AlignmentEngine,
    pub segmenter: Segmenter,
    pub inference: SegmentInference,
    pub scoring: ScoringEngine,
}

impl Pipeline {
    pub fn from_config(config: &ServiceConfig, inference: SegmentInference) -> Self {
        Self {
            extractor: FeatureExtractor::new(config.extractor.clone()),
            aligner: AlignmentEngine::new(config.alignment.clone()),
            segmenter: Segmenter::new(config.segmenter.clone()),
            inference,
            scoring: ScoringEngine::new(config.scoring.clone()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.extractor.config().sample_rate
    }
}

/// Per-job state carried through the stages
pub(super) struct JobContext<'a> {
    job: Job,
    cursor: CheckpointCursor,
    cancel: &'a CancellationToken,
}

#[derive(Clone)]
pub struct JobOrchestrator {
    pipeline: Arc<Pipeline>,
    store: Arc<dyn Store>,
    event_bus: EventBus,
    feedback: Arc<dyn FeedbackGenerator>,
}

impl JobOrchestrator {
    pub fn new(
        pipeline: Arc<Pipeline>,
        store: Arc<dyn Store>,
        event_bus: EventBus,
        feedback: Arc<dyn FeedbackGenerator>,
    ) -> Self {
        Self {
            pipeline,
            store,
            event_bus,
            feedback,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Run `request` to a terminal state and persist the final job row
    ///
    /// Never returns a non-terminal job.
    pub async fn execute(
        &self,
        job: Job,
        request: JobRequest,
        cancel: &CancellationToken,
    ) -> Job {
        let start_time = Instant::now();
        let job_id = job.id;
        tracing::info!(job_id = %job_id, kind = job.kind.as_str(), attempt = job.attempts, "Job started");

        let mut ctx = JobContext {
            cursor: CheckpointCursor::new(job.kind),
            job,
            cancel,
        };

        let outcome = match request {
            JobRequest::Analysis(req) => self.run_analysis(&mut ctx, req).await,
            JobRequest::Comparison(req) => self.run_comparison(&mut ctx, req).await,
            JobRequest::Registration(req) => self.run_registration(&mut ctx, req).await,
        };

        let mut job = ctx.job;
        let outcome = outcome.and_then(|output| {
            job.succeed(output)
                .map_err(|e| PipelineError::Internal(e.to_string()))
        });

        match outcome {
            Ok(()) => {
                let duration_ms = encore_common::time::elapsed_ms(start_time);
                tracing::info!(job_id = %job_id, duration_ms, "Job succeeded");
                self.persist_terminal(&job).await;
                self.event_bus.emit_lossy(EncoreEvent::JobCompleted {
                    job_id,
                    duration_ms,
                    timestamp: chrono::Utc::now(),
                });
            }
            Err(err) => {
                let message = err.to_string();
                tracing::error!(job_id = %job_id, error = %message, "Job failed");
                if let Err(e) = job.fail(message.clone()) {
                    tracing::error!(job_id = %job_id, error = %e, "Failure transition rejected");
                }
                self.persist_terminal(&job).await;
                self.event_bus.emit_lossy(EncoreEvent::JobFailed {
                    job_id,
                    error_message: message,
                    timestamp: chrono::Utc::now(),
                });
            }
        }

        job
    }

    async fn persist_terminal(&self, job: &Job) {
        if let Err(e) = self.store.save_job(job).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to persist terminal job state");
        }
    }

    /// Enter a checkpoint
    ///
    /// Fails with `Cancelled` if cancellation was requested. The job state
    /// only moves forward; a redelivered job keeps its higher state and
    /// progress.
    pub(super) fn reach(
        &self,
        ctx: &mut JobContext<'_>,
        checkpoint: Checkpoint,
    ) -> Result<(), PipelineError> {
        if ctx.cancel.is_cancelled() {
            tracing::info!(job_id = %ctx.job.id, checkpoint = checkpoint.as_str(), "Job cancelled between stages");
            return Err(PipelineError::Cancelled);
        }
        if !ctx.cursor.reach(checkpoint) {
            return Err(PipelineError::Internal(format!(
                "Checkpoint {} out of order",
                checkpoint.as_str()
            )));
        }

        let job = &mut ctx.job;
        if job.state != checkpoint.state() && job.state.can_transition_to(checkpoint.state()) {
            job.transition_to(checkpoint.state())
                .map_err(|e| PipelineError::Internal(e.to_string()))?;
        }
        job.advance(checkpoint.progress());
        job.checkpoint = Some(checkpoint.as_str().to_string());

        tracing::debug!(
            job_id = %job.id,
            checkpoint = checkpoint.as_str(),
            progress = job.progress,
            "Checkpoint reached"
        );

        self.event_bus.emit_lossy(EncoreEvent::JobProgress {
            job_id: job.id,
            state: job.state.as_str().to_string(),
            checkpoint: checkpoint.as_str().to_string(),
            progress: job.progress,
            timestamp: chrono::Utc::now(),
        });

        let store = Arc::clone(&self.store);
        let job_id = job.id;
        tokio::spawn(async move {
            if let Err(e) = store.record_progress(job_id, checkpoint).await {
                tracing::debug!(job_id = %job_id, error = %e, "Progress write dropped");
            }
        });

        Ok(())
    }

    pub(super) async fn decode(&self, bytes: Vec<u8>) -> Result<Arc<Recording>, PipelineError> {
        let sample_rate = self.pipeline.sample_rate();
        let recording =
            tokio::task::spawn_blocking(move || decode_audio_bytes(&bytes, sample_rate)).await??;
        Ok(Arc::new(recording))
    }

    pub(super) async fn extract(&self, recording: &Arc<Recording>) -> Result<FeatureSet, PipelineError> {
        let pipeline = Arc::clone(&self.pipeline);
        let recording = Arc::clone(recording);
        Ok(tokio::task::spawn_blocking(move || pipeline.extractor.extract(&recording)).await?)
    }

    pub(super) async fn pitches(
        &self,
        segments: &Arc<Vec<Segment>>,
        sample_rate: u32,
    ) -> Result<Vec<f64>, PipelineError> {
        let pipeline = Arc::clone(&self.pipeline);
        let segments = Arc::clone(segments);
        Ok(tokio::task::spawn_blocking(move || {
            pipeline.inference.pitches(&segments, sample_rate)
        })
        .await??)
    }

    pub(super) async fn techniques(
        &self,
        segments: &Arc<Vec<Segment>>,
        sample_rate: u32,
    ) -> Result<Vec<Vec<String>>, PipelineError> {
        let pipeline = Arc::clone(&self.pipeline);
        let segments = Arc::clone(segments);
        Ok(tokio::task::spawn_blocking(move || {
            pipeline.inference.techniques(&segments, sample_rate)
        })
        .await??)
    }

    /// Persisting checkpoint, then optional feedback stored beside the result
    pub(super) async fn persist_result(
        &self,
        ctx: &mut JobContext<'_>,
        mut document: ResultDocument,
        generate_feedback: bool,
    ) -> Result<JobOutput, PipelineError> {
        self.reach(ctx, Checkpoint::Persisting)?;
        self.store.save_result(&document).await?;

        if generate_feedback {
            self.reach(ctx, Checkpoint::GeneratingFeedback)?;
            match self.feedback.generate(&document.result).await {
                Ok(text) => document.feedback = Some(text),
                Err(e) => {
                    tracing::warn!(job_id = %ctx.job.id, error = %e, "Feedback generation failed");
                    document.feedback_error = Some(e.to_string());
                }
            }
            self.store.save_result(&document).await?;
        }

        Ok(document.result)
    }
}
