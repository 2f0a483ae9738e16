//! Fixed-size worker pool in front of the job orchestrator
//!
//! Jobs are persisted with their payload before they enter the in-memory
//! queue, so a restart redelivers every job that never reached a terminal
//! state. Each worker runs one job at a time under two deadlines: the soft
//! timeout requests cooperative cancellation, the hard timeout abandons the
//! job and records FAILURE.

use async_trait::async_trait;
use encore_common::events::{EncoreEvent, EventBus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::db::JobStore;
use crate::models::{Job, JobOutput, JobRequest, JobState};
use crate::services::job_orchestrator::JobOrchestrator;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{0}")]
    Invalid(String),

    #[error("Job queue is full")]
    QueueFull,

    #[error("Worker pool is shut down")]
    ShutDown,

    #[error(transparent)]
    Store(#[from] encore_common::Error),
}

/// Outcome of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Token fired; the job fails at its next checkpoint
    Requested,
    AlreadyFinished,
    NotFound,
}

/// Progress view of a job as returned to pollers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub state: JobState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Job> for JobStatus {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            state: job.state,
            progress: job.progress,
            checkpoint: job.checkpoint,
            result: job.result,
            error: job.error,
        }
    }
}

/// Submission and polling surface used by the HTTP layer
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn submit(&self, request: JobRequest) -> Result<Uuid, SubmitError>;

    async fn poll(&self, job_id: Uuid) -> encore_common::Result<Option<JobStatus>>;

    async fn cancel(&self, job_id: Uuid) -> encore_common::Result<CancelOutcome>;
}

struct Delivery {
    job: Job,
    request: JobRequest,
}

struct Inner {
    orchestrator: JobOrchestrator,
    config: WorkerConfig,
    event_bus: EventBus,
    sender: mpsc::Sender<Delivery>,
    receiver: Mutex<mpsc::Receiver<Delivery>>,
    /// Cancellation tokens of queued and running jobs
    tokens: RwLock<HashMap<Uuid, CancellationToken>>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl WorkerPool {
    pub fn new(orchestrator: JobOrchestrator, config: WorkerConfig, event_bus: EventBus) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                orchestrator,
                config,
                event_bus,
                sender,
                receiver: Mutex::new(receiver),
                tokens: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Spawn the workers
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let count = self.inner.config.count.max(1);
        tracing::info!(
            workers = count,
            queue_capacity = self.inner.config.queue_capacity,
            soft_timeout_secs = self.inner.config.soft_timeout_secs,
            hard_timeout_secs = self.inner.config.hard_timeout_secs,
            "Starting worker pool"
        );
        (0..count)
            .map(|worker_id| {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move { inner.run_worker(worker_id).await })
            })
            .collect()
    }

    /// Stop taking jobs; running jobs finish or hit their timeouts
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Queue every non-terminal job found in the store
    ///
    /// Call after `start`, since this waits for queue space.
    pub async fn requeue_incomplete(&self) -> encore_common::Result<usize> {
        let pending = self.inner.orchestrator.store().incomplete_jobs().await?;
        let count = pending.len();

        for (job, request) in pending {
            tracing::info!(
                job_id = %job.id,
                state = %job.state,
                progress = job.progress,
                "Redelivering incomplete job"
            );
            self.inner
                .tokens
                .write()
                .await
                .insert(job.id, CancellationToken::new());
            if self.inner.sender.send(Delivery { job, request }).await.is_err() {
                tracing::warn!("Worker queue closed during redelivery");
                break;
            }
        }

        if count > 0 {
            tracing::info!(count, "Redelivered incomplete jobs");
        }
        Ok(count)
    }

    /// Jobs queued or running in this process
    pub async fn active_jobs(&self) -> usize {
        self.inner.tokens.read().await.len()
    }
}

#[async_trait]
impl JobHandler for WorkerPool {
    async fn submit(&self, request: JobRequest) -> Result<Uuid, SubmitError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SubmitError::ShutDown);
        }
        request.validate().map_err(SubmitError::Invalid)?;

        let kind = request.kind();
        let job = Job::new(kind);
        let job_id = job.id;
        let store = self.inner.orchestrator.store();
        store.create_job(&job, &request).await?;

        self.inner
            .tokens
            .write()
            .await
            .insert(job_id, CancellationToken::new());

        match self.inner.sender.try_send(Delivery {
            job: job.clone(),
            request,
        }) {
            Ok(()) => {}
            Err(e) => {
                self.inner.tokens.write().await.remove(&job_id);
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => SubmitError::ShutDown,
                };
                tracing::warn!(job_id = %job_id, error = %reason, "Job rejected");
                let mut job = job;
                if job.fail(reason.to_string()).is_ok() {
                    store.save_job(&job).await?;
                }
                return Err(reason);
            }
        }

        tracing::info!(job_id = %job_id, kind = kind.as_str(), "Job submitted");
        self.inner.event_bus.emit_lossy(EncoreEvent::JobSubmitted {
            job_id,
            kind: kind.as_str().to_string(),
            timestamp: chrono::Utc::now(),
        });
        Ok(job_id)
    }

    async fn poll(&self, job_id: Uuid) -> encore_common::Result<Option<JobStatus>> {
        let job = self.inner.orchestrator.store().load_job(job_id).await?;
        Ok(job.map(JobStatus::from))
    }

    async fn cancel(&self, job_id: Uuid) -> encore_common::Result<CancelOutcome> {
        match self.inner.orchestrator.store().load_job(job_id).await? {
            None => return Ok(CancelOutcome::NotFound),
            Some(job) if job.is_terminal() => return Ok(CancelOutcome::AlreadyFinished),
            Some(_) => {}
        }

        match self.inner.tokens.read().await.get(&job_id) {
            Some(token) => {
                tracing::info!(job_id = %job_id, "Cancellation requested");
                token.cancel();
                Ok(CancelOutcome::Requested)
            }
            // Not owned by this process
            None => Ok(CancelOutcome::NotFound),
        }
    }
}

impl Inner {
    async fn run_worker(self: Arc<Self>, worker_id: usize) {
        tracing::debug!(worker_id, "Worker started");
        loop {
            let delivery = {
                let mut receiver = tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    guard = self.receiver.lock() => guard,
                };
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    delivery = receiver.recv() => delivery,
                }
            };
            let Some(delivery) = delivery else {
                break;
            };

            let job_id = delivery.job.id;
            self.process(worker_id, delivery).await;
            self.tokens.write().await.remove(&job_id);
        }
        tracing::debug!(worker_id, "Worker stopped");
    }

    async fn process(&self, worker_id: usize, delivery: Delivery) {
        let Delivery { mut job, request } = delivery;
        let job_id = job.id;
        let store = self.orchestrator.store();

        let token = self
            .tokens
            .read()
            .await
            .get(&job_id)
            .cloned()
            .unwrap_or_default();

        match store.begin_attempt(job_id).await {
            Ok(attempts) => job.attempts = attempts,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to record attempt");
                job.attempts += 1;
            }
        }

        if job.attempts > self.config.max_attempts {
            let message = format!("Job abandoned after {} attempts", self.config.max_attempts);
            self.fail_outside_pipeline(job, message).await;
            return;
        }

        tracing::debug!(worker_id, job_id = %job_id, attempt = job.attempts, "Worker picked up job");

        let finished = CancellationToken::new();
        let soft_timeout = Duration::from_secs(self.config.soft_timeout_secs);
        {
            let token = token.clone();
            let finished = finished.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(soft_timeout) => {
                        tracing::warn!(job_id = %job_id, "Soft timeout reached, cancelling job");
                        token.cancel();
                    }
                    _ = finished.cancelled() => {}
                }
            });
        }

        let hard_timeout = Duration::from_secs(self.config.hard_timeout_secs);
        let outcome = tokio::time::timeout(
            hard_timeout,
            self.orchestrator.execute(job.clone(), request, &token),
        )
        .await;
        finished.cancel();

        if outcome.is_err() {
            tracing::error!(job_id = %job_id, hard_timeout_secs = self.config.hard_timeout_secs, "Hard timeout reached");
            let message = format!(
                "Job exceeded hard timeout of {}s",
                self.config.hard_timeout_secs
            );
            self.fail_outside_pipeline(job, message).await;
        }
    }

    /// Record FAILURE for a job the orchestrator did not finish
    async fn fail_outside_pipeline(&self, mut job: Job, message: String) {
        let job_id = job.id;
        tracing::error!(job_id = %job_id, error = %message, "Job failed");
        if let Err(e) = job.fail(message.clone()) {
            tracing::error!(job_id = %job_id, error = %e, "Failure transition rejected");
            return;
        }
        if let Err(e) = self.orchestrator.store().save_job(&job).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to persist job failure");
        }
        self.event_bus.emit_lossy(EncoreEvent::JobFailed {
            job_id,
            error_message: message,
            timestamp: chrono::Utc::now(),
        });
    }
}
