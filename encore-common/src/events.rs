//! Event types for the Encore event system
//!
//! Provides shared event definitions and the broadcast `EventBus`.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Encore event types
///
/// Events are broadcast via `EventBus` and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EncoreEvent {
    /// Job accepted and queued
    JobSubmitted {
        job_id: Uuid,
        /// "analysis", "comparison" or "registration"
        kind: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job reached a pipeline checkpoint
    ///
    /// Fire-and-forget: subscribers may miss intermediate values.
    JobProgress {
        job_id: Uuid,
        /// Job state after the checkpoint (e.g. "PROCESSING")
        state: String,
        /// Checkpoint name (e.g. "aligning")
        checkpoint: String,
        /// Progress percentage (0-100)
        progress: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job finished successfully
    JobCompleted {
        job_id: Uuid,
        duration_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job finished with an error
    JobFailed {
        job_id: Uuid,
        error_message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Reference features stored (or replaced) for a song
    ReferenceRegistered {
        song_id: String,
        has_midi: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl EncoreEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            EncoreEvent::JobSubmitted { .. } => "JobSubmitted",
            EncoreEvent::JobProgress { .. } => "JobProgress",
            EncoreEvent::JobCompleted { .. } => "JobCompleted",
            EncoreEvent::JobFailed { .. } => "JobFailed",
            EncoreEvent::ReferenceRegistered { .. } => "ReferenceRegistered",
        }
    }

    /// Job the event belongs to, if any
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            EncoreEvent::JobSubmitted { job_id, .. }
            | EncoreEvent::JobProgress { job_id, .. }
            | EncoreEvent::JobCompleted { job_id, .. }
            | EncoreEvent::JobFailed { job_id, .. } => Some(*job_id),
            EncoreEvent::ReferenceRegistered { .. } => None,
        }
    }
}

/// Broadcast bus for `EncoreEvent`s
///
/// Cloning the bus shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EncoreEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EncoreEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EncoreEvent,
    ) -> Result<usize, broadcast::error::SendError<EncoreEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EncoreEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
