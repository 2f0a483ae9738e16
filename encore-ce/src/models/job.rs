//! Job state machine
//!
//! A job progresses STARTED → PROCESSING → FINALIZING → SUCCESS. Any
//! non-terminal state may fall to FAILURE. States are never skipped on the
//! success path and progress never decreases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::JobOutput;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// Accepted and queued, no work done yet
    Started,
    /// Running decode / feature / inference stages
    Processing,
    /// Scoring, persisting and feedback
    Finalizing,
    /// Finished with a result
    Success,
    /// Finished with an error
    Failure,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Started => "STARTED",
            JobState::Processing => "PROCESSING",
            JobState::Finalizing => "FINALIZING",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "STARTED" => Some(JobState::Started),
            "PROCESSING" => Some(JobState::Processing),
            "FINALIZING" => Some(JobState::Finalizing),
            "SUCCESS" => Some(JobState::Success),
            "FAILURE" => Some(JobState::Failure),
            _ => None,
        }
    }

    /// Whether `next` is a legal successor of `self`
    ///
    /// Staying in the same non-terminal state is allowed (progress updates).
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Success | Failure, _) => false,
            (_, Failure) => true,
            (Started, Started | Processing) => true,
            (Processing, Processing | Finalizing) => true,
            (Finalizing, Finalizing | Success) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Analysis,
    Comparison,
    Registration,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Analysis => "analysis",
            JobKind::Comparison => "comparison",
            JobKind::Registration => "registration",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "analysis" => Some(JobKind::Analysis),
            "comparison" => Some(JobKind::Comparison),
            "registration" => Some(JobKind::Registration),
            _ => None,
        }
    }
}

/// Rejected state change
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Illegal job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

/// Persistent job record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub state: JobState,
    /// Percentage 0-100, monotonically non-decreasing
    pub progress: u8,
    /// Last checkpoint reached, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of times a worker picked the job up
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            state: JobState::Started,
            progress: 0,
            checkpoint: None,
            result: None,
            error: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `next`, rejecting skips and moves out of terminal states
    pub fn transition_to(&mut self, next: JobState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Raise progress; lower values are ignored
    pub fn advance(&mut self, progress: u8) {
        let progress = progress.min(100);
        if progress > self.progress {
            self.progress = progress;
            self.updated_at = Utc::now();
        }
    }

    /// Terminal success. Clears any stale error.
    pub fn succeed(&mut self, output: JobOutput) -> Result<(), TransitionError> {
        self.transition_to(JobState::Success)?;
        self.result = Some(output);
        self.error = None;
        Ok(())
    }

    /// Terminal failure. A failed job never carries a result.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition_to(JobState::Failure)?;
        self.error = Some(message.into());
        self.result = None;
        Ok(())
    }
}
