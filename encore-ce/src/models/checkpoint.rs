//! Named pipeline checkpoints
//!
//! Each checkpoint carries a fixed progress value and the job state that owns
//! it. Completion is signalled by the terminal state, never by a 100 checkpoint.

use serde::{Deserialize, Serialize};

use super::{JobKind, JobState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    Decoding,
    ExtractingUserFeatures,
    ExtractingReferenceFeatures,
    Aligning,
    Segmenting,
    EstimatingPitch,
    ClassifyingTechnique,
    Scoring,
    Persisting,
    GeneratingFeedback,
}

const ANALYSIS: &[Checkpoint] = &[
    Checkpoint::Decoding,
    Checkpoint::ExtractingUserFeatures,
    Checkpoint::Segmenting,
    Checkpoint::EstimatingPitch,
    Checkpoint::ClassifyingTechnique,
    Checkpoint::Persisting,
    Checkpoint::GeneratingFeedback,
];

const COMPARISON: &[Checkpoint] = &[
    Checkpoint::Decoding,
    Checkpoint::ExtractingUserFeatures,
    Checkpoint::ExtractingReferenceFeatures,
    Checkpoint::Aligning,
    Checkpoint::Segmenting,
    Checkpoint::EstimatingPitch,
    Checkpoint::ClassifyingTechnique,
    Checkpoint::Scoring,
    Checkpoint::Persisting,
    Checkpoint::GeneratingFeedback,
];

const REGISTRATION: &[Checkpoint] = &[
    Checkpoint::Decoding,
    Checkpoint::ExtractingReferenceFeatures,
    Checkpoint::Segmenting,
    Checkpoint::EstimatingPitch,
    Checkpoint::ClassifyingTechnique,
    Checkpoint::Persisting,
];

impl Checkpoint {
    /// Ordered checkpoints for a job kind
    pub fn sequence(kind: JobKind) -> &'static [Checkpoint] {
        match kind {
            JobKind::Analysis => ANALYSIS,
            JobKind::Comparison => COMPARISON,
            JobKind::Registration => REGISTRATION,
        }
    }

    pub fn progress(self) -> u8 {
        match self {
            Checkpoint::Decoding => 10,
            Checkpoint::ExtractingUserFeatures => 20,
            Checkpoint::ExtractingReferenceFeatures => 35,
            Checkpoint::Aligning => 45,
            Checkpoint::Segmenting => 50,
            Checkpoint::EstimatingPitch => 60,
            Checkpoint::ClassifyingTechnique => 80,
            Checkpoint::Scoring => 90,
            Checkpoint::Persisting => 95,
            Checkpoint::GeneratingFeedback => 99,
        }
    }

    pub fn state(self) -> JobState {
        match self {
            Checkpoint::Scoring | Checkpoint::Persisting | Checkpoint::GeneratingFeedback => {
                JobState::Finalizing
            }
            _ => JobState::Processing,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Checkpoint::Decoding => "decoding",
            Checkpoint::ExtractingUserFeatures => "extracting_user_features",
            Checkpoint::ExtractingReferenceFeatures => "extracting_reference_features",
            Checkpoint::Aligning => "aligning",
            Checkpoint::Segmenting => "segmenting",
            Checkpoint::EstimatingPitch => "estimating_pitch",
            Checkpoint::ClassifyingTechnique => "classifying_technique",
            Checkpoint::Scoring => "scoring",
            Checkpoint::Persisting => "persisting",
            Checkpoint::GeneratingFeedback => "generating_feedback",
        }
    }
}

/// Walks a kind's checkpoint list in order
///
/// Checkpoints may be skipped forward (e.g. no feedback requested) but never
/// revisited.
#[derive(Debug)]
pub struct CheckpointCursor {
    sequence: &'static [Checkpoint],
    position: usize,
}

impl CheckpointCursor {
    pub fn new(kind: JobKind) -> Self {
        Self {
            sequence: Checkpoint::sequence(kind),
            position: 0,
        }
    }

    /// Advance to `checkpoint`. Returns false if it is not ahead of the cursor.
    pub fn reach(&mut self, checkpoint: Checkpoint) -> bool {
        match self.sequence[self.position..]
            .iter()
            .position(|c| *c == checkpoint)
        {
            Some(offset) => {
                self.position += offset + 1;
                true
            }
            None => false,
        }
    }

    pub fn remaining(&self) -> &'static [Checkpoint] {
        &self.sequence[self.position..]
    }
}
