//! Pipeline services
//!
//! Signal processing (features, alignment, segmentation), the model
//! boundaries, scoring, and the job machinery that sequences them.

pub mod alignment;
pub mod feature_extractor;
pub mod feedback;
pub mod inference;
pub mod job_orchestrator;
pub mod note_score_decoder;
pub mod pitch_estimator;
pub mod scoring;
pub mod segmenter;
pub mod technique_classifier;
pub mod worker_pool;

pub use alignment::{AlignmentEngine, AlignmentError, ChromaTrack};
pub use feature_extractor::FeatureExtractor;
pub use feedback::{DisabledFeedback, FeedbackError, FeedbackGenerator, HttpFeedbackGenerator};
pub use inference::{ModelError, PitchEstimator, SegmentInference, TechniqueClassifier};
pub use job_orchestrator::{JobOrchestrator, Pipeline};
pub use note_score_decoder::{decode_note_score, NoteScoreError};
pub use pitch_estimator::YinPitchEstimator;
pub use scoring::ScoringEngine;
pub use segmenter::Segmenter;
pub use technique_classifier::UnavailableTechniqueClassifier;
pub use worker_pool::{CancelOutcome, JobHandler, JobStatus, SubmitError, WorkerPool};
