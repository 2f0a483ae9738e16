//! Data models for encore-ce

pub mod checkpoint;
pub mod features;
pub mod job;
pub mod requests;
pub mod results;

pub use checkpoint::{Checkpoint, CheckpointCursor};
pub use features::{
    ChromaFrame, FeatureSet, NoteEvent, NoteScore, Recording, Segment, SegmentSpan, TempoMap,
    TimeMapping,
};
pub use job::{Job, JobKind, JobState, TransitionError};
pub use requests::{
    AnalysisRequest, AnalysisType, ComparisonRequest, JobRequest, RegistrationRequest,
};
pub use results::{
    AnalysisResult, ComparisonResult, JobOutput, MidiData, NoteComparison, ReferenceDocument,
    ReferenceMetadata, RegistrationResult, ResultDocument, ResultType, ScoreSet, Verdict,
};
