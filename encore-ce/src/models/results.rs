//! Job outputs and persisted documents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AnalysisType, FeatureSet, NoteEvent};

/// Per-dimension match percentages, all within `[0, 100]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSet {
    pub tempo_match: f64,
    pub pitch_match: f64,
    pub rhythm_match: f64,
    pub technique_match: f64,
    pub overall: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rhythm_absolute_match: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rhythm_relative_match: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_similarity: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Better,
    Same,
    Worse,
}

/// Timing of one reference note, user vs reference performer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteComparison {
    pub index: usize,
    pub user_deviation: f64,
    pub reference_deviation: f64,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub user_features: FeatureSet,
    pub reference_features: FeatureSet,
    pub scores: ScoreSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_comparisons: Option<Vec<NoteComparison>>,
    /// False when the onset fallback replaced note-guided segmentation
    pub alignment_used: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analysis_type: AnalysisType,
    pub features: FeatureSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub song_id: String,
    pub has_midi: bool,
    pub onset_count: usize,
    pub segment_count: usize,
}

/// Result attached to a successful job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobOutput {
    Analysis(AnalysisResult),
    Comparison(ComparisonResult),
    Registration(RegistrationResult),
}

/// Filter for result listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Analysis,
    Comparison,
    #[default]
    All,
}

impl ResultType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultType::Analysis => "analysis",
            ResultType::Comparison => "comparison",
            ResultType::All => "all",
        }
    }
}

/// Persisted result document, keyed by task id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub task_id: Uuid,
    /// "analysis" or "comparison"
    pub result_type: ResultType,
    pub result: JobOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// Set instead of `feedback` when generation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiData {
    pub notes: Vec<NoteEvent>,
    pub tempos: Vec<f64>,
    pub tempo_times: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceMetadata {
    pub song_id: String,
    pub has_midi: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Persisted reference, keyed by song id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDocument {
    pub song_id: String,
    #[serde(flatten)]
    pub features: FeatureSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midi_data: Option<MidiData>,
    pub metadata: ReferenceMetadata,
    pub created_at: DateTime<Utc>,
}
