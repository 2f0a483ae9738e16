//! Job submission payloads
//!
//! Byte fields travel base64-encoded in JSON.

use serde::{Deserialize, Serialize};

use super::JobKind;

/// Which inference dimensions an analysis job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    #[default]
    Full,
    Pitch,
    Technique,
}

impl AnalysisType {
    pub fn wants_pitch(self) -> bool {
        matches!(self, AnalysisType::Full | AnalysisType::Pitch)
    }

    pub fn wants_technique(self) -> bool {
        matches!(self, AnalysisType::Full | AnalysisType::Technique)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    #[serde(with = "base64_bytes")]
    pub audio_bytes: Vec<u8>,
    #[serde(default)]
    pub analysis_type: AnalysisType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_id: Option<String>,
    #[serde(default)]
    pub generate_feedback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRequest {
    #[serde(with = "base64_bytes")]
    pub user_audio_bytes: Vec<u8>,
    /// Direct reference audio; takes precedence over `song_id`
    #[serde(default, with = "base64_bytes_opt", skip_serializing_if = "Option::is_none")]
    pub reference_audio_bytes: Option<Vec<u8>>,
    /// Stored reference to compare against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_id: Option<String>,
    #[serde(default, with = "base64_bytes_opt", skip_serializing_if = "Option::is_none")]
    pub midi_bytes: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub generate_feedback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    #[serde(with = "base64_bytes")]
    pub audio_bytes: Vec<u8>,
    pub song_id: String,
    #[serde(default, with = "base64_bytes_opt", skip_serializing_if = "Option::is_none")]
    pub midi_bytes: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ComparisonRequest {
    /// Stored reference id with surrounding whitespace removed
    pub fn reference_song_id(&self) -> Option<&str> {
        self.song_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Queued work item, stored with the job row until acknowledged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobRequest {
    Analysis(AnalysisRequest),
    Comparison(ComparisonRequest),
    Registration(RegistrationRequest),
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Analysis(_) => JobKind::Analysis,
            JobRequest::Comparison(_) => JobKind::Comparison,
            JobRequest::Registration(_) => JobKind::Registration,
        }
    }

    /// Shape checks done before a job is accepted
    pub fn validate(&self) -> Result<(), String> {
        match self {
            JobRequest::Analysis(req) => {
                if req.audio_bytes.is_empty() {
                    return Err("audio_bytes must not be empty".to_string());
                }
            }
            JobRequest::Comparison(req) => {
                if req.user_audio_bytes.is_empty() {
                    return Err("user_audio_bytes must not be empty".to_string());
                }
                let has_reference_audio = req
                    .reference_audio_bytes
                    .as_ref()
                    .is_some_and(|b| !b.is_empty());
                let has_song = req.reference_song_id().is_some();
                if !has_reference_audio && !has_song {
                    return Err(
                        "either reference_audio_bytes or song_id is required".to_string()
                    );
                }
            }
            JobRequest::Registration(req) => {
                if req.audio_bytes.is_empty() {
                    return Err("audio_bytes must not be empty".to_string());
                }
                if req.song_id.trim().is_empty() {
                    return Err("song_id must not be empty".to_string());
                }
            }
        }
        Ok(())
    }
}

pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}

pub(crate) mod base64_bytes_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.trim())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
