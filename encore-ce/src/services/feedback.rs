//! Natural-language feedback generation client
//!
//! The text-generation service is external. It receives
//! `{"prompt": "...", "result": {...}}` and answers `{"text": "..."}`.
//! Failures never fail a job; the orchestrator stores the error next to the
//! result instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::FeedbackConfig;
use crate::models::{JobOutput, Verdict};

const USER_AGENT: &str = concat!("encore-ce/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Feedback generation not configured")]
    NotConfigured,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Feedback service returned {0}: {1}")]
    Api(u16, String),

    #[error("Failed to parse feedback response: {0}")]
    Parse(String),
}

#[async_trait]
pub trait FeedbackGenerator: Send + Sync {
    async fn generate(&self, output: &JobOutput) -> Result<String, FeedbackError>;
}

#[derive(Serialize)]
struct FeedbackRequest<'a> {
    prompt: String,
    result: &'a JobOutput,
}

#[derive(Deserialize)]
struct FeedbackResponse {
    text: String,
}

/// HTTP client for the text-generation service
pub struct HttpFeedbackGenerator {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpFeedbackGenerator {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self, FeedbackError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FeedbackError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// `None` when no endpoint is configured
    pub fn from_config(config: &FeedbackConfig) -> Result<Option<Self>, FeedbackError> {
        match &config.endpoint {
            Some(endpoint) if !endpoint.trim().is_empty() => Ok(Some(Self::new(
                endpoint.clone(),
                config.api_key(),
                Duration::from_secs(config.timeout_secs),
            )?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl FeedbackGenerator for HttpFeedbackGenerator {
    async fn generate(&self, output: &JobOutput) -> Result<String, FeedbackError> {
        let body = FeedbackRequest {
            prompt: feedback_prompt(output),
            result: output,
        };

        let mut request = self.http_client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(endpoint = %self.endpoint, "Requesting feedback");
        let response = request
            .send()
            .await
            .map_err(|e| FeedbackError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(FeedbackError::Api(status.as_u16(), error_text));
        }

        let parsed: FeedbackResponse = response
            .json()
            .await
            .map_err(|e| FeedbackError::Parse(e.to_string()))?;
        Ok(parsed.text)
    }
}

/// Generator used when feedback is disabled
pub struct DisabledFeedback;

#[async_trait]
impl FeedbackGenerator for DisabledFeedback {
    async fn generate(&self, _output: &JobOutput) -> Result<String, FeedbackError> {
        Err(FeedbackError::NotConfigured)
    }
}

/// Plain-language summary of a result for the text model
pub fn feedback_prompt(output: &JobOutput) -> String {
    match output {
        JobOutput::Comparison(result) => {
            let s = &result.scores;
            let mut prompt = format!(
                "A musician played a piece and was compared against a reference performance. \
                 Scores out of 100: overall {:.0}, pitch {:.0}, rhythm {:.0}, tempo {:.0}, technique {:.0}. \
                 Their tempo was {:.1} BPM against {:.1} BPM.",
                s.overall,
                s.pitch_match,
                s.rhythm_match,
                s.tempo_match,
                s.technique_match,
                result.user_features.tempo,
                result.reference_features.tempo,
            );
            if let Some(notes) = &result.note_comparisons {
                let count = |verdict| notes.iter().filter(|n| n.verdict == verdict).count();
                prompt.push_str(&format!(
                    " Note timing versus the reference: {} better, {} the same, {} worse.",
                    count(Verdict::Better),
                    count(Verdict::Same),
                    count(Verdict::Worse),
                ));
            }
            prompt.push_str(" Give short, encouraging practice advice.");
            prompt
        }
        JobOutput::Analysis(result) => {
            let voiced = result.features.pitches.iter().filter(|p| **p > 0.0).count();
            format!(
                "A musician recorded a {:.1} second performance at about {:.0} BPM with {} detected notes, \
                 {} of them clearly pitched. Give short, encouraging practice advice.",
                result.features.duration,
                result.features.tempo,
                result.features.onsets.len(),
                voiced,
            )
        }
        JobOutput::Registration(result) => {
            format!("Reference '{}' was registered.", result.song_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisResult, AnalysisType, FeatureSet};
    use axum::{http::HeaderMap, routing::post, Json, Router};

    fn analysis_output() -> JobOutput {
        JobOutput::Analysis(AnalysisResult {
            analysis_type: AnalysisType::Full,
            features: FeatureSet {
                tempo: 96.0,
                onsets: vec![0.1, 0.6, 1.1],
                pitches: vec![220.0, 0.0, 246.9],
                duration: 2.0,
                ..Default::default()
            },
        })
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/generate", addr)
    }

    #[test]
    fn test_prompt_mentions_scores() {
        let prompt = feedback_prompt(&analysis_output());
        assert!(prompt.contains("96 BPM"));
        assert!(prompt.contains("3 detected notes"));
        assert!(prompt.contains("2 of them clearly pitched"));
    }

    #[test]
    fn test_from_config_without_endpoint_is_none() {
        let config = FeedbackConfig::default();
        assert!(HttpFeedbackGenerator::from_config(&config).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_generate_sends_bearer_and_reads_text() {
        let router = Router::new().route(
            "/generate",
            post(|headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(serde_json::json!({
                    "text": format!("{} {}", auth, body["result"]["type"].as_str().unwrap_or_default())
                }))
            }),
        );
        let endpoint = serve(router).await;

        let generator =
            HttpFeedbackGenerator::new(endpoint, Some("secret".to_string()), Duration::from_secs(5))
                .unwrap();
        let text = generator.generate(&analysis_output()).await.unwrap();
        assert_eq!(text, "Bearer secret analysis");
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let router = Router::new().route(
            "/generate",
            post(|| async { (axum::http::StatusCode::BAD_GATEWAY, "model offline") }),
        );
        let endpoint = serve(router).await;

        let generator = HttpFeedbackGenerator::new(endpoint, None, Duration::from_secs(5)).unwrap();
        let err = generator.generate(&analysis_output()).await.unwrap_err();
        assert!(matches!(err, FeedbackError::Api(502, ref body) if body == "model offline"));
    }

    #[tokio::test]
    async fn test_disabled_generator() {
        let err = DisabledFeedback.generate(&analysis_output()).await.unwrap_err();
        assert!(matches!(err, FeedbackError::NotConfigured));
    }
}
