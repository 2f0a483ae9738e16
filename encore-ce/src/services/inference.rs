//! Per-segment model inference
//!
//! Pitch estimation and technique classification sit behind traits so real
//! models can be swapped in. Segments are processed in parallel with rayon;
//! output order always matches segment order.

use rayon::prelude::*;
use std::sync::Arc;
use thiserror::Error;

use crate::models::Segment;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    /// Model not loaded or not configured
    #[error("Model unavailable: {0}")]
    Unavailable(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Representative fundamental frequency of one segment
pub trait PitchEstimator: Send + Sync {
    /// `Ok(None)` for an unvoiced segment
    fn estimate(&self, samples: &[f32], sample_rate: u32) -> Result<Option<f64>, ModelError>;
}

/// Playing-technique labels of one segment
pub trait TechniqueClassifier: Send + Sync {
    fn classify(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<String>, ModelError>;
}

/// Runs the models over a list of segments
#[derive(Clone)]
pub struct SegmentInference {
    pitch: Arc<dyn PitchEstimator>,
    technique: Arc<dyn TechniqueClassifier>,
}

impl SegmentInference {
    pub fn new(pitch: Arc<dyn PitchEstimator>, technique: Arc<dyn TechniqueClassifier>) -> Self {
        Self { pitch, technique }
    }

    /// One pitch per segment in Hz, `0.0` when unvoiced
    ///
    /// An unavailable estimator reports every segment as unvoiced.
    pub fn pitches(&self, segments: &[Segment], sample_rate: u32) -> Result<Vec<f64>, ModelError> {
        let pitches: Result<Vec<f64>, ModelError> = segments
            .par_iter()
            .map(|segment| {
                let hz = self.pitch.estimate(&segment.samples, sample_rate)?;
                Ok(hz.filter(|hz| hz.is_finite() && *hz > 0.0).unwrap_or(0.0))
            })
            .collect();

        match pitches {
            Err(ModelError::Unavailable(reason)) => {
                tracing::warn!(%reason, "Pitch estimator unavailable, reporting segments unvoiced");
                Ok(vec![0.0; segments.len()])
            }
            other => other,
        }
    }

    /// One label set per segment
    ///
    /// An unavailable classifier yields an empty set for every segment.
    pub fn techniques(
        &self,
        segments: &[Segment],
        sample_rate: u32,
    ) -> Result<Vec<Vec<String>>, ModelError> {
        let labels: Result<Vec<Vec<String>>, ModelError> = segments
            .par_iter()
            .map(|segment| self.technique.classify(&segment.samples, sample_rate))
            .collect();

        match labels {
            Err(ModelError::Unavailable(reason)) => {
                tracing::warn!(%reason, "Technique classifier unavailable, omitting labels");
                Ok(vec![Vec::new(); segments.len()])
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reports the segment length as its pitch
    struct LengthPitch;

    impl PitchEstimator for LengthPitch {
        fn estimate(&self, samples: &[f32], _sample_rate: u32) -> Result<Option<f64>, ModelError> {
            if samples.iter().all(|s| *s == 0.0) {
                return Ok(None);
            }
            Ok(Some(samples.len() as f64))
        }
    }

    struct FailingPitch(ModelError);

    impl PitchEstimator for FailingPitch {
        fn estimate(&self, _samples: &[f32], _sample_rate: u32) -> Result<Option<f64>, ModelError> {
            Err(self.0.clone())
        }
    }

    struct FixedLabels(Result<Vec<String>, ModelError>);

    impl TechniqueClassifier for FixedLabels {
        fn classify(&self, _samples: &[f32], _sample_rate: u32) -> Result<Vec<String>, ModelError> {
            self.0.clone()
        }
    }

    fn segment(len: usize, value: f32) -> Segment {
        Segment {
            samples: vec![value; len],
            start_time: 0.0,
            end_time: 0.0,
            onset_deviation: 0.0,
            note_index: None,
        }
    }

    fn inference(labels: Result<Vec<String>, ModelError>) -> SegmentInference {
        SegmentInference::new(Arc::new(LengthPitch), Arc::new(FixedLabels(labels)))
    }

    #[test]
    fn test_pitches_preserve_segment_order() {
        let segments: Vec<Segment> = (1..=64).map(|n| segment(n * 10, 0.5)).collect();
        let pitches = inference(Ok(vec![])).pitches(&segments, 22050).unwrap();
        let expected: Vec<f64> = (1..=64).map(|n| (n * 10) as f64).collect();
        assert_eq!(pitches, expected);
    }

    #[test]
    fn test_unvoiced_segment_is_zero() {
        let segments = vec![segment(100, 0.5), segment(100, 0.0)];
        let pitches = inference(Ok(vec![])).pitches(&segments, 22050).unwrap();
        assert_eq!(pitches, vec![100.0, 0.0]);
    }

    #[test]
    fn test_unavailable_pitch_estimator_yields_unvoiced() {
        let segments = vec![segment(10, 0.5), segment(20, 0.5)];
        let inference = SegmentInference::new(
            Arc::new(FailingPitch(ModelError::Unavailable("not loaded".to_string()))),
            Arc::new(FixedLabels(Ok(vec![]))),
        );
        assert_eq!(inference.pitches(&segments, 22050).unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_pitch_inference_failure_propagates() {
        let segments = vec![segment(10, 0.5)];
        let inference = SegmentInference::new(
            Arc::new(FailingPitch(ModelError::Inference("nan".to_string()))),
            Arc::new(FixedLabels(Ok(vec![]))),
        );
        assert!(matches!(
            inference.pitches(&segments, 22050),
            Err(ModelError::Inference(_))
        ));
    }

    #[test]
    fn test_unavailable_classifier_yields_empty_labels() {
        let segments = vec![segment(10, 0.5), segment(10, 0.5)];
        let labels = inference(Err(ModelError::Unavailable("not loaded".to_string())))
            .techniques(&segments, 22050)
            .unwrap();
        assert_eq!(labels, vec![Vec::<String>::new(), Vec::new()]);
    }

    #[test]
    fn test_classifier_failure_propagates() {
        let segments = vec![segment(10, 0.5)];
        let err = inference(Err(ModelError::Inference("bad tensor".to_string())))
            .techniques(&segments, 22050)
            .unwrap_err();
        assert!(matches!(err, ModelError::Inference(_)));
    }

    #[test]
    fn test_labels_returned_per_segment() {
        let segments = vec![segment(10, 0.5), segment(10, 0.5)];
        let labels = inference(Ok(vec!["slide".to_string()]))
            .techniques(&segments, 22050)
            .unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[1], vec!["slide".to_string()]);
    }
}
