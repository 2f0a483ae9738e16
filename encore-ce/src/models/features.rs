//! Signal-level data model
//!
//! Recordings, note transcriptions, time mappings, segments and the
//! per-recording feature set.

use serde::{Deserialize, Serialize};

/// 12 pitch-class energies for one analysis frame (C, C#, ..., B)
pub type ChromaFrame = [f32; 12];

/// Mono PCM buffer at a fixed sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Recording {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Copy of the samples in `[start, end)` seconds, clamped to the buffer
    pub fn slice(&self, start: f64, end: f64) -> Vec<f32> {
        let to_index = |t: f64| {
            let idx = (t.max(0.0) * self.sample_rate as f64).round() as usize;
            idx.min(self.samples.len())
        };
        let (from, to) = (to_index(start), to_index(end));
        if from >= to {
            return Vec::new();
        }
        self.samples[from..to].to_vec()
    }
}

/// One note from a symbolic transcription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// Seconds
    pub start: f64,
    /// Seconds, >= start
    pub end: f64,
    /// MIDI key 0..127
    pub pitch: u8,
    /// 0..127
    pub velocity: u8,
    pub channel: u8,
}

impl NoteEvent {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Tempo changes over time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TempoMap {
    /// BPM
    pub tempos: Vec<f64>,
    /// Seconds, non-decreasing, parallel to `tempos`
    pub tempo_times: Vec<f64>,
}

/// Decoded note transcription
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteScore {
    /// Ordered by start time
    pub notes: Vec<NoteEvent>,
    #[serde(flatten)]
    pub tempo_map: TempoMap,
}

/// Monotonic warp from candidate time to reference time
///
/// Stored as `(source_time, target_time)` pairs where source is the candidate
/// and target the reference. Targets are strictly increasing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeMapping {
    pairs: Vec<(f64, f64)>,
}

impl TimeMapping {
    /// Build from pairs already sorted with strictly increasing targets
    pub(crate) fn from_sorted_pairs(pairs: Vec<(f64, f64)>) -> Self {
        Self { pairs }
    }

    /// Candidate time equals reference time
    pub fn identity(duration: f64) -> Self {
        let end = duration.max(f64::EPSILON);
        Self {
            pairs: vec![(0.0, 0.0), (end, end)],
        }
    }

    pub fn pairs(&self) -> &[(f64, f64)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// True when targets strictly increase and sources never decrease
    pub fn is_monotonic(&self) -> bool {
        self.pairs
            .windows(2)
            .all(|w| w[1].1 > w[0].1 && w[1].0 >= w[0].0)
    }

    /// Map a reference time to candidate time
    ///
    /// Piecewise-linear between pairs, clamped to the first/last pair.
    pub fn candidate_time(&self, reference_time: f64) -> f64 {
        let (first, last) = match (self.pairs.first(), self.pairs.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return reference_time,
        };
        if reference_time <= first.1 {
            return first.0;
        }
        if reference_time >= last.1 {
            return last.0;
        }

        let upper = self.pairs.partition_point(|p| p.1 < reference_time);
        let (s1, t1) = self.pairs[upper];
        let (s0, t0) = self.pairs[upper - 1];
        let span = t1 - t0;
        if span <= 0.0 {
            return s0;
        }
        s0 + (reference_time - t0) / span * (s1 - s0)
    }
}

/// A span of the candidate (or reference) recording scored as one unit
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub samples: Vec<f32>,
    pub start_time: f64,
    pub end_time: f64,
    /// Expected attack time minus detected attack time, seconds
    pub onset_deviation: f64,
    /// Reference note that produced this segment (note-guided mode)
    pub note_index: Option<usize>,
}

/// Where one scored segment sits in its recording
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpan {
    /// Seconds
    pub start: f64,
    /// Seconds
    pub end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_index: Option<usize>,
}

impl SegmentSpan {
    /// Half-open `[start, end)`
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}

impl From<&Segment> for SegmentSpan {
    fn from(segment: &Segment) -> Self {
        Self {
            start: segment.start_time,
            end: segment.end_time,
            note_index: segment.note_index,
        }
    }
}

/// Features extracted from one recording
///
/// `pitches` and `techniques` are parallel arrays with one entry per segment,
/// and `segments` records where each of those segments lies. Unvoiced
/// segments carry a pitch of `0.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Global tempo in BPM, 0 when unknown
    pub tempo: f64,
    /// Strictly increasing attack times in seconds
    pub onsets: Vec<f64>,
    /// Hz per segment
    pub pitches: Vec<f64>,
    pub techniques: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<SegmentSpan>,
    /// Frame-major chroma matrix
    pub chroma: Vec<ChromaFrame>,
    /// Seconds
    #[serde(default)]
    pub duration: f64,
}

impl FeatureSet {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_duration_and_slice() {
        let rec = Recording::new(vec![0.5; 22050], 22050);
        assert!((rec.duration() - 1.0).abs() < 1e-9);
        assert_eq!(rec.slice(0.25, 0.5).len(), 5512);
        assert!(rec.slice(2.0, 3.0).is_empty());
        assert!(rec.slice(0.5, 0.25).is_empty());
        assert_eq!(rec.slice(-1.0, 10.0).len(), 22050);
    }

    #[test]
    fn test_zero_rate_recording_has_zero_duration() {
        assert_eq!(Recording::new(vec![1.0; 10], 0).duration(), 0.0);
    }

    #[test]
    fn test_identity_mapping() {
        let mapping = TimeMapping::identity(10.0);
        assert!(mapping.is_monotonic());
        assert!((mapping.candidate_time(3.3) - 3.3).abs() < 1e-9);
    }

    #[test]
    fn test_mapping_interpolates_and_clamps() {
        let mapping =
            TimeMapping::from_sorted_pairs(vec![(1.0, 0.0), (3.0, 2.0), (4.0, 4.0)]);
        assert!(mapping.is_monotonic());
        assert!((mapping.candidate_time(1.0) - 2.0).abs() < 1e-9);
        assert!((mapping.candidate_time(3.0) - 3.5).abs() < 1e-9);
        assert_eq!(mapping.candidate_time(-5.0), 1.0);
        assert_eq!(mapping.candidate_time(50.0), 4.0);
    }

    #[test]
    fn test_empty_mapping_is_identity() {
        let mapping = TimeMapping::default();
        assert_eq!(mapping.candidate_time(7.5), 7.5);
    }

    #[test]
    fn test_segment_span_is_half_open() {
        let span = SegmentSpan::from(&Segment {
            samples: vec![0.0; 10],
            start_time: 1.0,
            end_time: 1.5,
            onset_deviation: 0.0,
            note_index: Some(3),
        });
        assert_eq!(span.note_index, Some(3));
        assert!(span.contains(1.0));
        assert!(span.contains(1.25));
        assert!(!span.contains(1.5));
        assert!(!span.contains(0.99));
    }

    #[test]
    fn test_feature_set_serializes_chroma_frame_major() {
        let mut features = FeatureSet::empty();
        features.chroma.push([0.0; 12]);
        let json = serde_json::to_value(&features).unwrap();
        assert_eq!(json["chroma"][0].as_array().unwrap().len(), 12);
        assert_eq!(json["tempo"], 0.0);
        assert!(json.get("segments").is_none());
    }
}
