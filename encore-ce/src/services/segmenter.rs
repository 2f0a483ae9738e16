//! Segmentation of a recording into scoring units
//!
//! Note-guided mode maps each reference note through the time mapping; the
//! onset fallback cuts the recording from onset to onset. Boundaries are
//! clamped to the recording, segments that would start at or after its end
//! are dropped, and no segment is ever emitted empty.

use crate::config::SegmenterConfig;
use crate::models::{NoteEvent, Recording, Segment, TimeMapping};

pub struct Segmenter {
    config: SegmenterConfig,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    /// One segment per reference note
    ///
    /// `onsets` are the detected attacks of `recording`, used for the onset
    /// deviation of each segment.
    pub fn note_guided(
        &self,
        recording: &Recording,
        notes: &[NoteEvent],
        mapping: &TimeMapping,
        onsets: &[f64],
    ) -> Vec<Segment> {
        let duration = recording.duration();
        let mut segments = Vec::with_capacity(notes.len());

        for (index, note) in notes.iter().enumerate() {
            let mapped = mapping.candidate_time(note.start);
            let start = mapped.clamp(0.0, duration);
            if start >= duration {
                continue;
            }
            let end = (mapped + note.duration()).clamp(0.0, duration);
            let samples = recording.slice(start, end);
            if samples.is_empty() {
                continue;
            }
            segments.push(Segment {
                samples,
                start_time: start,
                end_time: end,
                onset_deviation: self.onset_deviation(mapped, note.start, onsets),
                note_index: Some(index),
            });
        }

        if segments.is_empty() {
            return whole_recording(recording);
        }
        segments
    }

    /// Segment `i` spans `[onset_i, onset_{i+1})`, the last runs to the end
    pub fn onset_based(&self, recording: &Recording, onsets: &[f64]) -> Vec<Segment> {
        let duration = recording.duration();
        let mut segments = Vec::with_capacity(onsets.len());

        for (i, &onset) in onsets.iter().enumerate() {
            let start = onset.clamp(0.0, duration);
            if start >= duration {
                continue;
            }
            let end = onsets
                .get(i + 1)
                .copied()
                .unwrap_or(duration)
                .clamp(0.0, duration);
            let samples = recording.slice(start, end);
            if samples.is_empty() {
                continue;
            }
            segments.push(Segment {
                samples,
                start_time: start,
                end_time: end,
                onset_deviation: 0.0,
                note_index: None,
            });
        }

        if segments.is_empty() {
            return whole_recording(recording);
        }
        segments
    }

    /// Expected time minus the nearest detected onset within the search window
    ///
    /// Without an onset in the window, the raw alignment residual
    /// `expected - reference_time` is reported.
    pub fn onset_deviation(&self, expected: f64, reference_time: f64, onsets: &[f64]) -> f64 {
        let window = self.config.onset_search_window;
        let nearest = onsets
            .iter()
            .copied()
            .filter(|onset| (onset - expected).abs() <= window)
            .min_by(|a, b| (a - expected).abs().total_cmp(&(b - expected).abs()));
        match nearest {
            Some(onset) => expected - onset,
            None => expected - reference_time,
        }
    }

    /// Deviations of the reference performer against their own transcription
    ///
    /// Equivalent to note-guided segmentation of the reference with the
    /// identity mapping; usable without the reference audio.
    pub fn reference_deviations(&self, notes: &[NoteEvent], onsets: &[f64]) -> Vec<f64> {
        notes
            .iter()
            .map(|note| self.onset_deviation(note.start, note.start, onsets))
            .collect()
    }
}

fn whole_recording(recording: &Recording) -> Vec<Segment> {
    if recording.is_empty() {
        return Vec::new();
    }
    vec![Segment {
        samples: recording.samples.clone(),
        start_time: 0.0,
        end_time: recording.duration(),
        onset_deviation: 0.0,
        note_index: None,
    }]
}
