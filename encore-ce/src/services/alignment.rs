//! Candidate → reference time alignment
//!
//! DTW over chroma matrices (frame-to-frame Euclidean distance). The warping
//! path is converted to times, filtered to strictly increasing reference
//! time, then resampled onto evenly spaced reference-time points.
//!
//! Alignment is approximate. A failure here is recovered by the caller with
//! onset-based segmentation.

use thiserror::Error;

use crate::config::AlignmentConfig;
use crate::models::{ChromaFrame, FeatureSet, TimeMapping};

#[derive(Debug, Error, PartialEq)]
pub enum AlignmentError {
    #[error("Empty chroma matrix for {0}")]
    EmptyInput(&'static str),

    #[error("Reference duration must be positive")]
    ZeroDuration,

    #[error("Alignment produced {0} usable time pairs; at least 2 required")]
    InsufficientPairs(usize),
}

/// Chroma matrix plus its time base
#[derive(Debug, Clone, Copy)]
pub struct ChromaTrack<'a> {
    pub chroma: &'a [ChromaFrame],
    /// Seconds between frames
    pub frame_duration: f64,
    /// Seconds
    pub duration: f64,
}

impl<'a> ChromaTrack<'a> {
    pub fn from_features(features: &'a FeatureSet, frame_duration: f64) -> Self {
        Self {
            chroma: &features.chroma,
            frame_duration,
            duration: features.duration,
        }
    }
}

pub struct AlignmentEngine {
    config: AlignmentConfig,
}

impl AlignmentEngine {
    pub fn new(config: AlignmentConfig) -> Self {
        Self { config }
    }

    /// Map candidate time to reference time over `[0, reference.duration]`
    pub fn align(
        &self,
        candidate: ChromaTrack<'_>,
        reference: ChromaTrack<'_>,
    ) -> Result<TimeMapping, AlignmentError> {
        if candidate.chroma.is_empty() {
            return Err(AlignmentError::EmptyInput("candidate"));
        }
        if reference.chroma.is_empty() {
            return Err(AlignmentError::EmptyInput("reference"));
        }
        if !(reference.duration > 0.0) {
            return Err(AlignmentError::ZeroDuration);
        }

        let max_frames = self.config.max_dtw_frames.max(2);
        let (cand_pooled, cand_factor) = pool_frames(candidate.chroma, max_frames);
        let (ref_pooled, ref_factor) = pool_frames(reference.chroma, max_frames);

        let path = dtw_path(&cand_pooled, &ref_pooled);

        let to_time = |index: usize, factor: usize, frame_duration: f64| {
            (index as f64 * factor as f64 + (factor as f64 - 1.0) / 2.0) * frame_duration
        };
        let mut pairs: Vec<(f64, f64)> = path
            .iter()
            .map(|&(i, j)| {
                (
                    to_time(i, cand_factor, candidate.frame_duration),
                    to_time(j, ref_factor, reference.frame_duration),
                )
            })
            .collect();

        // Stable sort keeps path order among equal reference times
        pairs.sort_by(|a, b| a.1.total_cmp(&b.1));
        let mut valid: Vec<(f64, f64)> = Vec::with_capacity(pairs.len());
        for pair in pairs {
            if valid.last().map_or(true, |last| pair.1 > last.1) {
                valid.push(pair);
            }
        }
        if valid.len() < 2 {
            return Err(AlignmentError::InsufficientPairs(valid.len()));
        }

        let mapping = resample(
            &valid,
            self.config.resample_points.max(2),
            reference.duration,
            candidate.duration.max(0.0),
        );

        tracing::debug!(
            path_len = path.len(),
            valid_pairs = valid.len(),
            cand_pool = cand_factor,
            ref_pool = ref_factor,
            "Alignment complete"
        );

        Ok(mapping)
    }
}

/// Average-pool frames in time so the result has at most `max_frames` frames
fn pool_frames(chroma: &[ChromaFrame], max_frames: usize) -> (Vec<ChromaFrame>, usize) {
    let factor = chroma.len().div_ceil(max_frames).max(1);
    if factor == 1 {
        return (chroma.to_vec(), 1);
    }
    let pooled = chroma
        .chunks(factor)
        .map(|block| {
            let mut mean = [0.0f32; 12];
            for frame in block {
                for (acc, v) in mean.iter_mut().zip(frame.iter()) {
                    *acc += *v;
                }
            }
            for acc in mean.iter_mut() {
                *acc /= block.len() as f32;
            }
            mean
        })
        .collect();
    (pooled, factor)
}

fn euclidean(a: &ChromaFrame, b: &ChromaFrame) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

/// Minimum-cost monotonic warping path from (0, 0) to (n-1, m-1)
///
/// Steps: (1,0), (0,1), (1,1). Ties prefer the diagonal.
fn dtw_path(a: &[ChromaFrame], b: &[ChromaFrame]) -> Vec<(usize, usize)> {
    let (n, m) = (a.len(), b.len());
    let width = m + 1;
    let mut cost = vec![f32::INFINITY; (n + 1) * width];
    cost[0] = 0.0;

    for i in 1..=n {
        for j in 1..=m {
            let d = euclidean(&a[i - 1], &b[j - 1]);
            let best = cost[(i - 1) * width + (j - 1)]
                .min(cost[(i - 1) * width + j])
                .min(cost[i * width + (j - 1)]);
            cost[i * width + j] = d + best;
        }
    }

    let mut path = Vec::with_capacity(n + m);
    let (mut i, mut j) = (n, m);
    while i > 0 && j > 0 {
        path.push((i - 1, j - 1));
        if i == 1 && j == 1 {
            break;
        }
        let diag = cost[(i - 1) * width + (j - 1)];
        let up = cost[(i - 1) * width + j];
        let left = cost[i * width + (j - 1)];
        if diag <= up && diag <= left {
            i -= 1;
            j -= 1;
        } else if up <= left {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    path.reverse();
    path
}

/// Evenly spaced reference points with linearly interpolated candidate times
fn resample(
    pairs: &[(f64, f64)],
    points: usize,
    reference_duration: f64,
    candidate_duration: f64,
) -> TimeMapping {
    let path = TimeMapping::from_sorted_pairs(pairs.to_vec());
    let step = reference_duration / (points - 1) as f64;
    let resampled = (0..points)
        .map(|k| {
            let reference_time = if k == points - 1 {
                reference_duration
            } else {
                k as f64 * step
            };
            let candidate_time = path
                .candidate_time(reference_time)
                .clamp(0.0, candidate_duration);
            (candidate_time, reference_time)
        })
        .collect();
    TimeMapping::from_sorted_pairs(resampled)
}
