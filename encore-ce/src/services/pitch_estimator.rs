//! YIN fundamental-frequency estimator
//!
//! Analyses evenly spaced frames across a segment and reports the median of
//! the voiced frame estimates. A segment with no voiced frame is unvoiced.

use super::inference::{ModelError, PitchEstimator};

const YIN_THRESHOLD: f32 = 0.15;
/// RMS below this is treated as silence
const SILENCE_RMS: f32 = 0.02;
/// Best CMND value above this is not a pitched signal
const MAX_APERIODICITY: f32 = 0.5;

pub struct YinPitchEstimator {
    min_freq: f32,
    max_freq: f32,
    frame_size: usize,
    max_frames: usize,
}

impl Default for YinPitchEstimator {
    fn default() -> Self {
        Self {
            min_freq: 50.0,
            max_freq: 2000.0,
            frame_size: 2048,
            max_frames: 24,
        }
    }
}

impl YinPitchEstimator {
    pub fn new(min_freq: f32, max_freq: f32) -> Self {
        Self {
            min_freq,
            max_freq,
            ..Default::default()
        }
    }

    /// Start offsets of the frames analysed for a segment of `len` samples
    fn frame_offsets(&self, len: usize) -> Vec<usize> {
        if len <= self.frame_size {
            return vec![0];
        }
        let last = len - self.frame_size;
        let count = (last / (self.frame_size / 2) + 1).clamp(1, self.max_frames);
        if count == 1 {
            return vec![last / 2];
        }
        (0..count).map(|k| k * last / (count - 1)).collect()
    }

    fn detect(&self, frame: &[f32], sample_rate: f32) -> Option<f32> {
        if frame.len() < 2 {
            return None;
        }

        let mean = frame.iter().sum::<f32>() / frame.len() as f32;
        let energy: f32 = frame.iter().map(|s| (s - mean) * (s - mean)).sum();
        if (energy / frame.len() as f32).sqrt() < SILENCE_RMS {
            return None;
        }

        let half_len = frame.len() / 2;
        let min_lag = (sample_rate / self.max_freq).ceil().max(1.0) as usize;
        let max_lag = ((sample_rate / self.min_freq).floor() as usize).min(half_len);
        if min_lag >= max_lag || max_lag < 2 {
            return None;
        }

        let mut diff = vec![0.0f32; max_lag + 1];
        for (tau, slot) in diff.iter_mut().enumerate().skip(1) {
            *slot = (0..half_len)
                .map(|j| {
                    let d = frame[j] - frame[j + tau];
                    d * d
                })
                .sum();
        }

        // Cumulative mean normalized difference
        let mut cmnd = vec![1.0f32; max_lag + 1];
        let mut running_sum = 0.0f32;
        for tau in 1..=max_lag {
            running_sum += diff[tau];
            if running_sum > 0.0 {
                cmnd[tau] = diff[tau] * tau as f32 / running_sum;
            }
        }

        // First dip below threshold, walked down to its valley floor
        let mut best_tau = (min_lag..=max_lag)
            .find(|&tau| cmnd[tau] < YIN_THRESHOLD)
            .map(|mut tau| {
                while tau < max_lag && cmnd[tau + 1] < cmnd[tau] {
                    tau += 1;
                }
                tau
            });

        if best_tau.is_none() {
            let (tau, value) = (min_lag..=max_lag)
                .map(|tau| (tau, cmnd[tau]))
                .min_by(|a, b| a.1.total_cmp(&b.1))?;
            if value > MAX_APERIODICITY {
                return None;
            }
            best_tau = Some(tau);
        }
        let tau = best_tau?;

        // Vertex of the parabola through the minimum and its neighbours
        let refined = if tau > min_lag && tau < max_lag {
            let (alpha, beta, gamma) = (cmnd[tau - 1], cmnd[tau], cmnd[tau + 1]);
            let denom = 2.0 * (alpha - 2.0 * beta + gamma);
            if denom.abs() > 1e-10 {
                tau as f32 + (alpha - gamma) / denom
            } else {
                tau as f32
            }
        } else {
            tau as f32
        };

        (refined > 0.0).then(|| sample_rate / refined)
    }
}

impl PitchEstimator for YinPitchEstimator {
    fn estimate(&self, samples: &[f32], sample_rate: u32) -> Result<Option<f64>, ModelError> {
        if sample_rate == 0 {
            return Err(ModelError::Inference("sample rate is zero".to_string()));
        }
        if samples.is_empty() {
            return Ok(None);
        }

        let sr = sample_rate as f32;
        let mut voiced: Vec<f32> = self
            .frame_offsets(samples.len())
            .into_iter()
            .filter_map(|offset| {
                let end = (offset + self.frame_size).min(samples.len());
                self.detect(&samples[offset..end], sr)
            })
            .filter(|hz| hz.is_finite())
            .collect();

        if voiced.is_empty() {
            return Ok(None);
        }
        voiced.sort_by(|a, b| a.total_cmp(b));
        Ok(Some(voiced[voiced.len() / 2] as f64))
    }
}
