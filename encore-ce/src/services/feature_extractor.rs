//! Feature extraction: tempo, onsets and chroma
//!
//! One centered STFT pass yields both the spectral-flux novelty curve and the
//! frame-wise chroma matrix. Onsets are picked from the novelty curve with a
//! sliding median + MAD threshold; tempo comes from its autocorrelation
//! restricted to the configured BPM range.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::config::ExtractorConfig;
use crate::models::{ChromaFrame, FeatureSet, Recording};

/// Peaks below this fraction of the strongest novelty value are ignored
const RELATIVE_FLOOR: f32 = 0.1;

/// Centre of the log-normal tempo prior (BPM)
const TEMPO_PRIOR_BPM: f64 = 120.0;

/// Chroma covers A0 up to this frequency
const CHROMA_MIN_HZ: f32 = 27.5;
const CHROMA_MAX_HZ: f32 = 5000.0;

/// Output of the STFT pass
#[derive(Debug, Clone, Default)]
pub struct SpectralAnalysis {
    pub chroma: Vec<ChromaFrame>,
    /// Half-wave rectified spectral flux, one value per frame
    pub novelty: Vec<f32>,
    /// Frames per second
    pub frame_rate: f64,
}

/// Extracts the signal-level part of a `FeatureSet`
pub struct FeatureExtractor {
    config: ExtractorConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl FeatureExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.frame_size.max(1));
        let window = hann_window(config.frame_size.max(1));
        Self {
            config,
            fft,
            window,
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Tempo, onsets and chroma for a recording
    ///
    /// Pitches and techniques are left empty; they are filled per segment by
    /// the inference stage. An empty recording yields an empty feature set.
    pub fn extract(&self, recording: &Recording) -> FeatureSet {
        if recording.is_empty() || recording.sample_rate == 0 {
            return FeatureSet {
                duration: recording.duration(),
                ..FeatureSet::empty()
            };
        }

        let analysis = self.analyze(recording);
        let onsets = self.pick_onsets(&analysis.novelty, analysis.frame_rate);
        let tempo = self.estimate_tempo(&analysis.novelty, analysis.frame_rate);

        tracing::debug!(
            frames = analysis.chroma.len(),
            onsets = onsets.len(),
            tempo,
            "Extracted features"
        );

        FeatureSet {
            tempo,
            onsets,
            pitches: Vec::new(),
            techniques: Vec::new(),
            segments: Vec::new(),
            chroma: analysis.chroma,
            duration: recording.duration(),
        }
    }

    /// Chroma matrix only
    pub fn chroma(&self, recording: &Recording) -> Vec<ChromaFrame> {
        if recording.is_empty() || recording.sample_rate == 0 {
            return Vec::new();
        }
        self.analyze(recording).chroma
    }

    /// Seconds per chroma frame for recordings at the configured rate
    pub fn frame_duration(&self) -> f64 {
        self.config.hop_size as f64 / self.config.sample_rate as f64
    }

    /// Centered STFT; frame `i` is centred on sample `i * hop`
    pub fn analyze(&self, recording: &Recording) -> SpectralAnalysis {
        let n = self.config.frame_size.max(1);
        let hop = self.config.hop_size.max(1);
        let half = n / 2;
        let samples = &recording.samples;
        let classes = pitch_class_map(n, recording.sample_rate);

        let frame_count = if samples.is_empty() { 0 } else { samples.len() / hop + 1 };
        let mut chroma = Vec::with_capacity(frame_count);
        let mut novelty = Vec::with_capacity(frame_count);

        let mut buffer = vec![Complex::new(0.0f32, 0.0); n];
        let mut previous = vec![0.0f32; half + 1];
        let mut current = vec![0.0f32; half + 1];

        for frame in 0..frame_count {
            let start = (frame * hop) as isize - half as isize;
            for (i, slot) in buffer.iter_mut().enumerate() {
                let idx = start + i as isize;
                let sample = if idx >= 0 && (idx as usize) < samples.len() {
                    finite_or_zero(samples[idx as usize])
                } else {
                    0.0
                };
                *slot = Complex::new(sample * self.window[i], 0.0);
            }
            self.fft.process(&mut buffer);

            let mut flux = 0.0f32;
            let mut pcp: ChromaFrame = [0.0; 12];
            for k in 0..=half {
                let magnitude = buffer[k].norm();
                current[k] = magnitude;
                let rise = magnitude - previous[k];
                if rise > 0.0 {
                    flux += rise;
                }
                if let Some(class) = classes[k] {
                    pcp[class] += magnitude * magnitude;
                }
            }

            let peak = pcp.iter().cloned().fold(0.0f32, f32::max);
            if peak > 0.0 {
                for value in pcp.iter_mut() {
                    *value /= peak;
                }
            }

            chroma.push(pcp);
            novelty.push(flux);
            std::mem::swap(&mut previous, &mut current);
        }

        SpectralAnalysis {
            chroma,
            novelty,
            frame_rate: recording.sample_rate as f64 / hop as f64,
        }
    }

    /// Peak-pick the novelty curve
    ///
    /// A frame is an onset when it is a local maximum, exceeds the local
    /// median + k·MAD threshold and the global relative floor, and is at
    /// least `min_onset_gap` after the previous onset (the stronger of two
    /// close peaks wins).
    pub fn pick_onsets(&self, novelty: &[f32], frame_rate: f64) -> Vec<f64> {
        let global_max = novelty.iter().cloned().fold(0.0f32, f32::max);
        if global_max <= 0.0 || frame_rate <= 0.0 {
            return Vec::new();
        }
        let floor = RELATIVE_FLOOR * global_max;
        let radius = self.config.onset_window_frames;
        let min_gap_frames = self.config.min_onset_gap * frame_rate;

        let mut picked: Vec<(usize, f32)> = Vec::new();
        for (t, &value) in novelty.iter().enumerate() {
            let left = if t > 0 { novelty[t - 1] } else { 0.0 };
            let right = novelty.get(t + 1).copied().unwrap_or(0.0);
            if !(value > left && value >= right) {
                continue;
            }

            let lo = t.saturating_sub(radius);
            let hi = (t + radius + 1).min(novelty.len());
            let threshold =
                median_mad_threshold(&novelty[lo..hi], self.config.onset_threshold).max(floor);
            if value <= threshold {
                continue;
            }

            match picked.last_mut() {
                Some(last) if ((t - last.0) as f64) < min_gap_frames => {
                    if value > last.1 {
                        *last = (t, value);
                    }
                }
                _ => picked.push((t, value)),
            }
        }

        picked
            .into_iter()
            .map(|(t, _)| t as f64 / frame_rate)
            .collect()
    }

    /// Global tempo from the novelty autocorrelation
    ///
    /// Lags outside `[min_bpm, max_bpm]` are ignored and a log-normal prior
    /// centred on 120 BPM breaks octave ties. Returns 0 when no periodicity
    /// is found.
    pub fn estimate_tempo(&self, novelty: &[f32], frame_rate: f64) -> f64 {
        let n = novelty.len();
        if n < 4 || frame_rate <= 0.0 {
            return 0.0;
        }

        let acf = autocorrelation(novelty);
        if acf.is_empty() || acf[0] <= 0.0 {
            return 0.0;
        }

        let lag_min = ((60.0 * frame_rate / self.config.max_bpm).floor() as usize).max(1);
        let lag_max = ((60.0 * frame_rate / self.config.min_bpm).ceil() as usize).min(n - 1);
        if lag_min >= lag_max {
            return 0.0;
        }

        let score = |lag: usize| -> f64 {
            let bpm = 60.0 * frame_rate / lag as f64;
            let octaves = (bpm / TEMPO_PRIOR_BPM).log2();
            (acf[lag] / acf[0]) as f64 * (-0.5 * octaves * octaves).exp()
        };

        let (best_lag, best_score) = (lag_min..=lag_max)
            .map(|lag| (lag, score(lag)))
            .fold((0usize, f64::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if best_lag == 0 || best_score <= 0.0 {
            return 0.0;
        }

        // Parabolic interpolation between neighbouring lags
        let mut refined = best_lag as f64;
        if best_lag > lag_min && best_lag < lag_max {
            let (a, b, c) = (score(best_lag - 1), best_score, score(best_lag + 1));
            let denom = a - 2.0 * b + c;
            if denom.abs() > 1e-12 {
                let offset = 0.5 * (a - c) / denom;
                if offset.abs() < 1.0 {
                    refined += offset;
                }
            }
        }

        let bpm = 60.0 * frame_rate / refined;
        if bpm.is_finite() {
            bpm.clamp(self.config.min_bpm, self.config.max_bpm)
        } else {
            0.0
        }
    }
}

/// `median + k * MAD` of `values`; 0 for an empty slice
///
/// MAD = median(|values - median(values)|)
pub fn median_mad_threshold(values: &[f32], k: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let center = median(values.to_vec());
    let deviations: Vec<f32> = values.iter().map(|&v| (v - center).abs()).collect();
    center + k.max(0.0) * median(deviations)
}

fn median(mut values: Vec<f32>) -> f32 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) * 0.5
    } else {
        values[mid]
    }
}

/// Mean-removed autocorrelation via `IFFT(|FFT(x)|²)`
fn autocorrelation(signal: &[f32]) -> Vec<f32> {
    let n = signal.len();
    let mean = signal.iter().sum::<f32>() / n as f32;
    let size = (2 * n).next_power_of_two();

    let mut buffer: Vec<Complex<f32>> = signal
        .iter()
        .map(|&v| Complex::new(finite_or_zero(v) - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(size)
        .collect();

    let mut planner = FftPlanner::<f32>::new();
    planner.plan_fft_forward(size).process(&mut buffer);
    for value in buffer.iter_mut() {
        *value = Complex::new(value.norm_sqr(), 0.0);
    }
    planner.plan_fft_inverse(size).process(&mut buffer);

    buffer[..n].iter().map(|c| c.re / size as f32).collect()
}

/// Pitch class for each FFT bin in `[0, n/2]`, `None` outside the chroma band
fn pitch_class_map(n: usize, sample_rate: u32) -> Vec<Option<usize>> {
    (0..=n / 2)
        .map(|k| {
            let freq = k as f32 * sample_rate as f32 / n as f32;
            if !(CHROMA_MIN_HZ..=CHROMA_MAX_HZ).contains(&freq) {
                return None;
            }
            let midi = 69.0 + 12.0 * (freq / 440.0).log2();
            Some((midi.round() as i64).rem_euclid(12) as usize)
        })
        .collect()
}

fn hann_window(n: usize) -> Vec<f32> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / (n - 1) as f32).cos())
        .collect()
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
