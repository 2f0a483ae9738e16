//! Performance scoring
//!
//! Pure functions of two feature sets (plus optional per-note timing) to a
//! `ScoreSet`. Every match field lands in `[0, 100]`; non-finite intermediate
//! values become 0 for match fields and are omitted for optional fields.

use crate::config::ScoringConfig;
use crate::models::{FeatureSet, NoteComparison, ScoreSet, Verdict};

/// Cents clamp; one octave
const MAX_CENTS: f64 = 1200.0;

/// Onset deviation of one reference note, user vs reference performer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteTiming {
    /// Reference note index
    pub index: usize,
    pub user_deviation: f64,
    pub reference_deviation: f64,
}

pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn score(
        &self,
        user: &FeatureSet,
        reference: &FeatureSet,
        timings: Option<&[NoteTiming]>,
    ) -> ScoreSet {
        let weights = &self.config.weights;

        let tempo_match = match_value(tempo_match(user.tempo, reference.tempo));
        let pitch_match = match_value(pitch_match(&user.pitches, &reference.pitches));
        let technique_match = match_value(technique_match(&user.techniques, &reference.techniques));

        let rhythm = match timings {
            Some(timings) if !timings.is_empty() => {
                deviation_rhythm(timings, weights.rhythm_absolute, weights.rhythm_relative)
            }
            _ => interval_rhythm(&user.onsets, &reference.onsets),
        };
        let rhythm_match = match_value(rhythm.combined);

        let overall = match_value(
            weights.pitch * pitch_match
                + weights.rhythm * rhythm_match
                + weights.technique * technique_match
                + weights.tempo * tempo_match,
        );

        ScoreSet {
            tempo_match,
            pitch_match,
            rhythm_match,
            technique_match,
            overall,
            rhythm_absolute_match: rhythm.absolute.and_then(optional_value),
            rhythm_relative_match: rhythm.relative.and_then(optional_value),
            expression_similarity: rhythm.expression.and_then(optional_value),
        }
    }

    /// Per-note verdicts; a difference within the tolerance is `Same`
    pub fn note_comparisons(&self, timings: &[NoteTiming]) -> Vec<NoteComparison> {
        let tolerance = self.config.verdict_tolerance.abs();
        timings
            .iter()
            .filter(|t| t.user_deviation.is_finite() && t.reference_deviation.is_finite())
            .map(|t| {
                let user = t.user_deviation.abs();
                let reference = t.reference_deviation.abs();
                let verdict = if user < reference - tolerance {
                    Verdict::Better
                } else if user > reference + tolerance {
                    Verdict::Worse
                } else {
                    Verdict::Same
                };
                NoteComparison {
                    index: t.index,
                    user_deviation: t.user_deviation,
                    reference_deviation: t.reference_deviation,
                    verdict,
                }
            })
            .collect()
    }
}

fn match_value(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn optional_value(value: f64) -> Option<f64> {
    value.is_finite().then(|| value.clamp(0.0, 100.0))
}

/// `100 - min(100, value * scale)`; NaN stays NaN
fn penalty(value: f64, scale: f64) -> f64 {
    let scaled = value * scale;
    if scaled.is_nan() {
        return f64::NAN;
    }
    100.0 - scaled.min(100.0)
}

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values.iter().copied())?;
    mean(values.iter().map(|v| (v - m) * (v - m))).map(f64::sqrt)
}

pub fn tempo_match(user_bpm: f64, reference_bpm: f64) -> f64 {
    penalty((user_bpm - reference_bpm).abs(), 2.0)
}

/// Mean absolute cent error over pairs where both pitches are voiced
pub fn pitch_match(user: &[f64], reference: &[f64]) -> f64 {
    let cents = user
        .iter()
        .zip(reference)
        .filter(|(u, r)| **u > 0.0 && **r > 0.0)
        .map(|(u, r)| (1200.0 * (u / r).log2()).clamp(-MAX_CENTS, MAX_CENTS).abs());
    match mean(cents) {
        Some(mean_cents) => 100.0 - mean_cents / MAX_CENTS * 100.0,
        None => 100.0,
    }
}

/// Share of segments whose label sets are equal
pub fn technique_match(user: &[Vec<String>], reference: &[Vec<String>]) -> f64 {
    let per_segment = user.iter().zip(reference).map(|(u, r)| {
        let mut u = u.clone();
        let mut r = r.clone();
        u.sort();
        u.dedup();
        r.sort();
        r.dedup();
        if u == r {
            100.0
        } else {
            0.0
        }
    });
    mean(per_segment).unwrap_or(100.0)
}

struct RhythmScores {
    combined: f64,
    absolute: Option<f64>,
    relative: Option<f64>,
    expression: Option<f64>,
}

fn deviation_rhythm(timings: &[NoteTiming], absolute_weight: f64, relative_weight: f64) -> RhythmScores {
    let user_abs = mean(timings.iter().map(|t| t.user_deviation.abs())).unwrap_or(0.0);
    let excess = mean(
        timings
            .iter()
            .map(|t| (t.user_deviation.abs() - t.reference_deviation.abs()).max(0.0)),
    )
    .unwrap_or(0.0);
    let absolute = penalty(user_abs, 100.0);
    let relative = penalty(excess, 100.0);

    let user_mean = mean(timings.iter().map(|t| t.user_deviation)).unwrap_or(0.0);
    let reference_mean = mean(timings.iter().map(|t| t.reference_deviation)).unwrap_or(0.0);
    let expression = penalty((user_mean.abs() - reference_mean.abs()).abs(), 200.0);

    RhythmScores {
        combined: absolute_weight * absolute + relative_weight * relative,
        absolute: Some(absolute),
        relative: Some(relative),
        expression: Some(expression),
    }
}

fn intervals(onsets: &[f64]) -> Vec<f64> {
    onsets.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Index-aligned inter-onset interval comparison
///
/// Two recordings without intervals match; one side without intervals
/// scores 0.
fn interval_rhythm(user_onsets: &[f64], reference_onsets: &[f64]) -> RhythmScores {
    let user = intervals(user_onsets);
    let reference = intervals(reference_onsets);

    let combined = match mean(user.iter().zip(&reference).map(|(u, r)| (u - r).abs())) {
        Some(mean_diff) => penalty(mean_diff, 100.0),
        None if user.is_empty() && reference.is_empty() => 100.0,
        None => 0.0,
    };
    let expression = match (std_dev(&user), std_dev(&reference)) {
        (Some(u), Some(r)) => Some(penalty((u - r).abs(), 200.0)),
        _ => None,
    };

    RhythmScores {
        combined,
        absolute: None,
        relative: None,
        expression,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(tempo: f64, onsets: &[f64], pitches: &[f64]) -> FeatureSet {
        FeatureSet {
            tempo,
            onsets: onsets.to_vec(),
            pitches: pitches.to_vec(),
            techniques: vec![Vec::new(); pitches.len()],
            ..Default::default()
        }
    }

    fn engine() -> ScoringEngine {
        ScoringEngine::new(ScoringConfig::default())
    }

    fn assert_bounded(scores: &ScoreSet) {
        let mut all = vec![
            scores.tempo_match,
            scores.pitch_match,
            scores.rhythm_match,
            scores.technique_match,
            scores.overall,
        ];
        all.extend(scores.rhythm_absolute_match);
        all.extend(scores.rhythm_relative_match);
        all.extend(scores.expression_similarity);
        for value in all {
            assert!((0.0..=100.0).contains(&value), "out of bounds: {}", value);
        }
    }

    #[test]
    fn test_tempo_120_vs_125_is_90() {
        assert!((tempo_match(125.0, 120.0) - 90.0).abs() < 1e-9);
        assert_eq!(tempo_match(0.0, 200.0), 0.0);
    }

    #[test]
    fn test_octave_is_maximum_pitch_penalty() {
        assert!(pitch_match(&[880.0], &[440.0]).abs() < 1e-9);
        assert!(pitch_match(&[110.0], &[440.0]).abs() < 1e-9);
        // 100 cents
        let semitone = 440.0 * 2f64.powf(1.0 / 12.0);
        assert!((pitch_match(&[semitone], &[440.0]) - (100.0 - 100.0 / 12.0)).abs() < 1e-6);
    }

    #[test]
    fn test_unvoiced_pairs_are_ignored() {
        assert_eq!(pitch_match(&[0.0, 440.0], &[220.0, 440.0]), 100.0);
        assert_eq!(pitch_match(&[0.0], &[0.0]), 100.0);
        assert_eq!(pitch_match(&[], &[440.0]), 100.0);
    }

    #[test]
    fn test_identical_features_score_100() {
        let f = features(118.0, &[0.5, 1.0, 1.6, 2.0], &[261.6, 293.7, 329.6, 0.0]);
        let scores = engine().score(&f, &f, None);
        assert_eq!(scores.tempo_match, 100.0);
        assert_eq!(scores.pitch_match, 100.0);
        assert_eq!(scores.rhythm_match, 100.0);
        assert_eq!(scores.technique_match, 100.0);
        assert!((scores.overall - 100.0).abs() < 1e-9);
        assert_eq!(scores.expression_similarity, Some(100.0));
        assert!(scores.rhythm_absolute_match.is_none());
    }

    #[test]
    fn test_technique_match_is_set_equality() {
        let user = vec![
            vec!["bend".to_string(), "slide".to_string()],
            vec!["vibrato".to_string()],
        ];
        let reference = vec![
            vec!["slide".to_string(), "bend".to_string()],
            vec![],
        ];
        assert_eq!(technique_match(&user, &reference), 50.0);
    }

    #[test]
    fn test_deviation_mode_rhythm() {
        let timings = [
            NoteTiming {
                index: 0,
                user_deviation: 0.1,
                reference_deviation: 0.05,
            },
            NoteTiming {
                index: 1,
                user_deviation: -0.1,
                reference_deviation: 0.15,
            },
        ];
        let f = features(120.0, &[], &[]);
        let scores = engine().score(&f, &f, Some(&timings));

        // mean |u| = 0.1 -> 90; excess = (0.05 + 0) / 2 -> 97.5
        let absolute = scores.rhythm_absolute_match.unwrap();
        let relative = scores.rhythm_relative_match.unwrap();
        assert!((absolute - 90.0).abs() < 1e-9);
        assert!((relative - 97.5).abs() < 1e-9);
        assert!((scores.rhythm_match - (0.4 * 90.0 + 0.6 * 97.5)).abs() < 1e-9);
        // |mean u| = 0, |mean r| = 0.1 -> 100 - 20
        assert!((scores.expression_similarity.unwrap() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_interval_fallback() {
        let user = features(120.0, &[0.0, 0.6, 1.0], &[]);
        let reference = features(120.0, &[0.0, 0.5, 1.0], &[]);
        let scores = engine().score(&user, &reference, None);
        // mean |Δinterval| = 0.1
        assert!((scores.rhythm_match - 90.0).abs() < 1e-9);

        let silent = features(120.0, &[], &[]);
        assert_eq!(engine().score(&silent, &reference, None).rhythm_match, 0.0);
        assert_eq!(engine().score(&silent, &silent, None).rhythm_match, 100.0);
    }

    #[test]
    fn test_scores_stay_in_bounds_for_extreme_input() {
        let user = features(f64::NAN, &[0.0, 50.0], &[f64::INFINITY, 20000.0]);
        let reference = features(60.0, &[0.0, 0.01], &[30.0, 27.5]);
        let timings = [NoteTiming {
            index: 0,
            user_deviation: 7.0,
            reference_deviation: f64::NAN,
        }];

        let scores = engine().score(&user, &reference, None);
        assert_bounded(&scores);
        assert_eq!(scores.tempo_match, 0.0);

        let scores = engine().score(&user, &reference, Some(&timings));
        assert_bounded(&scores);
        assert!(scores.expression_similarity.is_none());
    }

    #[test]
    fn test_verdicts_respect_tolerance() {
        let timing = |index, user, reference| NoteTiming {
            index,
            user_deviation: user,
            reference_deviation: reference,
        };
        let comparisons = engine().note_comparisons(&[
            timing(0, 0.01, 0.1),
            timing(1, -0.05, 0.04),
            timing(2, 0.2, -0.05),
            timing(3, f64::NAN, 0.0),
        ]);
        assert_eq!(comparisons.len(), 3);
        assert_eq!(comparisons[0].verdict, Verdict::Better);
        assert_eq!(comparisons[1].verdict, Verdict::Same);
        assert_eq!(comparisons[2].verdict, Verdict::Worse);
        assert_eq!(comparisons[2].index, 2);
    }
}
