//! Component chain tests: decode, extract, align, segment, score
//!
//! Runs the stages directly, without the job machinery.

mod helpers;

use encore_ce::config::ServiceConfig;
use encore_ce::models::FeatureSet;
use encore_ce::services::{
    decode_note_score, AlignmentEngine, ChromaTrack, FeatureExtractor, PitchEstimator,
    ScoringEngine, Segmenter, YinPitchEstimator,
};
use encore_ce::utils::decode_audio_bytes;
use helpers::audio_generator::{key_frequency, FIXTURE_SAMPLE_RATE};
use helpers::{melody_midi, melody_midi_from, melody_wav, MelodyConfig};

fn extract(config: &ServiceConfig, wav: &[u8]) -> (encore_ce::models::Recording, FeatureSet) {
    let recording = decode_audio_bytes(wav, config.extractor.sample_rate).unwrap();
    let features = FeatureExtractor::new(config.extractor.clone()).extract(&recording);
    (recording, features)
}

#[test]
fn test_decoded_fixture_has_expected_duration() {
    let config = ServiceConfig::default();
    let melody = MelodyConfig::default();
    let recording = decode_audio_bytes(&melody_wav(&melody), FIXTURE_SAMPLE_RATE).unwrap();
    assert_eq!(recording.sample_rate, FIXTURE_SAMPLE_RATE);
    assert!((recording.duration() - melody.duration()).abs() < 0.01);
    assert_eq!(config.extractor.sample_rate, FIXTURE_SAMPLE_RATE);
}

#[test]
fn test_stereo_44k_fixture_is_downmixed_and_resampled() {
    let melody = MelodyConfig {
        sample_rate: 44100,
        channels: 2,
        ..MelodyConfig::default()
    };
    let recording = decode_audio_bytes(&melody_wav(&melody), FIXTURE_SAMPLE_RATE).unwrap();
    assert_eq!(recording.sample_rate, FIXTURE_SAMPLE_RATE);
    assert!((recording.duration() - melody.duration()).abs() < 0.1);
}

#[test]
fn test_onset_segments_are_in_bounds() {
    let config = ServiceConfig::default();
    let (recording, features) = extract(&config, &melody_wav(&MelodyConfig::default()));

    assert!(!features.onsets.is_empty());
    assert!(features.onsets.windows(2).all(|w| w[0] < w[1]));

    let segments = Segmenter::new(config.segmenter.clone()).onset_based(&recording, &features.onsets);
    let in_range = features
        .onsets
        .iter()
        .filter(|&&t| t < recording.duration())
        .count();
    assert_eq!(segments.len(), in_range);
    for segment in &segments {
        assert!(!segment.samples.is_empty());
        assert!(segment.start_time >= 0.0 && segment.end_time <= recording.duration());
        assert!(segment.start_time < segment.end_time);
    }
}

#[test]
fn test_note_guided_pitches_follow_the_score() {
    let config = ServiceConfig::default();
    let melody = MelodyConfig::default();
    let (recording, features) = extract(&config, &melody_wav(&melody));
    let score = decode_note_score(&melody_midi(&melody)).unwrap();
    assert_eq!(score.notes.len(), melody.keys.len());

    let mapping = encore_ce::models::TimeMapping::identity(recording.duration());
    let segments = Segmenter::new(config.segmenter.clone()).note_guided(
        &recording,
        &score.notes,
        &mapping,
        &features.onsets,
    );
    assert_eq!(segments.len(), melody.keys.len());

    let estimator = YinPitchEstimator::default();
    for (segment, &key) in segments.iter().zip(&melody.keys) {
        let pitch = estimator
            .estimate(&segment.samples, recording.sample_rate)
            .unwrap()
            .expect("voiced note");
        let cents = 1200.0 * (pitch / key_frequency(key)).log2();
        assert!(cents.abs() < 20.0, "key {} estimated {} Hz", key, pitch);
    }
}

#[test]
fn test_partial_transcription_keeps_recording_times() {
    let melody = MelodyConfig::default();
    let score = decode_note_score(&melody_midi_from(&melody, 2)).unwrap();

    assert_eq!(score.notes.len(), melody.keys.len() - 2);
    assert!((score.notes[0].start - 2.0 * melody.beat()).abs() < 1e-6);
    assert_eq!(score.notes[0].pitch, melody.keys[2]);
    let last = score.notes.last().unwrap();
    assert!((last.end - melody.duration()).abs() < 1e-6);
}

#[test]
fn test_alignment_of_tempo_variants_is_monotonic() {
    let config = ServiceConfig::default();
    let (_, reference) = extract(&config, &melody_wav(&MelodyConfig::default()));
    let (_, candidate) = extract(
        &config,
        &melody_wav(&MelodyConfig {
            bpm: 100.0,
            ..MelodyConfig::default()
        }),
    );

    let extractor = FeatureExtractor::new(config.extractor.clone());
    let mapping = AlignmentEngine::new(config.alignment.clone())
        .align(
            ChromaTrack::from_features(&candidate, extractor.frame_duration()),
            ChromaTrack::from_features(&reference, extractor.frame_duration()),
        )
        .unwrap();

    assert!(mapping.is_monotonic());
    let (_, first_target) = mapping.pairs()[0];
    let (_, last_target) = *mapping.pairs().last().unwrap();
    assert!(first_target <= 0.1);
    assert!((last_target - reference.duration).abs() < 0.1);
}

#[test]
fn test_scores_stay_bounded_for_different_performances() {
    let config = ServiceConfig::default();
    let (_, reference) = extract(&config, &melody_wav(&MelodyConfig::default()));
    let (_, user) = extract(
        &config,
        &melody_wav(&MelodyConfig {
            bpm: 90.0,
            keys: vec![70, 73, 77, 73, 70, 68, 65, 70],
            ..MelodyConfig::default()
        }),
    );

    let scores = ScoringEngine::new(config.scoring.clone()).score(&user, &reference, None);
    for value in [
        scores.tempo_match,
        scores.pitch_match,
        scores.rhythm_match,
        scores.technique_match,
        scores.overall,
    ] {
        assert!((0.0..=100.0).contains(&value), "out of bounds: {}", value);
    }
    assert!(scores.rhythm_absolute_match.is_none());
}
