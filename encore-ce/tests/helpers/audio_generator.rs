//! Audio and note-score fixture generators
//!
//! WAV payloads are built in memory with hound; note scores with midly.

use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::io::Cursor;

/// Sample rate of generated fixtures; matches the default analysis rate
pub const FIXTURE_SAMPLE_RATE: u32 = 22050;

/// One plucked note: sharp attack, exponential decay
#[derive(Debug, Clone, Copy)]
pub struct ToneNote {
    pub frequency: f64,
    /// Seconds
    pub start: f64,
    /// Seconds
    pub duration: f64,
}

/// Configuration for a generated melody
#[derive(Debug, Clone)]
pub struct MelodyConfig {
    pub bpm: f64,
    /// MIDI keys, one per beat
    pub keys: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    pub amplitude: f32,
}

impl Default for MelodyConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            keys: vec![69, 72, 76, 72, 69, 67, 64, 69],
            sample_rate: FIXTURE_SAMPLE_RATE,
            channels: 1,
            amplitude: 0.6,
        }
    }
}

impl MelodyConfig {
    pub fn beat(&self) -> f64 {
        60.0 / self.bpm
    }

    pub fn notes(&self) -> Vec<ToneNote> {
        let beat = self.beat();
        self.keys
            .iter()
            .enumerate()
            .map(|(i, &key)| ToneNote {
                frequency: key_frequency(key),
                start: i as f64 * beat,
                duration: beat,
            })
            .collect()
    }

    pub fn duration(&self) -> f64 {
        self.keys.len() as f64 * self.beat()
    }
}

pub fn key_frequency(key: u8) -> f64 {
    440.0 * 2f64.powf((key as f64 - 69.0) / 12.0)
}

/// Mono samples for `notes`, `total` seconds long
pub fn render_notes(notes: &[ToneNote], total: f64, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    let len = (total * sample_rate as f64).round() as usize;
    let mut samples = vec![0.0f32; len];
    let attack = 0.005;

    for note in notes {
        let from = (note.start * sample_rate as f64).round() as usize;
        let to = (((note.start + note.duration) * sample_rate as f64).round() as usize).min(len);
        for (offset, sample) in samples[from.min(len)..to].iter_mut().enumerate() {
            let t = offset as f64 / sample_rate as f64;
            let envelope = if t < attack {
                t / attack
            } else {
                (-4.0 * (t - attack)).exp()
            };
            let phase = 2.0 * std::f64::consts::PI * note.frequency * t;
            *sample += (amplitude as f64 * envelope * phase.sin()) as f32;
        }
    }
    samples
}

/// 16-bit PCM WAV bytes
pub fn wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// WAV bytes of the configured melody
pub fn melody_wav(config: &MelodyConfig) -> Vec<u8> {
    let samples = render_notes(
        &config.notes(),
        config.duration(),
        config.sample_rate,
        config.amplitude,
    );
    wav_bytes(&samples, config.sample_rate, config.channels)
}

/// Standard MIDI File with one note per beat, matching `melody_wav`
pub fn melody_midi(config: &MelodyConfig) -> Vec<u8> {
    melody_midi_from(config, 0)
}

/// Like `melody_midi`, but transcribing only the notes from beat `first` on
///
/// Note times still match the full recording.
pub fn melody_midi_from(config: &MelodyConfig, first: usize) -> Vec<u8> {
    let tpb: u32 = 480;
    let mut track = vec![TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(
            ((60_000_000.0 / config.bpm) as u32).into(),
        )),
    }];
    let mut rest = first as u32 * tpb;
    for &key in config.keys.iter().skip(first) {
        track.push(TrackEvent {
            delta: std::mem::take(&mut rest).into(),
            kind: TrackEventKind::Midi {
                channel: 0.into(),
                message: MidiMessage::NoteOn {
                    key: key.into(),
                    vel: 96.into(),
                },
            },
        });
        track.push(TrackEvent {
            delta: tpb.into(),
            kind: TrackEventKind::Midi {
                channel: 0.into(),
                message: MidiMessage::NoteOff {
                    key: key.into(),
                    vel: 0.into(),
                },
            },
        });
    }
    track.push(TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let smf = Smf {
        header: Header::new(Format::SingleTrack, Timing::Metrical(480.into())),
        tracks: vec![track],
    };
    let mut bytes = Vec::new();
    smf.write(&mut bytes).unwrap();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_melody_wav_is_readable() {
        let config = MelodyConfig::default();
        let bytes = melody_wav(&config);
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, FIXTURE_SAMPLE_RATE);
        assert_eq!(reader.len() as f64, config.duration() * FIXTURE_SAMPLE_RATE as f64);
    }

    #[test]
    fn test_key_frequency() {
        assert!((key_frequency(69) - 440.0).abs() < 1e-9);
        assert!((key_frequency(81) - 880.0).abs() < 1e-9);
    }
}
