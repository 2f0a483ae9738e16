//! Standard MIDI File decoding
//!
//! Parses an SMF into ordered note events plus tempo-change markers. Tempo
//! meta events from every track form one global tempo map; tick positions
//! are converted to seconds through it.

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

use crate::models::{NoteEvent, NoteScore, TempoMap};

/// Microseconds per quarter note when a file declares no tempo (120 BPM)
const DEFAULT_TEMPO_USEC: u32 = 500_000;

#[derive(Debug, Error)]
pub enum NoteScoreError {
    #[error("Invalid MIDI data: {0}")]
    Parse(String),

    #[error("Unsupported MIDI timing: {0}")]
    Timing(String),
}

/// Converts absolute ticks to seconds
struct TickClock {
    /// (start tick, seconds at start tick, seconds per tick)
    spans: Vec<(u64, f64, f64)>,
}

impl TickClock {
    fn metrical(ticks_per_beat: f64, tempo_changes: &[(u64, u32)]) -> Self {
        let mut spans = Vec::with_capacity(tempo_changes.len());
        let mut seconds = 0.0;
        let mut prev: Option<(u64, f64)> = None;
        for &(tick, usec) in tempo_changes {
            if let Some((prev_tick, prev_spt)) = prev {
                seconds += (tick - prev_tick) as f64 * prev_spt;
            }
            let spt = usec as f64 / 1_000_000.0 / ticks_per_beat;
            spans.push((tick, seconds, spt));
            prev = Some((tick, spt));
        }
        Self { spans }
    }

    fn fixed(seconds_per_tick: f64) -> Self {
        Self {
            spans: vec![(0, 0.0, seconds_per_tick)],
        }
    }

    fn seconds(&self, tick: u64) -> f64 {
        let idx = self.spans.partition_point(|s| s.0 <= tick).saturating_sub(1);
        match self.spans.get(idx) {
            Some(&(start, base, spt)) => base + tick.saturating_sub(start) as f64 * spt,
            None => 0.0,
        }
    }
}

/// Decode SMF bytes into a `NoteScore`
pub fn decode_note_score(bytes: &[u8]) -> Result<NoteScore, NoteScoreError> {
    let smf = Smf::parse(bytes).map_err(|e| NoteScoreError::Parse(e.to_string()))?;

    let mut tempo_changes: Vec<(u64, u32)> = Vec::new();
    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track {
            tick += event.delta.as_int() as u64;
            if let TrackEventKind::Meta(MetaMessage::Tempo(usec)) = event.kind {
                tempo_changes.push((tick, usec.as_int()));
            }
        }
    }
    // Stable sort keeps file order for same-tick changes; the later one wins
    tempo_changes.sort_by_key(|(tick, _)| *tick);
    tempo_changes.dedup_by(|later, earlier| {
        if later.0 == earlier.0 {
            earlier.1 = later.1;
            true
        } else {
            false
        }
    });
    if tempo_changes.first().map_or(true, |(tick, _)| *tick > 0) {
        tempo_changes.insert(0, (0, DEFAULT_TEMPO_USEC));
    }

    let clock = match smf.header.timing {
        Timing::Metrical(tpb) => {
            let tpb = tpb.as_int();
            if tpb == 0 {
                return Err(NoteScoreError::Timing("zero ticks per beat".to_string()));
            }
            TickClock::metrical(tpb as f64, &tempo_changes)
        }
        Timing::Timecode(fps, subframes) => {
            let ticks_per_second = fps.as_f32() as f64 * subframes as f64;
            if ticks_per_second <= 0.0 {
                return Err(NoteScoreError::Timing("zero ticks per second".to_string()));
            }
            TickClock::fixed(1.0 / ticks_per_second)
        }
    };

    let mut notes = Vec::new();
    for track in &smf.tracks {
        let mut tick = 0u64;
        // (channel, key) -> pending (start tick, velocity), FIFO for re-struck keys
        let mut active: HashMap<(u8, u8), VecDeque<(u64, u8)>> = HashMap::new();

        for event in track {
            tick += event.delta.as_int() as u64;
            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let channel = channel.as_int();
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    active
                        .entry((channel, key.as_int()))
                        .or_default()
                        .push_back((tick, vel.as_int()));
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    let pending = active
                        .get_mut(&(channel, key.as_int()))
                        .and_then(|queue| queue.pop_front());
                    if let Some((start_tick, velocity)) = pending {
                        notes.push(NoteEvent {
                            start: clock.seconds(start_tick),
                            end: clock.seconds(tick),
                            pitch: key.as_int(),
                            velocity,
                            channel,
                        });
                    }
                }
                _ => {}
            }
        }

        // Notes never released end with their track
        for ((channel, pitch), queue) in active {
            for (start_tick, velocity) in queue {
                notes.push(NoteEvent {
                    start: clock.seconds(start_tick),
                    end: clock.seconds(tick),
                    pitch,
                    velocity,
                    channel,
                });
            }
        }
    }

    notes.sort_by(|a, b| {
        a.start
            .total_cmp(&b.start)
            .then(a.channel.cmp(&b.channel))
            .then(a.pitch.cmp(&b.pitch))
    });

    let tempo_map = TempoMap {
        tempos: tempo_changes
            .iter()
            .map(|(_, usec)| 60_000_000.0 / (*usec).max(1) as f64)
            .collect(),
        tempo_times: tempo_changes
            .iter()
            .map(|(tick, _)| clock.seconds(*tick))
            .collect(),
    };

    tracing::debug!(
        notes = notes.len(),
        tempo_changes = tempo_map.tempos.len(),
        "Decoded note transcription"
    );

    Ok(NoteScore { notes, tempo_map })
}
