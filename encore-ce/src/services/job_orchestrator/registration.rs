//! Registration jobs: store a reference performance under a song id
//!
//! Registering an id again replaces the stored document.

use encore_common::events::EncoreEvent;
use std::sync::Arc;

use super::{JobContext, JobOrchestrator};
use crate::db::ReferenceStore;
use crate::error::PipelineError;
use crate::models::{
    Checkpoint, JobOutput, MidiData, NoteScore, ReferenceDocument, ReferenceMetadata,
    RegistrationRequest, RegistrationResult, SegmentSpan, TimeMapping,
};
use crate::services::note_score_decoder::decode_note_score;

impl JobOrchestrator {
    pub(super) async fn run_registration(
        &self,
        ctx: &mut JobContext<'_>,
        req: RegistrationRequest,
    ) -> Result<JobOutput, PipelineError> {
        let sample_rate = self.pipeline.sample_rate();
        let song_id = req.song_id.trim().to_string();
        if song_id.is_empty() {
            return Err(PipelineError::Input("song_id must not be empty".to_string()));
        }

        self.reach(ctx, Checkpoint::Decoding)?;
        let recording = self.decode(req.audio_bytes).await?;
        let score: Option<NoteScore> = match req.midi_bytes {
            Some(bytes) if !bytes.is_empty() => Some(decode_note_score(&bytes)?),
            _ => None,
        };

        self.reach(ctx, Checkpoint::ExtractingReferenceFeatures)?;
        let mut features = self.extract(&recording).await?;

        self.reach(ctx, Checkpoint::Segmenting)?;
        let segmenter = &self.pipeline.segmenter;
        let segments = Arc::new(match score.as_ref().filter(|s| !s.notes.is_empty()) {
            Some(score) => {
                let identity = TimeMapping::identity(recording.duration());
                segmenter.note_guided(&recording, &score.notes, &identity, &features.onsets)
            }
            None => segmenter.onset_based(&recording, &features.onsets),
        });
        features.segments = segments.iter().map(SegmentSpan::from).collect();

        self.reach(ctx, Checkpoint::EstimatingPitch)?;
        features.pitches = self.pitches(&segments, sample_rate).await?;

        self.reach(ctx, Checkpoint::ClassifyingTechnique)?;
        features.techniques = self.techniques(&segments, sample_rate).await?;

        self.reach(ctx, Checkpoint::Persisting)?;
        let has_midi = score.is_some();
        let result = RegistrationResult {
            song_id: song_id.clone(),
            has_midi,
            onset_count: features.onsets.len(),
            segment_count: segments.len(),
        };
        let document = ReferenceDocument {
            song_id: song_id.clone(),
            features,
            midi_data: score.map(|score| MidiData {
                notes: score.notes,
                tempos: score.tempo_map.tempos,
                tempo_times: score.tempo_map.tempo_times,
            }),
            metadata: ReferenceMetadata {
                song_id: song_id.clone(),
                has_midi,
                description: req.description,
            },
            created_at: chrono::Utc::now(),
        };
        self.store.save_reference(&document).await?;

        tracing::info!(
            job_id = %ctx.job.id,
            song_id = %song_id,
            has_midi,
            segments = result.segment_count,
            "Reference registered"
        );
        self.event_bus.emit_lossy(EncoreEvent::ReferenceRegistered {
            song_id,
            has_midi,
            timestamp: chrono::Utc::now(),
        });

        Ok(JobOutput::Registration(result))
    }
}
