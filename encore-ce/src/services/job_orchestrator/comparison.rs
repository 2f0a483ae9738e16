//! Comparison jobs: user recording scored against a reference
//!
//! The reference is either direct audio or a stored registration. With a note
//! transcription the user recording is aligned to the reference and
//! segmented per note; without one, or when alignment fails, both sides are
//! segmented onset to onset.
//!
//! Per-note pitch and technique entries are paired by the note they belong
//! to, never by position, since either side may drop notes or come from a
//! stored document segmented another way.

use std::sync::Arc;

use super::{JobContext, JobOrchestrator};
use crate::db::ReferenceStore;
use crate::error::PipelineError;
use crate::models::{
    Checkpoint, ComparisonRequest, ComparisonResult, FeatureSet, JobOutput, NoteEvent, Recording,
    ReferenceDocument, ResultDocument, ResultType, Segment, SegmentSpan, TimeMapping,
};
use crate::services::alignment::ChromaTrack;
use crate::services::note_score_decoder::decode_note_score;
use crate::services::scoring::NoteTiming;

enum ReferenceSource {
    Audio(Arc<Recording>),
    Stored(Box<ReferenceDocument>),
}

impl JobOrchestrator {
    pub(super) async fn run_comparison(
        &self,
        ctx: &mut JobContext<'_>,
        req: ComparisonRequest,
    ) -> Result<JobOutput, PipelineError> {
        let sample_rate = self.pipeline.sample_rate();
        let job_id = ctx.job.id;
        let song_id = req.reference_song_id().map(str::to_string);

        // Decoding: user audio, reference source, note transcription
        self.reach(ctx, Checkpoint::Decoding)?;
        let user_audio = self.decode(req.user_audio_bytes).await?;

        let reference = match req.reference_audio_bytes {
            Some(bytes) if !bytes.is_empty() => ReferenceSource::Audio(self.decode(bytes).await?),
            _ => {
                let song_id = song_id.clone().ok_or_else(|| {
                    PipelineError::Input(
                        "either reference_audio_bytes or song_id is required".to_string(),
                    )
                })?;
                let document = self
                    .store
                    .load_reference(&song_id)
                    .await?
                    .ok_or(PipelineError::ReferenceNotFound(song_id))?;
                ReferenceSource::Stored(Box::new(document))
            }
        };

        let notes: Vec<NoteEvent> = match (&req.midi_bytes, &reference) {
            (Some(bytes), _) if !bytes.is_empty() => decode_note_score(bytes)?.notes,
            (_, ReferenceSource::Stored(document)) => document
                .midi_data
                .as_ref()
                .map(|midi| midi.notes.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        // Stored per-note entries can be looked up by note index only when
        // they were segmented from this same transcription
        let reference_indexed_by_notes = match &reference {
            ReferenceSource::Audio(_) => true,
            ReferenceSource::Stored(document) => document
                .midi_data
                .as_ref()
                .is_some_and(|midi| midi.notes == notes),
        };

        self.reach(ctx, Checkpoint::ExtractingUserFeatures)?;
        let mut user_features = self.extract(&user_audio).await?;

        self.reach(ctx, Checkpoint::ExtractingReferenceFeatures)?;
        let (mut reference_features, reference_audio) = match reference {
            ReferenceSource::Audio(recording) => (self.extract(&recording).await?, Some(recording)),
            ReferenceSource::Stored(document) => (document.features, None),
        };

        self.reach(ctx, Checkpoint::Aligning)?;
        let mapping = if notes.is_empty() {
            tracing::debug!(job_id = %job_id, "No note transcription, skipping alignment");
            None
        } else {
            self.align(job_id, &user_features, &reference_features).await?
        };

        self.reach(ctx, Checkpoint::Segmenting)?;
        let plan = self.plan_segments(
            &user_audio,
            reference_audio.as_deref(),
            &user_features,
            &reference_features,
            &notes,
            mapping.as_ref(),
        );
        let alignment_used = plan.timings.is_some();
        tracing::debug!(
            job_id = %job_id,
            user_segments = plan.user.len(),
            reference_segments = plan.reference.as_ref().map_or(0, |s| s.len()),
            alignment_used,
            "Segmented"
        );
        user_features.segments = plan.user.iter().map(SegmentSpan::from).collect();
        if let Some(segments) = &plan.reference {
            reference_features.segments = segments.iter().map(SegmentSpan::from).collect();
        }

        self.reach(ctx, Checkpoint::EstimatingPitch)?;
        user_features.pitches = self.pitches(&plan.user, sample_rate).await?;
        if let Some(segments) = &plan.reference {
            reference_features.pitches = self.pitches(segments, sample_rate).await?;
        }

        self.reach(ctx, Checkpoint::ClassifyingTechnique)?;
        user_features.techniques = self.techniques(&plan.user, sample_rate).await?;
        if let Some(segments) = &plan.reference {
            reference_features.techniques = self.techniques(segments, sample_rate).await?;
        }

        self.reach(ctx, Checkpoint::Scoring)?;
        let scoring = &self.pipeline.scoring;
        let scores = match plan.timings.as_deref() {
            Some(timings) => {
                let (user, reference) = pair_by_note(
                    &user_features,
                    &reference_features,
                    &notes,
                    reference_indexed_by_notes,
                );
                tracing::debug!(
                    job_id = %job_id,
                    notes = notes.len(),
                    paired = user.pitches.len(),
                    "Paired segments by note"
                );
                scoring.score(&user, &reference, Some(timings))
            }
            None => scoring.score(&user_features, &reference_features, None),
        };
        let note_comparisons = plan
            .timings
            .as_deref()
            .map(|timings| scoring.note_comparisons(timings));
        tracing::info!(
            job_id = %job_id,
            overall = scores.overall,
            pitch = scores.pitch_match,
            rhythm = scores.rhythm_match,
            tempo = scores.tempo_match,
            "Comparison scored"
        );

        let output = JobOutput::Comparison(ComparisonResult {
            user_features,
            reference_features,
            scores,
            note_comparisons,
            alignment_used,
        });
        let document = ResultDocument {
            task_id: job_id,
            result_type: ResultType::Comparison,
            result: output,
            user_id: req.user_id,
            song_id,
            created_at: ctx.job.created_at,
            feedback: None,
            feedback_error: None,
        };
        self.persist_result(ctx, document, req.generate_feedback).await
    }

    /// DTW mapping, or `None` when alignment fails
    async fn align(
        &self,
        job_id: uuid::Uuid,
        user: &FeatureSet,
        reference: &FeatureSet,
    ) -> Result<Option<TimeMapping>, PipelineError> {
        let pipeline = Arc::clone(&self.pipeline);
        let frame_duration = pipeline.extractor.frame_duration();
        let user = FeatureSet {
            chroma: user.chroma.clone(),
            duration: user.duration,
            ..FeatureSet::empty()
        };
        let reference = FeatureSet {
            chroma: reference.chroma.clone(),
            duration: reference.duration,
            ..FeatureSet::empty()
        };

        let result = tokio::task::spawn_blocking(move || {
            pipeline.aligner.align(
                ChromaTrack::from_features(&user, frame_duration),
                ChromaTrack::from_features(&reference, frame_duration),
            )
        })
        .await?;

        match result {
            Ok(mapping) => Ok(Some(mapping)),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Alignment failed, falling back to onset segmentation");
                Ok(None)
            }
        }
    }

    fn plan_segments(
        &self,
        user_audio: &Recording,
        reference_audio: Option<&Recording>,
        user: &FeatureSet,
        reference: &FeatureSet,
        notes: &[NoteEvent],
        mapping: Option<&TimeMapping>,
    ) -> SegmentPlan {
        let segmenter = &self.pipeline.segmenter;

        let Some(mapping) = mapping.filter(|_| !notes.is_empty()) else {
            return SegmentPlan {
                user: Arc::new(segmenter.onset_based(user_audio, &user.onsets)),
                reference: reference_audio
                    .map(|audio| Arc::new(segmenter.onset_based(audio, &reference.onsets))),
                timings: None,
            };
        };

        let user_segments = segmenter.note_guided(user_audio, notes, mapping, &user.onsets);
        let reference_deviations = segmenter.reference_deviations(notes, &reference.onsets);
        let timings: Vec<NoteTiming> = user_segments
            .iter()
            .filter_map(|segment| {
                let index = segment.note_index?;
                Some(NoteTiming {
                    index,
                    user_deviation: segment.onset_deviation,
                    reference_deviation: *reference_deviations.get(index)?,
                })
            })
            .collect();

        let reference_segments = reference_audio.map(|audio| {
            let identity = TimeMapping::identity(audio.duration());
            Arc::new(segmenter.note_guided(audio, notes, &identity, &reference.onsets))
        });

        SegmentPlan {
            user: Arc::new(user_segments),
            reference: reference_segments,
            timings: Some(timings),
        }
    }
}

/// Copies of both feature sets holding only the pitch and technique entries
/// of notes segmented on both sides, in user segment order
///
/// With `by_index` the reference entry is the one segmented from the same
/// note. Otherwise it is the reference segment covering the middle of the
/// note, which works for onset-segmented references.
fn pair_by_note(
    user: &FeatureSet,
    reference: &FeatureSet,
    notes: &[NoteEvent],
    by_index: bool,
) -> (FeatureSet, FeatureSet) {
    let mut paired_user = FeatureSet {
        pitches: Vec::new(),
        techniques: Vec::new(),
        segments: Vec::new(),
        ..user.clone()
    };
    let mut paired_reference = FeatureSet {
        pitches: Vec::new(),
        techniques: Vec::new(),
        segments: Vec::new(),
        ..reference.clone()
    };

    for (position, span) in user.segments.iter().enumerate() {
        let Some(index) = span.note_index else {
            continue;
        };
        let Some(note) = notes.get(index) else {
            continue;
        };
        let matched = if by_index {
            reference
                .segments
                .iter()
                .position(|candidate| candidate.note_index == Some(index))
        } else {
            let middle = (note.start + note.end) / 2.0;
            reference
                .segments
                .iter()
                .rposition(|candidate| candidate.contains(middle))
        };
        let Some(matched) = matched else {
            continue;
        };

        paired_user.segments.push(*span);
        paired_reference.segments.push(reference.segments[matched]);
        if let (Some(u), Some(r)) = (user.pitches.get(position), reference.pitches.get(matched)) {
            paired_user.pitches.push(*u);
            paired_reference.pitches.push(*r);
        }
        if let (Some(u), Some(r)) = (
            user.techniques.get(position),
            reference.techniques.get(matched),
        ) {
            paired_user.techniques.push(u.clone());
            paired_reference.techniques.push(r.clone());
        }
    }

    (paired_user, paired_reference)
}

struct SegmentPlan {
    user: Arc<Vec<Segment>>,
    /// Present when reference audio is available
    reference: Option<Arc<Vec<Segment>>>,
    /// Present on the note-guided path
    timings: Option<Vec<NoteTiming>>,
}
