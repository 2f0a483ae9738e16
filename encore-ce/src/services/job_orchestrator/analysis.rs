//! Analysis jobs: features of one recording, no scoring

use std::sync::Arc;

use super::{JobContext, JobOrchestrator};
use crate::error::PipelineError;
use crate::models::{
    AnalysisRequest, AnalysisResult, Checkpoint, JobOutput, ResultDocument, ResultType, SegmentSpan,
};

impl JobOrchestrator {
    pub(super) async fn run_analysis(
        &self,
        ctx: &mut JobContext<'_>,
        req: AnalysisRequest,
    ) -> Result<JobOutput, PipelineError> {
        let sample_rate = self.pipeline.sample_rate();

        self.reach(ctx, Checkpoint::Decoding)?;
        let recording = self.decode(req.audio_bytes).await?;

        self.reach(ctx, Checkpoint::ExtractingUserFeatures)?;
        let mut features = self.extract(&recording).await?;

        self.reach(ctx, Checkpoint::Segmenting)?;
        let segments = Arc::new(
            self.pipeline
                .segmenter
                .onset_based(&recording, &features.onsets),
        );
        tracing::debug!(job_id = %ctx.job.id, segments = segments.len(), "Segmented by onsets");
        features.segments = segments.iter().map(SegmentSpan::from).collect();

        self.reach(ctx, Checkpoint::EstimatingPitch)?;
        if req.analysis_type.wants_pitch() {
            features.pitches = self.pitches(&segments, sample_rate).await?;
        }

        self.reach(ctx, Checkpoint::ClassifyingTechnique)?;
        if req.analysis_type.wants_technique() {
            features.techniques = self.techniques(&segments, sample_rate).await?;
        }

        let output = JobOutput::Analysis(AnalysisResult {
            analysis_type: req.analysis_type,
            features,
        });
        let document = ResultDocument {
            task_id: ctx.job.id,
            result_type: ResultType::Analysis,
            result: output,
            user_id: req.user_id,
            song_id: req.song_id,
            created_at: ctx.job.created_at,
            feedback: None,
            feedback_error: None,
        };
        self.persist_result(ctx, document, req.generate_feedback).await
    }
}
