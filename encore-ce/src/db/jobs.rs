//! Job rows
//!
//! The request payload lives in the job row until the job is terminal, which
//! makes the row itself the durable queue entry.

use encore_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, timestamp};
use crate::models::{Checkpoint, Job, JobKind, JobOutput, JobRequest, JobState};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const JOB_COLUMNS: &str =
    "id, kind, state, progress, checkpoint, result, error, attempts, created_at, updated_at";

/// Insert a new job with its payload
pub async fn insert_job(pool: &SqlitePool, job: &Job, request: &JobRequest) -> Result<()> {
    let payload = serde_json::to_string(request)?;
    let id = job.id.to_string();
    let created_at = timestamp(&job.created_at);
    let updated_at = timestamp(&job.updated_at);

    retry_on_lock("insert job", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, state, progress, payload, attempts, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            WHERE jobs.state NOT IN ('SUCCESS', 'FAILURE')
            "#,
        )
        .bind(&id)
        .bind(job.kind.as_str())
        .bind(job.state.as_str())
        .bind(job.progress as i64)
        .bind(&payload)
        .bind(job.attempts as i64)
        .bind(&created_at)
        .bind(&updated_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Upsert the full job row
///
/// Progress only ever rises. Once a row is terminal it is left untouched, so
/// a late writer cannot resurrect a failed or finished job.
pub async fn save_job(pool: &SqlitePool, job: &Job) -> Result<()> {
    let id = job.id.to_string();
    let result = job.result.as_ref().map(serde_json::to_string).transpose()?;
    let created_at = timestamp(&job.created_at);
    let updated_at = timestamp(&job.updated_at);

    retry_on_lock("save job", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, kind, state, progress, checkpoint, result, error,
                attempts, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                progress = MAX(jobs.progress, excluded.progress),
                checkpoint = COALESCE(excluded.checkpoint, jobs.checkpoint),
                result = excluded.result,
                error = excluded.error,
                attempts = MAX(jobs.attempts, excluded.attempts),
                payload = CASE
                    WHEN excluded.state IN ('SUCCESS', 'FAILURE') THEN NULL
                    ELSE jobs.payload
                END,
                updated_at = excluded.updated_at
            WHERE jobs.state NOT IN ('SUCCESS', 'FAILURE')
            "#,
        )
        .bind(&id)
        .bind(job.kind.as_str())
        .bind(job.state.as_str())
        .bind(job.progress as i64)
        .bind(&job.checkpoint)
        .bind(&result)
        .bind(&job.error)
        .bind(job.attempts as i64)
        .bind(&created_at)
        .bind(&updated_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Fire-and-forget progress write for a checkpoint
pub async fn record_progress(pool: &SqlitePool, job_id: Uuid, checkpoint: Checkpoint) -> Result<()> {
    let updated_at = timestamp(&chrono::Utc::now());
    sqlx::query(
        r#"
        UPDATE jobs SET
            state = ?,
            progress = MAX(progress, ?),
            checkpoint = ?,
            updated_at = ?
        WHERE id = ? AND state NOT IN ('SUCCESS', 'FAILURE') AND progress <= ?
        "#,
    )
    .bind(checkpoint.state().as_str())
    .bind(checkpoint.progress() as i64)
    .bind(checkpoint.as_str())
    .bind(&updated_at)
    .bind(job_id.to_string())
    .bind(checkpoint.progress() as i64)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<Job>> {
    let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

pub async fn begin_attempt(pool: &SqlitePool, job_id: Uuid) -> Result<u32> {
    let attempts: Option<i64> = sqlx::query_scalar(
        "UPDATE jobs SET attempts = attempts + 1 WHERE id = ? RETURNING attempts",
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;
    attempts
        .map(|n| n as u32)
        .ok_or_else(|| Error::NotFound(format!("Job {}", job_id)))
}

pub async fn incomplete_jobs(pool: &SqlitePool) -> Result<Vec<(Job, JobRequest)>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {}, payload FROM jobs
        WHERE state NOT IN ('SUCCESS', 'FAILURE') AND payload IS NOT NULL
        ORDER BY created_at ASC
        "#,
        JOB_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    let mut pending = Vec::with_capacity(rows.len());
    for row in &rows {
        let job = job_from_row(row)?;
        let payload: String = row.get("payload");
        match serde_json::from_str::<JobRequest>(&payload) {
            Ok(request) => pending.push((job, request)),
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Skipping job with unreadable payload");
            }
        }
    }
    Ok(pending)
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("Invalid job id {}: {}", id, e)))?;

    let kind: String = row.get("kind");
    let kind = JobKind::parse(&kind)
        .ok_or_else(|| Error::Internal(format!("Unknown job kind: {}", kind)))?;
    let state: String = row.get("state");
    let state = JobState::parse(&state)
        .ok_or_else(|| Error::Internal(format!("Unknown job state: {}", state)))?;

    let result: Option<String> = row.get("result");
    let result = result
        .map(|json| serde_json::from_str::<JobOutput>(&json))
        .transpose()?;

    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Job {
        id,
        kind,
        state,
        progress: row.get::<i64, _>("progress").clamp(0, 100) as u8,
        checkpoint: row.get("checkpoint"),
        result,
        error: row.get("error"),
        attempts: row.get::<i64, _>("attempts").max(0) as u32,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}
