//! Persistence for jobs, results and reference documents
//!
//! The pipeline talks to the `JobStore`, `ResultStore` and `ReferenceStore`
//! traits. `SqliteStore` implements all three over one SQLite pool with
//! explicit `open` / `close`. Every write is an idempotent upsert, so a
//! redelivered job can safely repeat its writes.

pub mod jobs;
pub mod references;
pub mod results;

use async_trait::async_trait;
use encore_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{Checkpoint, Job, JobRequest, ReferenceDocument, ResultDocument, ResultType};

/// Upper bound on rows returned by a result query
pub const MAX_RESULT_LIMIT: u32 = 100;

/// Result listing filter, newest first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultQuery {
    pub user_id: Option<String>,
    pub song_id: Option<String>,
    pub result_type: ResultType,
    pub limit: u32,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job together with its request payload
    async fn create_job(&self, job: &Job, request: &JobRequest) -> Result<()>;

    /// Upsert the job row. Terminal rows are never overwritten and the
    /// payload is dropped once the job is terminal.
    async fn save_job(&self, job: &Job) -> Result<()>;

    /// `progress = MAX(progress, checkpoint progress)`
    async fn record_progress(&self, job_id: Uuid, checkpoint: Checkpoint) -> Result<()>;

    async fn load_job(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Count a delivery and return the new attempt number
    async fn begin_attempt(&self, job_id: Uuid) -> Result<u32>;

    /// Non-terminal jobs that still carry their payload, oldest first
    async fn incomplete_jobs(&self) -> Result<Vec<(Job, JobRequest)>>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_result(&self, document: &ResultDocument) -> Result<()>;

    async fn load_result(&self, task_id: Uuid) -> Result<Option<ResultDocument>>;

    async fn query_results(&self, query: &ResultQuery) -> Result<Vec<ResultDocument>>;
}

#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Insert or replace the reference for `document.song_id`
    async fn save_reference(&self, document: &ReferenceDocument) -> Result<()>;

    async fn load_reference(&self, song_id: &str) -> Result<Option<ReferenceDocument>>;
}

/// All three stores behind one handle
pub trait Store: JobStore + ResultStore + ReferenceStore {}

impl<T: JobStore + ResultStore + ReferenceStore> Store for T {}

/// SQLite-backed implementation of every store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `db_path` and ensure tables
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .busy_timeout(Duration::from_millis(1000))
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        init_tables(&pool).await?;
        tracing::info!(path = %db_path.display(), "Database ready");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for in-flight queries
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database closed");
    }
}

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            state TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            checkpoint TEXT,
            result TEXT,
            error TEXT,
            payload TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS results (
            task_id TEXT PRIMARY KEY,
            result_type TEXT NOT NULL,
            user_id TEXT,
            song_id TEXT,
            document TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_user ON results (user_id, created_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_song ON results (song_id, created_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS "references" (
            song_id TEXT PRIMARY KEY,
            document TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!("Database tables initialized (jobs, results, references)");
    Ok(())
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn create_job(&self, job: &Job, request: &JobRequest) -> Result<()> {
        jobs::insert_job(&self.pool, job, request).await
    }

    async fn save_job(&self, job: &Job) -> Result<()> {
        jobs::save_job(&self.pool, job).await
    }

    async fn record_progress(&self, job_id: Uuid, checkpoint: Checkpoint) -> Result<()> {
        jobs::record_progress(&self.pool, job_id, checkpoint).await
    }

    async fn load_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        jobs::load_job(&self.pool, job_id).await
    }

    async fn begin_attempt(&self, job_id: Uuid) -> Result<u32> {
        jobs::begin_attempt(&self.pool, job_id).await
    }

    async fn incomplete_jobs(&self) -> Result<Vec<(Job, JobRequest)>> {
        jobs::incomplete_jobs(&self.pool).await
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn save_result(&self, document: &ResultDocument) -> Result<()> {
        results::save_result(&self.pool, document).await
    }

    async fn load_result(&self, task_id: Uuid) -> Result<Option<ResultDocument>> {
        results::load_result(&self.pool, task_id).await
    }

    async fn query_results(&self, query: &ResultQuery) -> Result<Vec<ResultDocument>> {
        results::query_results(&self.pool, query).await
    }
}

#[async_trait]
impl ReferenceStore for SqliteStore {
    async fn save_reference(&self, document: &ReferenceDocument) -> Result<()> {
        references::save_reference(&self.pool, document).await
    }

    async fn load_reference(&self, song_id: &str) -> Result<Option<ReferenceDocument>> {
        references::load_reference(&self.pool, song_id).await
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
pub(crate) fn timestamp(time: &chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| encore_common::Error::Internal(format!("Invalid timestamp {}: {}", value, e)))
}
