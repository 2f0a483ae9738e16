//! Result documents keyed by task id

use encore_common::Result;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{timestamp, ResultQuery, MAX_RESULT_LIMIT};
use crate::models::{ResultDocument, ResultType};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

pub async fn save_result(pool: &SqlitePool, document: &ResultDocument) -> Result<()> {
    let task_id = document.task_id.to_string();
    let json = serde_json::to_string(document)?;
    let created_at = timestamp(&document.created_at);

    retry_on_lock("save result", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO results (task_id, result_type, user_id, song_id, document, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET
                result_type = excluded.result_type,
                user_id = excluded.user_id,
                song_id = excluded.song_id,
                document = excluded.document
            "#,
        )
        .bind(&task_id)
        .bind(document.result_type.as_str())
        .bind(&document.user_id)
        .bind(&document.song_id)
        .bind(&json)
        .bind(&created_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

pub async fn load_result(pool: &SqlitePool, task_id: Uuid) -> Result<Option<ResultDocument>> {
    let document: Option<String> =
        sqlx::query_scalar("SELECT document FROM results WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_optional(pool)
            .await?;
    Ok(document
        .map(|json| serde_json::from_str(&json))
        .transpose()?)
}

/// Newest first, at most `MAX_RESULT_LIMIT` rows
pub async fn query_results(pool: &SqlitePool, query: &ResultQuery) -> Result<Vec<ResultDocument>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT document FROM results WHERE 1 = 1");
    if let Some(user_id) = &query.user_id {
        builder.push(" AND user_id = ").push_bind(user_id.clone());
    }
    if let Some(song_id) = &query.song_id {
        builder.push(" AND song_id = ").push_bind(song_id.clone());
    }
    if query.result_type != ResultType::All {
        builder
            .push(" AND result_type = ")
            .push_bind(query.result_type.as_str());
    }
    let limit = query.limit.clamp(1, MAX_RESULT_LIMIT);
    builder
        .push(" ORDER BY created_at DESC, task_id DESC LIMIT ")
        .push_bind(limit as i64);

    let rows = builder.build().fetch_all(pool).await?;
    let mut documents = Vec::with_capacity(rows.len());
    for row in rows {
        let json: String = row.get("document");
        documents.push(serde_json::from_str(&json)?);
    }
    Ok(documents)
}
