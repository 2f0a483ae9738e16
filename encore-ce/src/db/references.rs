//! Reference documents keyed by song id (last write wins)

use encore_common::Result;
use sqlx::SqlitePool;

use super::timestamp;
use crate::models::ReferenceDocument;
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

pub async fn save_reference(pool: &SqlitePool, document: &ReferenceDocument) -> Result<()> {
    let json = serde_json::to_string(document)?;
    let created_at = timestamp(&document.created_at);
    let updated_at = timestamp(&chrono::Utc::now());

    retry_on_lock("save reference", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO "references" (song_id, document, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(song_id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&document.song_id)
        .bind(&json)
        .bind(&created_at)
        .bind(&updated_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await?;

    tracing::debug!(song_id = %document.song_id, bytes = json.len(), "Reference stored");
    Ok(())
}

pub async fn load_reference(pool: &SqlitePool, song_id: &str) -> Result<Option<ReferenceDocument>> {
    let document: Option<String> =
        sqlx::query_scalar(r#"SELECT document FROM "references" WHERE song_id = ?"#)
            .bind(song_id)
            .fetch_optional(pool)
            .await?;
    Ok(document
        .map(|json| serde_json::from_str(&json))
        .transpose()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_store;
    use crate::models::{FeatureSet, ReferenceMetadata};

    fn reference(song_id: &str, tempo: f64) -> ReferenceDocument {
        ReferenceDocument {
            song_id: song_id.to_string(),
            features: FeatureSet {
                tempo,
                onsets: vec![0.5, 1.0],
                chroma: vec![[0.5; 12]; 3],
                duration: 1.5,
                ..Default::default()
            },
            midi_data: None,
            metadata: ReferenceMetadata {
                song_id: song_id.to_string(),
                has_midi: false,
                description: None,
            },
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let (store, _dir) = temp_store().await;
        save_reference(store.pool(), &reference("song-1", 100.0)).await.unwrap();
        save_reference(store.pool(), &reference("song-1", 128.0)).await.unwrap();

        let loaded = load_reference(store.pool(), "song-1").await.unwrap().unwrap();
        assert_eq!(loaded.features.tempo, 128.0);
        assert_eq!(loaded.features.chroma.len(), 3);

        let count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "references""#)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_missing_reference_is_none() {
        let (store, _dir) = temp_store().await;
        assert!(load_reference(store.pool(), "nope").await.unwrap().is_none());
    }
}
