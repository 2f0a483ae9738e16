//! Database test utilities

use anyhow::Result;
use sqlx::SqlitePool;

/// Column information from PRAGMA table_info
#[derive(Debug, sqlx::FromRow)]
pub struct ColumnInfo {
    pub cid: i32,
    pub name: String,
    pub r#type: String,
    pub notnull: i32,
    pub dflt_value: Option<String>,
    pub pk: i32,
}

/// Get table schema information
pub async fn get_table_columns(pool: &SqlitePool, table_name: &str) -> Result<Vec<ColumnInfo>> {
    let query = format!("PRAGMA table_info(\"{}\")", table_name);
    let columns = sqlx::query_as::<_, ColumnInfo>(&query)
        .fetch_all(pool)
        .await?;
    Ok(columns)
}

/// Assert a table has every listed column
pub async fn assert_has_columns(pool: &SqlitePool, table_name: &str, expected: &[&str]) {
    let columns = get_table_columns(pool, table_name).await.unwrap();
    for name in expected {
        assert!(
            columns.iter().any(|c| c.name == *name),
            "Table '{}' should have column '{}'",
            table_name,
            name
        );
    }
}

/// Row count of a table
pub async fn count_rows(pool: &SqlitePool, table_name: &str) -> i64 {
    let query = format!("SELECT COUNT(*) FROM \"{}\"", table_name);
    sqlx::query_scalar(&query).fetch_one(pool).await.unwrap()
}
