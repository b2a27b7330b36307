//! Idempotent schema creation.
//!
//! | Table | Holds |
//! |-------|-------|
//! | `index_generations` | one row per build attempt (`building`, `active`, `previous`) |
//! | `chunks` | chunk text, metadata, and embedding BLOB per generation |
//! | `repo_indexes` | active-generation pointer and [`IndexMetadata`] per repo id |
//! | `review_runs` | append-only review log |
//!
//! [`IndexMetadata`]: repolens_core::IndexMetadata

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_generations (
            generation TEXT PRIMARY KEY,
            repo_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            state TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            generation TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            chunk_id TEXT NOT NULL,
            repo_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            language TEXT NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            PRIMARY KEY (generation, ordinal),
            UNIQUE (generation, chunk_id),
            FOREIGN KEY (generation) REFERENCES index_generations(generation) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repo_indexes (
            repo_id TEXT PRIMARY KEY,
            active_generation TEXT NOT NULL,
            file_count INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL,
            commit_hash TEXT,
            embedding_model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            indexed_at INTEGER NOT NULL,
            FOREIGN KEY (active_generation) REFERENCES index_generations(generation)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_id TEXT NOT NULL,
            pr_number INTEGER NOT NULL,
            pr_title TEXT,
            created_at INTEGER NOT NULL,
            summary TEXT NOT NULL,
            comment_count INTEGER NOT NULL,
            stats_json TEXT NOT NULL,
            comments_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_generations_repo ON index_generations(repo_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_review_runs_repo ON review_runs(repo_id, created_at, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("db.sqlite")).await.unwrap();
        apply_schema(&pool).await.unwrap();
        apply_schema(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            tables,
            vec!["chunks", "index_generations", "repo_indexes", "review_runs"]
        );
    }
}
