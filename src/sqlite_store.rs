//! SQLite-backed [`VectorStore`].
//!
//! Each build gets a fresh generation id (UUID v4). The build happens in
//! two transactions:
//!
//! 1. **write**: the generation row (`building`) and all its chunks with
//!    their embedding BLOBs are inserted. Nothing points at them yet.
//! 2. **swap**: `repo_indexes.active_generation` is repointed, the
//!    metadata is written, the new generation becomes `active`, the old one
//!    `previous`, and anything older is deleted.
//!
//! Readers resolve the active generation once and then read only rows of
//! that generation, so they see either the old build or the new one. A
//! failed write removes its own partial generation and leaves the pointer
//! untouched. Two overlapping builds for one repo resolve as last swap wins.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use repolens_core::embedding::{blob_to_vec, vec_to_blob};
use repolens_core::store::{rank_nearest, IndexGeneration, VectorStore};
use repolens_core::{ChunkMetadata, CodeChunk, IndexMetadata, RepoId, RetrievedResult};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn write_generation(
        &self,
        generation: &str,
        meta: &IndexMetadata,
        chunks: &[CodeChunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO index_generations (generation, repo_id, created_at, state) VALUES (?, ?, ?, 'building')",
        )
        .bind(generation)
        .bind(meta.repo_id.to_string())
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;

        for (ordinal, (chunk, vector)) in chunks.iter().zip(vectors).enumerate() {
            let metadata_json = serde_json::to_string(&chunk.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO chunks (generation, ordinal, chunk_id, repo_id, file_path, start_line,
                    end_line, language, text, hash, metadata_json, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(generation)
            .bind(ordinal as i64)
            .bind(chunk.id())
            .bind(chunk.repo_id.to_string())
            .bind(&chunk.file_path)
            .bind(chunk.start_line as i64)
            .bind(chunk.end_line as i64)
            .bind(&chunk.language)
            .bind(&chunk.text)
            .bind(chunk.content_hash())
            .bind(metadata_json)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to store chunk {}", chunk.location()))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn swap_active(&self, generation: &str, meta: &IndexMetadata) -> Result<Option<String>> {
        let repo_key = meta.repo_id.to_string();
        let mut tx = self.pool.begin().await?;

        let previous: Option<String> =
            sqlx::query_scalar("SELECT active_generation FROM repo_indexes WHERE repo_id = ?")
                .bind(&repo_key)
                .fetch_optional(&mut *tx)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO repo_indexes (repo_id, active_generation, file_count, chunk_count,
                commit_hash, embedding_model, dims, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(repo_id) DO UPDATE SET
                active_generation = excluded.active_generation,
                file_count = excluded.file_count,
                chunk_count = excluded.chunk_count,
                commit_hash = excluded.commit_hash,
                embedding_model = excluded.embedding_model,
                dims = excluded.dims,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&repo_key)
        .bind(generation)
        .bind(meta.file_count as i64)
        .bind(meta.chunk_count as i64)
        .bind(meta.commit_hash.as_deref())
        .bind(&meta.embedding_model)
        .bind(meta.dims as i64)
        .bind(meta.indexed_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE index_generations SET state = 'active' WHERE generation = ?")
            .bind(generation)
            .execute(&mut *tx)
            .await?;

        if let Some(prev) = &previous {
            sqlx::query("UPDATE index_generations SET state = 'previous' WHERE generation = ?")
                .bind(prev)
                .execute(&mut *tx)
                .await?;
        }

        // Keep the new and the immediately previous generation only.
        let keep_prev = previous.clone().unwrap_or_default();
        sqlx::query(
            r#"
            DELETE FROM chunks WHERE generation IN (
                SELECT generation FROM index_generations
                WHERE repo_id = ? AND state != 'building' AND generation NOT IN (?, ?)
            )
            "#,
        )
        .bind(&repo_key)
        .bind(generation)
        .bind(&keep_prev)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            DELETE FROM index_generations
            WHERE repo_id = ? AND state != 'building' AND generation NOT IN (?, ?)
            "#,
        )
        .bind(&repo_key)
        .bind(generation)
        .bind(&keep_prev)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(previous)
    }

    async fn discard_generation(&self, generation: &str) {
        let result = async {
            sqlx::query("DELETE FROM chunks WHERE generation = ?")
                .bind(generation)
                .execute(&self.pool)
                .await?;
            sqlx::query("DELETE FROM index_generations WHERE generation = ? AND state = 'building'")
                .bind(generation)
                .execute(&self.pool)
                .await?;
            Ok::<_, sqlx::Error>(())
        }
        .await;
        if let Err(e) = result {
            warn!(generation, error = %e, "failed to clean up partial generation");
        }
    }

    /// Number of generations currently stored for `repo_id`.
    pub async fn retained_generations(&self, repo_id: &RepoId) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_generations WHERE repo_id = ?")
            .bind(repo_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    async fn load_rows(&self, generation: &IndexGeneration) -> Result<Vec<(CodeChunk, Vec<f32>)>> {
        let rows = sqlx::query(
            r#"
            SELECT repo_id, file_path, start_line, end_line, language, text, metadata_json, embedding
            FROM chunks
            WHERE generation = ?
            ORDER BY ordinal ASC
            "#,
        )
        .bind(&generation.generation)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(CodeChunk, Vec<f32>)> {
                let repo_id: String = row.get("repo_id");
                let metadata_json: String = row.get("metadata_json");
                let start_line: i64 = row.get("start_line");
                let end_line: i64 = row.get("end_line");
                let blob: Vec<u8> = row.get("embedding");
                let chunk = CodeChunk {
                    repo_id: repo_id.parse()?,
                    file_path: row.get("file_path"),
                    start_line: start_line as u32,
                    end_line: end_line as u32,
                    language: row.get("language"),
                    text: row.get("text"),
                    metadata: serde_json::from_str::<ChunkMetadata>(&metadata_json)
                        .with_context(|| "corrupt chunk metadata")?,
                };
                Ok((chunk, blob_to_vec(&blob)))
            })
            .collect()
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn replace_index(
        &self,
        meta: &IndexMetadata,
        chunks: &[CodeChunk],
        vectors: &[Vec<f32>],
    ) -> Result<IndexGeneration> {
        if chunks.len() != vectors.len() {
            bail!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        let generation = Uuid::new_v4().to_string();
        if let Err(e) = self.write_generation(&generation, meta, chunks, vectors).await {
            self.discard_generation(&generation).await;
            return Err(e);
        }
        debug!(repo_id = %meta.repo_id, generation = %generation, chunks = chunks.len(), "generation written");

        let previous = match self.swap_active(&generation, meta).await {
            Ok(previous) => previous,
            Err(e) => {
                self.discard_generation(&generation).await;
                return Err(e);
            }
        };
        info!(
            repo_id = %meta.repo_id,
            generation = %generation,
            previous = previous.as_deref().unwrap_or("-"),
            "active generation swapped"
        );

        Ok(IndexGeneration {
            repo_id: meta.repo_id.clone(),
            generation,
        })
    }

    async fn active_generation(&self, repo_id: &RepoId) -> Result<Option<IndexGeneration>> {
        let active: Option<String> =
            sqlx::query_scalar("SELECT active_generation FROM repo_indexes WHERE repo_id = ?")
                .bind(repo_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(active.map(|generation| IndexGeneration {
            repo_id: repo_id.clone(),
            generation,
        }))
    }

    async fn metadata(&self, repo_id: &RepoId) -> Result<Option<IndexMetadata>> {
        let row = sqlx::query(
            r#"
            SELECT file_count, chunk_count, commit_hash, embedding_model, dims, indexed_at
            FROM repo_indexes WHERE repo_id = ?
            "#,
        )
        .bind(repo_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let file_count: i64 = row.get("file_count");
        let chunk_count: i64 = row.get("chunk_count");
        let dims: i64 = row.get("dims");
        let indexed_at: i64 = row.get("indexed_at");
        Ok(Some(IndexMetadata {
            repo_id: repo_id.clone(),
            file_count: file_count as usize,
            chunk_count: chunk_count as usize,
            commit_hash: row.get("commit_hash"),
            indexed_at: Utc
                .timestamp_millis_opt(indexed_at)
                .single()
                .unwrap_or_default(),
            embedding_model: row.get("embedding_model"),
            dims: dims as usize,
        }))
    }

    async fn nearest(
        &self,
        generation: &IndexGeneration,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedResult>> {
        let rows = self.load_rows(generation).await?;
        Ok(rank_nearest(
            rows.iter().map(|(c, v)| (c, v.as_slice())),
            query,
            k,
        ))
    }

    async fn chunks(&self, generation: &IndexGeneration) -> Result<Vec<CodeChunk>> {
        Ok(self
            .load_rows(generation)
            .await?
            .into_iter()
            .map(|(c, _)| c)
            .collect())
    }
}
