//! Index build, load, and retrieval over a [`VectorStore`].
//!
//! [`SemanticIndex`] pairs one store with one [`Embedder`]. Both the build
//! path (embedding chunk texts) and the query path (embedding questions)
//! go through that embedder. The store outlives any one process, so each
//! index records the model and dimension count it was built with; loading
//! or querying it with a different embedder fails with
//! [`PipelineError::Config`] until the repository is reindexed.
//!
//! The [`RelevanceFilter`] is applied by callers after retrieval: results
//! whose distance reaches the threshold are dropped, order is preserved.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::embedding::Embedder;
use crate::error::PipelineError;
use crate::models::{CodeChunk, IndexMetadata, RepoId, RetrievedResult};
use crate::store::{IndexGeneration, VectorStore};

/// Distance at or above which a result is considered unrelated.
pub const DEFAULT_MAX_DISTANCE: f32 = 2.0;

/// Default number of texts sent to the embedder per call.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// A store plus the embedder its indexes are built with.
pub struct SemanticIndex<S> {
    store: S,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

/// A loaded index, pinned to the generation that was active at load time.
pub struct IndexHandle<'a, S> {
    index: &'a SemanticIndex<S>,
    generation: IndexGeneration,
}

impl<S: VectorStore> SemanticIndex<S> {
    pub fn new(store: S, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Embed every chunk and replace the repository's index with exactly
    /// this chunk set.
    ///
    /// Nothing is written unless every embedding call succeeds.
    pub async fn build_index(
        &self,
        repo_id: &RepoId,
        chunks: &[CodeChunk],
        file_count: usize,
        commit_hash: Option<String>,
    ) -> Result<IndexMetadata> {
        if let Some(stray) = chunks.iter().find(|c| &c.repo_id != repo_id) {
            bail!(
                "chunk {} belongs to {}, not {}",
                stray.location(),
                stray.repo_id,
                repo_id
            );
        }

        let vectors = self.embed_all(chunks).await?;

        let meta = IndexMetadata {
            repo_id: repo_id.clone(),
            file_count,
            chunk_count: chunks.len(),
            commit_hash,
            indexed_at: Utc::now(),
            embedding_model: self.embedder.model_name().to_string(),
            dims: self.embedder.dims(),
        };

        let generation = self
            .store
            .replace_index(&meta, chunks, &vectors)
            .await
            .with_context(|| format!("failed to write index for {}", repo_id))?;

        info!(
            repo_id = %repo_id,
            generation = %generation.generation,
            chunk_count = meta.chunk_count,
            file_count = meta.file_count,
            "index built"
        );
        Ok(meta)
    }

    async fn embed_all(&self, chunks: &[CodeChunk]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = self.embedder.embed(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(PipelineError::external(
                    "embedding",
                    format!("expected {} vectors, got {}", texts.len(), embedded.len()),
                )
                .into());
            }
            if let Some(bad) = embedded.iter().find(|v| v.len() != self.embedder.dims()) {
                return Err(PipelineError::external(
                    "embedding",
                    format!(
                        "model {} returned {} dims, configured {}",
                        self.embedder.model_name(),
                        bad.len(),
                        self.embedder.dims()
                    ),
                )
                .into());
            }
            debug!(batch = texts.len(), "embedded batch");
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    /// Load the active index for `repo_id`.
    ///
    /// Fails with [`PipelineError::IndexNotFound`] if no build ever
    /// completed for this repository, and with [`PipelineError::Config`]
    /// if it was built with a different embedding model or dimension count.
    pub async fn load_index(&self, repo_id: &RepoId) -> Result<IndexHandle<'_, S>> {
        self.ensure_same_embedding_space(repo_id).await?;
        match self.store.active_generation(repo_id).await? {
            Some(generation) => Ok(IndexHandle {
                index: self,
                generation,
            }),
            None => Err(PipelineError::IndexNotFound {
                repo_id: repo_id.to_string(),
            }
            .into()),
        }
    }

    /// Metadata of the last successful build, if any.
    pub async fn metadata(&self, repo_id: &RepoId) -> Result<Option<IndexMetadata>> {
        self.store.metadata(repo_id).await
    }

    /// Up to `k` chunks most relevant to `question`, by ascending distance.
    ///
    /// An unknown repository or an empty index yields an empty vector,
    /// not an error; use [`load_index`](Self::load_index) to tell a
    /// missing index apart. An index from another embedding space is an
    /// error here too.
    pub async fn retrieve_chunks(
        &self,
        repo_id: &RepoId,
        question: &str,
        k: usize,
    ) -> Result<Vec<RetrievedResult>> {
        self.ensure_same_embedding_space(repo_id).await?;
        match self.store.active_generation(repo_id).await? {
            Some(generation) => {
                IndexHandle {
                    index: self,
                    generation,
                }
                .search(question, k)
                .await
            }
            None => Ok(Vec::new()),
        }
    }

    async fn ensure_same_embedding_space(&self, repo_id: &RepoId) -> Result<()> {
        let Some(meta) = self.store.metadata(repo_id).await? else {
            return Ok(());
        };
        let model = self.embedder.model_name();
        let dims = self.embedder.dims();
        if meta.embedding_model != model || meta.dims != dims {
            warn!(
                repo_id = %repo_id,
                indexed_model = %meta.embedding_model,
                indexed_dims = meta.dims,
                model,
                dims,
                "embedding space mismatch"
            );
            return Err(PipelineError::Config(format!(
                "index for {} was built with {} ({} dims) but the configured embedder is {} ({} dims); reindex the repository",
                repo_id, meta.embedding_model, meta.dims, model, dims
            ))
            .into());
        }
        Ok(())
    }

    async fn embed_query(&self, question: &str) -> Result<Vec<f32>> {
        self.embedder
            .embed(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::external("embedding", "empty embedding response").into())
    }
}

impl<S: VectorStore> IndexHandle<'_, S> {
    pub fn generation(&self) -> &IndexGeneration {
        &self.generation
    }

    /// k-nearest-neighbour search within this generation.
    pub async fn search(&self, question: &str, k: usize) -> Result<Vec<RetrievedResult>> {
        if k == 0 || question.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query = self.index.embed_query(question).await?;
        let results = self.index.store.nearest(&self.generation, &query, k).await?;
        debug!(
            repo_id = %self.generation.repo_id,
            k,
            hits = results.len(),
            "retrieved chunks"
        );
        Ok(results)
    }

    /// Every chunk in this generation, in build order.
    pub async fn chunks(&self) -> Result<Vec<CodeChunk>> {
        self.index.store.chunks(&self.generation).await
    }
}

/// Precision-over-recall cut applied to retrieval results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelevanceFilter {
    pub max_distance: f32,
}

impl Default for RelevanceFilter {
    fn default() -> Self {
        Self {
            max_distance: DEFAULT_MAX_DISTANCE,
        }
    }
}

impl RelevanceFilter {
    pub fn new(max_distance: f32) -> Self {
        Self { max_distance }
    }

    pub fn is_relevant(&self, result: &RetrievedResult) -> bool {
        result.distance < self.max_distance
    }

    /// Drop results at or beyond the threshold, keeping the order of the rest.
    pub fn apply(&self, results: Vec<RetrievedResult>) -> Vec<RetrievedResult> {
        results.into_iter().filter(|r| self.is_relevant(r)).collect()
    }
}
