//! In-memory [`VectorStore`] implementation for tests and embedding in
//! other tools.
//!
//! Generations live in a `HashMap` behind a `std::sync::RwLock`; swapping
//! the active generation happens under the write lock, so readers see
//! either the old or the new build. Only the active and the immediately
//! previous generation are retained.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{CodeChunk, IndexMetadata, RepoId, RetrievedResult};

use super::{rank_nearest, IndexGeneration, VectorStore};

struct StoredGeneration {
    chunks: Vec<CodeChunk>,
    vectors: Vec<Vec<f32>>,
}

#[derive(Default)]
struct RepoSlot {
    active: Option<String>,
    previous: Option<String>,
    meta: Option<IndexMetadata>,
    generations: HashMap<String, StoredGeneration>,
}

/// In-memory index store.
pub struct InMemoryStore {
    repos: RwLock<HashMap<RepoId, RepoSlot>>,
    next_generation: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            repos: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Number of generations currently retained for `repo_id`.
    pub fn retained_generations(&self, repo_id: &RepoId) -> usize {
        self.repos
            .read()
            .map(|repos| repos.get(repo_id).map_or(0, |s| s.generations.len()))
            .unwrap_or(0)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
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
        let generation = format!("g{}", self.next_generation.fetch_add(1, Ordering::SeqCst));
        let stored = StoredGeneration {
            chunks: chunks.to_vec(),
            vectors: vectors.to_vec(),
        };

        let mut repos = self.repos.write().map_err(poisoned)?;
        let slot = repos.entry(meta.repo_id.clone()).or_default();
        slot.generations.insert(generation.clone(), stored);
        if let Some(stale) = slot.previous.take() {
            slot.generations.remove(&stale);
        }
        slot.previous = slot.active.replace(generation.clone());
        slot.meta = Some(meta.clone());

        Ok(IndexGeneration {
            repo_id: meta.repo_id.clone(),
            generation,
        })
    }

    async fn active_generation(&self, repo_id: &RepoId) -> Result<Option<IndexGeneration>> {
        let repos = self.repos.read().map_err(poisoned)?;
        Ok(repos
            .get(repo_id)
            .and_then(|slot| slot.active.clone())
            .map(|generation| IndexGeneration {
                repo_id: repo_id.clone(),
                generation,
            }))
    }

    async fn metadata(&self, repo_id: &RepoId) -> Result<Option<IndexMetadata>> {
        let repos = self.repos.read().map_err(poisoned)?;
        Ok(repos.get(repo_id).and_then(|slot| slot.meta.clone()))
    }

    async fn nearest(
        &self,
        generation: &IndexGeneration,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedResult>> {
        let repos = self.repos.read().map_err(poisoned)?;
        let Some(stored) = repos
            .get(&generation.repo_id)
            .and_then(|slot| slot.generations.get(&generation.generation))
        else {
            return Ok(Vec::new());
        };
        Ok(rank_nearest(
            stored
                .chunks
                .iter()
                .zip(stored.vectors.iter().map(|v| v.as_slice())),
            query,
            k,
        ))
    }

    async fn chunks(&self, generation: &IndexGeneration) -> Result<Vec<CodeChunk>> {
        let repos = self.repos.read().map_err(poisoned)?;
        Ok(repos
            .get(&generation.repo_id)
            .and_then(|slot| slot.generations.get(&generation.generation))
            .map(|stored| stored.chunks.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use chrono::Utc;

    fn meta(repo: &RepoId, count: usize) -> IndexMetadata {
        IndexMetadata {
            repo_id: repo.clone(),
            file_count: 1,
            chunk_count: count,
            commit_hash: None,
            indexed_at: Utc::now(),
            embedding_model: "test".to_string(),
            dims: 2,
        }
    }

    fn chunk(repo: &RepoId, text: &str) -> CodeChunk {
        CodeChunk {
            repo_id: repo.clone(),
            file_path: format!("{}.rs", text),
            start_line: 1,
            end_line: 1,
            language: "rust".to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_unknown_repo_has_no_generation() {
        let store = InMemoryStore::new();
        let repo = RepoId::github("acme", "api");
        assert!(store.active_generation(&repo).await.unwrap().is_none());
        assert!(store.metadata(&repo).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_swaps_and_keeps_old_handle_readable() {
        let store = InMemoryStore::new();
        let repo = RepoId::github("acme", "api");

        let g1 = store
            .replace_index(&meta(&repo, 1), &[chunk(&repo, "old")], &[vec![1.0, 0.0]])
            .await
            .unwrap();
        let g2 = store
            .replace_index(&meta(&repo, 1), &[chunk(&repo, "new")], &[vec![0.0, 1.0]])
            .await
            .unwrap();

        assert_ne!(g1, g2);
        assert_eq!(store.active_generation(&repo).await.unwrap(), Some(g2.clone()));
        assert_eq!(store.chunks(&g1).await.unwrap()[0].text, "old");
        assert_eq!(store.chunks(&g2).await.unwrap()[0].text, "new");

        store
            .replace_index(&meta(&repo, 0), &[], &[])
            .await
            .unwrap();
        assert_eq!(store.retained_generations(&repo), 2);
        assert!(store.chunks(&g1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_vectors_rejected_without_swap() {
        let store = InMemoryStore::new();
        let repo = RepoId::github("acme", "api");
        let err = store
            .replace_index(&meta(&repo, 1), &[chunk(&repo, "a")], &[])
            .await;
        assert!(err.is_err());
        assert!(store.active_generation(&repo).await.unwrap().is_none());
    }
}
