//! Vector index storage abstraction.
//!
//! The [`VectorStore`] trait persists one index per [`RepoId`] as a series
//! of immutable *generations*. A build writes a complete new generation and
//! then swaps the repository's active pointer to it in one step, so a
//! reader that resolved the active generation never observes a mix of two
//! builds or a half-written one.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::cmp::Ordering;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::squared_l2_distance;
use crate::models::{CodeChunk, IndexMetadata, RepoId, RetrievedResult};

/// A pinned, immutable version of one repository's index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexGeneration {
    pub repo_id: RepoId,
    pub generation: String,
}

/// Abstract storage backend for repository indexes.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_index`](VectorStore::replace_index) | Write a new generation and make it active |
/// | [`active_generation`](VectorStore::active_generation) | Resolve the current generation, if any |
/// | [`metadata`](VectorStore::metadata) | Read the metadata of the active build |
/// | [`nearest`](VectorStore::nearest) | k-nearest-neighbour search within a generation |
/// | [`chunks`](VectorStore::chunks) | All chunks of a generation, in insertion order |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Persist `chunks` with their `vectors` as a new generation for
    /// `meta.repo_id` and atomically make it the active one.
    ///
    /// On error the previously active generation stays active.
    async fn replace_index(
        &self,
        meta: &IndexMetadata,
        chunks: &[CodeChunk],
        vectors: &[Vec<f32>],
    ) -> Result<IndexGeneration>;

    /// The active generation, or `None` if the repo was never indexed.
    async fn active_generation(&self, repo_id: &RepoId) -> Result<Option<IndexGeneration>>;

    /// Metadata written by the last successful build.
    async fn metadata(&self, repo_id: &RepoId) -> Result<Option<IndexMetadata>>;

    /// Up to `k` chunks of `generation` ordered by ascending distance to
    /// `query`; ties keep insertion order.
    async fn nearest(
        &self,
        generation: &IndexGeneration,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedResult>>;

    /// Every chunk of `generation`, in insertion order.
    async fn chunks(&self, generation: &IndexGeneration) -> Result<Vec<CodeChunk>>;
}

/// Brute-force ranking shared by the store implementations.
///
/// `entries` must be in insertion order; the stable sort keeps that order
/// among equal distances.
pub fn rank_nearest<'a, I>(entries: I, query: &[f32], k: usize) -> Vec<RetrievedResult>
where
    I: IntoIterator<Item = (&'a CodeChunk, &'a [f32])>,
{
    if k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<RetrievedResult> = entries
        .into_iter()
        .map(|(chunk, vector)| RetrievedResult {
            chunk: chunk.clone(),
            distance: squared_l2_distance(query, vector),
        })
        .collect();
    scored.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
    scored.truncate(k);
    scored
}
