//! # repolens core
//!
//! Pure pipeline logic shared by the `repolens` CLI and HTTP server:
//! chunk models, the line-bounded chunker, the vector store abstraction,
//! retrieval with relevance filtering, pull request diff ingestion,
//! structured review parsing, and dashboard aggregation.
//!
//! This crate contains no tokio, sqlx, network, or filesystem I/O.
//! Storage backends and model providers live in the `repolens` crate and
//! plug in through the [`store::VectorStore`] and
//! [`embedding::Embedder`] traits.

pub mod chunk;
pub mod diff;
pub mod embedding;
pub mod error;
pub mod metrics;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod review;
pub mod store;

pub use error::PipelineError;
pub use models::{CodeChunk, ChunkMetadata, IndexMetadata, RepoId, RetrievedResult};
