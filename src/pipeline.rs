//! Shared handles for one configured pipeline.
//!
//! CLI commands and the HTTP server both open a [`Pipeline`]: the SQLite
//! pool with schema applied, the semantic index over it with the
//! configured embedder, and the review metrics log.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use repolens_core::embedding::Embedder;
use repolens_core::retrieve::{RelevanceFilter, SemanticIndex};

use crate::config::{Config, Credentials};
use crate::db;
use crate::embedding::create_embedder;
use crate::metrics_store::MetricsStore;
use crate::migrate::apply_schema;
use crate::sqlite_store::SqliteStore;

pub type Index = SemanticIndex<SqliteStore>;

pub struct Pipeline {
    pub config: Config,
    pub index: Index,
    pub metrics: MetricsStore,
}

impl Pipeline {
    /// Connect to the configured database and build the embedder.
    pub async fn open(config: &Config, creds: &Credentials) -> Result<Self> {
        config.ensure_dirs()?;
        let pool = db::connect(config).await?;
        apply_schema(&pool).await?;
        let embedder = create_embedder(&config.embedding, creds)?;
        Ok(Self::from_parts(config.clone(), pool, embedder))
    }

    /// Assemble from an open pool (schema already applied) and an embedder.
    pub fn from_parts(config: Config, pool: SqlitePool, embedder: Arc<dyn Embedder>) -> Self {
        let index = SemanticIndex::new(SqliteStore::new(pool.clone()), embedder)
            .with_batch_size(config.embedding.batch_size);
        Self {
            config,
            index,
            metrics: MetricsStore::new(pool),
        }
    }

    pub fn relevance_filter(&self) -> RelevanceFilter {
        RelevanceFilter::new(self.config.retrieval.max_distance)
    }
}
