//! # repolens
//!
//! Retrieval-augmented code Q&A and pull request review over your
//! repositories.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────────┐
//! │ local dir / │──▶│ discover +   │──▶│ SQLite index   │
//! │ GitHub clone│   │ chunk+embed  │   │ (generations)  │
//! └─────────────┘   └──────────────┘   └───────┬────────┘
//!                                              │ retrieve + filter
//!                  ┌───────────────────────────┤
//!                  ▼                           ▼
//!            ┌──────────┐  PR diff ───▶  ┌──────────┐   ┌──────────────┐
//!            │   ask    │                │  review  │──▶│ review_runs  │──▶ dashboard
//!            └──────────┘                └──────────┘   └──────────────┘
//! ```
//!
//! Pure pipeline logic (chunking, ranking, prompts, review parsing,
//! aggregation) lives in `repolens-core`; this crate adds storage, model
//! and GitHub providers, the CLI, and the HTTP API.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment credentials |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | Generation-swapped vector store |
//! | [`metrics_store`] | Append-only review run log |
//! | [`pipeline`] | Shared index + metrics handles |
//! | [`discovery`] | Source file discovery |
//! | [`git`] | Clone cache |
//! | [`github`] | GitHub REST and OAuth client |
//! | [`session`] | Explicit GitHub session context |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Chat model providers and RAG answers |
//! | [`ingest`] | Reindex pipeline |
//! | [`progress`] | Index progress reporting |
//! | [`ask`] | Search and question answering |
//! | [`review`] | Pull request review service |
//! | [`dashboard`] | Review metrics rendering |
//! | [`server`] | JSON HTTP API |

pub mod ask;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod discovery;
pub mod embedding;
pub mod git;
pub mod github;
pub mod ingest;
pub mod llm;
pub mod metrics_store;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod review;
pub mod server;
pub mod session;
pub mod sqlite_store;
