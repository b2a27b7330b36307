//! Reindex pipeline.
//!
//! discovery → read (lossy UTF-8) → line-bounded chunking → batched
//! embedding → generation swap. Every run is a full rebuild: the chunk set
//! passed to the index replaces whatever was there.
//!
//! GitHub repositories are first brought up to date in the clone cache
//! (see [`crate::git`]); the HEAD commit is recorded in the index metadata
//! and in every chunk's metadata so references link to the exact revision.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use repolens_core::chunk::chunk_file;
use repolens_core::store::VectorStore;
use repolens_core::{ChunkMetadata, CodeChunk, IndexMetadata, PipelineError, RepoId};

use crate::config::{Config, Credentials};
use crate::db;
use crate::discovery::discover_files;
use crate::git;
use crate::migrate::apply_schema;
use crate::pipeline::Pipeline;
use crate::progress::{IndexProgressEvent, IndexProgressReporter, ProgressMode};
use crate::session::Session;
use crate::sqlite_store::SqliteStore;

/// What to index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexTarget {
    Local(PathBuf),
    GitHub { owner: String, name: String },
}

/// Discovered and chunked repository, ready to embed.
#[derive(Debug, Clone)]
pub struct CollectedRepo {
    pub repo_id: RepoId,
    pub file_count: usize,
    pub chunks: Vec<CodeChunk>,
    pub commit_hash: Option<String>,
}

/// Counts printed by `index --dry-run` and returned by `POST /index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub repo_id: String,
    pub file_count: usize,
    pub chunk_count: usize,
    pub commit_hash: Option<String>,
    pub dry_run: bool,
}

impl From<&IndexMetadata> for IngestReport {
    fn from(meta: &IndexMetadata) -> Self {
        Self {
            repo_id: meta.repo_id.to_string(),
            file_count: meta.file_count,
            chunk_count: meta.chunk_count,
            commit_hash: meta.commit_hash.clone(),
            dry_run: false,
        }
    }
}

/// Read a source file, dropping bytes that are not valid UTF-8.
pub fn read_source(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(bytes.utf8_chunks().map(|c| c.valid()).collect())
}

/// Discover and chunk every file under `root`.
///
/// Output order is file order (sorted relative path) then line order
/// within each file, so an unchanged tree always yields the same sequence.
pub fn collect_chunks(
    repo_id: &RepoId,
    root: &Path,
    config: &Config,
    commit_hash: Option<String>,
    progress: &dyn IndexProgressReporter,
) -> Result<CollectedRepo> {
    let repo = repo_id.to_string();
    progress.report(IndexProgressEvent::Discovering { repo: repo.clone() });
    let files = discover_files(root, &config.discovery)?;

    let metadata = ChunkMetadata {
        commit_hash: commit_hash.clone(),
        ..Default::default()
    };

    let total = files.len() as u64;
    let mut chunks = Vec::new();
    for (i, file) in files.iter().enumerate() {
        let text = match read_source(&file.path) {
            Ok(text) => text,
            Err(e) => {
                warn!(file = %file.relative, error = %e, "skipping unreadable file");
                continue;
            }
        };
        chunks.extend(chunk_file(
            repo_id,
            &file.relative,
            &text,
            config.chunking.max_lines,
            &metadata,
        ));
        progress.report(IndexProgressEvent::Chunking {
            repo: repo.clone(),
            n: i as u64 + 1,
            total,
        });
    }

    Ok(CollectedRepo {
        repo_id: repo_id.clone(),
        file_count: files.len(),
        chunks,
        commit_hash,
    })
}

/// Embed and swap in a collected repository.
pub async fn build(
    pipeline: &Pipeline,
    collected: CollectedRepo,
    progress: &dyn IndexProgressReporter,
) -> Result<IndexMetadata> {
    progress.report(IndexProgressEvent::Embedding {
        repo: collected.repo_id.to_string(),
        chunks: collected.chunks.len() as u64,
    });
    pipeline
        .index
        .build_index(
            &collected.repo_id,
            &collected.chunks,
            collected.file_count,
            collected.commit_hash,
        )
        .await
}

/// Resolve the repository root and id for `target`, syncing GitHub clones.
///
/// `session` is required for GitHub targets.
pub fn prepare(
    config: &Config,
    target: &IndexTarget,
    session: Option<&Session>,
) -> Result<(RepoId, PathBuf, Option<String>)> {
    match target {
        IndexTarget::Local(path) => {
            let root = std::fs::canonicalize(path)
                .with_context(|| format!("Repository path does not exist: {}", path.display()))?;
            let commit = git::try_head_commit(&root);
            Ok((RepoId::local(root.clone()), root, commit))
        }
        IndexTarget::GitHub { owner, name } => {
            let session = match session {
                Some(s) => s,
                None => {
                    return Err(PipelineError::Config(
                        "a GitHub session is required to index GitHub repositories".into(),
                    )
                    .into())
                }
            };
            let token = session.token()?;
            let checkout = git::sync_repo(
                &config.repos_dir(),
                &config.github.clone_base,
                owner,
                name,
                Some(token),
            )?;
            Ok((
                RepoId::github(owner, name),
                checkout.path,
                Some(checkout.commit_hash),
            ))
        }
    }
}

/// Full reindex of `target`. With `dry_run`, nothing is embedded or
/// written; the report carries the counts a real run would produce.
pub async fn index_target(
    pipeline: &Pipeline,
    target: &IndexTarget,
    session: Option<&Session>,
    dry_run: bool,
    progress: Arc<dyn IndexProgressReporter>,
) -> Result<IngestReport> {
    let config = pipeline.config.clone();
    let target = target.clone();
    let session = session.cloned();
    let walk_progress = Arc::clone(&progress);
    // git, the directory walk and file reads block; keep them off the runtime threads
    let collected = tokio::task::spawn_blocking(move || {
        let (repo_id, root, commit) = prepare(&config, &target, session.as_ref())?;
        collect_chunks(&repo_id, &root, &config, commit, walk_progress.as_ref())
    })
    .await??;

    if dry_run {
        return Ok(IngestReport {
            repo_id: collected.repo_id.to_string(),
            file_count: collected.file_count,
            chunk_count: collected.chunks.len(),
            commit_hash: collected.commit_hash,
            dry_run: true,
        });
    }

    let meta = build(pipeline, collected, progress.as_ref()).await?;
    info!(repo_id = %meta.repo_id, chunks = meta.chunk_count, "reindex complete");
    Ok(IngestReport::from(&meta))
}

/// `repolens index` entry point.
pub async fn run_index(
    config: &Config,
    target: IndexTarget,
    dry_run: bool,
    progress: Option<ProgressMode>,
) -> Result<()> {
    let creds = Credentials::from_env();
    if !dry_run {
        config.validate_credentials(&creds, false)?;
    }
    let session = match &target {
        IndexTarget::GitHub { .. } => Some(Session::from_credentials(&creds)?),
        IndexTarget::Local(_) => None,
    };

    let pipeline = if dry_run {
        // Counting chunks needs no embedding provider.
        let mut offline = config.clone();
        offline.embedding.provider = "hashing".to_string();
        Pipeline::open(&offline, &creds).await?
    } else {
        Pipeline::open(config, &creds).await?
    };

    let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
    let report = index_target(&pipeline, &target, session.as_ref(), dry_run, reporter).await?;

    if report.dry_run {
        println!("index {} (dry-run)", report.repo_id);
    } else {
        println!("index {}", report.repo_id);
    }
    println!("  files: {}", report.file_count);
    println!("  chunks: {}", report.chunk_count);
    if let Some(commit) = &report.commit_hash {
        println!("  commit: {}", commit);
    }
    println!("ok");
    Ok(())
}

/// `repolens status`: print the index metadata, or "not indexed".
pub async fn run_status(config: &Config, repo_id: &RepoId) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    let store = SqliteStore::new(pool.clone());

    match store.metadata(repo_id).await? {
        None => println!("{}: not indexed", repo_id),
        Some(meta) => {
            println!("{}", meta.repo_id);
            println!("  files: {}", meta.file_count);
            println!("  chunks: {}", meta.chunk_count);
            println!(
                "  commit: {}",
                meta.commit_hash.as_deref().unwrap_or("(none)")
            );
            println!("  indexed at: {}", meta.indexed_at.to_rfc3339());
            println!("  model: {} ({} dims)", meta.embedding_model, meta.dims);
        }
    }
    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_read_source_drops_invalid_utf8() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("latin1.py");
        fs::write(&path, b"name = 'caf\xe9'\nprint(name)\n").unwrap();
        assert_eq!(read_source(&path).unwrap(), "name = 'caf'\nprint(name)\n");
    }

    #[test]
    fn test_collect_chunks_line_ranges() {
        let tmp = TempDir::new().unwrap();
        let body: String = (1..=250).map(|i| format!("line {}\n", i)).collect();
        fs::write(tmp.path().join("big.rs"), body).unwrap();
        fs::write(tmp.path().join("small.rs"), "fn a() {}\n".repeat(10)).unwrap();

        let repo_id = RepoId::local(tmp.path());
        let collected =
            collect_chunks(&repo_id, tmp.path(), &Config::default(), None, &NoProgress).unwrap();
        let ranges: Vec<(&str, u32, u32)> = collected
            .chunks
            .iter()
            .map(|c| (c.file_path.as_str(), c.start_line, c.end_line))
            .collect();
        assert_eq!(
            ranges,
            vec![
                ("big.rs", 1, 100),
                ("big.rs", 101, 200),
                ("big.rs", 201, 250),
                ("small.rs", 1, 10),
            ]
        );
        assert_eq!(collected.file_count, 2);
    }

    #[test]
    fn test_commit_hash_flows_into_chunks() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.go"), "package a\n").unwrap();
        let repo_id = RepoId::github("acme", "api");
        let collected = collect_chunks(
            &repo_id,
            tmp.path(),
            &Config::default(),
            Some("abc123".into()),
            &NoProgress,
        )
        .unwrap();
        let meta = &collected.chunks[0].metadata;
        assert_eq!(meta.commit_hash.as_deref(), Some("abc123"));
        assert!(meta.source_url.as_deref().unwrap().contains("/blob/abc123/a.go"));
    }

    #[test]
    fn test_prepare_local_resolves_path() {
        let tmp = TempDir::new().unwrap();
        let (repo_id, root, commit) =
            prepare(&Config::default(), &IndexTarget::Local(tmp.path().to_path_buf()), None)
                .unwrap();
        assert_eq!(root, fs::canonicalize(tmp.path()).unwrap());
        assert_eq!(repo_id, RepoId::local(root));
        assert_eq!(commit, None);
    }

    #[test]
    fn test_prepare_github_requires_session() {
        let target = IndexTarget::GitHub {
            owner: "acme".into(),
            name: "api".into(),
        };
        assert!(prepare(&Config::default(), &target, None).is_err());
    }
}
