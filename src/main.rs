//! # repolens CLI
//!
//! ```bash
//! repolens --config ./config/repolens.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repolens init` | Create the SQLite database schema |
//! | `repolens index local <path>` | Reindex a local checkout |
//! | `repolens index github <owner>/<name>` | Clone or pull, then reindex |
//! | `repolens status <repo>` | Show index metadata |
//! | `repolens search <repo> "<query>"` | Retrieved chunks with distances |
//! | `repolens ask <repo> "<question>"` | Grounded answer with references |
//! | `repolens prs <owner>/<name>` | List open pull requests |
//! | `repolens review <repo> --pr N` | Review a pull request and record the run |
//! | `repolens dashboard <repo>` | Review metrics |
//! | `repolens serve` | Start the JSON HTTP API |
//!
//! `<repo>` is a repo id (`local::/abs/path`, `github::owner/name`), an
//! `owner/name` slug, or a local directory.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use repolens::config::{self, Config};
use repolens::ingest::IndexTarget;
use repolens::progress::ProgressMode;
use repolens::{ask, dashboard, github, ingest, migrate, review, server};
use repolens_core::RepoId;

#[derive(Parser)]
#[command(
    name = "repolens",
    about = "Retrieval-augmented code Q&A and pull request review over your repositories",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file means all defaults.
    #[arg(long, global = true, default_value = "./config/repolens.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Rebuild a repository's index from scratch.
    Index {
        #[command(subcommand)]
        source: IndexSource,

        /// Report file and chunk counts without embedding or writing.
        #[arg(long, global = true)]
        dry_run: bool,

        /// Progress on stderr (default: human when stderr is a TTY).
        #[arg(long, global = true, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show index metadata for a repository.
    Status { repo: String },

    /// Nearest chunks for a query, after the relevance filter.
    Search {
        repo: String,
        query: String,

        /// Number of chunks to retrieve (default: retrieval.top_k).
        #[arg(long)]
        k: Option<usize>,

        /// Show every retrieved chunk, including ones the filter drops.
        #[arg(long)]
        all: bool,
    },

    /// Answer a question from the repository's code.
    Ask {
        repo: String,
        question: String,

        #[arg(long)]
        k: Option<usize>,
    },

    /// List open pull requests of a GitHub repository.
    Prs {
        /// `owner/name`
        slug: String,
    },

    /// Review a pull request and record the run.
    Review {
        repo: String,

        #[arg(long)]
        pr: u64,

        /// JSON file of `[{filename, patch}]` instead of fetching from GitHub.
        #[arg(long)]
        diff_file: Option<PathBuf>,

        /// Pull request title shown to the model.
        #[arg(long)]
        title: Option<String>,
    },

    /// Review metrics for a repository.
    Dashboard {
        repo: String,

        /// Emit the aggregation as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the JSON HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum IndexSource {
    /// A directory on this machine.
    Local { path: PathBuf },
    /// A GitHub repository, cloned into the data directory.
    Github {
        /// `owner/name`
        slug: String,
    },
}

/// Resolve a CLI repository argument to a repo id.
fn parse_repo(arg: &str) -> Result<RepoId> {
    if let Ok(id) = arg.parse::<RepoId>() {
        return Ok(id);
    }
    let path = Path::new(arg);
    if path.is_dir() {
        return Ok(RepoId::local(std::fs::canonicalize(path)?));
    }
    Ok(RepoId::from_slug(arg)?)
}

fn load(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Init => {
            cfg.ensure_dirs()?;
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db_path().display());
        }
        Commands::Index {
            source,
            dry_run,
            progress,
        } => {
            let target = match source {
                IndexSource::Local { path } => IndexTarget::Local(path),
                IndexSource::Github { slug } => match RepoId::from_slug(&slug)? {
                    RepoId::GitHub { owner, name } => IndexTarget::GitHub { owner, name },
                    RepoId::Local(path) => IndexTarget::Local(path),
                },
            };
            ingest::run_index(&cfg, target, dry_run, progress).await?;
        }
        Commands::Status { repo } => {
            ingest::run_status(&cfg, &parse_repo(&repo)?).await?;
        }
        Commands::Search { repo, query, k, all } => {
            ask::run_search(&cfg, &parse_repo(&repo)?, &query, k, all).await?;
        }
        Commands::Ask { repo, question, k } => {
            ask::run_ask(&cfg, &parse_repo(&repo)?, &question, k).await?;
        }
        Commands::Prs { slug } => match RepoId::from_slug(&slug)? {
            RepoId::GitHub { owner, name } => github::run_prs(&cfg, &owner, &name).await?,
            RepoId::Local(_) => anyhow::bail!("expected owner/name, got {}", slug),
        },
        Commands::Review {
            repo,
            pr,
            diff_file,
            title,
        } => {
            review::run_review(&cfg, &parse_repo(&repo)?, pr, diff_file.as_deref(), title).await?;
        }
        Commands::Dashboard { repo, json } => {
            dashboard::run_dashboard(&cfg, &parse_repo(&repo)?, json).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
