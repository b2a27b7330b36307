//! Index progress reporting.
//!
//! `repolens index` reports what it is scanning and how far chunking has
//! got. Progress goes to **stderr** so stdout stays parseable; `--progress
//! json` emits one JSON object per line for scripts.

use std::io::Write;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexProgressEvent {
    /// Walking the repository tree. Total unknown.
    Discovering { repo: String },
    /// `n` of `total` discovered files read and chunked.
    Chunking { repo: String, n: u64, total: u64 },
    /// Handing `chunks` chunks to the embedding provider.
    Embedding { repo: String, chunks: u64 },
}

impl IndexProgressEvent {
    fn phase(&self) -> &'static str {
        match self {
            IndexProgressEvent::Discovering { .. } => "discovering",
            IndexProgressEvent::Chunking { .. } => "chunking",
            IndexProgressEvent::Embedding { .. } => "embedding",
        }
    }
}

pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// "index github::acme/api  chunking  120 / 1,402 files"
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Discovering { repo } => format!("index {}  discovering...\n", repo),
            IndexProgressEvent::Chunking { repo, n, total } => format!(
                "index {}  chunking  {} / {} files\n",
                repo,
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Embedding { repo, chunks } => format!(
                "index {}  embedding  {} chunks\n",
                repo,
                format_number(*chunks)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let mut obj = serde_json::json!({
            "event": "progress",
            "phase": event.phase(),
        });
        match &event {
            IndexProgressEvent::Discovering { repo } => {
                obj["repo"] = repo.as_str().into();
            }
            IndexProgressEvent::Chunking { repo, n, total } => {
                obj["repo"] = repo.as_str().into();
                obj["n"] = (*n).into();
                obj["total"] = (*total).into();
            }
            IndexProgressEvent::Embedding { repo, chunks } => {
                obj["repo"] = repo.as_str().into();
                obj["chunks"] = (*chunks).into();
            }
        }
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", obj);
        let _ = err.flush();
    }
}

pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}
