//! Core data models that flow through the repolens pipeline.
//!
//! [`CodeChunk`]s are produced by the chunker (from repository files) and by
//! diff ingestion (from pull request patches), embedded into a per-repository
//! index, and come back out of retrieval as [`RetrievedResult`]s.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PipelineError;

/// Repository identity, used as the key of the index, metadata, and
/// metrics stores.
///
/// The string form is load-bearing: `local::<absolute-path>` or
/// `github::<owner>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RepoId {
    /// A repository on the local filesystem. The path must already be
    /// resolved to an absolute path by the caller.
    Local(PathBuf),
    /// A GitHub repository.
    GitHub { owner: String, name: String },
}

impl RepoId {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        RepoId::Local(path.into())
    }

    pub fn github(owner: &str, name: &str) -> Self {
        RepoId::GitHub {
            owner: owner.trim().to_string(),
            name: name.trim().to_string(),
        }
    }

    /// Parse an `owner/name` slug into a GitHub repo id.
    ///
    /// Both segments are limited to `[A-Za-z0-9._-]` and may not be `.` or
    /// `..`; they become path components of the clone cache.
    pub fn from_slug(slug: &str) -> Result<Self, PipelineError> {
        match slug.trim().split_once('/') {
            Some((owner, name))
                if is_github_segment(owner.trim()) && is_github_segment(name.trim()) =>
            {
                Ok(RepoId::github(owner, name))
            }
            _ => Err(PipelineError::InvalidRepoId(slug.to_string())),
        }
    }

    /// Clickable reference to a line range of a file in this repository.
    ///
    /// GitHub repos link to the blob at `commit` (or `HEAD`); local repos
    /// get a `file://` URL under the repository root.
    pub fn source_link(&self, commit: Option<&str>, path: &str, start: u32, end: u32) -> String {
        match self {
            RepoId::Local(root) => format!("file://{}/{}#L{}", root.display(), path, start),
            RepoId::GitHub { owner, name } => format!(
                "https://github.com/{}/{}/blob/{}/{}#L{}-L{}",
                owner,
                name,
                commit.unwrap_or("HEAD"),
                path,
                start,
                end
            ),
        }
    }
}

fn is_github_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoId::Local(path) => write!(f, "local::{}", path.display()),
            RepoId::GitHub { owner, name } => write!(f, "github::{}/{}", owner, name),
        }
    }
}

impl FromStr for RepoId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("local::") {
            if path.is_empty() {
                return Err(PipelineError::InvalidRepoId(s.to_string()));
            }
            return Ok(RepoId::Local(PathBuf::from(path)));
        }
        if let Some(slug) = s.strip_prefix("github::") {
            return RepoId::from_slug(slug).map_err(|_| PipelineError::InvalidRepoId(s.to_string()));
        }
        Err(PipelineError::InvalidRepoId(s.to_string()))
    }
}

impl TryFrom<String> for RepoId {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RepoId> for String {
    fn from(value: RepoId) -> Self {
        value.to_string()
    }
}

/// Structured provenance attached to every chunk.
///
/// Producers (chunker, diff ingestion) and consumers (link building,
/// rendering) share these named fields; anything else goes in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Set on chunks produced from a pull request diff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// A contiguous, line-bounded slice of a source file.
///
/// Identity is `(repo_id, file_path, start_line, end_line)`; line numbers
/// are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub repo_id: RepoId,
    /// Path relative to the repository root, `/`-separated.
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub language: String,
    pub text: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// The identity tuple of a [`CodeChunk`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub repo_id: RepoId,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl CodeChunk {
    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            repo_id: self.repo_id.clone(),
            file_path: self.file_path.clone(),
            start_line: self.start_line,
            end_line: self.end_line,
        }
    }

    /// Deterministic id derived from the chunk identity, stable across
    /// reindexes of an unchanged file.
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.repo_id.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.file_path.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.start_line.to_le_bytes());
        hasher.update(self.end_line.to_le_bytes());
        format!("{:x}", hasher.finalize())[..32].to_string()
    }

    /// SHA-256 of the chunk text.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// `path:start-end`, used in prompts and CLI output.
    pub fn location(&self) -> String {
        if self.start_line == self.end_line {
            format!("{}:{}", self.file_path, self.start_line)
        } else {
            format!("{}:{}-{}", self.file_path, self.start_line, self.end_line)
        }
    }

    pub fn line_count(&self) -> u32 {
        self.end_line + 1 - self.start_line
    }
}

/// Summary written alongside every successful index build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub repo_id: RepoId,
    pub file_count: usize,
    pub chunk_count: usize,
    pub commit_hash: Option<String>,
    pub indexed_at: DateTime<Utc>,
    /// Embedding model the index was built with.
    pub embedding_model: String,
    pub dims: usize,
}

/// A chunk returned from nearest-neighbour search.
///
/// `distance` follows the lower-is-more-relevant convention.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedResult {
    pub chunk: CodeChunk,
    pub distance: f32,
}

/// Pull request identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrInfo {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub repo_id: RepoId,
}

/// One changed file of a pull request, as delivered by the GitHub
/// `pulls/{n}/files` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrFile {
    #[serde(alias = "path")]
    pub filename: String,
    #[serde(default)]
    pub status: Option<String>,
    /// Unified diff text; absent for binary or very large files.
    #[serde(default)]
    pub patch: Option<String>,
}

/// Review finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Critical, Severity::Warning, Severity::Info];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl FromStr for Severity {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            other => Err(PipelineError::MalformedReview(format!(
                "unknown severity '{}' (expected critical, warning, or info)",
                other
            ))),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review finding category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Architecture,
    Performance,
    Correctness,
    Reliability,
    Maintainability,
    Testing,
    Documentation,
    Style,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Security,
        Category::Architecture,
        Category::Performance,
        Category::Correctness,
        Category::Reliability,
        Category::Maintainability,
        Category::Testing,
        Category::Documentation,
        Category::Style,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Security => "security",
            Category::Architecture => "architecture",
            Category::Performance => "performance",
            Category::Correctness => "correctness",
            Category::Reliability => "reliability",
            Category::Maintainability => "maintainability",
            Category::Testing => "testing",
            Category::Documentation => "documentation",
            Category::Style => "style",
        }
    }
}

impl FromStr for Category {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| {
                PipelineError::MalformedReview(format!("unknown category '{}'", wanted))
            })
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single structured review finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    pub file_path: String,
    /// Line in the new version of the file; `None` for file-level remarks.
    pub line: Option<u32>,
    pub severity: Severity,
    pub category: Category,
    pub body: String,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Counts of review comments by severity and by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewStats {
    pub by_severity: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
}

impl ReviewStats {
    pub fn from_comments(comments: &[ReviewComment]) -> Self {
        let mut stats = ReviewStats::default();
        for c in comments {
            *stats
                .by_severity
                .entry(c.severity.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .by_category
                .entry(c.category.as_str().to_string())
                .or_insert(0) += 1;
        }
        stats
    }
}

/// One persisted review of one pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRun {
    /// Store-assigned id; `None` before the run is appended.
    pub id: Option<i64>,
    pub repo_id: RepoId,
    pub pr_number: u64,
    #[serde(default)]
    pub pr_title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub summary: String,
    pub comment_count: usize,
    pub stats: ReviewStats,
    pub comments: Vec<ReviewComment>,
}

impl ReviewRun {
    pub fn new(pr: &PrInfo, summary: String, comments: Vec<ReviewComment>) -> Self {
        Self {
            id: None,
            repo_id: pr.repo_id.clone(),
            pr_number: pr.number,
            pr_title: Some(pr.title.clone()).filter(|t| !t.is_empty()),
            created_at: Utc::now(),
            summary,
            comment_count: comments.len(),
            stats: ReviewStats::from_comments(&comments),
            comments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(path: &str, start: u32, end: u32) -> CodeChunk {
        CodeChunk {
            repo_id: RepoId::github("acme", "api"),
            file_path: path.to_string(),
            start_line: start,
            end_line: end,
            language: "rust".to_string(),
            text: "fn main() {}".to_string(),
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn test_repo_id_formats() {
        assert_eq!(
            RepoId::local("/srv/code/app").to_string(),
            "local::/srv/code/app"
        );
        assert_eq!(RepoId::github(" acme ", "api ").to_string(), "github::acme/api");
    }

    #[test]
    fn test_repo_id_parse() {
        assert_eq!(
            "github::acme/api".parse::<RepoId>().unwrap(),
            RepoId::github("acme", "api")
        );
        assert_eq!(
            "local::/tmp/x".parse::<RepoId>().unwrap(),
            RepoId::local("/tmp/x")
        );
        assert!("acme/api".parse::<RepoId>().is_err());
        assert!("github::acme".parse::<RepoId>().is_err());
        assert!("github::a/b/c".parse::<RepoId>().is_err());
        assert!("local::".parse::<RepoId>().is_err());
    }

    #[test]
    fn test_slug_segments_are_restricted() {
        assert_eq!(
            RepoId::from_slug("rust-lang/rust.vim_2").unwrap(),
            RepoId::github("rust-lang", "rust.vim_2")
        );
        for bad in [
            "github::../evil",
            "github::acme/..",
            "github::./api",
            "github::acme/a b",
            "github::acme/api?x=1",
            "github::ac\\me/api",
            "github::acme/",
        ] {
            assert!(
                matches!(bad.parse::<RepoId>(), Err(PipelineError::InvalidRepoId(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_repo_id_serde_as_string() {
        let json = serde_json::to_string(&RepoId::github("acme", "api")).unwrap();
        assert_eq!(json, "\"github::acme/api\"");
        let back: RepoId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RepoId::github("acme", "api"));
    }

    #[test]
    fn test_source_link() {
        assert_eq!(
            RepoId::github("acme", "api").source_link(Some("abc123"), "src/lib.rs", 1, 40),
            "https://github.com/acme/api/blob/abc123/src/lib.rs#L1-L40"
        );
        assert_eq!(
            RepoId::local("/srv/app").source_link(None, "main.py", 7, 9),
            "file:///srv/app/main.py#L7"
        );
    }

    #[test]
    fn test_chunk_id_depends_on_identity_only() {
        let a = chunk("src/main.rs", 1, 10);
        let mut b = a.clone();
        b.text = "changed".to_string();
        assert_eq!(a.id(), b.id());
        assert_ne!(a.content_hash(), b.content_hash());
        assert_ne!(a.id(), chunk("src/main.rs", 11, 20).id());
    }

    #[test]
    fn test_location() {
        assert_eq!(chunk("a.rs", 3, 3).location(), "a.rs:3");
        assert_eq!(chunk("a.rs", 1, 100).location(), "a.rs:1-100");
        assert_eq!(chunk("a.rs", 1, 100).line_count(), 100);
    }

    #[test]
    fn test_severity_and_category_parse() {
        assert_eq!("Critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("blocker".parse::<Severity>().is_err());
        assert_eq!(" SECURITY ".parse::<Category>().unwrap(), Category::Security);
        assert!("vibes".parse::<Category>().is_err());
    }

    #[test]
    fn test_review_stats() {
        let mk = |severity, category| ReviewComment {
            file_path: "a.rs".into(),
            line: Some(1),
            severity,
            category,
            body: "b".into(),
            rationale: "r".into(),
            suggestion: None,
        };
        let stats = ReviewStats::from_comments(&[
            mk(Severity::Critical, Category::Security),
            mk(Severity::Info, Category::Security),
            mk(Severity::Info, Category::Style),
        ]);
        assert_eq!(stats.by_severity["info"], 2);
        assert_eq!(stats.by_severity["critical"], 1);
        assert_eq!(stats.by_category["security"], 2);
        assert_eq!(stats.by_category["style"], 1);
    }
}
