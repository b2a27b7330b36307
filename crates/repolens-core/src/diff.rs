//! Pull request diff ingestion.
//!
//! Turns the per-file patches of a pull request into [`CodeChunk`]s so the
//! review path can reuse the same chunk shape as question answering. One
//! chunk is produced per hunk, located by the hunk's range in the new
//! version of the file.
//!
//! ```text
//! @@ -10,4 +12,6 @@ fn handler()
//!        ^^^^^ ^^^^
//!        old    new: start 12, 6 lines -> chunk lines 12-17
//! ```

use crate::chunk::language_for_path;
use crate::models::{ChunkMetadata, CodeChunk, PrFile, RepoId};

/// A hunk's position in the new file, parsed from its `@@` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkRange {
    pub new_start: u32,
    pub new_len: u32,
}

impl HunkRange {
    /// Inclusive 1-based line span. Pure deletions map to the single line
    /// they were removed before. Spans running past `u32::MAX` are clamped.
    pub fn lines(&self) -> (u32, u32) {
        let start = self.new_start.max(1);
        let end = if self.new_len == 0 {
            start
        } else {
            start.saturating_add(self.new_len - 1)
        };
        (start, end)
    }
}

/// Parse `@@ -a[,b] +c[,d] @@ ...` into the new-file range.
pub fn parse_hunk_header(line: &str) -> Option<HunkRange> {
    let rest = line.strip_prefix("@@ ")?;
    let end = rest.find(" @@")?;
    let new = rest[..end].split_whitespace().find(|p| p.starts_with('+'))?;
    let new = &new[1..];
    let (start, len) = match new.split_once(',') {
        Some((s, l)) => (s.parse().ok()?, l.parse().ok()?),
        None => (new.parse().ok()?, 1),
    };
    Some(HunkRange {
        new_start: start,
        new_len: len,
    })
}

/// Convert a pull request's changed files into review chunks.
///
/// Files without a patch (binary or oversized on GitHub's side) are
/// skipped. A patch with no hunk headers becomes a single chunk starting
/// at line 1.
pub fn diff_to_chunks(repo_id: &RepoId, pr_number: u64, files: &[PrFile]) -> Vec<CodeChunk> {
    let mut chunks = Vec::new();
    for file in files {
        let patch = match file.patch.as_deref() {
            Some(p) if !p.trim().is_empty() => p,
            _ => continue,
        };
        let language = language_for_path(&file.filename);
        for (range, text) in split_hunks(patch) {
            let (start_line, end_line) = range.lines();
            let mut metadata = ChunkMetadata {
                pr_number: Some(pr_number),
                ..Default::default()
            };
            if let Some(status) = &file.status {
                metadata.extra.insert("status".to_string(), status.clone());
            }
            chunks.push(CodeChunk {
                repo_id: repo_id.clone(),
                file_path: file.filename.clone(),
                start_line,
                end_line,
                language: language.to_string(),
                text,
                metadata,
            });
        }
    }
    chunks
}

fn split_hunks(patch: &str) -> Vec<(HunkRange, String)> {
    let mut hunks: Vec<(HunkRange, Vec<&str>)> = Vec::new();
    let mut preamble: Vec<&str> = Vec::new();

    for line in patch.lines() {
        if let Some(range) = parse_hunk_header(line) {
            hunks.push((range, vec![line]));
        } else if let Some((_, body)) = hunks.last_mut() {
            body.push(line);
        } else {
            preamble.push(line);
        }
    }

    if hunks.is_empty() {
        let len = u32::try_from(preamble.len()).unwrap_or(u32::MAX);
        return vec![(
            HunkRange {
                new_start: 1,
                new_len: len,
            },
            preamble.join("\n"),
        )];
    }
    hunks
        .into_iter()
        .map(|(range, body)| (range, body.join("\n")))
        .collect()
}
