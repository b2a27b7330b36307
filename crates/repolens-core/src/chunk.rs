//! Line-bounded source chunker.
//!
//! Splits a file's text into [`CodeChunk`]s of at most `max_lines` lines,
//! always at line boundaries, keeping 1-based inclusive line provenance.
//!
//! # Algorithm
//!
//! 1. Split text into lines (`\n` and `\r\n` both end a line).
//! 2. A file of `max_lines` lines or fewer becomes one chunk.
//! 3. Larger files are cut into consecutive windows of `max_lines`
//!    lines; the last window holds the remainder.
//! 4. Blank (whitespace-only) files produce no chunks.
//!
//! Output order is file order, then window order, so chunking the same
//! snapshot twice yields an identical sequence.
//!
//! # Example
//!
//! ```rust
//! use repolens_core::chunk::chunk_file;
//! use repolens_core::models::{ChunkMetadata, RepoId};
//!
//! let repo = RepoId::github("acme", "api");
//! let text = (1..=250).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
//! let chunks = chunk_file(&repo, "src/big.rs", &text, 100, &ChunkMetadata::default());
//! let ranges: Vec<(u32, u32)> = chunks.iter().map(|c| (c.start_line, c.end_line)).collect();
//! assert_eq!(ranges, vec![(1, 100), (101, 200), (201, 250)]);
//! ```

use tracing::warn;

use crate::models::{ChunkMetadata, CodeChunk, RepoId};

/// Default window size, in lines.
pub const DEFAULT_MAX_LINES: usize = 100;

/// Split one file into line-bounded chunks.
///
/// `metadata` is copied into every chunk; `source_url` is filled with a
/// link to the chunk's line range when the caller left it empty.
pub fn chunk_file(
    repo_id: &RepoId,
    file_path: &str,
    text: &str,
    max_lines: usize,
    metadata: &ChunkMetadata,
) -> Vec<CodeChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let max_lines = max_lines.max(1);
    let lines: Vec<&str> = text.lines().collect();
    let language = language_for_path(file_path);

    lines
        .chunks(max_lines)
        .enumerate()
        .map_while(|(window, slice)| {
            let Some((start, end)) = line_span(window * max_lines, slice.len()) else {
                warn!(file = file_path, "line numbers exceed u32; remaining lines skipped");
                return None;
            };
            Some(make_chunk(repo_id, file_path, language, start, end, slice.join("\n"), metadata))
        })
        .collect()
}

/// 1-based inclusive span of `len` lines following the first `offset`
/// lines, or `None` when it does not fit in `u32`.
fn line_span(offset: usize, len: usize) -> Option<(u32, u32)> {
    let start = u32::try_from(offset.checked_add(1)?).ok()?;
    let end = u32::try_from(offset.checked_add(len)?).ok()?;
    Some((start, end))
}

fn make_chunk(
    repo_id: &RepoId,
    file_path: &str,
    language: &str,
    start_line: u32,
    end_line: u32,
    text: String,
    metadata: &ChunkMetadata,
) -> CodeChunk {
    let mut metadata = metadata.clone();
    if metadata.source_url.is_none() {
        metadata.source_url = Some(repo_id.source_link(
            metadata.commit_hash.as_deref(),
            file_path,
            start_line,
            end_line,
        ));
    }
    CodeChunk {
        repo_id: repo_id.clone(),
        file_path: file_path.to_string(),
        start_line,
        end_line,
        language: language.to_string(),
        text,
        metadata,
    }
}

/// Map a file path to a language label by extension.
pub fn language_for_path(path: &str) -> &'static str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name {
        "Dockerfile" => return "dockerfile",
        "Makefile" => return "make",
        _ => {}
    }
    let ext = match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return "text",
    };
    match ext.as_str() {
        "rs" => "rust",
        "py" | "pyi" => "python",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "scala" => "scala",
        "sh" | "bash" | "zsh" => "shell",
        "sql" => "sql",
        "md" | "markdown" => "markdown",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "html" | "htm" => "html",
        "css" | "scss" => "css",
        _ => "text",
    }
}
