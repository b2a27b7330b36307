//! Source file discovery.
//!
//! Walks a repository root and returns the files worth indexing: an
//! extension allow-list, built-in excludes for version control and
//! dependency directories, user `exclude_globs`, and a size cap. Output is
//! sorted by relative path so the same tree always yields the same order.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::config::DiscoveryConfig;

/// Directories never descended into.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "venv",
    ".venv",
    "__pycache__",
    "dist",
    "build",
    "vendor",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// `/`-separated path relative to the repository root.
    pub relative: String,
    pub size: u64,
}

pub fn discover_files(root: &Path, config: &DiscoveryConfig) -> Result<Vec<DiscoveredFile>> {
    if !root.is_dir() {
        bail!("Repository root does not exist: {}", root.display());
    }

    let exclude_set = build_globset(&config.exclude_globs)?;
    let extensions: HashSet<String> = config
        .extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect();

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(config.follow_symlinks)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded_dir(e));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !has_allowed_extension(path, &extensions) {
            continue;
        }

        let size = entry.metadata()?.len();
        if size > config.max_file_bytes {
            debug!(file = %rel_str, size, "skipping oversized file");
            continue;
        }

        files.push(DiscoveredFile {
            path: path.to_path_buf(),
            relative: rel_str,
            size,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn is_excluded_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| DEFAULT_EXCLUDED_DIRS.contains(&name))
}

fn has_allowed_extension(path: &Path, extensions: &HashSet<String>) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.contains(&e.to_ascii_lowercase()))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn relatives(files: &[DiscoveredFile]) -> Vec<&str> {
        files.iter().map(|f| f.relative.as_str()).collect()
    }

    #[test]
    fn test_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "src/main.rs", "fn main() {}");
        write(root, "src/lib.rs", "pub fn x() {}");
        write(root, "app/views.PY", "x = 1");
        write(root, "README.md", "# hi");
        write(root, "logo.png", "binary");
        write(root, ".git/config", "[core]");
        write(root, "node_modules/pkg/index.js", "module.exports = 1");
        write(root, "target/debug/build.rs", "fn main() {}");
        write(root, "web/dist/bundle.js", "x");

        let files = discover_files(root, &DiscoveryConfig::default()).unwrap();
        assert_eq!(
            relatives(&files),
            vec!["README.md", "app/views.PY", "src/lib.rs", "src/main.rs"]
        );
    }

    #[test]
    fn test_exclude_globs_and_size_cap() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "src/keep.rs", "fn a() {}");
        write(root, "src/generated/big.rs", "fn b() {}");
        write(root, "huge.rs", &"x".repeat(64));

        let config = DiscoveryConfig {
            exclude_globs: vec!["src/generated/**".to_string()],
            max_file_bytes: 32,
            ..Default::default()
        };
        let files = discover_files(root, &config).unwrap();
        assert_eq!(relatives(&files), vec!["src/keep.rs"]);
    }

    #[test]
    fn test_deterministic() {
        let tmp = TempDir::new().unwrap();
        for i in 0..20 {
            write(tmp.path(), &format!("m{}/f{}.go", i % 3, i), "package m");
        }
        let a = discover_files(tmp.path(), &DiscoveryConfig::default()).unwrap();
        let b = discover_files(tmp.path(), &DiscoveryConfig::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn test_missing_root_errors() {
        let tmp = TempDir::new().unwrap();
        assert!(discover_files(&tmp.path().join("nope"), &DiscoveryConfig::default()).is_err());
    }
}
