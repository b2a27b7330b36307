//! `repolens dashboard`: review metrics for one repository.

use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt::Write;

use repolens_core::metrics::{aggregate, DashboardSummary};
use repolens_core::RepoId;

use crate::config::Config;
use crate::db;
use crate::metrics_store::MetricsStore;
use crate::migrate::apply_schema;

fn render_counts(out: &mut String, title: &str, counts: &BTreeMap<String, usize>) {
    let _ = writeln!(out, "{}:", title);
    let width = counts.keys().map(|k| k.len()).max().unwrap_or(0);
    for (label, n) in counts {
        let _ = writeln!(out, "  {:<width$}  {}", label, n, width = width);
    }
}

/// Plain-text rendering of a [`DashboardSummary`].
pub fn render_summary(repo_id: &RepoId, summary: &DashboardSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "dashboard {}", repo_id);
    if summary.total_runs == 0 {
        let _ = writeln!(out, "  no reviews recorded");
        return out;
    }

    let _ = writeln!(out, "  runs: {}", summary.total_runs);
    let _ = writeln!(out, "  comments: {}", summary.total_comments);
    if let (Some(first), Some(last)) = (summary.first_run_at, summary.last_run_at) {
        let _ = writeln!(
            out,
            "  period: {} .. {}",
            first.format("%Y-%m-%d %H:%M"),
            last.format("%Y-%m-%d %H:%M")
        );
    }
    out.push('\n');
    render_counts(&mut out, "by severity", &summary.by_severity);
    out.push('\n');
    render_counts(&mut out, "by category", &summary.by_category);
    out.push('\n');

    let _ = writeln!(out, "daily:");
    for day in &summary.daily {
        let _ = writeln!(
            out,
            "  {}  runs {:>3}  comments {:>4}",
            day.date, day.runs, day.comments
        );
    }
    out
}

pub async fn run_dashboard(config: &Config, repo_id: &RepoId, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    let runs = MetricsStore::new(pool.clone()).load_all(repo_id).await?;
    let summary = aggregate(&runs);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", render_summary(repo_id, &summary));
    }
    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use repolens_core::models::{Category, PrInfo, ReviewComment, ReviewRun, Severity};

    #[test]
    fn test_render_empty() {
        let out = render_summary(&RepoId::github("acme", "api"), &aggregate(&[]));
        assert!(out.contains("no reviews recorded"));
    }

    #[test]
    fn test_render_counts() {
        let pr = PrInfo {
            number: 3,
            title: "t".into(),
            author: None,
            repo_id: RepoId::github("acme", "api"),
        };
        let comment = ReviewComment {
            file_path: "a.rs".into(),
            line: None,
            severity: Severity::Warning,
            category: Category::Security,
            body: "b".into(),
            rationale: "r".into(),
            suggestion: None,
        };
        let run = ReviewRun::new(&pr, "s".into(), vec![comment]);
        let out = render_summary(&pr.repo_id, &aggregate(&[run]));
        assert!(out.contains("runs: 1"));
        assert!(out.contains("comments: 1"));
        assert!(out.contains("security         1"));
        assert!(out.contains("critical  0"));
    }
}
