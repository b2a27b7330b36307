//! Append-only review run log in SQLite.
//!
//! Every completed review becomes one `review_runs` row. Rows are never
//! updated; the dashboard reads them back in creation order.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::info;

use repolens_core::models::ReviewRun;
use repolens_core::RepoId;

#[derive(Clone)]
pub struct MetricsStore {
    pool: SqlitePool,
}

impl MetricsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist `run` and return it with its assigned id.
    ///
    /// `created_at` is stored with millisecond precision; the returned run
    /// carries the stored value so it compares equal to what
    /// [`load_all`](Self::load_all) yields later.
    pub async fn append(&self, mut run: ReviewRun) -> Result<ReviewRun> {
        let created_ms = run.created_at.timestamp_millis();
        let stats_json = serde_json::to_string(&run.stats)?;
        let comments_json = serde_json::to_string(&run.comments)?;

        let result = sqlx::query(
            "INSERT INTO review_runs (repo_id, pr_number, pr_title, created_at, summary, comment_count, stats_json, comments_json) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.repo_id.to_string())
        .bind(run.pr_number as i64)
        .bind(run.pr_title.as_deref())
        .bind(created_ms)
        .bind(&run.summary)
        .bind(run.comment_count as i64)
        .bind(&stats_json)
        .bind(&comments_json)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to record review of {} #{}", run.repo_id, run.pr_number))?;

        run.id = Some(result.last_insert_rowid());
        run.created_at = from_millis(created_ms)?;

        info!(
            repo_id = %run.repo_id,
            pr = run.pr_number,
            comments = run.comment_count,
            "review run recorded"
        );
        Ok(run)
    }

    /// Every run for `repo_id`, oldest first.
    pub async fn load_all(&self, repo_id: &RepoId) -> Result<Vec<ReviewRun>> {
        let rows = sqlx::query(
            "SELECT id, repo_id, pr_number, pr_title, created_at, summary, comment_count, stats_json, comments_json \
             FROM review_runs WHERE repo_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(repo_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let repo: String = row.get("repo_id");
            let pr_number: i64 = row.get("pr_number");
            let created_ms: i64 = row.get("created_at");
            let comment_count: i64 = row.get("comment_count");
            let stats_json: String = row.get("stats_json");
            let comments_json: String = row.get("comments_json");

            runs.push(ReviewRun {
                id: Some(id),
                repo_id: repo.parse()?,
                pr_number: pr_number as u64,
                pr_title: row.get("pr_title"),
                created_at: from_millis(created_ms)?,
                summary: row.get("summary"),
                comment_count: comment_count as usize,
                stats: serde_json::from_str(&stats_json)
                    .with_context(|| format!("corrupt stats in review run {}", id))?,
                comments: serde_json::from_str(&comments_json)
                    .with_context(|| format!("corrupt comments in review run {}", id))?,
            });
        }
        Ok(runs)
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("timestamp out of range: {}", ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::apply_schema;
    use repolens_core::models::{Category, PrInfo, ReviewComment, Severity};
    use tempfile::TempDir;

    async fn store(tmp: &TempDir) -> MetricsStore {
        let pool = db::connect_path(&tmp.path().join("m.sqlite")).await.unwrap();
        apply_schema(&pool).await.unwrap();
        MetricsStore::new(pool)
    }

    fn pr(number: u64) -> PrInfo {
        PrInfo {
            number,
            title: format!("PR {}", number),
            author: None,
            repo_id: RepoId::github("acme", "api"),
        }
    }

    fn comment(severity: Severity, category: Category) -> ReviewComment {
        ReviewComment {
            file_path: "src/lib.rs".into(),
            line: Some(4),
            severity,
            category,
            body: "Unchecked index".into(),
            rationale: "May panic on empty input".into(),
            suggestion: None,
        }
    }

    #[tokio::test]
    async fn test_append_and_load_in_order() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;

        let first = store
            .append(ReviewRun::new(
                &pr(1),
                "One issue".into(),
                vec![comment(Severity::Critical, Category::Correctness)],
            ))
            .await
            .unwrap();
        let second = store
            .append(ReviewRun::new(&pr(2), "Clean".into(), vec![]))
            .await
            .unwrap();
        assert!(first.id.unwrap() < second.id.unwrap());

        let runs = store.load_all(&RepoId::github("acme", "api")).await.unwrap();
        assert_eq!(runs, vec![first, second]);
        assert_eq!(runs[0].stats.by_severity.get("critical"), Some(&1));
    }

    #[tokio::test]
    async fn test_runs_are_scoped_by_repo() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        store
            .append(ReviewRun::new(&pr(1), "ok".into(), vec![]))
            .await
            .unwrap();
        let other = store.load_all(&RepoId::github("acme", "web")).await.unwrap();
        assert!(other.is_empty());
    }
}
