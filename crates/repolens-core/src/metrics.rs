//! Dashboard aggregation over persisted review runs.
//!
//! [`aggregate`] is a pure fold over the runs of one repository. Every
//! known severity and category appears in the output, with zero counts
//! where nothing was found, so charts have stable axes.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::models::{Category, ReviewRun, Severity};

/// One day of review activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub runs: usize,
    pub comments: usize,
    pub by_severity: BTreeMap<String, usize>,
}

/// Aggregated review metrics for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardSummary {
    pub total_runs: usize,
    pub total_comments: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    /// Ascending by date; days without runs are omitted.
    pub daily: Vec<DailyPoint>,
    pub first_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
}

fn zeroed_severities() -> BTreeMap<String, usize> {
    Severity::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect()
}

fn zeroed_categories() -> BTreeMap<String, usize> {
    Category::ALL
        .iter()
        .map(|c| (c.as_str().to_string(), 0))
        .collect()
}

fn add_counts(into: &mut BTreeMap<String, usize>, from: &BTreeMap<String, usize>) {
    for (k, v) in from {
        *into.entry(k.clone()).or_insert(0) += v;
    }
}

/// Fold review runs into dashboard totals and a per-day series.
pub fn aggregate(runs: &[ReviewRun]) -> DashboardSummary {
    let mut by_severity = zeroed_severities();
    let mut by_category = zeroed_categories();
    let mut days: BTreeMap<NaiveDate, DailyPoint> = BTreeMap::new();
    let mut total_comments = 0;

    for run in runs {
        total_comments += run.comment_count;
        add_counts(&mut by_severity, &run.stats.by_severity);
        add_counts(&mut by_category, &run.stats.by_category);

        let date = run.created_at.date_naive();
        let point = days.entry(date).or_insert_with(|| DailyPoint {
            date,
            runs: 0,
            comments: 0,
            by_severity: zeroed_severities(),
        });
        point.runs += 1;
        point.comments += run.comment_count;
        add_counts(&mut point.by_severity, &run.stats.by_severity);
    }

    DashboardSummary {
        total_runs: runs.len(),
        total_comments,
        by_severity,
        by_category,
        daily: days.into_values().collect(),
        first_run_at: runs.iter().map(|r| r.created_at).min(),
        last_run_at: runs.iter().map(|r| r.created_at).max(),
    }
}
