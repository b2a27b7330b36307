//! Strict parsing of model-produced reviews.
//!
//! The model is asked for one JSON object `{summary, comments: [...]}`.
//! Every comment must carry a known severity and category and a non-empty
//! body; any violation rejects the whole review with
//! [`PipelineError::MalformedReview`] instead of dropping the comment.

use serde::Deserialize;

use crate::error::PipelineError;
use crate::models::{Category, ReviewComment, Severity};

/// A parsed model review, before it becomes a persisted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReview {
    pub summary: String,
    pub comments: Vec<ReviewComment>,
}

#[derive(Deserialize)]
struct RawReview {
    summary: String,
    comments: Vec<RawComment>,
}

#[derive(Deserialize)]
struct RawComment {
    file_path: String,
    #[serde(default)]
    line: Option<u32>,
    severity: String,
    category: String,
    body: String,
    rationale: String,
    #[serde(default)]
    suggestion: Option<String>,
}

/// Parse the raw model response into a [`ParsedReview`].
pub fn parse_review(raw: &str) -> Result<ParsedReview, PipelineError> {
    let json = strip_code_fence(raw);
    let parsed: RawReview = serde_json::from_str(json)
        .map_err(|e| PipelineError::MalformedReview(format!("invalid review JSON: {}", e)))?;

    let summary = parsed.summary.trim().to_string();
    if summary.is_empty() {
        return Err(PipelineError::MalformedReview("empty summary".to_string()));
    }

    let comments = parsed
        .comments
        .into_iter()
        .enumerate()
        .map(|(i, c)| convert_comment(c).map_err(|e| at_index(i, e)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ParsedReview { summary, comments })
}

fn convert_comment(c: RawComment) -> Result<ReviewComment, PipelineError> {
    let severity: Severity = c.severity.parse()?;
    let category: Category = c.category.parse()?;
    let file_path = c.file_path.trim().to_string();
    if file_path.is_empty() {
        return Err(PipelineError::MalformedReview("empty file_path".to_string()));
    }
    let body = c.body.trim().to_string();
    if body.is_empty() {
        return Err(PipelineError::MalformedReview("empty body".to_string()));
    }
    if c.line == Some(0) {
        return Err(PipelineError::MalformedReview("line numbers start at 1".to_string()));
    }
    Ok(ReviewComment {
        file_path,
        line: c.line,
        severity,
        category,
        body,
        rationale: c.rationale.trim().to_string(),
        suggestion: c
            .suggestion
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    })
}

fn at_index(i: usize, err: PipelineError) -> PipelineError {
    match err {
        PipelineError::MalformedReview(msg) => {
            PipelineError::MalformedReview(format!("comment {}: {}", i, msg))
        }
        other => other,
    }
}

/// Remove a surrounding Markdown code fence (```json ... ```), if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
