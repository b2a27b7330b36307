//! Prompt construction for grounded answers and PR reviews.

use crate::models::{Category, CodeChunk, PrInfo, RetrievedResult, Severity};

/// System role sent with every chat request.
pub const SYSTEM_PROMPT: &str = "You are a helpful AI code assistant.";

/// System role for pull request reviews.
pub const REVIEW_SYSTEM_PROMPT: &str =
    "You are a senior software engineer reviewing a pull request. Report only concrete, actionable findings.";

/// Retrieval query used to find repository code related to a pull request.
pub fn review_context_query(pr: &PrInfo, diff_chunks: &[CodeChunk]) -> String {
    let mut query = pr.title.trim().to_string();
    let mut seen: Vec<&str> = Vec::new();
    for c in diff_chunks {
        if !seen.contains(&c.file_path.as_str()) {
            seen.push(&c.file_path);
        }
    }
    for path in seen {
        query.push('\n');
        query.push_str(path);
    }
    query
}

/// Build the user prompt for a grounded answer.
///
/// Each retrieved chunk is rendered with its location so the model can
/// cite `path:start-end` references back to the user.
pub fn build_rag_prompt(question: &str, retrieved: &[RetrievedResult]) -> String {
    let mut out = String::new();
    out.push_str(
        "Answer the question using only the code context below. \
         Cite the files and line ranges you rely on as path:start-end. \
         If the context does not contain the answer, say so.\n\n",
    );
    out.push_str("## Context\n\n");
    for (i, r) in retrieved.iter().enumerate() {
        push_chunk(&mut out, i + 1, &r.chunk);
    }
    out.push_str("## Question\n\n");
    out.push_str(question.trim());
    out.push('\n');
    out
}

/// Build the user prompt for reviewing a pull request.
///
/// `diff_chunks` come from diff ingestion; `context` is optional
/// repository code retrieved for grounding.
pub fn build_review_prompt(
    pr: &PrInfo,
    diff_chunks: &[CodeChunk],
    context: &[RetrievedResult],
) -> String {
    let severities: Vec<&str> = Severity::ALL.iter().map(|s| s.as_str()).collect();
    let categories: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();

    let mut out = format!(
        "Review pull request #{} \"{}\" in {}.\n\n",
        pr.number, pr.title, pr.repo_id
    );
    out.push_str(
        "Respond with a single JSON object and nothing else, shaped as:\n\
         {\"summary\": string, \"comments\": [{\"file_path\": string, \"line\": integer or null, \
         \"severity\": string, \"category\": string, \"body\": string, \"rationale\": string, \
         \"suggestion\": string or null}]}\n",
    );
    out.push_str(&format!("severity is one of: {}\n", severities.join(", ")));
    out.push_str(&format!("category is one of: {}\n", categories.join(", ")));
    out.push_str("line refers to the new version of the file.\n\n");

    out.push_str("## Changes\n\n");
    for (i, c) in diff_chunks.iter().enumerate() {
        push_chunk(&mut out, i + 1, c);
    }

    if !context.is_empty() {
        out.push_str("## Related repository code\n\n");
        for (i, r) in context.iter().enumerate() {
            push_chunk(&mut out, i + 1, &r.chunk);
        }
    }
    out
}

fn push_chunk(out: &mut String, n: usize, chunk: &CodeChunk) {
    out.push_str(&format!(
        "[{}] {} ({})\n```{}\n{}\n```\n\n",
        n,
        chunk.location(),
        chunk.language,
        chunk.language,
        chunk.text
    ));
}
