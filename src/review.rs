//! Pull request review service.
//!
//! diff ingestion → optional grounding from the repository index → model
//! review → strict parse → append to the metrics log. A review the model
//! returns in the wrong shape is an error; nothing is recorded for it.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{debug, info};

use repolens_core::diff::diff_to_chunks;
use repolens_core::error::is_index_not_found;
use repolens_core::models::{PrFile, PrInfo, ReviewRun};
use repolens_core::prompt::{build_review_prompt, review_context_query, REVIEW_SYSTEM_PROMPT};
use repolens_core::review::parse_review;
use repolens_core::{PipelineError, RepoId, RetrievedResult};

use crate::ask::search;
use crate::config::{Config, Credentials};
use crate::github::GitHubClient;
use crate::llm::{create_chat_model, ChatModel};
use crate::pipeline::Pipeline;
use crate::session::Session;

pub struct ReviewService<'a> {
    pipeline: &'a Pipeline,
    chat: &'a dyn ChatModel,
}

impl<'a> ReviewService<'a> {
    pub fn new(pipeline: &'a Pipeline, chat: &'a dyn ChatModel) -> Self {
        Self { pipeline, chat }
    }

    /// Review `files` of `pr` and record the run.
    pub async fn review(&self, pr: &PrInfo, files: &[PrFile]) -> Result<ReviewRun> {
        let diff_chunks = diff_to_chunks(&pr.repo_id, pr.number, files);
        if diff_chunks.is_empty() {
            bail!(
                "pull request #{} has no textual changes to review",
                pr.number
            );
        }

        let context = self.grounding(pr, &diff_chunks).await?;
        let prompt = build_review_prompt(pr, &diff_chunks, &context);
        debug!(
            pr = pr.number,
            hunks = diff_chunks.len(),
            context = context.len(),
            "requesting review"
        );

        let raw = self.chat.complete(REVIEW_SYSTEM_PROMPT, &prompt).await?;
        let parsed = parse_review(&raw)?;

        let run = ReviewRun::new(pr, parsed.summary, parsed.comments);
        let run = self.pipeline.metrics.append(run).await?;
        info!(
            repo_id = %pr.repo_id,
            pr = pr.number,
            comments = run.comment_count,
            "review complete"
        );
        Ok(run)
    }

    /// Related repository code for the changed files. Reviews of
    /// repositories that were never indexed go ahead without it.
    async fn grounding(
        &self,
        pr: &PrInfo,
        diff_chunks: &[repolens_core::CodeChunk],
    ) -> Result<Vec<RetrievedResult>> {
        let query = review_context_query(pr, diff_chunks);
        let k = self.pipeline.config.retrieval.top_k;
        match search(self.pipeline, &pr.repo_id, &query, k, true).await {
            Ok(results) => Ok(results),
            Err(e) if is_index_not_found(&e) => {
                debug!(repo_id = %pr.repo_id, "no index; reviewing without repository context");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

/// Load `[{filename, patch}]` from a JSON file.
pub fn load_diff_file(path: &Path) -> Result<Vec<PrFile>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read diff file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Diff file must be a JSON array of {{filename, patch}}: {}", path.display()))
}

/// Fetch a pull request and its changed files from GitHub.
pub async fn fetch_pr(
    github: &GitHubClient,
    session: &Session,
    repo_id: &RepoId,
    number: u64,
) -> Result<(PrInfo, Vec<PrFile>)> {
    let (owner, name) = match repo_id {
        RepoId::GitHub { owner, name } => (owner.as_str(), name.as_str()),
        RepoId::Local(_) => {
            return Err(PipelineError::InvalidRepoId(format!(
                "{} is not a GitHub repository; pass --diff-file",
                repo_id
            ))
            .into())
        }
    };
    let pr = github.get_pr(session, owner, name, number).await?;
    let files = github.pr_files(session, owner, name, number).await?;
    Ok((pr, files))
}

pub async fn run_review(
    config: &Config,
    repo_id: &RepoId,
    pr_number: u64,
    diff_file: Option<&Path>,
    title: Option<String>,
) -> Result<()> {
    let creds = Credentials::from_env();
    config.validate_credentials(&creds, true)?;

    let (mut pr, files) = match diff_file {
        Some(path) => (
            PrInfo {
                number: pr_number,
                title: String::new(),
                author: None,
                repo_id: repo_id.clone(),
            },
            load_diff_file(path)?,
        ),
        None => {
            let session = Session::from_credentials(&creds)?;
            let github = GitHubClient::new(&config.github)?;
            fetch_pr(&github, &session, repo_id, pr_number).await?
        }
    };
    if let Some(title) = title {
        pr.title = title;
    }

    let pipeline = Pipeline::open(config, &creds).await?;
    let chat = create_chat_model(&config.chat, &creds)?;
    let run = ReviewService::new(&pipeline, chat.as_ref())
        .review(&pr, &files)
        .await?;

    println!("review {} #{}", run.repo_id, run.pr_number);
    println!();
    println!("{}", run.summary);
    println!();
    for c in &run.comments {
        let at = match c.line {
            Some(line) => format!("{}:{}", c.file_path, line),
            None => c.file_path.clone(),
        };
        println!("[{}/{}] {}", c.severity, c.category, at);
        println!("  {}", c.body);
        println!("  why: {}", c.rationale);
        if let Some(s) = &c.suggestion {
            println!("  suggestion: {}", s);
        }
    }
    println!("comments: {}", run.comment_count);
    Ok(())
}
