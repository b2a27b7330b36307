//! Question answering and search over an indexed repository.
//!
//! `ask` is retrieve → relevance filter → answer. When the filter leaves
//! nothing, the model is not called and the caller gets
//! [`AskOutcome::NoRelevantCode`] to present instead of an answer.

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use repolens_core::{RepoId, RetrievedResult};

use crate::config::{Config, Credentials};
use crate::llm::{answer_with_rag, create_chat_model, ChatModel};
use crate::pipeline::Pipeline;

pub const NO_RELEVANT_CODE: &str = "No strongly related code found";

/// A `path:start-end` pointer shown under an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reference {
    pub location: String,
    pub distance: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl From<&RetrievedResult> for Reference {
    fn from(r: &RetrievedResult) -> Self {
        Self {
            location: r.chunk.location(),
            distance: r.distance,
            url: r.chunk.metadata.source_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AskOutcome {
    Answered {
        answer: String,
        references: Vec<Reference>,
    },
    NoRelevantCode,
}

/// Retrieve up to `k` chunks, optionally keeping only relevant ones.
///
/// Fails with `IndexNotFound` when `repo_id` was never indexed, so callers
/// can prompt for indexing instead of reporting "no results".
pub async fn search(
    pipeline: &Pipeline,
    repo_id: &RepoId,
    query: &str,
    k: usize,
    filtered: bool,
) -> Result<Vec<RetrievedResult>> {
    let handle = pipeline.index.load_index(repo_id).await?;
    let results = handle.search(query, k).await?;
    if filtered {
        Ok(pipeline.relevance_filter().apply(results))
    } else {
        Ok(results)
    }
}

pub async fn ask(
    pipeline: &Pipeline,
    chat: &dyn ChatModel,
    repo_id: &RepoId,
    question: &str,
    k: usize,
) -> Result<AskOutcome> {
    let relevant = search(pipeline, repo_id, question, k, true).await?;
    if relevant.is_empty() {
        info!(repo_id = %repo_id, "no chunk passed the relevance filter");
        return Ok(AskOutcome::NoRelevantCode);
    }

    let answer = answer_with_rag(chat, question, &relevant).await?;
    Ok(AskOutcome::Answered {
        answer,
        references: relevant.iter().map(Reference::from).collect(),
    })
}

pub async fn run_search(
    config: &Config,
    repo_id: &RepoId,
    query: &str,
    k: Option<usize>,
    all: bool,
) -> Result<()> {
    let creds = Credentials::from_env();
    config.validate_credentials(&creds, false)?;
    let pipeline = Pipeline::open(config, &creds).await?;
    let k = k.unwrap_or(config.retrieval.top_k);

    let results = search(&pipeline, repo_id, query, k, !all).await?;
    if results.is_empty() {
        println!("{}.", NO_RELEVANT_CODE);
        return Ok(());
    }

    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} ({})",
            i + 1,
            r.distance,
            r.chunk.location(),
            r.chunk.language
        );
        let preview: String = r.chunk.text.lines().take(3).collect::<Vec<_>>().join("\n    ");
        println!("    {}", preview);
        println!();
    }
    Ok(())
}

pub async fn run_ask(config: &Config, repo_id: &RepoId, question: &str, k: Option<usize>) -> Result<()> {
    let creds = Credentials::from_env();
    config.validate_credentials(&creds, true)?;
    let pipeline = Pipeline::open(config, &creds).await?;
    let chat = create_chat_model(&config.chat, &creds)?;
    let k = k.unwrap_or(config.retrieval.top_k);

    match ask(&pipeline, chat.as_ref(), repo_id, question, k).await? {
        AskOutcome::NoRelevantCode => println!("{}.", NO_RELEVANT_CODE),
        AskOutcome::Answered { answer, references } => {
            println!("{}", answer);
            println!();
            println!("References:");
            for r in references {
                println!("  {} (distance {:.4})", r.location, r.distance);
            }
        }
    }
    Ok(())
}
