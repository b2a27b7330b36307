//! Chat model providers and RAG answer generation.
//!
//! [`ChatModel`] is the seam between the pipeline and a hosted LLM. The
//! only built-in provider is [`OpenAiChat`] (`POST {base_url}/chat/completions`);
//! tests substitute their own implementations.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use repolens_core::prompt::{build_rag_prompt, SYSTEM_PROMPT};
use repolens_core::{PipelineError, RetrievedResult};

use crate::config::{ChatConfig, Credentials};

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// One system + user exchange. Returns the assistant's text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

pub fn create_chat_model(config: &ChatConfig, creds: &Credentials) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChat::new(config, creds.openai_api_key()?)?)),
        other => Err(PipelineError::Config(format!("Unknown chat provider: {}", other)).into()),
    }
}

/// Answer `question` from the retrieved chunks.
///
/// Callers filter `retrieved` first; an empty slice still produces a
/// prompt, so deciding whether to call the model at all is theirs.
pub async fn answer_with_rag(
    chat: &dyn ChatModel,
    question: &str,
    retrieved: &[RetrievedResult],
) -> Result<String> {
    let prompt = build_rag_prompt(question, retrieved);
    debug!(model = chat.model_name(), chunks = retrieved.len(), "generating answer");
    chat.complete(SYSTEM_PROMPT, &prompt).await
}

// ============ OpenAI ============

pub struct OpenAiChat {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChat {
    pub fn new(config: &ChatConfig, api_key: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::external("chat", format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::external(
                "chat",
                format!("OpenAI API error {}: {}", status, text.trim()),
            )
            .into());
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::external("chat", format!("invalid response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| PipelineError::external("chat", "response had no message content").into())
    }
}
