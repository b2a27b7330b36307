//! TOML configuration and environment credentials.
//!
//! Every section is optional; a missing section takes its defaults. The
//! file only holds settings. API keys and tokens are read from the
//! environment into [`Credentials`] and never written to disk.
//!
//! ```toml
//! [data]
//! dir = "./data"
//!
//! [embedding]
//! provider = "openai"          # hashing | openai | ollama | local
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [retrieval]
//! top_k = 5
//! max_distance = 2.0
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use repolens_core::chunk::DEFAULT_MAX_LINES;
use repolens_core::retrieve::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_DISTANCE};
use repolens_core::PipelineError;

pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const GITHUB_TOKEN_VAR: &str = "GITHUB_TOKEN";
pub const GITHUB_CLIENT_ID_VAR: &str = "GITHUB_CLIENT_ID";
pub const GITHUB_CLIENT_SECRET_VAR: &str = "GITHUB_CLIENT_SECRET";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
            db_path: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    [
        "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "kt", "c", "h", "cpp", "hpp", "cs",
        "rb", "php", "swift", "scala", "sh", "sql", "md", "toml", "yaml", "yml", "json",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
        }
    }
}

fn default_max_lines() -> usize {
    DEFAULT_MAX_LINES
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Results at or beyond this distance are dropped before use.
    #[serde(default = "default_max_distance")]
    pub max_distance: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_distance: default_max_distance(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_distance() -> f32 {
    DEFAULT_MAX_DISTANCE
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for `openai` (OpenAI-compatible) and `ollama` providers.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_openai_base")]
    pub base_url: String,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_chat_provider(),
            model: default_chat_model(),
            base_url: default_openai_base(),
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

fn default_chat_provider() -> String {
    "openai".to_string()
}
fn default_chat_model() -> String {
    "gpt-5-nano".to_string()
}
pub(crate) fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_chat_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    #[serde(default = "default_github_api")]
    pub api_url: String,
    #[serde(default = "default_clone_base")]
    pub clone_base: String,
    /// OAuth code exchange endpoint for `POST /auth/github`.
    #[serde(default = "default_oauth_url")]
    pub oauth_url: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api(),
            clone_base: default_clone_base(),
            oauth_url: default_oauth_url(),
        }
    }
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}
fn default_clone_base() -> String {
    "https://github.com".to_string()
}
fn default_oauth_url() -> String {
    "https://github.com/login/oauth/access_token".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8484".to_string()
}

impl Config {
    /// SQLite database holding indexes and review runs.
    pub fn db_path(&self) -> PathBuf {
        self.data
            .db_path
            .clone()
            .unwrap_or_else(|| self.data.dir.join("repolens.sqlite"))
    }

    /// Root of the clone cache, `<data>/repos/<owner>/<name>`.
    pub fn repos_dir(&self) -> PathBuf {
        self.data.dir.join("repos")
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(self.repos_dir()).with_context(|| {
            format!("Failed to create data directory: {}", self.data.dir.display())
        })?;
        if let Some(parent) = self.db_path().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Fail before any work starts if a configured provider lacks its key.
    ///
    /// `uses_chat` is false for commands that only embed (index, search).
    pub fn validate_credentials(&self, creds: &Credentials, uses_chat: bool) -> Result<()> {
        let needs_openai = self.embedding.provider == "openai"
            || (uses_chat && self.chat.provider == "openai");
        if needs_openai && creds.openai_api_key.is_none() {
            return Err(PipelineError::Config(format!(
                "{} must be set for the openai provider",
                OPENAI_API_KEY_VAR
            ))
            .into());
        }
        Ok(())
    }
}

/// Secrets read from the environment.
#[derive(Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub github_token: Option<String>,
    /// OAuth app used to turn a login code into an access token.
    pub github_client_id: Option<String>,
    pub github_client_secret: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "***"))
            .field("github_token", &self.github_token.as_ref().map(|_| "***"))
            .field("github_client_id", &self.github_client_id)
            .field(
                "github_client_secret",
                &self.github_client_secret.as_ref().map(|_| "***"),
            )
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            openai_api_key: read(OPENAI_API_KEY_VAR),
            github_token: read(GITHUB_TOKEN_VAR),
            github_client_id: read(GITHUB_CLIENT_ID_VAR),
            github_client_secret: read(GITHUB_CLIENT_SECRET_VAR),
        }
    }

    pub fn openai_api_key(&self) -> Result<&str, PipelineError> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| PipelineError::Config(format!("{} is not set", OPENAI_API_KEY_VAR)))
    }

    pub fn github_token(&self) -> Result<&str, PipelineError> {
        self.github_token.as_deref().ok_or_else(|| {
            PipelineError::Config(format!(
                "{} is not set; it is required for GitHub operations",
                GITHUB_TOKEN_VAR
            ))
        })
    }

    /// Client id and secret of the GitHub OAuth app.
    pub fn github_oauth_app(&self) -> Result<(&str, &str), PipelineError> {
        match (&self.github_client_id, &self.github_client_secret) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => Err(PipelineError::Config(format!(
                "{} and {} must be set for GitHub login",
                GITHUB_CLIENT_ID_VAR, GITHUB_CLIENT_SECRET_VAR
            ))),
        }
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_lines == 0 {
        bail!("chunking.max_lines must be > 0");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_distance.is_nan() || config.retrieval.max_distance <= 0.0 {
        bail!("retrieval.max_distance must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "hashing" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hashing, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.provider == "ollama"
        && (config.embedding.model.is_none() || config.embedding.dims.is_none())
    {
        bail!("embedding.model and embedding.dims must be specified when provider is 'ollama'");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Validate chat
    if config.chat.provider != "openai" {
        bail!(
            "Unknown chat provider: '{}'. Must be openai.",
            config.chat.provider
        );
    }

    if config.discovery.extensions.is_empty() {
        bail!("discovery.extensions must not be empty");
    }

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}
