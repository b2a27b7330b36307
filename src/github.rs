//! Minimal GitHub REST client.
//!
//! Covers what indexing and review need: the OAuth login exchange, the
//! logged-in user, their repositories, open pull requests, and a pull
//! request's changed files. Every REST call takes the caller's
//! [`Session`]; the client itself holds no credentials.

use anyhow::Result;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use repolens_core::models::{PrFile, PrInfo};
use repolens_core::{PipelineError, RepoId};

use crate::config::{Config, Credentials, GitHubConfig};
use crate::session::Session;

const PER_PAGE: usize = 100;
/// GitHub caps the files listing at 3000 entries.
const MAX_PAGES: usize = 30;

/// A repository visible to the session's user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSummary {
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub default_branch: Option<String>,
}

#[derive(Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Deserialize)]
struct OAuthTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct ApiPull {
    number: u64,
    title: String,
    #[serde(default)]
    user: Option<ApiUser>,
}

pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    oauth_url: String,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("repolens/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            oauth_url: config.oauth_url.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let token = session.token()?;
        let url = format!("{}{}", self.api_url, path);
        debug!(path, "github request");

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .query(query)
            .send()
            .await
            .map_err(|e| PipelineError::external("github", format!("GET {}: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let hint = if status == StatusCode::UNAUTHORIZED {
                " (check GITHUB_TOKEN)"
            } else {
                ""
            };
            return Err(PipelineError::external(
                "github",
                format!("GET {} returned {}{}: {}", path, status, hint, body.trim()),
            )
            .into());
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PipelineError::external("github", format!("GET {}: invalid JSON: {}", path, e)).into())
    }

    async fn get_paged<T: DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut all = Vec::new();
        for page in 1..=MAX_PAGES {
            let mut q = query.to_vec();
            q.push(("per_page", PER_PAGE.to_string()));
            q.push(("page", page.to_string()));
            let batch: Vec<T> = self.get_json(session, path, &q).await?;
            let done = batch.len() < PER_PAGE;
            all.extend(batch);
            if done {
                break;
            }
        }
        Ok(all)
    }

    /// Exchange an OAuth authorization `code` for an access token.
    pub async fn exchange_code(&self, client_id: &str, client_secret: &str, code: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.oauth_url)
            .header("Accept", "application/json")
            .json(&serde_json::json!({
                "client_id": client_id,
                "client_secret": client_secret,
                "code": code,
            }))
            .send()
            .await
            .map_err(|e| PipelineError::external("github oauth", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::external("github oauth", format!("token endpoint returned {}", status)).into());
        }
        let body: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::external("github oauth", format!("invalid JSON: {}", e)))?;

        match (body.access_token, body.error) {
            (Some(token), None) if !token.is_empty() => Ok(token),
            (_, error) => Err(PipelineError::external(
                "github oauth",
                body.error_description
                    .or(error)
                    .unwrap_or_else(|| "no access token in response".to_string()),
            )
            .into()),
        }
    }

    /// Complete a login: exchange the code and resolve the user.
    pub async fn login(&self, client_id: &str, client_secret: &str, code: &str) -> Result<Session> {
        let token = self.exchange_code(client_id, client_secret, code).await?;
        let session = Session::new(token);
        let login = self.current_user(&session).await?;
        info!(login = %login, "github login");
        Ok(session.with_login(login))
    }

    /// Login of the session's user.
    pub async fn current_user(&self, session: &Session) -> Result<String> {
        let user: ApiUser = self.get_json(session, "/user", &[]).await?;
        Ok(user.login)
    }

    pub async fn list_user_repos(&self, session: &Session) -> Result<Vec<RepoSummary>> {
        self.get_paged(session, "/user/repos", &[("sort", "updated".to_string())])
            .await
    }

    pub async fn list_open_prs(&self, session: &Session, owner: &str, name: &str) -> Result<Vec<PrInfo>> {
        let path = format!("/repos/{}/{}/pulls", owner, name);
        let pulls: Vec<ApiPull> = self
            .get_paged(session, &path, &[("state", "open".to_string())])
            .await?;
        let repo_id = RepoId::github(owner, name);
        Ok(pulls.into_iter().map(|p| to_pr_info(p, &repo_id)).collect())
    }

    pub async fn get_pr(&self, session: &Session, owner: &str, name: &str, number: u64) -> Result<PrInfo> {
        let path = format!("/repos/{}/{}/pulls/{}", owner, name, number);
        let pull: ApiPull = self.get_json(session, &path, &[]).await?;
        Ok(to_pr_info(pull, &RepoId::github(owner, name)))
    }

    /// Changed files with their unified-diff patches.
    pub async fn pr_files(&self, session: &Session, owner: &str, name: &str, number: u64) -> Result<Vec<PrFile>> {
        let path = format!("/repos/{}/{}/pulls/{}/files", owner, name, number);
        self.get_paged(session, &path, &[]).await
    }
}

/// `repolens prs <owner>/<name>`.
pub async fn run_prs(config: &Config, owner: &str, name: &str) -> Result<()> {
    let creds = Credentials::from_env();
    let session = Session::from_credentials(&creds)?;
    let client = GitHubClient::new(&config.github)?;
    let prs = client.list_open_prs(&session, owner, name).await?;

    if prs.is_empty() {
        println!("No open pull requests in {}/{}.", owner, name);
        return Ok(());
    }
    for pr in prs {
        println!(
            "#{:<5} {}  ({})",
            pr.number,
            pr.title,
            pr.author.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

fn to_pr_info(pull: ApiPull, repo_id: &RepoId) -> PrInfo {
    PrInfo {
        number: pull.number,
        title: pull.title,
        author: pull.user.map(|u| u.login),
        repo_id: repo_id.clone(),
    }
}
