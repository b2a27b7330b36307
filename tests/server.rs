//! HTTP API tests: the router served on an ephemeral port, driven with
//! reqwest.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use repolens::config::{Config, Credentials, GitHubConfig};
use repolens::db;
use repolens::github::GitHubClient;
use repolens::llm::ChatModel;
use repolens::migrate::apply_schema;
use repolens::pipeline::Pipeline;
use repolens::server::{router, AppState};
use repolens_core::embedding::HashingEmbedder;

struct CannedChat(&'static str);

#[async_trait]
impl ChatModel for CannedChat {
    fn model_name(&self) -> &str {
        "canned"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

struct TestServer {
    _tmp: TempDir,
    base: String,
    repo_dir: String,
    http: reqwest::Client,
}

async fn start(reply: &'static str) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(repo.join("src")).unwrap();
    fs::write(
        repo.join("src/auth.rs"),
        "fn authenticate_user(token: &str) -> bool {\n    verify_token(token)\n}\n",
    )
    .unwrap();

    let pool = db::connect_path(&tmp.path().join("db.sqlite")).await.unwrap();
    apply_schema(&pool).await.unwrap();
    let pipeline = Pipeline::from_parts(
        Config::default(),
        pool,
        Arc::new(HashingEmbedder::new(128)),
    );
    let github = GitHubClient::new(&GitHubConfig {
        api_url: "http://127.0.0.1:9".to_string(),
        ..Default::default()
    })
    .unwrap();
    let state = AppState::new(
        pipeline,
        Arc::new(CannedChat(reply)),
        github,
        Credentials::default(),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        repo_dir: fs::canonicalize(&repo).unwrap().display().to_string(),
        _tmp: tmp,
        http: reqwest::Client::new(),
    }
}

impl TestServer {
    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .http
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .http
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    fn repo_id(&self) -> String {
        format!("local::{}", self.repo_dir)
    }
}

#[tokio::test]
async fn test_health() {
    let server = start("unused").await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_search_unindexed_is_404() {
    let server = start("unused").await;
    let (status, body) = server
        .post(
            "/search",
            json!({"repo_id": "github::acme/api", "query": "auth"}),
        )
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "index_not_found");
}

#[tokio::test]
async fn test_bad_repo_id_is_400() {
    let server = start("unused").await;
    let (status, body) = server
        .post("/ask", json!({"repo_id": "svn::foo", "question": "why?"}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_index_rejects_path_traversal_repo_id() {
    let server = start("unused").await;
    let (status, body) = server
        .post("/index", json!({"repo_id": "github::../evil"}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = server.get("/github/repos/acme/..%2F..%2Fetc/pulls").await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_github_routes_require_session() {
    let server = start("unused").await;
    let (status, body) = server.get("/github/repos").await;
    assert_eq!(status, 401);
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn test_index_then_ask() {
    let server = start("It is in authenticate_user.").await;
    let repo_id = server.repo_id();

    let (status, report) = server.post("/index", json!({"repo_id": repo_id})).await;
    assert_eq!(status, 200, "{}", report);
    assert_eq!(report["chunk_count"], 1);
    assert_eq!(report["dry_run"], false);

    let encoded = repo_id.replace('/', "%2F");
    let (status, meta) = server.get(&format!("/repos/{}/status", encoded)).await;
    assert_eq!(status, 200, "{}", meta);
    assert_eq!(meta["chunk_count"], 1);

    let (status, outcome) = server
        .post(
            "/ask",
            json!({"repo_id": repo_id, "question": "authenticate_user verify_token token"}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(outcome["status"], "answered");
    assert_eq!(outcome["answer"], "It is in authenticate_user.");
    assert_eq!(outcome["references"][0]["location"], "src/auth.rs:1-3");
}

#[tokio::test]
async fn test_review_and_metrics() {
    let reply = r#"{"summary": "Fine overall.", "comments": [
        {"file_path": "src/auth.rs", "line": 2, "severity": "info", "category": "style",
         "body": "Name the flag.", "rationale": "Readability."}]}"#;
    let server = start(reply).await;

    let (status, run) = server
        .post(
            "/review",
            json!({
                "repo_id": "github::acme/api",
                "pr_number": 12,
                "title": "Tidy auth",
                "files": [{"filename": "src/auth.rs", "patch": "@@ -1 +1 @@\n-a\n+b"}]
            }),
        )
        .await;
    assert_eq!(status, 200, "{}", run);
    assert_eq!(run["pr_number"], 12);
    assert_eq!(run["comment_count"], 1);

    let (status, summary) = server.get("/repos/github::acme%2Fapi/metrics").await;
    assert_eq!(status, 200);
    assert_eq!(summary["total_runs"], 1);
    assert_eq!(summary["total_comments"], 1);
}

#[tokio::test]
async fn test_malformed_review_is_502() {
    let server = start("LGTM").await;
    let (status, body) = server
        .post(
            "/review",
            json!({
                "repo_id": "github::acme/api",
                "pr_number": 1,
                "files": [{"filename": "a.py", "patch": "@@ -1 +1 @@\n-a\n+b"}]
            }),
        )
        .await;
    assert_eq!(status, 502);
    assert_eq!(body["error"]["code"], "malformed_review");
}
