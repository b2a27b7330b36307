use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn repolens_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("repolens");
    path
}

struct TestEnv {
    _tmp: TempDir,
    root: PathBuf,
    config_path: PathBuf,
    repo_dir: PathBuf,
}

fn setup_test_env(chat_url: Option<&str>) -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let repo_dir = root.join("repo");
    fs::create_dir_all(repo_dir.join("src")).unwrap();
    fs::write(
        repo_dir.join("src/auth.rs"),
        "pub fn authenticate_user(token: &str) -> bool {\n    verify_token(token)\n}\n",
    )
    .unwrap();
    fs::write(
        repo_dir.join("src/chart.py"),
        "def render_chart(data):\n    draw_axes(data)\n    plot_series(data)\n",
    )
    .unwrap();
    let long: String = (1..=250).map(|i| format!("const LINE_{}: u32 = {};\n", i, i)).collect();
    fs::write(repo_dir.join("src/consts.rs"), long).unwrap();
    fs::create_dir_all(repo_dir.join("node_modules/pkg")).unwrap();
    fs::write(repo_dir.join("node_modules/pkg/index.js"), "module.exports = 1;\n").unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let mut config_content = format!(
        r#"[data]
dir = "{}/data"

[embedding]
provider = "hashing"
dims = 256

[retrieval]
top_k = 5
"#,
        root.display()
    );
    if let Some(url) = chat_url {
        config_content.push_str(&format!("\n[chat]\nbase_url = \"{}\"\n", url));
    }

    let config_path = config_dir.join("repolens.toml");
    fs::write(&config_path, config_content).unwrap();

    TestEnv {
        _tmp: tmp,
        root,
        config_path,
        repo_dir,
    }
}

fn run_repolens(env: &TestEnv, args: &[&str], openai_key: Option<&str>) -> (String, String, bool) {
    let binary = repolens_binary();
    let mut cmd = Command::new(&binary);
    cmd.arg("--config")
        .arg(env.config_path.to_str().unwrap())
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .env_remove("GITHUB_TOKEN")
        .env("RUST_LOG", "warn");
    if let Some(key) = openai_key {
        cmd.env("OPENAI_API_KEY", key);
    }
    let output = cmd
        .output()
        .unwrap_or_else(|e| panic!("Failed to run repolens binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn repo_arg(env: &TestEnv) -> String {
    env.repo_dir.to_str().unwrap().to_string()
}

#[test]
fn test_init_creates_database() {
    let env = setup_test_env(None);
    let (stdout, stderr, success) = run_repolens(&env, &["init"], None);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(env.root.join("data/repolens.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let env = setup_test_env(None);
    let (_, _, success1) = run_repolens(&env, &["init"], None);
    assert!(success1, "First init failed");
    let (_, _, success2) = run_repolens(&env, &["init"], None);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_index_local_and_status() {
    let env = setup_test_env(None);
    let repo = repo_arg(&env);

    let (stdout, stderr, success) = run_repolens(&env, &["index", "local", &repo], None);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files: 3"), "stdout={}", stdout);
    // auth.rs + chart.py + consts.rs split into 100/100/50
    assert!(stdout.contains("chunks: 5"), "stdout={}", stdout);
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_repolens(&env, &["status", &repo], None);
    assert!(success);
    assert!(stdout.contains("chunks: 5"));
    assert!(stdout.contains("model: hashing (256 dims)"));
}

#[test]
fn test_index_dry_run_writes_nothing() {
    let env = setup_test_env(None);
    let repo = repo_arg(&env);

    let (stdout, _, success) = run_repolens(&env, &["index", "local", &repo, "--dry-run"], None);
    assert!(success);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("chunks: 5"));

    let (stdout, _, success) = run_repolens(&env, &["status", &repo], None);
    assert!(success);
    assert!(stdout.contains("not indexed"));
}

#[test]
fn test_search_before_index_reports_missing_index() {
    let env = setup_test_env(None);
    let repo = repo_arg(&env);
    let (_, stderr, success) = run_repolens(&env, &["search", &repo, "authenticate_user"], None);
    assert!(!success);
    assert!(stderr.contains("index the repository first"), "stderr={}", stderr);
}

#[test]
fn test_search_ranks_matching_file_first() {
    let env = setup_test_env(None);
    let repo = repo_arg(&env);
    run_repolens(&env, &["index", "local", &repo], None);

    let (stdout, stderr, success) = run_repolens(
        &env,
        &["search", &repo, "authenticate_user verify_token token", "--all"],
        None,
    );
    assert!(success, "search failed: stderr={}", stderr);
    let first = stdout.lines().next().unwrap_or_default();
    assert!(first.contains("src/auth.rs:1-3"), "stdout={}", stdout);
}

#[test]
fn test_search_is_deterministic() {
    let env = setup_test_env(None);
    let repo = repo_arg(&env);
    run_repolens(&env, &["index", "local", &repo], None);

    let args = ["search", repo.as_str(), "draw the chart axes", "--all"];
    let (a, _, _) = run_repolens(&env, &args, None);
    let (b, _, _) = run_repolens(&env, &args, None);
    assert_eq!(a, b);
}

#[test]
fn test_ask_requires_openai_key() {
    let env = setup_test_env(None);
    let repo = repo_arg(&env);
    let (_, stderr, success) = run_repolens(&env, &["ask", &repo, "Where is auth?"], None);
    assert!(!success);
    assert!(stderr.contains("OPENAI_API_KEY"), "stderr={}", stderr);
}

#[test]
fn test_dashboard_empty() {
    let env = setup_test_env(None);
    let (stdout, _, success) = run_repolens(&env, &["dashboard", "acme/api"], None);
    assert!(success);
    assert!(stdout.contains("dashboard github::acme/api"));
    assert!(stdout.contains("no reviews recorded"));
}

#[test]
fn test_prs_requires_github_token() {
    let env = setup_test_env(None);
    let (_, stderr, success) = run_repolens(&env, &["prs", "acme/api"], None);
    assert!(!success);
    assert!(stderr.contains("GITHUB_TOKEN"), "stderr={}", stderr);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ask_and_review_against_mock_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"summary\": \"Adds a token check.\", \"comments\": [{\"file_path\": \"src/auth.rs\", \"line\": 2, \"severity\": \"warning\", \"category\": \"security\", \"body\": \"Compare tokens in constant time.\", \"rationale\": \"Timing leaks.\", \"suggestion\": null}]}"}}]
        })))
        .mount(&server)
        .await;

    let env = setup_test_env(Some(&server.uri()));
    let repo = repo_arg(&env);
    let diff = env.root.join("diff.json");
    fs::write(
        &diff,
        serde_json::json!([
            {"filename": "src/auth.rs", "status": "modified",
             "patch": "@@ -1,3 +1,4 @@\n pub fn authenticate_user(token: &str) -> bool {\n+    log(token);\n     verify_token(token)\n }"}
        ])
        .to_string(),
    )
    .unwrap();

    let result = tokio::task::spawn_blocking(move || {
        let repo_s = repo.as_str();
        run_repolens(&env, &["index", "local", repo_s], None);

        let ask = run_repolens(
            &env,
            &["ask", repo_s, "authenticate_user verify_token token"],
            Some("sk-test"),
        );

        let diff_s = diff.to_str().unwrap();
        let review1 = run_repolens(
            &env,
            &["review", repo_s, "--pr", "7", "--diff-file", diff_s, "--title", "Log tokens"],
            Some("sk-test"),
        );
        let review2 = run_repolens(
            &env,
            &["review", repo_s, "--pr", "8", "--diff-file", diff_s],
            Some("sk-test"),
        );
        let dashboard = run_repolens(&env, &["dashboard", repo_s], None);
        (ask, review1, review2, dashboard)
    })
    .await
    .unwrap();

    let (ask, review1, review2, dashboard) = result;
    assert!(ask.2, "ask failed: {}", ask.1);
    assert!(ask.0.contains("References:"));
    assert!(ask.0.contains("src/auth.rs:1-3"));

    assert!(review1.2, "review failed: {}", review1.1);
    assert!(review1.0.contains("Adds a token check."));
    assert!(review1.0.contains("[warning/security] src/auth.rs:2"));
    assert!(review2.2, "second review failed: {}", review2.1);

    assert!(dashboard.2);
    assert!(dashboard.0.contains("runs: 2"), "dashboard={}", dashboard.0);
    assert!(dashboard.0.contains("comments: 2"));
}
