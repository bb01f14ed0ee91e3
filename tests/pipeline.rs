//! Library-level scenarios: directory scoping, ranking, caching and the HTTP
//! façade working together on a temporary corpus.

use anyhow::Result;
use async_trait::async_trait;
use docs_harness::clock::SystemClock;
use docs_harness::config::{build_globset, Config};
use docs_harness::classify::Generation;
use docs_harness::harness::{Harness, Parts};
use docs_harness::matcher::{MatchOutput, MatchRequest, Matcher, ScanMatcher};
use docs_harness::orchestrator::SearchArgs;
use docs_harness::progress::{NoProgress, SyncReporter};
use docs_harness::server;
use docs_harness::sync::{CorpusRemote, RefreshStatus};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const GEN1_CLI: &str = "src/pages/gen1/[platform]/tools/cli/index.mdx";
const GEN1_CLIENT: &str = "src/pages/gen1/[platform]/build-a-backend/client/index.mdx";
const GEN2_CLI: &str = "src/pages/[platform]/reference/cli-commands/index.mdx";

const MANIFEST: &str = r#"
export const directory = {
  path: 'src/pages/index.tsx',
  children: [
    { path: 'src/pages/gen1/[platform]/tools/cli/index.mdx', platforms: ['react'] },
    { path: 'src/pages/gen1/[platform]/build-a-backend/client/index.mdx', platforms: ['react'] },
    { path: 'src/pages/[platform]/reference/cli-commands/index.mdx', platforms: ['react'] }
  ]
};
"#;

/// Remote that must never be reached: every test corpus is pre-populated.
struct OfflineRemote;

#[async_trait]
impl CorpusRemote for OfflineRemote {
    async fn clone_repo(
        &self,
        _url: &str,
        _git_ref: &str,
        _dest: &Path,
        _reporter: &dyn SyncReporter,
    ) -> Result<()> {
        anyhow::bail!("offline")
    }

    async fn refresh(
        &self,
        _repo: &Path,
        _git_ref: &str,
        _reporter: &dyn SyncReporter,
    ) -> Result<RefreshStatus> {
        anyhow::bail!("offline")
    }

    async fn download_snapshot(
        &self,
        _url: &str,
        _git_ref: &str,
        _dest: &Path,
        _reporter: &dyn SyncReporter,
    ) -> Result<()> {
        anyhow::bail!("offline")
    }
}

/// Delegates to the scanner and counts invocations.
struct CountingMatcher {
    inner: ScanMatcher,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Matcher for CountingMatcher {
    async fn search(&self, request: MatchRequest) -> Result<MatchOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.search(request).await
    }
}

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

/// Two generations of CLI docs. The gen2 page and the gen1 client page have
/// more "cli" hits than the gen1 command reference.
fn write_corpus(root: &Path) {
    write(root, "src/directory/directory.mjs", MANIFEST);
    write(root, GEN1_CLI, "# Amplify CLI\n\nRun the cli to add auth.\n");
    write(
        root,
        GEN1_CLIENT,
        "# Client\n\nThe client wraps the cli output. cli cli cli cli.\n",
    );
    write(
        root,
        GEN2_CLI,
        "# CLI commands\n\ncli cli cli cli cli cli cli cli\n",
    );
}

/// Opens a harness over `<dir>/docs` with its cache in `<dir>/cache`.
async fn open_harness(dir: &Path, generation: Generation) -> (Harness, Arc<AtomicUsize>) {
    let mut config = Config::default();
    config.corpus.local_root = dir.join("docs");
    config.corpus.cache_dir = dir.join("cache");
    config.corpus.generation = generation;

    let calls = Arc::new(AtomicUsize::new(0));
    let parts = Parts {
        remote: Arc::new(OfflineRemote),
        matcher: Arc::new(CountingMatcher {
            inner: ScanMatcher::new(build_globset(&[]).unwrap()),
            calls: calls.clone(),
        }),
        clock: Arc::new(SystemClock),
        reporter: Arc::new(NoProgress),
    };
    let harness = Harness::with_parts(config, parts).unwrap();
    harness.open().await.unwrap();
    (harness, calls)
}

async fn setup_harness(generation: Generation) -> (TempDir, Harness, Arc<AtomicUsize>) {
    let tmp = TempDir::new().unwrap();
    write_corpus(&tmp.path().join("docs"));
    let (harness, calls) = open_harness(tmp.path(), generation).await;
    (tmp, harness, calls)
}

#[tokio::test]
async fn test_gen1_cli_query_scopes_and_ranks() {
    let (_tmp, harness, _) = setup_harness(Generation::Gen2).await;

    let out = harness
        .orchestrator()
        .execute(&SearchArgs::new("gen1 cli"))
        .await;

    assert!(!out.contains(GEN2_CLI), "gen2 page leaked:\n{}", out);
    let cli = out
        .find(&format!("File: {}", GEN1_CLI))
        .unwrap_or_else(|| panic!("missing gen1 cli page:\n{}", out));
    let client = out
        .find(&format!("File: {}", GEN1_CLIENT))
        .unwrap_or_else(|| panic!("missing gen1 client page:\n{}", out));
    assert!(cli < client, "command reference should rank first:\n{}", out);
}

#[tokio::test]
async fn test_configured_generation_scopes_without_mention() {
    let (_tmp, harness, _) = setup_harness(Generation::Gen2).await;

    let out = harness.orchestrator().execute(&SearchArgs::new("cli")).await;

    assert!(out.contains(&format!("File: {}", GEN2_CLI)));
    assert!(!out.contains(GEN1_CLI));
    assert!(!out.contains(GEN1_CLIENT));
}

#[tokio::test]
async fn test_both_generations_prefer_newer() {
    let (_tmp, harness, _) = setup_harness(Generation::Both).await;

    let out = harness
        .orchestrator()
        .execute(&SearchArgs::new("cli reference"))
        .await;

    let gen2 = out.find(GEN2_CLI).unwrap();
    let gen1 = out.find(GEN1_CLI).unwrap();
    assert!(gen2 < gen1, "output:\n{}", out);
}

#[tokio::test]
async fn test_repeated_query_served_from_cache() {
    let (_tmp, harness, calls) = setup_harness(Generation::Gen2).await;
    let args = SearchArgs::new("gen1 cli");

    let first = harness.orchestrator().execute(&args).await;
    let second = harness.orchestrator().execute(&args).await;

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_generation_change_does_not_reuse_cached_results() {
    let tmp = TempDir::new().unwrap();
    write_corpus(&tmp.path().join("docs"));

    let (newer, _) = open_harness(tmp.path(), Generation::Gen2).await;
    let out = newer.orchestrator().execute(&SearchArgs::new("cli")).await;
    assert!(out.contains(&format!("File: {}", GEN2_CLI)), "output:\n{}", out);

    // Same root and cache directory, different configured generation.
    let (older, calls) = open_harness(tmp.path(), Generation::Gen1).await;
    let out = older.orchestrator().execute(&SearchArgs::new("cli")).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(out.contains(&format!("File: {}", GEN1_CLI)), "output:\n{}", out);
    assert!(!out.contains(GEN2_CLI), "output:\n{}", out);
}

#[tokio::test]
async fn test_session_with_json_output_parses() {
    let (_tmp, harness, _) = setup_harness(Generation::Gen2).await;
    let args = SearchArgs {
        session_id: Some("s-2".to_string()),
        use_json: true,
        ..SearchArgs::new("gen1 cli")
    };

    let out = harness.orchestrator().execute(&args).await;
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert!(value["summary"].is_object());
    assert!(value["related"]
        .as_array()
        .unwrap()
        .iter()
        .any(|section| section["heading"] == "Amplify CLI"));
}

#[tokio::test]
async fn test_content_requests_skip_cache() {
    let (_tmp, harness, calls) = setup_harness(Generation::Gen2).await;
    let args = SearchArgs {
        include_content: true,
        ..SearchArgs::new("gen1 cli")
    };

    harness.orchestrator().execute(&args).await;
    let out = harness.orchestrator().execute(&args).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(out.contains("Run the cli to add auth."));
}

#[tokio::test]
async fn test_session_adds_related_sections() {
    let (_tmp, harness, calls) = setup_harness(Generation::Gen2).await;
    let args = SearchArgs {
        session_id: Some("s-1".to_string()),
        ..SearchArgs::new("gen1 cli")
    };

    let out = harness.orchestrator().execute(&args).await;
    assert!(out.starts_with("Related sections:\n"), "output:\n{}", out);
    assert!(out.contains("# Amplify CLI"));

    // The search part is cached under the session-less key.
    harness
        .orchestrator()
        .execute(&SearchArgs::new("gen1 cli"))
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_file_path_reads_single_file() {
    let (_tmp, harness, calls) = setup_harness(Generation::Gen2).await;
    let args = SearchArgs {
        file_path: Some(GEN1_CLI.to_string()),
        ..SearchArgs::default()
    };

    let out = harness.orchestrator().execute(&args).await;
    assert!(out.starts_with(&format!("File: {}", GEN1_CLI)));
    assert!(out.contains("Run the cli to add auth."));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let escape = SearchArgs {
        file_path: Some("../outside.md".to_string()),
        ..SearchArgs::default()
    };
    let out = harness.orchestrator().execute(&escape).await;
    assert!(out.contains("outside the documentation root"));
}

async fn spawn_http(harness: &Harness) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = harness.router();
    tokio::spawn(async move {
        server::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_search_requires_query() {
    let (_tmp, harness, calls) = setup_harness(Generation::Gen2).await;
    let base = spawn_http(&harness).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/search", base)).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/search", base))
        .json(&serde_json::json!({ "query": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_http_search_and_tools() {
    let (_tmp, harness, _) = setup_harness(Generation::Gen2).await;
    let base = spawn_http(&harness).await;
    let client = reqwest::Client::new();

    let text = client
        .get(format!("{}/search", base))
        .query(&[("query", "gen1 cli"), ("page", "1")])
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains(GEN1_CLI));

    let health: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["corpus"]["root_empty"], false);

    let tools: serde_json::Value = client
        .get(format!("{}/tools/list", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tools["tools"][0]["name"], "search_docs");

    let resp = client
        .post(format!("{}/tools/search_docs", base))
        .json(&serde_json::json!({ "query": "gen1 cli" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["result"].as_str().unwrap().contains(GEN1_CLI));

    let resp = client
        .post(format!("{}/tools/search_docs", base))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/tools/unknown", base))
        .json(&serde_json::json!({ "query": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
