use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docsh_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docsh");
    path
}

/// A populated corpus root (no `.git`) so commands never touch the network.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs = root.join("docs");
    fs::create_dir_all(docs.join("guides")).unwrap();
    fs::write(
        docs.join("guides/deploy.md"),
        "# Deploying\n\nPush the app to production with a single deploy command.\n\n## Rollback\n\nRedeploy the previous build.\n",
    )
    .unwrap();
    fs::write(
        docs.join("guides/storage.md"),
        "# Storage\n\nUpload files to a bucket.\n",
    )
    .unwrap();
    fs::write(docs.join("notes.txt"), "Release notes mention deploy once.\n").unwrap();

    let config_content = format!(
        r#"[corpus]
repo_url = "https://example.invalid/docs.git"
git_ref = "main"
refresh_interval_minutes = 0
local_root = "{root}/docs"
generation = "both"
cache_dir = "{root}/cache"

[server]
bind = "127.0.0.1:0"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docsh.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docsh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docsh_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docsh binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn cache_entries(config_path: &Path) -> usize {
    let cache_dir = config_path.parent().unwrap().parent().unwrap().join("cache");
    match fs::read_dir(cache_dir) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[test]
fn test_search_finds_matching_files() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docsh(&config_path, &["search", "deploy"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.starts_with("Search results for \"deploy\" (page 1):"));
    assert!(stdout.contains("File: guides/deploy.md"));
    assert!(stdout.contains("File: notes.txt"));
    assert!(!stdout.contains("guides/storage.md"));
}

#[test]
fn test_search_ranks_higher_match_count_first() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_docsh(&config_path, &["search", "deploy"]);
    assert!(success);
    let deploy = stdout.find("File: guides/deploy.md").unwrap();
    let notes = stdout.find("File: notes.txt").unwrap();
    assert!(deploy < notes, "output:\n{}", stdout);
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_test_env();

    let (first, _, _) = run_docsh(&config_path, &["search", "deploy"]);
    let (second, _, _) = run_docsh(&config_path, &["search", "deploy"]);
    assert_eq!(first, second);
}

#[test]
fn test_search_no_results() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_docsh(&config_path, &["search", "kubernetes"]);
    assert!(success);
    assert!(stdout.contains("No results found for \"kubernetes\" (page 1)."));
}

#[test]
fn test_search_empty_query_reports_error() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_docsh(&config_path, &["search", "   "]);
    assert!(success);
    assert!(stdout.contains("Error searching documentation"));
    assert!(stdout.contains("query must not be empty"));
}

#[test]
fn test_search_files_only() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_docsh(&config_path, &["search", "deploy", "--files-only"]);
    assert!(success);
    assert!(stdout.contains("File: guides/deploy.md"));
    assert!(!stdout.contains("```"));
}

#[test]
fn test_search_json_output() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_docsh(&config_path, &["search", "deploy", "--json"]);
    assert!(success);
    let value: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(value["summary"]["count"], 2);
    assert_eq!(value["results"][0]["file"], "guides/deploy.md");
}

#[test]
fn test_search_include_content_bypasses_cache() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) =
        run_docsh(&config_path, &["search", "rollback", "--include-content"]);
    assert!(success);
    assert!(stdout.contains("Redeploy the previous build."));
    assert_eq!(cache_entries(&config_path), 0);
}

#[test]
fn test_cache_clear() {
    let (_tmp, config_path) = setup_test_env();

    run_docsh(&config_path, &["search", "deploy"]);
    run_docsh(&config_path, &["search", "storage"]);
    assert_eq!(cache_entries(&config_path), 2);

    let (stdout, stderr, success) = run_docsh(&config_path, &["cache", "clear"]);
    assert!(success, "cache clear failed: {}", stderr);
    assert!(stdout.contains("Removed 2 cached result(s)"));
    assert_eq!(cache_entries(&config_path), 0);
}

#[test]
fn test_stdout_has_no_log_lines() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_docsh(&config_path, &["--verbose", "search", "deploy"]);
    assert!(success);
    assert!(!stdout.contains("DEBUG"));
    assert!(!stdout.contains("INFO"));
}

#[test]
fn test_unknown_generation_rejected() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) =
        run_docsh(&config_path, &["--generation", "gen3", "search", "deploy"]);
    assert!(!success);
    assert!(stderr.contains("gen3"));
}

#[test]
fn test_missing_config_file_is_error() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_docsh(&missing, &["search", "deploy"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_sync_fails_when_root_cannot_be_created() {
    let (tmp, config_path) = setup_test_env();
    let blocker = tmp.path().join("blocker");
    fs::write(&blocker, "not a directory").unwrap();
    let root = blocker.join("docs");

    let (_, stderr, success) = run_docsh(
        &config_path,
        &["--local-root", root.to_str().unwrap(), "sync"],
    );
    assert!(!success);
    assert!(stderr.contains("Failed to create documentation root"));
}

#[test]
fn test_sync_exits_nonzero_when_serving_placeholder() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path().join("fresh-docs");
    let remote = tmp.path().join("no-such-remote");

    let (stdout, stderr, success) = run_docsh(
        &config_path,
        &[
            "--local-root",
            root.to_str().unwrap(),
            "--repo-url",
            remote.to_str().unwrap(),
            "sync",
        ],
    );
    assert!(!success, "sync succeeded: stdout={}, stderr={}", stdout, stderr);
    let readme = fs::read_to_string(root.join("README.md")).unwrap();
    assert!(readme.contains("Documentation unavailable"));
}

#[test]
fn test_ignore_flag_excludes_files() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_docsh(
        &config_path,
        &["--ignore", "**/notes.txt", "search", "deploy"],
    );
    assert!(success);
    assert!(stdout.contains("File: guides/deploy.md"));
    assert!(!stdout.contains("notes.txt"), "output:\n{}", stdout);
}
