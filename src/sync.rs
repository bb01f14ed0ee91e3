//! Corpus acquisition and refresh.
//!
//! Two strategies, chosen by the refresh interval:
//!
//! - **incremental** (interval > 0): shallow clone when the root is not a
//!   working copy, otherwise fetch, compare ahead/behind counts against the
//!   remote ref, and fast-forward only when behind (re-pruning afterwards);
//! - **snapshot** (interval = 0): download and extract a ref archive once.
//!   A missing ref is retried once with the conventional alternate name; any
//!   other failure falls back to a clone, and when that fails too the root
//!   gets a placeholder README so search keeps working.
//!
//! Fresh acquisitions are staged in a sibling directory, pruned to the
//! configured generation there, and renamed into place, so readers never see
//! a half-written or half-pruned corpus.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::process::Command;

use crate::classify::{Generation, GEN1_SEGMENT, PLATFORM_SEGMENT};
use crate::config::CorpusConfig;
use crate::progress::{QuietReporter, SyncEvent, SyncOutcome, SyncPhase, SyncReporter};

/// `ENOSPC` on Linux and macOS.
const STORAGE_EXHAUSTED_OS_ERROR: i32 = 28;

const PLACEHOLDER: &str = "# Documentation unavailable\n\n\
The documentation corpus could not be downloaded. Searches will return no \
results until the next successful synchronization.\n";

/// Snapshot download failures the synchronizer branches on.
#[derive(Debug)]
pub enum SnapshotError {
    RefNotFound(String),
    StorageExhausted,
    Other(String),
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::RefNotFound(r) => write!(f, "ref '{}' not found upstream", r),
            SnapshotError::StorageExhausted => write!(f, "no space left on device"),
            SnapshotError::Other(e) => write!(f, "snapshot download failed: {}", e),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<std::io::Error> for SnapshotError {
    fn from(e: std::io::Error) -> Self {
        if e.raw_os_error() == Some(STORAGE_EXHAUSTED_OS_ERROR) {
            SnapshotError::StorageExhausted
        } else {
            SnapshotError::Other(e.to_string())
        }
    }
}

/// Local vs. remote position after a fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStatus {
    pub ahead: u32,
    pub behind: u32,
    pub pulled: bool,
}

/// Remote side of synchronization.
#[async_trait]
pub trait CorpusRemote: Send + Sync {
    async fn clone_repo(
        &self,
        url: &str,
        git_ref: &str,
        dest: &Path,
        reporter: &dyn SyncReporter,
    ) -> Result<()>;

    async fn refresh(
        &self,
        repo: &Path,
        git_ref: &str,
        reporter: &dyn SyncReporter,
    ) -> Result<RefreshStatus>;

    /// Fails with a [`SnapshotError`] inside the `anyhow::Error`.
    async fn download_snapshot(
        &self,
        url: &str,
        git_ref: &str,
        dest: &Path,
        reporter: &dyn SyncReporter,
    ) -> Result<()>;
}

/// Read-only view of the synchronizer's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorpusState {
    pub phase: SyncPhase,
    pub root_exists: bool,
    pub root_empty: bool,
    pub is_working_copy: bool,
    pub last_outcome: Option<SyncOutcome>,
}

impl Default for CorpusState {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Uninitialized,
            root_exists: false,
            root_empty: true,
            is_working_copy: false,
            last_outcome: None,
        }
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CorpusSynchronizer {
    config: CorpusConfig,
    remote: Arc<dyn CorpusRemote>,
    reporter: Arc<dyn SyncReporter>,
    running: AtomicBool,
    state: Mutex<CorpusState>,
}

impl CorpusSynchronizer {
    pub fn new(
        config: CorpusConfig,
        remote: Arc<dyn CorpusRemote>,
        reporter: Arc<dyn SyncReporter>,
    ) -> Self {
        Self {
            config,
            remote,
            reporter,
            running: AtomicBool::new(false),
            state: Mutex::new(CorpusState::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.local_root
    }

    pub fn state(&self) -> CorpusState {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).phase = phase;
    }

    /// Creates the local root. Failure here is fatal for the process.
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.local_root)
            .await
            .with_context(|| {
                format!(
                    "Failed to create documentation root: {}",
                    self.config.local_root.display()
                )
            })?;
        self.inspect_root().await;
        Ok(())
    }

    /// Runs one synchronization pass. Never fails; a pass started while
    /// another is running returns [`SyncOutcome::Skipped`].
    pub async fn sync(&self, is_refresh: bool) -> SyncOutcome {
        if self.running.swap(true, Ordering::AcqRel) {
            self.reporter
                .report(SyncEvent::step("sync already running, skipping"));
            return SyncOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        let (outcome, phase) = self.run(is_refresh).await;
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            state.phase = phase;
            state.last_outcome = Some(outcome);
        }
        self.inspect_root().await;
        self.reporter.report(SyncEvent::Finished { outcome, phase });
        outcome
    }

    async fn run(&self, is_refresh: bool) -> (SyncOutcome, SyncPhase) {
        let root = &self.config.local_root;
        let populated = has_entries(root).await;
        let working_copy = root.join(".git").is_dir();
        let degraded = self.state().phase == SyncPhase::Degraded;

        if self.config.refresh_enabled() {
            if populated && working_copy {
                self.set_phase(SyncPhase::Refreshing);
                return (self.refresh().await, SyncPhase::Ready);
            }
            self.set_phase(SyncPhase::Acquiring);
            return match self.acquire_clone(populated).await {
                // A kept placeholder is still degraded.
                (SyncOutcome::Failed, _) if degraded => (SyncOutcome::Failed, SyncPhase::Degraded),
                other => other,
            };
        }

        if populated {
            if !is_refresh {
                self.reporter.report(SyncEvent::step(format!(
                    "using existing documentation at {}",
                    root.display()
                )));
            }
            let phase = if degraded {
                SyncPhase::Degraded
            } else {
                SyncPhase::Ready
            };
            return (SyncOutcome::Existing, phase);
        }
        self.set_phase(SyncPhase::Acquiring);
        self.acquire_snapshot().await
    }

    async fn refresh(&self) -> SyncOutcome {
        let quiet = QuietReporter::new(self.reporter.clone());
        match self
            .remote
            .refresh(&self.config.local_root, &self.config.git_ref, &quiet)
            .await
        {
            Ok(status) if status.pulled => {
                self.reporter.report(SyncEvent::step(format!(
                    "pulled {} new commit(s) from {}",
                    status.behind, self.config.git_ref
                )));
                let root = &self.config.local_root;
                if let Err(e) = prune_for_generation(root, self.config.generation).await {
                    self.reporter
                        .report(SyncEvent::warning(format!("prune after pull failed: {:#}", e)));
                }
                SyncOutcome::Updated
            }
            Ok(status) => {
                if status.ahead > 0 {
                    self.reporter.report(SyncEvent::warning(format!(
                        "local corpus is {} commit(s) ahead of origin/{}",
                        status.ahead, self.config.git_ref
                    )));
                }
                SyncOutcome::UpToDate
            }
            Err(e) => {
                self.reporter.report(SyncEvent::warning(format!(
                    "refresh failed, keeping current corpus: {:#}",
                    e
                )));
                SyncOutcome::Failed
            }
        }
    }

    async fn acquire_clone(&self, populated: bool) -> (SyncOutcome, SyncPhase) {
        match self.try_clone().await {
            Ok(()) => (SyncOutcome::Cloned, SyncPhase::Ready),
            Err(e) => {
                self.reporter
                    .report(SyncEvent::failed(format!("clone failed: {:#}", e)));
                self.fail_over(populated).await
            }
        }
    }

    async fn try_clone(&self) -> Result<()> {
        let staging = self.fresh_staging().await?;
        let quiet = QuietReporter::new(self.reporter.clone());
        self.reporter.report(SyncEvent::step(format!(
            "cloning {} ({})",
            self.config.repo_url, self.config.git_ref
        )));
        self.remote
            .clone_repo(&self.config.repo_url, &self.config.git_ref, &staging, &quiet)
            .await?;
        self.install(&staging).await
    }

    async fn acquire_snapshot(&self) -> (SyncOutcome, SyncPhase) {
        let primary = self.config.git_ref.clone();
        let result = match self.try_snapshot(&primary).await {
            Err(e) if is_ref_not_found(&e) => {
                let alternate = alternate_ref(&primary);
                self.reporter.report(SyncEvent::warning(format!(
                    "ref '{}' not found, retrying with '{}'",
                    primary, alternate
                )));
                self.try_snapshot(alternate).await
            }
            other => other,
        };

        match result {
            Ok(()) => (SyncOutcome::Downloaded, SyncPhase::Ready),
            Err(e) => {
                let reason = match e.downcast_ref::<SnapshotError>() {
                    Some(SnapshotError::StorageExhausted) => "storage exhausted",
                    _ => "snapshot unavailable",
                };
                self.reporter.report(SyncEvent::warning(format!(
                    "{} ({:#}), falling back to git clone",
                    reason, e
                )));
                self.acquire_clone(false).await
            }
        }
    }

    async fn try_snapshot(&self, git_ref: &str) -> Result<()> {
        let staging = self.fresh_staging().await?;
        let quiet = QuietReporter::new(self.reporter.clone());
        self.reporter.report(SyncEvent::step(format!(
            "downloading snapshot of {} ({})",
            self.config.repo_url, git_ref
        )));
        self.remote
            .download_snapshot(&self.config.repo_url, git_ref, &staging, &quiet)
            .await?;
        self.install(&staging).await
    }

    async fn fail_over(&self, populated: bool) -> (SyncOutcome, SyncPhase) {
        if let Ok(staging) = sibling(&self.config.local_root, "staging") {
            let _ = remove_if_exists(&staging).await;
        }
        if populated {
            self.reporter
                .report(SyncEvent::warning("keeping previously acquired corpus"));
            return (SyncOutcome::Failed, SyncPhase::Ready);
        }
        if let Err(e) = self.write_placeholder().await {
            self.reporter
                .report(SyncEvent::failed(format!("placeholder write failed: {:#}", e)));
        }
        (SyncOutcome::Placeholder, SyncPhase::Degraded)
    }

    async fn write_placeholder(&self) -> Result<()> {
        let root = &self.config.local_root;
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("Failed to create {}", root.display()))?;
        tokio::fs::write(root.join("README.md"), PLACEHOLDER)
            .await
            .context("Failed to write placeholder README")?;
        self.reporter
            .report(SyncEvent::warning("all acquisition strategies failed, serving placeholder"));
        Ok(())
    }

    async fn fresh_staging(&self) -> Result<PathBuf> {
        let staging = sibling(&self.config.local_root, "staging")?;
        remove_if_exists(&staging).await?;
        Ok(staging)
    }

    /// Prunes the staged tree and swaps it in for the root.
    async fn install(&self, staging: &Path) -> Result<()> {
        let removed = prune_for_generation(staging, self.config.generation).await?;
        if removed > 0 {
            self.reporter.report(SyncEvent::step(format!(
                "pruned {} subtree(s) outside {}",
                removed, self.config.generation
            )));
        }
        swap_into_place(staging, &self.config.local_root).await
    }

    async fn inspect_root(&self) {
        let root = &self.config.local_root;
        let exists = tokio::fs::metadata(root).await.is_ok();
        let empty = !has_entries(root).await;
        let working_copy = root.join(".git").is_dir();
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.root_exists = exists;
        state.root_empty = empty;
        state.is_working_copy = working_copy;
    }
}

fn is_ref_not_found(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<SnapshotError>(),
        Some(SnapshotError::RefNotFound(_))
    )
}

/// `main` and `master` stand in for each other; any other ref falls back
/// to `main`.
pub fn alternate_ref(git_ref: &str) -> &'static str {
    match git_ref {
        "main" => "master",
        _ => "main",
    }
}

async fn has_entries(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

fn sibling(root: &Path, suffix: &str) -> Result<PathBuf> {
    let Some(name) = root.file_name() else {
        bail!("documentation root {} has no directory name", root.display());
    };
    Ok(root.with_file_name(format!("{}.{}", name.to_string_lossy(), suffix)))
}

/// Replaces `root` with `staging` using renames; the old tree is removed
/// afterwards.
pub async fn swap_into_place(staging: &Path, root: &Path) -> Result<()> {
    let retired = sibling(root, "old")?;
    remove_if_exists(&retired).await?;

    let had_root = tokio::fs::metadata(root).await.is_ok();
    if had_root {
        tokio::fs::rename(root, &retired)
            .await
            .with_context(|| format!("Failed to move aside {}", root.display()))?;
    }
    if let Err(e) = tokio::fs::rename(staging, root).await {
        if had_root {
            let _ = tokio::fs::rename(&retired, root).await;
        }
        return Err(e).with_context(|| format!("Failed to move corpus into {}", root.display()));
    }
    remove_if_exists(&retired).await
}

/// Removes the documentation subtrees that do not belong to `generation`.
/// Returns the number of subtrees removed.
///
/// - `gen2`: `src/pages/gen1` and `src/fragments/gen1`
/// - `gen1`: `src/pages/[platform]` and every `src/fragments` child except
///   `gen1`
/// - `both`: nothing
pub async fn prune_for_generation(root: &Path, generation: Generation) -> Result<usize> {
    let pages = root.join("src").join("pages");
    let fragments = root.join("src").join("fragments");

    let mut targets = Vec::new();
    match generation {
        Generation::Both => return Ok(0),
        Generation::Gen2 => {
            targets.push(pages.join(GEN1_SEGMENT));
            targets.push(fragments.join(GEN1_SEGMENT));
        }
        Generation::Gen1 => {
            targets.push(pages.join(PLATFORM_SEGMENT));
            if let Ok(mut entries) = tokio::fs::read_dir(&fragments).await {
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_name() != GEN1_SEGMENT && entry.file_type().await?.is_dir() {
                        targets.push(entry.path());
                    }
                }
            }
        }
    }

    let mut removed = 0;
    for target in targets {
        if tokio::fs::metadata(&target).await.is_ok() {
            tokio::fs::remove_dir_all(&target)
                .await
                .with_context(|| format!("Failed to prune {}", target.display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Shells out to `git` and downloads archives over HTTPS.
pub struct GitRemote {
    client: reqwest::Client,
}

impl GitRemote {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("docsh/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(600))
            .build()?;
        Ok(Self { client })
    }
}

async fn git(args: &[&str], cwd: Option<&Path>) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .await
        .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", args[0]))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args[0], stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Parses `git rev-list --left-right --count` output: `<ahead>\t<behind>`.
pub fn parse_ahead_behind(output: &str) -> Option<(u32, u32)> {
    let mut parts = output.split_whitespace();
    let ahead = parts.next()?.parse().ok()?;
    let behind = parts.next()?.parse().ok()?;
    Some((ahead, behind))
}

/// Codeload archive URL for a GitHub remote.
pub fn archive_url(repo_url: &str, git_ref: &str) -> Option<String> {
    let base = repo_url.trim_end_matches('/').trim_end_matches(".git");
    let slug = base
        .strip_prefix("https://github.com/")
        .or_else(|| base.strip_prefix("git@github.com:"))?;
    Some(format!(
        "https://codeload.github.com/{}/zip/refs/heads/{}",
        slug, git_ref
    ))
}

/// Extracts an archive into `dest`, dropping the single top-level directory
/// GitHub wraps every archive in. Returns the number of files written.
pub fn extract_archive(bytes: &[u8], dest: &Path) -> Result<usize, SnapshotError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| SnapshotError::Other(e.to_string()))?;
    std::fs::create_dir_all(dest)?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| SnapshotError::Other(e.to_string()))?;
        let Some(name) = entry.enclosed_name() else {
            continue;
        };
        let relative: PathBuf = name.components().skip(1).collect();
        if relative.as_os_str().is_empty() {
            continue;
        }
        let out = dest.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&out)?;
        std::io::copy(&mut entry, &mut file)?;
        written += 1;
    }
    Ok(written)
}

#[async_trait]
impl CorpusRemote for GitRemote {
    async fn clone_repo(
        &self,
        url: &str,
        git_ref: &str,
        dest: &Path,
        reporter: &dyn SyncReporter,
    ) -> Result<()> {
        reporter.report(SyncEvent::step(format!("git clone --depth 1 {}", url)));
        let dest = dest.to_string_lossy().into_owned();
        git(
            &[
                "clone",
                "--quiet",
                "--depth",
                "1",
                "--single-branch",
                "--branch",
                git_ref,
                url,
                dest.as_str(),
            ],
            None,
        )
        .await?;
        Ok(())
    }

    async fn refresh(
        &self,
        repo: &Path,
        git_ref: &str,
        reporter: &dyn SyncReporter,
    ) -> Result<RefreshStatus> {
        reporter.report(SyncEvent::step("git fetch"));
        git(&["fetch", "--quiet", "origin", git_ref], Some(repo)).await?;

        let range = format!("HEAD...origin/{}", git_ref);
        let counts = git(
            &["rev-list", "--left-right", "--count", range.as_str()],
            Some(repo),
        )
        .await?;
        let Some((ahead, behind)) = parse_ahead_behind(&counts) else {
            bail!("unexpected rev-list output: {}", counts);
        };

        let mut status = RefreshStatus {
            ahead,
            behind,
            pulled: false,
        };
        if behind > 0 {
            if ahead > 0 {
                bail!(
                    "local corpus diverged from origin/{} ({} ahead, {} behind)",
                    git_ref,
                    ahead,
                    behind
                );
            }
            // Pruned subtrees show up as local deletions, which a merge would
            // refuse to overwrite.
            reporter.report(SyncEvent::step(format!("fast-forward ({} behind)", behind)));
            let target = format!("origin/{}", git_ref);
            git(&["reset", "--quiet", "--hard", target.as_str()], Some(repo)).await?;
            status.pulled = true;
        }
        Ok(status)
    }

    async fn download_snapshot(
        &self,
        url: &str,
        git_ref: &str,
        dest: &Path,
        reporter: &dyn SyncReporter,
    ) -> Result<()> {
        let Some(archive) = archive_url(url, git_ref) else {
            return Err(SnapshotError::Other(format!("no archive endpoint for {}", url)).into());
        };
        reporter.report(SyncEvent::step(format!("GET {}", archive)));

        let response = self
            .client
            .get(&archive)
            .send()
            .await
            .map_err(|e| SnapshotError::Other(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SnapshotError::RefNotFound(git_ref.to_string()).into());
        }
        if !status.is_success() {
            return Err(SnapshotError::Other(format!("HTTP {}", status)).into());
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SnapshotError::Other(e.to_string()))?;

        let dest = dest.to_path_buf();
        let files = tokio::task::spawn_blocking(move || extract_archive(&bytes, &dest))
            .await
            .context("archive extraction task failed")??;
        reporter.report(SyncEvent::step(format!("extracted {} files", files)));
        Ok(())
    }
}
