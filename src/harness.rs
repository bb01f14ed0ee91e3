//! Application wiring.
//!
//! [`Harness`] builds every component from a [`Config`] and owns the
//! lifecycle: creating the corpus root, the initial sync, the refresh timer,
//! and keeping the indexes and result cache consistent with the corpus.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::cache::ResultCache;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::directory::DirectoryIndex;
use crate::headings::HeadingCache;
use crate::matcher::{Matcher, ScanMatcher};
use crate::mcp::McpBridge;
use crate::orchestrator::QueryOrchestrator;
use crate::progress::{SyncOutcome, SyncReporter, TracingReporter};
use crate::server;
use crate::sync::{CorpusRemote, CorpusSynchronizer, GitRemote};
use crate::tool::{ToolContext, ToolRegistry};

/// Replaceable collaborators. [`Parts::standard`] is what the binary uses.
pub struct Parts {
    pub remote: Arc<dyn CorpusRemote>,
    pub matcher: Arc<dyn Matcher>,
    pub clock: Arc<dyn Clock>,
    pub reporter: Arc<dyn SyncReporter>,
}

impl Parts {
    pub fn standard(config: &Config) -> Result<Self> {
        Ok(Self {
            remote: Arc::new(GitRemote::new()?),
            matcher: Arc::new(ScanMatcher::new(config.corpus.ignore_set()?)),
            clock: Arc::new(SystemClock),
            reporter: Arc::new(TracingReporter),
        })
    }
}

pub struct Harness {
    config: Config,
    synchronizer: Arc<CorpusSynchronizer>,
    directory: Arc<DirectoryIndex>,
    headings: Arc<HeadingCache>,
    cache: Arc<ResultCache>,
    orchestrator: Arc<QueryOrchestrator>,
    tools: Arc<ToolRegistry>,
}

impl Harness {
    pub fn new(config: Config) -> Result<Self> {
        let parts = Parts::standard(&config)?;
        Self::with_parts(config, parts)
    }

    pub fn with_parts(config: Config, parts: Parts) -> Result<Self> {
        let corpus = &config.corpus;
        let synchronizer = Arc::new(CorpusSynchronizer::new(
            corpus.clone(),
            parts.remote,
            parts.reporter,
        ));
        let directory = Arc::new(DirectoryIndex::new(corpus.manifest_path()));
        let headings = Arc::new(HeadingCache::new(
            corpus.local_root.clone(),
            corpus.ignore_set()?,
            corpus.generation,
            parts.clock.clone(),
        ));
        let cache = Arc::new(ResultCache::new(corpus.cache_dir.clone(), parts.clock));
        let orchestrator = Arc::new(QueryOrchestrator::new(
            corpus.local_root.clone(),
            corpus.generation,
            parts.matcher,
            directory.clone(),
            headings.clone(),
            cache.clone(),
        ));
        let tools = Arc::new(ToolRegistry::with_search(&config.tool));

        Ok(Self {
            config,
            synchronizer,
            directory,
            headings,
            cache,
            orchestrator,
            tools,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<QueryOrchestrator> {
        &self.orchestrator
    }

    pub fn synchronizer(&self) -> &Arc<CorpusSynchronizer> {
        &self.synchronizer
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Creates the corpus root, runs the first sync and loads the manifest.
    /// Only a root that cannot be created is an error.
    pub async fn start(&self) -> Result<SyncOutcome> {
        self.synchronizer.ensure_root().await?;
        let outcome = self.sync_once(false).await;
        if !outcome.changed_corpus() {
            self.directory.load().await;
        }
        Ok(outcome)
    }

    /// Like [`start`](Self::start), but a populated root is used as is and
    /// only an empty one is acquired. Used by one-shot commands.
    pub async fn open(&self) -> Result<()> {
        self.synchronizer.ensure_root().await?;
        if self.synchronizer.state().root_empty {
            self.sync_once(false).await;
        } else {
            self.directory.load().await;
        }
        Ok(())
    }

    /// One sync pass; indexes and cached results are reset when the corpus
    /// changed underneath them.
    pub async fn sync_once(&self, is_refresh: bool) -> SyncOutcome {
        let outcome = self.synchronizer.sync(is_refresh).await;
        if outcome.changed_corpus() {
            self.directory.load().await;
            self.headings.invalidate();
            match self.cache.clear().await {
                Ok(removed) if removed > 0 => info!(removed, "result cache cleared"),
                Ok(_) => {}
                Err(e) => warn!(error = %format!("{:#}", e), "result cache clear failed"),
            }
        }
        outcome
    }

    /// Starts the refresh timer, or returns `None` when refreshing is off.
    /// Ticks missed while a refresh runs are dropped.
    pub fn spawn_refresh_loop(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let minutes = self.config.corpus.refresh_interval_minutes;
        if minutes == 0 {
            return None;
        }
        let period = Duration::from_secs(minutes * 60);
        let harness = Arc::clone(self);
        info!(minutes, "corpus refresh scheduled");
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                harness.sync_once(true).await;
            }
        }))
    }

    pub fn tool_context(&self) -> ToolContext {
        ToolContext::new(self.orchestrator.clone())
    }

    pub fn mcp_bridge(&self) -> McpBridge {
        McpBridge::new(self.tools.clone(), self.tool_context())
    }

    pub fn router(&self) -> axum::Router {
        server::build_router(
            self.tools.clone(),
            self.tool_context(),
            self.synchronizer.clone(),
        )
    }

    pub async fn serve_http(&self) -> Result<()> {
        let bind = &self.config.server.bind;
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .with_context(|| format!("Failed to bind {}", bind))?;
        server::serve(listener, self.router()).await
    }
}
