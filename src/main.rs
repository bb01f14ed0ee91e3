//! # Docs Harness CLI (`docsh`)
//!
//! The `docsh` binary keeps a local documentation corpus in sync with its
//! remote and serves generation-aware search over MCP, HTTP, or one-shot
//! terminal queries.
//!
//! ## Usage
//!
//! ```bash
//! docsh --config ./config/docsh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsh serve mcp` | MCP server on stdio |
//! | `docsh serve http` | REST API plus streamable MCP at `/mcp` |
//! | `docsh search "<query>"` | Search the corpus and print the result |
//! | `docsh sync` | Run one synchronization pass |
//! | `docsh cache clear` | Remove every cached search result |
//!
//! Settings come from defaults, then the config file, then `DOCSH_*`
//! environment variables, then the flags below.

use clap::{Parser, Subcommand};
use docs_harness::classify::Generation;
use docs_harness::config::{self, RawConfig};
use docs_harness::harness::Harness;
use docs_harness::logging;
use docs_harness::orchestrator::SearchArgs;
use docs_harness::progress::SyncOutcome;
use std::path::PathBuf;
use std::sync::Arc;

/// Docs Harness CLI: a self-refreshing documentation corpus with
/// generation-aware search for AI tools.
#[derive(Parser)]
#[command(
    name = "docsh",
    about = "Docs Harness: a self-refreshing documentation corpus with generation-aware search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults to `./config/docsh.toml`
    /// when that file exists.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Remote repository URL of the documentation corpus.
    #[arg(long, global = true)]
    repo_url: Option<String>,

    /// Branch or tag to track.
    #[arg(long, global = true)]
    git_ref: Option<String>,

    /// Minutes between refreshes; 0 disables refreshing and uses snapshots.
    #[arg(long, global = true)]
    refresh_interval: Option<u64>,

    /// Local directory holding the corpus.
    #[arg(long, global = true)]
    local_root: Option<PathBuf>,

    /// Documentation generation to serve: gen1, gen2 or both.
    #[arg(long, global = true)]
    generation: Option<Generation>,

    /// Directory for cached search results.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Directory manifest, relative to the corpus root.
    #[arg(long, global = true)]
    manifest: Option<PathBuf>,

    /// Glob excluded from search and the heading index. Repeatable; replaces
    /// the configured list.
    #[arg(long = "ignore", value_name = "GLOB", global = true)]
    ignore: Vec<String>,

    /// Name the search tool is published under.
    #[arg(long, global = true)]
    tool_name: Option<String>,

    /// Description the search tool is published with.
    #[arg(long, global = true)]
    tool_description: Option<String>,

    /// Address for `serve http`.
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn overrides(&self) -> RawConfig {
        let mut raw = RawConfig::default();
        raw.corpus.repo_url = self.repo_url.clone();
        raw.corpus.git_ref = self.git_ref.clone();
        raw.corpus.refresh_interval_minutes = self.refresh_interval;
        raw.corpus.local_root = self.local_root.clone();
        raw.corpus.generation = self.generation;
        raw.corpus.cache_dir = self.cache_dir.clone();
        raw.corpus.manifest = self.manifest.clone();
        if !self.ignore.is_empty() {
            raw.corpus.ignore = Some(self.ignore.clone());
        }
        raw.tool.name = self.tool_name.clone();
        raw.tool.description = self.tool_description.clone();
        raw.server.bind = self.bind.clone();
        raw
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start a server.
    ///
    /// Acquires the corpus, schedules refreshes when an interval is set,
    /// then serves until stopped.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },

    /// Search the corpus and print the formatted result.
    ///
    /// Uses the local corpus as is when it is populated; an empty corpus is
    /// acquired first.
    Search {
        /// The search query. Mention gen1 or gen2 to target a generation.
        query: String,

        /// Result page, starting at 1.
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Include file content with each result.
        #[arg(long)]
        include_content: bool,

        /// Print only matching file paths.
        #[arg(long)]
        files_only: bool,

        /// Print the matcher's JSON output.
        #[arg(long)]
        json: bool,

        /// Maximum number of files to return.
        #[arg(long)]
        max_results: Option<usize>,

        /// Correlation id; adds related sections from the heading index.
        #[arg(long)]
        session_id: Option<String>,
    },

    /// Run one synchronization pass and print its outcome.
    Sync,

    /// Manage the search result cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// MCP over stdin/stdout.
    Mcp,
    /// HTTP API on `[server].bind`, with MCP mounted at `/mcp`.
    Http,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every cached result.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    });

    let cfg = config::load_config(cli.config.as_deref(), std::env::vars(), cli.overrides())?;

    match cli.command {
        Commands::Serve { service } => {
            let harness = Arc::new(Harness::new(cfg)?);
            harness.start().await?;
            let _refresh = harness.spawn_refresh_loop();
            match service {
                ServeService::Mcp => harness.mcp_bridge().serve_stdio().await?,
                ServeService::Http => harness.serve_http().await?,
            }
        }
        Commands::Search {
            query,
            page,
            include_content,
            files_only,
            json,
            max_results,
            session_id,
        } => {
            let harness = Harness::new(cfg)?;
            harness.open().await?;
            let args = SearchArgs {
                page: Some(page),
                include_content,
                files_only,
                use_json: json,
                max_results,
                session_id,
                ..SearchArgs::new(query)
            };
            println!("{}", harness.orchestrator().execute(&args).await);
        }
        Commands::Sync => {
            let harness = Harness::new(cfg)?;
            let outcome = harness.start().await?;
            let state = harness.synchronizer().state();
            println!("{}", serde_json::to_string_pretty(&state)?);
            if matches!(outcome, SyncOutcome::Failed | SyncOutcome::Placeholder) {
                std::process::exit(1);
            }
        }
        Commands::Cache {
            action: CacheAction::Clear,
        } => {
            let harness = Harness::new(cfg)?;
            let removed = harness.cache().clear().await?;
            println!(
                "Removed {} cached result(s) from {}",
                removed,
                harness.cache().dir().display()
            );
        }
    }

    Ok(())
}
