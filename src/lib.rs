//! # Docs Harness
//!
//! A self-refreshing documentation corpus with generation-aware search,
//! served to AI tools over MCP and HTTP.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────────┐    ┌─────────────┐
//! │  Git remote  │───▶│ CorpusSynchronizer│───▶│ local corpus │
//! │ clone/archive│    │ stage, prune, swap│    │   (files)    │
//! └──────────────┘    └──────────────────┘    └──────┬──────┘
//!                                                    │
//!          ┌──────────────┬──────────────┬───────────┤
//!          ▼              ▼              ▼           ▼
//!   DirectoryIndex   HeadingIndex     Matcher    ResultCache
//!          └──────────────┴──────┬───────┴───────────┘
//!                                ▼
//!                       QueryOrchestrator ◀── RankingEngine
//!                                │
//!                  ┌─────────────┼─────────────┐
//!                  ▼             ▼             ▼
//!               CLI (docsh)   HTTP (axum)   MCP (rmcp)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docsh sync                          # acquire the corpus
//! docsh search "gen1 cli add auth"    # ranked results on stdout
//! docsh serve mcp                     # MCP over stdio
//! docsh serve http                    # REST + /mcp on [server].bind
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Layered configuration (defaults, TOML, env, CLI) |
//! | [`classify`] | Path and query predicates shared by filter and rank |
//! | [`sync`] | Corpus acquisition, refresh and generation pruning |
//! | [`progress`] | Sync events and reporters |
//! | [`directory`] | Manifest parsing and path scoping |
//! | [`headings`] | Heading extraction and keyword index |
//! | [`cache`] | On-disk result cache |
//! | [`ranking`] | Tie-break comparator |
//! | [`matcher`] | Full-text matcher boundary and built-in scanner |
//! | [`format`] | Matcher output parsing and rendering |
//! | [`orchestrator`] | Query execution |
//! | [`tool`] | Tool trait and registry |
//! | [`mcp`] | MCP bridge |
//! | [`server`] | HTTP façade |
//! | [`harness`] | Application wiring |

pub mod cache;
pub mod classify;
pub mod clock;
pub mod config;
pub mod directory;
pub mod format;
pub mod harness;
pub mod headings;
pub mod logging;
pub mod matcher;
pub mod mcp;
pub mod orchestrator;
pub mod progress;
pub mod ranking;
pub mod server;
pub mod sync;
pub mod tool;
