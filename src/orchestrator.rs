//! Query orchestration.
//!
//! [`QueryOrchestrator`] composes directory scoping, the matcher, ranking,
//! the result cache and output formatting into one call. Its public entry
//! point, [`QueryOrchestrator::execute`], always returns text: failures are
//! rendered as an explanatory message instead of being propagated.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, ResultCache};
use crate::classify::{scope_generation, Generation};
use crate::directory::DirectoryIndex;
use crate::format::{fill_missing_content, parse_matcher_text, render, RenderOptions};
use crate::headings::HeadingCache;
use crate::matcher::{
    estimate_tokens, resolve_in_root, MatchOutput, MatchRequest, Matcher, PathPredicate,
    BYTES_PER_TOKEN,
};
use crate::ranking::RankingContext;

/// Token budget of one result page.
pub const PAGE_TOKEN_BUDGET: usize = 40_000;

const RELATED_SECTIONS: usize = 5;

/// Arguments shared by every caller surface (tool, HTTP, CLI).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchArgs {
    pub query: String,
    pub page: Option<usize>,
    pub include_content: bool,
    pub max_results: Option<usize>,
    pub files_only: bool,
    pub use_json: bool,
    pub session_id: Option<String>,
    pub full_content: bool,
    pub file_path: Option<String>,
}

impl SearchArgs {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// One-based page number; `0` and absent both mean the first page.
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn skip_tokens(&self) -> usize {
        (self.page() - 1) * PAGE_TOKEN_BUDGET
    }
}

/// A heading from the session pre-pass, relative to the corpus root.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedSection {
    pub heading: String,
    pub depth: u8,
    pub file: String,
}

/// Adds the related sections to a JSON response as a `related` array.
/// A body that is not a JSON object is returned unchanged.
fn attach_related(body: &str, related: &[RelatedSection]) -> Result<String> {
    let mut value: serde_json::Value =
        serde_json::from_str(body).context("cached JSON response is malformed")?;
    let Some(object) = value.as_object_mut() else {
        return Ok(body.to_string());
    };
    object.insert("related".to_string(), serde_json::to_value(related)?);
    Ok(serde_json::to_string_pretty(&value)?)
}

pub struct QueryOrchestrator {
    root: PathBuf,
    generation: Generation,
    matcher: Arc<dyn Matcher>,
    directory: Arc<DirectoryIndex>,
    headings: Arc<HeadingCache>,
    cache: Arc<ResultCache>,
}

impl QueryOrchestrator {
    pub fn new(
        root: PathBuf,
        generation: Generation,
        matcher: Arc<dyn Matcher>,
        directory: Arc<DirectoryIndex>,
        headings: Arc<HeadingCache>,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            root,
            generation,
            matcher,
            directory,
            headings,
            cache,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs a request and renders the response. Never fails.
    pub async fn execute(&self, args: &SearchArgs) -> String {
        match self.try_execute(args).await {
            Ok(text) => text,
            Err(e) => {
                warn!(query = %args.query, error = %format!("{:#}", e), "search failed");
                format!("Error searching documentation: {:#}\n", e)
            }
        }
    }

    /// Same as [`execute`](Self::execute) but hands the failure back so a
    /// tool surface can flag it.
    pub async fn try_execute(&self, args: &SearchArgs) -> Result<String> {
        if let Some(path) = args.file_path.as_deref().filter(|p| !p.trim().is_empty()) {
            return self.read_file(path, args.full_content).await;
        }

        let query = args.query.trim();
        if query.is_empty() {
            bail!("query must not be empty");
        }

        let related = match args.session_id.as_deref() {
            Some(session_id) => self.related_sections(query, session_id).await,
            None => Vec::new(),
        };
        let body = self.search(query, args).await?;
        if related.is_empty() {
            return Ok(body);
        }
        if args.use_json {
            return attach_related(&body, &related);
        }

        let mut out = String::from("Related sections:\n");
        for section in &related {
            out.push_str(&format!(
                "- {} {} ({})\n",
                "#".repeat(section.depth as usize),
                section.heading,
                section.file
            ));
        }
        out.push('\n');
        out.push_str(&body);
        Ok(out)
    }

    async fn search(&self, query: &str, args: &SearchArgs) -> Result<String> {
        let key = CacheKey {
            query,
            root: &self.root,
            generation: self.generation,
            max_tokens: PAGE_TOKEN_BUDGET,
            skip_tokens: args.skip_tokens(),
            files_only: args.files_only,
            max_results: args.max_results,
            json: args.use_json,
        };
        // Content responses carry byte and token counts that must match what
        // is on disk now.
        let use_cache = !args.include_content;
        if use_cache {
            if let Some(hit) = self.cache.get(&key).await {
                debug!(query, page = args.page(), "result cache hit");
                return Ok(hit);
            }
        }

        let filter = self.path_filter(query);
        let ranking = RankingContext::new(query, self.generation);
        debug!(
            query,
            intent = ?ranking.intent(),
            target = %ranking.target(),
            "ranking context"
        );
        let request = MatchRequest {
            root: self.root.clone(),
            query: query.to_string(),
            max_tokens: PAGE_TOKEN_BUDGET,
            skip_tokens: args.skip_tokens(),
            filter,
            comparator: Some(ranking.into_comparator()),
            include_content: args.include_content,
            json: args.use_json,
            files_only: args.files_only,
            max_results: args.max_results,
            session_id: args.session_id.clone(),
        };

        let output = self
            .matcher
            .search(request)
            .await
            .context("matcher failed")?;
        let formatted = match output {
            MatchOutput::Json(value) => serde_json::to_string_pretty(&value)?,
            MatchOutput::Text(text) => self.format_text(query, args, text).await,
        };

        if use_cache {
            self.cache.set(&key, &formatted).await;
        }
        info!(query, page = args.page(), bytes = formatted.len(), "search complete");
        Ok(formatted)
    }

    fn path_filter(&self, query: &str) -> Option<PathPredicate> {
        if !self.directory.is_loaded() {
            return None;
        }
        let generation = scope_generation(query, self.generation);
        let filter = self.directory.path_filter(query, generation)?;
        debug!(query, %generation, pages = filter.allowed_len(), "directory scoping");
        Some(Arc::new(move |path: &str| filter.admits(path)))
    }

    async fn format_text(&self, query: &str, args: &SearchArgs, text: String) -> String {
        let Some(mut parsed) = parse_matcher_text(&text) else {
            debug!(query, "matcher output has no markers, returning it raw");
            return text;
        };
        if args.include_content {
            fill_missing_content(&mut parsed, &self.root).await;
        }
        render(
            &parsed,
            &RenderOptions {
                query,
                page: args.page(),
                include_content: args.include_content,
            },
        )
    }

    async fn related_sections(&self, query: &str, session_id: &str) -> Vec<RelatedSection> {
        let entries = match self.headings.find_relevant(query, Some(session_id)).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "heading lookup failed");
                return Vec::new();
            }
        };
        entries
            .iter()
            .take(RELATED_SECTIONS)
            .map(|entry| RelatedSection {
                heading: entry.heading.clone(),
                depth: entry.depth,
                file: entry
                    .file
                    .strip_prefix(&self.root)
                    .unwrap_or(&entry.file)
                    .display()
                    .to_string(),
            })
            .collect()
    }

    async fn read_file(&self, relative: &str, full_content: bool) -> Result<String> {
        let Some(path) = resolve_in_root(&self.root, relative) else {
            bail!("path {} is outside the documentation root", relative);
        };
        let mut text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", relative))?;

        if !full_content && estimate_tokens(text.len()) > PAGE_TOKEN_BUDGET {
            let mut cut = PAGE_TOKEN_BUDGET * BYTES_PER_TOKEN;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str(&format!(
                "\n\n[Truncated at {} tokens. Request again with fullContent=true for the whole file.]",
                PAGE_TOKEN_BUDGET
            ));
        }
        Ok(format!("File: {}\n\n{}\n", relative.trim_start_matches('/'), text))
    }
}
