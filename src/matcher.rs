//! Full-text matcher boundary.
//!
//! The orchestrator drives any [`Matcher`] through a [`MatchRequest`] and
//! reads its text output only through the markers documented in
//! [`crate::format`]. [`ScanMatcher`] is the built-in implementation: a
//! direct walk of the corpus with boolean term matching.

use anyhow::{Context, Result};
use async_trait::async_trait;
use globset::GlobSet;
use regex::Regex;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use walkdir::WalkDir;

use crate::headings::is_text_file;
use crate::ranking::{Comparator, MatchCandidate};

pub type PathPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Roughly four bytes of text per model token.
pub const BYTES_PER_TOKEN: usize = 4;

const MAX_SNIPPET_LINES: usize = 8;

pub fn estimate_tokens(bytes: usize) -> usize {
    bytes.div_ceil(BYTES_PER_TOKEN)
}

/// Everything a matcher needs for one call.
#[derive(Clone)]
pub struct MatchRequest {
    pub root: PathBuf,
    pub query: String,
    pub max_tokens: usize,
    pub skip_tokens: usize,
    /// Receives paths relative to `root`, `/`-separated.
    pub filter: Option<PathPredicate>,
    pub comparator: Option<Comparator>,
    pub include_content: bool,
    pub json: bool,
    pub files_only: bool,
    pub max_results: Option<usize>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutput {
    Text(String),
    Json(serde_json::Value),
}

#[async_trait]
pub trait Matcher: Send + Sync {
    async fn search(&self, request: MatchRequest) -> Result<MatchOutput>;
}

/// A parsed boolean query.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TermQuery {
    /// At least one of these must match (when `required` is empty).
    pub any: Vec<String>,
    pub required: Vec<String>,
    pub excluded: Vec<String>,
}

static QUERY_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"|(\S+)"#).expect("valid regex"));

impl TermQuery {
    /// Supports bare terms (OR), `+term` and `a AND b` (required),
    /// `-term` and `NOT term` (excluded), and `"quoted phrases"`.
    pub fn parse(query: &str) -> Self {
        let mut parsed = Self::default();
        let mut pending_and = false;
        let mut pending_not = false;

        for caps in QUERY_TOKEN.captures_iter(query) {
            let (raw, quoted) = match (caps.get(1), caps.get(2)) {
                (Some(phrase), _) => (phrase.as_str(), true),
                (None, Some(word)) => (word.as_str(), false),
                _ => continue,
            };

            if !quoted {
                match raw {
                    "AND" => {
                        if let Some(last) = parsed.any.pop() {
                            parsed.required.push(last);
                        }
                        pending_and = true;
                        continue;
                    }
                    "OR" => continue,
                    "NOT" => {
                        pending_not = true;
                        continue;
                    }
                    _ => {}
                }
            }

            let (term, excluded, required) = match raw.chars().next() {
                Some('-') if !quoted => (&raw[1..], true, false),
                Some('+') if !quoted => (&raw[1..], false, true),
                _ => (raw, false, false),
            };
            let term = term.trim().to_lowercase();
            if term.is_empty() {
                continue;
            }

            if excluded || pending_not {
                parsed.excluded.push(term);
            } else if required || pending_and {
                parsed.required.push(term);
            } else {
                parsed.any.push(term);
            }
            pending_and = false;
            pending_not = false;
        }
        parsed
    }

    pub fn is_empty(&self) -> bool {
        self.any.is_empty() && self.required.is_empty()
    }

    fn positive(&self) -> impl Iterator<Item = &String> {
        self.required.iter().chain(self.any.iter())
    }

    /// Hit count for a lower-cased document, or `None` when it does not
    /// satisfy the query.
    pub fn score(&self, lower: &str) -> Option<usize> {
        if self.excluded.iter().any(|t| lower.contains(t.as_str())) {
            return None;
        }
        if !self.required.iter().all(|t| lower.contains(t.as_str())) {
            return None;
        }
        let count: usize = self.positive().map(|t| lower.matches(t.as_str()).count()).sum();
        (count > 0).then_some(count)
    }
}

/// Walks the corpus directly. Suitable for corpora of a few thousand pages.
pub struct ScanMatcher {
    ignore: GlobSet,
}

impl ScanMatcher {
    pub fn new(ignore: GlobSet) -> Self {
        Self { ignore }
    }
}

#[async_trait]
impl Matcher for ScanMatcher {
    async fn search(&self, request: MatchRequest) -> Result<MatchOutput> {
        let ignore = self.ignore.clone();
        tokio::task::spawn_blocking(move || scan(&request, &ignore))
            .await
            .context("matcher task failed")?
    }
}

struct Hit {
    candidate: MatchCandidate,
    text: String,
}

fn collect_hits(request: &MatchRequest, query: &TermQuery, ignore: &GlobSet) -> Result<Vec<Hit>> {
    let root = &request.root;
    let mut hits = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
    {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() || !is_text_file(entry.path()) {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if ignore.is_match(relative) {
            continue;
        }
        let rel = relative.to_string_lossy().replace('\\', "/");
        if let Some(filter) = &request.filter {
            if !filter(&rel) {
                continue;
            }
        }
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        if let Some(count) = query.score(&text.to_lowercase()) {
            hits.push(Hit {
                candidate: MatchCandidate::new(rel, count),
                text,
            });
        }
    }
    Ok(hits)
}

fn snippet(text: &str, query: &TermQuery) -> String {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let lower = line.to_lowercase();
            query.positive().any(|t| lower.contains(t.as_str()))
        })
        .take(MAX_SNIPPET_LINES)
        .map(|(i, line)| format!("{:>5}: {}", i + 1, line.trim_end()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_section(hit: &Hit, snippet: &str, request: &MatchRequest) -> String {
    let mut section = format!("File: {}\n", hit.candidate.path);
    if request.files_only {
        return section;
    }
    section.push_str(&format!("Matches: {}\n", hit.candidate.match_count));
    if !snippet.is_empty() {
        section.push_str("```\n");
        section.push_str(snippet);
        section.push_str("\n```\n");
    }
    if request.include_content {
        section.push_str("Content:\n");
        section.push_str(hit.text.trim_end());
        section.push('\n');
    }
    section.push('\n');
    section
}

/// Assigns each section to a page: a page closes when the next section would
/// overflow the token budget or the result cap. A section larger than the
/// budget gets a page to itself.
fn assign_pages(token_sizes: &[usize], budget: usize, max_results: Option<usize>) -> Vec<usize> {
    let mut pages = Vec::with_capacity(token_sizes.len());
    let mut page = 0;
    let mut used = 0;
    let mut count = 0;
    for &tokens in token_sizes {
        let over_budget = budget > 0 && used + tokens > budget;
        let over_count = max_results.is_some_and(|m| count >= m.max(1));
        if count > 0 && (over_budget || over_count) {
            page += 1;
            used = 0;
            count = 0;
        }
        pages.push(page);
        used += tokens;
        count += 1;
    }
    pages
}

fn scan(request: &MatchRequest, ignore: &GlobSet) -> Result<MatchOutput> {
    let query = TermQuery::parse(&request.query);
    let mut hits = if query.is_empty() {
        Vec::new()
    } else {
        collect_hits(request, &query, ignore)?
    };

    match &request.comparator {
        Some(cmp) => hits.sort_by(|a, b| cmp(&a.candidate, &b.candidate)),
        None => hits.sort_by(|a, b| {
            b.candidate
                .match_count
                .cmp(&a.candidate.match_count)
                .then_with(|| a.candidate.path.cmp(&b.candidate.path))
        }),
    }

    let snippets: Vec<String> = hits.iter().map(|h| snippet(&h.text, &query)).collect();
    let sections: Vec<String> = hits
        .iter()
        .zip(&snippets)
        .map(|(hit, snip)| render_section(hit, snip, request))
        .collect();
    let sizes: Vec<usize> = sections.iter().map(|s| estimate_tokens(s.len())).collect();
    let pages = assign_pages(&sizes, request.max_tokens, request.max_results);
    let wanted = if request.max_tokens == 0 {
        0
    } else {
        request.skip_tokens / request.max_tokens
    };

    let emitted: Vec<usize> = (0..hits.len()).filter(|&i| pages[i] == wanted).collect();
    let skipped = pages.iter().filter(|&&p| p > wanted).count();
    let total_bytes: usize = emitted.iter().map(|&i| sections[i].len()).sum();
    let total_tokens: usize = emitted.iter().map(|&i| sizes[i]).sum();

    if request.json {
        let results: Vec<_> = emitted
            .iter()
            .map(|&i| {
                let hit = &hits[i];
                let mut item = json!({
                    "file": hit.candidate.path,
                    "matches": hit.candidate.match_count,
                });
                if !request.files_only {
                    item["snippet"] = json!(snippets[i]);
                }
                if request.include_content {
                    item["content"] = json!(hit.text);
                }
                item
            })
            .collect();
        return Ok(MatchOutput::Json(json!({
            "results": results,
            "summary": {
                "count": emitted.len(),
                "total_bytes": total_bytes,
                "total_tokens": total_tokens,
                "skipped_files": skipped,
            }
        })));
    }

    let mut out = String::new();
    for &i in &emitted {
        out.push_str(&sections[i]);
    }
    out.push_str(&format!("Found {} search results\n", emitted.len()));
    out.push_str(&format!("Total bytes returned: {}\n", total_bytes));
    out.push_str(&format!("Total tokens returned: {}\n", total_tokens));
    if skipped > 0 {
        out.push_str(&format!("Skipped files due to limits: {}\n", skipped));
    }
    Ok(MatchOutput::Text(out))
}

/// Resolves `relative` under `root`, refusing anything that escapes it.
pub fn resolve_in_root(root: &Path, relative: &str) -> Option<PathBuf> {
    use std::path::Component;
    let candidate = Path::new(relative.trim_start_matches('/'));
    if candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    Some(root.join(candidate))
}
