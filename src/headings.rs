//! Heading outline and keyword index over the corpus.
//!
//! Every text file is split into sections at heading lines (`#` to
//! `######`). Heading words become keys of an inverted index that answers
//! "which sections talk about this?" for the related-sections preamble.
//! The index is rebuilt wholesale; a global copy and per-session snapshots
//! are kept for an hour each.

use anyhow::{Context, Result};
use chrono::Duration;
use globset::GlobSet;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::classify::{
    path_style, query_terms, target_generation, text_style, ContentStyle, Generation, QueryIntent,
};
use crate::clock::{Clock, TtlCell};

pub const INDEX_TTL_MINUTES: i64 = 60;
pub const SESSION_TTL_MINUTES: i64 = 60;

const TEXT_EXTENSIONS: &[&str] = &["md", "mdx", "txt"];

static HEADING_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})[ \t]+(.+)$").expect("valid regex"));

/// A heading and the text under it, up to the next heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingEntry {
    pub file: PathBuf,
    pub heading: String,
    pub depth: u8,
    pub body: String,
}

pub fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TEXT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn extract_headings(file: &Path, text: &str) -> Vec<HeadingEntry> {
    let mut entries = Vec::new();
    let mut current: Option<(String, u8)> = None;
    let mut body: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(caps) = HEADING_LINE.captures(line) {
            push_section(&mut entries, file, current.take(), &body);
            body.clear();
            current = Some((caps[2].trim().to_string(), caps[1].len() as u8));
        } else if current.is_some() {
            body.push(line);
        }
    }
    push_section(&mut entries, file, current, &body);
    entries
}

fn push_section(
    entries: &mut Vec<HeadingEntry>,
    file: &Path,
    section: Option<(String, u8)>,
    body: &[&str],
) {
    if let Some((heading, depth)) = section {
        entries.push(HeadingEntry {
            file: file.to_path_buf(),
            heading,
            depth,
            body: body.join("\n").trim().to_string(),
        });
    }
}

fn heading_keywords(heading: &str) -> HashSet<String> {
    query_terms(heading).into_iter().collect()
}

/// Inverted index from heading keyword to the sections carrying it.
#[derive(Debug, Default)]
pub struct HeadingIndex {
    keywords: HashMap<String, Vec<Arc<HeadingEntry>>>,
    entries: usize,
}

impl HeadingIndex {
    pub fn from_entries(entries: impl IntoIterator<Item = HeadingEntry>) -> Self {
        let mut index = Self::default();
        for entry in entries {
            let entry = Arc::new(entry);
            for keyword in heading_keywords(&entry.heading) {
                index
                    .keywords
                    .entry(keyword)
                    .or_default()
                    .push(entry.clone());
            }
            index.entries += 1;
        }
        index
    }

    /// Scans every text file under `root` that the ignore set does not match.
    pub fn build(root: &Path, ignore: &GlobSet) -> Result<Self> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(root).into_iter().filter_entry(|e| e.file_name() != ".git") {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            if !entry.file_type().is_file() || !is_text_file(entry.path()) {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            if ignore.is_match(relative) {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            entries.extend(extract_headings(entry.path(), &text));
        }
        Ok(Self::from_entries(entries))
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn keyword_count(&self) -> usize {
        self.keywords.len()
    }

    /// Union of sections across every query keyword, deduplicated by
    /// `(file, heading)`, in first-seen order.
    pub fn lookup(&self, query: &str) -> Vec<Arc<HeadingEntry>> {
        let mut seen: HashSet<(PathBuf, String)> = HashSet::new();
        let mut out = Vec::new();
        for term in query_terms(query) {
            let Some(list) = self.keywords.get(&term) else {
                continue;
            };
            for entry in list {
                if seen.insert((entry.file.clone(), entry.heading.clone())) {
                    out.push(entry.clone());
                }
            }
        }
        out
    }
}

fn entry_style(entry: &HeadingEntry) -> Option<ContentStyle> {
    text_style(&entry.body).or_else(|| path_style(&entry.file.to_string_lossy()))
}

/// Orders lookup results for a query.
///
/// Setup and resource-creation queries put sections in the style preferred
/// for the query's generation first, then shallower headings. Everything else
/// is ordered by depth alone.
pub fn order_entries(entries: &mut [Arc<HeadingEntry>], query: &str, configured: Generation) {
    let intent = QueryIntent::detect(query);
    if intent.setup || intent.resource_creation {
        let preferred = ContentStyle::preferred_for(target_generation(query, configured));
        entries.sort_by(|a, b| {
            let a_miss = entry_style(a) != Some(preferred);
            let b_miss = entry_style(b) != Some(preferred);
            a_miss
                .cmp(&b_miss)
                .then(a.depth.cmp(&b.depth))
                .then_with(|| a.file.cmp(&b.file))
                .then_with(|| a.heading.cmp(&b.heading))
        });
    } else {
        entries.sort_by(|a, b| {
            a.depth
                .cmp(&b.depth)
                .then_with(|| a.file.cmp(&b.file))
                .then_with(|| a.heading.cmp(&b.heading))
        });
    }
}

/// Time-bounded holder for the global index and per-session snapshots.
pub struct HeadingCache {
    root: PathBuf,
    ignore: GlobSet,
    generation: Generation,
    clock: Arc<dyn Clock>,
    global: Mutex<TtlCell<Arc<HeadingIndex>>>,
    sessions: Mutex<HashMap<String, TtlCell<Arc<HeadingIndex>>>>,
    build_lock: tokio::sync::Mutex<()>,
}

impl HeadingCache {
    pub fn new(root: PathBuf, ignore: GlobSet, generation: Generation, clock: Arc<dyn Clock>) -> Self {
        Self {
            root,
            ignore,
            generation,
            clock,
            global: Mutex::new(TtlCell::new(Duration::minutes(INDEX_TTL_MINUTES))),
            sessions: Mutex::new(HashMap::new()),
            build_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn session_snapshot(&self, session_id: &str) -> Option<Arc<HeadingIndex>> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        sessions.retain(|_, cell| cell.get(now).is_some());
        sessions.get(session_id).and_then(|cell| cell.get(now))
    }

    fn fresh_global(&self) -> Option<Arc<HeadingIndex>> {
        let now = self.clock.now();
        self.global
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(now)
    }

    /// Returns the session snapshot if still fresh, otherwise the global index
    /// (rebuilt when stale). A session id pins the returned index as its
    /// snapshot.
    pub async fn get_or_build(&self, session_id: Option<&str>) -> Result<Arc<HeadingIndex>> {
        if let Some(index) = session_id.and_then(|id| self.session_snapshot(id)) {
            return Ok(index);
        }

        let index = match self.fresh_global() {
            Some(index) => index,
            None => {
                let _guard = self.build_lock.lock().await;
                match self.fresh_global() {
                    Some(index) => index,
                    None => self.rebuild().await?,
                }
            }
        };

        if let Some(id) = session_id {
            let mut cell = TtlCell::new(Duration::minutes(SESSION_TTL_MINUTES));
            cell.set(index.clone(), self.clock.now());
            self.sessions
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .insert(id.to_string(), cell);
        }
        Ok(index)
    }

    async fn rebuild(&self) -> Result<Arc<HeadingIndex>> {
        let root = self.root.clone();
        let ignore = self.ignore.clone();
        let index = tokio::task::spawn_blocking(move || HeadingIndex::build(&root, &ignore))
            .await
            .context("heading index build task failed")??;
        info!(
            sections = index.len(),
            keywords = index.keyword_count(),
            "heading index built"
        );
        let index = Arc::new(index);
        self.global
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .set(index.clone(), self.clock.now());
        Ok(index)
    }

    pub async fn find_relevant(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<Arc<HeadingEntry>>> {
        let index = self.get_or_build(session_id).await?;
        let mut entries = index.lookup(query);
        order_entries(&mut entries, query, self.generation);
        debug!(query, matches = entries.len(), "related headings");
        Ok(entries)
    }

    /// Drops the global index and every session snapshot.
    pub fn invalidate(&self) {
        self.global
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}
