//! Translation of matcher text output.
//!
//! The matcher's text is only loosely structured. [`parse_matcher_text`] is
//! the one place that scans it, looking for the `File:` and summary markers;
//! everything else works on [`ParsedOutput`].

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

use crate::matcher::resolve_in_root;

const FILE_MARKER: &str = "File: ";
const CONTENT_MARKER: &str = "Content:";

static FOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Found (\d+) search results").expect("valid regex"));
static TOTAL_BYTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Total bytes returned: (\d+)").expect("valid regex"));
static TOTAL_TOKENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Total tokens returned: (\d+)").expect("valid regex"));
static SKIPPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Skipped files due to limits: (\d+)").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSection {
    pub path: String,
    /// Match lines between the `File:` marker and the content section.
    pub matches: String,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub result_count: usize,
    pub total_bytes: Option<usize>,
    pub total_tokens: Option<usize>,
    pub skipped_files: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub files: Vec<FileSection>,
    pub summary: Summary,
}

fn capture_number(re: &Regex, line: &str) -> Option<usize> {
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

fn close_section(files: &mut Vec<FileSection>, path: Option<String>, lines: &[&str]) {
    let Some(path) = path else {
        return;
    };
    let split = lines.iter().position(|l| l.trim_end() == CONTENT_MARKER);
    let (matches, content) = match split {
        Some(at) => (&lines[..at], Some(lines[at + 1..].join("\n").trim_end().to_string())),
        None => (lines, None),
    };
    files.push(FileSection {
        path,
        matches: matches.join("\n").trim().to_string(),
        content,
    });
}

/// Scans matcher text for file sections and summary counters.
///
/// Returns `None` when neither a `File:` marker nor a result count is
/// present; callers then fall back to the raw text.
pub fn parse_matcher_text(text: &str) -> Option<ParsedOutput> {
    let mut files = Vec::new();
    let mut summary = Summary::default();
    let mut found = None;
    let mut current: Option<String> = None;
    let mut lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(path) = line.strip_prefix(FILE_MARKER) {
            close_section(&mut files, current.take(), &lines);
            lines.clear();
            current = Some(path.trim().to_string());
        } else if let Some(n) = capture_number(&FOUND, line) {
            close_section(&mut files, current.take(), &lines);
            lines.clear();
            found = Some(n);
        } else if let Some(n) = capture_number(&TOTAL_BYTES, line) {
            summary.total_bytes = Some(n);
        } else if let Some(n) = capture_number(&TOTAL_TOKENS, line) {
            summary.total_tokens = Some(n);
        } else if let Some(n) = capture_number(&SKIPPED, line) {
            summary.skipped_files = n;
        } else if current.is_some() {
            lines.push(line);
        }
    }
    close_section(&mut files, current.take(), &lines);

    if files.is_empty() && found.is_none() {
        return None;
    }
    summary.result_count = found.unwrap_or(files.len());
    Some(ParsedOutput { files, summary })
}

/// Reads the file behind every section that has no content section.
pub async fn fill_missing_content(parsed: &mut ParsedOutput, root: &Path) {
    for section in parsed.files.iter_mut().filter(|s| s.content.is_none()) {
        let Some(path) = resolve_in_root(root, &section.path) else {
            continue;
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => section.content = Some(text.trim_end().to_string()),
            Err(e) => debug!(path = %path.display(), error = %e, "content fallback read failed"),
        }
    }
}

pub struct RenderOptions<'a> {
    pub query: &'a str,
    pub page: usize,
    pub include_content: bool,
}

pub fn render(parsed: &ParsedOutput, opts: &RenderOptions<'_>) -> String {
    if parsed.files.is_empty() {
        return format!("No results found for \"{}\" (page {}).\n", opts.query, opts.page);
    }

    let mut out = format!(
        "Search results for \"{}\" (page {}):\n\n",
        opts.query, opts.page
    );
    for section in &parsed.files {
        out.push_str(FILE_MARKER);
        out.push_str(&section.path);
        out.push('\n');
        if !section.matches.is_empty() {
            out.push_str(&section.matches);
            out.push('\n');
        }
        if opts.include_content {
            if let Some(content) = &section.content {
                out.push_str(CONTENT_MARKER);
                out.push('\n');
                out.push_str(content);
                out.push('\n');
            }
        }
        out.push('\n');
    }

    let summary = &parsed.summary;
    out.push_str(&format!("Found {} search results\n", summary.result_count));
    if let Some(bytes) = summary.total_bytes {
        out.push_str(&format!("Total bytes returned: {}\n", bytes));
    }
    if let Some(tokens) = summary.total_tokens {
        out.push_str(&format!("Total tokens returned: {}\n", tokens));
    }
    if summary.skipped_files > 0 {
        out.push_str(&format!(
            "Skipped files due to limits: {} (request page {} for more)\n",
            summary.skipped_files,
            opts.page + 1
        ));
    }
    out
}
