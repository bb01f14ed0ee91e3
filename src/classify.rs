//! Path, content, and query classification.
//!
//! The directory index, the heading index, and the ranking engine all ask the
//! same questions ("is this a gen1 page?", "does this query ask for CLI
//! usage?"). They must get the same answers or a path can be scoped in by one
//! component and ranked as foreign by another, so every predicate lives here.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Segment that marks the older documentation generation.
pub const GEN1_SEGMENT: &str = "gen1";

/// Generic platform placeholder segment used by the newer generation.
pub const PLATFORM_SEGMENT: &str = "[platform]";

/// Documentation generation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    Gen1,
    Gen2,
    Both,
}

impl Generation {
    /// Whether a classified path belongs to this generation subset.
    ///
    /// Unclassified paths belong to no subset, including `Both`.
    pub fn admits(self, path: &str) -> bool {
        match self {
            Self::Gen1 => is_gen1_path(path),
            Self::Gen2 => is_gen2_path(path),
            Self::Both => is_gen1_path(path) || is_gen2_path(path),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gen1 => "gen1",
            Self::Gen2 => "gen2",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Generation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gen1" => Ok(Self::Gen1),
            "gen2" => Ok(Self::Gen2),
            "both" => Ok(Self::Both),
            other => anyhow::bail!("Unknown generation '{}'. Use gen1, gen2, or both.", other),
        }
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\']).filter(|s| !s.is_empty())
}

fn has_segment(path: &str, wanted: &str) -> bool {
    segments(path).any(|s| s.eq_ignore_ascii_case(wanted))
}

pub fn is_gen1_path(path: &str) -> bool {
    has_segment(path, GEN1_SEGMENT)
}

pub fn is_gen2_path(path: &str) -> bool {
    has_segment(path, PLATFORM_SEGMENT) && !is_gen1_path(path)
}

/// Command reference pages (`cli`, `cli-commands`, ...).
pub fn is_cli_reference_path(path: &str) -> bool {
    segments(path).any(|s| {
        let s = s.to_ascii_lowercase();
        s == "cli" || s.starts_with("cli-")
    })
}

const SETUP_SEGMENTS: &[&str] = &[
    "start",
    "setup",
    "set-up",
    "install",
    "installation",
    "quickstart",
    "getting-started",
    "prerequisites",
];

pub fn is_setup_path(path: &str) -> bool {
    segments(path).any(|s| SETUP_SEGMENTS.contains(&s.to_ascii_lowercase().as_str()))
}

/// Shared snippets and other auxiliary content.
pub fn is_fragment_path(path: &str) -> bool {
    has_segment(path, "fragments")
}

/// The canonical per-platform page tree of either generation.
pub fn is_main_platform_path(path: &str) -> bool {
    has_segment(path, "pages") && has_segment(path, PLATFORM_SEGMENT) && !is_fragment_path(path)
}

/// How a page or section teaches: typed code or shell commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentStyle {
    CodeFirst,
    CommandLine,
}

impl ContentStyle {
    /// The style preferred for examples of a given generation.
    pub fn preferred_for(generation: Generation) -> Self {
        match generation {
            Generation::Gen1 => Self::CommandLine,
            Generation::Gen2 | Generation::Both => Self::CodeFirst,
        }
    }
}

const CODE_FIRST_TEXT: &[&str] = &[
    "defineauth",
    "definedata",
    "definestorage",
    "definefunction",
    "definebackend",
    "resource.ts",
    "backend.ts",
    "```ts",
    "```typescript",
    "npx ampx",
];

const COMMAND_LINE_TEXT: &[&str] = &[
    "amplify add",
    "amplify push",
    "amplify pull",
    "amplify init",
    "amplify update",
    "amplify configure",
    "```bash",
    "```sh",
    "```console",
];

const CODE_FIRST_PATH: &[&str] = &["build-a-backend", "typescript", "resource.ts"];

/// Classifies free text (a section body) by counting style indicators.
pub fn text_style(text: &str) -> Option<ContentStyle> {
    let lower = text.to_lowercase();
    let code = CODE_FIRST_TEXT.iter().filter(|m| lower.contains(*m)).count();
    let cli = COMMAND_LINE_TEXT.iter().filter(|m| lower.contains(*m)).count();
    match code.cmp(&cli) {
        std::cmp::Ordering::Greater => Some(ContentStyle::CodeFirst),
        std::cmp::Ordering::Less => Some(ContentStyle::CommandLine),
        std::cmp::Ordering::Equal => None,
    }
}

/// Classifies a path. Command references win over code markers.
pub fn path_style(path: &str) -> Option<ContentStyle> {
    if is_cli_reference_path(path) {
        return Some(ContentStyle::CommandLine);
    }
    let lower = path.to_lowercase();
    if CODE_FIRST_PATH.iter().any(|m| lower.contains(m)) {
        return Some(ContentStyle::CodeFirst);
    }
    None
}

/// Whether a path carries examples in the style preferred for `generation`,
/// and belongs to that generation.
pub fn is_preferred_example_path(path: &str, generation: Generation) -> bool {
    let in_generation = match generation {
        Generation::Gen1 => is_gen1_path(path),
        Generation::Gen2 | Generation::Both => !is_gen1_path(path),
    };
    in_generation && path_style(path) == Some(ContentStyle::preferred_for(generation))
}

/// Which generations a query names explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationMentions {
    pub gen1: bool,
    pub gen2: bool,
}

static GEN1_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(gen|generation)[\s-]*1\b").expect("valid regex"));
static GEN2_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(gen|generation)[\s-]*2\b").expect("valid regex"));

pub fn generation_mentions(query: &str) -> GenerationMentions {
    GenerationMentions {
        gen1: GEN1_MENTION.is_match(query),
        gen2: GEN2_MENTION.is_match(query),
    }
}

/// The generation a query asks for, if it names one or both.
pub fn explicit_generation(query: &str) -> Option<Generation> {
    match generation_mentions(query) {
        GenerationMentions {
            gen1: true,
            gen2: true,
        } => Some(Generation::Both),
        GenerationMentions { gen1: true, .. } => Some(Generation::Gen1),
        GenerationMentions { gen2: true, .. } => Some(Generation::Gen2),
        _ => None,
    }
}

/// Generation subset used for directory scoping:
/// explicit mention, then configured default (which may be the union).
pub fn scope_generation(query: &str, configured: Generation) -> Generation {
    explicit_generation(query).unwrap_or(configured)
}

/// A single generation used for tie-breaks: explicit mention, then
/// configured default, then the newer generation.
pub fn target_generation(query: &str, configured: Generation) -> Generation {
    match explicit_generation(query) {
        Some(g @ (Generation::Gen1 | Generation::Gen2)) => g,
        _ => match configured {
            Generation::Gen1 => Generation::Gen1,
            _ => Generation::Gen2,
        },
    }
}

/// Lower-cased whitespace tokens longer than two characters.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() > 2)
        .collect()
}

const CLI_PHRASES: &[&str] = &[
    "amplify add",
    "amplify push",
    "amplify pull",
    "amplify init",
    "npx ampx",
    "command line",
    "command-line",
];
const CLI_WORDS: &[&str] = &["cli", "command", "commands", "ampx"];

const CREATE_VERBS: &[&str] = &["create", "add", "configure", "setup"];
const RESOURCES: &[&str] = &["api", "auth", "storage", "function", "database", "model"];

const SETUP_PHRASES: &[&str] = &[
    "setup",
    "set up",
    "install",
    "getting started",
    "get started",
    "quickstart",
    "quick start",
    "prerequisite",
];

/// Coarse purpose of a query, from keyword and phrase matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryIntent {
    pub cli: bool,
    pub resource_creation: bool,
    pub setup: bool,
}

impl QueryIntent {
    pub fn detect(query: &str) -> Self {
        let lower = query.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !(c.is_alphanumeric() || c == '-'))
            .filter(|w| !w.is_empty())
            .collect();

        let cli = CLI_PHRASES.iter().any(|p| lower.contains(p))
            || words.iter().any(|w| CLI_WORDS.contains(w));

        let has_verb = words.iter().any(|w| CREATE_VERBS.contains(w)) || lower.contains("set up");
        let has_resource = words
            .iter()
            .any(|w| RESOURCES.iter().any(|r| w.starts_with(r)));

        Self {
            cli,
            resource_creation: has_verb && has_resource,
            setup: SETUP_PHRASES.iter().any(|p| lower.contains(p)),
        }
    }
}
