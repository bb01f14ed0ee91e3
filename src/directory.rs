//! Page manifest parsing and path scoping.
//!
//! The manifest is a JavaScript module that declares the documentation tree.
//! It is too irregular to deserialize, so paths are pulled out by scanning for
//! `path: '...'` entries. The result is a flat approximation of the tree: one
//! synthetic root whose children are every discovered page. Consumers only
//! need membership tests, so the original hierarchy is not reconstructed.

use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, RwLock};
use tracing::{debug, info, warn};

use crate::classify::{is_gen1_path, is_gen2_path, query_terms, Generation};

/// A page declared by the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageNode {
    pub path: String,
    pub children: Vec<PageNode>,
    pub platforms: Vec<String>,
    pub is_external: bool,
}

/// One manifest parse: the synthetic root plus every reverse index built
/// from it. Replaced as a whole on reload.
#[derive(Debug, Default)]
pub struct FlattenedPaths {
    pub root: PageNode,
    pub pages: BTreeMap<String, PageNode>,
    pub by_platform: HashMap<String, Vec<String>>,
    pub gen1: Vec<String>,
    pub gen2: Vec<String>,
}

static PATH_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']?\bpath["']?\s*:\s*["']([^"'\n]+)["']"#).expect("valid regex")
});
static PLATFORMS_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']?\bplatforms["']?\s*:\s*\[([^\]]*)\]"#).expect("valid regex")
});
static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([^"']+)["']"#).expect("valid regex"));
static EXTERNAL_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']?\bisExternal["']?\s*:\s*true"#).expect("valid regex")
});

fn normalize_path(raw: &str) -> String {
    raw.trim()
        .replace('\\', "/")
        .trim_start_matches("./")
        .trim_start_matches('/')
        .to_string()
}

/// Extracts pages from manifest text. Returns `None` when no page is found.
///
/// Platform tags and the external flag are read from the text between a
/// `path` entry and the next one.
pub fn parse_manifest(text: &str) -> Option<FlattenedPaths> {
    let matches: Vec<_> = PATH_ENTRY.captures_iter(text).collect();
    if matches.is_empty() {
        return None;
    }

    let mut pages = BTreeMap::new();
    let mut order = Vec::new();
    for (i, caps) in matches.iter().enumerate() {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let path = normalize_path(&caps[1]);
        if path.is_empty() || pages.contains_key(&path) {
            continue;
        }

        let window_end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        let window = &text[whole.end()..window_end];

        let platforms = PLATFORMS_ENTRY
            .captures(window)
            .map(|p| {
                QUOTED
                    .captures_iter(&p[1])
                    .map(|q| q[1].trim().to_string())
                    .collect()
            })
            .unwrap_or_default();

        let node = PageNode {
            path: path.clone(),
            children: Vec::new(),
            platforms,
            is_external: EXTERNAL_ENTRY.is_match(window),
        };
        order.push(path.clone());
        pages.insert(path, node);
    }

    let mut by_platform: HashMap<String, Vec<String>> = HashMap::new();
    let mut gen1 = Vec::new();
    let mut gen2 = Vec::new();
    for path in &order {
        let node = &pages[path];
        for platform in &node.platforms {
            by_platform
                .entry(platform.clone())
                .or_default()
                .push(path.clone());
        }
        if is_gen1_path(path) {
            gen1.push(path.clone());
        } else if is_gen2_path(path) {
            gen2.push(path.clone());
        }
    }

    let root = PageNode {
        path: "/".to_string(),
        children: order.iter().map(|p| pages[p].clone()).collect(),
        platforms: Vec::new(),
        is_external: false,
    };

    Some(FlattenedPaths {
        root,
        pages,
        by_platform,
        gen1,
        gen2,
    })
}

/// Case-insensitive substring test against every query term longer than two
/// characters.
pub fn is_path_relevant_for_query(path: &str, query: &str) -> bool {
    path_matches_terms(path, &query_terms(query))
}

fn path_matches_terms(path: &str, terms: &[String]) -> bool {
    let lower = path.to_lowercase();
    terms.iter().any(|t| lower.contains(t.as_str()))
}

/// Manifest-backed path scoping.
pub struct DirectoryIndex {
    manifest_path: PathBuf,
    data: RwLock<Option<Arc<FlattenedPaths>>>,
}

impl DirectoryIndex {
    pub fn new(manifest_path: PathBuf) -> Self {
        Self {
            manifest_path,
            data: RwLock::new(None),
        }
    }

    /// Re-reads the manifest. Returns `true` when pages were found.
    ///
    /// A missing or unparseable manifest clears the index so scoping becomes a
    /// no-op rather than using a previous corpus's pages.
    pub async fn load(&self) -> bool {
        let parsed = match tokio::fs::read_to_string(&self.manifest_path).await {
            Ok(text) => parse_manifest(&text),
            Err(e) => {
                warn!(path = %self.manifest_path.display(), error = %e, "manifest not readable");
                None
            }
        };

        let loaded = parsed.is_some();
        match &parsed {
            Some(data) => info!(
                pages = data.pages.len(),
                gen1 = data.gen1.len(),
                gen2 = data.gen2.len(),
                "directory manifest loaded"
            ),
            None => debug!("directory scoping disabled"),
        }

        let mut slot = self.data.write().unwrap_or_else(|p| p.into_inner());
        *slot = parsed.map(Arc::new);
        loaded
    }

    pub fn snapshot(&self) -> Option<Arc<FlattenedPaths>> {
        self.data.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Pages of the requested generation whose path contains any query term.
    pub fn get_matching_paths(&self, query: &str, generation: Generation) -> Vec<String> {
        let Some(data) = self.snapshot() else {
            return Vec::new();
        };
        let terms = query_terms(query);
        generation_list(&data, generation)
            .filter(|p| path_matches_terms(p, &terms))
            .cloned()
            .collect()
    }

    pub fn get_platform_paths(&self, platform: &str, generation: Generation) -> Vec<String> {
        let Some(data) = self.snapshot() else {
            return Vec::new();
        };
        data.by_platform
            .get(platform)
            .map(|paths| {
                paths
                    .iter()
                    .filter(|p| generation.admits(p))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Builds the matcher pre-filter for a query, or `None` when the manifest
    /// is not loaded or no page matches.
    pub fn path_filter(&self, query: &str, generation: Generation) -> Option<PathFilter> {
        let data = self.snapshot()?;
        let allowed: HashSet<String> = self
            .get_matching_paths(query, generation)
            .into_iter()
            .collect();
        if allowed.is_empty() {
            return None;
        }
        Some(PathFilter {
            allowed,
            known: data,
            generation,
        })
    }
}

fn generation_list(
    data: &FlattenedPaths,
    generation: Generation,
) -> Box<dyn Iterator<Item = &String> + '_> {
    match generation {
        Generation::Gen1 => Box::new(data.gen1.iter()),
        Generation::Gen2 => Box::new(data.gen2.iter()),
        Generation::Both => Box::new(data.gen1.iter().chain(data.gen2.iter())),
    }
}

/// Set-membership predicate handed to the matcher.
///
/// Pages listed in the manifest pass only when they matched the query.
/// Files the manifest does not list (fragments, shared snippets) pass unless
/// they are classified into the other generation.
#[derive(Debug, Clone)]
pub struct PathFilter {
    allowed: HashSet<String>,
    known: Arc<FlattenedPaths>,
    generation: Generation,
}

impl PathFilter {
    pub fn admits(&self, relative_path: &str) -> bool {
        let path = normalize_path(relative_path);
        if self.known.pages.contains_key(&path) {
            return self.allowed.contains(&path);
        }
        match self.generation {
            Generation::Gen1 => !is_gen2_path(&path),
            Generation::Gen2 => !is_gen1_path(&path),
            Generation::Both => true,
        }
    }

    pub fn allowed_len(&self) -> usize {
        self.allowed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
export const directory = {
  path: 'src/pages/index.tsx',
  children: [
    {
      path: 'src/pages/[platform]/index.tsx',
      children: [
        { path: 'src/pages/[platform]/build-a-backend/data/create-api/index.mdx', platforms: ['react', 'vue'] },
        { path: 'src/pages/[platform]/build-a-backend/auth/index.mdx', platforms: ["react"] },
        { path: 'src/pages/[platform]/start/quickstart/index.mdx' },
        { path: 'https://example.com/blog', isExternal: true }
      ]
    },
    {
      path: 'src/pages/gen1/[platform]/index.tsx',
      children: [
        { path: 'src/pages/gen1/[platform]/build-a-backend/graphqlapi/create-api/index.mdx', platforms: ['react'] },
        { path: 'src/pages/gen1/[platform]/tools/cli/index.mdx' }
      ]
    }
  ]
};
"#;

    async fn loaded_index(text: &str) -> (TempDir, DirectoryIndex) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("directory.mjs");
        std::fs::write(&path, text).unwrap();
        let index = DirectoryIndex::new(path);
        assert!(index.load().await);
        (tmp, index)
    }

    #[test]
    fn test_parse_flattens_under_synthetic_root() {
        let data = parse_manifest(MANIFEST).unwrap();
        assert_eq!(data.root.path, "/");
        assert_eq!(data.root.children.len(), data.pages.len());
        assert!(data.root.children.iter().all(|c| c.children.is_empty()));
        assert_eq!(data.pages.len(), 9);
    }

    #[test]
    fn test_parse_metadata() {
        let data = parse_manifest(MANIFEST).unwrap();
        let api = &data.pages["src/pages/[platform]/build-a-backend/data/create-api/index.mdx"];
        assert_eq!(api.platforms, vec!["react", "vue"]);
        assert!(data.pages["https://example.com/blog"].is_external);
        assert_eq!(data.by_platform["react"].len(), 3);
    }

    #[test]
    fn test_classification_lists() {
        let data = parse_manifest(MANIFEST).unwrap();
        assert_eq!(data.gen1.len(), 3);
        assert_eq!(data.gen2.len(), 4);
        assert!(data.pages.contains_key("src/pages/index.tsx"));
        assert!(!data.gen1.contains(&"src/pages/index.tsx".to_string()));
        assert!(!data.gen2.contains(&"src/pages/index.tsx".to_string()));
    }

    #[test]
    fn test_parse_rejects_text_without_paths() {
        assert!(parse_manifest("export default {}").is_none());
    }

    #[tokio::test]
    async fn test_matching_paths_gen2() {
        let (_tmp, index) = loaded_index(MANIFEST).await;
        let paths = index.get_matching_paths("create api", Generation::Gen2);
        assert_eq!(paths.len(), 1);
        for p in &paths {
            assert!(is_gen2_path(p));
            assert!(p.contains("create") || p.contains("api"));
        }
    }

    #[tokio::test]
    async fn test_matching_paths_both_is_union() {
        let (_tmp, index) = loaded_index(MANIFEST).await;
        let gen1 = index.get_matching_paths("create api", Generation::Gen1);
        let gen2 = index.get_matching_paths("create api", Generation::Gen2);
        let both = index.get_matching_paths("create api", Generation::Both);
        assert_eq!(both.len(), gen1.len() + gen2.len());
    }

    #[tokio::test]
    async fn test_matching_paths_empty_without_manifest() {
        let tmp = TempDir::new().unwrap();
        let index = DirectoryIndex::new(tmp.path().join("missing.mjs"));
        assert!(!index.load().await);
        assert!(index.get_matching_paths("create api", Generation::Gen2).is_empty());
        assert!(index.path_filter("create api", Generation::Gen2).is_none());
    }

    #[tokio::test]
    async fn test_reload_replaces_wholesale() {
        let (tmp, index) = loaded_index(MANIFEST).await;
        std::fs::write(tmp.path().join("directory.mjs"), "nothing here").unwrap();
        assert!(!index.load().await);
        assert!(!index.is_loaded());
    }

    #[tokio::test]
    async fn test_platform_paths() {
        let (_tmp, index) = loaded_index(MANIFEST).await;
        assert_eq!(index.get_platform_paths("react", Generation::Gen1).len(), 1);
        assert_eq!(index.get_platform_paths("react", Generation::Both).len(), 3);
        assert!(index.get_platform_paths("swift", Generation::Both).is_empty());
    }

    #[test]
    fn test_path_relevance_is_substring() {
        assert!(!is_path_relevant_for_query(
            "src/pages/[platform]/build-a-backend/auth/index.mdx",
            "AUTHENTICATION"
        ));
        assert!(is_path_relevant_for_query(
            "src/pages/[platform]/build-a-backend/authentication/index.mdx",
            "auth"
        ));
        assert!(!is_path_relevant_for_query("src/pages/x.mdx", "a is"));
    }

    #[tokio::test]
    async fn test_path_filter() {
        let (_tmp, index) = loaded_index(MANIFEST).await;
        let filter = index.path_filter("cli", Generation::Gen1).unwrap();
        assert!(filter.admits("src/pages/gen1/[platform]/tools/cli/index.mdx"));
        // listed but not matching
        assert!(!filter.admits("src/pages/gen1/[platform]/index.tsx"));
        // unlisted gen1 fragment passes, unlisted gen2 page does not
        assert!(filter.admits("src/fragments/gen1/cli-snippet.mdx"));
        assert!(!filter.admits("src/pages/[platform]/reference/cli-commands/index.mdx"));
    }
}
