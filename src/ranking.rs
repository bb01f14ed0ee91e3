//! Query-aware ordering of match candidates.
//!
//! Ranking is a lexicographic comparison of a per-candidate key. Each key
//! component is one rung of the tie-break ladder, so a later rung only
//! matters when every earlier rung ties, and the order is transitive by
//! construction.

use std::cmp::{Ordering, Reverse};
use std::sync::Arc;

use crate::classify::{
    generation_mentions, is_cli_reference_path, is_gen1_path, is_gen2_path,
    is_main_platform_path, is_preferred_example_path, is_setup_path, target_generation,
    Generation, GenerationMentions, QueryIntent,
};

/// A file the matcher found, with its raw hit count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCandidate {
    pub path: String,
    pub match_count: usize,
}

impl MatchCandidate {
    pub fn new(path: impl Into<String>, match_count: usize) -> Self {
        Self {
            path: path.into(),
            match_count,
        }
    }
}

/// Shared comparator handed to the matcher.
pub type Comparator = Arc<dyn Fn(&MatchCandidate, &MatchCandidate) -> Ordering + Send + Sync>;

/// Per-query values derived once and reused for every comparison.
#[derive(Debug, Clone)]
pub struct RankingContext {
    query_lower: String,
    mentions: GenerationMentions,
    intent: QueryIntent,
    target: Generation,
}

/// `false` sorts first, so every flag below reads "misses the preference".
type RankKey<'a> = (bool, bool, bool, bool, u8, bool, Reverse<usize>, &'a str);

impl RankingContext {
    pub fn new(query: &str, configured: Generation) -> Self {
        Self {
            query_lower: query.trim().to_lowercase(),
            mentions: generation_mentions(query),
            intent: QueryIntent::detect(query),
            target: target_generation(query, configured),
        }
    }

    pub fn intent(&self) -> QueryIntent {
        self.intent
    }

    pub fn target(&self) -> Generation {
        self.target
    }

    fn in_target_generation(&self, path: &str) -> bool {
        match self.target {
            Generation::Gen1 => is_gen1_path(path),
            _ => !is_gen1_path(path),
        }
    }

    fn generation_rank(&self, path: &str) -> u8 {
        let (preferred, other) = if self.mentions.gen1 {
            (is_gen1_path(path), is_gen2_path(path))
        } else {
            (is_gen2_path(path), is_gen1_path(path))
        };
        match (preferred, other) {
            (true, _) => 0,
            (false, false) => 1,
            (false, true) => 2,
        }
    }

    fn key<'a>(&self, c: &'a MatchCandidate) -> RankKey<'a> {
        let path = c.path.as_str();
        let cli_miss = self.intent.cli
            && !(is_cli_reference_path(path) && self.in_target_generation(path));
        let example_miss =
            self.intent.resource_creation && !is_preferred_example_path(path, self.target);
        let setup_miss = self.intent.setup && !is_setup_path(path);
        let main_miss = !is_main_platform_path(path);
        let literal_miss = !path.to_lowercase().contains(&self.query_lower);
        (
            cli_miss,
            example_miss,
            setup_miss,
            main_miss,
            self.generation_rank(path),
            literal_miss,
            Reverse(c.match_count),
            path,
        )
    }

    /// `Less` means `a` ranks ahead of `b`.
    pub fn compare(&self, a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
        self.key(a).cmp(&self.key(b))
    }

    pub fn into_comparator(self) -> Comparator {
        Arc::new(move |a, b| self.compare(a, b))
    }

    pub fn sort(&self, candidates: &mut [MatchCandidate]) {
        candidates.sort_by(|a, b| self.compare(a, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEN1_CLI: &str = "src/pages/gen1/[platform]/tools/cli/index.mdx";
    const GEN2_CLI: &str = "src/pages/[platform]/reference/cli-commands/index.mdx";
    const GEN2_DATA: &str = "src/pages/[platform]/build-a-backend/data/index.mdx";
    const GEN1_API: &str = "src/pages/gen1/[platform]/build-a-backend/graphqlapi/index.mdx";
    const GEN2_START: &str = "src/pages/[platform]/start/quickstart/index.mdx";
    const FRAGMENT: &str = "src/fragments/lib/auth/setup.mdx";

    fn order(query: &str, configured: Generation, mut items: Vec<MatchCandidate>) -> Vec<String> {
        RankingContext::new(query, configured).sort(&mut items);
        items.into_iter().map(|c| c.path).collect()
    }

    #[test]
    fn test_context_derives_intent_and_target() {
        let ctx = RankingContext::new("gen1 cli", Generation::Gen2);
        assert!(ctx.intent().cli);
        assert_eq!(ctx.target(), Generation::Gen1);

        let ctx = RankingContext::new("storage", Generation::Gen2);
        assert_eq!(ctx.intent(), QueryIntent::default());
        assert_eq!(ctx.target(), Generation::Gen2);
    }

    #[test]
    fn test_cli_intent_follows_explicit_generation() {
        let ranked = order(
            "gen1 cli",
            Generation::Gen2,
            vec![MatchCandidate::new(GEN2_CLI, 50), MatchCandidate::new(GEN1_CLI, 1)],
        );
        assert_eq!(ranked[0], GEN1_CLI);

        let ranked = order(
            "cli commands",
            Generation::Gen2,
            vec![MatchCandidate::new(GEN1_CLI, 50), MatchCandidate::new(GEN2_CLI, 1)],
        );
        assert_eq!(ranked[0], GEN2_CLI);
    }

    #[test]
    fn test_resource_creation_prefers_typed_examples() {
        let ranked = order(
            "create api",
            Generation::Gen2,
            vec![MatchCandidate::new(GEN1_API, 30), MatchCandidate::new(GEN2_DATA, 2)],
        );
        assert_eq!(ranked[0], GEN2_DATA);

        let ranked = order(
            "create api",
            Generation::Gen1,
            vec![MatchCandidate::new(GEN2_DATA, 30), MatchCandidate::new(GEN1_CLI, 2)],
        );
        assert_eq!(ranked[0], GEN1_CLI);
    }

    #[test]
    fn test_setup_intent_prefers_setup_subtree() {
        let ranked = order(
            "getting started",
            Generation::Gen2,
            vec![MatchCandidate::new(GEN2_DATA, 30), MatchCandidate::new(GEN2_START, 1)],
        );
        assert_eq!(ranked[0], GEN2_START);
    }

    #[test]
    fn test_main_platform_beats_fragments() {
        let ranked = order(
            "authorization rules",
            Generation::Gen2,
            vec![MatchCandidate::new(FRAGMENT, 99), MatchCandidate::new(GEN1_API, 1)],
        );
        assert_eq!(ranked[0], GEN1_API);
    }

    #[test]
    fn test_generation_preference() {
        let items = vec![MatchCandidate::new(GEN1_API, 9), MatchCandidate::new(GEN2_DATA, 1)];
        assert_eq!(order("pagination", Generation::Gen1, items.clone())[0], GEN2_DATA);
        assert_eq!(order("gen1 pagination", Generation::Gen2, items)[0], GEN1_API);
    }

    #[test]
    fn test_literal_then_count_then_path() {
        let a = "src/pages/[platform]/build-a-backend/storage/index.mdx";
        let b = "src/pages/[platform]/build-a-backend/functions/index.mdx";
        let c = "src/pages/[platform]/build-a-backend/zeta/index.mdx";
        let ranked = order(
            "storage",
            Generation::Gen2,
            vec![
                MatchCandidate::new(b, 10),
                MatchCandidate::new(c, 10),
                MatchCandidate::new(a, 1),
            ],
        );
        assert_eq!(ranked, vec![a, b, c]);
    }

    #[test]
    fn test_compare_is_antisymmetric() {
        let ctx = RankingContext::new("create api", Generation::Both);
        let a = MatchCandidate::new(GEN2_DATA, 3);
        let b = MatchCandidate::new(GEN1_API, 3);
        assert_eq!(ctx.compare(&a, &b), ctx.compare(&b, &a).reverse());
        assert_eq!(ctx.compare(&a, &a), Ordering::Equal);
    }
}
