use docs_harness::classify::Generation;
use docs_harness::ranking::{MatchCandidate, RankingContext};
use proptest::prelude::*;
use std::cmp::Ordering;

fn segment() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("src".to_string()),
        Just("pages".to_string()),
        Just("gen1".to_string()),
        Just("[platform]".to_string()),
        Just("fragments".to_string()),
        Just("cli".to_string()),
        Just("cli-commands".to_string()),
        Just("start".to_string()),
        Just("build-a-backend".to_string()),
        Just("auth".to_string()),
        "[a-z]{1,8}",
    ]
}

fn candidate() -> impl Strategy<Value = MatchCandidate> {
    (prop::collection::vec(segment(), 1..6), 0usize..20).prop_map(|(segments, count)| {
        MatchCandidate::new(format!("{}/index.mdx", segments.join("/")), count)
    })
}

fn query() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("gen1 cli".to_string()),
        Just("gen2 create api".to_string()),
        Just("how to set up auth".to_string()),
        Just("gen1 and gen2 storage".to_string()),
        Just("amplify add function".to_string()),
        "[a-z ]{0,20}",
    ]
}

fn generation() -> impl Strategy<Value = Generation> {
    prop_oneof![
        Just(Generation::Gen1),
        Just(Generation::Gen2),
        Just(Generation::Both),
    ]
}

proptest! {
    #[test]
    fn sort_is_deterministic(
        q in query(),
        g in generation(),
        items in prop::collection::vec(candidate(), 0..30),
    ) {
        let ctx = RankingContext::new(&q, g);
        let mut forward = items.clone();
        let mut backward: Vec<_> = items.into_iter().rev().collect();
        ctx.sort(&mut forward);
        ctx.sort(&mut backward);
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn comparator_is_antisymmetric(
        q in query(),
        g in generation(),
        a in candidate(),
        b in candidate(),
    ) {
        let ctx = RankingContext::new(&q, g);
        prop_assert_eq!(ctx.compare(&a, &b), ctx.compare(&b, &a).reverse());
    }

    #[test]
    fn comparator_is_transitive(
        q in query(),
        g in generation(),
        a in candidate(),
        b in candidate(),
        c in candidate(),
    ) {
        let ctx = RankingContext::new(&q, g);
        if ctx.compare(&a, &b) != Ordering::Greater && ctx.compare(&b, &c) != Ordering::Greater {
            prop_assert_ne!(ctx.compare(&a, &c), Ordering::Greater);
        }
    }

    #[test]
    fn equal_only_for_identical_candidates(
        q in query(),
        g in generation(),
        a in candidate(),
        b in candidate(),
    ) {
        let ctx = RankingContext::new(&q, g);
        if ctx.compare(&a, &b) == Ordering::Equal {
            prop_assert_eq!(a.path, b.path);
            prop_assert_eq!(a.match_count, b.match_count);
        }
    }
}
