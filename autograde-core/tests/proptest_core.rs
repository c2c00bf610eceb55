//! Property-based tests for core components using proptest.

use proptest::prelude::*;

use autograde_core::confidence::ConfidenceSignals;
use autograde_core::parser::{parse_score, parse_score_detailed};
use autograde_core::scale::{SUPPORTED_SCALES, ScaleCache, is_supported_scale};
use autograde_core::validation::is_empty_code;

fn scale() -> impl Strategy<Value = u32> {
    prop::sample::select(SUPPORTED_SCALES.to_vec())
}

fn signals() -> impl Strategy<Value = ConfidenceSignals> {
    (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
        |(non_numeric, missing_reasoning, clamped, heuristic)| ConfidenceSignals {
            non_numeric,
            missing_reasoning,
            clamped,
            heuristic,
        },
    )
}

// --- Score parsing properties ---

proptest! {
    #[test]
    fn parsed_score_is_always_in_range(raw in ".{0,200}", max in scale()) {
        if let Ok(score) = parse_score(&raw, max) {
            prop_assert!(score <= max);
        }
    }

    #[test]
    fn text_without_digits_never_parses(raw in "[a-zA-Z .,!?:-]{0,100}", max in scale()) {
        prop_assert!(parse_score(&raw, max).is_err());
    }

    #[test]
    fn last_number_wins(
        prefix in prop::collection::vec(0u32..1000, 0..5),
        last in 0u32..=10,
        max in scale(),
    ) {
        let mut text: String = prefix.iter().map(|n| format!("then {n} ")).collect();
        text.push_str(&format!("finally {last}"));
        prop_assert_eq!(parse_score(&text, max), Ok(last.min(max)));
    }

    #[test]
    fn sign_is_ignored(n in 0u32..100, max in scale()) {
        prop_assert_eq!(parse_score(&format!("-{n}"), max), parse_score(&n.to_string(), max));
    }

    #[test]
    fn fraction_is_truncated(whole in 0u32..=10, frac in 0u32..1000, max in scale()) {
        let parsed = parse_score(&format!("{whole}.{frac}"), max);
        prop_assert_eq!(parsed, Ok(whole.min(max)));
    }

    #[test]
    fn clamped_flag_matches_overflow(n in 0u64..10_000, max in scale()) {
        let parsed = parse_score_detailed(&n.to_string(), max).unwrap();
        prop_assert_eq!(parsed.clamped, n > u64::from(max));
        prop_assert_eq!(u64::from(parsed.value), n.min(u64::from(max)));
    }

    #[test]
    fn huge_numbers_clamp_instead_of_failing(digits in "[1-9][0-9]{25,40}", max in scale()) {
        prop_assert_eq!(parse_score(&digits, max), Ok(max));
    }
}

// --- Confidence properties ---

proptest! {
    #[test]
    fn confidence_is_bounded(s in signals()) {
        let c = s.confidence();
        prop_assert!((0.0..=1.0).contains(&c));
    }

    #[test]
    fn adding_a_penalty_never_raises_confidence(s in signals(), which in 0usize..4) {
        let mut worse = s;
        match which {
            0 => worse.non_numeric = true,
            1 => worse.missing_reasoning = true,
            2 => worse.clamped = true,
            _ => worse.heuristic = true,
        }
        prop_assert!(worse.confidence() <= s.confidence());
    }

    #[test]
    fn no_penalties_means_full_confidence(_seed in any::<u8>()) {
        prop_assert_eq!(ConfidenceSignals::default().confidence(), 1.0);
    }
}

// --- Scale cache properties ---

proptest! {
    #[test]
    fn only_listed_scales_are_supported(n in 0u32..100) {
        prop_assert_eq!(is_supported_scale(n), SUPPORTED_SCALES.contains(&n));
        let cache = ScaleCache::new();
        prop_assert_eq!(cache.get(n).is_ok(), SUPPORTED_SCALES.contains(&n));
    }

    #[test]
    fn repeated_lookups_build_once(lookups in prop::collection::vec(scale(), 1..50)) {
        let cache = ScaleCache::new();
        for n in &lookups {
            prop_assert_eq!(cache.get(*n).unwrap().max_points, *n);
        }
        let mut distinct = lookups.clone();
        distinct.sort_unstable();
        distinct.dedup();
        prop_assert_eq!(cache.build_count(), distinct.len());
    }
}

// --- Pre-check properties ---

proptest! {
    #[test]
    fn whitespace_only_code_is_empty(ws in "[ \t\r\n]{0,40}") {
        prop_assert!(is_empty_code(&ws));
    }

    #[test]
    fn code_with_a_visible_char_is_not_empty(ws in "[ \t\n]{0,10}", c in "[a-z0-9#]") {
        let code = format!("{ws}{c}{ws}");
        prop_assert!(!is_empty_code(&code));
    }
}
