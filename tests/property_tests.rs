//! Property-based tests for fragscan.
//!
//! These tests verify invariants that should hold regardless of input:
//! - Quantization is monotonic per dimension
//! - Dictionary counts add up to the corpus size
//! - Fuzzy match sets grow with the budget and respect the gate
//! - Rarities are non-negative and p-values are monotone

use proptest::prelude::*;

use fragscan::calibration::BackgroundDistribution;
use fragscan::config::{BinningPolicy, PValueConvention};
use fragscan::matcher::{find_match_set, scan_match_set, MatchParams};
use fragscan::quantization::{QuantizationScheme, Word};
use fragscan::scoring::{per_item_rarity, Aggregate};
use fragscan::WordDictionary;

prop_compose! {
    fn arb_words(dims: usize, max_bin: u8)
        (words in prop::collection::vec(prop::collection::vec(0..=max_bin, dims), 1..200))
        -> Vec<Word>
    {
        words.into_iter().map(Word::from).collect()
    }
}

prop_compose! {
    fn arb_query(dims: usize, max_bin: u8)
        (bins in prop::collection::vec(0..=max_bin, dims))
        -> Word
    {
        Word::from(bins)
    }
}

mod quantization_props {
    use super::*;

    fn policies() -> impl Strategy<Value = BinningPolicy> {
        prop_oneof![
            Just(BinningPolicy::EquiWidth),
            Just(BinningPolicy::EquiPopulation),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn quantization_is_monotonic(
            column in prop::collection::vec(-50.0f64..50.0, 1..300),
            nr_of_bins in 1usize..12,
            policy in policies(),
            x in -80.0f64..80.0,
            y in -80.0f64..80.0,
        ) {
            let rows: Vec<[f64; 1]> = column.iter().map(|&v| [v]).collect();
            let scheme = QuantizationScheme::build(
                rows.iter().map(|r| &r[..]),
                1,
                nr_of_bins,
                &policy,
                1e-6,
            ).unwrap();
            let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
            let (a, b) = (scheme.bin(0, lo).unwrap(), scheme.bin(0, hi).unwrap());
            prop_assert!(a <= b, "bin({}) = {} > bin({}) = {}", lo, a, hi, b);
            prop_assert!(usize::from(b) <= nr_of_bins);
        }

        #[test]
        fn every_dimension_is_monotonic(
            rows in prop::collection::vec(prop::collection::vec(-5.0f64..5.0, 3), 5..100),
            delta in prop::collection::vec(0.0f64..2.0, 3),
        ) {
            let scheme = QuantizationScheme::build(
                rows.iter().map(Vec::as_slice),
                3,
                4,
                &BinningPolicy::EquiPopulation,
                1e-4,
            ).unwrap();
            let base = &rows[0];
            let bumped: Vec<f64> = base.iter().zip(&delta).map(|(v, d)| v + d).collect();
            let w1 = scheme.quantize(base).unwrap();
            let w2 = scheme.quantize(&bumped).unwrap();
            for d in 0..3 {
                prop_assert!(w1.bins()[d] <= w2.bins()[d]);
            }
        }
    }
}

mod dictionary_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn counts_sum_to_corpus_size(words in arb_words(3, 4)) {
            let n = words.len() as u64;
            let dict = WordDictionary::from_words(words).unwrap();
            prop_assert_eq!(dict.total_count(), n);
            let entries = dict.entries();
            prop_assert!(entries.windows(2).all(|p| p[0].word < p[1].word));
        }

        #[test]
        fn exact_budget_equals_lookup(words in arb_words(4, 3), query in arb_query(4, 3)) {
            let dict = WordDictionary::from_words(words).unwrap();
            let set = find_match_set(&query, &MatchParams::exact(), &dict).unwrap();
            prop_assert_eq!(set.count(), dict.lookup_exact(&query));
        }
    }
}

mod matcher_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(150))]

        #[test]
        fn match_sets_grow_with_budget(
            words in arb_words(4, 4),
            query in arb_query(4, 4),
            k in 1usize..=4,
        ) {
            let dict = WordDictionary::from_words(words).unwrap();
            let smaller = find_match_set(&query, &MatchParams::with_mismatches(k - 1), &dict).unwrap();
            let larger = find_match_set(&query, &MatchParams::with_mismatches(k), &dict).unwrap();
            for i in smaller.indices() {
                prop_assert!(larger.contains(i), "entry {} lost at budget {}", i, k);
            }
            prop_assert!(larger.count() >= smaller.count());
        }

        #[test]
        fn gate_is_never_crossed(
            words in arb_words(5, 5),
            query in arb_query(5, 5),
            k in 0usize..=5,
        ) {
            let dict = WordDictionary::from_words(words).unwrap();
            let set = find_match_set(&query, &MatchParams::with_mismatches(k), &dict).unwrap();
            for i in set.indices() {
                let candidate = &dict.entries()[i].word;
                let mut differing = 0;
                for (q, c) in query.bins().iter().zip(candidate.bins()) {
                    prop_assert!(q.abs_diff(*c) < 2);
                    if q != c {
                        differing += 1;
                    }
                }
                prop_assert!(differing <= k);
            }
        }

        #[test]
        fn range_search_equals_linear_scan(
            words in arb_words(4, 3),
            query in arb_query(4, 4),
            k in 0usize..=4,
            offset in 1u8..=2,
        ) {
            let dict = WordDictionary::from_words(words).unwrap();
            let params = MatchParams { max_mismatches: k, max_bin_offset: offset };
            prop_assert_eq!(
                find_match_set(&query, &params, &dict).unwrap(),
                scan_match_set(&query, &params, &dict)
            );
        }
    }
}

mod scoring_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn rarity_is_non_negative(n in 0u64..1_000_000, frac in 0.0f64..=1.0) {
            let m = (n as f64 * frac) as u64;
            let r = per_item_rarity(m, n);
            prop_assert!(r >= 0.0 && r.is_finite(), "rarity {} for {}/{}", r, m, n);
        }

        #[test]
        fn aggregate_is_finite(rarities in prop::collection::vec(0.0f64..20.0, 0..50)) {
            let mut a = Aggregate::default();
            for r in &rarities {
                a.push(*r);
            }
            prop_assert!(a.score().is_finite());
            prop_assert!(a.score() >= 0.0);
        }

        #[test]
        fn p_value_is_monotone(
            background in prop::collection::vec(-10.0f64..10.0, 1..200),
            x in -12.0f64..12.0,
            y in -12.0f64..12.0,
            smoothed in any::<bool>(),
        ) {
            let convention = if smoothed {
                PValueConvention::Smoothed
            } else {
                PValueConvention::Empirical
            };
            let dist = BackgroundDistribution::build(background, convention).unwrap();
            let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
            let (p_lo, p_hi) = (dist.rank(lo), dist.rank(hi));
            prop_assert!(p_lo >= p_hi, "p({}) = {} < p({}) = {}", lo, p_lo, hi, p_hi);
            prop_assert!(p_hi > 0.0 && p_lo <= 1.0);
        }
    }
}
