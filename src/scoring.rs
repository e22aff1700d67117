//! Rarity scoring.
//!
//! # Per-item rarity
//!
//! ```text
//! rarity(m, N) = -log10(m / N + 1e-20)
//! ```
//!
//! where `m` is the number of background items matching the item's word and
//! `N` is the background size. The pseudo-count keeps an unseen word finite
//! (rarity 20) and the result is never negative.
//!
//! # Structure scores
//!
//! Two complementary hypotheses:
//!
//! - **Average**: many mildly unusual fragments. The score is
//!   `sum(rarity) / (qualifying + 1)`; the `+ 1` keeps a structure without
//!   qualifying items at 0 instead of NaN.
//! - **Extreme**: one rare fragment. Only the most extreme value of the
//!   magnitude invariant is kept per structure (optionally separately for
//!   the positive and negative side) and ranked against the background's
//!   per-structure extremes. With split sides the score is `-log10(p)` of
//!   the more significant side, since the two sides differ in scale.
//!
//! The item filter (disjoint-only, minimum magnitude) must be identical for
//! the background pass and the query pass, otherwise scores are not
//! comparable. [`ItemFilter`] is therefore derived from the one shared
//! [`ScanConfig`].

use crate::config::ScanConfig;
use crate::dictionary::WordDictionary;
use crate::error::Result;
use crate::invariant::{Item, StructureRecord};
use crate::matcher::FuzzyMatcher;
use crate::quantization::{Normalizer, QuantizationScheme};

/// Pseudo-count added before taking the logarithm.
pub const PSEUDO_COUNT: f64 = 1e-20;

/// `-log10(match_count / corpus_size + 1e-20)`, clamped at 0.
#[must_use]
pub fn per_item_rarity(match_count: u64, corpus_size: u64) -> f64 {
    let frequency = if corpus_size == 0 {
        0.0
    } else {
        match_count as f64 / corpus_size as f64
    };
    let rarity = -(frequency + PSEUDO_COUNT).log10();
    if rarity > 0.0 {
        rarity
    } else {
        0.0
    }
}

/// Which items of a structure count towards its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemFilter {
    pub disjoint_only: bool,
    pub min_magnitude: f64,
    pub magnitude_dimension: usize,
}

impl ItemFilter {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            disjoint_only: config.disjoint_only,
            min_magnitude: config.min_magnitude,
            magnitude_dimension: config.magnitude_dimension,
        }
    }

    /// Absolute value of the magnitude invariant.
    pub fn magnitude(&self, values: &[f64]) -> f64 {
        values
            .get(self.magnitude_dimension)
            .map_or(0.0, |v| v.abs())
    }

    /// `values` are the item's invariants after normalization.
    pub fn qualifies(&self, item: &Item<'_>, values: &[f64]) -> bool {
        if self.disjoint_only && !item.is_disjoint() {
            return false;
        }
        self.magnitude(values) >= self.min_magnitude
    }
}

/// Running mean-with-guard over item rarities.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Aggregate {
    pub sum: f64,
    pub qualifying: usize,
}

impl Aggregate {
    pub fn push(&mut self, rarity: f64) {
        self.sum += rarity;
        self.qualifying += 1;
    }

    /// `sum / (qualifying + 1)`.
    pub fn score(&self) -> f64 {
        self.sum / (self.qualifying + 1) as f64
    }
}

/// Rarity of one item, kept for evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRarity {
    pub label: String,
    pub match_count: u64,
    pub rarity: f64,
}

/// Keeps the `k` rarest items seen so far, rarest first.
#[derive(Debug, Clone, Default)]
struct RarestItems {
    k: usize,
    items: Vec<ItemRarity>,
}

impl RarestItems {
    fn new(k: usize) -> Self {
        Self {
            k,
            items: Vec::with_capacity(k),
        }
    }

    fn offer(&mut self, item: &Item<'_>, match_count: u64, rarity: f64) {
        if self.k == 0 {
            return;
        }
        if self.items.len() == self.k
            && self.items.last().is_some_and(|last| last.rarity >= rarity)
        {
            return;
        }
        // stable: earlier items win ties
        let pos = self.items.partition_point(|e| e.rarity >= rarity);
        self.items.insert(
            pos,
            ItemRarity {
                label: item.label(),
                match_count,
                rarity,
            },
        );
        self.items.truncate(self.k);
    }
}

/// Average-mode result for one structure.
#[derive(Debug, Clone, Default)]
pub struct AverageScore {
    pub aggregate: Aggregate,
    pub rarest: Vec<ItemRarity>,
}

impl AverageScore {
    pub fn score(&self) -> f64 {
        self.aggregate.score()
    }

    /// `label:rarity` pairs of the rarest items, e.g. `w3[10-19]:20.00`.
    pub fn evidence(&self) -> String {
        self.rarest
            .iter()
            .map(|r| format!("{}:{:.2}", r.label, r.rarity))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A signed extreme value with its location.
#[derive(Debug, Clone, PartialEq)]
pub struct Extreme {
    pub value: f64,
    pub label: String,
}

/// Most positive and most negative magnitude invariant of a structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtremeValues {
    pub positive: Option<Extreme>,
    pub negative: Option<Extreme>,
}

impl ExtremeValues {
    fn offer(&mut self, item: &Item<'_>, value: f64) {
        if value >= 0.0 {
            if self.positive.as_ref().map_or(true, |e| value > e.value) {
                self.positive = Some(Extreme {
                    value,
                    label: item.label(),
                });
            }
        } else if self.negative.as_ref().map_or(true, |e| value < e.value) {
            self.negative = Some(Extreme {
                value,
                label: item.label(),
            });
        }
    }

    /// The side with the larger absolute value; positive wins ties.
    pub fn most_extreme(&self) -> Option<&Extreme> {
        match (&self.positive, &self.negative) {
            (Some(p), Some(n)) => Some(if n.value.abs() > p.value { n } else { p }),
            (Some(p), None) => Some(p),
            (None, Some(n)) => Some(n),
            (None, None) => None,
        }
    }
}

/// Read-only pieces needed to turn invariants into words.
#[derive(Debug, Clone, Copy)]
pub struct WordSource<'a> {
    pub normalizer: &'a Normalizer,
    pub scheme: &'a QuantizationScheme,
    pub dictionary: &'a WordDictionary,
}

/// Scores structures under one filter against one background size.
#[derive(Debug, Clone)]
pub struct RarityScorer {
    filter: ItemFilter,
    corpus_size: u64,
    evidence_items: usize,
}

impl RarityScorer {
    pub fn new(filter: ItemFilter, corpus_size: u64, evidence_items: usize) -> Self {
        Self {
            filter,
            corpus_size,
            evidence_items,
        }
    }

    pub fn filter(&self) -> &ItemFilter {
        &self.filter
    }

    pub fn corpus_size(&self) -> u64 {
        self.corpus_size
    }

    /// Sum item rarities over the qualifying items of `record`.
    pub fn score_average(
        &self,
        record: &StructureRecord,
        source: WordSource<'_>,
        matcher: &mut FuzzyMatcher,
    ) -> Result<AverageScore> {
        let mut aggregate = Aggregate::default();
        let mut rarest = RarestItems::new(self.evidence_items);
        for item in record.items() {
            let values = source.normalizer.apply(item.values);
            if !self.filter.qualifies(&item, &values) {
                continue;
            }
            let word = source.scheme.quantize(&values)?;
            let matches = matcher.match_count(&word, source.dictionary)?;
            let rarity = per_item_rarity(matches, self.corpus_size);
            aggregate.push(rarity);
            rarest.offer(&item, matches, rarity);
        }
        Ok(AverageScore {
            aggregate,
            rarest: rarest.items,
        })
    }

    /// Track the extreme magnitude invariant over the qualifying items.
    pub fn track_extremes(&self, record: &StructureRecord, normalizer: &Normalizer) -> ExtremeValues {
        let mut extremes = ExtremeValues::default();
        for item in record.items() {
            let values = normalizer.apply(item.values);
            if !self.filter.qualifies(&item, &values) {
                continue;
            }
            if let Some(&v) = values.get(self.filter.magnitude_dimension) {
                extremes.offer(&item, v);
            }
        }
        extremes
    }
}
