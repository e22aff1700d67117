//! Bounded-mismatch range search over the sorted word table.
//!
//! # Acceptance rule
//!
//! A dictionary word matches a query word when
//!
//! 1. every dimension differs by at most `max_bin_offset` bins (the default
//!    of 1 is the "difference < 2" gate), and
//! 2. at most `max_mismatches` dimensions differ at all.
//!
//! A row that breaks the gate in any dimension is rejected even if the
//! mismatch budget would allow it.
//!
//! # Algorithm
//!
//! The table is sorted lexicographically, so once dimensions `0..d` are
//! fixed the surviving rows form one contiguous range in which dimension
//! `d` is itself sorted. The search walks dimensions left to right; at each
//! level it branches into the sub-ranges whose bin is `b`, `b - 1`, `b + 1`
//! (and further out when the offset allows), each found with two binary
//! searches inside the parent range. Branches whose accumulated mismatch
//! cost exceeds the budget are pruned. Rows surviving the last dimension
//! are matches.
//!
//! ```text
//! query 1.2, budget 1
//!
//! d0:  [0.x ........][1.x ..........][2.x ......]
//!        cost 1          cost 0         cost 1
//! d1:  [0.2]            [1.1][1.2][1.3]   [2.2]
//!        ok              ok   ok   ok      ok
//! ```
//!
//! Cost is `O((2w + 1)^D log N)` in the worst case for offset `w`, but the
//! budget prunes all but `O(C(D, k) (2w)^k)` branches for `k` mismatches.
//! A budget of 0 degenerates to one exact binary search.

use std::ops::Range;

use tracing::debug;

use crate::dictionary::{CountKind, DictionaryEntry, WordDictionary};
use crate::error::{Result, ScanError};
use crate::quantization::{Bin, Word};

/// Fuzzy match parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchParams {
    /// Maximum number of dimensions allowed to differ.
    pub max_mismatches: usize,
    /// Maximum per-dimension bin difference.
    pub max_bin_offset: u8,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            max_mismatches: 1,
            max_bin_offset: 1,
        }
    }
}

impl MatchParams {
    pub fn exact() -> Self {
        Self {
            max_mismatches: 0,
            max_bin_offset: 1,
        }
    }

    pub fn with_mismatches(max_mismatches: usize) -> Self {
        Self {
            max_mismatches,
            ..Self::default()
        }
    }

    /// Whether `candidate` satisfies the acceptance rule for `query`.
    pub fn accepts(&self, query: &[Bin], candidate: &[Bin]) -> bool {
        if query.len() != candidate.len() {
            return false;
        }
        let mut mismatches = 0;
        for (&q, &c) in query.iter().zip(candidate) {
            let diff = q.abs_diff(c);
            if diff > self.max_bin_offset {
                return false;
            }
            if diff != 0 {
                mismatches += 1;
            }
        }
        mismatches <= self.max_mismatches
    }
}

/// Dictionary rows matching one query, as ascending index ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSet {
    ranges: Vec<Range<usize>>,
    count: u64,
}

impl MatchSet {
    /// Sum of the matched entries' counts.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Number of distinct matched words.
    pub fn distinct(&self) -> usize {
        self.ranges.iter().map(ExactSizeIterator::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Matched entry indices in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.ranges.iter().flat_map(Clone::clone)
    }

    pub fn contains(&self, index: usize) -> bool {
        let pos = self.ranges.partition_point(|r| r.end <= index);
        self.ranges.get(pos).is_some_and(|r| r.contains(&index))
    }

    fn push(&mut self, range: Range<usize>, entries: &[DictionaryEntry]) {
        self.count += entries[range.clone()].iter().map(|e| e.count).sum::<u64>();
        match self.ranges.last_mut() {
            Some(last) if last.end == range.start => last.end = range.end,
            _ => self.ranges.push(range),
        }
    }
}

/// Find all dictionary words within the mismatch budget of `word`.
pub fn find_match_set(word: &Word, params: &MatchParams, dict: &WordDictionary) -> Result<MatchSet> {
    if word.is_empty() {
        return Err(ScanError::InvalidParameter(
            "cannot match an empty word".into(),
        ));
    }
    let mut set = MatchSet::default();
    let Some(len) = dict.word_len() else {
        return Ok(set);
    };
    if len != word.len() {
        return Err(ScanError::DimensionMismatch {
            expected: len,
            actual: word.len(),
        });
    }
    let entries = dict.entries();
    if params.max_mismatches == 0 {
        if let Ok(i) = dict.position(word) {
            set.push(i..i + 1, entries);
        }
        return Ok(set);
    }
    let mut search = RangeSearch {
        entries,
        query: word.bins(),
        params,
        out: &mut set,
    };
    search.descend(0, 0..entries.len(), 0);
    Ok(set)
}

struct RangeSearch<'a> {
    entries: &'a [DictionaryEntry],
    query: &'a [Bin],
    params: &'a MatchParams,
    out: &'a mut MatchSet,
}

impl RangeSearch<'_> {
    fn descend(&mut self, dim: usize, range: Range<usize>, cost: usize) {
        let b = self.query[dim];
        let offset = self.params.max_bin_offset;
        let low = b.saturating_sub(offset);
        let high = b.saturating_add(offset);
        // ascending target bins keep the output ranges sorted
        for target in low..=high {
            let step = usize::from(target != b);
            if cost + step > self.params.max_mismatches {
                continue;
            }
            let sub = self.bin_range(dim, target, range.clone());
            if sub.is_empty() {
                continue;
            }
            if dim + 1 == self.query.len() {
                self.out.push(sub, self.entries);
            } else {
                self.descend(dim + 1, sub, cost + step);
            }
        }
    }

    /// Rows of `range` whose bin at `dim` equals `target`. Dimension `dim`
    /// is sorted within `range` because all earlier dimensions are fixed.
    fn bin_range(&self, dim: usize, target: Bin, range: Range<usize>) -> Range<usize> {
        let slice = &self.entries[range.clone()];
        let start = slice.partition_point(|e| e.word.bins()[dim] < target);
        let end = slice.partition_point(|e| e.word.bins()[dim] <= target);
        range.start + start..range.start + end
    }
}

/// Linear-scan reference for [`find_match_set`]. `O(N * D)`.
pub fn scan_match_set(word: &Word, params: &MatchParams, dict: &WordDictionary) -> MatchSet {
    let entries = dict.entries();
    let mut set = MatchSet::default();
    for (i, e) in entries.iter().enumerate() {
        if params.accepts(word.bins(), e.word.bins()) {
            set.push(i..i + 1, entries);
        }
    }
    set
}

/// Statistics of a [`FuzzyMatcher`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatcherStats {
    pub lookups: usize,
    pub cache_hits: usize,
}

/// Match counter with a learned per-word cache.
///
/// Fuzzy counts are remembered in a separate match-set table so repeated
/// query words cost one binary search. The background table is only read,
/// so learned words never leak into later match sets.
#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    params: MatchParams,
    cache: WordDictionary,
    stats: MatcherStats,
}

impl FuzzyMatcher {
    pub fn new(params: MatchParams) -> Self {
        Self {
            params,
            cache: WordDictionary::new(CountKind::MatchSetSize),
            stats: MatcherStats::default(),
        }
    }

    pub fn params(&self) -> &MatchParams {
        &self.params
    }

    pub fn stats(&self) -> MatcherStats {
        self.stats
    }

    /// Learned fuzzy counts.
    pub fn cache(&self) -> &WordDictionary {
        &self.cache
    }

    /// Background occurrences matching `word` under the budget.
    ///
    /// A miss at budget 0 is a count of 0, not an error.
    pub fn match_count(&mut self, word: &Word, dict: &WordDictionary) -> Result<u64> {
        self.stats.lookups += 1;
        if self.params.max_mismatches == 0 {
            if let Some(len) = dict.word_len() {
                if len != word.len() {
                    return Err(ScanError::DimensionMismatch {
                        expected: len,
                        actual: word.len(),
                    });
                }
            }
            return Ok(dict.lookup_exact(word));
        }
        if let Some(count) = self.cache.get(word) {
            self.stats.cache_hits += 1;
            return Ok(count);
        }
        let set = find_match_set(word, &self.params, dict)?;
        self.cache.insert_and_learn(word.clone(), set.count())?;
        Ok(set.count())
    }

    /// Forget learned counts, e.g. after the background table changed.
    pub fn clear_cache(&mut self) {
        debug!(learned = self.cache.len(), "clearing fuzzy match cache");
        self.cache.clear();
        self.stats = MatcherStats::default();
    }
}
