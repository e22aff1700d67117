//! Ranked result rows.

use std::cmp::Ordering;

use crate::error::Result;

/// Score and calibration of one processed query structure.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredQuery {
    pub structure_id: String,
    pub chain_id: Option<String>,
    pub score: f64,
    /// Empirical p-value in `(0, 1]`, absent when no calibration applied.
    pub p_value: Option<f64>,
    pub evidence: String,
    /// Mode-specific value: qualifying item count (average mode) or the
    /// signed extreme invariant (extreme mode).
    pub aux: Option<f64>,
}

impl ScoredQuery {
    /// Ranking order: score descending, then p-value ascending (absent
    /// last), then structure and chain id ascending.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| match (self.p_value, other.p_value) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.structure_id.cmp(&other.structure_id))
            .then_with(|| self.chain_id.cmp(&other.chain_id))
    }
}

/// Receives ranked rows, rank 1 first.
pub trait RowSink {
    fn accept(&mut self, rank: usize, row: &ScoredQuery) -> Result<()>;
}

impl RowSink for Vec<ScoredQuery> {
    fn accept(&mut self, _rank: usize, row: &ScoredQuery) -> Result<()> {
        self.push(row.clone());
        Ok(())
    }
}

/// Summary statistics reported alongside the rows.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TableSummary {
    pub rows: usize,
    pub skipped: usize,
    pub max_score: Option<f64>,
    pub min_p_value: Option<f64>,
}

/// Collected rows for one query batch.
#[derive(Debug, Clone, Default)]
pub struct ResultTable {
    rows: Vec<ScoredQuery>,
    skipped: usize,
    finalized: bool,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, row: ScoredQuery) {
        self.rows.push(row);
        self.finalized = false;
    }

    /// Count a structure that was skipped because of malformed data.
    pub fn note_skipped(&mut self) {
        self.skipped += 1;
    }

    /// Sort rows by [`ScoredQuery::rank_cmp`].
    pub fn finalize(&mut self) {
        if !self.finalized {
            self.rows.sort_by(ScoredQuery::rank_cmp);
            self.finalized = true;
        }
    }

    /// Clear rows and counters, keeping the allocation.
    pub fn reset(&mut self) {
        self.rows.clear();
        self.skipped = 0;
        self.finalized = false;
    }

    pub fn rows(&self) -> &[ScoredQuery] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn capacity(&self) -> usize {
        self.rows.capacity()
    }

    pub fn summary(&self) -> TableSummary {
        TableSummary {
            rows: self.rows.len(),
            skipped: self.skipped,
            max_score: self.rows.iter().map(|r| r.score).reduce(f64::max),
            min_p_value: self.rows.iter().filter_map(|r| r.p_value).reduce(f64::min),
        }
    }

    /// Finalize and push every row into `sink`. Returns the row count.
    pub fn emit<S: RowSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize> {
        self.finalize();
        for (i, row) in self.rows.iter().enumerate() {
            sink.accept(i + 1, row)?;
        }
        Ok(self.rows.len())
    }
}
