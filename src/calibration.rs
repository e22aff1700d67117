//! Rank-based empirical p-values against a background distribution.
//!
//! Larger values are rarer. For an observed value `x` and a sorted
//! background of `N` values, `hits` is the number of background values
//! `>= x`, found with one binary search for the first value not below `x`:
//!
//! ```text
//! match_index = #{ b < x }        hits = N - match_index
//!
//! Empirical: p = max(hits / N, 1e-20) = max(1 - match_index / N, 1e-20)
//! Smoothed:  p = (hits + 1) / (N + 1)
//! ```
//!
//! Both stay in `(0, 1]` and never increase as `x` grows. With background
//! `[0.1, 0.2, 0.2, 0.5]`, `x = 0.2` has `match_index = 1`, so the empirical
//! p-value is `0.75`: three of four background values are at least as
//! extreme.

use tracing::info;

use crate::config::PValueConvention;
use crate::error::{Result, ScanError};
use crate::scoring::PSEUDO_COUNT;

/// Sorted ascending background values, read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundDistribution {
    values: Vec<f64>,
    convention: PValueConvention,
}

impl BackgroundDistribution {
    /// Sort the finite values of `values`. Non-finite values are dropped.
    pub fn build<I>(values: I, convention: PValueConvention) -> Result<Self>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return Err(ScanError::EmptyCorpus(
                "background distribution has no finite values".into(),
            ));
        }
        values.sort_by(f64::total_cmp);
        info!(
            n = values.len(),
            min = values[0],
            max = values[values.len() - 1],
            "built background distribution"
        );
        Ok(Self { values, convention })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn convention(&self) -> PValueConvention {
        self.convention
    }

    /// Number of background values strictly below `value`.
    pub fn match_index(&self, value: f64) -> usize {
        self.values.partition_point(|&b| b < value)
    }

    /// Empirical p-value of `value`. NaN is treated as least extreme.
    pub fn rank(&self, value: f64) -> f64 {
        let n = self.values.len();
        let hits = if value.is_nan() {
            n
        } else {
            n - self.match_index(value)
        };
        match self.convention {
            PValueConvention::Empirical => (hits as f64 / n as f64).max(PSEUDO_COUNT),
            PValueConvention::Smoothed => (hits + 1) as f64 / (n + 1) as f64,
        }
    }
}
