//! Scalar quantization of invariant vectors into discrete words.
//!
//! Each dimension is quantized independently against an ascending threshold
//! row. A value maps to the number of leading thresholds it reaches, so a
//! row of `nr_of_bins` thresholds yields `nr_of_bins + 1` bins and values
//! above the last threshold land in the open top bin.
//!
//! ```text
//! thresholds: [0.67, 1.33]
//! 0.0 -> 0    1.0 -> 1    2.0 -> 2    9.9 -> 2
//! ```
//!
//! | Policy | Thresholds |
//! |--------|------------|
//! | Fixed | hand-specified preset (validated against the bin count) |
//! | EquiWidth | `min + k * (max - min) / (nr_of_bins + 1)` |
//! | EquiPopulation | `sorted[(k + 1) * floor(N / (nr_of_bins + 1))] + compensation` |
//!
//! Quantization is monotonic per dimension: a larger raw value never yields
//! a smaller bin index.

pub mod normalize;

use std::fmt;

use smallvec::SmallVec;
use tracing::{info, warn};

use crate::config::{BinningPolicy, MAX_DIMENSIONS};
use crate::error::{try_grow, Result, ScanError};

pub use normalize::Normalizer;

/// Bin index of one dimension.
pub type Bin = u8;

/// Tuple of bin indices, ordered lexicographically left to right.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Word(SmallVec<[Bin; MAX_DIMENSIONS]>);

impl Word {
    pub fn new(bins: &[Bin]) -> Self {
        Self(SmallVec::from_slice(bins))
    }

    pub fn bins(&self) -> &[Bin] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, dimension: usize) -> Option<Bin> {
        self.0.get(dimension).copied()
    }
}

impl From<Vec<Bin>> for Word {
    fn from(bins: Vec<Bin>) -> Self {
        Self(SmallVec::from_vec(bins))
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{b}")?;
        }
        Ok(())
    }
}

/// Per-dimension ascending threshold rows, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizationScheme {
    nr_of_bins: usize,
    thresholds: Vec<Vec<f64>>,
}

impl QuantizationScheme {
    /// Build thresholds for the first `dims` dimensions of `vectors`.
    ///
    /// Data-driven policies need at least one vector; FIXED presets ignore
    /// the data.
    pub fn build<'a, I>(
        vectors: I,
        dims: usize,
        nr_of_bins: usize,
        policy: &BinningPolicy,
        rounding_compensation: f64,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = &'a [f64]>,
    {
        let mut builder = SchemeBuilder::new(dims)?;
        if !matches!(policy, BinningPolicy::Fixed { .. }) {
            for v in vectors {
                builder.push(v)?;
            }
        }
        builder.finish(nr_of_bins, policy, rounding_compensation)
    }

    /// Wrap explicit threshold rows.
    pub fn from_thresholds(thresholds: Vec<Vec<f64>>) -> Result<Self> {
        let nr_of_bins = thresholds.first().map(Vec::len).unwrap_or(0);
        if thresholds.is_empty() || thresholds.len() > MAX_DIMENSIONS {
            return Err(ScanError::config(format!(
                "scheme needs 1..={MAX_DIMENSIONS} threshold rows, got {}",
                thresholds.len()
            )));
        }
        if nr_of_bins == 0 || nr_of_bins > usize::from(Bin::MAX) - 1 {
            return Err(ScanError::config(format!(
                "unsupported threshold row length {nr_of_bins}"
            )));
        }
        if let Some(d) = thresholds.iter().position(|row| row.len() != nr_of_bins) {
            return Err(ScanError::config(format!(
                "threshold row {d} has {} entries, expected {nr_of_bins}",
                thresholds[d].len()
            )));
        }
        Ok(Self {
            nr_of_bins,
            thresholds,
        })
    }

    pub fn nr_of_bins(&self) -> usize {
        self.nr_of_bins
    }

    /// Number of quantized dimensions (word length).
    pub fn dims(&self) -> usize {
        self.thresholds.len()
    }

    pub fn thresholds(&self, dimension: usize) -> Option<&[f64]> {
        self.thresholds.get(dimension).map(Vec::as_slice)
    }

    /// Highest bin index any value can map to.
    pub fn top_bin(&self) -> Bin {
        // `from_thresholds` caps nr_of_bins below Bin::MAX
        self.nr_of_bins as Bin
    }

    /// Bin of a single value in `dimension`: index of the first threshold
    /// strictly above it, or the open top bin. `None` past the last
    /// dimension.
    pub fn bin(&self, dimension: usize, value: f64) -> Option<Bin> {
        self.thresholds
            .get(dimension)
            .map(|row| bin_in(row, value))
    }

    /// Quantize the leading `dims()` values of `vector`.
    pub fn quantize(&self, vector: &[f64]) -> Result<Word> {
        if vector.len() < self.dims() {
            return Err(ScanError::DimensionMismatch {
                expected: self.dims(),
                actual: vector.len(),
            });
        }
        Ok(Word(
            vector
                .iter()
                .take(self.dims())
                .zip(&self.thresholds)
                .map(|(&v, row)| bin_in(row, v))
                .collect(),
        ))
    }

    /// Dimensions whose thresholds are not strictly ascending.
    pub fn degenerate_dimensions(&self) -> Vec<usize> {
        self.thresholds
            .iter()
            .enumerate()
            .filter(|(_, row)| row.windows(2).any(|w| w[0] >= w[1]))
            .map(|(d, _)| d)
            .collect()
    }
}

/// Column-wise accumulator for data-driven thresholds.
///
/// Fed one vector at a time so the corpus is streamed once.
#[derive(Debug)]
pub struct SchemeBuilder {
    columns: Vec<Vec<f64>>,
}

impl SchemeBuilder {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 || dims > MAX_DIMENSIONS {
            return Err(ScanError::config(format!(
                "matched dimensions must be in 1..={MAX_DIMENSIONS}, got {dims}"
            )));
        }
        Ok(Self {
            columns: vec![Vec::new(); dims],
        })
    }

    pub fn rows(&self) -> usize {
        self.columns.first().map(Vec::len).unwrap_or(0)
    }

    /// Record the leading `dims` values of one vector.
    pub fn push(&mut self, vector: &[f64]) -> Result<()> {
        if vector.len() < self.columns.len() {
            return Err(ScanError::DimensionMismatch {
                expected: self.columns.len(),
                actual: vector.len(),
            });
        }
        for (column, &v) in self.columns.iter_mut().zip(vector) {
            if column.len() == column.capacity() {
                let additional = column.len().max(64);
                try_grow(column, additional, "quantization corpus")?;
            }
            column.push(v);
        }
        Ok(())
    }

    pub fn finish(
        self,
        nr_of_bins: usize,
        policy: &BinningPolicy,
        rounding_compensation: f64,
    ) -> Result<QuantizationScheme> {
        if nr_of_bins == 0 {
            return Err(ScanError::config("nr_of_bins must be at least 1"));
        }
        let dims = self.columns.len();
        let rows = self.rows();
        let thresholds = match policy {
            BinningPolicy::Fixed { preset } => {
                let designed = preset.designed_bins();
                if designed != Some(nr_of_bins) {
                    return Err(ScanError::config(format!(
                        "fixed preset {preset:?} is defined for {designed:?} bins, not {nr_of_bins}"
                    )));
                }
                (0..dims)
                    .map(|d| {
                        preset.row(d).map(<[f64]>::to_vec).ok_or_else(|| {
                            ScanError::config(format!("fixed table has no row for dimension {d}"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            BinningPolicy::EquiWidth => {
                if rows == 0 {
                    return Err(ScanError::EmptyCorpus(
                        "equi-width binning over zero vectors".into(),
                    ));
                }
                self.columns
                    .iter()
                    .map(|c| equi_width(c, nr_of_bins))
                    .collect()
            }
            BinningPolicy::EquiPopulation => {
                if rows == 0 {
                    return Err(ScanError::EmptyCorpus(
                        "equi-population binning over zero vectors".into(),
                    ));
                }
                self.columns
                    .into_iter()
                    .map(|c| equi_population(c, nr_of_bins, rounding_compensation))
                    .collect()
            }
        };

        let scheme = QuantizationScheme::from_thresholds(thresholds)?;
        let degenerate = scheme.degenerate_dimensions();
        if let (BinningPolicy::Fixed { .. }, Some(d)) = (policy, degenerate.first()) {
            return Err(ScanError::config(format!(
                "fixed table row {d} is not strictly ascending"
            )));
        }
        for d in degenerate {
            warn!(
                dimension = d,
                "thresholds are not strictly ascending; some bins are empty"
            );
        }
        info!(dims, rows, nr_of_bins, ?policy, "built quantization scheme");
        Ok(scheme)
    }
}

fn bin_in(row: &[f64], value: f64) -> Bin {
    row.iter().position(|&t| t > value).unwrap_or(row.len()) as Bin
}

fn equi_width(column: &[f64], nr_of_bins: usize) -> Vec<f64> {
    let (min, max) = column
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let width = (max - min) / (nr_of_bins + 1) as f64;
    (1..=nr_of_bins).map(|k| min + k as f64 * width).collect()
}

fn equi_population(mut column: Vec<f64>, nr_of_bins: usize, compensation: f64) -> Vec<f64> {
    column.sort_by(f64::total_cmp);
    let step = column.len() / (nr_of_bins + 1);
    (0..nr_of_bins)
        .map(|k| column[(k + 1) * step] + compensation)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FixedPreset;

    fn single_dim(values: &[f64]) -> Vec<Vec<f64>> {
        values.iter().map(|&v| vec![v]).collect()
    }

    fn scheme(values: &[f64], nr_of_bins: usize, policy: BinningPolicy) -> QuantizationScheme {
        let rows = single_dim(values);
        QuantizationScheme::build(rows.iter().map(Vec::as_slice), 1, nr_of_bins, &policy, 0.0)
            .unwrap()
    }

    #[test]
    fn equi_width_three_points() {
        let s = scheme(&[0.0, 1.0, 2.0], 2, BinningPolicy::EquiWidth);
        let t = s.thresholds(0).unwrap();
        assert!((t[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((t[1] - 4.0 / 3.0).abs() < 1e-12);
        assert_eq!(s.quantize(&[0.0]).unwrap(), Word::new(&[0]));
        assert_eq!(s.quantize(&[1.0]).unwrap(), Word::new(&[1]));
        assert_eq!(s.quantize(&[2.0]).unwrap(), Word::new(&[2]));
    }

    #[test]
    fn out_of_range_values_clamp_to_edge_bins() {
        let s = scheme(&[0.0, 1.0, 2.0], 2, BinningPolicy::EquiWidth);
        assert_eq!(s.bin(0, -100.0), Some(0));
        assert_eq!(s.bin(0, 100.0), Some(2));
        assert_eq!(s.bin(1, 0.0), None);
        assert_eq!(s.top_bin(), 2);
    }

    #[test]
    fn equi_population_quantiles() {
        let values: Vec<f64> = (0..10).map(f64::from).collect();
        let rows = single_dim(&values);
        let s = QuantizationScheme::build(
            rows.iter().map(Vec::as_slice),
            1,
            4,
            &BinningPolicy::EquiPopulation,
            0.01,
        )
        .unwrap();
        // step = floor(10 / 5) = 2 -> indices 2, 4, 6, 8
        let expected = [2.01, 4.01, 6.01, 8.01];
        for (t, e) in s.thresholds(0).unwrap().iter().zip(expected) {
            assert!((t - e).abs() < 1e-12, "{t} != {e}");
        }
        // the compensation keeps the sampled value itself in the lower bin
        assert_eq!(s.bin(0, 2.0), Some(0));
        assert_eq!(s.bin(0, 2.02), Some(1));
    }

    #[test]
    fn compensation_keeps_ties_together() {
        let rows = single_dim(&[1.0, 1.0, 1.0, 2.0, 2.0, 3.0]);
        let s = QuantizationScheme::build(
            rows.iter().map(Vec::as_slice),
            1,
            1,
            &BinningPolicy::EquiPopulation,
            1e-6,
        )
        .unwrap();
        // threshold sits just right of sorted[3] = 2.0, so both 2.0 share a bin
        assert_eq!(s.bin(0, 2.0), Some(0));
        assert_eq!(s.bin(0, 3.0), Some(1));
    }

    #[test]
    fn tiny_corpus_gives_degenerate_thresholds() {
        let s = scheme(&[5.0], 3, BinningPolicy::EquiPopulation);
        assert_eq!(s.degenerate_dimensions(), vec![0]);
        assert_eq!(s.bin(0, 4.0), Some(0));
        assert_eq!(s.bin(0, 6.0), Some(3));
    }

    #[test]
    fn empty_corpus_is_an_error() {
        let err = QuantizationScheme::build(
            std::iter::empty::<&[f64]>(),
            2,
            3,
            &BinningPolicy::EquiWidth,
            0.0,
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::EmptyCorpus(_)));
    }

    #[test]
    fn fixed_preset_needs_no_data() {
        let s = QuantizationScheme::build(
            std::iter::empty::<&[f64]>(),
            3,
            4,
            &BinningPolicy::Fixed {
                preset: FixedPreset::Quintile,
            },
            0.0,
        )
        .unwrap();
        assert_eq!(s.dims(), 3);
        assert_eq!(s.quantize(&[-2.0, 0.0, 0.3]).unwrap(), Word::new(&[0, 2, 3]));
    }

    #[test]
    fn fixed_preset_with_wrong_bin_count_fails_fast() {
        let err = QuantizationScheme::build(
            std::iter::empty::<&[f64]>(),
            1,
            3,
            &BinningPolicy::Fixed {
                preset: FixedPreset::TernarySign,
            },
            0.0,
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::Configuration { .. }));
    }

    #[test]
    fn short_vector_is_dimension_mismatch() {
        let s = QuantizationScheme::from_thresholds(vec![vec![0.0], vec![0.0]]).unwrap();
        assert!(matches!(
            s.quantize(&[1.0]),
            Err(ScanError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        // extra trailing invariants are ignored
        assert_eq!(s.quantize(&[1.0, -1.0, 7.0]).unwrap(), Word::new(&[1, 0]));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert!(QuantizationScheme::from_thresholds(vec![vec![0.0, 1.0], vec![0.0]]).is_err());
        assert!(QuantizationScheme::from_thresholds(vec![]).is_err());
    }

    #[test]
    fn words_order_lexicographically() {
        let mut words = vec![
            Word::new(&[1, 0]),
            Word::new(&[0, 2]),
            Word::new(&[0, 1]),
            Word::new(&[1, 1]),
        ];
        words.sort();
        assert_eq!(
            words,
            vec![
                Word::new(&[0, 1]),
                Word::new(&[0, 2]),
                Word::new(&[1, 0]),
                Word::new(&[1, 1]),
            ]
        );
        assert_eq!(Word::new(&[3, 0, 12]).to_string(), "3.0.12");
    }
}
