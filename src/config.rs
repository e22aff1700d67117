//! Scan configuration.
//!
//! All knobs that must agree between the background pass and the query pass
//! live in one [`ScanConfig`], so the background distribution and the query
//! scores are always produced under the same filter, binning and scoring
//! rules.
//!
//! ```
//! use fragscan::config::{BinningPolicy, ScanConfig};
//!
//! let config = ScanConfig::default()
//!     .with_bins(2)
//!     .with_binning(BinningPolicy::EquiWidth)
//!     .with_matched_dimensions(1);
//! assert!(config.validate().is_ok());
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// Maximum number of invariants per item (and thus per word).
pub const MAX_DIMENSIONS: usize = 14;

/// Largest supported bin count. Bin indices are stored as `u8`.
pub const MAX_BINS: usize = 254;

/// Hand-specified threshold tables.
///
/// Each built-in preset was designed for exactly one bin count; using it
/// with any other `nr_of_bins` is a configuration error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum FixedPreset {
    /// Negative / near-zero / positive around a +-0.5 band (2 thresholds).
    TernarySign,
    /// Five bins over normalized invariants (4 thresholds).
    Quintile,
    /// Caller-supplied table: one row per dimension, or a single row
    /// applied to every dimension.
    Custom { thresholds: Vec<Vec<f64>> },
}

impl FixedPreset {
    /// Bin count the preset was designed for, if it is fixed.
    pub fn designed_bins(&self) -> Option<usize> {
        match self {
            FixedPreset::TernarySign => Some(2),
            FixedPreset::Quintile => Some(4),
            FixedPreset::Custom { thresholds } => thresholds.first().map(Vec::len),
        }
    }

    /// Threshold row for `dimension`.
    pub fn row(&self, dimension: usize) -> Option<&[f64]> {
        const TERNARY: [f64; 2] = [-0.5, 0.5];
        const QUINTILE: [f64; 4] = [-1.0, -0.25, 0.25, 1.0];
        match self {
            FixedPreset::TernarySign => Some(&TERNARY),
            FixedPreset::Quintile => Some(&QUINTILE),
            FixedPreset::Custom { thresholds } => match thresholds.len() {
                0 => None,
                1 => thresholds.first().map(Vec::as_slice),
                _ => thresholds.get(dimension).map(Vec::as_slice),
            },
        }
    }

    fn validate(&self, nr_of_bins: usize, dimensions: usize) -> Result<()> {
        let designed = self
            .designed_bins()
            .ok_or_else(|| ScanError::config("fixed threshold table is empty"))?;
        if designed != nr_of_bins {
            return Err(ScanError::config(format!(
                "fixed preset {self:?} is defined for {designed} bins, configured nr_of_bins is {nr_of_bins}"
            )));
        }
        if let FixedPreset::Custom { thresholds } = self {
            if thresholds.len() != 1 && thresholds.len() < dimensions {
                return Err(ScanError::config(format!(
                    "fixed table has {} rows, need 1 or at least {dimensions}",
                    thresholds.len()
                )));
            }
        }
        for d in 0..dimensions {
            let row = self
                .row(d)
                .ok_or_else(|| ScanError::config(format!("fixed table has no row for dimension {d}")))?;
            if row.len() != nr_of_bins {
                return Err(ScanError::config(format!(
                    "fixed table row {d} has {} thresholds, expected {nr_of_bins}",
                    row.len()
                )));
            }
            if row.iter().any(|t| !t.is_finite()) {
                return Err(ScanError::config(format!(
                    "fixed table row {d} contains a non-finite threshold"
                )));
            }
            if row.windows(2).any(|w| w[0] >= w[1]) {
                return Err(ScanError::config(format!(
                    "fixed table row {d} is not strictly ascending"
                )));
            }
        }
        Ok(())
    }
}

/// How per-dimension thresholds are derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BinningPolicy {
    /// Hand-specified table.
    Fixed { preset: FixedPreset },
    /// `min..max` split into `nr_of_bins + 1` equal cells.
    EquiWidth,
    /// Thresholds at population quantiles of the background values.
    EquiPopulation,
}

/// How item rarities become one structure-level score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScoringMode {
    /// Mean rarity over qualifying items ("many mildly unusual fragments").
    Average,
    /// Single most extreme invariant value per structure ("one rare
    /// fragment"). With `split_sign`, positive and negative extremes are
    /// ranked against separate background distributions.
    Extreme { split_sign: bool },
}

/// Empirical p-value convention used by the calibrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PValueConvention {
    /// `hits / N`, floored at epsilon, where `hits` counts background
    /// values at least as large as the observed one.
    #[default]
    Empirical,
    /// `(hits + 1) / (N + 1)`.
    Smoothed,
}

/// Configuration for a scan session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of thresholds per dimension (`nr_of_bins + 1` bins).
    pub nr_of_bins: usize,
    /// Threshold derivation policy.
    pub binning: BinningPolicy,
    /// Added to equi-population thresholds so tied values stay together.
    pub rounding_compensation: f64,
    /// Maximum number of dimensions allowed to differ in a fuzzy match.
    pub max_mismatches: usize,
    /// Largest per-dimension bin difference a fuzzy match may carry.
    pub max_bin_offset: u8,
    /// Number of leading invariants that form a word (1..=14).
    pub matched_dimensions: usize,
    /// Only score window pairs whose residue ranges do not overlap.
    pub disjoint_only: bool,
    /// Items whose magnitude is below this are ignored.
    pub min_magnitude: f64,
    /// Invariant used as the item magnitude and for extreme tracking.
    pub magnitude_dimension: usize,
    /// Z-score invariants with background statistics before use.
    pub normalize: bool,
    /// Structure-level scoring mode.
    pub scoring: ScoringMode,
    /// Empirical p-value convention.
    pub p_value: PValueConvention,
    /// Number of rarest items quoted in the evidence string.
    pub evidence_items: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            nr_of_bins: 4,
            binning: BinningPolicy::EquiPopulation,
            rounding_compensation: 1e-4,
            max_mismatches: 1,
            max_bin_offset: 1,
            matched_dimensions: 3,
            disjoint_only: false,
            min_magnitude: 0.0,
            magnitude_dimension: 0,
            normalize: false,
            scoring: ScoringMode::Average,
            p_value: PValueConvention::Empirical,
            evidence_items: 3,
        }
    }
}

impl ScanConfig {
    #[must_use]
    pub fn with_bins(mut self, nr_of_bins: usize) -> Self {
        self.nr_of_bins = nr_of_bins;
        self
    }

    #[must_use]
    pub fn with_binning(mut self, binning: BinningPolicy) -> Self {
        self.binning = binning;
        self
    }

    #[must_use]
    pub fn with_rounding_compensation(mut self, compensation: f64) -> Self {
        self.rounding_compensation = compensation;
        self
    }

    #[must_use]
    pub fn with_max_mismatches(mut self, max_mismatches: usize) -> Self {
        self.max_mismatches = max_mismatches;
        self
    }

    #[must_use]
    pub fn with_max_bin_offset(mut self, offset: u8) -> Self {
        self.max_bin_offset = offset;
        self
    }

    #[must_use]
    pub fn with_matched_dimensions(mut self, dims: usize) -> Self {
        self.matched_dimensions = dims;
        self
    }

    #[must_use]
    pub fn with_disjoint_only(mut self, disjoint_only: bool) -> Self {
        self.disjoint_only = disjoint_only;
        self
    }

    #[must_use]
    pub fn with_min_magnitude(mut self, min_magnitude: f64) -> Self {
        self.min_magnitude = min_magnitude;
        self
    }

    #[must_use]
    pub fn with_magnitude_dimension(mut self, dimension: usize) -> Self {
        self.magnitude_dimension = dimension;
        self
    }

    #[must_use]
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    #[must_use]
    pub fn with_scoring(mut self, scoring: ScoringMode) -> Self {
        self.scoring = scoring;
        self
    }

    #[must_use]
    pub fn with_p_value(mut self, convention: PValueConvention) -> Self {
        self.p_value = convention;
        self
    }

    #[must_use]
    pub fn with_evidence_items(mut self, n: usize) -> Self {
        self.evidence_items = n;
        self
    }

    /// Check every field; FIXED presets are checked against `nr_of_bins`.
    pub fn validate(&self) -> Result<()> {
        if self.nr_of_bins == 0 || self.nr_of_bins > MAX_BINS {
            return Err(ScanError::config(format!(
                "nr_of_bins must be in 1..={MAX_BINS}, got {}",
                self.nr_of_bins
            )));
        }
        if self.matched_dimensions == 0 || self.matched_dimensions > MAX_DIMENSIONS {
            return Err(ScanError::config(format!(
                "matched_dimensions must be in 1..={MAX_DIMENSIONS}, got {}",
                self.matched_dimensions
            )));
        }
        if self.magnitude_dimension >= MAX_DIMENSIONS {
            return Err(ScanError::config(format!(
                "magnitude_dimension must be below {MAX_DIMENSIONS}, got {}",
                self.magnitude_dimension
            )));
        }
        if self.max_mismatches > self.matched_dimensions {
            return Err(ScanError::config(format!(
                "max_mismatches ({}) exceeds matched_dimensions ({})",
                self.max_mismatches, self.matched_dimensions
            )));
        }
        if self.max_bin_offset == 0 && self.max_mismatches > 0 {
            return Err(ScanError::config(
                "max_bin_offset 0 admits no mismatching bins; set max_mismatches to 0",
            ));
        }
        if !self.rounding_compensation.is_finite() || !self.min_magnitude.is_finite() {
            return Err(ScanError::config(
                "rounding_compensation and min_magnitude must be finite",
            ));
        }
        if let BinningPolicy::Fixed { preset } = &self.binning {
            preset.validate(self.nr_of_bins, self.matched_dimensions)?;
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Number of invariants every item must carry.
    pub(crate) fn required_dimensions(&self) -> usize {
        self.matched_dimensions.max(self.magnitude_dimension + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        ScanConfig::default().validate().unwrap();
    }

    #[test]
    fn fixed_preset_rejects_other_bin_counts() {
        let config = ScanConfig::default()
            .with_bins(3)
            .with_binning(BinningPolicy::Fixed {
                preset: FixedPreset::Quintile,
            });
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ScanError::Configuration { .. }));
        assert!(err.to_string().contains("defined for 4 bins"));
    }

    #[test]
    fn fixed_preset_accepts_its_bin_count() {
        let config = ScanConfig::default()
            .with_bins(2)
            .with_binning(BinningPolicy::Fixed {
                preset: FixedPreset::TernarySign,
            });
        config.validate().unwrap();
    }

    #[test]
    fn custom_table_must_ascend() {
        let config = ScanConfig::default()
            .with_bins(2)
            .with_matched_dimensions(1)
            .with_max_mismatches(0)
            .with_binning(BinningPolicy::Fixed {
                preset: FixedPreset::Custom {
                    thresholds: vec![vec![1.0, 1.0]],
                },
            });
        assert!(config.validate().is_err());
    }

    #[test]
    fn custom_table_needs_a_row_per_dimension() {
        let config = ScanConfig::default()
            .with_bins(2)
            .with_matched_dimensions(3)
            .with_binning(BinningPolicy::Fixed {
                preset: FixedPreset::Custom {
                    thresholds: vec![vec![0.0, 1.0], vec![0.0, 1.0]],
                },
            });
        assert!(config.validate().is_err());
    }

    #[test]
    fn dimension_bounds() {
        assert!(ScanConfig::default().with_matched_dimensions(0).validate().is_err());
        assert!(ScanConfig::default().with_matched_dimensions(15).validate().is_err());
        assert!(ScanConfig::default()
            .with_matched_dimensions(14)
            .validate()
            .is_ok());
        assert!(ScanConfig::default()
            .with_matched_dimensions(2)
            .with_max_mismatches(3)
            .validate()
            .is_err());
    }

    #[test]
    fn json_roundtrip_keeps_defaults_for_missing_fields() {
        let config = ScanConfig::from_json_str(
            r#"{"nr_of_bins": 2, "binning": {"policy": "equi_width"}, "scoring": {"mode": "extreme", "split_sign": true}}"#,
        )
        .unwrap();
        assert_eq!(config.nr_of_bins, 2);
        assert_eq!(config.binning, BinningPolicy::EquiWidth);
        assert_eq!(config.scoring, ScoringMode::Extreme { split_sign: true });
        assert_eq!(config.max_mismatches, 1);
    }

    #[test]
    fn json_with_fixed_preset() {
        let config = ScanConfig::from_json_str(
            r#"{"nr_of_bins": 4, "binning": {"policy": "fixed", "preset": {"name": "quintile"}}}"#,
        )
        .unwrap();
        assert_eq!(
            config.binning,
            BinningPolicy::Fixed {
                preset: FixedPreset::Quintile
            }
        );
    }

    #[test]
    fn json_file_is_validated() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"nr_of_bins": 0}}"#).unwrap();
        let err = ScanConfig::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, ScanError::Configuration { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ScanConfig::from_json_file("/nonexistent/fragscan.json").unwrap_err();
        assert!(matches!(err, ScanError::Io(_)));
    }
}
