//! fragscan: rare 3-D sub-structure detection by quantized invariant matching.
//!
//! A protein chain is described by real-valued geometric invariants, one
//! vector per window or per ordered window pair. This crate decides which of
//! those vectors are statistically rare with respect to a background corpus:
//!
//! ```text
//! background vectors -> quantize -> sorted words -> WordDictionary
//! query vectors      -> quantize -> fuzzy match  -> match counts
//!                    -> rarity   -> structure score -> empirical p-value
//!                    -> ResultTable (ranked)
//! ```
//!
//! - [`quantization`]: per-dimension thresholds turn a vector into a word.
//! - [`dictionary`]: sorted word -> count table with ordered insertion.
//! - [`matcher`]: bounded-mismatch range search over the sorted table.
//! - [`scoring`]: `-log10` rarities and structure-level aggregation.
//! - [`calibration`]: rank-based p-values against background scores.
//! - [`results`]: ranked rows and the sink they are emitted to.
//! - [`session`]: build-background / score-query lifecycle.
//!
//! # Example
//!
//! ```
//! use fragscan::config::{BinningPolicy, ScanConfig};
//! use fragscan::invariant::{ResidueRange, StructureRecordBuilder};
//! use fragscan::session::{CancellationToken, ScanSession};
//!
//! # fn main() -> fragscan::Result<()> {
//! let record = |id: &str, values: &[f64]| {
//!     let mut b = StructureRecordBuilder::new(id, 1);
//!     for (i, &v) in values.iter().enumerate() {
//!         b.push_window(ResidueRange::new(i * 10, i * 10 + 9), &[v])?;
//!     }
//!     b.build()
//! };
//!
//! let config = ScanConfig::default()
//!     .with_bins(2)
//!     .with_binning(BinningPolicy::EquiWidth)
//!     .with_matched_dimensions(1)
//!     .with_max_mismatches(0);
//! let mut session = ScanSession::build(config, vec![record("bg", &[0.0, 1.0, 2.0])?])?;
//! session.run(vec![record("query", &[1.0])?], &CancellationToken::new())?;
//!
//! let rows = session.finalize();
//! assert_eq!(rows[0].structure_id, "query");
//! # Ok(())
//! # }
//! ```
//!
//! # Scores are only comparable under one configuration
//!
//! The item filter (disjoint-only, minimum magnitude), the binning and the
//! mismatch budget shape both the query scores and the background
//! distribution they are ranked against. A [`session::ScanSession`] derives
//! both from the same [`config::ScanConfig`].

pub mod calibration;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod invariant;
pub mod matcher;
pub mod quantization;
pub mod results;
pub mod scoring;
pub mod session;

// Re-exports
pub use config::ScanConfig;
pub use dictionary::WordDictionary;
pub use error::{Result, ScanError};
pub use quantization::{QuantizationScheme, Word};
pub use session::ScanSession;
