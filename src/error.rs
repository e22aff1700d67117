//! Error types for fragscan.

use thiserror::Error;

/// Errors that can occur while building a corpus index or scoring queries.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Invalid configuration (bin count, preset mismatch, threshold order).
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Allocation failed while loading the corpus or growing a table.
    #[error(
        "resource exhausted while growing {what} to {requested} elements{}",
        structure_suffix(.structure)
    )]
    ResourceExhausted {
        what: &'static str,
        requested: usize,
        /// Structure being loaded when the allocation failed.
        structure: Option<String>,
    },

    /// Quantization or calibration over zero rows.
    #[error("empty corpus: {0}")]
    EmptyCorpus(String),

    /// Word or vector length does not match the configured dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A single structure carries unusable data. Sessions skip it.
    #[error("malformed structure {structure_id}: {reason}")]
    MalformedStructure { structure_id: String, reason: String },

    /// Invalid argument to an operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A run was cancelled between two queries.
    #[error("cancelled after {processed} queries")]
    Cancelled { processed: usize },

    /// I/O error while loading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScanError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn malformed(structure_id: &str, reason: impl Into<String>) -> Self {
        Self::MalformedStructure {
            structure_id: structure_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Attach the structure being loaded to a resource error.
    pub(crate) fn for_structure(self, structure_id: &str) -> Self {
        match self {
            Self::ResourceExhausted {
                what, requested, ..
            } => Self::ResourceExhausted {
                what,
                requested,
                structure: Some(structure_id.to_string()),
            },
            other => other,
        }
    }

    /// Whether the error only invalidates one structure rather than the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedStructure { .. })
    }
}

fn structure_suffix(structure: &Option<String>) -> String {
    structure
        .as_deref()
        .map(|s| format!(" (structure {s})"))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, ScanError>;

/// Reserve `additional` slots in `buf`, reporting allocation failure as
/// [`ScanError::ResourceExhausted`].
pub(crate) fn try_grow<T>(buf: &mut Vec<T>, additional: usize, what: &'static str) -> Result<()> {
    buf.try_reserve(additional)
        .map_err(|_| ScanError::ResourceExhausted {
            what,
            requested: buf.len().saturating_add(additional),
            structure: None,
        })
}
