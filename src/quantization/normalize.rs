//! Per-dimension z-scoring with background statistics.

use smallvec::SmallVec;

use crate::config::MAX_DIMENSIONS;
use crate::error::{Result, ScanError};

/// Values below this spread are treated as constant.
const MIN_STD: f64 = 1e-12;

/// Mean and standard deviation per dimension, learned from the background.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalizer {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl Normalizer {
    /// Identity transform over `dims` dimensions.
    pub fn identity(dims: usize) -> Self {
        Self {
            mean: vec![0.0; dims],
            std: vec![1.0; dims],
        }
    }

    /// Learn statistics from the leading `dims` values of each vector.
    pub fn fit<'a, I>(vectors: I, dims: usize) -> Result<Self>
    where
        I: IntoIterator<Item = &'a [f64]>,
    {
        // Welford, one pass
        let mut n = 0usize;
        let mut mean = vec![0.0; dims];
        let mut m2 = vec![0.0; dims];
        for v in vectors {
            if v.len() < dims {
                return Err(ScanError::DimensionMismatch {
                    expected: dims,
                    actual: v.len(),
                });
            }
            n += 1;
            for d in 0..dims {
                let delta = v[d] - mean[d];
                mean[d] += delta / n as f64;
                m2[d] += delta * (v[d] - mean[d]);
            }
        }
        if n == 0 {
            return Err(ScanError::EmptyCorpus(
                "normalization over zero vectors".into(),
            ));
        }
        let std = m2
            .into_iter()
            .map(|s| {
                let sd = (s / n as f64).sqrt();
                if sd < MIN_STD {
                    1.0
                } else {
                    sd
                }
            })
            .collect();
        Ok(Self { mean, std })
    }

    pub fn dims(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn std(&self) -> &[f64] {
        &self.std
    }

    /// Normalize the leading `dims()` values; trailing values pass through.
    pub fn apply(&self, vector: &[f64]) -> SmallVec<[f64; MAX_DIMENSIONS]> {
        vector
            .iter()
            .enumerate()
            .map(|(d, &v)| match (self.mean.get(d), self.std.get(d)) {
                (Some(m), Some(s)) => (v - m) / s,
                _ => v,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zscore_statistics() {
        let rows = [vec![1.0, 10.0], vec![3.0, 10.0]];
        let n = Normalizer::fit(rows.iter().map(Vec::as_slice), 2).unwrap();
        assert!((n.mean()[0] - 2.0).abs() < 1e-12);
        assert!((n.std()[0] - 1.0).abs() < 1e-12);
        // constant dimension is centred only
        assert_eq!(n.std()[1], 1.0);
        let out = n.apply(&[3.0, 12.0, 7.0]);
        assert_eq!(out.as_slice(), &[1.0, 2.0, 7.0]);
    }

    #[test]
    fn identity_is_noop() {
        let n = Normalizer::identity(3);
        assert_eq!(n.apply(&[1.5, -2.0, 0.0]).as_slice(), &[1.5, -2.0, 0.0]);
    }

    #[test]
    fn empty_input_is_error() {
        let err = Normalizer::fit(std::iter::empty::<&[f64]>(), 2).unwrap_err();
        assert!(matches!(err, ScanError::EmptyCorpus(_)));
    }
}
