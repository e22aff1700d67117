//! Input model: per-structure invariant vectors.
//!
//! A structure is cut into fixed-length windows. Invariants are computed
//! either per window or per ordered window pair `(i, j)` with `i < j`. Pair
//! data lives in one flat buffer indexed `(i * n + j) * dims` so loading a
//! structure is a single allocation that either succeeds or fails as a
//! whole.

use crate::config::MAX_DIMENSIONS;
use crate::error::{try_grow, Result, ScanError};

/// Inclusive residue range covered by a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidueRange {
    pub start: usize,
    pub end: usize,
}

impl ResidueRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Whether the two ranges share no residue.
    pub fn is_disjoint(&self, other: &ResidueRange) -> bool {
        self.end < other.start || other.end < self.start
    }
}

/// Identifies one scored item within a structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKey {
    Window(usize),
    Pair(usize, usize),
}

/// One invariant vector with the residues it describes.
#[derive(Debug, Clone, Copy)]
pub struct Item<'a> {
    pub key: ItemKey,
    pub ranges: (ResidueRange, Option<ResidueRange>),
    pub values: &'a [f64],
}

impl Item<'_> {
    /// Pair items whose windows overlap are not disjoint; single windows are.
    pub fn is_disjoint(&self) -> bool {
        match self.ranges {
            (_, None) => true,
            (a, Some(b)) => a.is_disjoint(&b),
        }
    }

    /// Short human-readable location, e.g. `w3[10-19]/w7[30-39]`.
    pub fn label(&self) -> String {
        match (self.key, self.ranges) {
            (ItemKey::Window(i), (r, _)) => format!("w{i}[{}-{}]", r.start, r.end),
            (ItemKey::Pair(i, j), (a, Some(b))) => format!(
                "w{i}[{}-{}]/w{j}[{}-{}]",
                a.start, a.end, b.start, b.end
            ),
            (ItemKey::Pair(i, j), (a, None)) => format!("w{i}[{}-{}]/w{j}", a.start, a.end),
        }
    }
}

/// Flat `n x n` matrix of invariant vectors for ordered window pairs.
///
/// Only the strict upper triangle (`i < j`) is populated.
#[derive(Debug, Clone, PartialEq)]
pub struct PairMatrix {
    n: usize,
    dims: usize,
    values: Vec<f64>,
    present: Vec<bool>,
}

impl PairMatrix {
    /// Allocate an empty matrix for `n` windows of `dims` invariants.
    pub fn new(n: usize, dims: usize) -> Result<Self> {
        if dims == 0 || dims > MAX_DIMENSIONS {
            return Err(ScanError::InvalidParameter(format!(
                "pair matrix dims must be in 1..={MAX_DIMENSIONS}, got {dims}"
            )));
        }
        let cells = n.checked_mul(n).ok_or(ScanError::ResourceExhausted {
            what: "pair matrix",
            requested: usize::MAX,
            structure: None,
        })?;
        let len = cells.checked_mul(dims).ok_or(ScanError::ResourceExhausted {
            what: "pair matrix",
            requested: usize::MAX,
            structure: None,
        })?;
        let mut values = Vec::new();
        try_grow(&mut values, len, "pair matrix")?;
        values.resize(len, 0.0);
        let mut present = Vec::new();
        try_grow(&mut present, cells, "pair matrix")?;
        present.resize(cells, false);
        Ok(Self {
            n,
            dims,
            values,
            present,
        })
    }

    pub fn windows(&self) -> usize {
        self.n
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Store the invariants of pair `(i, j)`.
    pub fn set(&mut self, i: usize, j: usize, values: &[f64]) -> Result<()> {
        if i >= j || j >= self.n {
            return Err(ScanError::InvalidParameter(format!(
                "pair ({i}, {j}) outside strict upper triangle of {} windows",
                self.n
            )));
        }
        if values.len() != self.dims {
            return Err(ScanError::DimensionMismatch {
                expected: self.dims,
                actual: values.len(),
            });
        }
        let cell = i * self.n + j;
        self.values[cell * self.dims..(cell + 1) * self.dims].copy_from_slice(values);
        self.present[cell] = true;
        Ok(())
    }

    pub fn get(&self, i: usize, j: usize) -> Option<&[f64]> {
        if i >= self.n || j >= self.n {
            return None;
        }
        let cell = i * self.n + j;
        self.present[cell].then(|| &self.values[cell * self.dims..(cell + 1) * self.dims])
    }

    /// Populated pairs in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &[f64])> + '_ {
        self.present
            .iter()
            .enumerate()
            .filter(|(_, p)| **p)
            .map(move |(cell, _)| {
                (
                    cell / self.n,
                    cell % self.n,
                    &self.values[cell * self.dims..(cell + 1) * self.dims],
                )
            })
    }

    pub fn populated(&self) -> usize {
        self.present.iter().filter(|&&p| p).count()
    }
}

/// Invariant payload of a structure.
#[derive(Debug, Clone, PartialEq)]
pub enum InvariantData {
    /// One vector per window, flat `n * dims`.
    Windows { dims: usize, values: Vec<f64> },
    /// One vector per ordered window pair.
    Pairs(PairMatrix),
}

impl InvariantData {
    pub fn dims(&self) -> usize {
        match self {
            InvariantData::Windows { dims, .. } => *dims,
            InvariantData::Pairs(m) => m.dims(),
        }
    }
}

/// One background or query chain.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureRecord {
    pub structure_id: String,
    pub chain_id: Option<String>,
    pub chain_length: usize,
    pub windows: Vec<ResidueRange>,
    pub data: InvariantData,
}

impl StructureRecord {
    /// Enumerate scored items in window (or row-major pair) order.
    pub fn items(&self) -> Box<dyn Iterator<Item = Item<'_>> + '_> {
        match &self.data {
            InvariantData::Windows { dims, values } => {
                let dims = (*dims).max(1);
                Box::new(
                    values
                        .chunks_exact(dims)
                        .zip(self.windows.iter())
                        .enumerate()
                        .map(|(i, (v, r))| Item {
                            key: ItemKey::Window(i),
                            ranges: (*r, None),
                            values: v,
                        }),
                )
            }
            InvariantData::Pairs(matrix) => Box::new(matrix.iter().filter_map(move |(i, j, v)| {
                Some(Item {
                    key: ItemKey::Pair(i, j),
                    ranges: (*self.windows.get(i)?, self.windows.get(j).copied()),
                    values: v,
                })
            })),
        }
    }

    pub fn item_count(&self) -> usize {
        match &self.data {
            InvariantData::Windows { dims, values } => values.len() / (*dims).max(1),
            InvariantData::Pairs(m) => m.populated(),
        }
    }

    /// Reject data the scorer cannot use.
    ///
    /// Every item must carry at least `required_dims` finite invariants.
    pub fn validate(&self, required_dims: usize) -> Result<()> {
        let id = self.structure_id.as_str();
        let dims = self.data.dims();
        if dims == 0 || dims < required_dims {
            return Err(ScanError::malformed(
                id,
                format!("items carry {dims} invariants, need {required_dims}"),
            ));
        }
        match &self.data {
            InvariantData::Windows { values, .. } => {
                if values.len() % dims != 0 {
                    return Err(ScanError::malformed(
                        id,
                        format!("{} window values is not a multiple of {dims}", values.len()),
                    ));
                }
                if values.len() / dims != self.windows.len() {
                    return Err(ScanError::malformed(
                        id,
                        format!(
                            "{} window vectors for {} residue ranges",
                            values.len() / dims,
                            self.windows.len()
                        ),
                    ));
                }
            }
            InvariantData::Pairs(matrix) => {
                if matrix.windows() != self.windows.len() {
                    return Err(ScanError::malformed(
                        id,
                        format!(
                            "pair matrix over {} windows, {} residue ranges",
                            matrix.windows(),
                            self.windows.len()
                        ),
                    ));
                }
            }
        }
        if self.item_count() == 0 {
            return Err(ScanError::malformed(id, "no invariant vectors"));
        }
        for item in self.items() {
            if let Some(pos) = item.values.iter().position(|v| !v.is_finite()) {
                return Err(ScanError::malformed(
                    id,
                    format!("{} invariant {pos} is not finite", item.label()),
                ));
            }
        }
        if let Some(r) = self.windows.iter().find(|r| r.start > r.end) {
            return Err(ScanError::malformed(
                id,
                format!("window range {}-{} is reversed", r.start, r.end),
            ));
        }
        Ok(())
    }
}

/// Streaming builder for a [`StructureRecord`].
///
/// Buffers grow by amortized doubling through `try_reserve`, so allocation
/// failure surfaces as [`ScanError::ResourceExhausted`].
#[derive(Debug)]
pub struct StructureRecordBuilder {
    structure_id: String,
    chain_id: Option<String>,
    chain_length: usize,
    dims: usize,
    windows: Vec<ResidueRange>,
    window_values: Vec<f64>,
    pairs: Vec<(usize, usize, usize)>,
    pair_values: Vec<f64>,
}

impl StructureRecordBuilder {
    pub fn new(structure_id: impl Into<String>, dims: usize) -> Self {
        Self {
            structure_id: structure_id.into(),
            chain_id: None,
            chain_length: 0,
            dims,
            windows: Vec::new(),
            window_values: Vec::new(),
            pairs: Vec::new(),
            pair_values: Vec::new(),
        }
    }

    #[must_use]
    pub fn chain(mut self, chain_id: impl Into<String>, chain_length: usize) -> Self {
        self.chain_id = Some(chain_id.into());
        self.chain_length = chain_length;
        self
    }

    /// Register a window's residue range. Returns its index.
    pub fn push_window_range(&mut self, range: ResidueRange) -> Result<usize> {
        try_grow(&mut self.windows, 1, "window ranges")?;
        self.windows.push(range);
        self.chain_length = self.chain_length.max(range.end + 1);
        Ok(self.windows.len() - 1)
    }

    /// Add a window together with its own invariant vector.
    pub fn push_window(&mut self, range: ResidueRange, values: &[f64]) -> Result<usize> {
        self.check_len(values)?;
        try_grow(&mut self.window_values, self.dims, "window invariants")?;
        self.window_values.extend_from_slice(values);
        self.push_window_range(range)
    }

    /// Add invariants for the ordered window pair `(i, j)`.
    pub fn push_pair(&mut self, i: usize, j: usize, values: &[f64]) -> Result<()> {
        self.check_len(values)?;
        try_grow(&mut self.pairs, 1, "pair index")?;
        try_grow(&mut self.pair_values, self.dims, "pair invariants")?;
        let offset = self.pair_values.len();
        self.pair_values.extend_from_slice(values);
        self.pairs.push((i, j, offset));
        Ok(())
    }

    fn check_len(&self, values: &[f64]) -> Result<()> {
        if values.len() != self.dims {
            return Err(ScanError::DimensionMismatch {
                expected: self.dims,
                actual: values.len(),
            });
        }
        Ok(())
    }

    /// Assemble the record. Pair data wins if any pair was pushed.
    pub fn build(self) -> Result<StructureRecord> {
        let data = if self.pairs.is_empty() {
            InvariantData::Windows {
                dims: self.dims,
                values: self.window_values,
            }
        } else {
            let mut matrix = PairMatrix::new(self.windows.len(), self.dims)?;
            for &(i, j, offset) in &self.pairs {
                matrix
                    .set(i, j, &self.pair_values[offset..offset + self.dims])
                    .map_err(|e| ScanError::malformed(&self.structure_id, e.to_string()))?;
            }
            InvariantData::Pairs(matrix)
        };
        Ok(StructureRecord {
            structure_id: self.structure_id,
            chain_id: self.chain_id,
            chain_length: self.chain_length,
            windows: self.windows,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair_record() -> StructureRecord {
        let mut b = StructureRecordBuilder::new("1abc", 2).chain("A", 40);
        b.push_window_range(ResidueRange::new(0, 9)).unwrap();
        b.push_window_range(ResidueRange::new(5, 14)).unwrap();
        b.push_window_range(ResidueRange::new(20, 29)).unwrap();
        b.push_pair(0, 1, &[0.1, 0.2]).unwrap();
        b.push_pair(0, 2, &[0.3, 0.4]).unwrap();
        b.push_pair(1, 2, &[0.5, 0.6]).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn disjoint_ranges() {
        let a = ResidueRange::new(0, 9);
        assert!(!a.is_disjoint(&ResidueRange::new(9, 12)));
        assert!(a.is_disjoint(&ResidueRange::new(10, 12)));
        assert!(ResidueRange::new(10, 12).is_disjoint(&a));
    }

    #[test]
    fn pair_matrix_is_row_major() {
        let record = pair_record();
        let keys: Vec<ItemKey> = record.items().map(|i| i.key).collect();
        assert_eq!(
            keys,
            vec![ItemKey::Pair(0, 1), ItemKey::Pair(0, 2), ItemKey::Pair(1, 2)]
        );
        match &record.data {
            InvariantData::Pairs(m) => {
                assert_eq!(m.get(0, 2), Some(&[0.3, 0.4][..]));
                assert_eq!(m.get(2, 0), None);
            }
            _ => panic!("expected pair data"),
        }
    }

    #[test]
    fn pair_disjointness_follows_ranges() {
        let record = pair_record();
        let disjoint: Vec<bool> = record.items().map(|i| i.is_disjoint()).collect();
        assert_eq!(disjoint, vec![false, true, true]);
    }

    #[test]
    fn pair_outside_upper_triangle_is_malformed() {
        let mut b = StructureRecordBuilder::new("x", 1);
        b.push_window_range(ResidueRange::new(0, 3)).unwrap();
        b.push_window_range(ResidueRange::new(4, 7)).unwrap();
        b.push_pair(1, 0, &[1.0]).unwrap();
        let err = b.build().unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn window_records_validate() {
        let mut b = StructureRecordBuilder::new("2xyz", 3);
        b.push_window(ResidueRange::new(0, 4), &[1.0, 2.0, 3.0]).unwrap();
        b.push_window(ResidueRange::new(2, 6), &[1.0, f64::NAN, 3.0])
            .unwrap();
        let record = b.build().unwrap();
        assert_eq!(record.chain_length, 7);
        assert_eq!(record.item_count(), 2);
        let err = record.validate(3).unwrap_err();
        assert!(err.to_string().contains("w1[2-6] invariant 1 is not finite"));
    }

    #[test]
    fn too_few_dimensions_is_malformed() {
        let mut b = StructureRecordBuilder::new("3abc", 2);
        b.push_window(ResidueRange::new(0, 4), &[1.0, 2.0]).unwrap();
        let record = b.build().unwrap();
        assert!(record.validate(2).is_ok());
        assert!(record.validate(3).unwrap_err().is_recoverable());
    }

    #[test]
    fn empty_record_is_malformed() {
        let record = StructureRecordBuilder::new("empty", 2).build().unwrap();
        assert!(record.validate(1).is_err());
    }

    #[test]
    fn push_rejects_wrong_length() {
        let mut b = StructureRecordBuilder::new("x", 2);
        assert!(matches!(
            b.push_window(ResidueRange::new(0, 1), &[1.0]),
            Err(ScanError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn labels() {
        let record = pair_record();
        let labels: Vec<String> = record.items().map(|i| i.label()).collect();
        assert_eq!(labels[0], "w0[0-9]/w1[5-14]");
    }
}
