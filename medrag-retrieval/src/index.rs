//! Vector index trait and the exact (flat) implementation.
//!
//! The index owns the normalization regime of its metric: vectors added to an
//! [`Metric::InnerProduct`] index and queries searched against it are scaled to
//! unit length inside the index, so a caller cannot search a cosine index with
//! a raw query vector by accident.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::vector::{dot, normalize, squared_l2};

const MAGIC: &[u8; 4] = b"MRVI";
const FORMAT_VERSION: u32 = 1;
/// magic + version + metric + dimension + count
const HEADER_LEN: usize = 4 + 4 + 1 + 4 + 8;

/// Similarity metric of a corpus, fixed at build time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Squared Euclidean distance over raw embeddings. Lower is closer.
    L2,
    /// Inner product over unit-normalized embeddings (cosine). Higher is closer.
    InnerProduct,
}

impl Metric {
    /// Apply this metric's normalization regime to a vector.
    pub fn prepare(&self, vector: &[f32]) -> Vec<f32> {
        match self {
            Self::L2 => vector.to_vec(),
            Self::InnerProduct => normalize(vector),
        }
    }

    /// Score two prepared vectors.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::L2 => squared_l2(a, b),
            Self::InnerProduct => dot(a, b),
        }
    }

    /// Whether higher scores rank first.
    pub fn higher_is_closer(&self) -> bool {
        matches!(self, Self::InnerProduct)
    }

    fn tag(&self) -> u8 {
        match self {
            Self::L2 => 0,
            Self::InnerProduct => 1,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::L2),
            1 => Some(Self::InnerProduct),
            _ => None,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::L2 => f.write_str("l2"),
            Self::InnerProduct => f.write_str("inner_product"),
        }
    }
}

/// One search hit: the vector id and its score under the index metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Position of the vector in the index.
    pub id: usize,
    /// Distance or similarity, depending on the metric.
    pub score: f32,
}

/// A nearest-neighbor index over fixed-dimension vectors.
///
/// Ids are assigned densely in insertion order starting at zero. Exact and
/// approximate backends share this contract.
pub trait VectorIndex: Send + Sync {
    /// The metric the index was built with.
    fn metric(&self) -> Metric;

    /// The vector dimension.
    fn dimension(&self) -> usize;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    /// Whether the index holds no vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a vector and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] for a wrongly sized vector and
    /// [`RagError::Validation`] for non-finite components.
    fn add(&mut self, vector: &[f32]) -> Result<usize>;

    /// Return up to `k` nearest neighbors, best first.
    ///
    /// `k` larger than [`len`](VectorIndex::len) returns every entry; an empty
    /// index returns an empty `Vec`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] if the query has the wrong dimension.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;
}

/// A [`VectorIndex`] that can be written to and read back from a single file.
pub trait PersistentIndex: VectorIndex + Sized {
    /// Write the index to `path`.
    fn persist(&self, path: &Path) -> Result<()>;

    /// Read an index previously written with [`persist`](PersistentIndex::persist).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::CorpusLoad`] for missing or corrupt files.
    fn load(path: &Path) -> Result<Self>;
}

/// Exact brute-force index storing vectors contiguously.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    metric: Metric,
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Create an empty index.
    pub fn new(metric: Metric, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::Config("index dimension must be greater than zero".into()));
        }
        Ok(Self { metric, dimension, data: Vec::new() })
    }

    /// The stored (prepared) vector with the given id.
    pub fn vector(&self, id: usize) -> Option<&[f32]> {
        let start = id.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Encode the index in the on-disk format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + std::mem::size_of_val(self.data.as_slice()));
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.push(self.metric.tag());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Decode an index from the on-disk format.
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() < HEADER_LEN {
            return Err(format!("index file truncated: {} bytes", bytes.len()));
        }
        if &bytes[0..4] != MAGIC {
            return Err("not a vector index file (bad magic)".to_string());
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(format!("unsupported index format version {version}"));
        }
        let metric =
            Metric::from_tag(bytes[8]).ok_or_else(|| format!("unknown metric tag {}", bytes[8]))?;
        let dimension = u32::from_le_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]) as usize;
        if dimension == 0 {
            return Err("index dimension is zero".to_string());
        }
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[13..21]);
        let count = usize::try_from(u64::from_le_bytes(count_bytes))
            .map_err(|_| "vector count overflows usize".to_string())?;

        let expected_len = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()))
            .ok_or_else(|| "index payload length overflows".to_string())?;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() != expected_len {
            return Err(format!(
                "invalid payload length: expected {expected_len} bytes for {count} vectors, got {}",
                payload.len()
            ));
        }

        let mut data = Vec::with_capacity(count * dimension);
        for chunk in payload.chunks_exact(4) {
            let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if !value.is_finite() {
                return Err("index contains non-finite values".to_string());
            }
            data.push(value);
        }

        Ok(Self { metric, dimension, data })
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn metric(&self) -> Metric {
        self.metric
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    fn add(&mut self, vector: &[f32]) -> Result<usize> {
        self.check_dimension(vector)?;
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(RagError::Validation("vector contains non-finite values".into()));
        }
        let id = self.len();
        self.data.extend(self.metric.prepare(vector));
        Ok(id)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check_dimension(query)?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.metric.prepare(query);
        let mut hits: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(id, stored)| Neighbor { id, score: self.metric.score(stored, &query) })
            .collect();

        let higher_first = self.metric.higher_is_closer();
        hits.sort_by(|a, b| {
            let by_score =
                if higher_first { b.score.total_cmp(&a.score) } else { a.score.total_cmp(&b.score) };
            by_score.then(a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

impl PersistentIndex for FlatIndex {
    fn persist(&self, path: &Path) -> Result<()> {
        let mut file = fs::File::create(path)?;
        file.write_all(&self.to_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn load(path: &Path) -> Result<Self> {
        let corpus = path.display().to_string();
        let bytes = fs::read(path)
            .map_err(|e| RagError::corpus_load(&corpus, format!("cannot read index file: {e}")))?;
        Self::from_bytes(&bytes).map_err(|message| RagError::corpus_load(corpus, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_product_ranks_descending() {
        let mut index = FlatIndex::new(Metric::InnerProduct, 2).unwrap();
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0]).unwrap();
        index.add(&[0.7, 0.7]).unwrap();

        let hits = index.search(&[2.0, 0.1], 3).unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![0, 2, 1]);
        assert!(hits[0].score <= 1.0 + 1e-6);
    }

    #[test]
    fn l2_ranks_ascending_on_raw_vectors() {
        let mut index = FlatIndex::new(Metric::L2, 2).unwrap();
        index.add(&[10.0, 0.0]).unwrap();
        index.add(&[1.0, 0.0]).unwrap();

        let hits = index.search(&[0.0, 0.0], 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[1].score, 100.0);
        // raw vectors are stored as-is under L2
        assert_eq!(index.vector(0).unwrap(), &[10.0, 0.0]);
    }

    #[test]
    fn empty_index_and_zero_k_return_nothing() {
        let mut index = FlatIndex::new(Metric::L2, 3).unwrap();
        assert!(index.search(&[0.0, 0.0, 1.0], 4).unwrap().is_empty());
        index.add(&[1.0, 1.0, 1.0]).unwrap();
        assert!(index.search(&[0.0, 0.0, 1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn rejects_wrong_dimension_and_non_finite() {
        let mut index = FlatIndex::new(Metric::InnerProduct, 3).unwrap();
        assert!(matches!(
            index.add(&[1.0, 2.0]),
            Err(RagError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(index.add(&[1.0, f32::NAN, 0.0]), Err(RagError::Validation(_))));
        assert!(matches!(index.search(&[1.0], 1), Err(RagError::DimensionMismatch { .. })));
        assert!(FlatIndex::new(Metric::L2, 0).is_err());
    }

    #[test]
    fn byte_format_round_trip_and_corruption() {
        let mut index = FlatIndex::new(Metric::InnerProduct, 4).unwrap();
        index.add(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        index.add(&[0.0, 0.0, 0.0, 0.0]).unwrap();

        let bytes = index.to_bytes();
        assert_eq!(FlatIndex::from_bytes(&bytes).unwrap(), index);

        assert!(FlatIndex::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(FlatIndex::from_bytes(&trailing).is_err());
        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(FlatIndex::from_bytes(&bad_magic).is_err());
        let mut bad_metric = bytes;
        bad_metric[8] = 9;
        assert!(FlatIndex::from_bytes(&bad_metric).is_err());
    }

    #[test]
    fn load_missing_file_is_corpus_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FlatIndex::load(&dir.path().join("missing.index")).unwrap_err();
        assert!(matches!(err, RagError::CorpusLoad { .. }));
    }
}
