//! Exact inner-product index over L2-normalized vectors.
//!
//! The corpus is a single manual, so a brute-force scan is both exact and
//! fast enough. Rows are addressed by their insertion position, which must
//! match the row order of the record store written next to the index.
//!
//! ## File Format (Version 1)
//!
//! ```text
//! [magic "MQIX" 4B]
//! [version u32 LE]
//! [dimension u32 LE]
//! [count u64 LE]
//! [vectors: count * dimension f32 LE, row-major]
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use manual_core::{ManualError, Result};

/// Magic bytes identifying a flat index file
const MAGIC: &[u8; 4] = b"MQIX";
/// Current format version
const VERSION: u32 = 1;
/// Header size: magic(4) + version(4) + dimension(4) + count(8)
const HEADER_SIZE: usize = 4 + 4 + 4 + 8;

/// A single search hit: row position and inner-product score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub row: usize,
    pub score: f32,
}

/// Flat exact-search index.
///
/// Vectors are stored contiguously: `[r0_d0, r0_d1, ..., r1_d0, ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Build an index from an ordered sequence of unit vectors.
    ///
    /// Row `i` of the index is `vectors[i]`.
    pub fn build(vectors: &[Vec<f32>]) -> Result<Self> {
        let first = vectors.first().ok_or(ManualError::EmptyInput)?;
        let dimension = first.len();
        if dimension == 0 {
            return Err(ManualError::invalid_argument("vectors must have at least one dimension"));
        }

        let mut data = Vec::with_capacity(vectors.len() * dimension);
        for (row, v) in vectors.iter().enumerate() {
            if v.len() != dimension {
                return Err(ManualError::invalid_argument(format!(
                    "row {} has {} dims, expected {}",
                    row,
                    v.len(),
                    dimension
                )));
            }
            data.extend_from_slice(v);
        }

        Ok(Self { dimension, data })
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Dimension of every stored vector.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Vector stored at `row`.
    pub fn vector(&self, row: usize) -> Option<&[f32]> {
        let start = row.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Top-`k` rows by descending inner product with `query`.
    ///
    /// `k` larger than the index returns every row. Equal scores are
    /// ordered by ascending row so results are deterministic.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(ManualError::DimensionMismatch {
                stored: self.dimension,
                current: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(row, v)| SearchHit {
                row,
                score: manual_core::vector::dot(query, v),
            })
            .collect();

        // Sort by (score desc, row asc)
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.row.cmp(&b.row)));
        hits.truncate(k);
        Ok(hits)
    }

    /// Persist the index, writing to a temp file and renaming into place.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("bin.tmp");
        {
            let mut file = BufWriter::new(File::create(&temp_path)?);
            file.write_all(MAGIC)?;
            file.write_all(&VERSION.to_le_bytes())?;
            file.write_all(&(self.dimension as u32).to_le_bytes())?;
            file.write_all(&(self.len() as u64).to_le_bytes())?;
            for x in &self.data {
                file.write_all(&x.to_le_bytes())?;
            }
            file.flush()?;
            file.get_ref().sync_all()?;
        }

        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Load an index written by [`FlatIndex::write_to`].
    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;

        if bytes.len() < HEADER_SIZE {
            return Err(ManualError::corrupt(path, "file too small for header"));
        }
        if &bytes[0..4] != MAGIC {
            return Err(ManualError::corrupt(path, "invalid magic"));
        }

        let version = read_u32(&bytes[4..8]);
        if version != VERSION {
            return Err(ManualError::corrupt(
                path,
                format!("unsupported version: {}", version),
            ));
        }

        let dimension = read_u32(&bytes[8..12]) as usize;
        let count = read_u64(&bytes[12..20]) as usize;
        if dimension == 0 || count == 0 {
            return Err(ManualError::corrupt(path, "empty index"));
        }

        let expected = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_SIZE))
            .ok_or_else(|| ManualError::corrupt(path, "header counts overflow"))?;
        if bytes.len() != expected {
            return Err(ManualError::corrupt(
                path,
                format!("expected {} bytes, found {}", expected, bytes.len()),
            ));
        }

        let data = bytes[HEADER_SIZE..]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Self { dimension, data })
    }
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn read_u64(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}
