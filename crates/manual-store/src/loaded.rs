//! A fully loaded, verified index generation.

use std::fs;

use tracing::{info, warn};

use manual_core::{Chunk, IndexMeta, ManualError, Result, Section};

use crate::flat::FlatIndex;
use crate::layout::{GenerationPaths, StorageLayout};
use crate::records::{digest, parse_jsonl};

/// Section-level index with its row-aligned record store.
#[derive(Debug, Clone)]
pub struct SectionIndex {
    pub index: FlatIndex,
    pub store: Vec<Section>,
}

/// Chunk index, chunk store and optional section index of one generation.
///
/// Row `i` of `chunks` is the vector of `chunk_store[i]`; the same holds
/// for the section pair.
#[derive(Debug, Clone)]
pub struct LoadedIndex {
    pub meta: IndexMeta,
    pub chunks: FlatIndex,
    pub chunk_store: Vec<Chunk>,
    pub sections: Option<SectionIndex>,
}

impl LoadedIndex {
    /// Assemble an index from parts, enforcing row alignment.
    pub fn new(
        meta: IndexMeta,
        chunks: FlatIndex,
        chunk_store: Vec<Chunk>,
        sections: Option<SectionIndex>,
    ) -> Result<Self> {
        if chunks.len() != chunk_store.len() {
            return Err(ManualError::internal(format!(
                "chunk index has {} rows but store has {} records",
                chunks.len(),
                chunk_store.len()
            )));
        }
        if let Some(s) = &sections {
            if s.index.len() != s.store.len() {
                return Err(ManualError::internal(format!(
                    "section index has {} rows but store has {} records",
                    s.index.len(),
                    s.store.len()
                )));
            }
        }
        Ok(Self {
            meta,
            chunks,
            chunk_store,
            sections,
        })
    }

    /// Load the live generation.
    ///
    /// `dimension` and `model_id` describe the current embedding provider;
    /// a dimension change means stored vectors are unusable.
    pub fn load(layout: &StorageLayout, dimension: usize, model_id: &str) -> Result<Self> {
        let build_id = layout.current()?.ok_or(ManualError::IndexNotBuilt)?;
        let paths = layout.generation(build_id);
        let loaded = Self::load_generation(&paths, dimension, model_id)?;
        info!(
            "Loaded index generation {} ({} chunks, {} sections)",
            build_id, loaded.meta.chunks, loaded.meta.sections
        );
        Ok(loaded)
    }

    fn load_generation(paths: &GenerationPaths, dimension: usize, model_id: &str) -> Result<Self> {
        let meta: IndexMeta = serde_json::from_slice(&fs::read(&paths.meta)?)?;

        if meta.dimension != dimension {
            return Err(ManualError::DimensionMismatch {
                stored: meta.dimension,
                current: dimension,
            });
        }
        if meta.embedding_model != model_id {
            warn!(
                "Index was built with {:?} but the embedder is {:?}; scores may drift",
                meta.embedding_model, model_id
            );
        }

        let chunks = FlatIndex::read_from(&paths.index)?;
        let chunk_store: Vec<Chunk> = read_verified(&paths.store, &meta.store_digest)?;
        check_rows(&paths.index, &chunks, chunk_store.len(), meta.dimension)?;

        let sections = match &meta.section_store_digest {
            Some(expected) if meta.sections > 0 => {
                let index = FlatIndex::read_from(&paths.section_index)?;
                let store: Vec<Section> = read_verified(&paths.section_store, expected)?;
                check_rows(&paths.section_index, &index, store.len(), meta.dimension)?;
                Some(SectionIndex { index, store })
            }
            _ => None,
        };

        Self::new(meta, chunks, chunk_store, sections)
    }

    /// Dimension of the stored vectors.
    pub fn dimension(&self) -> usize {
        self.chunks.dimension()
    }
}

fn read_verified<T: serde::de::DeserializeOwned>(
    path: &std::path::Path,
    expected: &str,
) -> Result<Vec<T>> {
    let bytes = fs::read(path)?;
    if digest(&bytes) != expected {
        return Err(ManualError::corrupt(path, "store digest does not match metadata"));
    }
    parse_jsonl(&bytes, path)
}

fn check_rows(
    path: &std::path::Path,
    index: &FlatIndex,
    records: usize,
    dimension: usize,
) -> Result<()> {
    if index.dimension() != dimension {
        return Err(ManualError::corrupt(
            path,
            format!(
                "index has {} dims, metadata says {}",
                index.dimension(),
                dimension
            ),
        ));
    }
    if index.len() != records {
        return Err(ManualError::corrupt(
            path,
            format!("index has {} rows, store has {}", index.len(), records),
        ));
    }
    Ok(())
}
