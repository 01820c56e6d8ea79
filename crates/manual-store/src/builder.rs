//! Full index rebuild from ingestion records.

use tracing::{debug, info, warn};
use ulid::Ulid;

use manual_core::vector::normalize;
use manual_core::{
    now_millis, BuildPhase, BuildReport, Embedder, IndexMeta, ManualError, Result,
};

use crate::flat::FlatIndex;
use crate::layout::{GenerationPaths, StorageLayout};
use crate::loaded::{LoadedIndex, SectionIndex};
use crate::records::{load_chunks, load_sections, write_jsonl};

/// Progress callback: `(phase, done, total)`.
pub type Progress<'a> = &'a (dyn Fn(BuildPhase, usize, usize) + Send + Sync);

/// Progress callback that ignores every update.
pub fn no_progress(_: BuildPhase, _: usize, _: usize) {}

/// Rebuilds the chunk and section indexes from the ingestion output.
pub struct IndexBuilder<'a, E: ?Sized> {
    layout: &'a StorageLayout,
    embedder: &'a E,
    batch_size: usize,
}

impl<'a, E> IndexBuilder<'a, E>
where
    E: Embedder + ?Sized,
{
    pub fn new(layout: &'a StorageLayout, embedder: &'a E, batch_size: usize) -> Self {
        Self {
            layout,
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    /// Run a full build and publish it.
    ///
    /// Nothing is published unless every step succeeds; on failure the
    /// previous generation stays live.
    pub async fn build(&self, progress: Progress<'_>) -> Result<(BuildReport, LoadedIndex)> {
        let chunks = load_chunks(&self.layout.chunks_input())?;
        let sections = load_sections(&self.layout.sections_input())?;

        let build_id = Ulid::new();
        info!(
            "Building index {} from {} chunks and {} sections",
            build_id,
            chunks.len(),
            sections.len()
        );

        let staged = self.layout.stage(build_id)?;
        match self.build_staged(build_id, &staged, chunks, sections, progress).await {
            Ok(loaded) => {
                self.layout.commit(build_id)?;
                let report = BuildReport {
                    build_id,
                    chunks: loaded.meta.chunks,
                    sections: loaded.meta.sections,
                    dimension: loaded.meta.dimension,
                };
                Ok((report, loaded))
            }
            Err(e) => {
                warn!("Index build {} failed: {}", build_id, e);
                self.layout.discard(build_id);
                Err(e)
            }
        }
    }

    async fn build_staged(
        &self,
        build_id: Ulid,
        staged: &GenerationPaths,
        chunks: Vec<manual_core::Chunk>,
        sections: Vec<manual_core::Section>,
        progress: Progress<'_>,
    ) -> Result<LoadedIndex> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.embed_all(&texts, BuildPhase::Chunks, progress).await?;
        let chunk_index = FlatIndex::build(&vectors)?;

        let section_index = if sections.is_empty() {
            None
        } else {
            let texts: Vec<&str> = sections.iter().map(|s| s.text.as_str()).collect();
            let vectors = self.embed_all(&texts, BuildPhase::Sections, progress).await?;
            Some(FlatIndex::build(&vectors)?)
        };

        progress(BuildPhase::Finalize, 0, 1);

        chunk_index.write_to(&staged.index)?;
        let store_digest = write_jsonl(&staged.store, &chunks)?;

        let (sections, section_store_digest) = match section_index {
            Some(index) => {
                index.write_to(&staged.section_index)?;
                let digest = write_jsonl(&staged.section_store, &sections)?;
                (
                    Some(SectionIndex {
                        index,
                        store: sections,
                    }),
                    Some(digest),
                )
            }
            None => (None, None),
        };

        let meta = IndexMeta {
            build_id,
            created_at: now_millis(),
            embedding_model: self.embedder.model_id().to_string(),
            dimension: chunk_index.dimension(),
            chunks: chunks.len(),
            sections: sections.as_ref().map_or(0, |s| s.store.len()),
            store_digest,
            section_store_digest,
        };
        std::fs::write(&staged.meta, serde_json::to_vec_pretty(&meta)?)?;

        progress(BuildPhase::Finalize, 1, 1);
        LoadedIndex::new(meta, chunk_index, chunks, sections)
    }

    /// Embed texts in batches, normalizing every vector.
    async fn embed_all(
        &self,
        texts: &[&str],
        phase: BuildPhase,
        progress: Progress<'_>,
    ) -> Result<Vec<Vec<f32>>> {
        let total = texts.len();
        let dimension = self.embedder.dimension();
        let mut vectors = Vec::with_capacity(total);

        progress(phase, 0, total);
        for batch in texts.chunks(self.batch_size) {
            let embedded = self.embedder.embed_documents(batch).await?;
            if embedded.len() != batch.len() {
                return Err(ManualError::embedding(format!(
                    "provider returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                )));
            }
            for v in embedded {
                if v.len() != dimension {
                    return Err(ManualError::embedding(format!(
                        "provider returned {} dims, expected {}",
                        v.len(),
                        dimension
                    )));
                }
                vectors.push(normalize(v));
            }
            progress(phase, vectors.len(), total);
            debug!("Embedded {}/{} {}", vectors.len(), total, phase);
        }

        Ok(vectors)
    }
}
