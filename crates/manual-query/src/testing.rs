//! In-memory index fixtures for tests.

use manual_core::vector::normalize;
use manual_core::{Chunk, IndexMeta, Section};
use manual_store::{FlatIndex, LoadedIndex, SectionIndex};
use ulid::Ulid;

/// Build an index from `(id, section_id, vector)` rows. Each chunk's text is
/// its id, so embedder fixtures can be keyed by id.
pub(crate) fn index_from(rows: &[(&str, &str, &[f32])]) -> LoadedIndex {
    let vectors: Vec<Vec<f32>> = rows.iter().map(|(_, _, v)| normalize(v.to_vec())).collect();
    let chunks: Vec<Chunk> = rows
        .iter()
        .enumerate()
        .map(|(i, (id, section_id, _))| Chunk {
            id: id.to_string(),
            section_title: format!("Section {}", section_id),
            section_id: section_id.to_string(),
            level: 1,
            page_start: i as u32 + 1,
            page_end: i as u32 + 1,
            chunk_index: i as u32,
            text: id.to_string(),
            approx_tokens: 1,
        })
        .collect();
    let index = FlatIndex::build(&vectors).unwrap();
    let meta = IndexMeta {
        build_id: Ulid::nil(),
        created_at: 0,
        embedding_model: "mock-embedder".to_string(),
        dimension: index.dimension(),
        chunks: chunks.len(),
        sections: 0,
        store_digest: String::new(),
        section_store_digest: None,
    };
    LoadedIndex::new(meta, index, chunks, None).unwrap()
}

/// Attach a section level built from `(id, vector)` rows.
pub(crate) fn with_sections(mut loaded: LoadedIndex, rows: &[(&str, &[f32])]) -> LoadedIndex {
    let vectors: Vec<Vec<f32>> = rows.iter().map(|(_, v)| normalize(v.to_vec())).collect();
    let store: Vec<Section> = rows
        .iter()
        .map(|(id, _)| Section {
            id: id.to_string(),
            title: format!("Section {}", id),
            level: 1,
            page_start: 1,
            page_end: 1,
            text: id.to_string(),
            approx_tokens: 1,
        })
        .collect();
    loaded.meta.sections = store.len();
    loaded.sections = Some(SectionIndex {
        index: FlatIndex::build(&vectors).unwrap(),
        store,
    });
    loaded
}
