//! manual-store - Vector indexes and their persisted artifacts
//!
//! This crate provides the exact-search flat index, the row-aligned
//! line-delimited record store, the generation-based storage layout with
//! atomic publication, the full rebuild pipeline and the memoized session
//! handle used by searches.

mod builder;
mod flat;
mod layout;
mod loaded;
mod records;
mod session;

pub use builder::{no_progress, IndexBuilder, Progress};
pub use flat::{FlatIndex, SearchHit};
pub use layout::{GenerationPaths, StorageLayout};
pub use loaded::{LoadedIndex, SectionIndex};
pub use records::{digest, load_chunks, load_sections, parse_jsonl, write_jsonl};
pub use session::IndexSession;
