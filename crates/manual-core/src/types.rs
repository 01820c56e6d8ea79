//! Core domain types for the retrieval engine.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A chunk of the manual, the leaf retrieval unit.
///
/// Produced once by ingestion and never mutated afterwards. `section_id`
/// is a back-reference to the owning [`Section`], not ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier.
    pub id: String,

    /// Title of the owning section.
    #[serde(default)]
    pub section_title: String,

    /// Identifier of the owning section.
    pub section_id: String,

    /// Heading depth of the owning section.
    #[serde(default = "default_level")]
    pub level: u32,

    /// First page (1-based).
    pub page_start: u32,

    /// Last page (1-based, inclusive).
    pub page_end: u32,

    /// Position within the owning section (0-based).
    pub chunk_index: u32,

    /// Chunk text content.
    pub text: String,

    /// Rough token estimate from ingestion.
    #[serde(default)]
    pub approx_tokens: u32,
}

impl Chunk {
    /// Check the record-level invariants ingestion is expected to uphold.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.is_empty() {
            return Err("chunk id is empty".to_string());
        }
        if self.page_start > self.page_end {
            return Err(format!(
                "page_start {} > page_end {}",
                self.page_start, self.page_end
            ));
        }
        Ok(())
    }
}

/// A section of the manual, bounded by detected headings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Unique identifier.
    pub id: String,

    /// Heading text.
    pub title: String,

    /// Heading depth (1 = top level).
    #[serde(default = "default_level")]
    pub level: u32,

    /// First page (1-based).
    pub page_start: u32,

    /// Last page (1-based, inclusive).
    pub page_end: u32,

    /// Full concatenated section text.
    pub text: String,

    /// Rough token estimate from ingestion.
    #[serde(default)]
    pub approx_tokens: u32,
}

impl Section {
    /// Check the record-level invariants ingestion is expected to uphold.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.is_empty() {
            return Err("section id is empty".to_string());
        }
        if self.level == 0 {
            return Err("section level must be >= 1".to_string());
        }
        if self.page_start > self.page_end {
            return Err(format!(
                "page_start {} > page_end {}",
                self.page_start, self.page_end
            ));
        }
        Ok(())
    }
}

fn default_level() -> u32 {
    1
}

/// A ranked retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Chunk identifier.
    pub id: String,

    /// Chunk text.
    pub text: String,

    /// Title of the owning section.
    pub section_title: String,

    /// First page (1-based).
    pub page_start: u32,

    /// Last page (1-based, inclusive).
    pub page_end: u32,

    /// Cosine similarity to the query from the index search.
    pub score: f32,

    /// Cross-encoder score, when reranking ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl SearchResult {
    /// Build an unranked result from a chunk and its index score.
    pub fn from_chunk(chunk: &Chunk, score: f32) -> Self {
        Self {
            id: chunk.id.clone(),
            text: chunk.text.clone(),
            section_title: chunk.section_title.clone(),
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            score,
            rerank_score: None,
        }
    }
}

/// Metadata persisted alongside every completed build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Identifier of the build generation.
    pub build_id: Ulid,

    /// Completion timestamp (Unix millis).
    pub created_at: u64,

    /// Embedding model used for every stored vector.
    pub embedding_model: String,

    /// Embedding dimension.
    pub dimension: usize,

    /// Number of chunk vectors.
    pub chunks: usize,

    /// Number of section vectors (0 when no sections were ingested).
    pub sections: usize,

    /// Blake3 hex digest of the chunk store file.
    pub store_digest: String,

    /// Blake3 hex digest of the section store file, if any.
    #[serde(default)]
    pub section_store_digest: Option<String>,
}

/// Summary of a completed build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub build_id: Ulid,
    pub chunks: usize,
    pub sections: usize,
    pub dimension: usize,
}

/// Lifecycle of the background indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    Idle,
    Indexing,
    Ready,
    Error,
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Indexing => "indexing",
            Self::Ready => "ready",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Snapshot of the indexer status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStatus {
    pub state: BuildState,

    /// Progress percentage (0-100).
    pub progress: u8,

    pub message: String,

    /// Unix millis.
    pub started_at: Option<u64>,

    /// Unix millis.
    pub ended_at: Option<u64>,

    pub last_error: Option<String>,
}

impl Default for BuildStatus {
    fn default() -> Self {
        Self {
            state: BuildState::Idle,
            progress: 0,
            message: String::new(),
            started_at: None,
            ended_at: None,
            last_error: None,
        }
    }
}

/// Phase reported by the build pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Chunks,
    Sections,
    Finalize,
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Chunks => "chunks",
            Self::Sections => "sections",
            Self::Finalize => "finalize",
        };
        write!(f, "{}", s)
    }
}

/// Statistics about the current index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub chunks: usize,
    pub sections: usize,

    /// Page count reported by ingestion, when available.
    pub pages: Option<u32>,

    pub embedding_model: String,
    pub dimension: usize,
    pub rerank_enabled: bool,
    pub has_index: bool,
    pub build_id: Option<Ulid>,
    pub storage_dir: String,
}

/// Current time as Unix millis.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
