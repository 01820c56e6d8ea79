//! Error types for the retrieval engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using ManualError.
pub type Result<T> = std::result::Result<T, ManualError>;

/// Errors that can occur while building or searching the manual index.
#[derive(Error, Debug)]
pub enum ManualError {
    /// Upstream ingestion records are absent.
    #[error("Missing input: {path} not found or empty; run ingestion first")]
    MissingInput { path: PathBuf },

    /// Search requested before any successful build.
    #[error("Index not built; run ingestion and build the index first")]
    IndexNotBuilt,

    /// Persisted index was built with a different embedding dimension.
    #[error("Dimension mismatch: index has {stored} dims, embedder produces {current}; rebuild required")]
    DimensionMismatch { stored: usize, current: usize },

    /// A vector index was built from zero vectors.
    #[error("Cannot build an index from zero vectors")]
    EmptyInput,

    /// Malformed line-delimited record.
    #[error("Invalid record at {path}:{line}: {reason}")]
    InvalidRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Persisted index artifacts are unreadable or disagree with each other.
    #[error("Corrupt index at {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    /// Another build holds the build lock.
    #[error("An index build is already in progress")]
    BuildInProgress,

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Embedding provider error.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Cross-encoder reranker error.
    #[error("Rerank error: {message}")]
    Rerank { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ManualError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a rerank error.
    pub fn rerank(message: impl Into<String>) -> Self {
        Self::Rerank {
            message: message.into(),
        }
    }

    /// Create a corrupt index error.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller should tell the user to (re)build the index.
    pub fn needs_rebuild(&self) -> bool {
        matches!(
            self,
            Self::IndexNotBuilt | Self::DimensionMismatch { .. } | Self::CorruptIndex { .. }
        )
    }

    /// Stable error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingInput { .. } => "MISSING_INPUT",
            Self::IndexNotBuilt => "INDEX_NOT_BUILT",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::EmptyInput => "EMPTY_INPUT",
            Self::InvalidRecord { .. } => "INVALID_RECORD",
            Self::CorruptIndex { .. } => "CORRUPT_INDEX",
            Self::BuildInProgress => "BUILD_IN_PROGRESS",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Rerank { .. } => "RERANK_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ManualError::MissingInput {
            path: PathBuf::from("/tmp/storage/chunks.jsonl"),
        };
        assert!(err.to_string().contains("chunks.jsonl"));
        assert!(err.to_string().contains("run ingestion first"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ManualError::IndexNotBuilt.error_code(), "INDEX_NOT_BUILT");
        assert_eq!(
            ManualError::DimensionMismatch {
                stored: 384,
                current: 768
            }
            .error_code(),
            "DIMENSION_MISMATCH"
        );
        assert_eq!(ManualError::rerank("boom").error_code(), "RERANK_ERROR");
    }

    #[test]
    fn test_needs_rebuild() {
        assert!(ManualError::IndexNotBuilt.needs_rebuild());
        assert!(ManualError::DimensionMismatch {
            stored: 1,
            current: 2
        }
        .needs_rebuild());
        assert!(!ManualError::embedding("timeout").needs_rebuild());
    }
}
