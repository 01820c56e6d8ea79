//! Configuration types for the retrieval engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ManualError, Result};

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualConfig {
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Embedding configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Reranker configuration.
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Retrieval configuration.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding ingestion output and index generations.
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Path to the ONNX model file.
    #[serde(default = "default_embedding_model_path")]
    pub model_path: PathBuf,

    /// Path to the tokenizer.json file.
    #[serde(default = "default_embedding_tokenizer_path")]
    pub tokenizer_path: PathBuf,

    /// Model identifier recorded in index metadata.
    #[serde(default = "default_embedding_model_id")]
    pub model_id: String,

    /// Output dimension.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Batch size for document encoding.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of threads for CPU inference.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// Truncation length in tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: default_embedding_model_path(),
            tokenizer_path: default_embedding_tokenizer_path(),
            model_id: default_embedding_model_id(),
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            num_threads: default_num_threads(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Cross-encoder reranker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Rerank final results with the cross-encoder.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path to the ONNX model file.
    #[serde(default = "default_rerank_model_path")]
    pub model_path: PathBuf,

    /// Path to the tokenizer.json file.
    #[serde(default = "default_rerank_tokenizer_path")]
    pub tokenizer_path: PathBuf,

    /// Model identifier.
    #[serde(default = "default_rerank_model_id")]
    pub model_id: String,

    /// Truncation length in tokens for each (query, passage) pair.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: default_rerank_model_path(),
            tokenizer_path: default_rerank_tokenizer_path(),
            model_id: default_rerank_model_id(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default number of results.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// MMR relevance weight (1.0 = pure relevance, 0.0 = pure diversity).
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,

    /// Minimum MMR candidate pool size.
    #[serde(default = "default_mmr_candidates")]
    pub mmr_candidates: usize,

    /// Scope chunk candidates to the best sections first.
    #[serde(default = "default_true")]
    pub hierarchical: bool,

    /// Number of sections kept by the hierarchical filter.
    #[serde(default = "default_section_top_k")]
    pub section_top_k: usize,

    /// Enrich queries with a hypothetical answer when one is supplied.
    #[serde(default = "default_true")]
    pub use_hyde: bool,

    /// Oversampling factor for plain search.
    #[serde(default = "default_simple_oversample")]
    pub simple_oversample: usize,

    /// Oversampling factor for hierarchical search.
    #[serde(default = "default_hierarchical_oversample")]
    pub hierarchical_oversample: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            mmr_lambda: default_mmr_lambda(),
            mmr_candidates: default_mmr_candidates(),
            hierarchical: true,
            section_top_k: default_section_top_k(),
            use_hyde: true,
            simple_oversample: default_simple_oversample(),
            hierarchical_oversample: default_hierarchical_oversample(),
        }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_dimension() -> usize {
    384
}

fn default_batch_size() -> usize {
    64
}

fn default_num_threads() -> usize {
    4
}

fn default_max_tokens() -> usize {
    512
}

fn default_top_k() -> usize {
    5
}

fn default_mmr_lambda() -> f32 {
    0.5
}

fn default_mmr_candidates() -> usize {
    24
}

fn default_section_top_k() -> usize {
    3
}

fn default_simple_oversample() -> usize {
    4
}

fn default_hierarchical_oversample() -> usize {
    8
}

fn default_embedding_model_id() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_rerank_model_id() -> String {
    "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string()
}

fn data_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("manual-rag")
}

fn default_storage_dir() -> PathBuf {
    data_root().join("storage")
}

/// Directory holding the files of a model, named after the last segment of its id.
fn model_dir(model_id: &str) -> PathBuf {
    let name = model_id.rsplit('/').next().unwrap_or(model_id);
    data_root().join("models").join(name)
}

fn default_embedding_model_path() -> PathBuf {
    model_dir(&default_embedding_model_id()).join("model.onnx")
}

fn default_embedding_tokenizer_path() -> PathBuf {
    model_dir(&default_embedding_model_id()).join("tokenizer.json")
}

fn default_rerank_model_path() -> PathBuf {
    model_dir(&default_rerank_model_id()).join("model.onnx")
}

fn default_rerank_tokenizer_path() -> PathBuf {
    model_dir(&default_rerank_model_id()).join("tokenizer.json")
}

/// Point model files at `new_id` unless they were set away from the
/// standard location for `old_id`.
fn follow_model_id(
    model_path: &mut PathBuf,
    tokenizer_path: &mut PathBuf,
    old_id: &str,
    new_id: &str,
) {
    let old_dir = model_dir(old_id);
    let new_dir = model_dir(new_id);
    if *model_path == old_dir.join("model.onnx") {
        *model_path = new_dir.join("model.onnx");
    }
    if *tokenizer_path == old_dir.join("tokenizer.json") {
        *tokenizer_path = new_dir.join("tokenizer.json");
    }
}

impl ManualConfig {
    /// Load configuration from file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ManualError::config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load configuration from default paths, then apply environment overrides.
    pub fn load_default() -> Result<Self> {
        let mut config = Self::load_file_default()?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn load_file_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("manual-rag").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("manual-rag.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Apply overrides from an environment lookup.
    ///
    /// Takes the lookup as a closure so tests don't touch process state.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STORAGE_DIR") {
            self.storage.dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("EMBEDDING_MODEL") {
            let e = &mut self.embedding;
            follow_model_id(&mut e.model_path, &mut e.tokenizer_path, &e.model_id, &v);
            e.model_id = v;
        }
        if let Some(v) = lookup("RERANK") {
            self.rerank.enabled = parse_flag(&v);
        }
        if let Some(v) = lookup("RERANK_MODEL") {
            let r = &mut self.rerank;
            follow_model_id(&mut r.model_path, &mut r.tokenizer_path, &r.model_id, &v);
            r.model_id = v;
        }
        if let Some(v) = lookup("TOP_K") {
            self.retrieval.top_k = parse_number("TOP_K", &v)?;
        }
        if let Some(v) = lookup("MMR_LAMBDA") {
            self.retrieval.mmr_lambda = parse_number("MMR_LAMBDA", &v)?;
        }
        if let Some(v) = lookup("MMR_CANDIDATES") {
            self.retrieval.mmr_candidates = parse_number("MMR_CANDIDATES", &v)?;
        }
        if let Some(v) = lookup("HIERARCHICAL_RETRIEVAL") {
            self.retrieval.hierarchical = parse_flag(&v);
        }
        if let Some(v) = lookup("SECTION_TOP_K") {
            self.retrieval.section_top_k = parse_number("SECTION_TOP_K", &v)?;
        }
        if let Some(v) = lookup("USE_HYDE") {
            self.retrieval.use_hyde = parse_flag(&v);
        }
        Ok(())
    }

    /// Reject settings the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.retrieval.mmr_lambda) {
            return Err(ManualError::config(format!(
                "mmr_lambda must be within [0, 1], got {}",
                self.retrieval.mmr_lambda
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(ManualError::config("top_k must be at least 1"));
        }
        if self.embedding.dimension == 0 {
            return Err(ManualError::config("embedding dimension must be at least 1"));
        }
        if self.embedding.batch_size == 0 {
            return Err(ManualError::config("embedding batch_size must be at least 1"));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ManualError::config(format!("{} is not a valid number: {:?}", key, value)))
}
