//! Façade wiring configuration, storage, providers and the retrieval engine.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use manual_core::{
    BuildReport, BuildStatus, Embedder, IndexStats, ManualConfig, ManualError, Reranker, Result,
    SearchResult,
};
use manual_embed::{OnnxEmbedder, OnnxReranker, UnavailableReranker};
use manual_query::{HierarchicalOptions, RetrievalEngine, SearchOptions};
use manual_store::{IndexSession, StorageLayout};

use crate::indexer::Indexer;

/// Retrieval backend over a single manual.
pub struct ManualService {
    config: ManualConfig,

    /// Live index handle shared with the indexer.
    session: Arc<IndexSession>,

    engine: RetrievalEngine<dyn Embedder>,

    indexer: Indexer<dyn Embedder>,
}

impl ManualService {
    /// Create a service with explicit providers.
    pub fn new(
        config: ManualConfig,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "Initializing manual service with storage at {:?}",
            config.storage.dir
        );

        if embedder.dimension() != config.embedding.dimension {
            warn!(
                "Embedder dimension {} differs from configured {}; using the embedder's",
                embedder.dimension(),
                config.embedding.dimension
            );
        }

        let layout = StorageLayout::new(&config.storage.dir);
        let session = Arc::new(IndexSession::new(
            layout,
            embedder.dimension(),
            embedder.model_id(),
        ));

        let mut engine = RetrievalEngine::new(Arc::clone(&embedder)).with_oversample(
            config.retrieval.simple_oversample,
            config.retrieval.hierarchical_oversample,
        );
        if let Some(reranker) = reranker {
            engine = engine.with_reranker(reranker);
        }

        let indexer = Indexer::new(
            Arc::clone(&session),
            embedder,
            config.embedding.batch_size,
        );

        Ok(Self {
            config,
            session,
            engine,
            indexer,
        })
    }

    /// Create a service backed by the ONNX models named in `config`.
    ///
    /// A reranker that fails to load does not fail startup; searches log the
    /// failure and keep their MMR order.
    pub fn from_config(config: ManualConfig) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(OnnxEmbedder::new(&config.embedding)?);

        let reranker: Option<Arc<dyn Reranker>> = if config.rerank.enabled {
            match OnnxReranker::new(&config.rerank, config.embedding.num_threads) {
                Ok(r) => Some(Arc::new(r)),
                Err(e) => {
                    warn!("Reranker unavailable, results will not be reranked: {}", e);
                    Some(Arc::new(UnavailableReranker::new(e.to_string())))
                }
            }
        } else {
            None
        };

        Self::new(config, embedder, reranker)
    }

    pub fn config(&self) -> &ManualConfig {
        &self.config
    }

    /// Default search options from configuration.
    pub fn search_options(&self) -> SearchOptions {
        SearchOptions::from_config(&self.config.retrieval)
    }

    /// Default hierarchical options from configuration.
    pub fn hierarchical_options(&self) -> HierarchicalOptions {
        HierarchicalOptions::from_config(&self.config.retrieval)
    }

    /// Rebuild the index inline. Returns the build report.
    pub async fn build_index(&self) -> Result<BuildReport> {
        self.indexer.build_now().await
    }

    /// Start a background rebuild; see [`Indexer::start`].
    pub fn start_build(&self, force: bool) -> Result<BuildStatus> {
        self.indexer.start(force)
    }

    /// Wait for a background rebuild to finish.
    pub async fn wait_for_build(&self) {
        self.indexer.wait().await
    }

    pub fn status(&self) -> Result<BuildStatus> {
        self.indexer.status()
    }

    /// Plain MMR search.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let index = self.session.get()?;
        self.engine.search(&index, query, options).await
    }

    /// Section-scoped search, optionally enriched with a hypothetical answer.
    ///
    /// `auxiliary_query_text` is ignored when `retrieval.use_hyde` is off.
    pub async fn search_hierarchical(
        &self,
        query: &str,
        options: &SearchOptions,
        auxiliary_query_text: Option<&str>,
        hierarchy: &HierarchicalOptions,
    ) -> Result<Vec<SearchResult>> {
        let index = self.session.get()?;
        let auxiliary = if self.config.retrieval.use_hyde {
            auxiliary_query_text
        } else {
            if auxiliary_query_text.is_some() {
                debug!("Query enrichment disabled; ignoring auxiliary text");
            }
            None
        };
        self.engine
            .search_hierarchical(&index, query, options, auxiliary, hierarchy)
            .await
    }

    /// Counts and settings of the live index.
    pub fn stats(&self) -> Result<IndexStats> {
        let layout = self.session.layout();
        let embedder = self.engine.embedder();

        let mut stats = IndexStats {
            chunks: 0,
            sections: 0,
            pages: read_pages(&layout.ingest_meta()),
            embedding_model: embedder.model_id().to_string(),
            dimension: embedder.dimension(),
            rerank_enabled: self.engine.reranker_available(),
            has_index: false,
            build_id: None,
            storage_dir: layout.root().display().to_string(),
        };

        match self.session.get() {
            Ok(index) => {
                stats.chunks = index.meta.chunks;
                stats.sections = index.meta.sections;
                stats.embedding_model = index.meta.embedding_model.clone();
                stats.dimension = index.meta.dimension;
                stats.has_index = true;
                stats.build_id = Some(index.meta.build_id);
            }
            Err(ManualError::IndexNotBuilt) => {}
            Err(e) => return Err(e),
        }

        Ok(stats)
    }
}

/// Page count from the ingestion summary, if it has one.
fn read_pages(path: &Path) -> Option<u32> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(value) => value
            .get("pages")
            .and_then(|p| p.as_u64())
            .and_then(|p| u32::try_from(p).ok()),
        Err(e) => {
            warn!("Ignoring unreadable ingestion summary {:?}: {}", path, e);
            None
        }
    }
}
