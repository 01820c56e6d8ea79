//! Single-flight background index rebuilds with progress reporting.

use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use manual_core::{
    now_millis, BuildPhase, BuildReport, BuildState, BuildStatus, Embedder, ManualError, Result,
};
use manual_store::{IndexBuilder, IndexSession};

/// Map a pipeline phase to an overall percentage.
///
/// Chunk embedding covers 55-95, section embedding 95-98, finalize 98.
pub fn progress_for(phase: BuildPhase, done: usize, total: usize) -> u8 {
    let frac = if total == 0 {
        0.0
    } else {
        (done.min(total) as f64) / (total as f64)
    };
    let pct = match phase {
        BuildPhase::Chunks => 55.0 + 40.0 * frac,
        BuildPhase::Sections => 95.0 + 3.0 * frac,
        BuildPhase::Finalize => 98.0,
    };
    pct.clamp(0.0, 100.0) as u8
}

/// Runs index builds one at a time and tracks their status.
///
/// A successful build is swapped into the shared [`IndexSession`], so
/// searches see it without reloading from disk.
pub struct Indexer<E: ?Sized> {
    session: Arc<IndexSession>,
    embedder: Arc<E>,
    batch_size: usize,
    status: Arc<Mutex<BuildStatus>>,
    build_lock: Arc<AsyncMutex<()>>,
}

impl<E: ?Sized> Clone for Indexer<E> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            embedder: Arc::clone(&self.embedder),
            batch_size: self.batch_size,
            status: Arc::clone(&self.status),
            build_lock: Arc::clone(&self.build_lock),
        }
    }
}

impl<E> Indexer<E>
where
    E: Embedder + ?Sized + 'static,
{
    pub fn new(session: Arc<IndexSession>, embedder: Arc<E>, batch_size: usize) -> Self {
        Self {
            session,
            embedder,
            batch_size,
            status: Arc::new(Mutex::new(BuildStatus::default())),
            build_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> Result<BuildStatus> {
        let status = self
            .status
            .lock()
            .map_err(|e| ManualError::internal(format!("status lock poisoned: {}", e)))?;
        Ok(status.clone())
    }

    /// Kick off a background build.
    ///
    /// Returns the current status without starting anything when a build is
    /// already running, or when `force` is false and the live index loads.
    /// An index that no longer loads (dimension change, corruption) is
    /// rebuilt even without `force`.
    pub fn start(&self, force: bool) -> Result<BuildStatus> {
        let guard = match Arc::clone(&self.build_lock).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                info!("Index build already running");
                return self.status();
            }
        };

        if !force {
            match self.session.get() {
                Ok(_) => {
                    self.update(|s| {
                        s.state = BuildState::Ready;
                        s.progress = 100;
                        s.message = "Index ready".to_string();
                    });
                    return self.status();
                }
                Err(e) if e.needs_rebuild() => {
                    if self.session.layout().has_index() {
                        warn!("Existing index unusable, rebuilding: {}", e);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        self.begin();
        let indexer = self.clone();
        tokio::spawn(async move {
            // Outcome is recorded in the status; nothing else to report.
            let _ = indexer.run_locked(guard).await;
        });
        self.status()
    }

    /// Build inline, failing with `BuildInProgress` if another build holds the lock.
    pub async fn build_now(&self) -> Result<BuildReport> {
        let guard = Arc::clone(&self.build_lock)
            .try_lock_owned()
            .map_err(|_| ManualError::BuildInProgress)?;
        self.begin();
        self.run_locked(guard).await
    }

    /// Wait for any running build to finish.
    pub async fn wait(&self) {
        let _guard = self.build_lock.lock().await;
    }

    fn begin(&self) {
        self.update(|s| {
            *s = BuildStatus {
                state: BuildState::Indexing,
                progress: 1,
                message: "Starting indexing…".to_string(),
                started_at: Some(now_millis()),
                ended_at: None,
                last_error: None,
            };
        });
    }

    async fn run_locked(&self, _guard: OwnedMutexGuard<()>) -> Result<BuildReport> {
        self.update(|s| {
            s.progress = 55;
            s.message = "Building vectors…".to_string();
        });

        let status = Arc::clone(&self.status);
        let on_progress = move |phase: BuildPhase, done: usize, total: usize| {
            if let Ok(mut s) = status.lock() {
                s.progress = progress_for(phase, done, total);
                s.message = format!("Indexing: {} {}/{}…", phase, done, total);
            }
        };

        let builder = IndexBuilder::new(
            self.session.layout(),
            self.embedder.as_ref(),
            self.batch_size,
        );
        let outcome = match builder.build(&on_progress).await {
            Ok((report, loaded)) => self.session.replace(Arc::new(loaded)).map(|_| report),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(report) => {
                info!(
                    "Index {} ready: {} chunks, {} sections",
                    report.build_id, report.chunks, report.sections
                );
                self.update(|s| {
                    s.state = BuildState::Ready;
                    s.progress = 100;
                    s.message = "Index ready".to_string();
                    s.ended_at = Some(now_millis());
                });
                Ok(report)
            }
            Err(e) => {
                error!("Index build failed: {}", e);
                self.update(|s| {
                    s.state = BuildState::Error;
                    s.message = format!("Indexing failed: {}", e);
                    s.last_error = Some(e.to_string());
                    s.ended_at = Some(now_millis());
                });
                Err(e)
            }
        }
    }

    fn update(&self, f: impl FnOnce(&mut BuildStatus)) {
        match self.status.lock() {
            Ok(mut s) => f(&mut s),
            Err(e) => error!("status lock poisoned: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manual_core::Chunk;
    use manual_embed::MockEmbedder;
    use manual_store::StorageLayout;
    use tempfile::{tempdir, TempDir};

    fn write_chunks(layout: &StorageLayout, texts: &[&str]) {
        let lines: Vec<String> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                serde_json::to_string(&Chunk {
                    id: format!("c{}", i),
                    section_title: "Intro".to_string(),
                    section_id: "s1".to_string(),
                    level: 1,
                    page_start: 1,
                    page_end: 1,
                    chunk_index: i as u32,
                    text: text.to_string(),
                    approx_tokens: 1,
                })
                .unwrap()
            })
            .collect();
        std::fs::create_dir_all(layout.root()).unwrap();
        std::fs::write(layout.chunks_input(), lines.join("\n")).unwrap();
    }

    fn setup(embedder: MockEmbedder) -> (TempDir, Indexer<MockEmbedder>, Arc<MockEmbedder>) {
        let dir = tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        write_chunks(&layout, &["one", "two", "three"]);
        let embedder = Arc::new(embedder);
        let session = Arc::new(IndexSession::new(
            layout,
            embedder.dimension(),
            embedder.model_id(),
        ));
        let indexer = Indexer::new(session, Arc::clone(&embedder), 2);
        (dir, indexer, embedder)
    }

    #[test]
    fn test_progress_weights() {
        assert_eq!(progress_for(BuildPhase::Chunks, 0, 10), 55);
        assert_eq!(progress_for(BuildPhase::Chunks, 5, 10), 75);
        assert_eq!(progress_for(BuildPhase::Chunks, 10, 10), 95);
        assert_eq!(progress_for(BuildPhase::Sections, 10, 10), 98);
        assert_eq!(progress_for(BuildPhase::Finalize, 0, 1), 98);
        assert_eq!(progress_for(BuildPhase::Sections, 0, 0), 95);
    }

    #[tokio::test]
    async fn test_build_now_swaps_session() {
        let (_dir, indexer, _) = setup(MockEmbedder::with_dimension(8));
        assert_eq!(indexer.status().unwrap().state, BuildState::Idle);

        let report = indexer.build_now().await.unwrap();
        assert_eq!(report.chunks, 3);

        let status = indexer.status().unwrap();
        assert_eq!(status.state, BuildState::Ready);
        assert_eq!(status.progress, 100);
        assert!(status.started_at.is_some() && status.ended_at.is_some());

        let cached = indexer.session.cached().unwrap().unwrap();
        assert_eq!(cached.meta.build_id, report.build_id);
    }

    #[tokio::test]
    async fn test_concurrent_build_is_rejected() {
        let (_dir, indexer, _) = setup(MockEmbedder::with_dimension(8));
        let _held = Arc::clone(&indexer.build_lock).try_lock_owned().unwrap();

        let err = indexer.build_now().await.unwrap_err();
        assert!(matches!(err, ManualError::BuildInProgress));

        // start() reports status instead of racing
        let status = indexer.start(true).unwrap();
        assert_eq!(status.state, BuildState::Idle);
    }

    #[tokio::test]
    async fn test_start_runs_in_background() {
        let (_dir, indexer, _) = setup(MockEmbedder::with_dimension(8));

        let status = indexer.start(false).unwrap();
        assert_eq!(status.state, BuildState::Indexing);

        indexer.wait().await;
        assert_eq!(indexer.status().unwrap().state, BuildState::Ready);
        assert!(indexer.session.layout().has_index());
    }

    #[tokio::test]
    async fn test_start_skips_existing_index() {
        let (_dir, indexer, embedder) = setup(MockEmbedder::with_dimension(8));
        indexer.build_now().await.unwrap();
        let calls = embedder.calls();

        let status = indexer.start(false).unwrap();
        assert_eq!(status.state, BuildState::Ready);
        assert_eq!(status.progress, 100);
        indexer.wait().await;
        assert_eq!(embedder.calls(), calls);

        // force rebuilds anyway
        indexer.start(true).unwrap();
        indexer.wait().await;
        assert!(embedder.calls() > calls);
    }

    #[tokio::test]
    async fn test_start_rebuilds_after_dimension_change() {
        let (dir, indexer, _) = setup(MockEmbedder::with_dimension(2));
        indexer.build_now().await.unwrap();
        let old_build = indexer.session.layout().current().unwrap();

        let wider = Arc::new(MockEmbedder::with_dimension(3));
        let session = Arc::new(IndexSession::new(
            StorageLayout::new(dir.path()),
            wider.dimension(),
            wider.model_id(),
        ));
        let reopened = Indexer::new(Arc::clone(&session), Arc::clone(&wider), 2);

        let status = reopened.start(false).unwrap();
        assert_eq!(status.state, BuildState::Indexing);
        reopened.wait().await;

        assert_eq!(reopened.status().unwrap().state, BuildState::Ready);
        assert!(wider.calls() > 0);
        assert_ne!(session.layout().current().unwrap(), old_build);
        assert_eq!(session.get().unwrap().meta.dimension, 3);
    }

    #[tokio::test]
    async fn test_failed_build_records_error() {
        let (_dir, indexer, _) = setup(MockEmbedder::with_dimension(8).fail_after(0));

        let err = indexer.build_now().await.unwrap_err();
        assert_eq!(err.error_code(), "EMBEDDING_ERROR");

        let status = indexer.status().unwrap();
        assert_eq!(status.state, BuildState::Error);
        assert!(status.last_error.is_some());
        assert!(!indexer.session.layout().has_index());
        assert!(indexer.session.cached().unwrap().is_none());
    }
}
