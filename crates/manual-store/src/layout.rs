//! On-disk layout of the storage directory.
//!
//! ```text
//! <root>/chunks.jsonl            ingestion output
//! <root>/sections.jsonl          ingestion output (optional)
//! <root>/meta.json               ingestion summary (optional)
//! <root>/CURRENT                 build id of the live generation
//! <root>/generations/<build_id>/ one complete build
//! ```
//!
//! A build is staged under `generations/<build_id>.staging/`, renamed into
//! place when complete, and published by replacing `CURRENT`. Readers only
//! ever follow `CURRENT`, so they see either the previous or the new
//! generation, never a partial one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info, warn};
use ulid::Ulid;

use manual_core::{ManualError, Result};

const CURRENT: &str = "CURRENT";
const GENERATIONS: &str = "generations";
const STAGING_SUFFIX: &str = "staging";

/// Paths of the artifacts inside one generation directory.
#[derive(Debug, Clone)]
pub struct GenerationPaths {
    pub dir: PathBuf,
    pub index: PathBuf,
    pub store: PathBuf,
    pub section_index: PathBuf,
    pub section_store: PathBuf,
    pub meta: PathBuf,
}

impl GenerationPaths {
    fn new(dir: PathBuf) -> Self {
        Self {
            index: dir.join("index.bin"),
            store: dir.join("store.jsonl"),
            section_index: dir.join("index_sections.bin"),
            section_store: dir.join("store_sections.jsonl"),
            meta: dir.join("meta.json"),
            dir,
        }
    }
}

/// Storage directory layout.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Create a layout rooted at `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Chunk records written by ingestion.
    pub fn chunks_input(&self) -> PathBuf {
        self.root.join("chunks.jsonl")
    }

    /// Section records written by ingestion.
    pub fn sections_input(&self) -> PathBuf {
        self.root.join("sections.jsonl")
    }

    /// Ingestion summary (page count etc).
    pub fn ingest_meta(&self) -> PathBuf {
        self.root.join("meta.json")
    }

    fn current_path(&self) -> PathBuf {
        self.root.join(CURRENT)
    }

    fn generations_dir(&self) -> PathBuf {
        self.root.join(GENERATIONS)
    }

    /// Paths of a committed generation.
    pub fn generation(&self, build_id: Ulid) -> GenerationPaths {
        GenerationPaths::new(self.generations_dir().join(build_id.to_string()))
    }

    fn staging_dir(&self, build_id: Ulid) -> PathBuf {
        self.generations_dir()
            .join(format!("{}.{}", build_id, STAGING_SUFFIX))
    }

    /// Build id of the live generation, if any build has been published.
    pub fn current(&self) -> Result<Option<Ulid>> {
        let path = self.current_path();
        if !path.is_file() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let id = Ulid::from_str(content.trim())
            .map_err(|e| ManualError::corrupt(&path, format!("invalid build id: {}", e)))?;
        Ok(Some(id))
    }

    /// Whether a published index exists.
    pub fn has_index(&self) -> bool {
        matches!(self.current(), Ok(Some(_)))
    }

    /// Create a fresh staging directory for a new build.
    pub fn stage(&self, build_id: Ulid) -> Result<GenerationPaths> {
        let dir = self.staging_dir(build_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        debug!("Staging build {} at {:?}", build_id, dir);
        Ok(GenerationPaths::new(dir))
    }

    /// Remove a staging directory after a failed build.
    pub fn discard(&self, build_id: Ulid) {
        let dir = self.staging_dir(build_id);
        if let Err(e) = fs::remove_dir_all(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove staging dir {:?}: {}", dir, e);
            }
        }
    }

    /// Publish a staged build and prune generations nobody can still be reading.
    pub fn commit(&self, build_id: Ulid) -> Result<GenerationPaths> {
        let previous = self.current().ok().flatten();

        let final_paths = self.generation(build_id);
        fs::rename(self.staging_dir(build_id), &final_paths.dir)?;

        // Publish: temp file then rename
        let temp = self.root.join(format!("{}.tmp", CURRENT));
        {
            let mut file = fs::File::create(&temp)?;
            writeln!(file, "{}", build_id)?;
            file.sync_all()?;
        }
        fs::rename(&temp, self.current_path())?;
        info!("Published index generation {}", build_id);

        self.prune(build_id, previous);
        Ok(final_paths)
    }

    /// Remove committed generations older than the predecessor of `live`.
    ///
    /// Staging directories and anything at or after the cutoff are left
    /// alone: another process may still be building or publishing them.
    fn prune(&self, live: Ulid, previous: Option<Ulid>) {
        let entries = match fs::read_dir(self.generations_dir()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list generations: {}", e);
                return;
            }
        };

        let cutoff = previous.map_or(live, |prev| prev.min(live));

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(STAGING_SUFFIX) {
                continue;
            }
            let id = match Ulid::from_str(&name) {
                Ok(id) => id,
                Err(_) => continue,
            };
            if id >= cutoff {
                continue;
            }
            let path = entry.path();
            match fs::remove_dir_all(&path) {
                Ok(()) => debug!("Pruned old generation {:?}", path),
                Err(e) => warn!("Failed to prune {:?}: {}", path, e),
            }
        }
    }
}
