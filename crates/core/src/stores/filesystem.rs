use crate::error::SearchError;
use crate::index::VectorIndex;
use crate::traits::IndexStore;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CURRENT_POINTER: &str = "CURRENT";
const GENERATIONS_DIR: &str = "generations";
const INDEX_FILE: &str = "index.json";
const POINTER_RETRIES: usize = 3;
const PUBLISH_ATTEMPTS: usize = 16;

pub const DEFAULT_RETAINED_GENERATIONS: usize = 3;

/// Generations live in `<root>/generations/<n>/index.json`; `<root>/CURRENT` names the live one.
///
/// A generation directory is fully written and synced under a staging name before it is renamed
/// into place, and the pointer file is replaced by rename, so readers following `CURRENT` only
/// ever see complete generations.
///
/// Several stores (or processes) may publish into one root. A generation number belongs to
/// whoever renames its directory first; a writer that loses the rename restages under the next
/// free number. The pointer only ever moves to the newest complete generation on disk.
pub struct FsIndexStore {
    root: PathBuf,
    retain: usize,
    write_lock: Mutex<()>,
}

impl FsIndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retain: DEFAULT_RETAINED_GENERATIONS,
            write_lock: Mutex::new(()),
        }
    }

    /// Number of most recent generations kept on disk; at least one.
    #[must_use]
    pub fn with_retention(mut self, retain: usize) -> Self {
        self.retain = retain.max(1);
        self
    }

    fn pointer_path(&self) -> PathBuf {
        self.root.join(CURRENT_POINTER)
    }

    fn generations_dir(&self) -> PathBuf {
        self.root.join(GENERATIONS_DIR)
    }

    fn generation_dir(&self, generation: u64) -> PathBuf {
        self.generations_dir().join(generation.to_string())
    }

    async fn read_pointer(&self) -> Result<Option<u64>, SearchError> {
        let path = self.pointer_path();
        match fs::read_to_string(&path).await {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|error| SearchError::Corrupt {
                    path: path.display().to_string(),
                    details: format!("invalid generation pointer: {error}"),
                }),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(SearchError::Io(error)),
        }
    }

    async fn list_generations(&self) -> Result<Vec<u64>, SearchError> {
        let mut generations = Vec::new();
        let mut entries = match fs::read_dir(self.generations_dir()).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(generations),
            Err(error) => return Err(SearchError::Io(error)),
        };

        while let Some(entry) = entries.next_entry().await? {
            if let Some(generation) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            {
                generations.push(generation);
            }
        }

        generations.sort_unstable();
        Ok(generations)
    }

    async fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), SearchError> {
        let mut file = fs::File::create(path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn next_generation(&self) -> Result<u64, SearchError> {
        let latest_on_disk = self.list_generations().await?.last().copied();
        let latest_pointer = self.read_pointer().await?;
        Ok(latest_on_disk.max(latest_pointer).unwrap_or(0) + 1)
    }

    /// Writes `index` as generation `generation` into a fresh staging directory.
    async fn stage(&self, index: &VectorIndex, generation: u64) -> Result<PathBuf, SearchError> {
        let mut snapshot = index.clone();
        snapshot.manifest.generation = generation;
        let bytes = serde_json::to_vec(&snapshot)?;

        let staging = self.root.join(format!(".staging-{}", Uuid::new_v4()));
        fs::create_dir_all(&staging).await?;
        if let Err(error) = Self::write_synced(&staging.join(INDEX_FILE), &bytes).await {
            Self::discard(&staging).await;
            return Err(error);
        }
        Ok(staging)
    }

    async fn discard(staging: &Path) {
        if let Err(error) = fs::remove_dir_all(staging).await {
            warn!(path = %staging.display(), %error, "failed to remove staging directory");
        }
    }

    /// Claims the next free generation number by renaming a staged directory onto it.
    async fn claim_generation(&self, index: &VectorIndex) -> Result<u64, SearchError> {
        for _ in 0..PUBLISH_ATTEMPTS {
            let generation = self.next_generation().await?;
            let staging = self.stage(index, generation).await?;
            let target = self.generation_dir(generation);

            match fs::rename(&staging, &target).await {
                Ok(()) => return Ok(generation),
                Err(error) => {
                    Self::discard(&staging).await;
                    if !fs::try_exists(&target).await.unwrap_or(false) {
                        return Err(SearchError::Io(error));
                    }
                    debug!(generation, "generation taken by another writer, restaging");
                }
            }
        }
        Err(SearchError::PublishContention(PUBLISH_ATTEMPTS))
    }

    /// Points `CURRENT` at the newest generation on disk. Never moves the pointer backwards
    /// from what it reads; a writer racing past it is caught by the re-check on the next pass.
    async fn advance_pointer(&self) -> Result<u64, SearchError> {
        loop {
            let newest = self
                .list_generations()
                .await?
                .last()
                .copied()
                .ok_or(SearchError::IndexNotFound)?;

            if let Some(current) = self.read_pointer().await? {
                if current >= newest {
                    return Ok(current);
                }
            }

            let staged = self
                .root
                .join(format!("{CURRENT_POINTER}.{}.tmp", Uuid::new_v4()));
            Self::write_synced(&staged, newest.to_string().as_bytes()).await?;
            if let Err(error) = fs::rename(&staged, self.pointer_path()).await {
                let _ = fs::remove_file(&staged).await;
                return Err(SearchError::Io(error));
            }
        }
    }

    /// Removes generations older than the retention window. Failures are logged, never returned:
    /// by the time this runs the new generation is already live.
    async fn prune(&self, current: u64) -> usize {
        let generations = match self.list_generations().await {
            Ok(generations) => generations,
            Err(error) => {
                warn!(%error, "failed to list index generations for pruning");
                return 0;
            }
        };
        let keep_from = current.saturating_sub(self.retain as u64 - 1);

        let mut pruned = 0;
        for generation in generations.into_iter().filter(|g| *g < keep_from) {
            match fs::remove_dir_all(self.generation_dir(generation)).await {
                Ok(()) => {
                    pruned += 1;
                    debug!(generation, "pruned index generation");
                }
                Err(error) => warn!(generation, %error, "failed to prune index generation"),
            }
        }
        pruned
    }
}

#[async_trait]
impl IndexStore for FsIndexStore {
    async fn persist(&self, index: &VectorIndex) -> Result<u64, SearchError> {
        let _guard = self.write_lock.lock().await;

        fs::create_dir_all(self.generations_dir()).await?;

        let generation = self.claim_generation(index).await?;
        let pointer = self.advance_pointer().await?;

        info!(
            generation,
            pointer,
            chunks = index.len(),
            root = %self.root.display(),
            "published index generation"
        );

        self.prune(pointer).await;
        Ok(generation)
    }

    async fn load_current(&self) -> Result<VectorIndex, SearchError> {
        let mut attempts = 0;
        loop {
            let generation = self
                .read_pointer()
                .await?
                .ok_or(SearchError::IndexNotFound)?;

            match self.load_generation(generation).await {
                // A concurrent publish can prune the generation between reading the pointer
                // and opening its file; follow the pointer again.
                Err(SearchError::GenerationNotFound(_)) if attempts < POINTER_RETRIES => {
                    attempts += 1;
                }
                other => return other,
            }
        }
    }

    async fn load_generation(&self, generation: u64) -> Result<VectorIndex, SearchError> {
        let path = self.generation_dir(generation).join(INDEX_FILE);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(SearchError::GenerationNotFound(generation))
            }
            Err(error) => return Err(SearchError::Io(error)),
        };

        let index: VectorIndex = serde_json::from_slice(&bytes)?;
        let corrupt = |details: String| SearchError::Corrupt {
            path: path.display().to_string(),
            details,
        };

        if index.manifest.generation != generation {
            return Err(corrupt(format!(
                "manifest generation {} stored under {}",
                index.manifest.generation, generation
            )));
        }
        index.verify().map_err(corrupt)?;

        debug!(generation, chunks = index.len(), "loaded index generation");
        Ok(index)
    }

    async fn current_generation(&self) -> Result<Option<u64>, SearchError> {
        self.read_pointer().await
    }
}
