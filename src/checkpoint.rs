//! Scan checkpoint persistence
//!
//! The durable form is a small JSON object mapping chain name to the last
//! processed block, e.g. `{"source": 1000, "destination": 52}`.
//! Writes go to a temp file that is renamed over the original.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use tracing::{debug, info};

use crate::types::ChainSide;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last processed block for `chain`, or `None` if never saved
    async fn load(&self, chain: ChainSide) -> Result<Option<u64>>;

    async fn save(&self, chain: ChainSide, block: u64) -> Result<()>;
}

type CheckpointMap = BTreeMap<ChainSide, u64>;

/// Checkpoints in a JSON file
#[derive(Debug)]
pub struct JsonFileCheckpointStore {
    path: PathBuf,
    // Serializes read-modify-write of the file
    lock: tokio::sync::Mutex<()>,
}

impl JsonFileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<CheckpointMap> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(CheckpointMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).wrap_err_with(|| {
                format!("Malformed checkpoint file {}", self.path.display())
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CheckpointMap::new()),
            Err(e) => Err(e)
                .wrap_err_with(|| format!("Failed to read checkpoint file {}", self.path.display())),
        }
    }
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    async fn load(&self, chain: ChainSide) -> Result<Option<u64>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.get(&chain).copied())
    }

    async fn save(&self, chain: ChainSide, block: u64) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(chain, block);

        let json = serde_json::to_vec_pretty(&all)?;
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| eyre!("Checkpoint path has no file name: {}", self.path.display()))?;
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        tokio::fs::write(&tmp, &json)
            .await
            .wrap_err_with(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .wrap_err_with(|| format!("Failed to replace {}", self.path.display()))?;

        debug!(chain = %chain, block, path = %self.path.display(), "Saved checkpoint");
        Ok(())
    }
}

/// Checkpoints held in memory, for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<CheckpointMap>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(self, chain: ChainSide, block: u64) -> Self {
        if let Ok(mut map) = self.inner.lock() {
            map.insert(chain, block);
        }
        self
    }

    pub fn get(&self, chain: ChainSide) -> Option<u64> {
        self.inner.lock().ok().and_then(|m| m.get(&chain).copied())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, chain: ChainSide) -> Result<Option<u64>> {
        let map = self
            .inner
            .lock()
            .map_err(|_| eyre!("Checkpoint store lock poisoned"))?;
        Ok(map.get(&chain).copied())
    }

    async fn save(&self, chain: ChainSide, block: u64) -> Result<()> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| eyre!("Checkpoint store lock poisoned"))?;
        map.insert(chain, block);
        Ok(())
    }
}

/// Open the checkpoint store for a run
///
/// A dry run starts from the file's checkpoints but keeps its progress in
/// memory, leaving the file untouched.
pub async fn open_store(
    path: impl Into<PathBuf>,
    dry_run: bool,
) -> Result<Arc<dyn CheckpointStore>> {
    let file = JsonFileCheckpointStore::new(path);
    if !dry_run {
        return Ok(Arc::new(file));
    }

    let mut memory = MemoryCheckpointStore::new();
    for chain in ChainSide::ALL {
        if let Some(block) = file.load(chain).await? {
            memory = memory.with_checkpoint(chain, block);
        }
    }
    info!(
        path = %file.path().display(),
        "Dry run: checkpoints are read from file but not written back"
    );
    Ok(Arc::new(memory))
}
