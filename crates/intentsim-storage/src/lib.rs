//! JSON snapshot persistence for IntentSim.
//!
//! Snapshots are whole-state checkpoints written atomically (temp file then
//! rename). Loading is forgiving: a missing, unreadable or incompatible file
//! yields a fresh engine instead of an error.

use intentsim_core::{
    EngineError, PersistenceBatch, SimulationConfig, SimulationEngine, SimulationPersistence,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, mpsc},
    thread,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Current on-disk snapshot format.
pub const SNAPSHOT_FORMAT_VERSION: u16 = 1;

/// Storage error wrapper.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("snapshot io error: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unsupported snapshot format version {0}")]
    UnsupportedVersion(u16),
    #[error("storage worker error: {0}")]
    Worker(String),
}

#[derive(Serialize)]
struct SnapshotRecordRef<'a> {
    format_version: u16,
    batch: &'a PersistenceBatch,
}

#[derive(Deserialize)]
struct SnapshotRecord {
    format_version: u16,
    batch: PersistenceBatch,
}

/// Synchronous snapshot writer bound to one file path.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    writes: u64,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writes: 0,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of snapshots successfully written by this store.
    #[must_use]
    pub const fn writes(&self) -> u64 {
        self.writes
    }

    /// Write `batch` to a sibling temp file and atomically move it into place.
    pub fn save(&mut self, batch: &PersistenceBatch) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let file = fs::File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(
                &mut writer,
                &SnapshotRecordRef {
                    format_version: SNAPSHOT_FORMAT_VERSION,
                    batch,
                },
            )?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.writes += 1;
        debug!(tick = batch.tick.0, path = %self.path.display(), "snapshot written");
        Ok(())
    }

    /// Read the snapshot, returning `Ok(None)` when no file exists yet.
    pub fn load(&self) -> Result<Option<PersistenceBatch>, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record: SnapshotRecord = serde_json::from_slice(&bytes)?;
        if record.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(StorageError::UnsupportedVersion(record.format_version));
        }
        Ok(Some(record.batch))
    }
}

impl SimulationPersistence for SnapshotStore {
    fn on_tick(&mut self, payload: &PersistenceBatch) {
        if let Err(err) = self.save(payload) {
            warn!(tick = payload.tick.0, error = %err, "failed to write snapshot");
        }
    }
}

/// Resume from the snapshot at `path`, or start fresh when that is not possible.
///
/// `config` always wins over the stored configuration; a stored state that
/// does not fit it is discarded. Only an invalid `config` is an error.
pub fn restore_or_fresh(
    config: SimulationConfig,
    path: &Path,
    persistence: Box<dyn SimulationPersistence>,
) -> Result<SimulationEngine, EngineError> {
    let store = SnapshotStore::new(path);
    let batch = match store.load() {
        Ok(Some(batch)) => batch,
        Ok(None) => {
            info!(path = %path.display(), "no snapshot found; starting fresh");
            return SimulationEngine::with_persistence(config, persistence);
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "unreadable snapshot; starting fresh");
            return SimulationEngine::with_persistence(config, persistence);
        }
    };
    config.validate()?;
    let tick = batch.tick;
    match SimulationEngine::from_state(config.clone(), batch.state, Box::new(Discard)) {
        Ok(mut engine) => {
            engine.set_persistence(persistence);
            info!(tick = tick.0, "resumed from snapshot");
            Ok(engine)
        }
        Err(err) => {
            warn!(tick = tick.0, error = %err, "snapshot incompatible; starting fresh");
            SimulationEngine::with_persistence(config, persistence)
        }
    }
}

struct Discard;

impl SimulationPersistence for Discard {
    fn on_tick(&mut self, _payload: &PersistenceBatch) {}
}

#[derive(Debug)]
enum StorageCommand {
    Persist(Box<PersistenceBatch>),
    Shutdown,
}

/// Writes snapshots on a background thread so ticks never wait on disk.
pub struct StoragePipeline {
    tx: mpsc::Sender<StorageCommand>,
    store: Arc<Mutex<SnapshotStore>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StoragePipeline {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let shared = Arc::new(Mutex::new(SnapshotStore::new(path)));
        let (tx, rx) = mpsc::channel::<StorageCommand>();
        let worker_store = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("intentsim-storage-worker".into())
            .spawn(move || {
                while let Ok(command) = rx.recv() {
                    match command {
                        StorageCommand::Persist(batch) => {
                            let mut store = match worker_store.lock() {
                                Ok(store) => store,
                                Err(poisoned) => {
                                    warn!(tick = batch.tick.0, "snapshot store mutex poisoned");
                                    poisoned.into_inner()
                                }
                            };
                            if let Err(err) = store.save(&batch) {
                                warn!(
                                    tick = batch.tick.0,
                                    error = %err,
                                    "failed to write snapshot asynchronously"
                                );
                            }
                        }
                        StorageCommand::Shutdown => break,
                    }
                }
            })
            .map_err(|err| {
                StorageError::Worker(format!("failed to spawn storage worker thread: {err}"))
            })?;

        Ok(Self {
            tx,
            store: shared,
            handle: Some(handle),
        })
    }

    /// Shared access to the underlying store.
    #[must_use]
    pub fn store(&self) -> Arc<Mutex<SnapshotStore>> {
        Arc::clone(&self.store)
    }
}

impl SimulationPersistence for StoragePipeline {
    fn on_tick(&mut self, payload: &PersistenceBatch) {
        if self
            .tx
            .send(StorageCommand::Persist(Box::new(payload.clone())))
            .is_err()
        {
            warn!(tick = payload.tick.0, "storage worker channel closed; snapshot dropped");
        }
    }
}

impl Drop for StoragePipeline {
    fn drop(&mut self) {
        let _ = self.tx.send(StorageCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("storage worker thread panicked");
        }
    }
}
