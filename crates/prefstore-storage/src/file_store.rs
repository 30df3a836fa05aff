use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use prefstore_core::{
    kv::SnapshotEdit, Slot, Snapshot, SnapshotKv, StoreError, TransactionalKv,
};
use tempfile::NamedTempFile;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, instrument};

/// File-backed transactional store. Every write is persisted with an atomic
/// rename before it returns.
pub struct FileKvStore {
    path: PathBuf,
    entries: Mutex<Snapshot>,
}

impl FileKvStore {
    /// Open the store at `path`, loading existing entries if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = read_snapshot(&path)?;
        debug!(?path, entries = entries.len(), "opened transactional store");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate(&self, apply: impl FnOnce(&mut Snapshot)) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        let mut next = entries.clone();
        apply(&mut next);
        write_snapshot(&self.path, &next)?;
        *entries = next;
        Ok(())
    }
}

impl TransactionalKv for FileKvStore {
    #[instrument(skip_all, fields(key = %key))]
    fn put(&self, key: &str, slot: Slot) -> Result<(), StoreError> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), slot);
        })
    }

    fn get(&self, key: &str) -> Result<Option<Slot>, StoreError> {
        let entries = self.entries.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        Ok(entries.get(key).cloned())
    }

    #[instrument(skip_all, fields(key = %key))]
    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.mutate(|entries| {
            entries.remove(key);
        })
    }
}

/// File-backed snapshot store. Edits are applied one at a time, persisted,
/// then published to subscribers.
pub struct FileSnapshotStore {
    path: PathBuf,
    tx: watch::Sender<Arc<Snapshot>>,
    edit_lock: AsyncMutex<()>,
}

impl FileSnapshotStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let initial = read_snapshot(&path)?;
        debug!(?path, entries = initial.len(), "opened snapshot store");
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Ok(Self {
            path,
            tx,
            edit_lock: AsyncMutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotKv for FileSnapshotStore {
    fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }

    async fn edit(&self, edit: SnapshotEdit) -> Result<(), StoreError> {
        let _guard = self.edit_lock.lock().await;
        let mut next = Snapshot::clone(&self.tx.borrow());
        edit(&mut next);
        write_snapshot(&self.path, &next)?;
        self.tx.send_replace(Arc::new(next));
        Ok(())
    }
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| StoreError::Storage {
        reason: "invalid storage path".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(StoreError::storage)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(StoreError::storage)?;
    let json = serde_json::to_vec(snapshot).map_err(StoreError::storage)?;
    tmp.write_all(&json).map_err(StoreError::storage)?;
    tmp.flush().map_err(StoreError::storage)?;
    tmp.persist(path).map_err(|e| StoreError::storage(e.error))?;
    Ok(())
}

fn read_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::new()),
        Err(err) => return Err(StoreError::storage(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(StoreError::storage)?;
    if buf.iter().all(u8::is_ascii_whitespace) {
        return Ok(Snapshot::new());
    }
    serde_json::from_slice(&buf).map_err(StoreError::storage)
}
