use std::{
    sync::{mpsc as std_mpsc, Arc},
    time::Duration,
};

use prefstore_core::{
    kv::SnapshotEdit, Eventual, PreferenceValue, SnapshotKv, StorageBackend, StoreError,
};
use tokio::{
    runtime::{Builder, Handle, Runtime, RuntimeFlavor},
    sync::{mpsc, watch},
};
use tracing::{debug, instrument, warn};

use crate::{encoding::ValueSealer, key_manager::KeyManager};

/// How long dropping a store with its own runtime waits for queued writes.
const DRAIN_ON_DROP: Duration = Duration::from_secs(5);

/// Store over an eventually-durable snapshot backend.
///
/// The `async` methods run on the caller's executor and complete once the
/// backend has applied the edit. The `*_direct` methods are the blocking
/// adapter: reads block until the backend yields its current snapshot, writes
/// are queued for a background writer and return immediately, so a direct
/// read may still observe the value from before a queued write.
///
/// Dropping a store built with [`AsynchronousStore::new`] first drains the
/// write queue (bounded by a timeout) before its runtime is shut down.
pub struct AsynchronousStore<S: SnapshotKv> {
    kv: Arc<S>,
    sealer: ValueSealer,
    queue: mpsc::UnboundedSender<SnapshotEdit>,
    pending: Arc<watch::Sender<usize>>,
    executor: BackgroundExecutor,
}

struct BackgroundExecutor {
    handle: Handle,
    runtime: Option<Runtime>,
}

impl Drop for BackgroundExecutor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl<S: SnapshotKv> AsynchronousStore<S> {
    /// Build a store with its own one-worker background runtime.
    pub fn new(kv: S, keys: Arc<KeyManager>) -> Result<Self, StoreError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("prefstore-writer")
            .enable_time()
            .build()
            .map_err(StoreError::storage)?;
        let executor = BackgroundExecutor {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        };
        Ok(Self::build(kv, keys, executor))
    }

    /// Build a store whose background work runs on an existing runtime.
    ///
    /// The blocking methods (`get_direct`, `wait_for_writes`) return a
    /// configuration error when called from inside a current-thread runtime,
    /// since that thread would also be the one driving the background work.
    /// Queued writes keep draining on `handle` after the store is dropped.
    pub fn with_handle(kv: S, keys: Arc<KeyManager>, handle: Handle) -> Self {
        Self::build(
            kv,
            keys,
            BackgroundExecutor {
                handle,
                runtime: None,
            },
        )
    }

    fn build(kv: S, keys: Arc<KeyManager>, executor: BackgroundExecutor) -> Self {
        let kv = Arc::new(kv);
        let (queue, rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);
        executor
            .handle
            .spawn(drain_writes(Arc::clone(&kv), rx, Arc::clone(&pending)));
        Self {
            kv,
            sealer: ValueSealer::new(keys),
            queue,
            pending,
            executor,
        }
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        self.sealer.keys()
    }

    pub fn backend(&self) -> &Arc<S> {
        &self.kv
    }

    #[instrument(skip_all, fields(key = %key, encrypted = encrypted))]
    pub async fn put<T: PreferenceValue>(
        &self,
        key: &str,
        value: &T,
        encrypted: bool,
    ) -> Result<(), StoreError> {
        let slot = self.sealer.encode(value, encrypted)?;
        let key = key.to_string();
        self.kv
            .edit(Box::new(move |snapshot| {
                snapshot.insert(key, slot);
            }))
            .await
    }

    #[instrument(skip_all, fields(key = %key, encrypted = encrypted))]
    pub async fn get<T: PreferenceValue>(
        &self,
        key: &str,
        default: T,
        encrypted: bool,
    ) -> Result<T, StoreError> {
        let snapshot = self.kv.snapshot().await?;
        self.sealer
            .decode(key, snapshot.get(key).cloned(), default, encrypted)
    }

    #[instrument(skip_all, fields(key = %key))]
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.kv
            .edit(Box::new(move |snapshot| {
                snapshot.remove(&key);
            }))
            .await
    }

    /// Encode `value` now and queue the write. Encoding failures (for example
    /// a missing key) are returned; backend failures are only logged.
    pub fn put_direct<T: PreferenceValue>(
        &self,
        key: &str,
        value: &T,
        encrypted: bool,
    ) -> Result<(), StoreError> {
        let slot = self.sealer.encode(value, encrypted)?;
        let key = key.to_string();
        self.enqueue(Box::new(move |snapshot| {
            snapshot.insert(key, slot);
        }))
    }

    /// Block until the backend yields its current snapshot, then decode `key`.
    pub fn get_direct<T: PreferenceValue>(
        &self,
        key: &str,
        default: T,
        encrypted: bool,
    ) -> Result<T, StoreError> {
        self.ensure_can_block()?;
        let kv = Arc::clone(&self.kv);
        let (tx, rx) = std_mpsc::sync_channel(1);
        self.executor.handle.spawn(async move {
            let _ = tx.send(kv.snapshot().await);
        });
        let snapshot = rx.recv().map_err(|_| StoreError::Storage {
            reason: "background executor stopped".to_string(),
        })??;
        self.sealer
            .decode(key, snapshot.get(key).cloned(), default, encrypted)
    }

    pub fn delete_direct(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.enqueue(Box::new(move |snapshot| {
            snapshot.remove(&key);
        }))
    }

    /// Number of queued direct writes not yet applied.
    pub fn pending_writes(&self) -> usize {
        *self.pending.borrow()
    }

    /// Block until every queued direct write has been applied, or `timeout`
    /// elapses. Returns whether the queue drained.
    pub fn wait_for_writes(&self, timeout: Duration) -> Result<bool, StoreError> {
        self.ensure_can_block()?;
        let mut rx = self.pending.subscribe();
        let (tx, done) = std_mpsc::sync_channel(1);
        self.executor.handle.spawn(async move {
            let drained = matches!(
                tokio::time::timeout(timeout, rx.wait_for(|pending| *pending == 0)).await,
                Ok(Ok(_))
            );
            let _ = tx.send(drained);
        });
        Ok(done.recv().unwrap_or(false))
    }

    fn ensure_can_block(&self) -> Result<(), StoreError> {
        if self.executor.runtime.is_some() {
            return Ok(());
        }
        match Handle::try_current() {
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::CurrentThread => {
                Err(StoreError::configuration(
                    "blocking store access from a current-thread runtime would deadlock; \
                     use the async methods or a store built with `new`",
                ))
            }
            _ => Ok(()),
        }
    }

    fn enqueue(&self, edit: SnapshotEdit) -> Result<(), StoreError> {
        self.pending.send_modify(|pending| *pending += 1);
        if self.queue.send(edit).is_err() {
            self.pending
                .send_modify(|pending| *pending = pending.saturating_sub(1));
            return Err(StoreError::Storage {
                reason: "background writer stopped".to_string(),
            });
        }
        Ok(())
    }
}

impl<S: SnapshotKv> Drop for AsynchronousStore<S> {
    fn drop(&mut self) {
        if self.executor.runtime.is_none() || self.pending_writes() == 0 {
            return;
        }
        if !matches!(self.wait_for_writes(DRAIN_ON_DROP), Ok(true)) {
            warn!(
                pending = self.pending_writes(),
                "store dropped before queued writes were applied"
            );
        }
    }
}

async fn drain_writes<S: SnapshotKv>(
    kv: Arc<S>,
    mut rx: mpsc::UnboundedReceiver<SnapshotEdit>,
    pending: Arc<watch::Sender<usize>>,
) {
    while let Some(edit) = rx.recv().await {
        if let Err(err) = kv.edit(edit).await {
            warn!(error = %err, "background write failed");
        }
        pending.send_modify(|pending| *pending = pending.saturating_sub(1));
    }
    debug!("background writer stopped");
}

impl<S: SnapshotKv> StorageBackend for AsynchronousStore<S> {
    type Durability = Eventual;

    fn put<T: PreferenceValue>(
        &self,
        key: &str,
        value: &T,
        encrypted: bool,
    ) -> Result<(), StoreError> {
        self.put_direct(key, value, encrypted)
    }

    fn get<T: PreferenceValue>(
        &self,
        key: &str,
        default: T,
        encrypted: bool,
    ) -> Result<T, StoreError> {
        self.get_direct(key, default, encrypted)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.delete_direct(key)
    }

    fn pending_writes(&self) -> usize {
        AsynchronousStore::pending_writes(self)
    }
}
