use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::StoreError;

/// A typed slot as offered by the underlying key-value stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Slot {
    Bool(bool),
    Int(i32),
    #[serde(with = "float_repr")]
    Float(f32),
    Long(i64),
    Text(String),
}

impl Slot {
    pub fn type_name(&self) -> &'static str {
        match self {
            Slot::Bool(_) => "bool",
            Slot::Int(_) => "i32",
            Slot::Float(_) => "f32",
            Slot::Long(_) => "i64",
            Slot::Text(_) => "text",
        }
    }
}

/// JSON has no NaN or infinity, so non-finite floats are written as their
/// text form (`NaN`, `inf`, `-inf`). Finite floats stay plain numbers.
mod float_repr {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f32(*value)
        } else {
            serializer.serialize_str(&value.to_string())
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f32),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => text.parse().map_err(D::Error::custom),
        }
    }
}

/// One immutable view of an eventually-durable store.
pub type Snapshot = BTreeMap<String, Slot>;

/// A mutation applied atomically to the latest snapshot.
pub type SnapshotEdit = Box<dyn FnOnce(&mut Snapshot) + Send>;

/// Contract for a transactional key-value store: every call is synchronous
/// and durable once it returns.
pub trait TransactionalKv: Send + Sync {
    /// Persist a slot under a key, overwriting any existing entry.
    fn put(&self, key: &str, slot: Slot) -> Result<(), StoreError>;

    /// Retrieve the slot for a key, if any.
    fn get(&self, key: &str) -> Result<Option<Slot>, StoreError>;

    /// Remove a key and its slot (idempotent).
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Contract for an eventually-durable store exposing a stream of snapshots
/// plus atomic edit transactions.
#[async_trait]
pub trait SnapshotKv: Send + Sync + 'static {
    /// Subscribe to snapshots. The receiver always holds an initial value.
    fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>>;

    /// The first snapshot the subscription emits.
    async fn snapshot(&self) -> Result<Arc<Snapshot>, StoreError> {
        let rx = self.subscribe();
        let current = rx.borrow().clone();
        Ok(current)
    }

    /// Apply `edit` to the latest snapshot and publish the result.
    async fn edit(&self, edit: SnapshotEdit) -> Result<(), StoreError>;
}

/// In-memory transactional store for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKv {
    inner: Arc<Mutex<HashMap<String, Slot>>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionalKv for InMemoryKv {
    fn put(&self, key: &str, slot: Slot) -> Result<(), StoreError> {
        let mut map = self.inner.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.insert(key.to_string(), slot);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Slot>, StoreError> {
        let map = self.inner.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        Ok(map.get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.inner.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.remove(key);
        Ok(())
    }
}

/// In-memory snapshot store. Edits are published through a watch channel,
/// so every subscriber sees a consistent sequence of snapshots.
#[derive(Debug, Clone)]
pub struct InMemorySnapshotKv {
    tx: Arc<watch::Sender<Arc<Snapshot>>>,
}

impl InMemorySnapshotKv {
    pub fn new() -> Self {
        Self::with_snapshot(Snapshot::new())
    }

    pub fn with_snapshot(initial: Snapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }
}

impl Default for InMemorySnapshotKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotKv for InMemorySnapshotKv {
    fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }

    async fn edit(&self, edit: SnapshotEdit) -> Result<(), StoreError> {
        self.tx.send_modify(|current| edit(Arc::make_mut(current)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transactional_round_trip_and_idempotent_remove() {
        let kv = InMemoryKv::new();
        kv.put("flag", Slot::Bool(true)).expect("put");
        assert_eq!(kv.get("flag").expect("get"), Some(Slot::Bool(true)));

        kv.remove("flag").expect("remove");
        kv.remove("flag").expect("remove again");
        assert_eq!(kv.get("flag").expect("get"), None);
    }

    #[tokio::test]
    async fn edits_are_published_to_subscribers() {
        let kv = InMemorySnapshotKv::new();
        let mut rx = kv.subscribe();
        assert!(rx.borrow_and_update().is_empty());

        kv.edit(Box::new(|snap| {
            snap.insert("count".into(), Slot::Int(3));
        }))
        .await
        .expect("edit");

        rx.changed().await.expect("changed");
        assert_eq!(rx.borrow().get("count"), Some(&Slot::Int(3)));
        assert_eq!(
            kv.snapshot().await.expect("snapshot").get("count"),
            Some(&Slot::Int(3))
        );
    }

    #[test]
    fn slot_serializes_with_type_tag() {
        let json = serde_json::to_string(&Slot::Long(9)).expect("serialize");
        assert_eq!(json, r#"{"type":"long","value":9}"#);
    }

    #[test]
    fn non_finite_floats_survive_serialization() {
        for value in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let json = serde_json::to_string(&Slot::Float(value)).expect("serialize");
            assert!(!json.contains("null"), "{json}");
            match serde_json::from_str(&json).expect("deserialize") {
                Slot::Float(back) => assert_eq!(back.to_bits(), value.to_bits()),
                other => panic!("unexpected slot {other:?}"),
            }
        }

        let finite = serde_json::to_string(&Slot::Float(0.5)).expect("serialize");
        assert_eq!(finite, r#"{"type":"float","value":0.5}"#);
    }
}
