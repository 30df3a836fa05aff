use std::sync::Arc;

use prefstore_core::{Immediate, PreferenceValue, StorageBackend, StoreError, TransactionalKv};
use tracing::instrument;

use crate::{encoding::ValueSealer, key_manager::KeyManager};

/// Synchronous store over a transactional key-value backend.
///
/// Every call runs on the calling thread and is durable when it returns, so
/// a `get` after a `put` always sees the write.
pub struct SynchronousStore<K: TransactionalKv> {
    kv: K,
    sealer: ValueSealer,
}

impl<K: TransactionalKv> SynchronousStore<K> {
    pub fn new(kv: K, keys: Arc<KeyManager>) -> Self {
        Self {
            kv,
            sealer: ValueSealer::new(keys),
        }
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        self.sealer.keys()
    }

    pub fn backend(&self) -> &K {
        &self.kv
    }

    #[instrument(skip_all, fields(key = %key, encrypted = encrypted))]
    pub fn put<T: PreferenceValue>(
        &self,
        key: &str,
        value: &T,
        encrypted: bool,
    ) -> Result<(), StoreError> {
        let slot = self.sealer.encode(value, encrypted)?;
        self.kv.put(key, slot)
    }

    #[instrument(skip_all, fields(key = %key, encrypted = encrypted))]
    pub fn get<T: PreferenceValue>(
        &self,
        key: &str,
        default: T,
        encrypted: bool,
    ) -> Result<T, StoreError> {
        let slot = self.kv.get(key)?;
        self.sealer.decode(key, slot, default, encrypted)
    }

    #[instrument(skip_all, fields(key = %key))]
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.kv.remove(key)
    }
}

impl<K: TransactionalKv> StorageBackend for SynchronousStore<K> {
    type Durability = Immediate;

    fn put<T: PreferenceValue>(
        &self,
        key: &str,
        value: &T,
        encrypted: bool,
    ) -> Result<(), StoreError> {
        SynchronousStore::put(self, key, value, encrypted)
    }

    fn get<T: PreferenceValue>(
        &self,
        key: &str,
        default: T,
        encrypted: bool,
    ) -> Result<T, StoreError> {
        SynchronousStore::get(self, key, default, encrypted)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        SynchronousStore::delete(self, key)
    }
}

#[cfg(test)]
mod tests {
    use prefstore_core::{InMemoryKv, Json, Slot};
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{
        cipher::BlockMode,
        file_store::FileKvStore,
        key_provider::{generate_external_key, InMemoryKeyStore},
    };

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: u64,
        email: String,
        roles: Vec<String>,
    }

    fn account() -> Account {
        Account {
            id: 7,
            email: "ada@example.com".into(),
            roles: vec!["admin".into()],
        }
    }

    fn keys() -> Arc<KeyManager> {
        Arc::new(KeyManager::with_external_key(
            generate_external_key(),
            BlockMode::Gcm,
        ))
    }

    #[test]
    fn primitives_round_trip_plain_and_encrypted() {
        let store = SynchronousStore::new(InMemoryKv::new(), keys());
        for encrypted in [false, true] {
            store.put("b", &true, encrypted).expect("put");
            store.put("i", &-5_i32, encrypted).expect("put");
            store.put("f", &1.5_f32, encrypted).expect("put");
            store.put("l", &(i64::MAX - 1), encrypted).expect("put");
            store.put("d", &2.0e-300_f64, encrypted).expect("put");
            store.put("s", &"text".to_string(), encrypted).expect("put");

            assert!(store.get("b", false, encrypted).expect("get"));
            assert_eq!(store.get("i", 0_i32, encrypted).expect("get"), -5);
            assert_eq!(store.get("f", 0_f32, encrypted).expect("get"), 1.5);
            assert_eq!(store.get("l", 0_i64, encrypted).expect("get"), i64::MAX - 1);
            assert_eq!(store.get("d", 0_f64, encrypted).expect("get"), 2.0e-300);
            assert_eq!(store.get("s", String::new(), encrypted).expect("get"), "text");
        }
    }

    #[test]
    fn complex_values_round_trip_plain_and_encrypted() {
        let store = SynchronousStore::new(InMemoryKv::new(), keys());
        let fallback = Json(Account {
            id: 0,
            email: String::new(),
            roles: vec![],
        });

        store.put("plain", &Json(account()), false).expect("put");
        store.put("sealed", &Json(account()), true).expect("put");

        assert_eq!(
            store.get("plain", fallback.clone(), false).expect("get"),
            Json(account())
        );
        assert_eq!(
            store.get("sealed", fallback, true).expect("get"),
            Json(account())
        );
        match store.backend().get("plain").expect("raw") {
            Some(Slot::Text(json)) => assert!(json.contains("ada@example.com")),
            other => panic!("unexpected slot {other:?}"),
        }
    }

    #[test]
    fn doubles_are_stored_as_text() {
        let store = SynchronousStore::new(InMemoryKv::new(), keys());
        store.put("ratio", &0.75_f64, false).expect("put");
        assert_eq!(
            store.backend().get("ratio").expect("raw"),
            Some(Slot::Text("0.75".into()))
        );
    }

    #[test]
    fn absent_and_mismatched_reads_return_default() {
        let store = SynchronousStore::new(InMemoryKv::new(), keys());
        assert_eq!(store.get("missing", 11_i32, false).expect("get"), 11);

        store.put("flag", &true, false).expect("put");
        assert_eq!(store.get("flag", 11_i32, false).expect("get"), 11);
    }

    #[test]
    fn value_encrypted_under_old_key_reads_as_default_after_switch() {
        let store = SynchronousStore::new(InMemoryKv::new(), keys());
        store.put("token", &"abc".to_string(), true).expect("put");

        store.keys().set_external_key(generate_external_key());
        assert_eq!(
            store.get("token", "none".to_string(), true).expect("get"),
            "none"
        );

        store.put("token", &"def".to_string(), true).expect("put");
        assert_eq!(
            store.get("token", "none".to_string(), true).expect("get"),
            "def"
        );
    }

    #[test]
    fn encrypted_access_without_key_is_fatal() {
        let store = SynchronousStore::new(
            InMemoryKv::new(),
            Arc::new(KeyManager::unconfigured(BlockMode::Gcm)),
        );
        let err = store.put("k", &1_i32, true).expect_err("no key");
        assert!(matches!(err, StoreError::Configuration { .. }));

        store.put("k", &1_i32, false).expect("plain writes need no key");
    }

    #[test]
    fn delete_is_idempotent() {
        let store = SynchronousStore::new(InMemoryKv::new(), keys());
        store.put("k", &1_i32, false).expect("put");
        store.delete("k").expect("delete");
        store.delete("k").expect("delete again");
        assert_eq!(store.get("k", 0_i32, false).expect("get"), 0);
    }

    #[test]
    fn encrypted_file_store_holds_no_plaintext() {
        let dir = tempfile::tempdir().expect("tempdir");
        let key_store = InMemoryKeyStore::new();
        let keys = Arc::new(
            KeyManager::with_alias(&key_store, "prefs", BlockMode::Gcm).expect("keys"),
        );
        let path = dir.path().join("prefs.json");

        let store = SynchronousStore::new(FileKvStore::open(&path).expect("open"), keys);
        store
            .put("secret", &"hello-prefstore".to_string(), true)
            .expect("put");

        let on_disk = std::fs::read_to_string(&path).expect("read");
        assert!(!on_disk.contains("hello-prefstore"), "plaintext must not be stored");

        let reopened_keys = Arc::new(
            KeyManager::with_alias(&key_store, "prefs", BlockMode::Gcm).expect("keys"),
        );
        let reopened =
            SynchronousStore::new(FileKvStore::open(&path).expect("reopen"), reopened_keys);
        assert_eq!(
            reopened.get("secret", String::new(), true).expect("get"),
            "hello-prefstore"
        );
    }

    #[test]
    fn non_finite_floats_round_trip_through_file_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        let keys = keys();

        let backend = FileKvStore::open(&path).expect("open");
        let store = SynchronousStore::new(backend, Arc::clone(&keys));
        store.put("gain", &f32::NAN, false).expect("put");
        store.put("limit", &f64::INFINITY, false).expect("put");
        drop(store);

        let reopened = SynchronousStore::new(FileKvStore::open(&path).expect("reopen"), keys);
        assert!(reopened.get("gain", 0.0_f32, false).expect("get").is_nan());
        assert_eq!(
            reopened.get("limit", 0.0_f64, false).expect("get"),
            f64::INFINITY
        );
    }
}
