//! Concrete key management, encryption and store implementations.
//! Uses AES-GCM (or legacy AES-CBC) with keys sourced from the OS keyring,
//! an in-memory key store, or a caller-supplied external key.

pub mod async_store;
pub mod cipher;
pub mod encoding;
pub mod file_store;
pub mod key_manager;
pub mod key_provider;
pub mod sync_store;

pub use async_store::AsynchronousStore;
pub use cipher::{AeadCipher, BlockMode, CipherError};
pub use file_store::{FileKvStore, FileSnapshotStore};
pub use key_manager::KeyManager;
pub use key_provider::{
    decode_key, encode_key, generate_external_key, HardwareKeyStore, InMemoryKeyStore, KeyError,
    KeyringKeyStore, SecretKey,
};
pub use sync_store::SynchronousStore;
