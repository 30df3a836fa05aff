//! Core abstractions for prefstore: the value model, the codec that maps typed
//! values onto backend slots, and the contracts both storage backends consume.
//! This crate carries no cryptography so backends can be faked cheaply in tests.

pub mod backend;
pub mod codec;
pub mod error;
pub mod kv;
pub mod value;

pub use backend::{Durability, Eventual, Immediate, StorageBackend};
pub use error::StoreError;
pub use kv::{InMemoryKv, InMemorySnapshotKv, Slot, Snapshot, SnapshotKv, TransactionalKv};
pub use value::{
    Json, PreferenceValue, Primitive, PrimitiveKind, PrimitiveValue, StoredValue, ValueKind,
};
