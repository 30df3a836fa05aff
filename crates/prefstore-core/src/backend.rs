use std::sync::Arc;

use crate::{error::StoreError, value::PreferenceValue};

/// Durability regime of a [`StorageBackend`].
pub trait Durability: Send + Sync + 'static {
    /// Short name used in logs.
    const NAME: &'static str;
    /// Whether a `get` issued after a `put` returns observes that write.
    const READ_YOUR_WRITES: bool;
}

/// Writes are durable and visible before `put` returns.
#[derive(Debug, Clone, Copy)]
pub enum Immediate {}

impl Durability for Immediate {
    const NAME: &'static str = "immediate";
    const READ_YOUR_WRITES: bool = true;
}

/// Writes are scheduled in the background; reads may observe the pre-write value.
#[derive(Debug, Clone, Copy)]
pub enum Eventual {}

impl Durability for Eventual {
    const NAME: &'static str = "eventual";
    const READ_YOUR_WRITES: bool = false;
}

/// Synchronous capability set shared by both store flavours.
pub trait StorageBackend: Send + Sync {
    type Durability: Durability;

    /// Persist `value` under `key`, encrypting it first when `encrypted` is set.
    fn put<T: PreferenceValue>(&self, key: &str, value: &T, encrypted: bool)
        -> Result<(), StoreError>;

    /// Read the value under `key`, or `default` when it is absent or cannot be decoded.
    fn get<T: PreferenceValue>(&self, key: &str, default: T, encrypted: bool)
        -> Result<T, StoreError>;

    /// Remove `key` (idempotent).
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Writes accepted but not yet visible to `get`. Always zero when
    /// [`Durability::READ_YOUR_WRITES`] holds.
    fn pending_writes(&self) -> usize {
        0
    }
}

impl<B: StorageBackend> StorageBackend for Arc<B> {
    type Durability = B::Durability;

    fn put<T: PreferenceValue>(
        &self,
        key: &str,
        value: &T,
        encrypted: bool,
    ) -> Result<(), StoreError> {
        (**self).put(key, value, encrypted)
    }

    fn get<T: PreferenceValue>(
        &self,
        key: &str,
        default: T,
        encrypted: bool,
    ) -> Result<T, StoreError> {
        (**self).get(key, default, encrypted)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key)
    }

    fn pending_writes(&self) -> usize {
        (**self).pending_writes()
    }
}
