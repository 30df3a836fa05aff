//! Lazily keyed preference bindings over a [`StorageBackend`].

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use prefstore_core::{Durability, PreferenceValue, StorageBackend, StoreError};
use tracing::{debug, instrument};

/// Binds one preference to a backend.
///
/// The persistence key is resolved on first access, from the explicit key if
/// one was given or else from the binding's name, and never changes after
/// that. `set` only writes when the value differs from the last one observed.
/// While the backend still has writes in flight, `get` serves the last value
/// this binding set instead of a snapshot that may predate it.
pub struct Binding<T: PreferenceValue, B: StorageBackend> {
    backend: Arc<B>,
    explicit_key: Option<String>,
    fallback_name: Option<String>,
    default: T,
    encrypted: bool,
    key: OnceLock<String>,
    observed: Mutex<Option<T>>,
}

impl<T: PreferenceValue, B: StorageBackend> Binding<T, B> {
    /// A binding persisted under `key`.
    pub fn named(backend: Arc<B>, key: impl Into<String>, default: T) -> Self {
        Self::bind(backend, Some(key.into()), None, default)
    }

    /// A binding persisted under `explicit_key`, or under `fallback_name` when
    /// no explicit key is given. See [`preference!`] for capturing the name of
    /// the binding variable.
    pub fn bind(
        backend: Arc<B>,
        explicit_key: Option<String>,
        fallback_name: Option<&str>,
        default: T,
    ) -> Self {
        Self {
            backend,
            explicit_key,
            fallback_name: fallback_name.map(str::to_string),
            default,
            encrypted: false,
            key: OnceLock::new(),
            observed: Mutex::new(None),
        }
    }

    /// Encrypt the value at rest.
    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    /// Override the persistence key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.explicit_key = Some(key.into());
        self
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// The persistence key, resolving it on first call.
    pub fn key(&self) -> Result<&str, StoreError> {
        if let Some(key) = self.key.get() {
            return Ok(key.as_str());
        }
        let resolved = self
            .explicit_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .or_else(|| self.fallback_name.as_deref().filter(|name| !name.is_empty()))
            .ok_or_else(|| {
                StoreError::configuration("preference has neither an explicit key nor a name")
            })?;
        Ok(self.key.get_or_init(|| resolved.to_string()).as_str())
    }

    /// Read the current value, or the default when nothing is stored.
    #[instrument(skip_all, fields(durability = <B::Durability as Durability>::NAME))]
    pub fn get(&self) -> Result<T, StoreError> {
        let key = self.key()?;
        let mut observed = self.observed()?;
        if self.backend.pending_writes() > 0 {
            if let Some(value) = observed.as_ref() {
                debug!(key, "writes in flight, serving last set value");
                return Ok(value.clone());
            }
        }
        let value = self.backend.get(key, self.default.clone(), self.encrypted)?;
        *observed = Some(value.clone());
        Ok(value)
    }

    /// Store `value` unless it equals the last observed value. Returns whether
    /// a write was issued.
    #[instrument(skip_all, fields(durability = <B::Durability as Durability>::NAME))]
    pub fn set(&self, value: T) -> Result<bool, StoreError> {
        let key = self.key()?;
        let mut observed = self.observed()?;
        // A read with writes in flight may be stale, so it cannot gate the write.
        let last = match observed.take() {
            Some(last) => Some(last),
            None if self.backend.pending_writes() > 0 => None,
            None => Some(self.backend.get(key, self.default.clone(), self.encrypted)?),
        };

        if let Some(last) = last.as_ref().filter(|last| last.same_value(&value)) {
            debug!(key, "value unchanged, skipping write");
            *observed = Some(last.clone());
            return Ok(false);
        }

        *observed = Some(value.clone());
        if let Err(err) = self.backend.put(key, &value, self.encrypted) {
            *observed = last;
            return Err(err);
        }
        Ok(true)
    }

    /// Remove the stored value; later reads return the default.
    pub fn clear(&self) -> Result<(), StoreError> {
        let key = self.key()?;
        let mut observed = self.observed()?;
        self.backend.delete(key)?;
        *observed = None;
        Ok(())
    }

    fn observed(&self) -> Result<MutexGuard<'_, Option<T>>, StoreError> {
        self.observed.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

/// Bind a preference named after the given identifier.
///
/// ```ignore
/// let counter = preference!(Arc::clone(&store), counter = 0_i32);
/// let token = preference!(Arc::clone(&store), token = String::new(), key = "auth/token")
///     .encrypted();
/// ```
#[macro_export]
macro_rules! preference {
    ($backend:expr, $name:ident = $default:expr, key = $key:expr) => {
        $crate::Binding::bind(
            $backend,
            Some(::std::string::String::from($key)),
            Some(stringify!($name)),
            $default,
        )
    };
    ($backend:expr, $name:ident = $default:expr) => {
        $crate::Binding::bind($backend, None, Some(stringify!($name)), $default)
    };
}
