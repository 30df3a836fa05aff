use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{debug, info};

use crate::{
    cipher::BlockMode,
    key_provider::{HardwareKeyStore, KeyError, KeyGenSpec, KeyOrigin, SecretKey},
};

/// Owns the single active key.
///
/// The active key is swapped atomically: an operation that has already loaded
/// the key finishes with it, every later `current_key` sees the replacement.
/// Replacing the key never re-encrypts existing ciphertexts.
pub struct KeyManager {
    mode: BlockMode,
    active: ArcSwapOption<SecretKey>,
}

impl KeyManager {
    /// A manager with no key; cryptographic use fails until
    /// [`KeyManager::set_external_key`] is called.
    pub fn unconfigured(mode: BlockMode) -> Self {
        Self {
            mode,
            active: ArcSwapOption::empty(),
        }
    }

    /// Load the key stored under `alias`, generating it if the store has none.
    pub fn with_alias(
        store: &dyn HardwareKeyStore,
        alias: &str,
        mode: BlockMode,
    ) -> Result<Self, KeyError> {
        let key = match store.load(alias)? {
            Some(existing) => {
                debug!(alias, "loaded key from key store");
                existing
            }
            None => {
                info!(alias, ?mode, "no key under alias, generating");
                store.generate(alias, &KeyGenSpec::for_mode(mode))?
            }
        };
        Ok(Self {
            mode,
            active: ArcSwapOption::from_pointee(key),
        })
    }

    pub fn with_external_key(key: SecretKey, mode: BlockMode) -> Self {
        Self {
            mode,
            active: ArcSwapOption::from_pointee(key),
        }
    }

    pub fn mode(&self) -> BlockMode {
        self.mode
    }

    /// The active key.
    pub fn current_key(&self) -> Result<Arc<SecretKey>, KeyError> {
        self.active.load_full().ok_or(KeyError::Unconfigured)
    }

    /// Alias of the active key when it is held by a key store.
    pub fn alias(&self) -> Option<String> {
        match self.active.load().as_deref().map(SecretKey::origin) {
            Some(KeyOrigin::Hardware { alias }) => Some(alias.clone()),
            _ => None,
        }
    }

    /// Replace the active key, dropping any alias-backed key reference.
    pub fn set_external_key(&self, key: SecretKey) {
        let previous = self.active.swap(Some(Arc::new(key)));
        debug!(
            replaced_alias = ?previous
                .as_deref()
                .and_then(|key| match key.origin() {
                    KeyOrigin::Hardware { alias } => Some(alias.as_str()),
                    KeyOrigin::External => None,
                }),
            "active key replaced"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{
        cipher::{AeadCipher, CipherError},
        key_provider::{generate_external_key, InMemoryKeyStore},
    };

    #[test]
    fn unconfigured_manager_has_no_key() {
        let manager = KeyManager::unconfigured(BlockMode::Gcm);
        assert!(matches!(
            manager.current_key(),
            Err(KeyError::Unconfigured)
        ));
    }

    #[test]
    fn alias_key_is_generated_once_and_reloaded() {
        let store = InMemoryKeyStore::new();
        let cipher = AeadCipher::new(BlockMode::Gcm);

        let first = KeyManager::with_alias(&store, "prefs", BlockMode::Gcm).expect("first");
        let blob = cipher
            .encrypt(b"payload", &first.current_key().expect("key"))
            .expect("encrypt");

        let second = KeyManager::with_alias(&store, "prefs", BlockMode::Gcm).expect("second");
        assert_eq!(second.alias().as_deref(), Some("prefs"));
        let plain = cipher
            .decrypt(&blob, &second.current_key().expect("key"))
            .expect("decrypt with reloaded key");
        assert_eq!(plain, b"payload");
    }

    #[test]
    fn switching_keys_only_affects_later_encryptions() {
        let store = InMemoryKeyStore::new();
        let manager = KeyManager::with_alias(&store, "prefs", BlockMode::Gcm).expect("manager");
        let cipher = AeadCipher::new(manager.mode());

        let before_key = manager.current_key().expect("key");
        let before = cipher.encrypt(b"old", &before_key).expect("encrypt");

        manager.set_external_key(generate_external_key());
        assert_eq!(manager.alias(), None);

        let after_key = manager.current_key().expect("key");
        let after = cipher.encrypt(b"new", &after_key).expect("encrypt");

        assert!(matches!(
            cipher.decrypt(&before, &after_key),
            Err(CipherError::Decryption(_))
        ));
        assert_eq!(cipher.decrypt(&before, &before_key).expect("old key"), b"old");
        assert_eq!(cipher.decrypt(&after, &after_key).expect("new key"), b"new");
    }

    #[test]
    fn concurrent_swaps_always_yield_a_whole_key() {
        let manager = Arc::new(KeyManager::with_external_key(
            generate_external_key(),
            BlockMode::Gcm,
        ));
        let cipher = AeadCipher::new(BlockMode::Gcm);

        let swapper = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for _ in 0..100 {
                    manager.set_external_key(generate_external_key());
                }
            })
        };

        for _ in 0..100 {
            let key = manager.current_key().expect("key");
            let blob = cipher.encrypt(b"x", &key).expect("encrypt");
            assert_eq!(cipher.decrypt(&blob, &key).expect("same key decrypts"), b"x");
        }
        swapper.join().expect("swapper thread");
    }
}
