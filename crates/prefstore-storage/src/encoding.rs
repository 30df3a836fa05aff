use std::sync::Arc;

use prefstore_core::{codec, PreferenceValue, Primitive, Slot, StoreError, StoredValue};
use tracing::warn;

use crate::{
    cipher::{AeadCipher, CipherError},
    key_manager::KeyManager,
    key_provider::KeyError,
};

/// Turns typed values into backend slots and back, encrypting on request.
///
/// Shared by both store flavours so encrypted values written through one are
/// readable through the other.
#[derive(Clone)]
pub struct ValueSealer {
    keys: Arc<KeyManager>,
    cipher: AeadCipher,
}

impl ValueSealer {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        let cipher = AeadCipher::new(keys.mode());
        Self { keys, cipher }
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Encode `value` for storage. Encrypted values always occupy the text slot.
    pub fn encode<T: PreferenceValue>(
        &self,
        value: &T,
        encrypted: bool,
    ) -> Result<Slot, StoreError> {
        let stored = value.to_stored()?;
        if !encrypted {
            return Ok(codec::to_slot(stored));
        }

        let key = self.keys.current_key()?;
        let plaintext = match stored {
            StoredValue::Primitive(primitive) => primitive,
            StoredValue::SerializedComplex(json) => Primitive::Text(json),
        };
        let sealed = self.cipher.encrypt_value(&plaintext, &key)?;
        Ok(Slot::Text(sealed))
    }

    /// Decode a slot read under `key`, degrading to `default` when it is
    /// absent, of another type, or unreadable. A missing key for an encrypted
    /// read is still an error.
    pub fn decode<T: PreferenceValue>(
        &self,
        key: &str,
        slot: Option<Slot>,
        default: T,
        encrypted: bool,
    ) -> Result<T, StoreError> {
        let Some(slot) = slot else {
            return Ok(default);
        };

        if encrypted {
            let secret = self.keys.current_key()?;
            return match slot {
                Slot::Text(text) => Ok(self.cipher.decrypt_value(&text, default, &secret)),
                other => {
                    warn!(
                        key,
                        found = other.type_name(),
                        "encrypted value is not text, using default"
                    );
                    Ok(default)
                }
            };
        }

        match codec::from_slot(T::KIND, slot).and_then(T::from_stored) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(key, error = %err, "stored value unreadable, using default");
                Ok(default)
            }
        }
    }
}

impl From<KeyError> for StoreError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Unconfigured | KeyError::NotExportable { .. } => {
                StoreError::configuration(err.to_string())
            }
            other => StoreError::storage(format!("key store: {other}")),
        }
    }
}

impl From<CipherError> for StoreError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Decryption(reason) => StoreError::Decryption { reason },
            CipherError::InvalidKey(reason) => StoreError::configuration(reason),
            other => StoreError::storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cipher::BlockMode, key_provider::generate_external_key};

    fn sealer() -> ValueSealer {
        ValueSealer::new(Arc::new(KeyManager::with_external_key(
            generate_external_key(),
            BlockMode::Gcm,
        )))
    }

    #[test]
    fn encrypted_slots_hide_plaintext() {
        let sealer = sealer();
        let slot = sealer.encode(&"visible?".to_string(), true).expect("encode");
        match &slot {
            Slot::Text(text) => assert!(!text.contains("visible")),
            other => panic!("unexpected slot {other:?}"),
        }
        let back = sealer
            .decode("k", Some(slot), String::new(), true)
            .expect("decode");
        assert_eq!(back, "visible?");
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let sealer = ValueSealer::new(Arc::new(KeyManager::unconfigured(BlockMode::Gcm)));
        let err = sealer.encode(&1_i32, true).expect_err("no key");
        assert!(matches!(err, StoreError::Configuration { .. }));

        let err = sealer
            .decode("k", Some(Slot::Text("abc".into())), 0_i32, true)
            .expect_err("no key");
        assert!(matches!(err, StoreError::Configuration { .. }));
    }

    #[test]
    fn plain_type_mismatch_returns_default() {
        let sealer = sealer();
        let value = sealer
            .decode("k", Some(Slot::Bool(true)), 9_i64, false)
            .expect("decode");
        assert_eq!(value, 9);
    }

    #[test]
    fn cipher_decryption_maps_to_decryption_error() {
        let err: StoreError = CipherError::Decryption("tag".into()).into();
        assert_eq!(
            err,
            StoreError::Decryption {
                reason: "tag".into()
            }
        );
    }
}
