use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::info;
use zeroize::Zeroizing;

use crate::cipher::BlockMode;

/// Where the active key came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOrigin {
    /// Held by a [`HardwareKeyStore`] under an alias; never exported.
    Hardware { alias: String },
    /// Supplied directly by the caller.
    External,
}

/// AES key material (128, 192 or 256 bits).
///
/// Raw bytes are only reachable inside this crate; hardware-held keys cannot
/// be exported through [`encode_key`].
#[derive(Clone)]
pub struct SecretKey {
    bytes: Zeroizing<Vec<u8>>,
    origin: KeyOrigin,
}

impl SecretKey {
    /// Wrap key bytes handed out by a hardware-backed store.
    pub fn sealed(alias: impl Into<String>, bytes: Vec<u8>) -> Result<Self, KeyError> {
        Self::build(
            bytes,
            KeyOrigin::Hardware {
                alias: alias.into(),
            },
        )
    }

    fn external(bytes: Vec<u8>) -> Result<Self, KeyError> {
        Self::build(bytes, KeyOrigin::External)
    }

    fn build(bytes: Vec<u8>, origin: KeyOrigin) -> Result<Self, KeyError> {
        let bytes = Zeroizing::new(bytes);
        if !matches!(bytes.len(), 16 | 24 | 32) {
            return Err(KeyError::Decode(format!(
                "expected 16, 24 or 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self { bytes, origin })
    }

    pub fn origin(&self) -> &KeyOrigin {
        &self.origin
    }

    pub fn bits(&self) -> usize {
        self.bytes.len() * 8
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("bits", &self.bits())
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
    #[error("no key available: configure an alias or set an external key")]
    Unconfigured,
    #[error("key `{alias}` is held by the key store and cannot be exported")]
    NotExportable { alias: String },
}

/// Padding applied outside the block mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    None,
    Pkcs7,
}

/// Parameters used when a key store has to mint a key for an alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenSpec {
    pub algorithm: &'static str,
    pub key_bits: usize,
    pub block_mode: BlockMode,
    pub padding: Padding,
}

impl KeyGenSpec {
    pub fn for_mode(block_mode: BlockMode) -> Self {
        let padding = match block_mode {
            BlockMode::Gcm => Padding::None,
            BlockMode::LegacyCbc => Padding::Pkcs7,
        };
        Self {
            algorithm: "AES",
            key_bits: 256,
            block_mode,
            padding,
        }
    }
}

impl Default for KeyGenSpec {
    fn default() -> Self {
        Self::for_mode(BlockMode::Gcm)
    }
}

/// Platform key store holding symmetric keys under aliases (OS keychain in
/// production; memory in tests).
pub trait HardwareKeyStore: Send + Sync {
    /// Load the key stored under `alias`, if one exists.
    fn load(&self, alias: &str) -> Result<Option<SecretKey>, KeyError>;

    /// Generate and persist a fresh key under `alias`.
    fn generate(&self, alias: &str, spec: &KeyGenSpec) -> Result<SecretKey, KeyError>;
}

/// OS keyring-backed key store. The alias is used as the keyring account.
pub struct KeyringKeyStore {
    service: String,
}

impl KeyringKeyStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, alias: &str) -> Result<keyring::Entry, KeyError> {
        keyring::Entry::new(&self.service, alias).map_err(|e| KeyError::Keyring(e.to_string()))
    }
}

impl HardwareKeyStore for KeyringKeyStore {
    fn load(&self, alias: &str) -> Result<Option<SecretKey>, KeyError> {
        match self.entry(alias)?.get_password() {
            Ok(secret) => {
                let bytes = decode_bytes(&secret)?;
                SecretKey::sealed(alias, bytes).map(Some)
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }

    fn generate(&self, alias: &str, spec: &KeyGenSpec) -> Result<SecretKey, KeyError> {
        let bytes = random_bytes(spec)?;
        self.entry(alias)?
            .set_password(&general_purpose::STANDARD.encode(&bytes))
            .map_err(|e| KeyError::Keyring(e.to_string()))?;
        info!(service = %self.service, alias, bits = spec.key_bits, "generated key in keyring");
        SecretKey::sealed(alias, bytes)
    }
}

/// In-memory key store for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyStore {
    inner: Arc<Mutex<HashMap<String, Zeroizing<Vec<u8>>>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HardwareKeyStore for InMemoryKeyStore {
    fn load(&self, alias: &str) -> Result<Option<SecretKey>, KeyError> {
        let guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;
        guard
            .get(alias)
            .map(|bytes| SecretKey::sealed(alias, bytes.to_vec()))
            .transpose()
    }

    fn generate(&self, alias: &str, spec: &KeyGenSpec) -> Result<SecretKey, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;
        let bytes = random_bytes(spec)?;
        guard.insert(alias.to_string(), Zeroizing::new(bytes.clone()));
        SecretKey::sealed(alias, bytes)
    }
}

/// Generate a fresh 256-bit external key. Touches no stored state.
pub fn generate_external_key() -> SecretKey {
    let mut bytes = vec![0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    SecretKey {
        bytes: Zeroizing::new(bytes),
        origin: KeyOrigin::External,
    }
}

/// Base64-encode raw key bytes for out-of-band transport.
pub fn encode_key(key: &SecretKey) -> Result<String, KeyError> {
    match &key.origin {
        KeyOrigin::External => Ok(general_purpose::STANDARD.encode(key.bytes())),
        KeyOrigin::Hardware { alias } => Err(KeyError::NotExportable {
            alias: alias.clone(),
        }),
    }
}

/// Decode a key produced by [`encode_key`]; only 16, 24 or 32 raw bytes are accepted.
pub fn decode_key(secret: &str) -> Result<SecretKey, KeyError> {
    SecretKey::external(decode_bytes(secret)?)
}

fn decode_bytes(secret: &str) -> Result<Vec<u8>, KeyError> {
    general_purpose::STANDARD
        .decode(secret.trim())
        .map_err(|e| KeyError::Decode(e.to_string()))
}

fn random_bytes(spec: &KeyGenSpec) -> Result<Vec<u8>, KeyError> {
    if spec.algorithm != "AES" || !matches!(spec.key_bits, 128 | 192 | 256) {
        return Err(KeyError::Generation(format!(
            "unsupported key spec {}/{}",
            spec.algorithm, spec.key_bits
        )));
    }
    let mut bytes = vec![0u8; spec.key_bits / 8];
    OsRng.fill_bytes(&mut bytes);
    Ok(bytes)
}
