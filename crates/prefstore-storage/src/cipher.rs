//! AES encryption of byte buffers and Base64 text.
//!
//! Blob layout: `[IV][ciphertext]`. In [`BlockMode::Gcm`] the IV is 12 bytes
//! and the 16-byte tag trails the ciphertext. [`BlockMode::LegacyCbc`] uses a
//! 16-byte IV with PKCS#7 padding and carries no integrity protection.

use aes_gcm::{
    aead::{consts::U12, Aead, AeadCore, KeyInit, Nonce, OsRng as AeadRng},
    aes::{Aes128, Aes192, Aes256},
    Aes128Gcm, Aes256Gcm, AesGcm,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine as _,
};
use cbc::cipher::{
    block_padding::Pkcs7, BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use prefstore_core::{codec, PreferenceValue, Primitive};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::key_provider::SecretKey;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// IV length for the authenticated mode.
pub const GCM_IV_LEN: usize = 12;
/// Authentication tag length for the authenticated mode.
pub const GCM_TAG_LEN: usize = 16;
/// IV length for the legacy mode.
pub const LEGACY_IV_LEN: usize = 16;

/// Block mode, fixed per key manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockMode {
    #[default]
    Gcm,
    LegacyCbc,
}

impl BlockMode {
    pub fn iv_len(self) -> usize {
        match self {
            BlockMode::Gcm => GCM_IV_LEN,
            BlockMode::LegacyCbc => LEGACY_IV_LEN,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("encrypt failed: {0}")]
    Encryption(String),
    #[error("decrypt failed: {0}")]
    Decryption(String),
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Stateless cipher over a fixed block mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct AeadCipher {
    mode: BlockMode,
}

impl AeadCipher {
    pub fn new(mode: BlockMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> BlockMode {
        self.mode
    }

    /// Encrypt `plaintext` under a fresh random IV.
    pub fn encrypt(&self, plaintext: &[u8], key: &SecretKey) -> Result<Vec<u8>, CipherError> {
        let key = key.bytes();
        match (self.mode, key.len()) {
            (BlockMode::Gcm, 16) => gcm_seal::<Aes128Gcm>(key, plaintext),
            (BlockMode::Gcm, 24) => gcm_seal::<Aes192Gcm>(key, plaintext),
            (BlockMode::Gcm, 32) => gcm_seal::<Aes256Gcm>(key, plaintext),
            (BlockMode::LegacyCbc, 16) => cbc_seal::<Aes128>(key, plaintext),
            (BlockMode::LegacyCbc, 24) => cbc_seal::<Aes192>(key, plaintext),
            (BlockMode::LegacyCbc, 32) => cbc_seal::<Aes256>(key, plaintext),
            (_, len) => Err(CipherError::InvalidKey(format!("unsupported key length {len}"))),
        }
    }

    /// Decrypt a blob produced by [`AeadCipher::encrypt`].
    pub fn decrypt(&self, blob: &[u8], key: &SecretKey) -> Result<Vec<u8>, CipherError> {
        let iv_len = self.mode.iv_len();
        if blob.len() < iv_len {
            return Err(CipherError::Decryption(format!(
                "blob of {} bytes is shorter than the {iv_len}-byte IV",
                blob.len()
            )));
        }
        let key = key.bytes();
        match (self.mode, key.len()) {
            (BlockMode::Gcm, 16) => gcm_open::<Aes128Gcm>(key, blob),
            (BlockMode::Gcm, 24) => gcm_open::<Aes192Gcm>(key, blob),
            (BlockMode::Gcm, 32) => gcm_open::<Aes256Gcm>(key, blob),
            (BlockMode::LegacyCbc, 16) => cbc_open::<Aes128>(key, blob),
            (BlockMode::LegacyCbc, 24) => cbc_open::<Aes192>(key, blob),
            (BlockMode::LegacyCbc, 32) => cbc_open::<Aes256>(key, blob),
            (_, len) => Err(CipherError::InvalidKey(format!("unsupported key length {len}"))),
        }
    }

    /// Stringify a primitive, encrypt it and Base64-encode the blob.
    pub fn encrypt_value(&self, value: &Primitive, key: &SecretKey) -> Result<String, CipherError> {
        let blob = self.encrypt(value.to_text().as_bytes(), key)?;
        Ok(STANDARD.encode(blob))
    }

    /// Base64-decode and decrypt `text` back into a UTF-8 string.
    pub fn decrypt_text(&self, text: &str, key: &SecretKey) -> Result<String, CipherError> {
        let blob = STANDARD
            .decode(text)
            .or_else(|_| URL_SAFE.decode(text))
            .map_err(|e| CipherError::Encoding(e.to_string()))?;
        let plaintext = self.decrypt(&blob, key)?;
        String::from_utf8(plaintext).map_err(|e| CipherError::Encoding(e.to_string()))
    }

    /// Inverse of [`AeadCipher::encrypt_value`], parsed as `default`'s type.
    ///
    /// Never fails: any decoding, decryption or parse error yields `default`.
    pub fn decrypt_value<T: PreferenceValue>(&self, text: &str, default: T, key: &SecretKey) -> T {
        let decoded = self
            .decrypt_text(text, key)
            .map_err(|err| err.to_string())
            .and_then(|plain| {
                codec::from_text(T::KIND, plain)
                    .and_then(T::from_stored)
                    .map_err(|err| err.to_string())
            });
        match decoded {
            Ok(value) => value,
            Err(reason) => {
                warn!(%reason, kind = T::KIND.name(), "encrypted value unreadable, using default");
                default
            }
        }
    }
}

fn gcm_seal<C>(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError>
where
    C: KeyInit + Aead,
{
    let cipher = C::new_from_slice(key).map_err(|e| CipherError::InvalidKey(e.to_string()))?;
    let nonce = C::generate_nonce(&mut AeadRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CipherError::Encryption(e.to_string()))?;

    let mut blob = Vec::with_capacity(nonce.len() + ciphertext.len());
    blob.extend_from_slice(nonce.as_slice());
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

fn gcm_open<C>(key: &[u8], blob: &[u8]) -> Result<Vec<u8>, CipherError>
where
    C: KeyInit + Aead + AeadCore<NonceSize = U12>,
{
    let (iv, ciphertext) = blob.split_at(GCM_IV_LEN);
    let cipher = C::new_from_slice(key).map_err(|e| CipherError::InvalidKey(e.to_string()))?;
    cipher
        .decrypt(Nonce::<C>::from_slice(iv), ciphertext)
        .map_err(|_| CipherError::Decryption("authentication tag mismatch".to_string()))
}

fn cbc_seal<C>(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError>
where
    C: BlockEncryptMut + BlockCipher,
    cbc::Encryptor<C>: KeyIvInit + BlockEncryptMut,
{
    let mut iv = [0u8; LEGACY_IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let encryptor = cbc::Encryptor::<C>::new_from_slices(key, &iv)
        .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
    let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut blob = Vec::with_capacity(LEGACY_IV_LEN + ciphertext.len());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

fn cbc_open<C>(key: &[u8], blob: &[u8]) -> Result<Vec<u8>, CipherError>
where
    C: BlockDecryptMut + BlockCipher,
    cbc::Decryptor<C>: KeyIvInit + BlockDecryptMut,
{
    let (iv, ciphertext) = blob.split_at(LEGACY_IV_LEN);
    if ciphertext.is_empty() || ciphertext.len() % LEGACY_IV_LEN != 0 {
        return Err(CipherError::Decryption(format!(
            "ciphertext of {} bytes is not whole blocks",
            ciphertext.len()
        )));
    }
    cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| CipherError::InvalidKey(e.to_string()))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CipherError::Decryption("padding check failed".to_string()))
}
