use thiserror::Error;

/// Errors surfaced by stores, codecs and bindings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No usable key, or a binding whose preference key cannot be resolved.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
    /// A value outside the expected primitive kind reached a typed slot.
    #[error("unsupported type: expected {expected}, found {found}")]
    UnsupportedType {
        expected: &'static str,
        found: &'static str,
    },
    /// Tag verification failed, the blob was truncated, or the key does not match.
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },
    /// Malformed JSON or text that does not parse into the requested type.
    #[error("serialization failed: {reason}")]
    Serialization { reason: String },
    /// Underlying backend failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

impl StoreError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn storage<E: ToString>(err: E) -> Self {
        Self::Storage {
            reason: err.to_string(),
        }
    }

    pub fn serialization<E: ToString>(err: E) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}
