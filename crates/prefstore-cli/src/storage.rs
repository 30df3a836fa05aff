use std::{path::PathBuf, sync::Arc};

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use prefstore_storage::{
    decode_key, AsynchronousStore, FileKvStore, FileSnapshotStore, KeyManager, KeyringKeyStore,
    SynchronousStore,
};
use tracing::debug;

const IMMEDIATE_FILE: &str = "immediate.json";
const EVENTUAL_FILE: &str = "eventual.json";

/// Resolve the default data directory.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("prefstore"))
}

fn data_root(config: &Config) -> Result<PathBuf> {
    match &config.data_dir {
        Some(root) => Ok(root.clone()),
        None => default_data_dir(),
    }
}

/// Key manager for the configured key source: the external key if one is
/// set, otherwise the keyring alias (generated on first use).
pub fn key_manager(config: &Config) -> Result<Arc<KeyManager>> {
    let keys = &config.keys;
    let manager = match &keys.external_key {
        Some(encoded) => {
            debug!("using external key from config");
            KeyManager::with_external_key(decode_key(encoded)?, keys.mode)
        }
        None => {
            debug!(service = %keys.service, alias = %keys.alias, "using keyring key");
            let store = KeyringKeyStore::new(keys.service.clone());
            KeyManager::with_alias(&store, &keys.alias, keys.mode)?
        }
    };
    Ok(Arc::new(manager))
}

/// Transactional store under the data directory.
pub fn immediate_store(
    config: &Config,
    keys: Arc<KeyManager>,
) -> Result<SynchronousStore<FileKvStore>> {
    let path = data_root(config)?.join(IMMEDIATE_FILE);
    debug!(?path, "opening immediate store");
    Ok(SynchronousStore::new(FileKvStore::open(path)?, keys))
}

/// Snapshot store under the data directory, written by a background worker.
pub fn eventual_store(
    config: &Config,
    keys: Arc<KeyManager>,
) -> Result<AsynchronousStore<FileSnapshotStore>> {
    let path = data_root(config)?.join(EVENTUAL_FILE);
    debug!(?path, "opening eventual store");
    Ok(AsynchronousStore::new(FileSnapshotStore::open(path)?, keys)?)
}

/// Config rooted at a temp dir with a fixed external key.
#[cfg(test)]
pub fn test_config(root: impl Into<PathBuf>) -> Config {
    use prefstore_storage::{encode_key, generate_external_key};

    let mut config = Config {
        data_dir: Some(root.into()),
        ..Config::default()
    };
    config.keys.external_key = encode_key(&generate_external_key()).ok();
    config
}
