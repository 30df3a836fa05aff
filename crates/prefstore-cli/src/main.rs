mod cli;
mod config;
mod storage;

use std::{str::FromStr, sync::Arc, time::Duration};

use crate::cli::{BackendKind, ConfigCommand, KeyCommand, ValueType};
use clap::Parser;
use color_eyre::{eyre::bail, Result};
use prefstore_core::{Json, SnapshotKv, StorageBackend, TransactionalKv};
use prefstore_storage::{encode_key, generate_external_key, AsynchronousStore, SynchronousStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long a command waits for queued eventual-store writes before exiting.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_KEY: &str = "health/probe";

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        cli::Command::Version => print_version(),
        cli::Command::Health => run_health_check(&config).await?,
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        cli::Command::Key(KeyCommand::Generate) => {
            println!("{}", encode_key(&generate_external_key())?)
        }
        cli::Command::Get {
            key,
            kind,
            default,
            encrypted,
            backend,
        } => {
            let value = run_get(&config, backend, &key, kind, default.as_deref(), encrypted)?;
            println!("{value}");
        }
        cli::Command::Put {
            key,
            value,
            kind,
            encrypted,
            backend,
        } => run_put(&config, backend, &key, kind, &value, encrypted)?,
        cli::Command::Delete { key, backend } => run_delete(&config, backend, &key)?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("prefstore {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

fn run_get(
    config: &config::Config,
    backend: BackendKind,
    key: &str,
    kind: ValueType,
    default: Option<&str>,
    encrypted: bool,
) -> Result<String> {
    let keys = storage::key_manager(config)?;
    match backend {
        BackendKind::Immediate => {
            let store = storage::immediate_store(config, keys)?;
            read_value(&store, key, kind, default, encrypted)
        }
        BackendKind::Eventual => {
            let store = storage::eventual_store(config, keys)?;
            read_value(&store, key, kind, default, encrypted)
        }
    }
}

fn run_put(
    config: &config::Config,
    backend: BackendKind,
    key: &str,
    kind: ValueType,
    raw: &str,
    encrypted: bool,
) -> Result<()> {
    let keys = storage::key_manager(config)?;
    match backend {
        BackendKind::Immediate => {
            let store = storage::immediate_store(config, keys)?;
            write_value(&store, key, kind, raw, encrypted)
        }
        BackendKind::Eventual => {
            let store = storage::eventual_store(config, keys)?;
            write_value(&store, key, kind, raw, encrypted)?;
            flush(&store)
        }
    }
}

fn run_delete(config: &config::Config, backend: BackendKind, key: &str) -> Result<()> {
    let keys = storage::key_manager(config)?;
    match backend {
        BackendKind::Immediate => Ok(storage::immediate_store(config, keys)?.delete(key)?),
        BackendKind::Eventual => {
            let store = storage::eventual_store(config, keys)?;
            store.delete_direct(key)?;
            flush(&store)
        }
    }
}

/// Wait for queued writes so they are not lost when the process exits.
fn flush<S: SnapshotKv>(store: &AsynchronousStore<S>) -> Result<()> {
    if !store.wait_for_writes(WRITE_TIMEOUT)? {
        bail!(
            "{} write(s) still pending after {:?}",
            store.pending_writes(),
            WRITE_TIMEOUT
        );
    }
    Ok(())
}

fn read_value<B: StorageBackend>(
    store: &B,
    key: &str,
    kind: ValueType,
    default: Option<&str>,
    encrypted: bool,
) -> Result<String> {
    let rendered = match kind {
        ValueType::Bool => store.get(key, parse_or(default, false)?, encrypted)?.to_string(),
        ValueType::Int => store.get(key, parse_or(default, 0_i32)?, encrypted)?.to_string(),
        ValueType::Float => store.get(key, parse_or(default, 0_f32)?, encrypted)?.to_string(),
        ValueType::Long => store.get(key, parse_or(default, 0_i64)?, encrypted)?.to_string(),
        ValueType::Double => store.get(key, parse_or(default, 0_f64)?, encrypted)?.to_string(),
        ValueType::Text => store.get(key, default.unwrap_or_default().to_string(), encrypted)?,
        ValueType::Json => {
            let fallback = match default {
                Some(raw) => serde_json::from_str(raw)?,
                None => serde_json::Value::Null,
            };
            store.get(key, Json(fallback), encrypted)?.0.to_string()
        }
    };
    Ok(rendered)
}

fn write_value<B: StorageBackend>(
    store: &B,
    key: &str,
    kind: ValueType,
    raw: &str,
    encrypted: bool,
) -> Result<()> {
    match kind {
        ValueType::Bool => store.put(key, &raw.parse::<bool>()?, encrypted)?,
        ValueType::Int => store.put(key, &raw.parse::<i32>()?, encrypted)?,
        ValueType::Float => store.put(key, &raw.parse::<f32>()?, encrypted)?,
        ValueType::Long => store.put(key, &raw.parse::<i64>()?, encrypted)?,
        ValueType::Double => store.put(key, &raw.parse::<f64>()?, encrypted)?,
        ValueType::Text => store.put(key, &raw.to_string(), encrypted)?,
        ValueType::Json => {
            let value: serde_json::Value = serde_json::from_str(raw)?;
            store.put(key, &Json(value), encrypted)?
        }
    }
    Ok(())
}

fn parse_or<T>(raw: Option<&str>, fallback: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => Ok(raw.parse()?),
        None => Ok(fallback),
    }
}

/// Round-trips a probe value through both stores, plain and encrypted.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let keys = storage::key_manager(config)?;
    let immediate = storage::immediate_store(config, Arc::clone(&keys))?;
    probe_immediate(&immediate)?;
    println!("Immediate store: ok");

    let eventual = storage::eventual_store(config, keys)?;
    probe_eventual(&eventual).await?;
    println!("Eventual store: ok");
    Ok(())
}

fn probe_immediate<K: TransactionalKv>(store: &SynchronousStore<K>) -> Result<()> {
    for encrypted in [false, true] {
        let payload = format!("ok/{encrypted}");
        store.put(PROBE_KEY, &payload, encrypted)?;
        let round_trip = store.get(PROBE_KEY, String::new(), encrypted)?;
        store.delete(PROBE_KEY)?;
        if round_trip != payload {
            bail!("immediate store round-trip failed (encrypted: {encrypted})");
        }
    }
    Ok(())
}

async fn probe_eventual<S: SnapshotKv>(store: &AsynchronousStore<S>) -> Result<()> {
    for encrypted in [false, true] {
        let payload = format!("ok/{encrypted}");
        store.put(PROBE_KEY, &payload, encrypted).await?;
        let round_trip = store.get(PROBE_KEY, String::new(), encrypted).await?;
        store.delete(PROBE_KEY).await?;
        if round_trip != payload {
            bail!("eventual store round-trip failed (encrypted: {encrypted})");
        }
    }
    Ok(())
}
