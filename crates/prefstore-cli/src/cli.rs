use clap::{Parser, Subcommand, ValueEnum};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "prefstore",
    about = "Typed, optionally encrypted preference storage",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Round-trip a probe value through both stores, plain and encrypted.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage external keys.
    #[command(subcommand)]
    Key(KeyCommand),
    /// Read a value.
    Get {
        key: String,
        #[arg(long, value_enum, default_value_t = ValueType::Text)]
        kind: ValueType,
        /// Value returned when the key is absent or unreadable.
        #[arg(long)]
        default: Option<String>,
        #[arg(long)]
        encrypted: bool,
        #[arg(long, value_enum, default_value_t = BackendKind::Immediate)]
        backend: BackendKind,
    },
    /// Write a value.
    Put {
        key: String,
        value: String,
        #[arg(long, value_enum, default_value_t = ValueType::Text)]
        kind: ValueType,
        #[arg(long)]
        encrypted: bool,
        #[arg(long, value_enum, default_value_t = BackendKind::Immediate)]
        backend: BackendKind,
    },
    /// Remove a value.
    Delete {
        key: String,
        #[arg(long, value_enum, default_value_t = BackendKind::Immediate)]
        backend: BackendKind,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum KeyCommand {
    /// Print a fresh Base64-encoded 256-bit external key.
    Generate,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Long,
    Double,
    Text,
    Json,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Transactional store, durable on return.
    Immediate,
    /// Snapshot store written in the background.
    Eventual,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_health_subcommand() {
        let cli = Cli::try_parse_from(["prefstore", "health"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Health);
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli =
            Cli::try_parse_from(["prefstore", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Config(ConfigCommand::Init));
    }

    #[test]
    fn put_defaults_to_plain_text_on_immediate_store() {
        let cli = Cli::try_parse_from(["prefstore", "put", "greeting", "hello"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Put {
                key: "greeting".into(),
                value: "hello".into(),
                kind: ValueType::Text,
                encrypted: false,
                backend: BackendKind::Immediate,
            }
        );
    }

    #[test]
    fn parses_typed_encrypted_get() {
        let cli = Cli::try_parse_from([
            "prefstore",
            "get",
            "count",
            "--kind",
            "int",
            "--default",
            "0",
            "--encrypted",
            "--backend",
            "eventual",
        ])
        .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Get {
                key: "count".into(),
                kind: ValueType::Int,
                default: Some("0".into()),
                encrypted: true,
                backend: BackendKind::Eventual,
            }
        );
    }

    #[test]
    fn missing_subcommand_is_an_error() {
        assert!(Cli::try_parse_from(["prefstore"]).is_err());
    }
}
