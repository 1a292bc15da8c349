//! CLI Command Definitions
//!
//! Argument structures for every payrelay subcommand.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::domain::AddressId;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/payrelay.toml";

/// PayRelay - crypto payment relay
#[derive(Parser, Debug)]
#[command(
    name = "payrelay",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = "Crypto payment relay with rate-limited balance polling",
    long_about = "PayRelay hands out receiving addresses for payment sessions and keeps \
                  their balances in sync with public chain-data providers, staying inside \
                  each provider's published rate limits."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the heartbeat driver and balance scheduler
    Run(RunCmd),

    /// Open a payment session and print the address to pay into
    Open(OpenCmd),

    /// List tracked addresses
    Addresses(AddressesCmd),

    /// Mark an address as swept; it is never polled again
    Lock(LockCmd),

    /// Make an address due for a check at the next heartbeat
    Recheck(RecheckCmd),
}

impl Command {
    /// Configuration file the command was pointed at
    pub fn config_path(&self) -> &Path {
        match self {
            Command::Run(cmd) => &cmd.config,
            Command::Open(cmd) => &cmd.config,
            Command::Addresses(cmd) => &cmd.config,
            Command::Lock(cmd) => &cmd.config,
            Command::Recheck(cmd) => &cmd.config,
        }
    }
}

/// Output format for listing commands
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Start the relay
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override the heartbeat interval in seconds
    #[arg(long, value_name = "SECS")]
    pub heartbeat: Option<u64>,
}

/// Open a payment session
#[derive(Parser, Debug)]
pub struct OpenCmd {
    /// Coin symbol (e.g., btc)
    #[arg(value_name = "COIN")]
    pub coin: String,

    /// Merchant account the payment belongs to
    #[arg(value_name = "ACCOUNT")]
    pub account: String,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// List addresses
#[derive(Parser, Debug)]
pub struct AddressesCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Only show addresses for this coin
    #[arg(long, value_name = "COIN")]
    pub coin: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Lock a swept address
#[derive(Parser, Debug)]
pub struct LockCmd {
    /// Address id as shown by `addresses`
    #[arg(value_name = "ID")]
    pub id: AddressId,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}

/// Force a recheck
#[derive(Parser, Debug)]
pub struct RecheckCmd {
    /// Address id as shown by `addresses`
    #[arg(value_name = "ID")]
    pub id: AddressId,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_open() {
        let app = CliApp::try_parse_from(["payrelay", "open", "btc", "shop1", "-f", "json"]).unwrap();
        match app.command {
            Command::Open(cmd) => {
                assert_eq!(cmd.coin, "btc");
                assert_eq!(cmd.account, "shop1");
                assert_eq!(cmd.format, OutputFormat::Json);
                assert_eq!(cmd.config, PathBuf::from(DEFAULT_CONFIG_PATH));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let app = CliApp::try_parse_from(["payrelay", "lock", "7", "--debug", "-c", "relay.toml"]).unwrap();
        assert!(app.debug);
        assert_eq!(app.command.config_path(), Path::new("relay.toml"));
        assert!(matches!(app.command, Command::Lock(LockCmd { id: 7, .. })));
    }

    #[test]
    fn test_recheck_requires_numeric_id() {
        assert!(CliApp::try_parse_from(["payrelay", "recheck", "abc"]).is_err());
    }
}
