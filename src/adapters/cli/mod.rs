//! CLI Adapter
//!
//! Command-line interface for the payment relay.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{
    AddressesCmd, CliApp, Command, LockCmd, OpenCmd, OutputFormat, RecheckCmd, RunCmd, DEFAULT_CONFIG_PATH,
};
