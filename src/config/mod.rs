//! Configuration Module
//!
//! Loads and validates configuration from TOML files.

pub mod loader;

pub use loader::{
    api_key_var, load_config, CoinSection, Config, ConfigError, ProviderSection, ThrottlePolicy,
};
