//! Configuration Loader
//!
//! Loads and validates the relay configuration from a TOML file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::adapters::providers::ProviderKind;
use crate::adapters::throttle::{RateLimits, TIER_COUNT};
use crate::domain::backoff::{
    Backoff, DEFAULT_GROWTH_FACTOR, DEFAULT_JITTER, DEFAULT_MAX_WAIT_SECS, DEFAULT_MIN_WAIT_SECS,
};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreSection,
    pub derivation: DerivationSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub transactions: TransactionsSection,
    #[serde(default)]
    pub logging: LoggingSection,
    pub providers: BTreeMap<String, ProviderSection>,
    pub coins: BTreeMap<String, CoinSection>,
    #[serde(default)]
    pub rates: HashMap<String, Decimal>,
}

/// Ledger snapshot location
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl StoreSection {
    /// Snapshot path with `~` expanded
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

fn default_store_path() -> String {
    "data/ledger.json".to_string()
}

/// Pre-derived address pool exported by the offline wallet
#[derive(Debug, Clone, Deserialize)]
pub struct DerivationSection {
    pub pool_file: String,
}

impl DerivationSection {
    pub fn resolved_pool_file(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.pool_file).to_string())
    }
}

/// Polling schedule
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSection {
    #[serde(default = "default_min_wait")]
    pub min_wait_secs: u64,
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,
    /// Standard deviation of the growth factor
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Driver tick interval
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
    /// Fetch per-transaction funding records when a balance grows
    #[serde(default = "default_true")]
    pub record_funds: bool,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            min_wait_secs: default_min_wait(),
            max_wait_secs: default_max_wait(),
            growth_factor: default_growth_factor(),
            jitter: default_jitter(),
            heartbeat_secs: default_heartbeat(),
            record_funds: default_true(),
        }
    }
}

impl ScheduleSection {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            min_wait_secs: self.min_wait_secs,
            max_wait_secs: self.max_wait_secs,
            growth_factor: self.growth_factor,
            jitter: self.jitter,
        }
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

fn default_min_wait() -> u64 {
    DEFAULT_MIN_WAIT_SECS
}
fn default_max_wait() -> u64 {
    DEFAULT_MAX_WAIT_SECS
}
fn default_growth_factor() -> f64 {
    DEFAULT_GROWTH_FACTOR
}
fn default_jitter() -> f64 {
    DEFAULT_JITTER
}
fn default_heartbeat() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

/// Payment session settings
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionsSection {
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
}

impl Default for TransactionsSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
        }
    }
}

fn default_ttl() -> u64 {
    900
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One chain-data provider and its rate policy
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    pub kind: ProviderKind,
    /// Overrides the kind's public endpoint
    #[serde(default)]
    pub base_url: Option<String>,
    /// Ceilings per [second, minute, hour, day, week]; 0 disables a tier
    #[serde(default)]
    pub rate_limits: Option<Vec<u32>>,
    /// Minimum seconds between requests, instead of `rate_limits`
    #[serde(default)]
    pub cool_time: Option<u64>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    60
}

impl ProviderSection {
    /// API key from config, falling back to `<NAME>_API_KEY` in the environment
    pub fn resolved_api_key(&self, name: &str) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(api_key_var(name)).ok())
            .filter(|k| !k.is_empty())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.kind.default_base_url())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Environment variable consulted for a provider's API key
pub fn api_key_var(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"))
}

/// Throttle policy requested by a provider section
#[derive(Debug, Clone, PartialEq)]
pub enum ThrottlePolicy {
    Tiered(RateLimits),
    Cooldown(Duration),
    Unbounded,
}

impl ProviderSection {
    pub fn throttle_policy(&self) -> Result<ThrottlePolicy, ConfigError> {
        match (&self.rate_limits, self.cool_time) {
            (Some(_), Some(_)) => Err(ConfigError::ValidationError(
                "rate_limits and cool_time are mutually exclusive".to_string(),
            )),
            (Some(limits), None) => RateLimits::from_slice(limits)
                .map(ThrottlePolicy::Tiered)
                .ok_or_else(|| {
                    ConfigError::ValidationError(format!(
                        "rate_limits takes at most {} tiers, got {}",
                        TIER_COUNT,
                        limits.len()
                    ))
                }),
            (None, Some(secs)) => Ok(ThrottlePolicy::Cooldown(Duration::from_secs(secs))),
            (None, None) => Ok(ThrottlePolicy::Unbounded),
        }
    }
}

/// One coin the relay accepts
#[derive(Debug, Clone, Deserialize)]
pub struct CoinSection {
    /// Name of the `[providers.<name>]` entry serving this coin
    pub provider: String,
    /// Fiat value at which an address stops being reused
    pub limit: Decimal,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        let schedule = &self.schedule;

        if schedule.min_wait_secs == 0 {
            return Err(ConfigError::ValidationError(
                "min_wait_secs must be > 0".to_string(),
            ));
        }

        if schedule.max_wait_secs < schedule.min_wait_secs {
            return Err(ConfigError::ValidationError(format!(
                "max_wait_secs ({}) must be >= min_wait_secs ({})",
                schedule.max_wait_secs, schedule.min_wait_secs
            )));
        }

        if !schedule.growth_factor.is_finite() || schedule.growth_factor < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "growth_factor must be >= 1.0, got {}",
                schedule.growth_factor
            )));
        }

        if !schedule.jitter.is_finite() || schedule.jitter < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "jitter must be >= 0, got {}",
                schedule.jitter
            )));
        }

        if schedule.heartbeat_secs == 0 {
            return Err(ConfigError::ValidationError(
                "heartbeat_secs must be > 0".to_string(),
            ));
        }

        const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of {:?}, got {}",
                LOG_LEVELS, self.logging.level
            )));
        }

        if self.transactions.ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "ttl_secs must be > 0".to_string(),
            ));
        }

        if self.derivation.pool_file.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "derivation.pool_file must be set".to_string(),
            ));
        }

        for (name, provider) in &self.providers {
            provider.throttle_policy().map_err(|e| match e {
                ConfigError::ValidationError(msg) => {
                    ConfigError::ValidationError(format!("provider {}: {}", name, msg))
                }
                other => other,
            })?;

            if provider.timeout_secs == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "provider {}: timeout_secs must be > 0",
                    name
                )));
            }
        }

        if self.coins.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one [coins.<symbol>] entry is required".to_string(),
            ));
        }

        for (coin, section) in &self.coins {
            if !self.providers.contains_key(&section.provider) {
                return Err(ConfigError::ValidationError(format!(
                    "coin {} references unknown provider {}",
                    coin, section.provider
                )));
            }

            if section.limit <= Decimal::ZERO {
                return Err(ConfigError::ValidationError(format!(
                    "coin {}: limit must be > 0, got {}",
                    coin, section.limit
                )));
            }
        }

        for (coin, rate) in &self.rates {
            if *rate <= Decimal::ZERO {
                return Err(ConfigError::ValidationError(format!(
                    "rate for {} must be > 0, got {}",
                    coin, rate
                )));
            }
        }

        Ok(())
    }

    /// Close-on-limit thresholds keyed by lowercase coin symbol
    pub fn coin_limits(&self) -> HashMap<String, Decimal> {
        self.coins
            .iter()
            .map(|(coin, section)| (coin.to_ascii_lowercase(), section.limit))
            .collect()
    }

    pub fn transaction_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.transactions.ttl_secs as i64)
    }
}
