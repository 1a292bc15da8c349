//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Throttle: per-provider admission control (tiered windows, cooldown)
//! - Providers: Esplora, Etherscan and BlockCypher HTTP clients
//! - Store: JSON-snapshot ledger store
//! - Derivation: pre-derived address pool
//! - Rates: fixed fiat rates
//! - CLI: Command-line interface definitions

pub mod cli;
pub mod derivation;
pub mod providers;
pub mod rates;
pub mod store;
pub mod throttle;

pub use cli::CliApp;
pub use derivation::PoolDeriver;
pub use providers::{BlockcypherProvider, EsploraProvider, EtherscanProvider, ProviderKind, ProviderSettings};
pub use rates::FixedRates;
pub use store::FileStore;
pub use throttle::{Cooldown, RateLimiter, RateLimits, Throttle};
