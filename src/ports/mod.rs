//! Ports Layer - Trait definitions for external collaborators
//!
//! Following hexagonal architecture, these traits abstract:
//! - Chain-data providers (balances, funding history)
//! - The persistent ledger store
//! - Key derivation (index -> receiving address)
//! - Fiat exchange rates

pub mod provider;
pub mod store;
pub mod derivation;
pub mod rates;

pub use provider::{BalanceProvider, ProviderError};
pub use store::{LedgerStore, StoreError};
pub use derivation::{AddressDeriver, DerivationError};
pub use rates::RateSource;

#[cfg(test)]
pub use provider::MockBalanceProvider;
