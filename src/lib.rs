//! PayRelay - Crypto Payment Relay Library
//!
//! Hands out receiving addresses for payment sessions and keeps their
//! balances in sync with public chain-data providers without exceeding
//! each provider's published rate limits.
//!
//! # Modules
//!
//! - `domain`: Core records (Address, Transaction, Fund, Backoff)
//! - `ports`: Trait abstractions (BalanceProvider, LedgerStore, AddressDeriver, RateSource)
//! - `adapters`: External implementations (throttles, HTTP providers, file store, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: Registry, ledgers, scheduler and heartbeat driver

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod config;
pub mod application;
