//! Chain-Data Provider Adapters
//!
//! Implementations of `BalanceProvider`:
//! - `EsploraProvider`: Bitcoin via Esplora explorers (satoshi, txid paging)
//! - `EtherscanProvider`: Ethereum via Etherscan (wei, page/offset paging)
//! - `BlockcypherProvider`: several coins through one API and one throttle
//!
//! Every request passes through the adapter's `Throttle` and is bounded by
//! the HTTP client timeout.

mod blockcypher;
mod esplora;
mod etherscan;
mod http;
pub mod units;

pub use blockcypher::{default_units, BlockcypherProvider, CoinUnit, BLOCKCYPHER_API};
pub use esplora::{EsploraProvider, BLOCKSTREAM_API};
pub use etherscan::{EtherscanProvider, ETHERSCAN_API};
pub use http::{ProviderSettings, DEFAULT_REQUEST_TIMEOUT};

use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;

use super::throttle::Throttle;
use crate::ports::{BalanceProvider, ProviderError};

/// Which adapter implementation backs a configured provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Esplora,
    Etherscan,
    Blockcypher,
}

impl ProviderKind {
    /// Public endpoint used when the config gives no `base_url`
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Esplora => BLOCKSTREAM_API,
            ProviderKind::Etherscan => ETHERSCAN_API,
            ProviderKind::Blockcypher => BLOCKCYPHER_API,
        }
    }

    /// Construct the adapter bound to `throttle`
    pub fn build(
        &self,
        settings: ProviderSettings,
        throttle: Throttle,
    ) -> Result<Arc<dyn BalanceProvider>, ProviderError> {
        let provider: Arc<dyn BalanceProvider> = match self {
            ProviderKind::Esplora => Arc::new(EsploraProvider::new(settings, throttle)?),
            ProviderKind::Etherscan => Arc::new(EtherscanProvider::new(settings, throttle)?),
            ProviderKind::Blockcypher => Arc::new(BlockcypherProvider::new(settings, throttle)?),
        };
        Ok(provider)
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "esplora" | "blockstream" => Ok(ProviderKind::Esplora),
            "etherscan" => Ok(ProviderKind::Etherscan),
            "blockcypher" => Ok(ProviderKind::Blockcypher),
            other => Err(format!("unknown provider kind: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("esplora".parse::<ProviderKind>(), Ok(ProviderKind::Esplora));
        assert_eq!("Blockstream".parse::<ProviderKind>(), Ok(ProviderKind::Esplora));
        assert_eq!("etherscan".parse::<ProviderKind>(), Ok(ProviderKind::Etherscan));
        assert!("chainso".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_build_each_kind() {
        for kind in [ProviderKind::Esplora, ProviderKind::Etherscan, ProviderKind::Blockcypher] {
            let settings = ProviderSettings::new(kind.default_base_url());
            assert!(kind.build(settings, Throttle::unbounded()).is_ok());
        }
    }
}
