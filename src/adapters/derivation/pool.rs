//! Pre-derived Address Pool
//!
//! Receiving addresses are derived offline by the wallet holding the keys
//! and exported as `{ "<coin>": ["addr0", "addr1", ...] }`. Index `n` maps
//! to entry `n` of the coin's list, so the relay never sees key material.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::ports::{AddressDeriver, DerivationError};

#[derive(Debug, Clone, Default)]
pub struct PoolDeriver {
    pools: HashMap<String, Vec<String>>,
}

impl PoolDeriver {
    pub fn new(pools: HashMap<String, Vec<String>>) -> Self {
        let pools = pools
            .into_iter()
            .map(|(coin, addrs)| (coin.to_ascii_lowercase(), addrs))
            .collect();
        Self { pools }
    }

    /// Load the pool file written by the offline wallet
    pub fn from_file(path: &Path) -> Result<Self, DerivationError> {
        let load_error = |reason: String| DerivationError {
            coin: "*".to_string(),
            index: 0,
            reason,
        };

        let content = fs::read_to_string(path)
            .map_err(|e| load_error(format!("read {}: {}", path.display(), e)))?;
        let pools: HashMap<String, Vec<String>> = serde_json::from_str(&content)
            .map_err(|e| load_error(format!("parse {}: {}", path.display(), e)))?;

        let deriver = Self::new(pools);
        for (coin, addrs) in &deriver.pools {
            tracing::info!("Address pool for {}: {} entries", coin, addrs.len());
        }
        Ok(deriver)
    }

    /// Entries left for `coin` after `used` have been handed out
    pub fn remaining(&self, coin: &str, used: usize) -> usize {
        self.pools
            .get(&coin.to_ascii_lowercase())
            .map(|p| p.len().saturating_sub(used))
            .unwrap_or(0)
    }
}

impl AddressDeriver for PoolDeriver {
    fn derive_address(&self, coin: &str, index: u32) -> Result<String, DerivationError> {
        let fail = |reason: &str| DerivationError {
            coin: coin.to_string(),
            index,
            reason: reason.to_string(),
        };

        let pool = self
            .pools
            .get(&coin.to_ascii_lowercase())
            .ok_or_else(|| fail("no address pool for coin"))?;

        let address = pool
            .get(index as usize)
            .ok_or_else(|| fail("address pool exhausted"))?;

        if address.trim().is_empty() {
            return Err(fail("empty pool entry"));
        }
        Ok(address.clone())
    }
}
