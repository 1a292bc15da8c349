//! BlockCypher Provider
//!
//! Generic multi-coin adapter: the coin symbol selects the chain path in the
//! URL and a per-coin unit table scales base units into coin units. One
//! instance serves every coin listed in its table, sharing one throttle.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Number;

use super::http::{get_json, ProviderSettings};
use super::units::{number_to_units, SATOSHI_DECIMALS, WEI_DECIMALS};
use crate::adapters::throttle::Throttle;
use crate::domain::{AddressId, Fund};
use crate::ports::{BalanceProvider, ProviderError};

pub const BLOCKCYPHER_API: &str = "https://api.blockcypher.com/v1";

/// Transaction references requested per history page
const PAGE_LIMIT: usize = 50;

const MAX_PAGES: usize = 20;

/// Chain path segment and decimals for one coin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinUnit {
    pub chain_path: String,
    pub decimals: u32,
}

impl CoinUnit {
    pub fn new(chain_path: impl Into<String>, decimals: u32) -> Self {
        Self {
            chain_path: chain_path.into(),
            decimals,
        }
    }
}

/// Default unit table for the chains BlockCypher serves
pub fn default_units() -> HashMap<String, CoinUnit> {
    [
        ("btc", CoinUnit::new("btc/main", SATOSHI_DECIMALS)),
        ("ltc", CoinUnit::new("ltc/main", SATOSHI_DECIMALS)),
        ("doge", CoinUnit::new("doge/main", SATOSHI_DECIMALS)),
        ("dash", CoinUnit::new("dash/main", SATOSHI_DECIMALS)),
        ("eth", CoinUnit::new("eth/main", WEI_DECIMALS)),
    ]
    .into_iter()
    .map(|(coin, unit)| (coin.to_string(), unit))
    .collect()
}

#[derive(Debug)]
pub struct BlockcypherProvider {
    settings: ProviderSettings,
    http: Client,
    throttle: Throttle,
    units: HashMap<String, CoinUnit>,
}

impl BlockcypherProvider {
    pub fn new(settings: ProviderSettings, throttle: Throttle) -> Result<Self, ProviderError> {
        Self::with_units(settings, throttle, default_units())
    }

    pub fn with_units(
        settings: ProviderSettings,
        throttle: Throttle,
        units: HashMap<String, CoinUnit>,
    ) -> Result<Self, ProviderError> {
        let http = settings.build_client()?;
        Ok(Self {
            settings,
            http,
            throttle,
            units,
        })
    }

    pub fn supports(&self, coin: &str) -> bool {
        self.units.contains_key(&coin.to_ascii_lowercase())
    }

    fn unit(&self, coin: &str) -> Result<&CoinUnit, ProviderError> {
        self.units
            .get(&coin.to_ascii_lowercase())
            .ok_or_else(|| ProviderError::UnsupportedCoin(coin.to_string()))
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let mut req = self.http.get(url).query(params);
        if let Some(ref token) = self.settings.api_key {
            req = req.query(&[("token", token)]);
        }

        self.throttle.admit().await;
        get_json(req).await
    }
}

#[async_trait]
impl BalanceProvider for BlockcypherProvider {
    async fn fetch_balance(&self, coin: &str, address: &str) -> Result<Decimal, ProviderError> {
        let unit = self.unit(coin)?;
        let url = format!("{}/{}/addrs/{}/balance", self.settings.base_url, unit.chain_path, address);

        let balance: AddressBalance = self.get(&url, &[]).await?;
        number_to_units(&balance.total_received, unit.decimals)
    }

    async fn fetch_funds(
        &self,
        coin: &str,
        address_id: AddressId,
        address: &str,
    ) -> Result<Vec<Fund>, ProviderError> {
        let unit = self.unit(coin)?;
        let url = format!("{}/{}/addrs/{}", self.settings.base_url, unit.chain_path, address);
        let mut funds = Vec::new();
        let mut before: Option<u64> = None;

        for _ in 0..MAX_PAGES {
            let mut params = vec![("limit", PAGE_LIMIT.to_string())];
            if let Some(height) = before {
                params.push(("before", height.to_string()));
            }

            let page: AddressRefs = self.get(&url, &params).await?;

            for txref in page.txrefs.iter().filter(|r| r.is_output()) {
                funds.push(Fund::new(
                    txref.confirmed.unwrap_or_else(Utc::now),
                    address_id,
                    number_to_units(&txref.value, unit.decimals)?,
                    txref.tx_hash.clone(),
                ));
            }

            let lowest = page.txrefs.iter().filter_map(|r| r.block_height).min();
            match (page.has_more, lowest) {
                (true, Some(height)) => before = Some(height),
                _ => {
                    funds.sort_by(|a, b| a.observed.cmp(&b.observed));
                    funds.dedup_by(|a, b| a.txid == b.txid);
                    return Ok(funds);
                }
            }
        }

        tracing::warn!("BlockCypher {} history for {} runs past {} pages", coin, address, MAX_PAGES);
        Err(ProviderError::HistoryTooLong(MAX_PAGES))
    }
}

#[derive(Debug, Deserialize)]
struct AddressBalance {
    total_received: Number,
}

#[derive(Debug, Deserialize)]
struct AddressRefs {
    #[serde(default)]
    txrefs: Vec<TxRef>,
    #[serde(rename = "hasMore", default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct TxRef {
    tx_hash: String,
    block_height: Option<u64>,
    /// -1 marks an output paying the address
    tx_input_n: i64,
    value: Number,
    confirmed: Option<DateTime<Utc>>,
}

impl TxRef {
    fn is_output(&self) -> bool {
        self.tx_input_n < 0
    }
}
