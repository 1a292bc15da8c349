//! Etherscan Provider
//!
//! Dedicated Ethereum adapter for the Etherscan account API. Amounts arrive
//! as decimal strings of wei. Every response is wrapped in a
//! `{status, message, result}` envelope where status "0" signals an error,
//! except for the empty-history case.
//!
//! The cumulative received amount is summed from the successful incoming
//! transfers in `txlist`, since `action=balance` drops after any spend.
//! Value moved in by contract calls (internal transactions) is not counted.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use super::http::{get_json, ProviderSettings};
use super::units::{parse_base_units, WEI_DECIMALS};
use crate::adapters::throttle::Throttle;
use crate::domain::{AddressId, Fund};
use crate::ports::{BalanceProvider, ProviderError};

pub const ETHERSCAN_API: &str = "https://api.etherscan.io/api";

/// Transactions requested per `txlist` page
const PAGE_SIZE: usize = 100;

/// Etherscan refuses windows past 10k records; stop well before
const MAX_PAGES: usize = 50;

#[derive(Debug)]
pub struct EtherscanProvider {
    settings: ProviderSettings,
    http: Client,
    throttle: Throttle,
}

impl EtherscanProvider {
    pub fn new(settings: ProviderSettings, throttle: Throttle) -> Result<Self, ProviderError> {
        let http = settings.build_client()?;
        Ok(Self {
            settings,
            http,
            throttle,
        })
    }

    fn ensure_coin(coin: &str) -> Result<(), ProviderError> {
        if coin.eq_ignore_ascii_case("eth") {
            Ok(())
        } else {
            Err(ProviderError::UnsupportedCoin(coin.to_string()))
        }
    }

    async fn call(&self, params: &[(&str, String)]) -> Result<Envelope, ProviderError> {
        let mut req = self.http.get(&self.settings.base_url).query(params);
        if let Some(ref api_key) = self.settings.api_key {
            req = req.query(&[("apikey", api_key)]);
        }

        self.throttle.admit().await;
        get_json(req).await
    }

    /// Successful incoming transfers to `address`, oldest first
    async fn incoming_transfers(&self, address: &str) -> Result<Vec<EtherscanTx>, ProviderError> {
        let mut incoming = Vec::new();

        for page in 1..=MAX_PAGES {
            let envelope = self
                .call(&[
                    ("module", "account".to_string()),
                    ("action", "txlist".to_string()),
                    ("address", address.to_string()),
                    ("startblock", "0".to_string()),
                    ("endblock", "99999999".to_string()),
                    ("page", page.to_string()),
                    ("offset", PAGE_SIZE.to_string()),
                    ("sort", "asc".to_string()),
                ])
                .await?;

            if envelope.is_empty_history() {
                return Ok(incoming);
            }
            let txs: Vec<EtherscanTx> = serde_json::from_value(envelope.into_result()?)?;
            let page_len = txs.len();

            incoming.extend(txs.into_iter().filter(|tx| tx.is_incoming(address)));

            if page_len < PAGE_SIZE {
                return Ok(incoming);
            }
        }

        tracing::warn!("Etherscan history for {} runs past {} pages", address, MAX_PAGES);
        Err(ProviderError::HistoryTooLong(MAX_PAGES))
    }
}

#[async_trait]
impl BalanceProvider for EtherscanProvider {
    async fn fetch_balance(&self, coin: &str, address: &str) -> Result<Decimal, ProviderError> {
        Self::ensure_coin(coin)?;

        let mut received = Decimal::ZERO;
        for tx in self.incoming_transfers(address).await? {
            let amount = parse_base_units(&tx.value, WEI_DECIMALS)?;
            received = received
                .checked_add(amount)
                .ok_or_else(|| ProviderError::InvalidResponse(format!("received total overflows at {}", tx.hash)))?;
        }
        Ok(received)
    }

    async fn fetch_funds(
        &self,
        coin: &str,
        address_id: AddressId,
        address: &str,
    ) -> Result<Vec<Fund>, ProviderError> {
        Self::ensure_coin(coin)?;

        self.incoming_transfers(address)
            .await?
            .into_iter()
            .map(|tx| tx.into_fund(address_id))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    message: String,
    result: Value,
}

impl Envelope {
    fn is_empty_history(&self) -> bool {
        self.status == "0" && self.message.starts_with("No transactions found")
    }

    fn into_result(self) -> Result<Value, ProviderError> {
        if self.status == "1" {
            return Ok(self.result);
        }
        let detail = self.result.as_str().unwrap_or_default().to_string();
        // Throttling and key problems are the provider refusing service
        if self.message.starts_with("NOTOK") {
            Err(ProviderError::Unavailable(format!("{} {}", self.message, detail)))
        } else {
            Err(ProviderError::InvalidResponse(format!("{} {}", self.message, detail)))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtherscanTx {
    hash: String,
    to: String,
    value: String,
    time_stamp: String,
    is_error: String,
}

impl EtherscanTx {
    fn is_incoming(&self, address: &str) -> bool {
        self.is_error == "0" && self.to.eq_ignore_ascii_case(address) && self.value != "0"
    }

    fn into_fund(self, address_id: AddressId) -> Result<Fund, ProviderError> {
        let ts: i64 = self
            .time_stamp
            .parse()
            .map_err(|_| ProviderError::InvalidResponse(format!("bad timeStamp {:?}", self.time_stamp)))?;
        let observed = Utc
            .timestamp_opt(ts, 0)
            .single()
            .ok_or_else(|| ProviderError::InvalidResponse(format!("timeStamp out of range: {}", ts)))?;

        Ok(Fund::new(
            observed,
            address_id,
            parse_base_units(&self.value, WEI_DECIMALS)?,
            self.hash,
        ))
    }
}
