//! Esplora Provider
//!
//! Dedicated Bitcoin adapter for Esplora-compatible explorers
//! (blockstream.info, mempool.space). Amounts arrive in satoshi.
//! Confirmed history is paged 25 transactions at a time, newest first,
//! continuing from the last txid seen.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::http::{get_json, ProviderSettings};
use super::units::{from_base_units, SATOSHI_DECIMALS};
use crate::adapters::throttle::Throttle;
use crate::domain::{AddressId, Fund};
use crate::ports::{BalanceProvider, ProviderError};

pub const BLOCKSTREAM_API: &str = "https://blockstream.info/api";

/// Confirmed transactions returned per history page
const PAGE_SIZE: usize = 25;

/// Upper bound on history pages fetched per call
const MAX_PAGES: usize = 40;

#[derive(Debug)]
pub struct EsploraProvider {
    settings: ProviderSettings,
    http: Client,
    throttle: Throttle,
}

impl EsploraProvider {
    pub fn new(settings: ProviderSettings, throttle: Throttle) -> Result<Self, ProviderError> {
        let http = settings.build_client()?;
        Ok(Self {
            settings,
            http,
            throttle,
        })
    }

    fn ensure_coin(coin: &str) -> Result<(), ProviderError> {
        if coin.eq_ignore_ascii_case("btc") {
            Ok(())
        } else {
            Err(ProviderError::UnsupportedCoin(coin.to_string()))
        }
    }

    async fn history_page(&self, address: &str, after: Option<&str>) -> Result<Vec<EsploraTx>, ProviderError> {
        let url = match after {
            Some(txid) => format!("{}/address/{}/txs/chain/{}", self.settings.base_url, address, txid),
            None => format!("{}/address/{}/txs/chain", self.settings.base_url, address),
        };
        self.throttle.admit().await;
        get_json(self.http.get(&url)).await
    }
}

#[async_trait]
impl BalanceProvider for EsploraProvider {
    async fn fetch_balance(&self, coin: &str, address: &str) -> Result<Decimal, ProviderError> {
        Self::ensure_coin(coin)?;
        let url = format!("{}/address/{}", self.settings.base_url, address);

        self.throttle.admit().await;
        let info: AddressInfo = get_json(self.http.get(&url)).await?;

        from_base_units(info.chain_stats.funded_txo_sum as u128, SATOSHI_DECIMALS)
    }

    async fn fetch_funds(
        &self,
        coin: &str,
        address_id: AddressId,
        address: &str,
    ) -> Result<Vec<Fund>, ProviderError> {
        Self::ensure_coin(coin)?;
        let mut funds = Vec::new();
        let mut last_seen: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self.history_page(address, last_seen.as_deref()).await?;
            let page_len = page.len();

            for tx in &page {
                if let Some(fund) = tx.fund_for(address_id, address)? {
                    funds.push(fund);
                }
            }

            if page_len < PAGE_SIZE {
                funds.reverse();
                return Ok(funds);
            }
            last_seen = page.last().map(|tx| tx.txid.clone());
        }

        tracing::warn!("Esplora history for {} runs past {} pages", address, MAX_PAGES);
        Err(ProviderError::HistoryTooLong(MAX_PAGES))
    }
}

#[derive(Debug, Deserialize)]
struct AddressInfo {
    chain_stats: ChainStats,
}

#[derive(Debug, Deserialize)]
struct ChainStats {
    funded_txo_sum: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraTx {
    txid: String,
    vout: Vec<EsploraOutput>,
    status: EsploraStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraOutput {
    scriptpubkey_address: Option<String>,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    block_time: Option<i64>,
}

impl EsploraTx {
    /// Sum of outputs paying `address`, if any
    fn fund_for(&self, address_id: AddressId, address: &str) -> Result<Option<Fund>, ProviderError> {
        let received: u64 = self
            .vout
            .iter()
            .filter(|out| out.scriptpubkey_address.as_deref() == Some(address))
            .map(|out| out.value)
            .sum();

        if received == 0 {
            return Ok(None);
        }

        let observed = self
            .status
            .block_time
            .and_then(|t| Utc.timestamp_opt(t, 0).single())
            .unwrap_or_else(Utc::now);

        Ok(Some(Fund::new(
            observed,
            address_id,
            from_base_units(received as u128, SATOSHI_DECIMALS)?,
            self.txid.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::http::fixture_server;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};

    const ADDR: &str = "bc1qrelaytest";

    fn tx(txid: &str, to: &str, value: u64, time: i64) -> Value {
        json!({
            "txid": txid,
            "vout": [
                { "scriptpubkey_address": to, "value": value },
                { "scriptpubkey_address": "bc1qchange", "value": 1234 }
            ],
            "status": { "confirmed": true, "block_time": time }
        })
    }

    async fn provider(router: Router) -> EsploraProvider {
        let base = fixture_server::serve(router).await;
        EsploraProvider::new(ProviderSettings::new(base), Throttle::unbounded()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_balance_uses_funded_sum() {
        let router = Router::new().route(
            "/address/:addr",
            get(|Path(addr): Path<String>| async move {
                Json(json!({
                    "address": addr,
                    "chain_stats": { "funded_txo_count": 2, "funded_txo_sum": 5_000_000u64,
                                     "spent_txo_count": 1, "spent_txo_sum": 4_000_000u64, "tx_count": 3 },
                    "mempool_stats": { "funded_txo_count": 0, "funded_txo_sum": 0,
                                       "spent_txo_count": 0, "spent_txo_sum": 0, "tx_count": 0 }
                }))
            }),
        );
        let provider = provider(router).await;

        let balance = provider.fetch_balance("btc", ADDR).await.unwrap();
        assert_eq!(balance, dec!(0.05));
    }

    #[tokio::test]
    async fn test_fetch_balance_rejects_other_coins() {
        let provider = provider(Router::new()).await;
        let err = provider.fetch_balance("ltc", ADDR).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedCoin(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let router = Router::new().route(
            "/address/:addr",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let provider = provider(router).await;

        let err = provider.fetch_balance("btc", ADDR).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_invalid_response() {
        let router = Router::new().route(
            "/address/:addr",
            get(|| async { Json(json!({ "unexpected": true })) }),
        );
        let provider = provider(router).await;

        let err = provider.fetch_balance("btc", ADDR).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_fetch_funds_pages_through_history() {
        let router = Router::new()
            .route(
                "/address/:addr/txs/chain",
                get(|| async {
                    let page: Vec<Value> = (0..25)
                        .map(|i| {
                            let to = if i % 5 == 0 { ADDR } else { "bc1qother" };
                            tx(&format!("a{:02}", i), to, 1_000, 1_700_000_000 - i)
                        })
                        .collect();
                    Json(Value::Array(page))
                }),
            )
            .route(
                "/address/:addr/txs/chain/:last",
                get(|Path((_addr, last)): Path<(String, String)>| async move {
                    assert_eq!(last, "a24");
                    Json(json!([tx("b00", ADDR, 2_500_000, 1_600_000_000)]))
                }),
            );
        let provider = provider(router).await;

        let funds = provider.fetch_funds("btc", 9, ADDR).await.unwrap();

        assert_eq!(funds.len(), 6);
        // Oldest first
        assert_eq!(funds[0].txid, "b00");
        assert_eq!(funds[0].amount, dec!(0.025));
        assert_eq!(funds[5].txid, "a00");
        assert!(funds.iter().all(|f| f.address_id == 9));
        assert!(funds.windows(2).all(|w| w[0].observed <= w[1].observed));
    }

    #[tokio::test]
    async fn test_history_past_page_cap_is_an_error() {
        fn full_page(prefix: &str) -> Json<Value> {
            let page: Vec<Value> = (0..PAGE_SIZE as i64)
                .map(|i| tx(&format!("{}-{:02}", prefix, i), ADDR, 1_000, 1_700_000_000 - i))
                .collect();
            Json(Value::Array(page))
        }

        let router = Router::new()
            .route("/address/:addr/txs/chain", get(|| async { full_page("p0") }))
            .route(
                "/address/:addr/txs/chain/:last",
                get(|Path((_addr, last)): Path<(String, String)>| async move { full_page(&format!("{}x", last)) }),
            );
        let provider = provider(router).await;

        let err = provider.fetch_funds("btc", 9, ADDR).await.unwrap_err();
        assert!(matches!(err, ProviderError::HistoryTooLong(MAX_PAGES)));
    }
}
