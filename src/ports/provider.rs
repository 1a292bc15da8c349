use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{AddressId, Fund};

/// Errors reported by chain-data providers
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network failure, timeout or non-success HTTP status
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Payload could not be parsed or is semantically malformed
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// The adapter has no unit table entry or endpoint for this coin
    #[error("Coin not supported by provider: {0}")]
    UnsupportedCoin(String),

    /// Paging stopped at the adapter's page cap with more history left
    #[error("Transaction history longer than {0} pages")]
    HistoryTooLong(usize),
}

impl ProviderError {
    /// Status-code failures are availability problems, not payload problems
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        ProviderError::Unavailable(format!("HTTP {}: {}", status, snippet))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::InvalidResponse(err.to_string())
    }
}

/// Normalized view over one external chain-data source.
///
/// Implementations pass every outbound request through their own throttle,
/// so a call may block until the provider's rate policy admits it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    /// Cumulative amount ever received by `address`, in coin units
    async fn fetch_balance(&self, coin: &str, address: &str) -> Result<Decimal, ProviderError>;

    /// Funding events for `address`, oldest first
    async fn fetch_funds(
        &self,
        coin: &str,
        address_id: AddressId,
        address: &str,
    ) -> Result<Vec<Fund>, ProviderError>;
}
