use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::address::AddressId;

/// One funding event observed in a provider's history for an address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fund {
    pub observed: DateTime<Utc>,
    pub address_id: AddressId,
    pub amount: Decimal,
    /// Provider transaction hash, unique per address
    pub txid: String,
}

impl Fund {
    pub fn new(observed: DateTime<Utc>, address_id: AddressId, amount: Decimal, txid: impl Into<String>) -> Self {
        Self {
            observed,
            address_id,
            amount,
            txid: txid.into(),
        }
    }
}
