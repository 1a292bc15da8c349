//! Receiving Address
//!
//! A tracked receiving address and its polling lifecycle:
//! `Open` (usable, polled) -> `Closed` (funded past the limit, still polled)
//! -> `Locked` (funds swept, never polled again).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned address identifier
pub type AddressId = u64;

/// Lifecycle status of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressStatus {
    /// Handed out to payers and polled
    Open,
    /// Accumulated value crossed the configured limit; still polled
    Closed,
    /// Operator confirmed the funds were swept; excluded from scheduling
    Locked,
}

impl AddressStatus {
    /// Open and closed addresses are both candidates for balance polling
    pub fn is_pollable(&self) -> bool {
        !matches!(self, AddressStatus::Locked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressStatus::Open => "open",
            AddressStatus::Closed => "closed",
            AddressStatus::Locked => "locked",
        }
    }
}

impl fmt::Display for AddressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A receiving address row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    /// Lowercase coin symbol ("btc", "eth", ...)
    pub coin: String,
    /// Owning merchant account
    pub account: String,
    /// Derivation index, unique per coin
    pub index: u32,
    /// Encoded address string as returned by the deriver
    pub address: String,
    pub status: AddressStatus,
    /// Cumulative amount received, in coin units
    pub balance: Decimal,
    pub last_check: Option<DateTime<Utc>>,
    pub next_check: DateTime<Utc>,
    /// Current poll interval in seconds
    pub wait_secs: u64,
    /// Number of payment sessions issued against this address
    pub reference_count: u32,
    pub last_transaction: Option<DateTime<Utc>>,
    pub valid_from: DateTime<Utc>,
    /// Set when the address is closed or locked
    pub valid_to: Option<DateTime<Utc>>,
}

impl Address {
    /// Whether the address should be checked at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_pollable() && self.next_check <= now
    }

    /// Whether `balance` converted at `rate` reaches the fiat `limit`
    pub fn reaches_limit(balance: Decimal, rate: Decimal, limit: Decimal) -> bool {
        // Overflow only happens for values far past any realistic limit
        balance.checked_mul(rate).map_or(true, |value| value >= limit)
    }
}

/// Values needed to insert a freshly derived address
#[derive(Debug, Clone)]
pub struct NewAddress {
    pub coin: String,
    pub account: String,
    pub index: u32,
    pub address: String,
    pub wait_secs: u64,
    pub created_at: DateTime<Utc>,
}

impl NewAddress {
    /// Build the stored row; the first check is due immediately
    pub fn into_address(self, id: AddressId) -> Address {
        Address {
            id,
            coin: self.coin,
            account: self.account,
            index: self.index,
            address: self.address,
            status: AddressStatus::Open,
            balance: Decimal::ZERO,
            last_check: None,
            next_check: self.created_at,
            wait_secs: self.wait_secs,
            reference_count: 0,
            last_transaction: None,
            valid_from: self.created_at,
            valid_to: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn sample(now: DateTime<Utc>) -> Address {
        NewAddress {
            coin: "btc".to_string(),
            account: "shop1".to_string(),
            index: 0,
            address: "bc1qtest".to_string(),
            wait_secs: 300,
            created_at: now,
        }
        .into_address(1)
    }

    #[test]
    fn test_new_address_defaults() {
        let now = Utc::now();
        let addr = sample(now);
        assert_eq!(addr.status, AddressStatus::Open);
        assert_eq!(addr.balance, Decimal::ZERO);
        assert_eq!(addr.next_check, now);
        assert_eq!(addr.valid_from, now);
        assert!(addr.valid_to.is_none());
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut addr = sample(now);
        assert!(addr.is_due(now));

        addr.next_check = now + Duration::seconds(10);
        assert!(!addr.is_due(now));
        assert!(addr.is_due(now + Duration::seconds(10)));

        addr.status = AddressStatus::Locked;
        assert!(!addr.is_due(now + Duration::days(1)));
    }

    #[test]
    fn test_reaches_limit_boundary() {
        assert!(Address::reaches_limit(dec!(0.05), dec!(20000), dec!(1000)));
        assert!(!Address::reaches_limit(dec!(0.0499), dec!(20000), dec!(1000)));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&AddressStatus::Closed).unwrap();
        assert_eq!(json, "\"closed\"");
        assert_eq!(AddressStatus::Locked.to_string(), "locked");
        assert!(AddressStatus::Closed.is_pollable());
        assert!(!AddressStatus::Locked.is_pollable());
    }
}
