//! Payment Sessions
//!
//! A transaction ties one checkout attempt to a receiving address for a
//! fixed validity window. The window is set at creation and never extended.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::address::AddressId;

/// Length of a transaction id in hex characters (32 random bytes)
pub const TRANSACTION_ID_LEN: usize = 64;

/// Hex-encoded 256-bit random session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Generate a fresh id from 32 random bytes
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::random();
        Self(hex::encode(bytes))
    }

    /// Parse an id supplied by a caller
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        if value.len() != TRANSACTION_ID_LEN {
            return None;
        }
        hex::decode(&value).ok().map(|_| Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Expired,
}

/// A payment session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub address_id: AddressId,
    pub status: TransactionStatus,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

impl Transaction {
    /// Open a pending session valid for `ttl` starting at `now`
    pub fn new(address_id: AddressId, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: TransactionId::generate(),
            address_id,
            status: TransactionStatus::Pending,
            valid_from: now,
            valid_to: now + ttl,
        }
    }

    /// Pending sessions whose window has closed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TransactionStatus::Pending && self.valid_to <= now
    }

    /// Seconds left in the window, zero once it has passed
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.valid_to - now).num_seconds().max(0)
    }
}
