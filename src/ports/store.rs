use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{Address, AddressId, Fund, NewAddress, Transaction, TransactionId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Allocation conflict: {coin} index {index} already exists")]
    AllocationConflict { coin: String, index: u32 },

    #[error("Address not found: {0}")]
    AddressNotFound(AddressId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),
}

/// Persistent store behind the address and transaction ledgers.
///
/// Every method is a single indivisible read or write. `insert_address`
/// rejects a second row for the same (coin, index) with
/// `AllocationConflict`, and `insert_transaction` bumps the referenced
/// address's usage in the same unit as the insert.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_address(&self, id: AddressId) -> Result<Address, StoreError>;

    async fn list_addresses(&self) -> Result<Vec<Address>, StoreError>;

    /// Newest open address for the pair, if any
    async fn find_open_address(&self, coin: &str, account: &str) -> Result<Option<Address>, StoreError>;

    /// Highest derivation index used for `coin`
    async fn max_index(&self, coin: &str) -> Result<Option<u32>, StoreError>;

    async fn insert_address(&self, address: NewAddress) -> Result<Address, StoreError>;

    async fn update_balance(&self, id: AddressId, balance: Decimal) -> Result<(), StoreError>;

    async fn record_check_time(&self, id: AddressId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Open -> closed, stamping `valid_to`
    async fn close_address(&self, id: AddressId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Any status -> locked, stamping `valid_to` if unset
    async fn lock_address(&self, id: AddressId, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn update_schedule(
        &self,
        id: AddressId,
        wait_secs: u64,
        next_check: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Non-locked addresses whose next check is at or before `now`
    async fn pending_address_ids(&self, now: DateTime<Utc>) -> Result<Vec<AddressId>, StoreError>;

    async fn increment_address_usage(&self, id: AddressId, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError>;

    async fn get_transaction(&self, id: &TransactionId) -> Result<Transaction, StoreError>;

    /// Pending transactions whose window has closed at `now`
    async fn expired_transaction_ids(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(TransactionId, AddressId)>, StoreError>;

    async fn mark_transaction_expired(&self, id: &TransactionId) -> Result<(), StoreError>;

    /// Append fund records not seen before; returns how many were new
    async fn insert_funds(&self, funds: &[Fund]) -> Result<usize, StoreError>;

    async fn funds(&self, address_id: AddressId) -> Result<Vec<Fund>, StoreError>;
}
