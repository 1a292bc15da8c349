//! Transaction Ledger
//!
//! Payment sessions: each request gets a receiving address and a random
//! 64-hex-char id valid for a fixed TTL. Sessions are never deleted; the
//! periodic sweep moves them from pending to expired.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::address_ledger::{AddressLedger, LedgerError};
use crate::domain::{Address, AddressId, AddressStatus, Transaction, TransactionId};
use crate::ports::LedgerStore;

/// Default session lifetime (15 minutes)
pub const DEFAULT_TRANSACTION_TTL_SECS: i64 = 900;

/// A freshly opened payment session and the address to pay into
#[derive(Debug, Clone)]
pub struct PaymentSession {
    pub transaction: Transaction,
    pub address: Address,
}

pub struct TransactionLedger {
    store: Arc<dyn LedgerStore>,
    addresses: Arc<AddressLedger>,
    ttl: Duration,
}

impl TransactionLedger {
    pub fn new(store: Arc<dyn LedgerStore>, addresses: Arc<AddressLedger>, ttl: Duration) -> Self {
        Self {
            store,
            addresses,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Open a session for `account` paying in `coin`
    pub async fn open(&self, coin: &str, account: &str) -> Result<PaymentSession, LedgerError> {
        let address = self.addresses.allocate_address(coin, account).await?;
        if address.status == AddressStatus::Locked {
            return Err(LedgerError::AddressLocked(address.id));
        }

        let transaction = Transaction::new(address.id, Utc::now(), self.ttl);
        // Usage counters move in the same store call
        self.store.insert_transaction(&transaction).await?;

        tracing::info!(
            "Opened transaction {} on address {} ({} {}), valid until {}",
            transaction.id,
            address.id,
            address.coin,
            address.address,
            transaction.valid_to
        );

        let address = self.store.get_address(address.id).await?;
        Ok(PaymentSession {
            transaction,
            address,
        })
    }

    /// Pending sessions whose window closed at or before `now`
    pub async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(TransactionId, AddressId)>, LedgerError> {
        Ok(self.store.expired_transaction_ids(now).await?)
    }

    pub async fn expire(&self, id: &TransactionId) -> Result<(), LedgerError> {
        self.store.mark_transaction_expired(id).await?;
        tracing::debug!("Transaction {} expired", id);
        Ok(())
    }

    pub async fn transaction(&self, id: &TransactionId) -> Result<Transaction, LedgerError> {
        Ok(self.store.get_transaction(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::derivation::PoolDeriver;
    use crate::adapters::rates::FixedRates;
    use crate::adapters::store::FileStore;
    use crate::domain::{Backoff, TransactionStatus, TRANSACTION_ID_LEN};
    use std::collections::HashMap;

    fn ledgers() -> (TransactionLedger, Arc<AddressLedger>) {
        let store = Arc::new(FileStore::in_memory());
        let mut pools = HashMap::new();
        pools.insert("btc".to_string(), vec!["bc1qa".to_string(), "bc1qb".to_string()]);
        let addresses = Arc::new(AddressLedger::new(
            store.clone(),
            Arc::new(PoolDeriver::new(pools)),
            Arc::new(FixedRates::default()),
            Backoff::default(),
        ));
        let ledger = TransactionLedger::new(
            store,
            addresses.clone(),
            Duration::seconds(DEFAULT_TRANSACTION_TTL_SECS),
        );
        (ledger, addresses)
    }

    #[tokio::test]
    async fn test_open_bumps_usage_and_sets_window() {
        let (ledger, _) = ledgers();

        let session = ledger.open("btc", "shop1").await.unwrap();

        let tx = &session.transaction;
        assert_eq!(tx.id.as_str().len(), TRANSACTION_ID_LEN);
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.valid_to - tx.valid_from, Duration::seconds(900));
        assert_eq!(session.address.reference_count, 1);
        assert_eq!(session.address.last_transaction, Some(tx.valid_from));
    }

    #[tokio::test]
    async fn test_two_sessions_share_open_address() {
        let (ledger, _) = ledgers();

        let t1 = ledger.open("btc", "shop1").await.unwrap();
        let t2 = ledger.open("btc", "shop1").await.unwrap();

        assert_eq!(t1.address.id, t2.address.id);
        assert_ne!(t1.transaction.id, t2.transaction.id);
        assert_eq!(t2.address.reference_count, 2);
    }

    #[tokio::test]
    async fn test_ttl_window_is_exact() {
        let (ledger, _) = ledgers();
        let session = ledger.open("btc", "shop1").await.unwrap();
        let t0 = session.transaction.valid_from;

        let before = ledger.sweep_expired(t0 + Duration::seconds(899)).await.unwrap();
        assert!(before.is_empty());

        let at = ledger.sweep_expired(t0 + Duration::seconds(900)).await.unwrap();
        assert_eq!(at, vec![(session.transaction.id.clone(), session.address.id)]);
    }

    #[tokio::test]
    async fn test_expire_removes_from_sweep() {
        let (ledger, _) = ledgers();
        let session = ledger.open("btc", "shop1").await.unwrap();
        let later = session.transaction.valid_to + Duration::seconds(1);

        ledger.expire(&session.transaction.id).await.unwrap();

        assert!(ledger.sweep_expired(later).await.unwrap().is_empty());
        let tx = ledger.transaction(&session.transaction.id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Expired);
    }

    #[tokio::test]
    async fn test_open_after_close_moves_to_new_address() {
        let (ledger, addresses) = ledgers();
        let first = ledger.open("btc", "shop1").await.unwrap();

        addresses.close(first.address.id).await.unwrap();

        let second = ledger.open("btc", "shop1").await.unwrap();
        assert_ne!(first.address.id, second.address.id);
        assert_eq!(second.address.address, "bc1qb");
    }
}
