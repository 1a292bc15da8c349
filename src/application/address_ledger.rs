//! Address Ledger
//!
//! Owns the receiving-address lifecycle: lazy allocation per
//! (coin, account), balance bookkeeping with close-on-limit, the polling
//! schedule, and operator transitions (close, lock, recheck).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::{Address, AddressId, AddressStatus, Backoff, Fund, NewAddress};
use crate::ports::{AddressDeriver, DerivationError, LedgerStore, RateSource, StoreError};

/// Attempts before an allocation conflict is surfaced to the caller
const MAX_ALLOCATION_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Derivation(#[from] DerivationError),

    #[error("Address {0} is locked")]
    AddressLocked(AddressId),

    #[error("No fiat rate for {0}")]
    RateUnavailable(String),
}

pub struct AddressLedger {
    store: Arc<dyn LedgerStore>,
    deriver: Arc<dyn AddressDeriver>,
    rates: Arc<dyn RateSource>,
    backoff: Backoff,
    allocation: Mutex<()>,
}

impl AddressLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        deriver: Arc<dyn AddressDeriver>,
        rates: Arc<dyn RateSource>,
        backoff: Backoff,
    ) -> Self {
        Self {
            store,
            deriver,
            rates,
            backoff,
            allocation: Mutex::new(()),
        }
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Return the open address for the pair, deriving a fresh one if none
    /// exists. Allocation is serialized in-process and the store rejects a
    /// duplicate (coin, index), so a conflict from another writer is retried.
    pub async fn allocate_address(&self, coin: &str, account: &str) -> Result<Address, LedgerError> {
        let coin = coin.to_ascii_lowercase();
        let _guard = self.allocation.lock().await;

        let mut attempt = 0;
        loop {
            attempt += 1;

            if let Some(existing) = self.store.find_open_address(&coin, account).await? {
                tracing::debug!("Reusing open address {} for {}/{}", existing.id, coin, account);
                return Ok(existing);
            }

            let index = match self.store.max_index(&coin).await? {
                Some(max) => max + 1,
                None => 0,
            };
            let encoded = self.deriver.derive_address(&coin, index)?;

            let new = NewAddress {
                coin: coin.clone(),
                account: account.to_string(),
                index,
                address: encoded,
                wait_secs: self.backoff.min_wait_secs,
                created_at: Utc::now(),
            };

            match self.store.insert_address(new).await {
                Ok(address) => {
                    tracing::info!(
                        "Allocated {} address #{} (index {}) for account {}",
                        coin,
                        address.id,
                        index,
                        account
                    );
                    return Ok(address);
                }
                Err(StoreError::AllocationConflict { coin, index }) if attempt < MAX_ALLOCATION_ATTEMPTS => {
                    tracing::warn!("Index {} for {} taken concurrently, retrying", index, coin);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Ids of non-locked addresses due for a check at `now`
    pub async fn pending_addresses(&self, now: DateTime<Utc>) -> Result<Vec<AddressId>, LedgerError> {
        Ok(self.store.pending_address_ids(now).await?)
    }

    /// Apply a freshly fetched cumulative balance.
    ///
    /// The stored balance only moves up; a lower report is ignored. An open
    /// address whose fiat value reaches `limit` is closed. Returns whether
    /// the balance grew.
    pub async fn record_check(
        &self,
        id: AddressId,
        new_balance: Decimal,
        limit: Decimal,
    ) -> Result<bool, LedgerError> {
        let address = self.store.get_address(id).await?;
        if address.status == AddressStatus::Locked {
            return Err(LedgerError::AddressLocked(id));
        }

        let now = Utc::now();
        let grew = new_balance > address.balance;

        if grew {
            self.store.update_balance(id, new_balance).await?;
            tracing::info!(
                "Address {} ({}) balance {} -> {}",
                id,
                address.coin,
                address.balance,
                new_balance
            );
        } else if new_balance < address.balance {
            tracing::warn!(
                "Provider reported {} for address {}, below recorded {}; keeping recorded",
                new_balance,
                id,
                address.balance
            );
        }

        if address.status == AddressStatus::Open {
            let balance = new_balance.max(address.balance);
            match self.rates.rate(&address.coin) {
                Some(rate) if Address::reaches_limit(balance, rate, limit) => {
                    self.store.close_address(id, now).await?;
                    tracing::info!(
                        "Address {} closed: {} {} x {} reached limit {}",
                        id,
                        balance,
                        address.coin,
                        rate,
                        limit
                    );
                }
                Some(_) => {}
                None => tracing::warn!("No fiat rate for {}; address {} stays open", address.coin, id),
            }
        }

        self.store.record_check_time(id, now).await?;
        Ok(grew)
    }

    /// Pick the next wait and advance `next_check` from its previous value.
    /// Returns the new wait in seconds.
    pub async fn reschedule_after_check(
        &self,
        id: AddressId,
        reset_to_minimum: bool,
    ) -> Result<u64, LedgerError> {
        let address = self.store.get_address(id).await?;

        let wait_secs = if reset_to_minimum {
            self.backoff.reset()
        } else {
            self.backoff.grow(address.wait_secs, &mut rand::thread_rng())
        };
        let next_check = address.next_check + Duration::seconds(wait_secs as i64);

        self.store.update_schedule(id, wait_secs, next_check).await?;
        tracing::debug!("Address {} next check at {} (wait {}s)", id, next_check, wait_secs);
        Ok(wait_secs)
    }

    pub async fn close(&self, id: AddressId) -> Result<(), LedgerError> {
        Ok(self.store.close_address(id, Utc::now()).await?)
    }

    /// Operator confirmed the address was swept; it is never polled again
    pub async fn lock(&self, id: AddressId) -> Result<(), LedgerError> {
        self.store.lock_address(id, Utc::now()).await?;
        tracing::info!("Address {} locked", id);
        Ok(())
    }

    /// Make the address due now, keeping its current wait
    pub async fn force_immediate_check(&self, id: AddressId) -> Result<(), LedgerError> {
        let address = self.store.get_address(id).await?;
        if address.status == AddressStatus::Locked {
            return Err(LedgerError::AddressLocked(id));
        }
        self.store
            .update_schedule(id, address.wait_secs, Utc::now())
            .await?;
        Ok(())
    }

    /// Store funding records not seen before; returns how many were new
    pub async fn record_funds(&self, id: AddressId, funds: &[Fund]) -> Result<usize, LedgerError> {
        let funds: Vec<Fund> = funds.iter().filter(|f| f.address_id == id).cloned().collect();
        let added = self.store.insert_funds(&funds).await?;
        if added > 0 {
            tracing::info!("Recorded {} new funding events for address {}", added, id);
        }
        Ok(added)
    }

    pub async fn funds(&self, id: AddressId) -> Result<Vec<Fund>, LedgerError> {
        Ok(self.store.funds(id).await?)
    }

    pub async fn address(&self, id: AddressId) -> Result<Address, LedgerError> {
        Ok(self.store.get_address(id).await?)
    }

    pub async fn addresses(&self) -> Result<Vec<Address>, LedgerError> {
        Ok(self.store.list_addresses().await?)
    }

    /// Fiat value of the recorded balance
    pub fn fiat_value(&self, address: &Address) -> Result<Decimal, LedgerError> {
        let rate = self
            .rates
            .rate(&address.coin)
            .ok_or_else(|| LedgerError::RateUnavailable(address.coin.clone()))?;
        Ok(address.balance.checked_mul(rate).unwrap_or(Decimal::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::derivation::PoolDeriver;
    use crate::adapters::rates::FixedRates;
    use crate::adapters::store::FileStore;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn pool(n: usize) -> PoolDeriver {
        let mut pools = HashMap::new();
        pools.insert("btc".to_string(), (0..n).map(|i| format!("bc1q{}", i)).collect());
        PoolDeriver::new(pools)
    }

    fn ledger_with(store: Arc<FileStore>, backoff: Backoff) -> AddressLedger {
        AddressLedger::new(
            store,
            Arc::new(pool(8)),
            Arc::new(FixedRates::default().with_rate("btc", dec!(20000))),
            backoff,
        )
    }

    fn ledger() -> (AddressLedger, Arc<FileStore>) {
        let store = Arc::new(FileStore::in_memory());
        (ledger_with(store.clone(), Backoff::without_jitter(300, 86_400, 2.0)), store)
    }

    #[tokio::test]
    async fn test_allocation_reuses_open_address() {
        let (ledger, _) = ledger();

        let a1 = ledger.allocate_address("btc", "shop1").await.unwrap();
        let again = ledger.allocate_address("BTC", "shop1").await.unwrap();
        let other = ledger.allocate_address("btc", "shop2").await.unwrap();

        assert_eq!(a1.id, again.id);
        assert_eq!(a1.index, 0);
        assert_eq!(a1.address, "bc1q0");
        assert_eq!(a1.wait_secs, 300);
        assert_eq!(other.index, 1);
    }

    #[tokio::test]
    async fn test_no_reuse_after_close() {
        let (ledger, _) = ledger();

        let a1 = ledger.allocate_address("btc", "shop1").await.unwrap();
        ledger.close(a1.id).await.unwrap();

        let a2 = ledger.allocate_address("btc", "shop1").await.unwrap();
        assert_ne!(a1.id, a2.id);
        assert_eq!(a2.index, a1.index + 1);
    }

    #[tokio::test]
    async fn test_concurrent_allocation_is_unique() {
        let (ledger, store) = ledger();
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.allocate_address("btc", &format!("acct{}", i)).await })
            })
            .collect();

        let mut indexes = Vec::new();
        for h in handles {
            indexes.push(h.await.unwrap().unwrap().index);
        }
        indexes.sort();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(store.list_addresses().await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_derivation_failure_aborts_allocation() {
        let store = Arc::new(FileStore::in_memory());
        let ledger = AddressLedger::new(
            store.clone(),
            Arc::new(pool(1)),
            Arc::new(FixedRates::default()),
            Backoff::default(),
        );

        let a = ledger.allocate_address("btc", "a").await.unwrap();
        ledger.close(a.id).await.unwrap();

        let err = ledger.allocate_address("btc", "a").await.unwrap_err();
        assert!(matches!(err, LedgerError::Derivation(_)));
        assert_eq!(store.list_addresses().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_on_limit() {
        let (ledger, _) = ledger();
        let a = ledger.allocate_address("btc", "shop1").await.unwrap();

        let grew = ledger.record_check(a.id, dec!(0.05), dec!(1000)).await.unwrap();
        assert!(grew);

        let a = ledger.address(a.id).await.unwrap();
        assert_eq!(a.status, AddressStatus::Closed);
        assert!(a.valid_to.is_some());
        assert!(a.last_check.is_some());
        assert_eq!(a.balance, dec!(0.05));
    }

    #[tokio::test]
    async fn test_below_limit_stays_open() {
        let (ledger, _) = ledger();
        let a = ledger.allocate_address("btc", "shop1").await.unwrap();

        ledger.record_check(a.id, dec!(0.01), dec!(1000)).await.unwrap();
        let a = ledger.address(a.id).await.unwrap();
        assert_eq!(a.status, AddressStatus::Open);
        assert_eq!(ledger.fiat_value(&a).unwrap(), dec!(200));
    }

    #[tokio::test]
    async fn test_balance_never_decreases() {
        let (ledger, _) = ledger();
        let a = ledger.allocate_address("btc", "shop1").await.unwrap();

        ledger.record_check(a.id, dec!(0.02), dec!(1000)).await.unwrap();
        let grew = ledger.record_check(a.id, dec!(0.01), dec!(1000)).await.unwrap();
        assert!(!grew);
        assert_eq!(ledger.address(a.id).await.unwrap().balance, dec!(0.02));

        let grew = ledger.record_check(a.id, dec!(0.02), dec!(1000)).await.unwrap();
        assert!(!grew);
    }

    #[tokio::test]
    async fn test_missing_rate_keeps_address_open() {
        let store = Arc::new(FileStore::in_memory());
        let ledger = AddressLedger::new(
            store,
            Arc::new(pool(2)),
            Arc::new(FixedRates::default()),
            Backoff::default(),
        );
        let a = ledger.allocate_address("btc", "a").await.unwrap();

        ledger.record_check(a.id, dec!(100), dec!(1)).await.unwrap();
        let a = ledger.address(a.id).await.unwrap();
        assert_eq!(a.status, AddressStatus::Open);
        assert!(matches!(ledger.fiat_value(&a), Err(LedgerError::RateUnavailable(_))));
    }

    #[tokio::test]
    async fn test_backoff_reaches_max_in_nine_steps() {
        let (ledger, _) = ledger();
        let a = ledger.allocate_address("btc", "shop1").await.unwrap();

        let mut waits = Vec::new();
        for _ in 0..9 {
            waits.push(ledger.reschedule_after_check(a.id, false).await.unwrap());
        }

        assert!(waits.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*waits.last().unwrap(), 86_400);

        let reset = ledger.reschedule_after_check(a.id, true).await.unwrap();
        assert_eq!(reset, 300);
    }

    #[tokio::test]
    async fn test_jittered_backoff_stays_in_bounds() {
        let store = Arc::new(FileStore::in_memory());
        let ledger = ledger_with(store, Backoff::default());
        let a = ledger.allocate_address("btc", "shop1").await.unwrap();

        let mut previous = 300;
        for _ in 0..12 {
            let wait = ledger.reschedule_after_check(a.id, false).await.unwrap();
            assert!(wait >= previous);
            assert!(wait <= 86_400);
            previous = wait;
        }
    }

    #[tokio::test]
    async fn test_next_check_advances_from_previous() {
        let (ledger, _) = ledger();
        let a = ledger.allocate_address("btc", "shop1").await.unwrap();

        ledger.reschedule_after_check(a.id, false).await.unwrap();
        let after = ledger.address(a.id).await.unwrap();
        assert_eq!(after.next_check, a.next_check + Duration::seconds(600));
        assert!(ledger.pending_addresses(a.next_check).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_and_force_check() {
        let (ledger, _) = ledger();
        let a = ledger.allocate_address("btc", "shop1").await.unwrap();

        ledger.reschedule_after_check(a.id, false).await.unwrap();
        ledger.force_immediate_check(a.id).await.unwrap();
        let forced = ledger.address(a.id).await.unwrap();
        assert!(forced.next_check <= Utc::now());
        assert_eq!(forced.wait_secs, 600);

        ledger.lock(a.id).await.unwrap();
        assert!(ledger.pending_addresses(Utc::now()).await.unwrap().is_empty());
        assert!(matches!(
            ledger.force_immediate_check(a.id).await,
            Err(LedgerError::AddressLocked(_))
        ));
        assert!(matches!(
            ledger.record_check(a.id, dec!(1), dec!(1000)).await,
            Err(LedgerError::AddressLocked(_))
        ));
    }

    #[tokio::test]
    async fn test_record_funds_ignores_other_addresses() {
        let (ledger, _) = ledger();
        let now = Utc::now();
        let funds = vec![
            Fund::new(now, 1, dec!(0.1), "t1"),
            Fund::new(now, 2, dec!(0.2), "t2"),
        ];

        assert_eq!(ledger.record_funds(1, &funds).await.unwrap(), 1);
        assert_eq!(ledger.record_funds(1, &funds).await.unwrap(), 0);
        assert_eq!(ledger.funds(1).await.unwrap().len(), 1);
    }
}
