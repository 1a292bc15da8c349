//! Heartbeat Driver
//!
//! Periodically feeds the scheduler: expired payment sessions first (their
//! address gets an immediate check), then every address whose next check
//! is due. Runs until the shutdown watch flips to true.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::address_ledger::AddressLedger;
use super::scheduler::SchedulerHandle;
use super::transaction_ledger::TransactionLedger;

/// Default driver tick
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(60);

/// What one heartbeat did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub expired: usize,
    pub enqueued: usize,
    /// Store calls that failed and were skipped
    pub failed: usize,
}

pub struct Driver {
    addresses: Arc<AddressLedger>,
    transactions: Arc<TransactionLedger>,
    scheduler: SchedulerHandle,
    heartbeat: Duration,
}

impl Driver {
    pub fn new(
        addresses: Arc<AddressLedger>,
        transactions: Arc<TransactionLedger>,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self {
            addresses,
            transactions,
            scheduler,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Tick every heartbeat until `shutdown` carries true or its sender drops
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Driver started, heartbeat {:?}", self.heartbeat);

        let mut interval = tokio::time::interval(self.heartbeat);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {
                    let summary = self.tick(Utc::now()).await;
                    if summary.enqueued > 0 || summary.failed > 0 {
                        tracing::info!(
                            "Heartbeat: {} sessions expired, {} addresses queued, {} failures",
                            summary.expired,
                            summary.enqueued,
                            summary.failed
                        );
                    } else {
                        tracing::debug!("Heartbeat: nothing due");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Driver stopped");
    }

    /// One heartbeat at `now`. Store errors are logged per item and the
    /// rest of the heartbeat carries on.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();

        match self.transactions.sweep_expired(now).await {
            Ok(expired) => {
                for (transaction_id, address_id) in expired {
                    match self.transactions.expire(&transaction_id).await {
                        Ok(()) => summary.expired += 1,
                        Err(e) => {
                            summary.failed += 1;
                            tracing::warn!("Could not expire transaction {}: {}", transaction_id, e);
                        }
                    }
                    // The address is re-checked whether or not the mark stuck
                    if self.scheduler.enqueue(address_id) {
                        summary.enqueued += 1;
                    }
                }
            }
            Err(e) => {
                summary.failed += 1;
                tracing::error!("Transaction sweep failed: {}", e);
            }
        }

        match self.addresses.pending_addresses(now).await {
            Ok(due) => {
                for address_id in due {
                    if self.scheduler.enqueue(address_id) {
                        summary.enqueued += 1;
                    }
                }
            }
            Err(e) => {
                summary.failed += 1;
                tracing::error!("Pending address lookup failed: {}", e);
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::derivation::PoolDeriver;
    use crate::adapters::rates::FixedRates;
    use crate::adapters::store::FileStore;
    use crate::application::registry::ProviderRegistry;
    use crate::application::scheduler::Scheduler;
    use crate::domain::Backoff;
    use std::collections::HashMap;

    struct Fixture {
        addresses: Arc<AddressLedger>,
        transactions: Arc<TransactionLedger>,
        scheduler: Scheduler,
        driver: Driver,
    }

    fn fixture() -> Fixture {
        fixture_on(Arc::new(FileStore::in_memory()))
    }

    fn fixture_on(store: Arc<FileStore>) -> Fixture {
        let mut pools = HashMap::new();
        pools.insert("btc".to_string(), vec!["bc1qa".to_string(), "bc1qb".to_string()]);
        let addresses = Arc::new(AddressLedger::new(
            store.clone(),
            Arc::new(PoolDeriver::new(pools)),
            Arc::new(FixedRates::default()),
            Backoff::without_jitter(300, 86_400, 2.0),
        ));
        let transactions = Arc::new(TransactionLedger::new(
            store,
            addresses.clone(),
            chrono::Duration::seconds(900),
        ));
        let (scheduler, handle) = Scheduler::new(
            Arc::new(ProviderRegistry::new()),
            addresses.clone(),
            HashMap::new(),
        );
        let driver = Driver::new(addresses.clone(), transactions.clone(), handle);
        Fixture {
            addresses,
            transactions,
            scheduler,
            driver,
        }
    }

    #[tokio::test]
    async fn test_tick_enqueues_due_addresses_once() {
        let f = fixture();
        let a = f.addresses.allocate_address("btc", "shop1").await.unwrap();

        let summary = f.driver.tick(a.next_check).await;
        assert_eq!(summary, TickSummary { expired: 0, enqueued: 1, failed: 0 });

        // Still waiting in the queue
        let summary = f.driver.tick(a.next_check).await;
        assert_eq!(summary.enqueued, 0);
        drop(f.scheduler);
    }

    #[tokio::test]
    async fn test_tick_expires_sessions_and_requeues_address() {
        let f = fixture();
        let session = f.transactions.open("btc", "shop1").await.unwrap();
        let a = session.address.id;

        // Push the address's own schedule past the window so only the sweep queues it
        for _ in 0..4 {
            f.addresses.reschedule_after_check(a, false).await.unwrap();
        }
        let t0 = session.transaction.valid_from;

        let early = f.driver.tick(t0 + chrono::Duration::seconds(899)).await;
        assert_eq!(early.expired, 0);

        let late = f.driver.tick(t0 + chrono::Duration::seconds(900)).await;
        assert_eq!(late, TickSummary { expired: 1, enqueued: 1, failed: 0 });

        let again = f.driver.tick(t0 + chrono::Duration::seconds(901)).await;
        assert_eq!(again.expired, 0);
        drop(f.scheduler);
    }

    #[tokio::test]
    async fn test_tick_carries_on_when_store_writes_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let f = fixture_on(Arc::new(FileStore::open(&path).unwrap()));

        let t1 = f.transactions.open("btc", "shop1").await.unwrap();
        let t2 = f.transactions.open("btc", "shop1").await.unwrap();
        let a1 = t1.address.id;
        for _ in 0..4 {
            f.addresses.reschedule_after_check(a1, false).await.unwrap();
        }
        let a2 = f.addresses.allocate_address("btc", "shop2").await.unwrap();
        let now = t2.transaction.valid_to;

        // Marking sessions expired now fails on disk
        let blocker = path.with_extension("json.tmp");
        std::fs::create_dir(&blocker).unwrap();

        let summary = f.driver.tick(now).await;
        assert_eq!(summary, TickSummary { expired: 0, enqueued: 2, failed: 2 });
        assert_eq!(f.driver.scheduler.queued_len(), 2);
        assert_ne!(a1, a2.id);

        // Both sessions are still pending and get expired once writes work
        std::fs::remove_dir(&blocker).unwrap();
        let summary = f.driver.tick(now).await;
        assert_eq!(summary, TickSummary { expired: 2, enqueued: 0, failed: 0 });
        drop(f.scheduler);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let f = fixture();
        let (tx, rx) = watch::channel(false);
        let driver = Arc::new(f.driver.with_heartbeat(Duration::from_secs(5)));

        let task = {
            let driver = driver.clone();
            tokio::spawn(async move { driver.run(rx).await })
        };

        tokio::time::sleep(Duration::from_secs(12)).await;
        tx.send(true).unwrap();
        task.await.unwrap();
        drop(f.scheduler);
    }
}
