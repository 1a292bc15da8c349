//! Balance Check Scheduler
//!
//! Single consumer of a queue of address ids. Producers (the driver, the
//! transaction sweep, operator rechecks) enqueue through a cloneable
//! `SchedulerHandle` without blocking; an id already waiting is not queued
//! twice. The worker checks one address at a time, so at most one provider
//! request is in flight and throttles see requests in queue order.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};

use super::address_ledger::{AddressLedger, LedgerError};
use super::registry::ProviderRegistry;
use crate::domain::{AddressId, AddressStatus};

/// Result of checking one queued address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Locked addresses are never polled
    Skipped,
    /// Provider or routing failed; schedule left untouched
    Failed,
    Checked { grew: bool, wait_secs: u64 },
}

/// Cloneable producer side of the check queue
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<AddressId>,
    queued: Arc<Mutex<HashSet<AddressId>>>,
}

impl SchedulerHandle {
    /// Queue `id` for a check. Returns false if it is already waiting or
    /// the worker has stopped.
    pub fn enqueue(&self, id: AddressId) -> bool {
        let mut queued = match self.queued.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !queued.insert(id) {
            return false;
        }
        if self.tx.send(id).is_err() {
            queued.remove(&id);
            return false;
        }
        true
    }

    /// Ids waiting for the worker
    pub fn queued_len(&self) -> usize {
        match self.queued.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

pub struct Scheduler {
    registry: Arc<ProviderRegistry>,
    ledger: Arc<AddressLedger>,
    limits: HashMap<String, Decimal>,
    record_funds: bool,
    rx: mpsc::UnboundedReceiver<AddressId>,
    queued: Arc<Mutex<HashSet<AddressId>>>,
}

impl Scheduler {
    /// Build the worker and its producer handle.
    /// `limits` holds the close-on-limit fiat threshold per coin.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        ledger: Arc<AddressLedger>,
        limits: HashMap<String, Decimal>,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queued = Arc::new(Mutex::new(HashSet::new()));

        let limits = limits
            .into_iter()
            .map(|(coin, limit)| (coin.to_ascii_lowercase(), limit))
            .collect();

        let scheduler = Self {
            registry,
            ledger,
            limits,
            record_funds: false,
            rx,
            queued: queued.clone(),
        };
        (scheduler, SchedulerHandle { tx, queued })
    }

    /// Also fetch and store funding records when a balance grows
    pub fn with_fund_recording(mut self, enabled: bool) -> Self {
        self.record_funds = enabled;
        self
    }

    /// Check queued ids until shutdown is signalled or every handle is
    /// dropped. A check already under way finishes first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let id = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = self.rx.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };

            self.release(id);
            match self.check(id).await {
                Ok(outcome) => tracing::debug!("Address {} check: {:?}", id, outcome),
                Err(e) => tracing::error!("Address {} check aborted: {}", id, e),
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Take one id off the queue and check it. Returns None when the
    /// queue is empty.
    pub async fn run_once(&mut self) -> Option<Result<CheckOutcome, LedgerError>> {
        let id = self.rx.try_recv().ok()?;
        self.release(id);
        Some(self.check(id).await)
    }

    fn release(&self, id: AddressId) {
        match self.queued.lock() {
            Ok(mut guard) => guard.remove(&id),
            Err(poisoned) => poisoned.into_inner().remove(&id),
        };
    }

    /// Fetch, record and reschedule one address.
    ///
    /// Provider failures are logged and leave the address untouched; store
    /// failures propagate.
    pub async fn check(&self, id: AddressId) -> Result<CheckOutcome, LedgerError> {
        let address = self.ledger.address(id).await?;
        if address.status == AddressStatus::Locked {
            tracing::debug!("Address {} is locked; skipping", id);
            return Ok(CheckOutcome::Skipped);
        }

        let provider = match self.registry.adapter_for(&address.coin) {
            Ok(provider) => provider,
            Err(e) => {
                tracing::error!("Address {}: {}", id, e);
                return Ok(CheckOutcome::Failed);
            }
        };

        let balance = match provider.fetch_balance(&address.coin, &address.address).await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::warn!(
                    "Balance fetch for address {} ({} {}) failed: {}",
                    id,
                    address.coin,
                    address.address,
                    e
                );
                return Ok(CheckOutcome::Failed);
            }
        };

        let limit = self
            .limits
            .get(&address.coin)
            .copied()
            .unwrap_or(Decimal::MAX);

        let grew = self.ledger.record_check(id, balance, limit).await?;
        let wait_secs = self.ledger.reschedule_after_check(id, grew).await?;

        if grew && self.record_funds {
            match provider.fetch_funds(&address.coin, id, &address.address).await {
                Ok(funds) => {
                    self.ledger.record_funds(id, &funds).await?;
                }
                Err(e) => tracing::warn!("Funding history for address {} unavailable: {}", id, e),
            }
        }

        Ok(CheckOutcome::Checked { grew, wait_secs })
    }
}
