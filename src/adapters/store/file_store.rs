//! File-Backed Ledger Store
//!
//! Keeps the address, transaction and fund tables in memory behind one
//! async mutex and snapshots them as JSON after every mutation. The
//! snapshot is written to a temp file and renamed over the old one, so a
//! crash leaves either the previous or the new state on disk. Mutations
//! run on a copy of the tables that replaces the live one only after the
//! snapshot is written, so a failed write changes nothing.
//!
//! Every trait method runs under the single mutex, which makes each call
//! one indivisible unit. A snapshot rewritten by another process is picked
//! up on the next call; concurrent writers from two processes can still
//! lose updates.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::domain::{
    Address, AddressId, AddressStatus, Fund, NewAddress, Transaction, TransactionId, TransactionStatus,
};
use crate::ports::{LedgerStore, StoreError};

/// Default snapshot file name inside the data directory
pub const DEFAULT_STORE_FILE: &str = "ledger.json";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreState {
    last_address_id: AddressId,
    addresses: BTreeMap<AddressId, Address>,
    transactions: BTreeMap<TransactionId, Transaction>,
    funds: Vec<Fund>,
}

impl StoreState {
    fn address_mut(&mut self, id: AddressId) -> Result<&mut Address, StoreError> {
        self.addresses.get_mut(&id).ok_or(StoreError::AddressNotFound(id))
    }

    fn bump_usage(&mut self, id: AddressId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let address = self.address_mut(id)?;
        address.reference_count += 1;
        address.last_transaction = Some(at);
        Ok(())
    }
}

/// Size and mtime of the snapshot as last seen by this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: SystemTime,
    len: u64,
}

fn fingerprint(path: &Path) -> Option<Fingerprint> {
    let meta = fs::metadata(path).ok()?;
    Some(Fingerprint {
        modified: meta.modified().ok()?,
        len: meta.len(),
    })
}

#[derive(Debug, Default)]
struct Inner {
    state: StoreState,
    seen: Option<Fingerprint>,
}

#[derive(Debug)]
pub struct FileStore {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl FileStore {
    /// Store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Open the snapshot at `path`, starting empty if it does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = load_snapshot(&path)?;

        tracing::info!(
            "Ledger loaded from {}: {} addresses, {} transactions",
            path.display(),
            state.addresses.len(),
            state.transactions.len()
        );

        let seen = fingerprint(&path);
        Ok(Self {
            path: Some(path),
            inner: Mutex::new(Inner { state, seen }),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Take the table lock, first picking up a snapshot written by another
    /// process (an operator command run next to the daemon)
    async fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let mut inner = self.inner.lock().await;

        if let Some(path) = self.path.as_ref() {
            let current = fingerprint(path);
            if current.is_some() && current != inner.seen {
                inner.state = load_snapshot(path)?;
                inner.seen = current;
                tracing::debug!("Ledger reloaded from {}", path.display());
            }
        }

        Ok(inner)
    }

    /// Apply `change` to a copy of the tables and swap the copy in only
    /// once its snapshot is on disk. A failed write leaves memory untouched.
    fn commit<T>(
        &self,
        inner: &mut Inner,
        change: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut draft = inner.state.clone();
        let out = change(&mut draft)?;

        if let Some(path) = self.path.as_ref() {
            write_snapshot(path, &draft)?;
            inner.seen = fingerprint(path);
        }

        inner.state = draft;
        Ok(out)
    }
}

fn write_snapshot(path: &Path, state: &StoreState) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| StoreError::Unavailable(format!("create {}: {}", parent.display(), e)))?;
    }

    let content = serde_json::to_string_pretty(state)
        .map_err(|e| StoreError::Unavailable(format!("serialize ledger: {}", e)))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)
        .map_err(|e| StoreError::Unavailable(format!("write {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path)
        .map_err(|e| StoreError::Unavailable(format!("rename to {}: {}", path.display(), e)))
}

fn load_snapshot(path: &Path) -> Result<StoreState, StoreError> {
    if !path.exists() {
        return Ok(StoreState::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| StoreError::Unavailable(format!("read {}: {}", path.display(), e)))?;

    if content.trim().is_empty() {
        return Ok(StoreState::default());
    }

    serde_json::from_str(&content)
        .map_err(|e| StoreError::Unavailable(format!("corrupted ledger {}: {}", path.display(), e)))
}

#[async_trait]
impl LedgerStore for FileStore {
    async fn get_address(&self, id: AddressId) -> Result<Address, StoreError> {
        let inner = self.lock().await?;
        inner.state.addresses.get(&id).cloned().ok_or(StoreError::AddressNotFound(id))
    }

    async fn list_addresses(&self) -> Result<Vec<Address>, StoreError> {
        let inner = self.lock().await?;
        Ok(inner.state.addresses.values().cloned().collect())
    }

    async fn find_open_address(&self, coin: &str, account: &str) -> Result<Option<Address>, StoreError> {
        let inner = self.lock().await?;
        Ok(inner
            .state
            .addresses
            .values()
            .filter(|a| a.status == AddressStatus::Open && a.coin == coin && a.account == account)
            .max_by_key(|a| a.index)
            .cloned())
    }

    async fn max_index(&self, coin: &str) -> Result<Option<u32>, StoreError> {
        let inner = self.lock().await?;
        Ok(inner
            .state
            .addresses
            .values()
            .filter(|a| a.coin == coin)
            .map(|a| a.index)
            .max())
    }

    async fn insert_address(&self, address: NewAddress) -> Result<Address, StoreError> {
        let mut inner = self.lock().await?;

        self.commit(&mut inner, |state| {
            if state
                .addresses
                .values()
                .any(|a| a.coin == address.coin && a.index == address.index)
            {
                return Err(StoreError::AllocationConflict {
                    coin: address.coin,
                    index: address.index,
                });
            }

            state.last_address_id += 1;
            let row = address.into_address(state.last_address_id);
            state.addresses.insert(row.id, row.clone());
            Ok(row)
        })
    }

    async fn update_balance(&self, id: AddressId, balance: Decimal) -> Result<(), StoreError> {
        let mut inner = self.lock().await?;
        self.commit(&mut inner, |state| {
            state.address_mut(id)?.balance = balance;
            Ok(())
        })
    }

    async fn record_check_time(&self, id: AddressId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.lock().await?;
        self.commit(&mut inner, |state| {
            state.address_mut(id)?.last_check = Some(at);
            Ok(())
        })
    }

    async fn close_address(&self, id: AddressId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.lock().await?;
        let status = inner
            .state
            .addresses
            .get(&id)
            .map(|a| a.status)
            .ok_or(StoreError::AddressNotFound(id))?;
        if status != AddressStatus::Open {
            return Ok(());
        }

        self.commit(&mut inner, |state| {
            let address = state.address_mut(id)?;
            address.status = AddressStatus::Closed;
            address.valid_to = Some(at);
            Ok(())
        })
    }

    async fn lock_address(&self, id: AddressId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.lock().await?;
        self.commit(&mut inner, |state| {
            let address = state.address_mut(id)?;
            address.status = AddressStatus::Locked;
            address.valid_to.get_or_insert(at);
            Ok(())
        })
    }

    async fn update_schedule(
        &self,
        id: AddressId,
        wait_secs: u64,
        next_check: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock().await?;
        self.commit(&mut inner, |state| {
            let address = state.address_mut(id)?;
            address.wait_secs = wait_secs;
            address.next_check = next_check;
            Ok(())
        })
    }

    async fn pending_address_ids(&self, now: DateTime<Utc>) -> Result<Vec<AddressId>, StoreError> {
        let inner = self.lock().await?;
        let mut due: Vec<&Address> = inner.state.addresses.values().filter(|a| a.is_due(now)).collect();
        due.sort_by_key(|a| a.next_check);
        Ok(due.into_iter().map(|a| a.id).collect())
    }

    async fn increment_address_usage(&self, id: AddressId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.lock().await?;
        self.commit(&mut inner, |state| state.bump_usage(id, at))
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        let mut inner = self.lock().await?;
        self.commit(&mut inner, |state| {
            state.bump_usage(transaction.address_id, transaction.valid_from)?;
            state
                .transactions
                .insert(transaction.id.clone(), transaction.clone());
            Ok(())
        })
    }

    async fn get_transaction(&self, id: &TransactionId) -> Result<Transaction, StoreError> {
        let inner = self.lock().await?;
        inner
            .state
            .transactions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::TransactionNotFound(id.clone()))
    }

    async fn expired_transaction_ids(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(TransactionId, AddressId)>, StoreError> {
        let inner = self.lock().await?;
        Ok(inner
            .state
            .transactions
            .values()
            .filter(|t| t.is_expired_at(now))
            .map(|t| (t.id.clone(), t.address_id))
            .collect())
    }

    async fn mark_transaction_expired(&self, id: &TransactionId) -> Result<(), StoreError> {
        let mut inner = self.lock().await?;
        self.commit(&mut inner, |state| {
            let transaction = state
                .transactions
                .get_mut(id)
                .ok_or_else(|| StoreError::TransactionNotFound(id.clone()))?;
            transaction.status = TransactionStatus::Expired;
            Ok(())
        })
    }

    async fn insert_funds(&self, funds: &[Fund]) -> Result<usize, StoreError> {
        let mut inner = self.lock().await?;

        let mut fresh: Vec<&Fund> = Vec::new();
        for fund in funds {
            let seen = inner
                .state
                .funds
                .iter()
                .chain(fresh.iter().copied())
                .any(|f| f.address_id == fund.address_id && f.txid == fund.txid);
            if !seen {
                fresh.push(fund);
            }
        }

        if fresh.is_empty() {
            return Ok(0);
        }

        self.commit(&mut inner, |state| {
            state.funds.extend(fresh.iter().map(|f| (*f).clone()));
            Ok(fresh.len())
        })
    }

    async fn funds(&self, address_id: AddressId) -> Result<Vec<Fund>, StoreError> {
        let inner = self.lock().await?;
        let mut funds: Vec<Fund> = inner
            .state
            .funds
            .iter()
            .filter(|f| f.address_id == address_id)
            .cloned()
            .collect();
        funds.sort_by_key(|f| f.observed);
        Ok(funds)
    }
}
