//! Application Layer - Relay use cases
//!
//! - `ProviderRegistry`: coin -> provider adapter routing
//! - `AddressLedger`: address allocation, balance bookkeeping, schedule
//! - `TransactionLedger`: payment sessions and their expiry
//! - `Scheduler`: single worker performing balance checks
//! - `Driver`: heartbeat feeding the scheduler

pub mod address_ledger;
pub mod driver;
pub mod registry;
pub mod scheduler;
pub mod transaction_ledger;

pub use address_ledger::{AddressLedger, LedgerError};
pub use driver::{Driver, TickSummary, DEFAULT_HEARTBEAT};
pub use registry::{ProviderRegistry, RegistryError};
pub use scheduler::{CheckOutcome, Scheduler, SchedulerHandle};
pub use transaction_ledger::{PaymentSession, TransactionLedger, DEFAULT_TRANSACTION_TTL_SECS};
