//! Domain Layer - Core records of the payment relay
//!
//! Pure types and arithmetic with no I/O:
//! - `address`: receiving addresses and their open/closed/locked lifecycle
//! - `transaction`: time-boxed payment sessions
//! - `fund`: funding events observed in provider history
//! - `backoff`: poll-interval growth with jitter

pub mod address;
pub mod transaction;
pub mod fund;
pub mod backoff;

pub use address::{Address, AddressId, AddressStatus, NewAddress};
pub use transaction::{Transaction, TransactionId, TransactionStatus, TRANSACTION_ID_LEN};
pub use fund::Fund;
pub use backoff::Backoff;
