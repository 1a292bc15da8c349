//! Ledger Store Adapters

mod file_store;

pub use file_store::{FileStore, DEFAULT_STORE_FILE};
