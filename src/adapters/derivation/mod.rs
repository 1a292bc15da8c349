//! Key Derivation Adapters

mod pool;

pub use pool::PoolDeriver;
