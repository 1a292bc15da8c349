use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("Address derivation failed for {coin} index {index}: {reason}")]
pub struct DerivationError {
    pub coin: String,
    pub index: u32,
    pub reason: String,
}

/// Turns a (coin, index) pair into an encoded receiving address
pub trait AddressDeriver: Send + Sync {
    fn derive_address(&self, coin: &str, index: u32) -> Result<String, DerivationError>;
}
