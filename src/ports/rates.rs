use rust_decimal::Decimal;

/// Read-only fiat conversion rate lookup, used for the close-on-limit check
pub trait RateSource: Send + Sync {
    /// Fiat value of one unit of `coin`, if known
    fn rate(&self, coin: &str) -> Option<Decimal>;
}
