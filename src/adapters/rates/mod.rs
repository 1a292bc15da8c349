//! Fiat Rate Sources

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::ports::RateSource;

/// Rates fixed at startup from the `[rates]` config table
#[derive(Debug, Clone, Default)]
pub struct FixedRates {
    rates: HashMap<String, Decimal>,
}

impl FixedRates {
    pub fn new(rates: HashMap<String, Decimal>) -> Self {
        let rates = rates
            .into_iter()
            .map(|(coin, rate)| (coin.to_ascii_lowercase(), rate))
            .collect();
        Self { rates }
    }

    pub fn with_rate(mut self, coin: &str, rate: Decimal) -> Self {
        self.rates.insert(coin.to_ascii_lowercase(), rate);
        self
    }
}

impl RateSource for FixedRates {
    fn rate(&self, coin: &str) -> Option<Decimal> {
        self.rates.get(&coin.to_ascii_lowercase()).copied()
    }
}
