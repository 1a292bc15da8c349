//! Unit scaling from provider base units (satoshi, wei, ...) to coin units

use rust_decimal::Decimal;
use serde_json::Number;

use crate::ports::ProviderError;

/// Satoshi-style coins: 1 coin = 10^8 base units
pub const SATOSHI_DECIMALS: u32 = 8;

/// Ether: 1 ETH = 10^18 wei
pub const WEI_DECIMALS: u32 = 18;

/// Scale an integer amount of base units into coin units
pub fn from_base_units(raw: u128, decimals: u32) -> Result<Decimal, ProviderError> {
    let raw = i128::try_from(raw)
        .map_err(|_| ProviderError::InvalidResponse(format!("amount {} out of range", raw)))?;
    Decimal::try_from_i128_with_scale(raw, decimals)
        .map(|d| d.normalize())
        .map_err(|e| ProviderError::InvalidResponse(format!("amount {} not representable: {}", raw, e)))
}

/// Scale a decimal string of base units ("1000000000000000000")
pub fn parse_base_units(raw: &str, decimals: u32) -> Result<Decimal, ProviderError> {
    let value: u128 = raw
        .trim()
        .parse()
        .map_err(|_| ProviderError::InvalidResponse(format!("not an integer amount: {:?}", raw)))?;
    from_base_units(value, decimals)
}

/// Scale a JSON number of base units; large values may arrive as floats
pub fn number_to_units(raw: &Number, decimals: u32) -> Result<Decimal, ProviderError> {
    if let Some(value) = raw.as_u64() {
        return from_base_units(value as u128, decimals);
    }
    if raw.is_i64() {
        return Err(ProviderError::InvalidResponse(format!("negative amount {}", raw)));
    }
    parse_base_units(&raw.to_string(), decimals).or_else(|_| {
        let value = raw
            .as_f64()
            .ok_or_else(|| ProviderError::InvalidResponse(format!("bad amount {}", raw)))?;
        let base = Decimal::from_f64_retain(value)
            .ok_or_else(|| ProviderError::InvalidResponse(format!("bad amount {}", raw)))?;
        Ok((base / Decimal::from(10u64.pow(decimals.min(19)))).normalize())
    })
}
