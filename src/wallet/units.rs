//! Conversion between display amounts and integer base units (satoshi, wei, token units).

use ethers::types::U256;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::{
    constants::{BTC_DECIMALS, ETH_DECIMALS},
    error::{AppError, Result},
};

/// Converts a display amount into base units, truncating digits past `decimals`.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<U256> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(AppError::BadRequest(format!(
            "Amount must not be negative: {}",
            amount
        )));
    }
    let mut scaled = amount.round_dp_with_strategy(decimals, RoundingStrategy::ToZero);
    scaled.rescale(decimals);
    if scaled.scale() != decimals {
        return Err(AppError::BadRequest(format!(
            "Amount {} cannot be expressed with {} decimals",
            amount, decimals
        )));
    }
    let mantissa = u128::try_from(scaled.mantissa())
        .map_err(|_| AppError::BadRequest(format!("Invalid amount: {}", amount)))?;
    Ok(U256::from(mantissa))
}

/// Converts integer base units into a display amount.
pub fn from_base_units(raw: U256, decimals: u32) -> Result<Decimal> {
    if raw > U256::from(u128::MAX) {
        return Err(AppError::Internal(format!("Value {} is out of range", raw)));
    }
    let value = i128::try_from(raw.as_u128())
        .map_err(|_| AppError::Internal(format!("Value {} is out of range", raw)))?;
    Decimal::try_from_i128_with_scale(value, decimals)
        .map(|d| d.normalize())
        .map_err(|e| AppError::Internal(format!("Value {} is out of range: {}", raw, e)))
}

pub fn btc_to_sats(amount: Decimal) -> Result<u64> {
    let sats = to_base_units(amount, BTC_DECIMALS)?;
    if sats > U256::from(u64::MAX) {
        return Err(AppError::BadRequest(format!("Amount {} BTC is too large", amount)));
    }
    Ok(sats.as_u64())
}

pub fn sats_to_btc(sats: i64) -> Decimal {
    Decimal::new(sats, BTC_DECIMALS).normalize()
}

pub fn eth_to_wei(amount: Decimal) -> Result<U256> {
    to_base_units(amount, ETH_DECIMALS)
}

pub fn wei_to_eth(wei: U256) -> Result<Decimal> {
    from_base_units(wei, ETH_DECIMALS)
}

/// Truncates an amount to the precision a coin can carry.
pub fn truncate_to_decimals(amount: Decimal, decimals: u32) -> Decimal {
    amount
        .round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
        .normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    #[test]
    fn btc_to_sats_truncates_extra_precision() {
        assert_eq!(btc_to_sats(dec("0.00012345")).unwrap(), 12_345);
        assert_eq!(btc_to_sats(dec("1.000000019")).unwrap(), 100_000_001);
        assert_eq!(btc_to_sats(dec("0")).unwrap(), 0);
    }

    #[test]
    fn negative_amounts_are_rejected() {
        assert!(btc_to_sats(dec("-0.1")).is_err());
        assert!(eth_to_wei(dec("-1")).is_err());
    }

    #[test]
    fn sats_to_btc_keeps_exact_value() {
        assert_eq!(sats_to_btc(150_000_000), dec("1.5"));
        assert_eq!(sats_to_btc(1), dec("0.00000001"));
    }

    #[test]
    fn eth_to_wei_uses_eighteen_decimals() {
        let wei = eth_to_wei(dec("0.05")).unwrap();
        assert_eq!(wei, U256::from(50_000_000_000_000_000u128));
        assert_eq!(wei_to_eth(wei).unwrap(), dec("0.05"));
    }

    #[test]
    fn from_base_units_rejects_values_beyond_u128() {
        let huge = U256::from(u128::MAX) + U256::one();
        assert!(from_base_units(huge, 18).is_err());
    }

    #[test]
    fn token_units_follow_token_decimals() {
        let raw = to_base_units(dec("12.5"), 8).unwrap();
        assert_eq!(raw, U256::from(1_250_000_000u64));
        assert_eq!(from_base_units(raw, 8).unwrap(), dec("12.5"));
    }

    #[test]
    fn truncate_to_decimals_rounds_toward_zero() {
        assert_eq!(truncate_to_decimals(dec("0.123456789"), 8), dec("0.12345678"));
        assert_eq!(truncate_to_decimals(dec("2"), 8), dec("2"));
    }
}
