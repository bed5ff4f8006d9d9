use std::sync::Arc;

use crate::{
    error::ConversionError,
    rates::{RateCache, RateTable},
};

/// Currencies that are priced in whole units.
pub const ZERO_DECIMAL_CURRENCIES: &[&str] = &["KRW", "JPY", "VND"];

pub fn decimals_for(table: &RateTable, code: &str) -> u32 {
    if table.is_base(code) || ZERO_DECIMAL_CURRENCIES.iter().any(|c| c.eq_ignore_ascii_case(code)) {
        0
    } else {
        2
    }
}

pub fn round_to(amount: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (amount * scale).round() / scale
}

/// Converts through the base currency: `from -> base` multiplies by `from`'s
/// rate, `base -> to` divides by `to`'s rate.
pub fn convert_with(table: &RateTable, amount: f64, from: &str, to: &str) -> Result<f64, ConversionError> {
    if from.eq_ignore_ascii_case(to) {
        return Ok(amount);
    }

    let from_rate = table
        .rate(from)
        .ok_or_else(|| ConversionError::RateMissing(from.to_uppercase()))?;
    let to_rate = table
        .rate(to)
        .ok_or_else(|| ConversionError::RateMissing(to.to_uppercase()))?;

    let in_base = if table.is_base(from) { amount } else { amount * from_rate };
    let converted = if table.is_base(to) { in_base } else { in_base / to_rate };

    Ok(round_to(converted, decimals_for(table, to)))
}

/// Reads whatever table the cache holds at call time; safe to share.
#[derive(Clone)]
pub struct CurrencyConverter {
    cache: Arc<RateCache>,
}

impl CurrencyConverter {
    pub fn new(cache: Arc<RateCache>) -> Self {
        Self { cache }
    }

    pub fn base(&self) -> &str {
        self.cache.base()
    }

    pub fn table(&self) -> Arc<RateTable> {
        self.cache.current_table()
    }

    pub fn convert(&self, amount: f64, from: &str, to: &str) -> Result<f64, ConversionError> {
        convert_with(&self.cache.current_table(), amount, from, to)
    }

    pub fn format_price(&self, amount: f64, currency: &str) -> String {
        super::format::format_price(&self.cache.current_table(), amount, currency)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::OffsetDateTime;

    use super::*;
    use crate::rates::tests::rates;

    fn table() -> RateTable {
        RateTable::new(
            "KRW",
            rates(&[("USD", 1350.0), ("EUR", 1470.0), ("JPY", 9.0), ("GBP", 1710.0)]),
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    const CODES: &[&str] = &["KRW", "USD", "EUR", "JPY", "GBP"];

    #[test]
    fn converts_through_base() {
        let table = table();
        assert_eq!(convert_with(&table, 100.0, "USD", "KRW").unwrap(), 135_000.0);
        assert_eq!(convert_with(&table, 135_000.0, "KRW", "USD").unwrap(), 100.0);
        assert_eq!(convert_with(&table, 100.0, "EUR", "USD").unwrap(), 108.89);
        assert_eq!(convert_with(&table, 10.0, "USD", "JPY").unwrap(), 1500.0);
    }

    #[test]
    fn rounds_per_target_currency() {
        let table = table();
        // 1234.5678 USD -> 1,666,666.53 KRW -> whole won
        assert_eq!(convert_with(&table, 1234.5678, "USD", "KRW").unwrap(), 1_666_667.0);
        assert_eq!(convert_with(&table, 1000.0, "KRW", "EUR").unwrap(), 0.68);
    }

    #[test]
    fn missing_rate_is_reported() {
        let table = table();
        assert_eq!(
            convert_with(&table, 1.0, "CHF", "KRW"),
            Err(ConversionError::RateMissing("CHF".into()))
        );
        assert_eq!(
            convert_with(&table, 1.0, "usd", "thb"),
            Err(ConversionError::RateMissing("THB".into()))
        );
    }

    fn unit(table: &RateTable, code: &str) -> f64 {
        10f64.powi(-(decimals_for(table, code) as i32))
    }

    proptest! {
        #[test]
        fn same_currency_is_identity(x in -1e12f64..1e12, code in "[A-Z]{3}") {
            prop_assert_eq!(convert_with(&table(), x, &code, &code).unwrap(), x);
        }

        #[test]
        fn round_trip_stays_within_rounding(x in 0.01f64..1e9, a in 0..CODES.len(), b in 0..CODES.len()) {
            let table = table();
            let (a, b) = (CODES[a], CODES[b]);
            let x = round_to(x, decimals_for(&table, a));

            let there = convert_with(&table, x, a, b).unwrap();
            let back = convert_with(&table, there, b, a).unwrap();

            // half a unit of slack on each leg, carried into `a`'s units
            let ratio = table.rate(b).unwrap() / table.rate(a).unwrap();
            let tolerance = unit(&table, a) + unit(&table, b) * ratio + 1e-9 * x.abs();
            prop_assert!((back - x).abs() <= tolerance, "{x} {a} -> {there} {b} -> {back} {a}");
        }
    }
}
