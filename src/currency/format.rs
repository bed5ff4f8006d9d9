use crate::rates::RateTable;

use super::convert::{convert_with, decimals_for};

const SYMBOLS: &[(&str, &str)] = &[
    ("KRW", "₩"),
    ("USD", "$"),
    ("EUR", "€"),
    ("JPY", "¥"),
    ("CNY", "¥"),
    ("GBP", "£"),
    ("VND", "₫"),
    ("THB", "฿"),
];

pub fn symbol(code: &str) -> Option<&'static str> {
    SYMBOLS
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, s)| *s)
}

/// `₩135,000`, `$12.50`, or `CHF 12.50` when no symbol is known.
pub fn format_money(table: &RateTable, amount: f64, code: &str) -> String {
    let digits = group_thousands(amount, decimals_for(table, code));
    match symbol(code) {
        Some(symbol) => format!("{symbol}{digits}"),
        None => format!("{} {digits}", code.to_uppercase()),
    }
}

/// Base-currency amount first, the listing's own price in parentheses.
/// Falls back to the listing's own price when no rate is available.
pub fn format_price(table: &RateTable, amount: f64, currency: &str) -> String {
    if table.is_base(currency) {
        return format_money(table, amount, currency);
    }

    match convert_with(table, amount, currency, &table.base) {
        Ok(in_base) => format!(
            "{} ({})",
            format_money(table, in_base, &table.base),
            format_money(table, amount, currency)
        ),
        Err(e) => {
            tracing::debug!(error = %e, "showing price in listing currency");
            format_money(table, amount, currency)
        }
    }
}

fn group_thousands(amount: f64, decimals: u32) -> String {
    let formatted = format!("{:.*}", decimals as usize, amount.abs());
    let (whole, fraction) = match formatted.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::with_capacity(formatted.len() + whole.len() / 3 + 1);
    if amount < 0.0 && formatted.chars().any(|c| c != '0' && c != '.') {
        grouped.push('-');
    }
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if let Some(fraction) = fraction {
        grouped.push('.');
        grouped.push_str(fraction);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::rates::tests::rates;

    fn table() -> RateTable {
        RateTable::new("KRW", rates(&[("USD", 1350.0), ("EUR", 1470.0)]), OffsetDateTime::UNIX_EPOCH)
    }

    #[test]
    fn groups_digits() {
        assert_eq!(group_thousands(0.0, 0), "0");
        assert_eq!(group_thousands(999.0, 0), "999");
        assert_eq!(group_thousands(1000.0, 0), "1,000");
        assert_eq!(group_thousands(1234567.891, 2), "1,234,567.89");
        assert_eq!(group_thousands(-1500.0, 0), "-1,500");
        assert_eq!(group_thousands(-0.001, 2), "0.00");
    }

    #[test]
    fn foreign_price_shows_both() {
        assert_eq!(format_price(&table(), 100.0, "USD"), "₩135,000 ($100.00)");
        assert_eq!(format_price(&table(), 12.5, "eur"), "₩18,375 (€12.50)");
    }

    #[test]
    fn base_price_shows_once() {
        assert_eq!(format_price(&table(), 25000.0, "KRW"), "₩25,000");
    }

    #[test]
    fn missing_rate_falls_back_to_listing_currency() {
        assert_eq!(format_price(&table(), 40.0, "GBP"), "£40.00");
        assert_eq!(format_price(&table(), 40.0, "CHF"), "CHF 40.00");
    }
}
