//! Symbol and number conversions shared by the exchange clients and the
//! collector. Nothing here touches floating point.

use std::str::FromStr;

use bigdecimal::{BigDecimal, Zero};
use serde_json::Value;
use tracing::warn;

/// Quote assets recognized on futures symbols, checked in this order.
pub const QUOTE_CURRENCIES: [&str; 7] = ["USDT", "USDC", "BUSD", "USD", "BTC", "ETH", "BNB"];

/// Base asset of a pair symbol such as `SUIUSDT` -> `SUI`.
pub fn extract_token_symbol(pair_symbol: &str) -> Option<String> {
    let pair_symbol = normalize_symbol(pair_symbol);

    for quote in QUOTE_CURRENCIES {
        if let Some(base) = pair_symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return Some(base.to_string());
            }
        }
    }

    warn!("Could not extract token symbol from pair {}", pair_symbol);
    None
}

/// Base asset of a BTC-quoted spot pair such as `ETHBTC` -> `ETH`.
pub fn extract_token_from_spot_pair(pair_symbol: &str) -> Option<String> {
    let pair_symbol = normalize_symbol(pair_symbol);

    match pair_symbol.strip_suffix("BTC") {
        Some(base) if !base.is_empty() => Some(base.to_string()),
        _ => {
            warn!("Could not extract token symbol from spot pair {}", pair_symbol);
            None
        }
    }
}

pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// USD amount expressed in BTC; zero when the BTC price is zero.
pub fn convert_to_btc(amount_usd: &BigDecimal, btc_price: &BigDecimal) -> BigDecimal {
    if btc_price.is_zero() {
        return BigDecimal::zero();
    }
    amount_usd / btc_price
}

/// Parses a decimal string, returning `None` for blanks and garbage.
pub fn parse_decimal(value: &str) -> Option<BigDecimal> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    BigDecimal::from_str(trimmed).ok()
}

/// Decimal from a JSON string or number. Numbers keep the digits of the
/// source document (`arbitrary_precision`), never passing through `f64`.
pub fn decimal_from_json(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => parse_decimal(&n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_extract_token_symbol() {
        assert_eq!(extract_token_symbol("SUIUSDT").as_deref(), Some("SUI"));
        assert_eq!(extract_token_symbol("ethusdc").as_deref(), Some("ETH"));
        assert_eq!(extract_token_symbol("1000PEPEUSDT").as_deref(), Some("1000PEPE"));
        // USDT is checked before USD
        assert_eq!(extract_token_symbol("BTCUSD").as_deref(), Some("BTC"));
        assert_eq!(extract_token_symbol("ETHBTC").as_deref(), Some("ETH"));
        assert_eq!(extract_token_symbol("USDT"), None);
        assert_eq!(extract_token_symbol("BTCEUR"), None);
    }

    #[test]
    fn test_extract_token_from_spot_pair() {
        assert_eq!(extract_token_from_spot_pair("ETHBTC").as_deref(), Some("ETH"));
        assert_eq!(extract_token_from_spot_pair("bnbbtc").as_deref(), Some("BNB"));
        assert_eq!(extract_token_from_spot_pair("BTC"), None);
        assert_eq!(extract_token_from_spot_pair("ETHUSDT"), None);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(convert_to_btc(&dec("134000"), &dec("67000")), dec("2"));
        assert_eq!(convert_to_btc(&dec("134000"), &dec("0")), BigDecimal::zero());
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal(" 0.00012500 "), Some(dec("0.000125")));
        assert_eq!(parse_decimal("-0.0001"), Some(dec("-0.0001")));
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("n/a"), None);
    }

    #[test]
    fn test_decimal_from_json() {
        assert_eq!(decimal_from_json(&json!("1.25")), Some(dec("1.25")));
        assert_eq!(decimal_from_json(&json!(67123.45)), Some(dec("67123.45")));
        assert_eq!(decimal_from_json(&json!(42)), Some(dec("42")));
        assert_eq!(decimal_from_json(&json!(null)), None);
    }

    #[test]
    fn test_decimal_from_json_keeps_source_digits() {
        let value: Value = serde_json::from_str("12345678901234567.89").unwrap();
        let parsed = decimal_from_json(&value).unwrap();
        assert_eq!(parsed, dec("12345678901234567.89"));

        let value: Value = serde_json::from_str("0.000000012345678901234567").unwrap();
        assert_eq!(decimal_from_json(&value), Some(dec("0.000000012345678901234567")));
    }
}
