use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use std::str::FromStr;

/// Default currency for escrows created without an explicit code.
pub const DEFAULT_CURRENCY: &str = "GBP";

/// Parses a numeric-like JSON value into a non-negative 2-dp amount.
///
/// Accepts JSON numbers and numeric strings. Parsing goes through the decimal
/// string representation rather than binary float arithmetic, so `"19.995"`
/// and `19.995` both round to `20.00` (half away from zero). Negative or
/// unparseable input yields the fallback; the caller decides whether a `None`
/// fallback means rejection.
pub fn parse_amount(raw: &Value, fallback: Option<Decimal>) -> Option<Decimal> {
    let text = match raw {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return fallback,
    };
    if text.is_empty() {
        return fallback;
    }

    let parsed = Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text));
    match parsed {
        Ok(value) if value < Decimal::ZERO => fallback,
        Ok(value) => Some(value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)),
        Err(_) => fallback,
    }
}

/// Trims and uppercases a currency code; empty input yields the fallback.
pub fn normalise_currency(raw: Option<&str>, fallback: &str) -> String {
    match raw {
        Some(code) => {
            let trimmed = code.trim();
            if trimmed.is_empty() {
                fallback.to_string()
            } else {
                trimmed.to_uppercase()
            }
        }
        None => fallback.to_string(),
    }
}

/// Formats an amount for display. Unknown currency codes never fail; they
/// fall back to `"<CODE> <amount>"`.
pub fn format_currency(amount: Decimal, currency: &str) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    match currency {
        "GBP" => format!("£{rounded:.2}"),
        "USD" => format!("${rounded:.2}"),
        "EUR" => format!("€{rounded:.2}"),
        code => format!("{code} {rounded:.2}"),
    }
}
