//! Atomic-unit amounts.
//!
//! The settlement currency has 12 decimals, so realistic totals overflow
//! `u64` long before they overflow anyone's patience. All arithmetic is on
//! `u128`, and amounts cross JSON boundaries as decimal strings because
//! JavaScript clients would silently round anything above 2^53.

use serde::{Deserializer, Serializer};
use serde_json::Value;

/// Reads an amount the way wallet RPC returns it: a digit string, or a
/// non-negative JSON number (fractions truncated). Anything else is `None`.
pub fn parse_amount(value: &Value) -> Option<u128> {
    match value {
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse().ok()
        }
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(u as u128)
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f.trunc() as u128)
            }
        }
        _ => None,
    }
}

/// Reads a non-negative integer that may arrive as a number or a numeric
/// string. Negative or fractional values are rejected.
pub fn parse_index(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a count that is clamped rather than rejected: negatives become 0,
/// fractions are truncated.
pub fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.max(0.0).trunc() as u64)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f.max(0.0).trunc() as u64),
        _ => None,
    }
}

/// `#[serde(with = "dstream_protocol::amount::decimal")]` for `u128` fields.
pub mod decimal {
    use super::*;
    use serde::de::Error as _;
    use serde::Deserialize;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse_amount(&value).ok_or_else(|| D::Error::custom("expected a non-negative atomic amount"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn amounts_from_strings_and_numbers() {
        assert_eq!(parse_amount(&json!("1000000000000")), Some(1_000_000_000_000));
        assert_eq!(parse_amount(&json!(42)), Some(42));
        assert_eq!(parse_amount(&json!(1.9)), Some(1));
        assert_eq!(
            parse_amount(&json!("340282366920938463463374607431768211455")),
            Some(u128::MAX)
        );
        assert_eq!(parse_amount(&json!("-1")), None);
        assert_eq!(parse_amount(&json!(-1)), None);
        assert_eq!(parse_amount(&json!("1e3")), None);
        assert_eq!(parse_amount(&json!("")), None);
        assert_eq!(parse_amount(&json!(null)), None);
    }

    #[test]
    fn indices_reject_negative_and_fractional() {
        assert_eq!(parse_index(&json!(7)), Some(7));
        assert_eq!(parse_index(&json!("7")), Some(7));
        assert_eq!(parse_index(&json!(7.0)), Some(7));
        assert_eq!(parse_index(&json!(7.5)), None);
        assert_eq!(parse_index(&json!(-1)), None);
    }

    #[test]
    fn counts_clamp() {
        assert_eq!(parse_count(&json!(-3)), Some(0));
        assert_eq!(parse_count(&json!(2.7)), Some(2));
        assert_eq!(parse_count(&json!("12")), Some(12));
        assert_eq!(parse_count(&json!(true)), None);
    }

    #[test]
    fn decimal_serde() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct W {
            #[serde(with = "decimal")]
            a: u128,
        }
        let w = W { a: 12_345 };
        assert_eq!(serde_json::to_value(&w).unwrap(), json!({"a": "12345"}));
        let back: W = serde_json::from_value(json!({"a": 12345})).unwrap();
        assert_eq!(back, w);
    }
}
