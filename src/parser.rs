// src/parser.rs
use alloy::primitives::U256;
use chrono::{DateTime, Datelike, SecondsFormat, TimeZone, Utc};
use rust_decimal::prelude::{FromStr, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::errors::ActivityError;

pub const DEFAULT_DECIMALS: u8 = 18;

/// Raw transfer amount in the asset's smallest unit.
#[derive(Debug, Clone, PartialEq)]
pub enum RawAmount {
    Integer(U256),
    /// Non-integral feed values (e.g. `1.5`). Precision is best-effort.
    Fractional(f64),
}

impl RawAmount {
    /// Canonical decimal representation for storage.
    pub fn to_decimal_string(&self) -> String {
        match self {
            RawAmount::Integer(v) => v.to_string(),
            RawAmount::Fractional(f) => f.to_string(),
        }
    }

    /// Amount in whole units: `raw / 10^decimals`.
    pub fn to_units(&self, decimals: u8) -> f64 {
        match self {
            RawAmount::Integer(v) => {
                let exact = u128::try_from(*v)
                    .ok()
                    .and_then(|n| i128::try_from(n).ok())
                    .and_then(|n| Decimal::try_from_i128_with_scale(n, decimals as u32).ok())
                    .and_then(|d| d.to_f64());
                match exact {
                    Some(units) => units,
                    // Beyond Decimal's 96-bit mantissa or 28-digit scale
                    None => {
                        let raw = v.to_string().parse::<f64>().unwrap_or(f64::MAX);
                        raw / 10f64.powi(decimals as i32)
                    }
                }
            }
            RawAmount::Fractional(f) => f / 10f64.powi(decimals as i32),
        }
    }
}

fn parse_hex_u256(hex: &str) -> Option<U256> {
    if hex.is_empty() {
        return None;
    }
    U256::from_str_radix(hex, 16).ok()
}

fn parse_amount_str(s: &str) -> Option<RawAmount> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return parse_hex_u256(hex).map(RawAmount::Integer);
    }
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return U256::from_str_radix(s, 10).ok().map(RawAmount::Integer);
    }
    let d = Decimal::from_str(s).ok()?;
    if d.is_sign_negative() {
        return None;
    }
    d.to_f64().map(RawAmount::Fractional)
}

/// Parse a feed `value`: hex string, decimal string, or JSON number.
pub fn parse_raw_amount(value: &Value) -> Result<RawAmount, ActivityError> {
    let parsed = match value {
        Value::String(s) => parse_amount_str(s),
        Value::Number(n) => match n.as_u64() {
            Some(u) => Some(RawAmount::Integer(U256::from(u))),
            None => n
                .as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(RawAmount::Fractional),
        },
        _ => None,
    };
    parsed.ok_or_else(|| ActivityError::MalformedValue(value.to_string()))
}

/// Token decimals from metadata, hex (`"0x12"`) or decimal. Callers fall
/// back to 18 only when the field is absent.
pub fn parse_decimals(value: &Value) -> Result<u8, ActivityError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|d| u8::try_from(d).ok()),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u8::from_str_radix(hex, 16).ok(),
                None => s.parse::<u8>().ok(),
            }
        }
        _ => None,
    };
    parsed.ok_or_else(|| ActivityError::InvalidDecimals(value.to_string()))
}

/// Block number as sent by the feed, usually hex (`"0x12A5C20"`).
pub fn parse_block_number(value: &Value) -> Result<i64, ActivityError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => i64::from_str_radix(hex, 16).ok(),
                None => s.parse::<i64>().ok(),
            }
        }
        _ => None,
    };
    parsed
        .filter(|n| *n >= 0)
        .ok_or_else(|| ActivityError::InvalidBlockNumber(value.to_string()))
}

/// Integers at or above this are unix milliseconds, not seconds (~year 5138).
const UNIX_MILLIS_CUTOFF: u64 = 100_000_000_000;

/// Normalise a feed timestamp to RFC3339 UTC. Accepts RFC3339 strings, unix
/// seconds and unix milliseconds. Stored timestamps sort as text, so years
/// outside 0..=9999 are rejected.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ActivityError> {
    let raw = raw.trim();
    let parsed = match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(_) => raw.parse::<i64>().ok().and_then(|n| {
            if n.unsigned_abs() >= UNIX_MILLIS_CUTOFF {
                Utc.timestamp_millis_opt(n).single()
            } else {
                Utc.timestamp_opt(n, 0).single()
            }
        }),
    };
    parsed
        .filter(|ts| (0..=9999).contains(&ts.year()))
        .ok_or_else(|| ActivityError::InvalidTimestamp(raw.to_string()))
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Canonical address form: trimmed, lower-cased.
pub fn normalize_address(addr: &str) -> String {
    addr.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hex_value_with_18_decimals() {
        let amount = parse_raw_amount(&json!("0x1b1ae4d6e2ef500000")).unwrap();
        assert_eq!(amount.to_decimal_string(), "500000000000000000000");
        assert_eq!(amount.to_units(18), 500.0);
    }

    #[test]
    fn decimal_string_and_number() {
        let s = parse_raw_amount(&json!("2500000")).unwrap();
        assert_eq!(s.to_units(6), 2.5);

        let n = parse_raw_amount(&json!(1_000_000_000_000_000_000u64)).unwrap();
        assert_eq!(n.to_units(18), 1.0);

        let f = parse_raw_amount(&json!(1.5)).unwrap();
        assert_eq!(f, RawAmount::Fractional(1.5));
    }

    #[test]
    fn malformed_values_are_rejected() {
        for bad in [json!("not-a-number"), json!("0x"), json!("0xzz"), json!("-5"), json!(null), json!(true)] {
            assert!(
                matches!(parse_raw_amount(&bad), Err(ActivityError::MalformedValue(_))),
                "{} should be malformed",
                bad
            );
        }
    }

    #[test]
    fn huge_amounts_fall_back_to_float() {
        // 2^200, far past Decimal range
        let amount = parse_raw_amount(&json!(format!("0x1{}", "0".repeat(50)))).unwrap();
        let units = amount.to_units(18);
        assert!(units > 1e41 && units.is_finite());
    }

    #[test]
    fn decimals_and_block_numbers() {
        assert_eq!(parse_decimals(&json!(6)), Ok(6));
        assert_eq!(parse_decimals(&json!("0x12")), Ok(18));
        assert_eq!(parse_decimals(&json!("0X12")), Ok(18));
        assert_eq!(parse_decimals(&json!("8")), Ok(8));
        for bad in [json!("lots"), json!(300), json!("0x100"), json!(-1), json!(true)] {
            assert!(
                matches!(parse_decimals(&bad), Err(ActivityError::InvalidDecimals(_))),
                "{} should be rejected",
                bad
            );
        }

        assert_eq!(parse_block_number(&json!("0x12A5C20")).unwrap(), 0x12A5C20);
        assert_eq!(parse_block_number(&json!(19_000_000)).unwrap(), 19_000_000);
        assert!(parse_block_number(&json!("abc")).is_err());
    }

    #[test]
    fn timestamps_normalise_to_utc() {
        let ts = parse_timestamp("2024-03-01T12:00:00+02:00").unwrap();
        assert_eq!(format_timestamp(ts), "2024-03-01T10:00:00.000Z");
        let unix = parse_timestamp("1709294400").unwrap();
        assert_eq!(format_timestamp(unix), "2024-03-01T12:00:00.000Z");
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn millisecond_timestamps_are_not_read_as_seconds() {
        let ms = parse_timestamp("1709294400123").unwrap();
        assert_eq!(format_timestamp(ms), "2024-03-01T12:00:00.123Z");
        assert_eq!(ms.timestamp_millis(), 1_709_294_400_123);
    }

    #[test]
    fn out_of_range_years_are_rejected() {
        // years past 9999 or before 0 would break text ordering
        for bad in ["999999999999999", "9999999999999999", "-62198841600"] {
            assert!(
                matches!(parse_timestamp(bad), Err(ActivityError::InvalidTimestamp(_))),
                "{} should be rejected",
                bad
            );
        }
        let far = parse_timestamp("9999999999").unwrap();
        assert_eq!(format_timestamp(far), "2286-11-20T17:46:39.000Z");
    }
}
