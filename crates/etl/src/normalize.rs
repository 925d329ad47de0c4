//! Upstream encodings → canonical types.
//!
//! The provider mixes epoch numbers and ISO-8601 strings for timestamps, and
//! hex quantities, decimal strings and JSON numbers for balances. Everything
//! here is pure; callers decide whether a skipped record matters.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use num_bigint::BigUint;
use serde_json::Value;

use common::types::{ApiTokenBalance, ApiTransfer, Position, Transfer, TransferCategory};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("malformed timestamp: {0}")]
    MalformedTimestamp(String),
    #[error("malformed balance: {0}")]
    MalformedBalance(String),
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Epoch seconds (integer or float) or an ISO-8601 string. Naive strings and
/// bare dates are taken as UTC.
pub fn coerce_timestamp(value: &Value) -> Result<DateTime<Utc>, NormalizeError> {
    let malformed = || NormalizeError::MalformedTimestamp(value.to_string());
    match value {
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                return Utc.timestamp_opt(secs, 0).single().ok_or_else(malformed);
            }
            let secs = n.as_f64().filter(|f| f.is_finite()).ok_or_else(malformed)?;
            let millis = (secs * 1000.0).round() as i64;
            DateTime::from_timestamp_millis(millis).ok_or_else(malformed)
        }
        Value::String(s) => parse_iso(s.trim()).ok_or_else(malformed),
        _ => Err(malformed()),
    }
}

fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Token balance in base units. `null` and the empty quantity `0x` are zero.
pub fn parse_integer_balance(value: &Value) -> Result<BigUint, NormalizeError> {
    let malformed = || NormalizeError::MalformedBalance(value.to_string());
    match value {
        Value::Null => Ok(BigUint::ZERO),
        Value::Number(n) => n.as_u64().map(BigUint::from).ok_or_else(malformed),
        Value::String(s) => {
            let s = s.trim();
            let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some("") => return Ok(BigUint::ZERO),
                Some(hex) => (hex, 16),
                None => (s, 10),
            };
            if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
                return Err(malformed());
            }
            BigUint::parse_bytes(digits.as_bytes(), radix).ok_or_else(malformed)
        }
        _ => Err(malformed()),
    }
}

/// Lenient non-negative float: anything unusable becomes 0.0.
pub fn parse_numeric_value(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite() && *v >= 0.0).unwrap_or(0.0)
}

fn parse_block_number(raw: Option<&str>) -> Option<i64> {
    let s = raw?.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn non_empty_lower(s: Option<&str>) -> Option<String> {
    s.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

/// `Ok(None)` for records without a hash or block timestamp.
pub fn transfer_from_api(
    address: &str,
    raw: &ApiTransfer,
) -> Result<Option<Transfer>, NormalizeError> {
    let Some(hash) = non_empty_lower(raw.hash.as_deref()) else {
        return Ok(None);
    };
    let ts = raw
        .metadata
        .as_ref()
        .map_or(&Value::Null, |m| &m.block_timestamp);
    if ts.is_null() {
        return Ok(None);
    }

    Ok(Some(Transfer {
        hash,
        address: address.to_lowercase(),
        from_address: non_empty_lower(raw.from.as_deref()),
        to_address: non_empty_lower(raw.to.as_deref()),
        block_number: parse_block_number(raw.block_num.as_deref()),
        timestamp: coerce_timestamp(ts)?,
        value: parse_numeric_value(&raw.value),
        category: raw
            .category
            .as_deref()
            .and_then(TransferCategory::from_str_loose),
        contract_address: non_empty_lower(
            raw.raw_contract.as_ref().and_then(|c| c.address.as_deref()),
        ),
        raw_payload: serde_json::to_value(raw).unwrap_or_default(),
    }))
}

/// `Ok(None)` for records without a contract address.
pub fn position_from_api(
    address: &str,
    raw: &ApiTokenBalance,
    observed_at: DateTime<Utc>,
) -> Result<Option<Position>, NormalizeError> {
    let Some(token_contract) = non_empty_lower(raw.contract_address.as_deref()) else {
        return Ok(None);
    };
    Ok(Some(Position {
        address: address.to_lowercase(),
        token_contract,
        balance: parse_integer_balance(&raw.token_balance)?,
        protocol: None,
        usd_value: None,
        observed_at,
        raw_payload: serde_json::to_value(raw).unwrap_or_default(),
    }))
}
