//! Wallet health heuristics.
//!
//! Five independent, pure sub-scorers map `(transfers, positions, now)` to a
//! score in [0, 1] plus named metrics; [`aggregate`] combines them into the
//! day's [`WalletHealthRecord`](common::types::WalletHealthRecord).

mod activity;
mod aggregate;
mod diversification;
mod profitability;
mod risk;
mod stability;

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use common::config::Scoring;
use common::types::{MetricMap, Position, Transfer};

pub use activity::score_activity;
pub use aggregate::{compute_health_record, round_to};
pub use diversification::score_diversification;
pub use profitability::score_profitability;
pub use risk::score_risk;
pub use stability::score_stability;

/// One sub-scorer's output.
#[derive(Debug, Clone, PartialEq)]
pub struct SubScore {
    pub score: f64,
    pub metrics: MetricMap,
}

impl SubScore {
    fn new(score: f64) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            metrics: MetricMap::new(),
        }
    }

    fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metrics.insert(key.to_string(), value.into());
        self
    }
}

/// Lowercased token classification lists.
#[derive(Debug, Clone, Default)]
pub struct TokenLists {
    stablecoins: BTreeSet<String>,
    high_risk_indicators: Vec<String>,
}

impl TokenLists {
    pub fn new<S, H>(stablecoins: S, high_risk_indicators: H) -> Self
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        H: IntoIterator,
        H::Item: AsRef<str>,
    {
        Self {
            stablecoins: stablecoins
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            high_risk_indicators: high_risk_indicators
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn from_config(cfg: &Scoring) -> Self {
        Self::new(&cfg.stablecoins, &cfg.high_risk_indicators)
    }

    /// `token` must already be lowercase.
    pub fn is_stablecoin(&self, token: &str) -> bool {
        self.stablecoins.contains(token)
    }

    /// `token` must already be lowercase.
    pub fn is_high_risk(&self, token: &str) -> bool {
        self.high_risk_indicators
            .iter()
            .any(|ind| token.contains(ind.as_str()))
    }
}

/// Transfers strictly newer than `now - days`.
fn within_days(transfers: &[Transfer], now: DateTime<Utc>, days: i64) -> Vec<&Transfer> {
    let cutoff = now - Duration::days(days);
    transfers.iter().filter(|t| t.timestamp > cutoff).collect()
}

/// Distinct lowercase token contracts with a positive balance.
fn active_tokens(positions: &[Position]) -> BTreeSet<String> {
    positions
        .iter()
        .filter(|p| p.is_active())
        .map(|p| p.token_contract.to_lowercase())
        .collect()
}

/// Share of active tokens on the stablecoin list, plus the count.
fn stablecoin_share(active: &BTreeSet<String>, lists: &TokenLists) -> (f64, usize) {
    if active.is_empty() {
        return (0.0, 0);
    }
    let count = active.iter().filter(|t| lists.is_stablecoin(t)).count();
    (count as f64 / active.len() as f64, count)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use common::types::{Position, Transfer, TransferCategory};
    use num_bigint::BigUint;

    pub const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
    pub const PEPE: &str = "0x6982508145454ce325ddbe47a25d4ec3d2311933";

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    pub fn lists() -> super::TokenLists {
        super::TokenLists::new([USDC], [PEPE])
    }

    pub fn transfer(n: usize, age: Duration, value: f64, contract: Option<&str>) -> Transfer {
        Transfer {
            hash: format!("0x{n:064x}"),
            address: "0xwallet".to_string(),
            from_address: Some("0xwallet".to_string()),
            to_address: Some("0xdest".to_string()),
            block_number: Some(n as i64),
            timestamp: now() - age,
            value,
            category: Some(if contract.is_some() {
                TransferCategory::Erc20
            } else {
                TransferCategory::External
            }),
            contract_address: contract.map(str::to_string),
            raw_payload: serde_json::Value::Null,
        }
    }

    pub fn position(token: &str, balance: u64) -> Position {
        Position {
            address: "0xwallet".to_string(),
            token_contract: token.to_string(),
            balance: BigUint::from(balance),
            protocol: None,
            usd_value: None,
            observed_at: now(),
            raw_payload: serde_json::Value::Null,
        }
    }

    pub fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }
}
