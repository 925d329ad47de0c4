use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use common::types::{Position, Transfer};

use super::{within_days, SubScore};

const WINDOW_DAYS: i64 = 30;

/// Recent transaction volume and breadth of contracts touched.
pub fn score_activity(transfers: &[Transfer], _positions: &[Position], now: DateTime<Utc>) -> SubScore {
    let recent = within_days(transfers, now, WINDOW_DAYS);
    let contracts: BTreeSet<String> = recent
        .iter()
        .filter_map(|t| t.contract_address.as_deref())
        .filter(|c| !c.is_empty())
        .map(str::to_lowercase)
        .collect();

    let score = if recent.is_empty() {
        0.0
    } else {
        let tx_count_score = (recent.len() as f64 / 10.0).min(1.0);
        let contract_diversity = (contracts.len() as f64 / 5.0).min(1.0);
        0.6 * tx_count_score + 0.4 * contract_diversity
    };

    SubScore::new(score)
        .with("recent_tx_count", recent.len())
        .with("unique_contracts_30d", contracts.len())
}
