use chrono::{DateTime, Utc};
use common::types::{MetricMap, Position, ScoreComponents, Transfer, WalletHealthRecord};

use super::{
    score_activity, score_diversification, score_profitability, score_risk, score_stability,
    SubScore, TokenLists,
};

const COMPONENT_WEIGHT: f64 = 0.2;

/// Round half away from zero to `dp` decimal places.
pub fn round_to(value: f64, dp: i32) -> f64 {
    let factor = 10f64.powi(dp);
    (value * factor).round() / factor
}

/// Score one wallet as of `now` and build the day's record.
pub fn compute_health_record(
    address: &str,
    transfers: &[Transfer],
    positions: &[Position],
    now: DateTime<Utc>,
    lists: &TokenLists,
) -> WalletHealthRecord {
    let activity = score_activity(transfers, positions, now);
    let diversification = score_diversification(transfers, positions, now);
    let risk = score_risk(transfers, positions, now, lists);
    let profitability = score_profitability(transfers, positions, now);
    let stability = score_stability(transfers, positions, now, lists);

    let components = ScoreComponents {
        activity: round_to(activity.score, 4),
        diversification: round_to(diversification.score, 4),
        risk: round_to(risk.score, 4),
        profitability: round_to(profitability.score, 4),
        stability: round_to(stability.score, 4),
    };
    let total_score = round_to(
        components
            .as_array()
            .iter()
            .map(|c| c * COMPONENT_WEIGHT)
            .sum(),
        4,
    );

    let mut metrics = merge_metrics(
        address,
        [
            ("activity", activity),
            ("diversification", diversification),
            ("risk", risk),
            ("profitability", profitability),
            ("stability", stability),
        ],
    );
    metrics.insert("transactions_count".to_string(), transfers.len().into());
    let held = positions.iter().filter(|p| p.is_active()).count();
    metrics.insert("positions_count".to_string(), held.into());

    WalletHealthRecord {
        address: address.to_lowercase(),
        date: now.date_naive(),
        components,
        total_score,
        metrics,
    }
}

/// Flatten per-scorer metrics. Equal duplicates are kept once; on a conflict
/// the earlier scorer wins and the clash is logged and counted.
fn merge_metrics<const N: usize>(address: &str, parts: [(&'static str, SubScore); N]) -> MetricMap {
    let mut merged = MetricMap::new();
    let mut owner: std::collections::BTreeMap<String, &'static str> = Default::default();

    for (scorer, part) in parts {
        for (key, value) in part.metrics {
            match merged.get(&key) {
                None => {
                    owner.insert(key.clone(), scorer);
                    merged.insert(key, value);
                }
                Some(existing) if *existing == value => {}
                Some(existing) => {
                    let kept_from = owner.get(&key).copied().unwrap_or("unknown");
                    tracing::warn!(
                        address,
                        key = %key,
                        kept_from,
                        kept = %existing,
                        dropped_from = scorer,
                        dropped = %value,
                        "conflicting metric key across scorers"
                    );
                    metrics::counter!("wallet_health_metric_key_conflicts_total", "key" => key)
                        .increment(1);
                }
            }
        }
    }
    merged
}
