use chrono::{DateTime, Utc};
use common::types::{Position, Transfer};

use super::{round_to, within_days, SubScore};

const WINDOW_DAYS: i64 = 90;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Proxy for trading success from activity level and cadence. No price data
/// is consulted, so this is not PnL.
pub fn score_profitability(
    transfers: &[Transfer],
    _positions: &[Position],
    now: DateTime<Utc>,
) -> SubScore {
    let recent = within_days(transfers, now, WINDOW_DAYS);
    if recent.is_empty() {
        return SubScore::new(0.5)
            .with("tx_count_90d", 0)
            .with("avg_tx_value", 0.0)
            .with("activity_consistency", 0.0);
    }

    let activity_level = (recent.len() as f64 / 50.0).min(1.0);
    let consistency = cadence_consistency(&recent);
    let avg_value = recent.iter().map(|t| t.value).sum::<f64>() / recent.len() as f64;

    SubScore::new(0.5 * activity_level + 0.5 * consistency)
        .with("tx_count_90d", recent.len())
        .with("avg_tx_value", round_to(avg_value, 4))
        .with("activity_consistency", round_to(consistency, 3))
}

/// `min(1, 7 / (mean gap in days + 1))`; 0.3 with fewer than two transfers.
fn cadence_consistency(recent: &[&Transfer]) -> f64 {
    if recent.len() < 2 {
        return 0.3;
    }
    let mut times: Vec<_> = recent.iter().map(|t| t.timestamp).collect();
    times.sort_unstable();
    let gaps: Vec<f64> = times
        .windows(2)
        .map(|w| (w[1] - w[0]).num_seconds() as f64 / SECONDS_PER_DAY)
        .collect();
    let avg_gap = gaps.iter().sum::<f64>() / gaps.len() as f64;
    (7.0 / (avg_gap + 1.0)).min(1.0)
}
