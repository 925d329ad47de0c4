use chrono::{DateTime, Utc};
use common::types::{Position, Transfer};

use super::{active_tokens, round_to, stablecoin_share, within_days, SubScore, TokenLists};

const LARGE_TX_WINDOW_DAYS: i64 = 30;
const LARGE_TX_MULTIPLIER: f64 = 10.0;

/// Portfolio safety. Higher means safer.
pub fn score_risk(
    transfers: &[Transfer],
    positions: &[Position],
    now: DateTime<Utc>,
    lists: &TokenLists,
) -> SubScore {
    let active = active_tokens(positions);
    if active.is_empty() {
        return SubScore::new(0.5)
            .with("stablecoin_ratio", 0.0)
            .with("stablecoin_count", 0)
            .with("high_risk_tokens", 0);
    }

    let (stablecoin_ratio, stablecoin_count) = stablecoin_share(&active, lists);
    let high_risk_count = active.iter().filter(|t| lists.is_high_risk(t)).count();
    let high_risk_ratio = high_risk_count as f64 / active.len() as f64;
    let large_ratio = large_tx_ratio(transfers, now);

    let score = 0.5 + 0.4 * stablecoin_ratio - 0.3 * high_risk_ratio - 0.2 * large_ratio;

    SubScore::new(score)
        .with("stablecoin_ratio", round_to(stablecoin_ratio, 3))
        .with("stablecoin_count", stablecoin_count)
        .with("high_risk_tokens", high_risk_count)
}

/// Share of recent transfers worth more than 10x the recent mean.
fn large_tx_ratio(transfers: &[Transfer], now: DateTime<Utc>) -> f64 {
    let recent = within_days(transfers, now, LARGE_TX_WINDOW_DAYS);
    if recent.is_empty() {
        return 0.0;
    }
    let total: f64 = recent.iter().map(|t| t.value).sum();
    let mean = total / recent.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let large = recent
        .iter()
        .filter(|t| t.value > LARGE_TX_MULTIPLIER * mean)
        .count();
    large as f64 / recent.len() as f64
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_no_positions_is_neutral_with_zero_metrics() {
        let s = score_risk(&[], &[], now(), &lists());
        assert!(approx(s.score, 0.5));
        assert_eq!(s.metrics["stablecoin_ratio"], 0.0);
        assert_eq!(s.metrics["stablecoin_count"], 0);
        assert_eq!(s.metrics["high_risk_tokens"], 0);
    }

    #[test]
    fn test_stablecoins_raise_and_speculative_tokens_lower() {
        let ps = [position(USDC, 10), position(PEPE, 10)];
        let s = score_risk(&[], &ps, now(), &lists());
        // 0.5 + 0.4 * 0.5 - 0.3 * 0.5
        assert!(approx(s.score, 0.55));
        assert_eq!(s.metrics["stablecoin_ratio"], 0.5);
        assert_eq!(s.metrics["stablecoin_count"], 1);
        assert_eq!(s.metrics["high_risk_tokens"], 1);
    }

    #[test]
    fn test_stablecoin_match_ignores_case() {
        let ps = [position(&USDC.to_uppercase().replacen("0X", "0x", 1), 1)];
        let s = score_risk(&[], &ps, now(), &lists());
        assert!(approx(s.score, 0.9));
    }

    #[test]
    fn test_all_speculative_is_clamped_above_zero() {
        let ps = [position(PEPE, 1)];
        let ts: Vec<_> = (0..10)
            .map(|i| transfer(i, Duration::days(1), 0.0, None))
            .chain([transfer(99, Duration::days(1), 1000.0, None)])
            .collect();
        let s = score_risk(&ts, &ps, now(), &lists());
        // 0.5 - 0.3 - 0.2 * (1 / 11)
        assert!(approx(s.score, 0.2 - 0.2 / 11.0));
        assert!(s.score >= 0.0);
    }

    #[test]
    fn test_large_tx_ratio_needs_a_nonzero_mean() {
        let zeros: Vec<_> = (0..5)
            .map(|i| transfer(i, Duration::days(1), 0.0, None))
            .collect();
        assert!(approx(large_tx_ratio(&zeros, now()), 0.0));
        assert!(approx(large_tx_ratio(&[], now()), 0.0));
    }

    #[test]
    fn test_old_large_transfers_do_not_count() {
        let ts: Vec<_> = (0..10)
            .map(|i| transfer(i, Duration::days(1), 1.0, None))
            .chain([transfer(99, Duration::days(60), 1000.0, None)])
            .collect();
        assert!(approx(large_tx_ratio(&ts, now()), 0.0));
    }
}
