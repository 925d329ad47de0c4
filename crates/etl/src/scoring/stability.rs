use chrono::{DateTime, Utc};
use common::types::{Position, Transfer, TransferCategory};

use super::{active_tokens, round_to, stablecoin_share, within_days, SubScore, TokenLists};

const SELL_WINDOW_DAYS: i64 = 30;
const MATURE_AGE_DAYS: f64 = 730.0;

pub fn score_stability(
    transfers: &[Transfer],
    positions: &[Position],
    now: DateTime<Utc>,
    lists: &TokenLists,
) -> SubScore {
    let (stablecoin_ratio, _) = stablecoin_share(&active_tokens(positions), lists);

    let age_days = wallet_age_days(transfers, now);
    let age_score = (age_days as f64 / MATURE_AGE_DAYS).min(1.0);

    let recent = within_days(transfers, now, SELL_WINDOW_DAYS);
    let sells = recent
        .iter()
        .filter(|t| {
            matches!(
                t.category,
                Some(TransferCategory::Erc20 | TransferCategory::External)
            ) && t.value > 0.0
        })
        .count();
    let panic_indicator = if recent.is_empty() {
        0.7
    } else {
        let sell_ratio = sells as f64 / recent.len() as f64;
        1.0 - (2.0 * sell_ratio).min(1.0)
    };

    SubScore::new(0.3 * stablecoin_ratio + 0.4 * age_score + 0.3 * panic_indicator)
        .with("stablecoin_ratio", round_to(stablecoin_ratio, 3))
        .with("wallet_age_days", age_days)
        .with("recent_sell_count", sells)
}

/// Whole days since the earliest transfer; 0 without history.
fn wallet_age_days(transfers: &[Transfer], now: DateTime<Utc>) -> i64 {
    transfers
        .iter()
        .map(|t| t.timestamp)
        .min()
        .map_or(0, |first| (now - first).num_days().max(0))
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_empty_wallet() {
        let s = score_stability(&[], &[], now(), &lists());
        assert!(approx(s.score, 0.21));
        assert_eq!(s.metrics["wallet_age_days"], 0);
        assert_eq!(s.metrics["recent_sell_count"], 0);
        assert_eq!(s.metrics["stablecoin_ratio"], 0.0);
    }

    #[test]
    fn test_old_quiet_stablecoin_holder() {
        let ts = [transfer(1, Duration::days(800), 1.0, None)];
        let s = score_stability(&ts, &[position(USDC, 100)], now(), &lists());
        // 0.3 * 1 + 0.4 * 1 + 0.3 * 0.7
        assert!(approx(s.score, 0.91));
        assert_eq!(s.metrics["wallet_age_days"], 800);
    }

    #[test]
    fn test_heavy_recent_selling_zeroes_panic_indicator() {
        let ts = [
            transfer(1, Duration::days(365), 0.0, None),
            transfer(2, Duration::days(2), 5.0, Some("0xtoken")),
            transfer(3, Duration::days(1), 3.0, None),
        ];
        let s = score_stability(&ts, &[], now(), &lists());
        assert_eq!(s.metrics["recent_sell_count"], 2);
        assert!(approx(s.score, 0.4 * 365.0 / 730.0));
    }

    #[test]
    fn test_future_timestamp_never_gives_negative_age() {
        let ts = [transfer(1, -Duration::days(3), 0.0, None)];
        assert_eq!(wallet_age_days(&ts, now()), 0);
    }
}
