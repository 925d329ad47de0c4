use chrono::{DateTime, Utc};
use common::types::{Position, Transfer};

use super::{active_tokens, SubScore};

pub fn score_diversification(
    _transfers: &[Transfer],
    positions: &[Position],
    _now: DateTime<Utc>,
) -> SubScore {
    let n = active_tokens(positions).len();

    let score = if n == 0 {
        0.0
    } else {
        let token_count_score = (n as f64 / 10.0).min(1.0);
        // Concentration is approximated by breadth; a single token is fully concentrated.
        let concentration_score = if n > 1 { (n as f64 / 20.0).min(1.0) } else { 0.0 };
        0.7 * token_count_score + 0.3 * concentration_score
    };

    SubScore::new(score).with("unique_tokens", n)
}
