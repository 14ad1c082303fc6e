use crate::Money;

/// Permitted stake values, ascending.
pub const ALLOWED_BETS: [Money; 15] = [
    Money::from_cents(50),
    Money::from_cents(100),
    Money::from_cents(150),
    Money::from_cents(200),
    Money::from_cents(300),
    Money::from_cents(500),
    Money::from_cents(1_000),
    Money::from_cents(1_500),
    Money::from_cents(2_000),
    Money::from_cents(2_500),
    Money::from_cents(3_000),
    Money::from_cents(3_500),
    Money::from_cents(4_000),
    Money::from_cents(4_500),
    Money::from_cents(5_000),
];

/// Settings key holding the return-to-player percentage.
pub const RTP_SETTING_KEY: &str = "rtp_percentage";

/// Default number of rounds returned by history queries.
pub const DEFAULT_ROUND_HISTORY: usize = 50;

/// Upper bound on rounds returned by a single history query.
pub const MAX_ROUND_HISTORY: usize = 500;

pub fn is_allowed_bet(bet: Money) -> bool {
    ALLOWED_BETS.contains(&bet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_bets_are_strictly_ascending() {
        assert!(ALLOWED_BETS.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(ALLOWED_BETS.iter().all(|bet| bet.is_positive()));
    }

    #[test]
    fn matches_to_the_cent() {
        assert!(is_allowed_bet(Money::from_cents(50)));
        assert!(is_allowed_bet("35.00".parse().unwrap()));
        assert!(!is_allowed_bet(Money::from_cents(51)));
        assert!(!is_allowed_bet(Money::ZERO));
        assert!(!is_allowed_bet(Money::from_cents(10_000)));
    }
}
