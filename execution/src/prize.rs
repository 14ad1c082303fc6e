//! Scratch-card payout engine.
//!
//! One uniform draw `r` in `[0, 1)` is compared against four ascending cut points. The cut
//! points start from a fixed base table and are widened by a stake-dependent bonus chance,
//! so larger stakes land in the paying bands more often:
//!
//! | band            | base cut | bonus weight | multiplier |
//! |-----------------|----------|--------------|------------|
//! | `r < t1`        | 0.02     | 0.15         | 10x        |
//! | `t1 <= r < t2`  | 0.07     | 0.30         | 5x         |
//! | `t2 <= r < t3`  | 0.22     | 0.40         | 2x         |
//! | `t3 <= r < t4`  | 0.50     | 0.15         | 1x         |
//! | otherwise       |          |              | 0x         |
//!
//! The chosen multiplier is then scaled by `rtp / 95.0`. Only the payout is scaled, the band
//! probabilities are not, so the realized return only approximates the configured RTP.

use rand::Rng;
use raspa_types::{Money, Rtp};
use rust_decimal::Decimal;

/// Base cut points for the 10x, 5x, 2x and 1x bands.
pub const BASE_THRESHOLDS: [f64; 4] = [0.02, 0.07, 0.22, 0.50];

/// Share of the bonus chance added to each cut point.
pub const BONUS_WEIGHTS: [f64; 4] = [0.15, 0.30, 0.40, 0.15];

/// Multipliers for each band, in band order. A draw past the last cut point pays nothing.
pub const BAND_MULTIPLIERS: [u32; 4] = [10, 5, 2, 1];

/// Every base multiplier the engine can produce.
pub const BASE_MULTIPLIERS: [u32; 5] = [0, 1, 2, 5, 10];

/// Stake floors (in cents) at which the bonus chance steps up.
const BONUS_STEPS: [(i64, f64); 5] = [
    (5_000, 0.15),
    (3_000, 0.12),
    (2_000, 0.09),
    (1_000, 0.06),
    (500, 0.03),
];

/// Source of uniform draws in `[0, 1)`.
pub trait Draw {
    fn next_unit(&mut self) -> f64;
}

/// Draws from any [`rand::Rng`].
pub struct RngDraw<R>(pub R);

impl<R: Rng> Draw for RngDraw<R> {
    fn next_unit(&mut self) -> f64 {
        self.0.gen::<f64>()
    }
}

/// Always yields the same value.
#[derive(Clone, Copy, Debug)]
pub struct FixedDraw(pub f64);

impl Draw for FixedDraw {
    fn next_unit(&mut self) -> f64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prize {
    pub draw: f64,
    /// Multiplier before RTP scaling, one of [`BASE_MULTIPLIERS`].
    pub base_multiplier: u32,
    /// `base_multiplier * rtp / 95.0`.
    pub multiplier: f64,
    pub amount: Money,
}

pub fn bonus_chance(bet: Money) -> f64 {
    BONUS_STEPS
        .iter()
        .find(|(floor, _)| bet.cents() >= *floor)
        .map(|(_, chance)| *chance)
        .unwrap_or(0.0)
}

pub fn thresholds(bonus_chance: f64) -> [f64; 4] {
    let mut cuts = BASE_THRESHOLDS;
    for (cut, weight) in cuts.iter_mut().zip(BONUS_WEIGHTS) {
        *cut += bonus_chance * weight;
    }
    cuts
}

/// Cut points are cumulative over one draw and must be checked in ascending order.
pub fn base_multiplier(draw: f64, bet: Money) -> u32 {
    let cuts = thresholds(bonus_chance(bet));
    cuts.iter()
        .zip(BAND_MULTIPLIERS)
        .find(|(cut, _)| draw < **cut)
        .map(|(_, multiplier)| multiplier)
        .unwrap_or(0)
}

pub fn scaled_multiplier(base: u32, rtp: Rtp) -> f64 {
    f64::from(base) * rtp.percent() / Rtp::BASELINE.percent()
}

/// `round2(bet * base * rtp / 95)`, half-up, computed in exact decimal arithmetic.
pub fn prize_amount(bet: Money, base: u32, rtp: Rtp) -> Money {
    if base == 0 {
        return Money::ZERO;
    }
    let raw = bet.to_decimal() * Decimal::from(base) * rtp.to_decimal()
        / Rtp::BASELINE.to_decimal();
    Money::from_decimal(raw).unwrap_or(Money::ZERO)
}

pub fn compute_prize_with_draw(bet: Money, rtp: Rtp, draw: f64) -> Prize {
    let base = base_multiplier(draw, bet);
    Prize {
        draw,
        base_multiplier: base,
        multiplier: scaled_multiplier(base, rtp),
        amount: prize_amount(bet, base, rtp),
    }
}

pub fn compute_prize<D: Draw + ?Sized>(draw: &mut D, bet: Money, rtp: Rtp) -> Prize {
    compute_prize_with_draw(bet, rtp, draw.next_unit())
}

/// Probability of each band for `bet`, in [`BAND_MULTIPLIERS`] order followed by the loss band.
pub fn band_probabilities(bet: Money) -> [f64; 5] {
    let cuts = thresholds(bonus_chance(bet));
    [
        cuts[0],
        cuts[1] - cuts[0],
        cuts[2] - cuts[1],
        cuts[3] - cuts[2],
        1.0 - cuts[3],
    ]
}

/// Expected payout per unit staked for `bet` at `rtp`.
pub fn theoretical_return(bet: Money, rtp: Rtp) -> f64 {
    let probabilities = band_probabilities(bet);
    let expected_base: f64 = BAND_MULTIPLIERS
        .iter()
        .zip(probabilities)
        .map(|(multiplier, probability)| f64::from(*multiplier) * probability)
        .sum();
    expected_base * rtp.percent() / Rtp::BASELINE.percent()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn cents(value: i64) -> Money {
        Money::from_cents(value)
    }

    #[test]
    fn bonus_chance_steps() {
        assert_eq!(bonus_chance(cents(50)), 0.0);
        assert_eq!(bonus_chance(cents(499)), 0.0);
        assert_eq!(bonus_chance(cents(500)), 0.03);
        assert_eq!(bonus_chance(cents(999)), 0.03);
        assert_eq!(bonus_chance(cents(1_000)), 0.06);
        assert_eq!(bonus_chance(cents(2_000)), 0.09);
        assert_eq!(bonus_chance(cents(3_000)), 0.12);
        assert_eq!(bonus_chance(cents(4_999)), 0.12);
        assert_eq!(bonus_chance(cents(5_000)), 0.15);
        assert_eq!(bonus_chance(cents(1_000_000)), 0.15);
    }

    #[test]
    fn thresholds_without_bonus_match_base_table() {
        assert_eq!(thresholds(0.0), BASE_THRESHOLDS);
    }

    #[test]
    fn thresholds_are_ascending_for_every_bonus() {
        for bet in raspa_types::ALLOWED_BETS {
            let cuts = thresholds(bonus_chance(bet));
            assert!(cuts.windows(2).all(|pair| pair[0] < pair[1]), "bet {bet}");
            assert!(cuts[3] < 1.0);
        }
    }

    #[test]
    fn minimum_stake_band_edges() {
        let bet = cents(50);
        assert_eq!(base_multiplier(0.0, bet), 10);
        assert_eq!(base_multiplier(0.019_999, bet), 10);
        assert_eq!(base_multiplier(0.02, bet), 5);
        assert_eq!(base_multiplier(0.069_999, bet), 5);
        assert_eq!(base_multiplier(0.07, bet), 2);
        assert_eq!(base_multiplier(0.22, bet), 1);
        assert_eq!(base_multiplier(0.499_999, bet), 1);
        assert_eq!(base_multiplier(0.50, bet), 0);
        assert_eq!(base_multiplier(0.999_999, bet), 0);
    }

    #[test]
    fn high_stake_widens_paying_bands() {
        // bonus 0.15: t1 = 0.0425, t4 = 0.5225
        let bet = cents(5_000);
        assert_eq!(base_multiplier(0.04, bet), 10);
        assert_eq!(base_multiplier(0.51, bet), 1);
        assert_eq!(base_multiplier(0.53, bet), 0);
        assert_eq!(base_multiplier(0.04, cents(50)), 5);
    }

    #[test]
    fn ten_x_at_baseline_rtp() {
        let prize = compute_prize_with_draw(cents(50), Rtp::DEFAULT, 0.019);
        assert_eq!(prize.base_multiplier, 10);
        assert_eq!(prize.multiplier, 10.0);
        assert_eq!(prize.amount, cents(500));
    }

    #[test]
    fn loss_pays_nothing() {
        let prize = compute_prize_with_draw(cents(50), Rtp::DEFAULT, 0.50);
        assert_eq!(prize.base_multiplier, 0);
        assert_eq!(prize.multiplier, 0.0);
        assert_eq!(prize.amount, Money::ZERO);
    }

    #[test]
    fn one_x_returns_the_stake() {
        // bonus 0.06 at 10.00: t3 = 0.244, t4 = 0.509
        let prize = compute_prize_with_draw(cents(1_000), Rtp::DEFAULT, 0.48);
        assert_eq!(prize.base_multiplier, 1);
        assert_eq!(prize.amount, cents(1_000));
    }

    #[test]
    fn rtp_scales_payout_with_half_up_rounding() {
        // 10.00 * 5 * 96.5 / 95 = 50.7894... -> 50.79
        let rtp = Rtp::from_hundredths(9_650);
        assert_eq!(prize_amount(cents(1_000), 5, rtp), cents(5_079));
        // 0.50 * 1 * 50 / 95 = 0.263... -> 0.26
        assert_eq!(prize_amount(cents(50), 1, Rtp::ADMIN_MIN), cents(26));
        // 1.50 * 2 * 99 / 95 = 3.1263... -> 3.13
        assert_eq!(prize_amount(cents(150), 2, Rtp::ADMIN_MAX), cents(313));
    }

    #[test]
    fn engine_applies_out_of_range_rtp_unchanged() {
        let prize = compute_prize_with_draw(cents(100), Rtp::from_hundredths(19_000), 0.01);
        assert_eq!(prize.multiplier, 20.0);
        assert_eq!(prize.amount, cents(2_000));
    }

    #[test]
    fn fixed_draw_feeds_engine() {
        let mut draw = FixedDraw(0.3);
        let prize = compute_prize(&mut draw, cents(200), Rtp::DEFAULT);
        assert_eq!(prize.draw, 0.3);
        assert_eq!(prize.base_multiplier, 1);
    }

    #[test]
    fn band_probabilities_sum_to_one() {
        for bet in raspa_types::ALLOWED_BETS {
            let total: f64 = band_probabilities(bet).iter().sum();
            assert!((total - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn theoretical_return_at_minimum_stake() {
        // 0.02*10 + 0.05*5 + 0.15*2 + 0.28*1 = 1.03
        let value = theoretical_return(cents(50), Rtp::DEFAULT);
        assert!((value - 1.03).abs() < 1e-9, "got {value}");
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let mut a = RngDraw(StdRng::seed_from_u64(7));
        let mut b = RngDraw(StdRng::seed_from_u64(7));
        for _ in 0..100 {
            assert_eq!(
                compute_prize(&mut a, cents(1_000), Rtp::DEFAULT),
                compute_prize(&mut b, cents(1_000), Rtp::DEFAULT)
            );
        }
    }

    proptest! {
        #[test]
        fn prop_base_multiplier_in_table(draw in 0.0f64..1.0, bet_idx in 0usize..15) {
            let bet = raspa_types::ALLOWED_BETS[bet_idx];
            let prize = compute_prize_with_draw(bet, Rtp::DEFAULT, draw);
            prop_assert!(BASE_MULTIPLIERS.contains(&prize.base_multiplier));
            prop_assert_eq!(prize.multiplier, f64::from(prize.base_multiplier));
        }

        #[test]
        fn prop_rtp_scales_baseline_multiplier(
            draw in 0.0f64..1.0,
            bet_idx in 0usize..15,
            rtp in 5_000u32..=9_900,
        ) {
            let bet = raspa_types::ALLOWED_BETS[bet_idx];
            let rtp = Rtp::from_hundredths(rtp);
            let baseline = compute_prize_with_draw(bet, Rtp::DEFAULT, draw);
            let scaled = compute_prize_with_draw(bet, rtp, draw);
            prop_assert_eq!(scaled.base_multiplier, baseline.base_multiplier);
            let expected = baseline.multiplier * rtp.percent() / 95.0;
            prop_assert!((scaled.multiplier - expected).abs() < 1e-9);
            prop_assert!(!scaled.amount.is_negative());
        }
    }
}
