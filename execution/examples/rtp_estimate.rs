//! Monte Carlo estimate of the realized return for every allowed stake.
//!
//! Prints CSV with one row per stake. Each row carries the observed return and hit rate next to
//! the closed-form return from the band probabilities.

use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};
use raspa_execution::prize::{compute_prize, theoretical_return, RngDraw, BASE_MULTIPLIERS};
use raspa_types::{Money, Rtp, ALLOWED_BETS};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rounds simulated per stake.
    #[arg(long, default_value_t = 200_000)]
    trials: u64,

    /// RTP percentage applied to payouts (not range checked).
    #[arg(long, default_value = "95")]
    rtp: Rtp,

    /// Simulate a single stake (e.g. "10.00") instead of every allowed stake.
    #[arg(long)]
    bet: Option<Money>,

    /// Seed for the draw sequence.
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Print the per-multiplier hit distribution to stderr.
    #[arg(long, default_value_t = false)]
    distribution: bool,
}

#[derive(Default, Clone)]
struct Stats {
    trials: u64,
    total_net: f64,
    total_net_sq: f64,
    total_wagered: f64,
    hits: BTreeMap<u32, u64>,
}

impl Stats {
    fn add(&mut self, wagered: Money, returned: Money, base_multiplier: u32) {
        let net = returned.to_f64() - wagered.to_f64();
        self.trials += 1;
        self.total_net += net;
        self.total_net_sq += net * net;
        self.total_wagered += wagered.to_f64();
        *self.hits.entry(base_multiplier).or_default() += 1;
    }

    fn mean_net(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.total_net / self.trials as f64
        }
    }

    fn mean_wagered(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.total_wagered / self.trials as f64
        }
    }

    fn observed_return(&self) -> f64 {
        let mw = self.mean_wagered();
        if mw == 0.0 {
            0.0
        } else {
            1.0 + self.mean_net() / mw
        }
    }

    fn hit_rate(&self) -> f64 {
        let losses = self.hits.get(&0).copied().unwrap_or(0);
        if self.trials == 0 {
            0.0
        } else {
            (self.trials - losses) as f64 / self.trials as f64
        }
    }

    fn stderr(&self) -> f64 {
        if self.trials <= 1 {
            return 0.0;
        }
        let mean = self.mean_net();
        let var = (self.total_net_sq / self.trials as f64) - mean * mean;
        let var = if var < 0.0 { 0.0 } else { var };
        (var / self.trials as f64).sqrt()
    }
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();
    info!(trials = args.trials, rtp = %args.rtp, seed = args.seed, "estimating return");

    let mut draw = RngDraw(StdRng::seed_from_u64(args.seed));
    let bets = match args.bet {
        Some(bet) => vec![bet],
        None => ALLOWED_BETS.to_vec(),
    };
    println!("bet,trials,observed_return,house_edge,hit_rate,stderr,theoretical_return");
    for bet in bets {
        let mut stats = Stats::default();
        for _ in 0..args.trials {
            let prize = compute_prize(&mut draw, bet, args.rtp);
            stats.add(bet, prize.amount, prize.base_multiplier);
        }
        println!(
            "{},{},{:.6},{:.6},{:.6},{:.6},{:.6}",
            bet,
            stats.trials,
            stats.observed_return(),
            1.0 - stats.observed_return(),
            stats.hit_rate(),
            stats.stderr(),
            theoretical_return(bet, args.rtp)
        );
        if args.distribution {
            eprintln!("bet={bet} multiplier,count,frequency");
            for multiplier in BASE_MULTIPLIERS {
                let count = stats.hits.get(&multiplier).copied().unwrap_or(0);
                eprintln!(
                    "{},{},{:.6}",
                    multiplier,
                    count,
                    count as f64 / stats.trials.max(1) as f64
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raspa_execution::FixedDraw;

    #[test]
    fn stats_track_return_and_hits() {
        let bet = Money::from_cents(1_000);
        let mut stats = Stats::default();
        stats.add(bet, Money::ZERO, 0);
        stats.add(bet, Money::from_cents(2_000), 2);
        assert_eq!(stats.trials, 2);
        assert!((stats.observed_return() - 1.0).abs() < 1e-9);
        assert!((stats.hit_rate() - 0.5).abs() < 1e-9);
        assert!(stats.stderr() > 0.0);
    }

    #[test]
    fn fixed_draw_in_one_x_band_breaks_even() {
        let bet = Money::from_cents(1_000);
        let mut stats = Stats::default();
        for _ in 0..10 {
            let prize = compute_prize(&mut FixedDraw(0.3), bet, Rtp::DEFAULT);
            stats.add(bet, prize.amount, prize.base_multiplier);
        }
        assert!((stats.observed_return() - 1.0).abs() < 1e-9);
        assert_eq!(stats.hits.get(&1), Some(&10));
        assert_eq!(stats.stderr(), 0.0);
    }

    #[test]
    fn empty_stats_are_zero() {
        let stats = Stats::default();
        assert_eq!(stats.observed_return(), 0.0);
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.stderr(), 0.0);
    }
}
