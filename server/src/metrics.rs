use raspa_types::Money;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const LATENCY_BUCKET_COUNT: usize = 12;
const LATENCY_BUCKETS_MS: [u64; LATENCY_BUCKET_COUNT] =
    [1, 2, 5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

#[derive(Clone, Debug, Serialize)]
pub struct LatencySnapshot {
    pub buckets_ms: Vec<u64>,
    pub counts: Vec<u64>,
    pub overflow: u64,
    pub count: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
}

#[derive(Default)]
struct LatencyMetrics {
    buckets: [AtomicU64; LATENCY_BUCKET_COUNT],
    overflow: AtomicU64,
    count: AtomicU64,
    total_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyMetrics {
    fn record(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);

        match LATENCY_BUCKETS_MS.iter().position(|bucket| ms <= *bucket) {
            Some(idx) => self.buckets[idx].fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total_ms = self.total_ms.load(Ordering::Relaxed);
        let avg_ms = if count > 0 {
            total_ms as f64 / count as f64
        } else {
            0.0
        };
        LatencySnapshot {
            buckets_ms: LATENCY_BUCKETS_MS.to_vec(),
            counts: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            overflow: self.overflow.load(Ordering::Relaxed),
            count,
            avg_ms,
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HttpMetricsSnapshot {
    pub play: LatencySnapshot,
    pub deposit_confirm: LatencySnapshot,
    pub withdrawal: LatencySnapshot,
    pub reject_origin: u64,
    pub reject_rate_limit: u64,
    pub reject_body_limit: u64,
}

#[derive(Default)]
pub struct HttpMetrics {
    play: LatencyMetrics,
    deposit_confirm: LatencyMetrics,
    withdrawal: LatencyMetrics,
    reject_origin: AtomicU64,
    reject_rate_limit: AtomicU64,
    reject_body_limit: AtomicU64,
}

impl HttpMetrics {
    pub fn record_play(&self, duration: Duration) {
        self.play.record(duration);
    }

    pub fn record_deposit_confirm(&self, duration: Duration) {
        self.deposit_confirm.record(duration);
    }

    pub fn record_withdrawal(&self, duration: Duration) {
        self.withdrawal.record(duration);
    }

    pub fn inc_reject_origin(&self) {
        self.reject_origin.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_rate_limit(&self) {
        self.reject_rate_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_body_limit(&self) {
        self.reject_body_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HttpMetricsSnapshot {
        HttpMetricsSnapshot {
            play: self.play.snapshot(),
            deposit_confirm: self.deposit_confirm.snapshot(),
            withdrawal: self.withdrawal.snapshot(),
            reject_origin: self.reject_origin.load(Ordering::Relaxed),
            reject_rate_limit: self.reject_rate_limit.load(Ordering::Relaxed),
            reject_body_limit: self.reject_body_limit.load(Ordering::Relaxed),
        }
    }
}

/// Totals over settled rounds. Amounts are in cents.
#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct GameMetricsSnapshot {
    pub rounds: u64,
    pub winning_rounds: u64,
    pub wagered_cents: u64,
    pub paid_cents: u64,
    pub invalid_bets: u64,
    pub insufficient_funds: u64,
    pub storage_errors: u64,
    pub deposits_credited: u64,
    pub rollovers_activated: u64,
}

#[derive(Default)]
pub struct GameMetrics {
    rounds: AtomicU64,
    winning_rounds: AtomicU64,
    wagered_cents: AtomicU64,
    paid_cents: AtomicU64,
    invalid_bets: AtomicU64,
    insufficient_funds: AtomicU64,
    storage_errors: AtomicU64,
    deposits_credited: AtomicU64,
    rollovers_activated: AtomicU64,
}

fn cents(amount: Money) -> u64 {
    u64::try_from(amount.cents()).unwrap_or(0)
}

impl GameMetrics {
    pub fn record_round(&self, bet: Money, prize: Money) {
        self.rounds.fetch_add(1, Ordering::Relaxed);
        if prize.is_positive() {
            self.winning_rounds.fetch_add(1, Ordering::Relaxed);
        }
        self.wagered_cents.fetch_add(cents(bet), Ordering::Relaxed);
        self.paid_cents.fetch_add(cents(prize), Ordering::Relaxed);
    }

    pub fn inc_invalid_bet(&self) {
        self.invalid_bets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_insufficient_funds(&self) {
        self.insufficient_funds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_storage_error(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deposit(&self, credited: bool, rollover_applied: bool) {
        if credited {
            self.deposits_credited.fetch_add(1, Ordering::Relaxed);
        }
        if rollover_applied {
            self.rollovers_activated.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> GameMetricsSnapshot {
        GameMetricsSnapshot {
            rounds: self.rounds.load(Ordering::Relaxed),
            winning_rounds: self.winning_rounds.load(Ordering::Relaxed),
            wagered_cents: self.wagered_cents.load(Ordering::Relaxed),
            paid_cents: self.paid_cents.load(Ordering::Relaxed),
            invalid_bets: self.invalid_bets.load(Ordering::Relaxed),
            insufficient_funds: self.insufficient_funds.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            deposits_credited: self.deposits_credited.load(Ordering::Relaxed),
            rollovers_activated: self.rollovers_activated.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_lands_in_first_covering_bucket() {
        let metrics = LatencyMetrics::default();
        metrics.record(Duration::from_millis(0));
        metrics.record(Duration::from_millis(7));
        metrics.record(Duration::from_millis(9_000));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.count, 3);
        assert_eq!(snapshot.counts[0], 1);
        assert_eq!(snapshot.counts[3], 1);
        assert_eq!(snapshot.overflow, 1);
        assert_eq!(snapshot.max_ms, 9_000);
    }

    #[test]
    fn game_totals_track_wins_and_amounts() {
        let metrics = GameMetrics::default();
        metrics.record_round(Money::from_cents(1_000), Money::ZERO);
        metrics.record_round(Money::from_cents(1_000), Money::from_cents(2_000));
        metrics.record_deposit(true, true);
        metrics.record_deposit(false, false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rounds, 2);
        assert_eq!(snapshot.winning_rounds, 1);
        assert_eq!(snapshot.wagered_cents, 2_000);
        assert_eq!(snapshot.paid_cents, 2_000);
        assert_eq!(snapshot.deposits_credited, 1);
        assert_eq!(snapshot.rollovers_activated, 1);
    }
}
