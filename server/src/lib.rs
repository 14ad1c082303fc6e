//! HTTP service for the raspa scratch-card ledger.
//!
//! [`Server`] owns the ledger backend, the service configuration and the metrics; [`Api`]
//! turns it into an axum router. Ledger calls are blocking and run on tokio's blocking pool.

use raspa_execution::{LedgerStore, Settings};
use std::sync::Arc;

mod api;
pub use api::Api;

mod backend;
pub use backend::{Ledger, LedgerBackend};
mod config;
pub use config::{map_optional_limit, ServerConfig};
mod metrics;
pub use metrics::{
    GameMetrics, GameMetricsSnapshot, HttpMetrics, HttpMetricsSnapshot, LatencySnapshot,
};
mod postgres_ledger;
pub use postgres_ledger::PostgresLedger;
mod sqlite_ledger;
pub use sqlite_ledger::SqliteLedger;

pub struct Server {
    pub config: ServerConfig,
    ledger: Arc<dyn LedgerStore>,
    settings: Arc<dyn Settings>,
    http_metrics: HttpMetrics,
    game_metrics: GameMetrics,
}

impl Server {
    pub fn new(ledger: Ledger, config: ServerConfig) -> Self {
        Self {
            config,
            ledger: ledger.store,
            settings: ledger.settings,
            http_metrics: HttpMetrics::default(),
            game_metrics: GameMetrics::default(),
        }
    }

    /// Server over a fresh in-memory ledger.
    pub fn in_memory(config: ServerConfig) -> Self {
        Self::new(Ledger::memory(), config)
    }

    pub fn ledger(&self) -> &dyn LedgerStore {
        self.ledger.as_ref()
    }

    pub fn settings(&self) -> &dyn Settings {
        self.settings.as_ref()
    }

    pub fn http_metrics(&self) -> &HttpMetrics {
        &self.http_metrics
    }

    pub fn game_metrics(&self) -> &GameMetrics {
        &self.game_metrics
    }

    pub fn http_metrics_snapshot(&self) -> HttpMetricsSnapshot {
        self.http_metrics.snapshot()
    }

    pub fn game_metrics_snapshot(&self) -> GameMetricsSnapshot {
        self.game_metrics.snapshot()
    }
}
