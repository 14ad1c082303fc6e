use crate::{PostgresLedger, ServerConfig, SqliteLedger};
use anyhow::{Context, Result};
use raspa_execution::{LedgerStore, Memory, Settings};
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LedgerBackend {
    /// In-process, lost on restart.
    #[default]
    Memory,
    Sqlite,
    Postgres,
}

pub struct Ledger {
    pub store: Arc<dyn LedgerStore>,
    pub settings: Arc<dyn Settings>,
}

impl Ledger {
    fn from_backend<T: LedgerStore + Settings + 'static>(backend: T) -> Self {
        let backend = Arc::new(backend);
        Self {
            store: backend.clone(),
            settings: backend,
        }
    }

    pub fn memory() -> Self {
        Self::from_backend(Memory::new())
    }

    pub fn open(backend: LedgerBackend, config: &ServerConfig) -> Result<Self> {
        let ledger = match backend {
            LedgerBackend::Memory => Self::memory(),
            LedgerBackend::Sqlite => {
                let path = config
                    .sqlite_path
                    .as_deref()
                    .context("--sqlite-path is required for the sqlite ledger")?;
                info!(path = %path.display(), "opening sqlite ledger");
                Self::from_backend(SqliteLedger::open(path)?)
            }
            LedgerBackend::Postgres => {
                let url = config
                    .postgres_url
                    .as_deref()
                    .context("--postgres-url is required for the postgres ledger")?;
                Self::from_backend(PostgresLedger::connect(url, config.postgres_pool_size)?)
            }
        };
        info!(?backend, "ledger ready");
        Ok(ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raspa_execution::{read_rtp, write_rtp};
    use raspa_types::Rtp;

    #[test]
    fn store_and_settings_share_one_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ServerConfig {
            sqlite_path: Some(dir.path().join("ledger.db")),
            ..ServerConfig::default()
        };
        let ledger = Ledger::open(LedgerBackend::Sqlite, &config).unwrap();
        write_rtp(ledger.settings.as_ref(), Rtp::from_hundredths(9_700)).unwrap();
        let user = ledger.store.create_account().unwrap();

        let reopened = Ledger::open(LedgerBackend::Sqlite, &config).unwrap();
        assert_eq!(
            read_rtp(reopened.settings.as_ref()).unwrap(),
            Rtp::from_hundredths(9_700)
        );
        assert!(reopened.store.account(user.id).unwrap().is_some());
    }

    #[test]
    fn memory_backend_needs_no_test_hooks() {
        let ledger = Ledger::open(LedgerBackend::Memory, &ServerConfig::default()).unwrap();
        let user = ledger.store.create_account().unwrap();
        assert_eq!(read_rtp(ledger.settings.as_ref()).unwrap(), Rtp::DEFAULT);
        assert!(ledger.store.lock(user.id).unwrap().is_some());
        assert!(ledger.store.account(user.id).unwrap().is_some());
    }

    #[test]
    fn missing_paths_are_reported() {
        let config = ServerConfig::default();
        assert!(Ledger::open(LedgerBackend::Sqlite, &config).is_err());
        assert!(Ledger::open(LedgerBackend::Postgres, &config).is_err());
    }
}
