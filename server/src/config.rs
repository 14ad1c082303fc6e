use serde::Serialize;
use std::path::PathBuf;

const DEFAULT_HTTP_RATE_LIMIT_PER_SECOND: u64 = 200;
const DEFAULT_HTTP_RATE_LIMIT_BURST: u32 = 1_000;
const DEFAULT_PLAY_RATE_LIMIT_PER_MINUTE: u64 = 600;
const DEFAULT_PLAY_RATE_LIMIT_BURST: u32 = 20;
const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 64 * 1024;
const DEFAULT_POSTGRES_POOL_SIZE: usize = 8;

#[derive(Clone, Debug, Serialize)]
pub struct ServerConfig {
    pub http_rate_limit_per_second: Option<u64>,
    pub http_rate_limit_burst: Option<u32>,
    pub play_rate_limit_per_minute: Option<u64>,
    pub play_rate_limit_burst: Option<u32>,
    pub http_body_limit_bytes: Option<usize>,
    pub allowed_origins: Vec<String>,
    pub allow_no_origin: bool,
    pub sqlite_path: Option<PathBuf>,
    pub postgres_pool_size: usize,
    #[serde(skip)]
    pub postgres_url: Option<String>,
    /// Required for `/admin/*`; admin routes refuse every request when unset.
    #[serde(skip)]
    pub admin_token: Option<String>,
    /// Guards `/metrics/*` when set.
    #[serde(skip)]
    pub metrics_token: Option<String>,
    /// Shared secret the payment gateway presents when confirming a deposit. The admin token is
    /// accepted as well; with neither set, confirmations are refused.
    #[serde(skip)]
    pub deposit_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_rate_limit_per_second: Some(DEFAULT_HTTP_RATE_LIMIT_PER_SECOND),
            http_rate_limit_burst: Some(DEFAULT_HTTP_RATE_LIMIT_BURST),
            play_rate_limit_per_minute: Some(DEFAULT_PLAY_RATE_LIMIT_PER_MINUTE),
            play_rate_limit_burst: Some(DEFAULT_PLAY_RATE_LIMIT_BURST),
            http_body_limit_bytes: Some(DEFAULT_HTTP_BODY_LIMIT_BYTES),
            allowed_origins: Vec::new(),
            allow_no_origin: false,
            sqlite_path: None,
            postgres_pool_size: DEFAULT_POSTGRES_POOL_SIZE,
            postgres_url: None,
            admin_token: None,
            metrics_token: None,
            deposit_token: None,
        }
    }
}

impl ServerConfig {
    /// No rate limits, no origin checks. Handy for tests and local tooling.
    pub fn permissive() -> Self {
        Self {
            http_rate_limit_per_second: None,
            http_rate_limit_burst: None,
            play_rate_limit_per_minute: None,
            play_rate_limit_burst: None,
            allowed_origins: vec!["*".to_string()],
            allow_no_origin: true,
            ..Self::default()
        }
    }
}

/// Maps an optional arg value to Option: 0 => None, Some(v) => Some(v), None => default
pub fn map_optional_limit<T: Copy + PartialEq + From<u8>>(
    arg: Option<T>,
    default: Option<T>,
) -> Option<T> {
    match arg {
        Some(v) if v == T::from(0) => None,
        Some(v) => Some(v),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_disables_and_absent_keeps_default() {
        assert_eq!(map_optional_limit(Some(0u64), Some(5)), None);
        assert_eq!(map_optional_limit(Some(7u64), Some(5)), Some(7));
        assert_eq!(map_optional_limit(None, Some(5u32)), Some(5));
        assert_eq!(map_optional_limit::<usize>(None, None), None);
    }

    #[test]
    fn secrets_are_not_serialized() {
        let config = ServerConfig {
            postgres_url: Some("postgres://user:pw@10.0.0.2/raspa".to_string()),
            admin_token: Some("admin".to_string()),
            metrics_token: Some("metrics".to_string()),
            deposit_token: Some("gateway".to_string()),
            ..ServerConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("pw@"));
        assert!(!json.contains("admin_token"));
        assert!(!json.contains("metrics_token"));
        assert!(!json.contains("gateway"));
        assert!(json.contains("http_rate_limit_per_second"));
    }
}
