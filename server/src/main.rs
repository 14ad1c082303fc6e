use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use raspa_execution::read_rtp;
use raspa_server::{map_optional_limit, Api, Ledger, LedgerBackend, Server, ServerConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_value(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Builds the OTLP span pipeline when an endpoint is configured.
fn otlp_tracer(endpoint: String) -> Result<opentelemetry_sdk::trace::SdkTracer> {
    let service_name = env_value("OTEL_SERVICE_NAME").unwrap_or_else(|| "raspa-server".to_string());
    let sampling_rate = env_value("OTEL_SAMPLING_RATE")
        .and_then(|value| value.parse::<f64>().ok())
        .map_or(1.0, |value| value.clamp(0.0, 1.0));
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .context("failed to build OTLP exporter")?;
    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
            sampling_rate,
        ))
        .with_resource(
            opentelemetry_sdk::Resource::builder_empty()
                .with_attributes([opentelemetry::KeyValue::new("service.name", service_name)])
                .build(),
        )
        .with_batch_exporter(exporter)
        .build();
    let tracer = provider.tracer("raspa-server");
    opentelemetry::global::set_tracer_provider(provider);
    Ok(tracer)
}

fn init_tracing() -> Result<()> {
    let Some(endpoint) = env_value("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
        return Ok(());
    };
    let tracer = otlp_tracer(endpoint)?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(LevelFilter::INFO))
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .init();
    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Ledger storage backend.
    #[arg(long, value_enum, default_value_t = LedgerBackend::Memory)]
    ledger: LedgerBackend,

    /// Path to the SQLite database (required with `--ledger sqlite`).
    #[arg(long)]
    sqlite_path: Option<PathBuf>,

    /// Postgres connection string (required with `--ledger postgres`; falls back to DATABASE_URL).
    #[arg(long)]
    postgres_url: Option<String>,

    /// Postgres connections held for ledger transactions (0 uses default).
    #[arg(long)]
    postgres_pool_size: Option<usize>,

    /// HTTP rate limit per IP in requests per second (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_per_second: Option<u64>,

    /// HTTP rate limit burst size (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_burst: Option<u32>,

    /// Play endpoint rate limit per IP in requests per minute (0 disables).
    #[arg(long)]
    play_rate_limit_per_minute: Option<u64>,

    /// Play endpoint rate limit burst size (0 disables).
    #[arg(long)]
    play_rate_limit_burst: Option<u32>,

    /// Max request body size in bytes (0 disables limit).
    #[arg(long)]
    http_body_limit_bytes: Option<usize>,
}

fn is_production() -> bool {
    matches!(
        std::env::var("NODE_ENV").as_deref(),
        Ok("production") | Ok("prod")
    )
}

fn env_flag(var: &str) -> bool {
    matches!(
        std::env::var(var).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes") | Ok("YES")
    )
}

fn build_config(args: &Args) -> Result<ServerConfig> {
    let defaults = ServerConfig::default();
    let allowed_origins = std::env::var("ALLOWED_HTTP_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect();
    let postgres_url = args.postgres_url.clone().or_else(|| env_value("DATABASE_URL"));
    if args.ledger == LedgerBackend::Sqlite && args.sqlite_path.is_none() {
        anyhow::bail!("--sqlite-path is required with --ledger sqlite");
    }
    if args.ledger == LedgerBackend::Postgres && postgres_url.is_none() {
        anyhow::bail!("--postgres-url (or DATABASE_URL) is required with --ledger postgres");
    }

    Ok(ServerConfig {
        http_rate_limit_per_second: map_optional_limit(args.http_rate_limit_per_second, defaults.http_rate_limit_per_second),
        http_rate_limit_burst: map_optional_limit(args.http_rate_limit_burst, defaults.http_rate_limit_burst),
        play_rate_limit_per_minute: map_optional_limit(args.play_rate_limit_per_minute, defaults.play_rate_limit_per_minute),
        play_rate_limit_burst: map_optional_limit(args.play_rate_limit_burst, defaults.play_rate_limit_burst),
        http_body_limit_bytes: map_optional_limit(args.http_body_limit_bytes, defaults.http_body_limit_bytes),
        allowed_origins,
        allow_no_origin: env_flag("ALLOW_HTTP_NO_ORIGIN"),
        sqlite_path: args.sqlite_path.clone(),
        postgres_pool_size: match args.postgres_pool_size {
            Some(0) | None => defaults.postgres_pool_size,
            Some(size) => size,
        },
        postgres_url,
        admin_token: env_value("ADMIN_AUTH_TOKEN"),
        metrics_token: env_value("METRICS_AUTH_TOKEN"),
        deposit_token: env_value("DEPOSIT_WEBHOOK_TOKEN"),
    })
}

fn require_env(var: &str) -> Result<String> {
    let value = std::env::var(var).unwrap_or_default();
    if value.trim().is_empty() {
        anyhow::bail!("Missing required env: {var}");
    }
    Ok(value)
}

fn require_positive_u64(var: &str) -> Result<()> {
    let value = require_env(var)?;
    let parsed: u64 = value
        .parse()
        .with_context(|| format!("Invalid {var}: {value}"))?;
    if parsed == 0 {
        anyhow::bail!("Invalid {var}: {value}");
    }
    Ok(())
}

fn ensure_production_env(args: &Args) -> Result<()> {
    if !is_production() {
        return Ok(());
    }

    require_env("ALLOWED_HTTP_ORIGINS")?;
    require_env("ADMIN_AUTH_TOKEN")?;
    require_env("METRICS_AUTH_TOKEN")?;
    require_positive_u64("RATE_LIMIT_HTTP_PER_SEC")?;
    require_positive_u64("RATE_LIMIT_HTTP_BURST")?;
    require_positive_u64("RATE_LIMIT_PLAY_PER_MIN")?;
    require_positive_u64("RATE_LIMIT_PLAY_BURST")?;
    if args.ledger == LedgerBackend::Memory {
        anyhow::bail!("the memory ledger is not allowed in production");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();

    // Create logger
    init_tracing()?;

    ensure_production_env(&args)?;
    let config = build_config(&args)?;

    // Opening a database blocks; keep it off the runtime threads.
    let backend = args.ledger;
    let ledger_config = config.clone();
    let ledger = tokio::task::spawn_blocking(move || Ledger::open(backend, &ledger_config))
        .await
        .context("ledger open task failed")??;
    let rtp = read_rtp(ledger.settings.as_ref()).context("read rtp setting")?;
    info!(%rtp, "rtp in effect");

    let server = Arc::new(Server::new(ledger, config));
    let api = Api::new(server);
    let app = api.router();

    // Start server
    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_flags_disable_limits() {
        let args = Args::parse_from([
            "raspa-server",
            "--http-rate-limit-per-second",
            "0",
            "--play-rate-limit-burst",
            "3",
            "--http-body-limit-bytes",
            "0",
        ]);
        let config = build_config(&args).expect("config should parse");
        assert_eq!(config.http_rate_limit_per_second, None);
        assert_eq!(config.play_rate_limit_burst, Some(3));
        assert_eq!(config.http_body_limit_bytes, None);
        assert_eq!(
            config.play_rate_limit_per_minute,
            ServerConfig::default().play_rate_limit_per_minute
        );
    }

    #[test]
    fn sqlite_backend_needs_a_path() {
        let args = Args::parse_from(["raspa-server", "--ledger", "sqlite"]);
        let err = build_config(&args).unwrap_err();
        assert!(err.to_string().contains("--sqlite-path"), "unexpected error: {err}");

        let args = Args::parse_from([
            "raspa-server",
            "--ledger",
            "sqlite",
            "--sqlite-path",
            "/tmp/raspa.db",
        ]);
        let config = build_config(&args).expect("config should parse");
        assert_eq!(config.sqlite_path, Some(PathBuf::from("/tmp/raspa.db")));
    }
}
