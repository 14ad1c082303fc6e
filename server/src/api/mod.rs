use axum::{
    extract::{DefaultBodyLimit, Request, State as AxumState},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use governor::middleware::NoOpMiddleware;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::Server;

mod http;

pub struct Api {
    server: Arc<Server>,
}

#[derive(Clone)]
struct OriginConfig {
    allowed_origins: Arc<HashSet<String>>,
    allow_any_origin: bool,
    allow_no_origin: bool,
}

type IpGovernorConfig =
    tower_governor::governor::GovernorConfig<SmartIpKeyExtractor, NoOpMiddleware>;

fn default_governor_config() -> Option<IpGovernorConfig> {
    GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .finish()
}

/// Per-IP limiter allowing one request every `period_nanos / rate` after the burst is spent.
fn ip_governor(period_nanos: u64, rate: u64, burst_size: u32) -> Option<Arc<IpGovernorConfig>> {
    if rate == 0 || burst_size == 0 {
        return None;
    }
    let period = Duration::from_nanos((period_nanos / rate).max(1));
    GovernorConfigBuilder::default()
        .period(period)
        .burst_size(burst_size)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .or_else(|| {
            tracing::warn!("invalid rate-limit config; falling back to defaults");
            default_governor_config()
        })
        .map(Arc::new)
}

impl Api {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }

    pub fn router(&self) -> Router {
        let config = &self.server.config;
        let allowed_origins: HashSet<String> = config
            .allowed_origins
            .iter()
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();
        let allow_any_origin = allowed_origins.contains("*");
        if allowed_origins.is_empty() {
            tracing::warn!("no allowed origins configured; all browser origins will be rejected");
        }
        let cors_origins = allowed_origins
            .iter()
            .filter(|origin| *origin != "*")
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Invalid allowed origin: {}", origin);
                    None
                }
            })
            .collect::<Vec<_>>();
        let origin_config = OriginConfig {
            allowed_origins: Arc::new(allowed_origins),
            allow_any_origin,
            allow_no_origin: config.allow_no_origin,
        };

        let cors = if allow_any_origin {
            CorsLayer::new().allow_origin(AllowOrigin::any())
        } else {
            CorsLayer::new().allow_origin(AllowOrigin::list(cors_origins))
        }
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-request-id"),
            header::HeaderName::from_static("x-admin-token"),
            header::HeaderName::from_static("x-metrics-token"),
            header::HeaderName::from_static("x-deposit-token"),
        ])
        .expose_headers([header::HeaderName::from_static("x-request-id")]);

        // Environment variables override config
        let http_rate_per_sec =
            parse_env_u64("RATE_LIMIT_HTTP_PER_SEC").or(config.http_rate_limit_per_second);
        let http_rate_burst =
            parse_env_u32("RATE_LIMIT_HTTP_BURST").or(config.http_rate_limit_burst);
        let play_rate_per_min =
            parse_env_u64("RATE_LIMIT_PLAY_PER_MIN").or(config.play_rate_limit_per_minute);
        let play_rate_burst =
            parse_env_u32("RATE_LIMIT_PLAY_BURST").or(config.play_rate_limit_burst);

        let governor_conf = match (http_rate_per_sec, http_rate_burst) {
            (Some(rate), Some(burst)) => ip_governor(1_000_000_000, rate, burst),
            _ => None,
        };
        let play_governor_conf = match (play_rate_per_min, play_rate_burst) {
            (Some(rate), Some(burst)) => {
                tracing::info!(
                    rate_per_minute = rate,
                    burst_size = burst,
                    "play endpoint rate limit configured"
                );
                ip_governor(60_000_000_000, rate, burst)
            }
            _ => None,
        };

        // Playing gets its own, stricter limiter.
        let play_route = match play_governor_conf {
            Some(config) => Router::new()
                .route("/game/play", post(http::play))
                .layer(GovernorLayer { config }),
            None => Router::new().route("/game/play", post(http::play)),
        };

        let router = Router::new()
            .route("/healthz", get(http::healthz))
            .route("/config", get(http::config))
            .route("/game/bets", get(http::allowed_bets))
            .route("/users", post(http::create_user))
            .route("/users/:id", get(http::get_user))
            .route("/users/:id/rounds", get(http::user_rounds))
            .route("/deposits", post(http::create_deposit))
            .route("/deposits/:id/confirm", post(http::confirm_deposit))
            .route("/withdrawals", post(http::request_withdrawal))
            .route(
                "/admin/settings/rtp",
                get(http::get_rtp).put(http::put_rtp),
            )
            .route("/metrics/http", get(http::http_metrics))
            .route("/metrics/game", get(http::game_metrics))
            .route("/metrics/prometheus", get(http::prometheus_metrics));

        let router = match governor_conf {
            Some(config) => router.layer(GovernorLayer { config }),
            None => router,
        };

        let router = router.merge(play_route);

        let router = router.layer(cors);
        let router = router.layer(middleware::from_fn(move |req, next| {
            let origin_config = origin_config.clone();
            async move { enforce_origin(origin_config, req, next).await }
        }));
        let router = match config.http_body_limit_bytes {
            Some(limit) if limit > 0 => router.layer(DefaultBodyLimit::max(limit)),
            _ => router,
        };
        let router = router.layer(middleware::from_fn_with_state(
            self.server.clone(),
            request_id_middleware,
        ));
        let router = router.layer(TraceLayer::new_for_http());

        router.with_state(self.server.clone())
    }
}

fn parse_env_u64(var: &str) -> Option<u64> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

fn parse_env_u32(var: &str) -> Option<u32> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

async fn enforce_origin(config: OriginConfig, req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if let Some(origin) = origin {
        if !config.allow_any_origin && !config.allowed_origins.contains(origin) {
            return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
        }
    } else if !config.allow_no_origin {
        return (StatusCode::FORBIDDEN, "Origin required").into_response();
    }
    next.run(req).await
}

async fn request_id_middleware(
    AxumState(server): AxumState<Arc<Server>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get(header::HeaderName::from_static("x-request-id"))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let mut response = next.run(req).await;
    match response.status() {
        StatusCode::FORBIDDEN => server.http_metrics().inc_reject_origin(),
        StatusCode::PAYLOAD_TOO_LARGE => server.http_metrics().inc_reject_body_limit(),
        StatusCode::TOO_MANY_REQUESTS => server.http_metrics().inc_reject_rate_limit(),
        _ => {}
    }
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            header::HeaderName::from_static("x-request-id"),
            header_value,
        );
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "http.request"
    );
    response
}
