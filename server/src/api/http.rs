use axum::{
    extract::{rejection::JsonRejection, Path, Query, State as AxumState},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use raspa_execution::{
    can_withdraw, confirm_deposit as confirm_ledger_deposit,
    create_deposit as create_ledger_deposit, play_round, read_rtp,
    request_withdrawal as request_ledger_withdrawal, write_rtp, LedgerError, RngDraw,
};
use raspa_types::{
    api::{
        AccountResponse, AllowedBetsResponse, CreateDepositRequest, DepositConfirmationResponse,
        ErrorResponse, PlayRequest, RoundsResponse, RtpSetting, WithdrawalRequest,
        WithdrawalResponse,
    },
    Money, UserId, ALLOWED_BETS, DEFAULT_ROUND_HISTORY, MAX_ROUND_HISTORY,
};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::{LatencySnapshot, Server};

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

#[derive(Deserialize)]
pub(super) struct RoundsQuery {
    limit: Option<usize>,
}

/// Error surfaced to HTTP callers. Storage failures are logged and reported without detail.
#[derive(Debug)]
pub(super) struct ApiError {
    status: StatusCode,
    message: String,
    allowed_bets: Option<Vec<Money>>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            allowed_bets: None,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let status = match &err {
            LedgerError::InvalidBet { .. }
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::RolloverPending { .. }
            | LedgerError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            LedgerError::UserNotFound(_) | LedgerError::DepositNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            LedgerError::Storage(_) => {
                error!(error = %err, "ledger storage failure");
                return Self::internal();
            }
        };
        Self {
            status,
            message: err.to_string(),
            allowed_bets: err.allowed_bets().map(<[Money]>::to_vec),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            success: false,
            error: self.message,
            allowed_bets: self.allowed_bets,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Malformed bodies are a 400 like any other invalid input; oversized ones keep their 413.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        let status = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, rejection.body_text())
    })
}

fn count_error(server: &Server, err: &LedgerError) {
    match err {
        LedgerError::InvalidBet { .. } => server.game_metrics().inc_invalid_bet(),
        LedgerError::InsufficientFunds { .. } => server.game_metrics().inc_insufficient_funds(),
        LedgerError::Storage(_) => server.game_metrics().inc_storage_error(),
        _ => {}
    }
}

/// Runs a ledger operation on the blocking pool.
async fn run_blocking<T, F>(server: &Arc<Server>, task: F) -> Result<T, ApiError>
where
    F: FnOnce(&Server) -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    let worker = server.clone();
    let result = tokio::task::spawn_blocking(move || task(&worker))
        .await
        .map_err(|err| {
            error!(?err, "ledger task failed to complete");
            ApiError::internal()
        })?;
    result.map_err(|err| {
        count_error(server, &err);
        ApiError::from(err)
    })
}

pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

pub(super) async fn config(AxumState(server): AxumState<Arc<Server>>) -> Response {
    Json(server.config.clone()).into_response()
}

pub(super) async fn allowed_bets() -> Response {
    Json(AllowedBetsResponse {
        allowed_bets: ALLOWED_BETS.to_vec(),
    })
    .into_response()
}

pub(super) async fn create_user(AxumState(server): AxumState<Arc<Server>>) -> Response {
    let result = run_blocking(&server, |server| {
        server.ledger().create_account().map_err(LedgerError::from)
    })
    .await;
    match result {
        Ok(account) => {
            info!(user = %account.id, "account created");
            let can_withdraw = can_withdraw(&account);
            (
                StatusCode::CREATED,
                Json(AccountResponse {
                    account,
                    can_withdraw,
                }),
            )
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub(super) async fn get_user(
    AxumState(server): AxumState<Arc<Server>>,
    Path(id): Path<i64>,
) -> Response {
    let user = UserId(id);
    let result = run_blocking(&server, move |server| {
        server
            .ledger()
            .account(user)?
            .ok_or(LedgerError::UserNotFound(user))
    })
    .await;
    match result {
        Ok(account) => {
            let can_withdraw = can_withdraw(&account);
            Json(AccountResponse {
                account,
                can_withdraw,
            })
            .into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub(super) async fn user_rounds(
    AxumState(server): AxumState<Arc<Server>>,
    Path(id): Path<i64>,
    Query(query): Query<RoundsQuery>,
) -> Response {
    let user = UserId(id);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ROUND_HISTORY)
        .clamp(1, MAX_ROUND_HISTORY);
    let result = run_blocking(&server, move |server| {
        if server.ledger().account(user)?.is_none() {
            return Err(LedgerError::UserNotFound(user));
        }
        Ok(server.ledger().rounds(user, limit)?)
    })
    .await;
    match result {
        Ok(rounds) => Json(RoundsResponse { rounds }).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(super) async fn play(
    AxumState(server): AxumState<Arc<Server>>,
    payload: Result<Json<PlayRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };
    let start = Instant::now();
    let result = run_blocking(&server, move |server| {
        let mut draw = RngDraw(rand::thread_rng());
        play_round(
            server.ledger(),
            server.settings(),
            &mut draw,
            request.user_id,
            request.bet_amount,
        )
    })
    .await;
    server.http_metrics().record_play(start.elapsed());
    match result {
        Ok(outcome) => {
            server
                .game_metrics()
                .record_round(outcome.round.bet_amount, outcome.prize.amount);
            Json(outcome.response()).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub(super) async fn create_deposit(
    AxumState(server): AxumState<Arc<Server>>,
    payload: Result<Json<CreateDepositRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };
    let result = run_blocking(&server, move |server| {
        create_ledger_deposit(server.ledger(), request.user_id, request.amount)
    })
    .await;
    match result {
        Ok(deposit) => (StatusCode::CREATED, Json(deposit)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(super) async fn confirm_deposit(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Path(id): Path<i64>,
) -> Response {
    if let Some(status) = deposit_auth_error(
        &headers,
        server.config.deposit_token.as_deref(),
        server.config.admin_token.as_deref(),
    ) {
        warn!(deposit = id, "unauthenticated deposit confirmation rejected");
        return status.into_response();
    }
    let start = Instant::now();
    let result = run_blocking(&server, move |server| {
        confirm_ledger_deposit(server.ledger(), id)
    })
    .await;
    server.http_metrics().record_deposit_confirm(start.elapsed());
    match result {
        Ok(confirmation) => {
            server
                .game_metrics()
                .record_deposit(confirmation.credited, confirmation.rollover_applied);
            Json(DepositConfirmationResponse {
                deposit: confirmation.deposit,
                credited: confirmation.credited,
                rollover_applied: confirmation.rollover_applied,
            })
            .into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub(super) async fn request_withdrawal(
    AxumState(server): AxumState<Arc<Server>>,
    payload: Result<Json<WithdrawalRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };
    let start = Instant::now();
    let result = run_blocking(&server, move |server| {
        request_ledger_withdrawal(server.ledger(), request.user_id, request.amount)
    })
    .await;
    server.http_metrics().record_withdrawal(start.elapsed());
    match result {
        Ok((withdrawal, final_balance)) => Json(WithdrawalResponse {
            withdrawal,
            final_balance,
        })
        .into_response(),
        Err(err) => err.into_response(),
    }
}

pub(super) async fn get_rtp(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
) -> Response {
    if let Some(status) = admin_auth_error(&headers, server.config.admin_token.as_deref()) {
        return status.into_response();
    }
    let result = run_blocking(&server, |server| Ok(read_rtp(server.settings())?)).await;
    match result {
        Ok(rtp) => Json(RtpSetting { rtp }).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(super) async fn put_rtp(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    payload: Result<Json<RtpSetting>, JsonRejection>,
) -> Response {
    if let Some(status) = admin_auth_error(&headers, server.config.admin_token.as_deref()) {
        return status.into_response();
    }
    let setting = match json_body(payload) {
        Ok(setting) => setting,
        Err(err) => return err.into_response(),
    };
    let rtp = match setting.rtp.validate_admin_range() {
        Ok(rtp) => rtp,
        Err(err) => return ApiError::bad_request(err.to_string()).into_response(),
    };
    let result = run_blocking(&server, move |server| {
        Ok(write_rtp(server.settings(), rtp)?)
    })
    .await;
    match result {
        Ok(()) => {
            info!(%rtp, "rtp updated");
            Json(RtpSetting { rtp }).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub(super) async fn http_metrics(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
) -> Response {
    if let Some(status) = metrics_auth_error(&headers, server.config.metrics_token.as_deref()) {
        return status.into_response();
    }
    Json(server.http_metrics_snapshot()).into_response()
}

pub(super) async fn game_metrics(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
) -> Response {
    if let Some(status) = metrics_auth_error(&headers, server.config.metrics_token.as_deref()) {
        return status.into_response();
    }
    Json(server.game_metrics_snapshot()).into_response()
}

pub(super) async fn prometheus_metrics(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
) -> Response {
    if let Some(status) = metrics_auth_error(&headers, server.config.metrics_token.as_deref()) {
        return status.into_response();
    }
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        render_prometheus_metrics(&server),
    )
        .into_response()
}

fn bearer_or_header(headers: &HeaderMap, header_name: &str) -> (Option<String>, Option<String>) {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);
    let header_token = headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    (bearer, header_token)
}

/// Open when no token is configured.
fn metrics_auth_error(headers: &HeaderMap, token: Option<&str>) -> Option<StatusCode> {
    let token = token.filter(|token| !token.is_empty())?;
    let (bearer, header_token) = bearer_or_header(headers, "x-metrics-token");
    if bearer.as_deref() == Some(token) || header_token.as_deref() == Some(token) {
        None
    } else {
        Some(StatusCode::UNAUTHORIZED)
    }
}

/// Closed when no token is configured.
fn admin_auth_error(headers: &HeaderMap, token: Option<&str>) -> Option<StatusCode> {
    let Some(token) = token.filter(|token| !token.is_empty()) else {
        return Some(StatusCode::UNAUTHORIZED);
    };
    let (bearer, header_token) = bearer_or_header(headers, "x-admin-token");
    if bearer.as_deref() == Some(token) || header_token.as_deref() == Some(token) {
        None
    } else {
        Some(StatusCode::UNAUTHORIZED)
    }
}

/// Gateway token or admin token; closed when neither is configured.
fn deposit_auth_error(
    headers: &HeaderMap,
    deposit_token: Option<&str>,
    admin_token: Option<&str>,
) -> Option<StatusCode> {
    let deposit_token = deposit_token.filter(|token| !token.is_empty());
    let admin_token = admin_token.filter(|token| !token.is_empty());
    if deposit_token.is_none() && admin_token.is_none() {
        return Some(StatusCode::UNAUTHORIZED);
    }
    let (bearer, gateway_header) = bearer_or_header(headers, "x-deposit-token");
    let admin_header = headers
        .get("x-admin-token")
        .and_then(|value| value.to_str().ok());
    let presented = [bearer.as_deref(), gateway_header.as_deref(), admin_header];
    let matches = |token: Option<&str>| {
        token.is_some_and(|token| presented.iter().any(|value| *value == Some(token)))
    };
    if matches(deposit_token) || matches(admin_token) {
        None
    } else {
        Some(StatusCode::UNAUTHORIZED)
    }
}

fn render_prometheus_metrics(server: &Server) -> String {
    let http = server.http_metrics_snapshot();
    let game = server.game_metrics_snapshot();
    let mut out = String::new();

    append_histogram(&mut out, "raspa_http_play_latency_ms", &http.play);
    append_histogram(
        &mut out,
        "raspa_http_deposit_confirm_latency_ms",
        &http.deposit_confirm,
    );
    append_histogram(&mut out, "raspa_http_withdrawal_latency_ms", &http.withdrawal);
    append_counter(&mut out, "raspa_http_reject_origin_total", http.reject_origin);
    append_counter(
        &mut out,
        "raspa_http_reject_rate_limit_total",
        http.reject_rate_limit,
    );
    append_counter(
        &mut out,
        "raspa_http_reject_body_limit_total",
        http.reject_body_limit,
    );

    append_counter(&mut out, "raspa_game_rounds_total", game.rounds);
    append_counter(&mut out, "raspa_game_winning_rounds_total", game.winning_rounds);
    append_counter(&mut out, "raspa_game_wagered_cents_total", game.wagered_cents);
    append_counter(&mut out, "raspa_game_paid_cents_total", game.paid_cents);
    append_counter(&mut out, "raspa_game_invalid_bets_total", game.invalid_bets);
    append_counter(
        &mut out,
        "raspa_game_insufficient_funds_total",
        game.insufficient_funds,
    );
    append_counter(&mut out, "raspa_ledger_storage_errors_total", game.storage_errors);
    append_counter(
        &mut out,
        "raspa_deposits_credited_total",
        game.deposits_credited,
    );
    append_counter(
        &mut out,
        "raspa_rollovers_activated_total",
        game.rollovers_activated,
    );
    let realized = if game.wagered_cents > 0 {
        game.paid_cents as f64 / game.wagered_cents as f64
    } else {
        0.0
    };
    append_gauge(&mut out, "raspa_game_realized_return_ratio", realized);

    out
}

fn append_counter(out: &mut String, name: &str, value: u64) {
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn append_gauge(out: &mut String, name: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}

fn append_histogram(out: &mut String, name: &str, snapshot: &LatencySnapshot) {
    let _ = writeln!(out, "# TYPE {name} histogram");
    let mut cumulative = 0u64;
    for (bucket, count) in snapshot.buckets_ms.iter().zip(snapshot.counts.iter()) {
        cumulative = cumulative.saturating_add(*count);
        let _ = writeln!(out, "{name}_bucket{{le=\"{bucket}\"}} {cumulative}");
    }
    cumulative = cumulative.saturating_add(snapshot.overflow);
    let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(out, "{name}_count {}", snapshot.count);
    let sum = snapshot.avg_ms * snapshot.count as f64;
    let _ = writeln!(out, "{name}_sum {sum}");
}
