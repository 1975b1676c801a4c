// =============================================================================
// REST API endpoints — Axum 0.7
// =============================================================================
//
// All domain errors map to the `{error: "..."}` envelope with a 4xx/5xx
// status; success responses are either domain JSON or
// `{success: bool, message?: ...}`. CORS is permissive for development.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::{uploads, ApiState};
use crate::engine::direct_query;
use crate::error::StoreError;
use crate::llm::presets::all_presets;
use crate::llm::prompts::{AccountContext, PromptBuilder, TradingConfig};
use crate::market_data::{Candle, IndicatorSeries, MarketSnapshot};
use crate::settings::BotConfig;
use crate::types::ControlState;

const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

type ApiError = (StatusCode, Json<Value>);
type ApiResult = Result<Json<Value>, ApiError>;

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

fn store_error(e: StoreError) -> ApiError {
    error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/index", get(index))
        // ── Account & history ───────────────────────────────────────
        .route("/api/account", get(account))
        .route("/api/account/history", get(account_history))
        .route("/api/decisions", get(decisions))
        .route("/api/positions", get(positions))
        .route("/api/status", get(status))
        .route("/api/stats", get(stats))
        // ── Bot control ─────────────────────────────────────────────
        .route("/api/bot/status", get(bot_status))
        .route("/api/bot/start", post(bot_start))
        .route("/api/bot/pause", post(bot_pause))
        .route("/api/bot/resume", post(bot_resume))
        .route("/api/bot/stop", post(bot_stop))
        // ── Operator input ──────────────────────────────────────────
        .route(
            "/api/user_input",
            get(get_user_input).post(post_user_input).delete(delete_user_input),
        )
        .route("/api/upload_image", post(uploads::upload_image))
        // ── Prompt presets ──────────────────────────────────────────
        .route("/api/prompt_presets", get(prompt_presets))
        .route(
            "/api/prompt_presets/active",
            get(get_active_preset).post(set_active_preset),
        )
        .route("/api/prompt_presets/preview/:name", get(preview_preset))
        .route("/api/prompt_presets/sample_user_prompt", get(sample_user_prompt))
        // ── Configuration ───────────────────────────────────────────
        .route("/api/bot_config", get(get_bot_config).post(post_bot_config))
        // ── Database ────────────────────────────────────────────────
        .route("/api/database/status", get(database_status))
        .route("/api/database/reset", post(database_reset))
        .route("/api/debug/database", get(debug_database))
        // ── Middleware & state ──────────────────────────────────────
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Index
// =============================================================================

async fn index() -> impl IntoResponse {
    Json(json!({
        "name": "helios-bot control plane",
        "endpoints": {
            "GET /api/account": "current account state (live) or latest snapshot (paper)",
            "GET /api/account/history?limit=N": "account snapshots, newest first",
            "GET /api/decisions?limit=N&coin=SYM": "decisions joined with outcomes",
            "GET /api/positions?status=open|closed|all&limit=N": "position history",
            "GET /api/status": "latest and recent status events",
            "GET /api/stats": "trade statistics over closed positions",
            "GET /api/bot/status": "engine state and next cycle time",
            "POST /api/bot/{start|pause|resume|stop}": "write the control token",
            "GET|POST|DELETE /api/user_input": "operator guidance (cycle) or direct queries (interrupt)",
            "POST /api/upload_image": "attach an image to operator input",
            "GET /api/prompt_presets": "available prompt presets",
            "GET|POST /api/prompt_presets/active": "read or switch the active preset",
            "GET /api/prompt_presets/preview/{name}": "render a preset's system prompt",
            "GET /api/prompt_presets/sample_user_prompt": "render a user prompt on sample data",
            "GET|POST /api/bot_config": "runtime configuration",
            "GET /api/database/status": "row counts and file size",
            "POST /api/database/reset?preserve_schema=true|false": "wipe stored history",
            "GET /api/debug/database?table=T&limit=N": "raw table dump (whitelisted)",
        }
    }))
}

// =============================================================================
// Account
// =============================================================================

#[derive(Deserialize)]
struct AccountParams {
    #[serde(default)]
    #[allow(dead_code)]
    network: Option<String>,
}

async fn account(
    State(state): State<Arc<ApiState>>,
    Query(_params): Query<AccountParams>,
) -> ApiResult {
    if state.settings.is_live() {
        let account = state
            .adapter
            .account_state(&Default::default())
            .await
            .map_err(|e| error(StatusCode::BAD_GATEWAY, e.to_string()))?;
        return Ok(Json(serde_json::to_value(account).unwrap_or_default()));
    }

    match state.store.latest_account_snapshot().map_err(store_error)? {
        Some(snapshot) => Ok(Json(serde_json::to_value(snapshot).unwrap_or_default())),
        None => Ok(Json(json!({
            "balance_usd": null,
            "message": "no account snapshots recorded yet",
        }))),
    }
}

#[derive(Deserialize)]
struct LimitParams {
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    50
}

async fn account_history(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<LimitParams>,
) -> ApiResult {
    let history = state
        .store
        .account_history(params.limit)
        .map_err(store_error)?;
    let count = history.len();
    Ok(Json(json!({ "history": history, "count": count })))
}

// =============================================================================
// Decisions & positions
// =============================================================================

#[derive(Deserialize)]
struct DecisionParams {
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    coin: Option<String>,
}

async fn decisions(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<DecisionParams>,
) -> ApiResult {
    let coin = params.coin.as_deref();
    let rows = match coin {
        Some(c) => state.store.decisions_by_coin(c, params.limit),
        None => state.store.recent_decisions(params.limit),
    }
    .map_err(store_error)?;
    let total = state.store.decisions_count(coin).map_err(store_error)?;
    let returned = rows.len();

    Ok(Json(json!({
        "decisions": rows,
        "total_count": total,
        "returned_count": returned,
    })))
}

#[derive(Deserialize)]
struct PositionParams {
    #[serde(default = "default_position_status")]
    status: String,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    #[allow(dead_code)]
    network: Option<String>,
}

fn default_position_status() -> String {
    "open".to_string()
}

async fn positions(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<PositionParams>,
) -> ApiResult {
    match params.status.as_str() {
        "open" => {
            // Live mode reads the venue directly (entry_time merged from the
            // store by the adapter); paper reads the store.
            if state.settings.is_live() {
                let account = state
                    .adapter
                    .account_state(&Default::default())
                    .await
                    .map_err(|e| error(StatusCode::BAD_GATEWAY, e.to_string()))?;
                return Ok(Json(json!({
                    "positions": account.positions,
                    "count": account.num_positions,
                })));
            }
            let rows = state.store.open_positions().map_err(store_error)?;
            let count = rows.len();
            Ok(Json(json!({ "positions": rows, "count": count })))
        }
        "closed" => {
            let rows = state
                .store
                .closed_positions(params.limit)
                .map_err(store_error)?;
            let count = rows.len();
            Ok(Json(json!({ "positions": rows, "count": count })))
        }
        "all" => {
            let rows = state.store.all_positions(params.limit).map_err(store_error)?;
            let count = rows.len();
            Ok(Json(json!({ "positions": rows, "count": count })))
        }
        other => Err(error(
            StatusCode::BAD_REQUEST,
            format!("invalid status '{other}': use open, closed, or all"),
        )),
    }
}

// =============================================================================
// Status & stats
// =============================================================================

async fn status(State(state): State<Arc<ApiState>>) -> ApiResult {
    let recent = state.store.recent_status(20).map_err(store_error)?;
    let latest = recent.first().cloned();
    Ok(Json(json!({
        "latest": latest,
        "recent": recent,
    })))
}

async fn stats(State(state): State<Arc<ApiState>>) -> ApiResult {
    let closed = state.store.closed_positions(500).map_err(store_error)?;
    let total_trades = closed.len();

    if total_trades == 0 {
        return Ok(Json(json!({
            "total_trades": 0,
            "win_rate": 0.0,
            "total_realized_pnl": 0.0,
            "profit_factor": 0.0,
        })));
    }

    let pnls: Vec<f64> = closed.iter().filter_map(|p| p.realized_pnl).collect();
    let wins = pnls.iter().filter(|p| **p > 0.0).count();
    let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
    let gross_loss: f64 = pnls.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    Ok(Json(json!({
        "total_trades": total_trades,
        "win_rate": wins as f64 / total_trades as f64,
        "total_realized_pnl": state.store.total_realized_pnl().map_err(store_error)?,
        "gross_profit": gross_profit,
        "gross_loss": gross_loss,
        "profit_factor": profit_factor,
    })))
}

// =============================================================================
// Bot control
// =============================================================================

async fn bot_status(State(state): State<Arc<ApiState>>) -> ApiResult {
    let config = BotConfig::load(&state.store);
    let next_cycle_time = state
        .store
        .get_setting("next_cycle_time")
        .map_err(store_error)?;

    Ok(Json(json!({
        "state": state.control.state().as_str(),
        "is_process_running": state.engine_alive.load(Ordering::SeqCst),
        "cycle_interval_seconds": config.execution_interval_seconds,
        "next_cycle_time": next_cycle_time,
        "mode": state.settings.trade_mode,
        "llm_model": state.llm.model(),
    })))
}

fn write_control(state: &ApiState, target: ControlState) -> ApiResult {
    state
        .control
        .set_state(target)
        .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    info!(state = %target, "control token written via API");
    Ok(Json(json!({
        "success": true,
        "state": target.as_str(),
    })))
}

async fn bot_start(State(state): State<Arc<ApiState>>) -> ApiResult {
    // The engine task lives in this process; starting means flipping the
    // token and nudging it awake.
    write_control(&state, ControlState::Running)
}

async fn bot_pause(State(state): State<Arc<ApiState>>) -> ApiResult {
    write_control(&state, ControlState::Paused)
}

async fn bot_resume(State(state): State<Arc<ApiState>>) -> ApiResult {
    if !state.engine_alive.load(Ordering::SeqCst) {
        return Err(error(
            StatusCode::CONFLICT,
            "engine process is not running; use start instead",
        ));
    }
    write_control(&state, ControlState::Running)
}

async fn bot_stop(State(state): State<Arc<ApiState>>) -> ApiResult {
    write_control(&state, ControlState::Stopped)
}

// =============================================================================
// Operator input
// =============================================================================

async fn get_user_input(State(state): State<Arc<ApiState>>) -> ApiResult {
    let active = state.store.get_active_operator_input().map_err(store_error)?;
    Ok(Json(json!({ "active": active })))
}

#[derive(Deserialize)]
struct UserInputBody {
    message: String,
    #[serde(default = "default_message_type")]
    message_type: String,
    #[serde(default)]
    image_path: Option<String>,
}

fn default_message_type() -> String {
    "cycle".to_string()
}

async fn post_user_input(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<UserInputBody>,
) -> ApiResult {
    let message = body.message.trim();
    if message.is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "message must not be empty"));
    }
    if body.message_type != "cycle" && body.message_type != "interrupt" {
        return Err(error(
            StatusCode::BAD_REQUEST,
            format!(
                "invalid message_type '{}': use cycle or interrupt",
                body.message_type
            ),
        ));
    }

    let id = state
        .store
        .save_operator_input(message, &body.message_type, body.image_path.as_deref())
        .map_err(store_error)?;
    info!(id, message_type = %body.message_type, "operator input saved");

    // Interrupt inputs bypass the cadence: answer inline, then archive so
    // they never leak into the next cycle's prompt.
    if body.message_type == "interrupt" {
        let answer = direct_query(&state.store, &state.llm, message)
            .await
            .map_err(|e| error(StatusCode::BAD_GATEWAY, e.to_string()))?;
        state.store.archive_operator_input(id).map_err(store_error)?;
        return Ok(Json(json!({
            "success": true,
            "id": id,
            "response": answer,
        })));
    }

    Ok(Json(json!({ "success": true, "id": id })))
}

async fn delete_user_input(State(state): State<Arc<ApiState>>) -> ApiResult {
    match state.store.get_active_operator_input().map_err(store_error)? {
        Some(active) => {
            state
                .store
                .archive_operator_input(active.id)
                .map_err(store_error)?;
            Ok(Json(json!({ "success": true, "archived_id": active.id })))
        }
        None => Ok(Json(json!({
            "success": true,
            "message": "no active input to archive",
        }))),
    }
}

// =============================================================================
// Prompt presets
// =============================================================================

async fn prompt_presets(State(state): State<Arc<ApiState>>) -> ApiResult {
    let active = BotConfig::load(&state.store).prompt_preset;
    let presets: Vec<Value> = all_presets()
        .iter()
        .map(|p| {
            json!({
                "name": p.name,
                "description": p.description,
                "active": p.name == active,
            })
        })
        .collect();
    Ok(Json(json!({ "presets": presets, "active": active })))
}

async fn get_active_preset(State(state): State<Arc<ApiState>>) -> ApiResult {
    Ok(Json(json!({
        "active": BotConfig::load(&state.store).prompt_preset,
    })))
}

#[derive(Deserialize)]
struct PresetBody {
    name: String,
}

async fn set_active_preset(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<PresetBody>,
) -> ApiResult {
    if crate::llm::presets::get_preset(&body.name).is_none() {
        return Err(error(
            StatusCode::BAD_REQUEST,
            format!("unknown prompt preset '{}'", body.name),
        ));
    }
    state
        .store
        .set_setting("prompt_preset", &body.name)
        .map_err(store_error)?;
    info!(preset = %body.name, "active prompt preset changed");
    Ok(Json(json!({ "success": true, "active": body.name })))
}

async fn preview_preset(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> ApiResult {
    if crate::llm::presets::get_preset(&name).is_none() {
        return Err(error(
            StatusCode::NOT_FOUND,
            format!("unknown prompt preset '{name}'"),
        ));
    }
    let config = BotConfig::load(&state.store);
    let builder = PromptBuilder::new(TradingConfig {
        min_position_size_usd: config.min_margin_usd,
        max_leverage: state.settings.max_leverage,
        preset_name: name.clone(),
        ..TradingConfig::default()
    });
    Ok(Json(json!({
        "preset": name,
        "system_prompt": builder.build_system_prompt(),
    })))
}

async fn sample_user_prompt(State(state): State<Arc<ApiState>>) -> ApiResult {
    let config = BotConfig::load(&state.store);
    let builder = PromptBuilder::new(TradingConfig {
        min_position_size_usd: config.min_margin_usd,
        max_leverage: state.settings.max_leverage,
        preset_name: config.prompt_preset,
        ..TradingConfig::default()
    });

    // Deterministic synthetic market so the preview is stable.
    let candles: Vec<Candle> = (0i64..80)
        .map(|i| {
            let base = 100_000.0 + (i as f64 * 0.4).sin() * 500.0 + i as f64 * 10.0;
            Candle {
                open_time: i * 180_000,
                open: base,
                high: base + 120.0,
                low: base - 120.0,
                close: base + 40.0,
                volume: 250.0 + (i as f64 * 0.9).cos().abs() * 100.0,
            }
        })
        .collect();

    let mut market = BTreeMap::new();
    market.insert(
        "BTC/USDC:USDC".to_string(),
        MarketSnapshot {
            coin: "BTC/USDC:USDC".to_string(),
            current_price: candles.last().map(|c| c.close).unwrap_or_default(),
            candle_age_secs: Some(30),
            funding_rate: Some(0.0001),
            open_interest: None,
            series: IndicatorSeries::compute(&candles),
        },
    );

    let mut limits = BTreeMap::new();
    limits.insert("BTC/USDC:USDC".to_string(), state.settings.max_leverage);

    let prompt = builder.build_user_prompt(
        &market,
        &AccountContext {
            available_cash: 1000.0,
            total_value: 1000.0,
            max_positions: config.max_open_positions,
            ..AccountContext::default()
        },
        15,
        None,
        &limits,
    );

    Ok(Json(json!({ "user_prompt": prompt })))
}

// =============================================================================
// Configuration
// =============================================================================

async fn get_bot_config(State(state): State<Arc<ApiState>>) -> ApiResult {
    let config = BotConfig::load(&state.store);
    Ok(Json(json!({
        "config": config,
        "known_keys": BotConfig::known_keys(),
    })))
}

async fn post_bot_config(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<serde_json::Map<String, Value>>,
) -> ApiResult {
    if body.is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "no settings provided"));
    }

    let mut advisories: Vec<String> = Vec::new();

    // Validate everything before writing anything, so a bad key rejects the
    // whole update.
    let mut updates: Vec<(String, String)> = Vec::new();
    for (key, value) in &body {
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(error(
                    StatusCode::BAD_REQUEST,
                    format!("setting '{key}' must be a string or number, got {other}"),
                ));
            }
        };
        match BotConfig::validate_update(key, &rendered) {
            Ok(Some(advisory)) => {
                warn!(key = %key, advisory = %advisory, "config advisory");
                advisories.push(advisory);
            }
            Ok(None) => {}
            Err(reason) => return Err(error(StatusCode::BAD_REQUEST, reason)),
        }
        updates.push((key.clone(), rendered));
    }

    for (key, value) in &updates {
        state.store.set_setting(key, value).map_err(store_error)?;
        info!(key = %key, value = %value, "setting updated via API");
    }

    Ok(Json(json!({
        "success": true,
        "updated": updates.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>(),
        "warnings": advisories,
        "config": BotConfig::load(&state.store),
    })))
}

// =============================================================================
// Database
// =============================================================================

async fn database_status(State(state): State<Arc<ApiState>>) -> ApiResult {
    let status = state.store.status().map_err(store_error)?;
    Ok(Json(serde_json::to_value(status).unwrap_or_default()))
}

#[derive(Deserialize)]
struct ResetParams {
    #[serde(default = "default_true")]
    preserve_schema: bool,
}

fn default_true() -> bool {
    true
}

async fn database_reset(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<ResetParams>,
) -> ApiResult {
    state
        .store
        .reset(params.preserve_schema)
        .map_err(store_error)?;
    warn!(preserve_schema = params.preserve_schema, "database reset via API");
    Ok(Json(json!({
        "success": true,
        "preserve_schema": params.preserve_schema,
    })))
}

#[derive(Deserialize)]
struct DebugParams {
    table: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

async fn debug_database(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<DebugParams>,
) -> ApiResult {
    match state.store.debug_table(&params.table, params.limit) {
        Ok(rows) => {
            let count = rows.len();
            Ok(Json(json!({
                "table": params.table,
                "rows": rows,
                "count": count,
            })))
        }
        Err(StoreError::TableNotAllowed(table)) => Err(error(
            StatusCode::BAD_REQUEST,
            format!("table '{table}' is not exposed for inspection"),
        )),
        Err(e) => Err(store_error(e)),
    }
}
