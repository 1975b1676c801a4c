// =============================================================================
// Helios Bot — Main Entry Point
// =============================================================================
//
// Wires the store, ledger, exchange adapter, LLM client, control channel,
// API server, and cycle engine together, then waits for Ctrl+C.
//
// The engine's run state comes from the control token on disk: an absent
// token means stopped, so a fresh install does nothing until the operator
// posts /api/bot/start.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod control;
mod engine;
mod error;
mod exchange;
mod ledger;
mod llm;
mod market_data;
mod risk;
mod settings;
mod store;
mod types;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::ApiState;
use crate::control::ControlChannel;
use crate::engine::CycleEngine;
use crate::exchange::live::LiveExchange;
use crate::exchange::paper::PaperExchange;
use crate::exchange::provider::{api_url, ExchangeClient};
use crate::exchange::ExchangeAdapter;
use crate::ledger::Ledger;
use crate::llm::client::LlmClient;
use crate::market_data::fetcher::{HttpMarketData, MarketDataSource};
use crate::settings::Settings;
use crate::store::Store;
use crate::types::{ControlState, TradeMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║            Helios Bot — Starting Up                     ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let settings = Arc::new(Settings::from_env().map_err(|e| {
        error!(error = %e, "configuration invalid — aborting");
        anyhow::anyhow!(e.to_string())
    })?);

    info!(
        mode = %settings.trade_mode,
        assets = ?settings.trading_assets,
        database = %settings.database_path().display(),
        "configuration loaded"
    );
    if settings.is_live() {
        warn!("LIVE TRADING MODE — real funds at risk");
        warn!(testnet = settings.exchange_testnet, "exchange network");
    } else {
        info!(
            initial_balance = settings.initial_balance,
            "paper trading mode — simulated funds"
        );
    }

    // ── 2. Store & control channel ───────────────────────────────────────
    let store = Store::open(settings.database_path())?;
    let control = Arc::new(ControlChannel::new(settings.control_token_path()));
    info!(state = %control.state(), "control token read");

    // ── 3. Collaborator clients ──────────────────────────────────────────
    let llm = Arc::new(LlmClient::new(
        settings.llm_api_key.clone(),
        settings.llm_model.clone(),
        settings.llm_max_tokens,
    ));

    let market: Arc<dyn MarketDataSource> =
        Arc::new(HttpMarketData::new(api_url(settings.exchange_testnet)));

    // ── 4. Execution backend ─────────────────────────────────────────────
    let (adapter, paper_ledger): (Arc<dyn ExchangeAdapter>, Option<Arc<Ledger>>) =
        match settings.trade_mode {
            TradeMode::Paper => {
                let ledger = Arc::new(Ledger::new(store.clone(), settings.initial_balance));
                (Arc::new(PaperExchange::new(ledger.clone())), Some(ledger))
            }
            TradeMode::Live => {
                let provider = Arc::new(ExchangeClient::new(
                    settings.exchange_api_key.clone(),
                    settings.exchange_api_secret.clone(),
                    settings.exchange_testnet,
                ));
                info!(base_url = provider.base_url(), "exchange provider initialised");
                (Arc::new(LiveExchange::new(provider, store.clone())), None)
            }
        };

    // ── 5. API server ────────────────────────────────────────────────────
    let engine_alive = Arc::new(AtomicBool::new(false));
    let api_state = Arc::new(ApiState {
        store: store.clone(),
        settings: settings.clone(),
        control: control.clone(),
        adapter: adapter.clone(),
        llm: llm.clone(),
        engine_alive: engine_alive.clone(),
    });

    let bind_addr = settings.bind_addr.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    // ── 6. Cycle engine ──────────────────────────────────────────────────
    let engine = CycleEngine::new(
        store.clone(),
        settings.clone(),
        control.clone(),
        llm,
        adapter,
        market,
        paper_ledger,
        engine_alive,
    );
    tokio::spawn(engine.run());

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping");

    if let Err(e) = control.set_state(ControlState::Stopped) {
        error!(error = %e, "failed to write stopped control token on shutdown");
    }
    let _ = store.append_status("stopped", Some("process shutdown"), None);

    info!("Helios Bot shut down complete.");
    Ok(())
}
