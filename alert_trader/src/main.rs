/// main.rs — Webhook trader entry point
///
/// FLOW:
///   1. Load config from .env (BINANCE_API_KEY, BINANCE_API_SECRET, ASSET_SYMBOL, ...)
///   2. Build the Binance gateway and the position coordinator
///   3. Set margin mode + leverage, size the position from live equity
///   4. Serve POST /webhook: alert text → direction → coordinator transition
///
/// A failed step 3 does not stop the process: the server still starts and
/// answers 503 to every alert until the next restart.
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use alert_trader::config::AppConfig;
use alert_trader::coordinator::Coordinator;
use alert_trader::live::BinanceGateway;
use alert_trader::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════╗");
    info!("║     ALERT TRADER  —  WEBHOOK → PERP FUTURES  ║");
    info!("╚══════════════════════════════════════════════╝");

    let cfg = AppConfig::from_env()?;
    if cfg.use_testnet {
        info!("TESTNET active — no real funds at risk ({})", cfg.rest_url);
    } else {
        warn!("⚠️  LIVE MODE — REAL MONEY — ensure all parameters are correct!");
    }
    info!(
        "Config: asset={} leverage={}x margin={} slippage={:.2}% flip_policy={}",
        cfg.asset,
        cfg.leverage,
        if cfg.is_cross { "cross" } else { "isolated" },
        cfg.slippage * 100.0,
        cfg.flip_policy
    );

    let gateway = BinanceGateway::new(
        &cfg.api_key,
        &cfg.api_secret,
        &cfg.rest_url,
        cfg.http_timeout(),
        cfg.recv_window_ms,
    )
    .context("HTTP client build failed")?;
    let coordinator = Arc::new(Coordinator::new(Arc::new(gateway), cfg.coordinator_settings()));

    // ── Initial sizing ────────────────────────────────────────────────────
    if cfg.has_credentials() {
        if let Err(reason) = coordinator.initialize().await {
            error!("Initialization failed, alerts will be refused until restart: {reason}");
        }
    } else {
        error!("BINANCE_API_KEY / BINANCE_API_SECRET not set; coordinator stays not ready");
    }

    if cfg.sizing_refresh_secs > 0 {
        spawn_sizing_refresh(
            Arc::clone(&coordinator),
            Duration::from_secs(cfg.sizing_refresh_secs),
        );
    }

    // ── Webhook server ────────────────────────────────────────────────────
    let addr: SocketAddr = format!("{}:{}", cfg.api_host, cfg.api_port)
        .parse()
        .with_context(|| format!("invalid API_HOST/API_PORT {}:{}", cfg.api_host, cfg.api_port))?;
    let state = AppState {
        coordinator:   Arc::clone(&coordinator),
        signal_ticker: cfg.signal_ticker.clone(),
    };
    server::serve(state, addr, shutdown_signal())
        .await
        .context("webhook server failed")?;

    let snap = coordinator.snapshot();
    info!(
        "Stopped with position {:?} {} {} (entry ${:.2})",
        snap.state, snap.size, snap.asset, snap.entry_price
    );
    Ok(())
}

/// Re-size from live margin at a fixed cadence while the coordinator is ready.
fn spawn_sizing_refresh(coordinator: Arc<Coordinator>, every: Duration) {
    info!("Sizing refresh every {}s", every.as_secs());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;
            match coordinator.refresh_sizing().await {
                Ok(snap) => debug!("Sizing refreshed: max {}", snap.max_position_size),
                Err(reason) => debug!("Sizing refresh skipped: {reason}"),
            }
        }
    });
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, shutting down"),
        Err(e) => {
            error!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    }
}
