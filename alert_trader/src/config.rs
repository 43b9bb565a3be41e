/// config.rs — Centralised configuration loaded from .env
///
/// All parameters consumed by the webhook trader are defined here.
/// Loading happens once at startup; components receive the pieces they need.
use anyhow::{bail, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::coordinator::{CoordinatorSettings, FlipPolicy};

pub const DEFAULT_ASSET:    &str = "ETHUSDT";
pub const DEFAULT_LEVERAGE: u32  = 5;
/// Band around mid inside which IOC entries/exits may fill.
pub const DEFAULT_SLIPPAGE: f64  = 0.01;

#[derive(Debug, Clone)]
pub struct AppConfig {
    // ── Binance credentials ───────────────────────────────────────────
    pub api_key:     String,
    pub api_secret:  String,
    pub use_testnet: bool,

    // ── REST endpoint ────────────────────────────────────────────────
    pub rest_url:          String,
    pub http_timeout_secs: u64,
    pub recv_window_ms:    u64,

    // ── Traded asset & margin ────────────────────────────────────────
    /// The single perpetual the coordinator manages
    pub asset:    String,
    /// Leverage multiplier applied to usable margin
    pub leverage: u32,
    /// Cross margin (true) or isolated (false)
    pub is_cross: bool,
    /// Slippage tolerance as a fraction of mid (0.01 = 1%)
    pub slippage: f64,

    // ── Coordinator behaviour ────────────────────────────────────────
    pub flip_policy: FlipPolicy,
    /// Re-size from live margin every N seconds while ready (0 = never)
    pub sizing_refresh_secs: u64,

    // ── Webhook ingress ──────────────────────────────────────────────
    /// Only accept alerts for this ticker when set
    pub signal_ticker: Option<String>,
    pub api_host: String,
    pub api_port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables (after dotenv).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // ignore missing .env

        let api_key    = env::var("BINANCE_API_KEY").unwrap_or_default();
        let api_secret = env::var("BINANCE_API_SECRET").unwrap_or_default();
        let use_testnet = env::var("BINANCE_USE_TESTNET")
            .unwrap_or_else(|_| "true".into())
            .to_lowercase()
            == "true";

        let rest_url = env::var("BINANCE_FUTURES_REST_URL").unwrap_or_else(|_| {
            if use_testnet {
                "https://testnet.binancefuture.com".into()
            } else {
                "https://fapi.binance.com".into()
            }
        });

        let asset = env::var("ASSET_SYMBOL")
            .unwrap_or_else(|_| DEFAULT_ASSET.into())
            .trim()
            .to_uppercase();

        let signal_ticker = env::var("SIGNAL_TICKER")
            .ok()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty());

        let cfg = Self {
            api_key,
            api_secret,
            use_testnet,
            rest_url,
            http_timeout_secs: parse_env("HTTP_TIMEOUT_SECS", 10u64)?,
            recv_window_ms:    parse_env("RECV_WINDOW_MS", 5000u64)?,

            asset,
            leverage: parse_env("LEVERAGE", DEFAULT_LEVERAGE)?,
            is_cross: parse_env("IS_CROSS", true)?,
            slippage: parse_env("SLIPPAGE", DEFAULT_SLIPPAGE)?,

            flip_policy:         parse_env("FLIP_POLICY", FlipPolicy::HaltOnCloseFailure)?,
            sizing_refresh_secs: parse_env("SIZING_REFRESH_SECS", 0u64)?,

            signal_ticker,
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            api_port: parse_env("API_PORT", 8000u16)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.asset.is_empty() {
            bail!("Config key ASSET_SYMBOL: must not be empty");
        }
        if self.leverage == 0 {
            bail!("Config key LEVERAGE: must be at least 1");
        }
        if !(self.slippage > 0.0 && self.slippage < 1.0) {
            bail!("Config key SLIPPAGE: {} is outside (0, 1)", self.slippage);
        }
        if self.http_timeout_secs == 0 {
            bail!("Config key HTTP_TIMEOUT_SECS: must be at least 1");
        }
        Ok(())
    }

    /// Both halves of the API key pair are present.
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            asset:       self.asset.clone(),
            leverage:    self.leverage,
            is_cross:    self.is_cross,
            slippage:    self.slippage,
            flip_policy: self.flip_policy,
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Config key {key}: {e}")),
        Err(_) => Ok(default),
    }
}
