use async_trait::async_trait;

use crate::error::GatewayError;
use crate::models::Position;

/// Remote venue as seen by the coordinator.
///
/// `BinanceGateway` implements this for live trading; tests substitute
/// scripted in-memory venues. Every call is awaited to completion by the
/// coordinator while it holds its lock, so implementations must bound their
/// own latency (HTTP timeout).
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Account equity (wallet balance plus unrealized PnL).
    async fn query_margin(&self) -> Result<f64, GatewayError>;

    /// Current mid price of `asset`.
    async fn query_price(&self, asset: &str) -> Result<f64, GatewayError>;

    /// Margin mode and leverage, applied before the first order.
    async fn set_leverage(&self, asset: &str, leverage: u32, cross: bool) -> Result<(), GatewayError>;

    /// Open at market within `slippage` of mid; returns the average fill price.
    async fn open_market(
        &self,
        asset:    &str,
        is_long:  bool,
        size:     f64,
        slippage: f64,
    ) -> Result<f64, GatewayError>;

    /// Close `held` at market, trading opposite to its direction; returns the
    /// average fill price.
    async fn close_market(
        &self,
        asset:    &str,
        held:     &Position,
        slippage: f64,
    ) -> Result<f64, GatewayError>;
}
