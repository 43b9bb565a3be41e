/// live.rs — Binance USDT-M Futures gateway (signed REST)
///
/// BINANCE FUTURES SIGNED REQUEST:
///   1. Build query string with the call's params
///   2. Append `timestamp` (server-synced) and `recvWindow`
///   3. Sign the query string with HMAC-SHA256 using the API secret
///   4. Append `signature`; send with the X-MBX-APIKEY header
///
/// ORDER TYPE USED:
///   Market-style entries and exits are sent as LIMIT + IOC at
///   mid × (1 ± slippage). The order takes liquidity immediately like a
///   MARKET order but never fills beyond the slippage bound; whatever does
///   not cross is expired by the venue. `newOrderRespType=RESULT` returns
///   the final `executedQty` / `avgPrice` in the response.
///
///   One-way position mode is assumed (positionSide = BOTH); close legs
///   carry `reduceOnly=true`.
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::models::{Direction, Position};
use crate::time_sync::TimeSync;

type HmacSha256 = Hmac<Sha256>;

/// marginType already set to the requested mode.
const NO_NEED_TO_CHANGE_MARGIN_TYPE: i64 = -4046;
/// Timestamp outside recvWindow.
const TIMESTAMP_OUTSIDE_WINDOW: i64 = -1021;

// ── Response types ────────────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
pub struct OrderResponse {
    #[serde(rename = "orderId")]
    pub order_id:     i64,
    pub symbol:       String,
    pub status:       String,
    pub side:         String,
    #[serde(rename = "origQty")]
    pub orig_qty:     String,
    #[serde(rename = "executedQty")]
    pub executed_qty: String,
    #[serde(rename = "avgPrice")]
    pub avg_price:    String,
}

#[derive(Deserialize, Debug)]
pub struct BinanceError {
    pub code: i64,
    pub msg:  String,
}

#[derive(Deserialize, Debug)]
struct AccountResponse {
    #[serde(rename = "totalMarginBalance")]
    total_margin_balance: String,
}

#[derive(Deserialize, Debug)]
struct BookTicker {
    #[serde(rename = "bidPrice")]
    bid_price: String,
    #[serde(rename = "askPrice")]
    ask_price: String,
}

#[derive(Deserialize, Debug)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize, Debug)]
struct SymbolInfo {
    symbol:  String,
    filters: Vec<serde_json::Value>,
}

// ── Symbol trading rules ──────────────────────────────────────────────────

/// Price tick and quantity step from PRICE_FILTER / LOT_SIZE.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolRules {
    pub tick_size:      f64,
    pub step_size:      f64,
    pub price_decimals: usize,
    pub qty_decimals:   usize,
}

impl SymbolRules {
    pub fn from_filters(filters: &[serde_json::Value]) -> Option<Self> {
        let field = |filter_type: &str, key: &str| -> Option<String> {
            filters
                .iter()
                .find(|f| f["filterType"].as_str() == Some(filter_type))
                .and_then(|f| f[key].as_str())
                .map(str::to_owned)
        };
        let tick = field("PRICE_FILTER", "tickSize")?;
        let step = field("LOT_SIZE", "stepSize")?;

        let tick_size: f64 = tick.parse().ok()?;
        let step_size: f64 = step.parse().ok()?;
        if tick_size <= 0.0 || step_size <= 0.0 {
            return None;
        }
        Some(Self {
            tick_size,
            step_size,
            price_decimals: decimals_of(&tick),
            qty_decimals:   decimals_of(&step),
        })
    }

    /// Nearest tick, rendered at tick precision.
    pub fn format_price(&self, price: f64) -> String {
        let ticks = (price / self.tick_size).round();
        format!("{:.*}", self.price_decimals, ticks * self.tick_size)
    }

    /// Floor to step so the venue never sees more than was sized.
    pub fn format_qty(&self, qty: f64) -> String {
        let steps = (qty / self.step_size + 1e-9).floor();
        format!("{:.*}", self.qty_decimals, steps * self.step_size)
    }
}

/// Significant decimals in a Binance step string ("0.00100000" → 3).
fn decimals_of(step: &str) -> usize {
    match step.split_once('.') {
        Some((_, frac)) => frac.trim_end_matches('0').len(),
        None => 0,
    }
}

/// Average fill price of an order result; `NoFill` when nothing executed.
pub fn fill_price(order: &OrderResponse) -> Result<f64, GatewayError> {
    let executed: f64 = order.executed_qty.parse().unwrap_or(0.0);
    let avg: f64 = order.avg_price.parse().unwrap_or(0.0);
    if executed > 0.0 && avg > 0.0 {
        Ok(avg)
    } else {
        Err(GatewayError::NoFill(format!(
            "order {} {} {} status={} executedQty={}",
            order.order_id, order.side, order.symbol, order.status, order.executed_qty
        )))
    }
}

// ── Request failures ──────────────────────────────────────────────────────

#[derive(Debug)]
enum ApiFailure {
    /// Connect/timeout/body errors, 5xx and rate limiting.
    Transport(String),
    /// Venue answered and refused the request.
    Venue { status: StatusCode, code: Option<i64>, msg: String },
    /// Failed before anything was sent (clock sync, signing).
    Local(GatewayError),
}

impl ApiFailure {
    fn venue_code(&self) -> Option<i64> {
        match self {
            ApiFailure::Venue { code, .. } => *code,
            ApiFailure::Transport(_) | ApiFailure::Local(_) => None,
        }
    }

    /// Venue refusals become `rejected(..)`; transport failures are a remote outage.
    fn into_gateway(self, rejected: impl FnOnce(String) -> GatewayError) -> GatewayError {
        match self {
            ApiFailure::Transport(msg) => GatewayError::RemoteUnavailable(msg),
            ApiFailure::Local(err) => err,
            ApiFailure::Venue { status, code, msg } => match code {
                Some(code) => rejected(format!("HTTP {status} code {code}: {msg}")),
                None => rejected(format!("HTTP {status}: {msg}")),
            },
        }
    }
}

// ── Binance gateway ───────────────────────────────────────────────────────

pub struct BinanceGateway {
    client:         Client,
    api_key:        String,
    api_secret:     String,
    base_url:       String,
    recv_window_ms: u64,
    time_sync:      TimeSync,
    rules_cache:    Mutex<HashMap<String, SymbolRules>>,
}

impl BinanceGateway {
    pub fn new(
        api_key:        &str,
        api_secret:     &str,
        base_url:       &str,
        timeout:        Duration,
        recv_window_ms: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.trim_end_matches('/').to_owned();
        Ok(Self {
            time_sync: TimeSync::new(client.clone(), &base_url),
            client,
            api_key: api_key.to_owned(),
            api_secret: api_secret.to_owned(),
            base_url,
            recv_window_ms,
            rules_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Sign a query string with HMAC-SHA256.
    fn sign(&self, query: &str) -> Result<String, GatewayError> {
        sign_query(&self.api_secret, query)
    }

    /// Send a signed request; returns the response body on HTTP 200.
    async fn signed(
        &self,
        method: Method,
        path:   &str,
        params: &[(&str, String)],
    ) -> Result<String, ApiFailure> {
        self.time_sync
            .ensure_synced()
            .await
            .map_err(ApiFailure::Local)?;

        let mut query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>();
        query.push(format!("recvWindow={}", self.recv_window_ms));
        query.push(format!("timestamp={}", self.time_sync.timestamp_ms()));
        let query = query.join("&");
        let signature = self.sign(&query).map_err(ApiFailure::Local)?;
        let full_params = format!("{query}&signature={signature}");

        let request = if method == Method::GET {
            self.client
                .get(format!("{}{}?{}", self.base_url, path, full_params))
        } else {
            self.client
                .request(method, format!("{}{}", self.base_url, path))
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(full_params)
        };

        let resp = request
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| ApiFailure::Transport(format!("{path}: {e}")))?;
        let result = read_body(path, resp).await;
        if result.as_ref().err().and_then(ApiFailure::venue_code) == Some(TIMESTAMP_OUTSIDE_WINDOW) {
            warn!("Clock drift rejected by venue, re-syncing server time");
            if let Err(e) = self.time_sync.sync().await {
                warn!("Time re-sync failed: {e}");
            }
        }
        result
    }

    async fn public_get(&self, path: &str, query: &str) -> Result<String, ApiFailure> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        let resp = self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiFailure::Transport(format!("{path}: {e}")))?;
        read_body(path, resp).await
    }

    /// Tick/step rules for `asset`, fetched once from exchangeInfo.
    async fn rules(&self, asset: &str) -> Result<SymbolRules, GatewayError> {
        if let Some(rules) = self.cached_rules(asset) {
            return Ok(rules);
        }

        let body = self
            .public_get("/fapi/v1/exchangeInfo", "")
            .await
            .map_err(|f| f.into_gateway(GatewayError::ConfigRejected))?;
        let info: ExchangeInfo = serde_json::from_str(&body)
            .map_err(|e| GatewayError::RemoteUnavailable(format!("malformed exchangeInfo: {e}")))?;
        let rules = info
            .symbols
            .iter()
            .find(|s| s.symbol == asset)
            .ok_or_else(|| GatewayError::ConfigRejected(format!("unknown symbol {asset}")))
            .and_then(|s| {
                SymbolRules::from_filters(&s.filters).ok_or_else(|| {
                    GatewayError::ConfigRejected(format!("{asset} has no PRICE_FILTER/LOT_SIZE"))
                })
            })?;

        debug!("{} rules: tick={} step={}", asset, rules.tick_size, rules.step_size);
        if let Ok(mut cache) = self.rules_cache.lock() {
            cache.insert(asset.to_owned(), rules.clone());
        }
        Ok(rules)
    }

    fn cached_rules(&self, asset: &str) -> Option<SymbolRules> {
        self.rules_cache.lock().ok()?.get(asset).cloned()
    }

    /// Marketable IOC limit order; returns the average fill price.
    async fn place_ioc(
        &self,
        asset:       &str,
        side:        &str,
        size:        f64,
        slippage:    f64,
        reduce_only: bool,
    ) -> Result<f64, GatewayError> {
        let rules = self.rules(asset).await?;
        let mid = self.query_price(asset).await?;
        let limit = if side == "BUY" {
            mid * (1.0 + slippage)
        } else {
            mid * (1.0 - slippage)
        };

        let qty = rules.format_qty(size);
        if qty.parse::<f64>().unwrap_or(0.0) <= 0.0 {
            return Err(GatewayError::OrderRejected(format!(
                "size {size} is below the {asset} step {}",
                rules.step_size
            )));
        }
        let price = rules.format_price(limit);

        let mut params = vec![
            ("symbol", asset.to_owned()),
            ("side", side.to_owned()),
            ("type", "LIMIT".to_owned()),
            ("timeInForce", "IOC".to_owned()),
            ("quantity", qty.clone()),
            ("price", price.clone()),
            ("newOrderRespType", "RESULT".to_owned()),
        ];
        if reduce_only {
            params.push(("reduceOnly", "true".to_owned()));
        }

        info!("Placing {} {} {} @ {} IOC (mid {:.4})", side, qty, asset, price, mid);

        let body = self
            .signed(Method::POST, "/fapi/v1/order", &params)
            .await
            .map_err(|f| {
                let err = f.into_gateway(GatewayError::OrderRejected);
                error!("Order placement failed: {err}");
                err
            })?;
        let order: OrderResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::NoFill(format!("unparseable order response: {e}")))?;

        let avg = fill_price(&order)?;
        info!(
            "Order filled: id={} {} {} qty={}/{}  avgPx={}",
            order.order_id, order.side, order.symbol,
            order.executed_qty, order.orig_qty, order.avg_price
        );
        Ok(avg)
    }
}

#[async_trait]
impl Gateway for BinanceGateway {
    async fn query_margin(&self) -> Result<f64, GatewayError> {
        let body = self
            .signed(Method::GET, "/fapi/v2/account", &[])
            .await
            .map_err(|f| f.into_gateway(GatewayError::ConfigRejected))?;
        let account: AccountResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::RemoteUnavailable(format!("malformed account response: {e}")))?;
        let equity: f64 = account
            .total_margin_balance
            .parse()
            .map_err(|e| GatewayError::RemoteUnavailable(format!("totalMarginBalance: {e}")))?;

        if equity <= 0.0 {
            return Err(GatewayError::InsufficientMargin { equity });
        }
        info!("Account equity: ${:.2}", equity);
        Ok(equity)
    }

    async fn query_price(&self, asset: &str) -> Result<f64, GatewayError> {
        let unavailable = |reason: String| GatewayError::PriceUnavailable {
            asset:  asset.to_owned(),
            reason,
        };
        let body = self
            .public_get("/fapi/v1/ticker/bookTicker", &format!("symbol={asset}"))
            .await
            .map_err(|f| f.into_gateway(unavailable))?;
        let ticker: BookTicker = serde_json::from_str(&body)
            .map_err(|e| unavailable(format!("malformed bookTicker: {e}")))?;

        let bid: f64 = ticker.bid_price.parse().unwrap_or(0.0);
        let ask: f64 = ticker.ask_price.parse().unwrap_or(0.0);
        let mid = (bid + ask) / 2.0;
        if !(bid > 0.0 && ask > 0.0 && mid > 0.0) {
            return Err(unavailable(format!("bid={} ask={}", ticker.bid_price, ticker.ask_price)));
        }
        debug!("{} mid price: {:.4}", asset, mid);
        Ok(mid)
    }

    async fn set_leverage(&self, asset: &str, leverage: u32, cross: bool) -> Result<(), GatewayError> {
        let margin_type = if cross { "CROSSED" } else { "ISOLATED" };
        let params = [
            ("symbol", asset.to_owned()),
            ("marginType", margin_type.to_owned()),
        ];
        match self.signed(Method::POST, "/fapi/v1/marginType", &params).await {
            Ok(_) => info!("Margin type {} set for {}", margin_type, asset),
            Err(f) if f.venue_code() == Some(NO_NEED_TO_CHANGE_MARGIN_TYPE) => {
                debug!("Margin type already {} for {}", margin_type, asset)
            }
            Err(f) => return Err(f.into_gateway(GatewayError::ConfigRejected)),
        }

        let params = [
            ("symbol", asset.to_owned()),
            ("leverage", leverage.to_string()),
        ];
        self.signed(Method::POST, "/fapi/v1/leverage", &params)
            .await
            .map_err(|f| f.into_gateway(GatewayError::ConfigRejected))?;
        info!("Set leverage {}x for {}", leverage, asset);

        self.rules(asset).await?;
        Ok(())
    }

    async fn open_market(
        &self,
        asset:    &str,
        is_long:  bool,
        size:     f64,
        slippage: f64,
    ) -> Result<f64, GatewayError> {
        let direction = if is_long { Direction::Long } else { Direction::Short };
        self.place_ioc(asset, direction.entry_side(), size, slippage, false).await
    }

    async fn close_market(
        &self,
        asset:    &str,
        held:     &Position,
        slippage: f64,
    ) -> Result<f64, GatewayError> {
        let side = held.direction.opposite().entry_side();
        self.place_ioc(asset, side, held.size, slippage, true).await
    }
}

/// HMAC-SHA256 of `query`, hex encoded.
pub fn sign_query(secret: &str, query: &str) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::ConfigRejected(format!("API secret: {e}")))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

async fn read_body(path: &str, resp: reqwest::Response) -> Result<String, ApiFailure> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| ApiFailure::Transport(format!("{path}: failed to read body: {e}")))?;

    if status == StatusCode::OK {
        return Ok(body);
    }
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::IM_A_TEAPOT
    {
        return Err(ApiFailure::Transport(format!("{path}: HTTP {status}")));
    }

    let failure = match serde_json::from_str::<BinanceError>(&body) {
        Ok(e) => ApiFailure::Venue { status, code: Some(e.code), msg: e.msg },
        Err(_) => ApiFailure::Venue { status, code: None, msg: body },
    };
    warn!("{} rejected: {:?}", path, failure);
    Err(failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signature_matches_binance_reference() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1\
                     &recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_query(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    fn eth_rules() -> SymbolRules {
        let filters = vec![
            json!({"filterType": "PRICE_FILTER", "minPrice": "39.86", "tickSize": "0.01"}),
            json!({"filterType": "LOT_SIZE", "minQty": "0.001", "stepSize": "0.001"}),
            json!({"filterType": "MARKET_LOT_SIZE", "stepSize": "0.001"}),
        ];
        SymbolRules::from_filters(&filters).unwrap()
    }

    #[test]
    fn rules_from_exchange_filters() {
        let rules = eth_rules();
        assert_eq!(rules.price_decimals, 2);
        assert_eq!(rules.qty_decimals, 3);
        assert!(SymbolRules::from_filters(&[json!({"filterType": "LOT_SIZE", "stepSize": "1"})]).is_none());
    }

    #[test]
    fn decimals_ignore_trailing_zeros() {
        assert_eq!(decimals_of("0.00100000"), 3);
        assert_eq!(decimals_of("0.10"), 1);
        assert_eq!(decimals_of("1"), 0);
        assert_eq!(decimals_of("1.0000"), 0);
    }

    #[test]
    fn quantity_floors_to_step() {
        let rules = eth_rules();
        assert_eq!(rules.format_qty(2.25), "2.250");
        assert_eq!(rules.format_qty(2.2537), "2.253");
        assert_eq!(rules.format_qty(0.0004), "0.000");
    }

    #[test]
    fn price_rounds_to_tick() {
        let rules = eth_rules();
        assert_eq!(rules.format_price(2000.0 * 1.01), "2020.00");
        assert_eq!(rules.format_price(1999.996), "2000.00");
    }

    fn order(status: &str, executed: &str, avg: &str) -> OrderResponse {
        OrderResponse {
            order_id:     42,
            symbol:       "ETHUSDT".into(),
            status:       status.into(),
            side:         "BUY".into(),
            orig_qty:     "2.250".into(),
            executed_qty: executed.into(),
            avg_price:    avg.into(),
        }
    }

    #[test]
    fn filled_order_reports_average_price() {
        assert_eq!(fill_price(&order("FILLED", "2.250", "2001.37")), Ok(2001.37));
    }

    #[test]
    fn expired_ioc_is_no_fill() {
        let err = fill_price(&order("EXPIRED", "0.000", "0.00")).unwrap_err();
        assert!(matches!(err, GatewayError::NoFill(_)));
    }

    #[test]
    fn order_result_deserializes() {
        let body = r#"{"orderId":8389765,"symbol":"ETHUSDT","status":"FILLED","clientOrderId":"x",
            "price":"2020.00","avgPrice":"2000.41","origQty":"2.250","executedQty":"2.250",
            "type":"LIMIT","side":"BUY","timeInForce":"IOC","reduceOnly":false}"#;
        let order: OrderResponse = serde_json::from_str(body).unwrap();
        assert_eq!(order.order_id, 8389765);
        assert_eq!(fill_price(&order), Ok(2000.41));
    }

    #[test]
    fn venue_refusal_maps_through_caller() {
        let failure = ApiFailure::Venue {
            status: StatusCode::BAD_REQUEST,
            code:   Some(-2019),
            msg:    "Margin is insufficient.".into(),
        };
        let err = failure.into_gateway(GatewayError::OrderRejected);
        assert_eq!(
            err,
            GatewayError::OrderRejected("HTTP 400 Bad Request code -2019: Margin is insufficient.".into())
        );

        let err = ApiFailure::Transport("timeout".into()).into_gateway(GatewayError::OrderRejected);
        assert!(err.is_retryable());
    }
}
