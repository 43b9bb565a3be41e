/// server.rs — Webhook HTTP server (axum)
///
/// ROUTES:
///   POST /webhook  raw alert text → signal → coordinator transition
///   GET  /status   coordinator's published snapshot
///   GET  /         liveness probe
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::coordinator::Coordinator;
use crate::error::{CoordinatorError, ParseError};
use crate::signal::parse_signal;

/// Shared state for the webhook handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    /// Reject alerts whose ticker differs (case-insensitive) when set
    pub signal_ticker: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/webhook", post(webhook_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Webhook server listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({ "message": "webhook server is running" }))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.snapshot())
}

async fn webhook_handler(State(state): State<AppState>, body: Bytes) -> Response {
    if !state.coordinator.is_ready() {
        error!("Exchange not initialized, rejecting webhook");
        return reject(StatusCode::SERVICE_UNAVAILABLE, "exchange not initialized");
    }

    let Ok(message) = std::str::from_utf8(&body) else {
        error!("Webhook body is not valid UTF-8 ({} bytes)", body.len());
        return reject(StatusCode::BAD_REQUEST, "body is not valid UTF-8");
    };

    let signal = match parse_signal(message) {
        Ok(signal) => signal,
        Err(ParseError::Empty) => {
            error!("Empty webhook message received");
            return reject(StatusCode::BAD_REQUEST, "empty message");
        }
        Err(e) => {
            error!("Failed to parse webhook message: {e}");
            return reject(StatusCode::BAD_REQUEST, "invalid message format");
        }
    };

    if let Some(expected) = &state.signal_ticker {
        if !signal.ticker.eq_ignore_ascii_case(expected) {
            warn!("Ignoring alert for {} (trading {})", signal.ticker, expected);
            return reject(
                StatusCode::BAD_REQUEST,
                format!("ticker {} is not traded here", signal.ticker),
            );
        }
    }

    info!(
        "Webhook received - ticker: {}, direction: {}, alert price: {:?}",
        signal.ticker, signal.direction, signal.alert_price
    );

    match state.coordinator.apply_signal(signal.direction).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "outcome": outcome })),
        )
            .into_response(),
        Err(e) => {
            error!("Signal {} not applied: {}", signal.direction, e);
            reject(status_for(&e), e.to_string())
        }
    }
}

fn status_for(err: &CoordinatorError) -> StatusCode {
    match err {
        CoordinatorError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoordinatorError::Order(_) | CoordinatorError::PartialTransition { .. } => StatusCode::BAD_GATEWAY,
        CoordinatorError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": detail.into() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GatewayError, NotReadyReason};
    use crate::models::Direction;

    #[test]
    fn coordinator_errors_map_to_http_status() {
        assert_eq!(
            status_for(&CoordinatorError::NotReady(NotReadyReason::NotInitialized)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&CoordinatorError::Order(GatewayError::NoFill("EXPIRED".into()))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&CoordinatorError::PartialTransition {
                held:   Direction::Long,
                source: GatewayError::RemoteUnavailable("timeout".into()),
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&CoordinatorError::Aborted("panicked".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
