use thiserror::Error;

use crate::models::Direction;

/// Typed failure of a single exchange call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Exchange unreachable: {0}")]
    RemoteUnavailable(String),

    #[error("Insufficient margin: account equity {equity:.2}")]
    InsufficientMargin { equity: f64 },

    #[error("Price unavailable for {asset}: {reason}")]
    PriceUnavailable { asset: String, reason: String },

    #[error("Account configuration rejected: {0}")]
    ConfigRejected(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Order not filled: {0}")]
    NoFill(String),
}

impl GatewayError {
    /// Transport-level failures may succeed on a later attempt; venue
    /// rejections will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::RemoteUnavailable(_))
    }
}

/// Why the coordinator refuses signals.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotReadyReason {
    #[error("sizing has not been computed")]
    NotInitialized,

    #[error("{0}")]
    Gateway(#[from] GatewayError),

    #[error("max position size {size} is not positive (equity {equity:.2}, price {price:.2})")]
    NonPositiveSize { equity: f64, price: f64, size: f64 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    #[error("Coordinator not ready: {0}")]
    NotReady(NotReadyReason),

    #[error("{0}")]
    Order(GatewayError),

    /// Close leg of a flip failed; the held position was left in place.
    #[error("Flip halted, could not close {held} position: {source}")]
    PartialTransition {
        held: Direction,
        #[source]
        source: GatewayError,
    },

    #[error("Transition task aborted: {0}")]
    Aborted(String),
}

/// Alert text that does not decode into a signal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty message")]
    Empty,

    #[error("unrecognized message format: {0}")]
    UnrecognizedFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(GatewayError::RemoteUnavailable("timeout".into()).is_retryable());
        assert!(!GatewayError::OrderRejected("-2019 margin".into()).is_retryable());
        assert!(!GatewayError::NoFill("EXPIRED".into()).is_retryable());
        assert!(!GatewayError::InsufficientMargin { equity: 0.0 }.is_retryable());
    }

    #[test]
    fn partial_transition_names_held_side() {
        let err = CoordinatorError::PartialTransition {
            held: Direction::Long,
            source: GatewayError::OrderRejected("reduce only rejected".into()),
        };
        assert_eq!(
            err.to_string(),
            "Flip halted, could not close LONG position: Order rejected: reduce only rejected"
        );
    }
}
