/// models.rs — Core value types shared by ingress, coordinator and gateway
///
/// The position invariant (flat ⇔ size 0 ⇔ entry 0) is carried by the
/// types: a size and an entry price only exist inside `Open` / `Closing`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn is_long(self) -> bool {
        matches!(self, Direction::Long)
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// Binance order side that opens (or adds to) this direction.
    pub fn entry_side(self) -> &'static str {
        match self {
            Direction::Long => "BUY",
            Direction::Short => "SELL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Decoded alert. Only `direction` reaches the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub ticker: String,
    pub direction: Direction,
    /// Fill price quoted in the alert text, when the format carries one.
    pub alert_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub direction: Direction,
    pub size: f64,
    pub entry_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionState {
    Flat,
    Open(Position),
    /// Close leg of a flip is in flight against the venue.
    Closing(Position),
}

impl PositionState {
    pub fn held(&self) -> Option<&Position> {
        match self {
            PositionState::Flat => None,
            PositionState::Open(p) | PositionState::Closing(p) => Some(p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateLabel {
    Flat,
    Long,
    Short,
    Closing,
}

/// Lock-free view of the coordinator, published after every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSnapshot {
    pub asset: String,
    pub state: StateLabel,
    pub size: f64,
    pub entry_price: f64,
    pub ready: bool,
    pub max_position_size: Option<f64>,
    pub not_ready_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PositionSnapshot {
    pub fn new(asset: &str, state: &PositionState, sizing: &crate::sizing::Sizing) -> Self {
        let (label, size, entry_price) = match state {
            PositionState::Flat => (StateLabel::Flat, 0.0, 0.0),
            PositionState::Open(p) => {
                let label = match p.direction {
                    Direction::Long => StateLabel::Long,
                    Direction::Short => StateLabel::Short,
                };
                (label, p.size, p.entry_price)
            }
            PositionState::Closing(p) => (StateLabel::Closing, p.size, p.entry_price),
        };
        Self {
            asset: asset.to_owned(),
            state: label,
            size,
            entry_price,
            ready: sizing.is_ready(),
            max_position_size: sizing.max_position_size(),
            not_ready_reason: sizing.not_ready_reason().map(|r| r.to_string()),
            updated_at: Utc::now(),
        }
    }
}
