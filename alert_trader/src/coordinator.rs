/// coordinator.rs — Single-position state machine driven by alert signals
///
/// ─────────────────────────────────────────────────────────────────────────
/// TRANSITIONS  (one at a time, under `inner`)
/// ─────────────────────────────────────────────────────────────────────────
///
///   FLAT  + Long   → open long                     → LONG  | FLAT on failure
///   FLAT  + Short  → open short                    → SHORT | FLAT on failure
///   LONG  + Long   → nothing                       → LONG
///   SHORT + Short  → nothing                       → SHORT
///   LONG  + Short  → CLOSING → close long, open short  → SHORT | FLAT
///   SHORT + Long   → CLOSING → close short, open long  → LONG  | FLAT
///
///   New positions are always `max_position_size` from the current sizing.
///   A failed close either halts the flip (position kept, PartialTransition)
///   or proceeds to the open anyway, per `FlipPolicy`. FLAT after a failed
///   open only when the close went through; otherwise the unclosed position
///   stays recorded.
///
/// The lock is a `tokio::sync::Mutex` held across every gateway await: its
/// waiters are woken in FIFO order, so concurrent signals are applied in
/// arrival order and none starves. Each transition runs on its own task so a
/// caller that goes away cannot cancel a flip half way.
/// ─────────────────────────────────────────────────────────────────────────
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::error::{CoordinatorError, NotReadyReason};
use crate::gateway::Gateway;
use crate::models::{Direction, Position, PositionSnapshot, PositionState};
use crate::sizing::{compute_max_size, Sizing, SizingSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipPolicy {
    /// A failed close stops the flip; the held position stays recorded.
    HaltOnCloseFailure,
    /// Open the new side even when the close failed; if that open fails
    /// too, the unclosed position stays recorded.
    OpenAnyway,
}

impl FromStr for FlipPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "halt" | "halt-on-close-failure" => Ok(Self::HaltOnCloseFailure),
            "open-anyway" | "open_anyway" => Ok(Self::OpenAnyway),
            other => Err(format!("invalid flip policy '{other}'; expected halt|open-anyway")),
        }
    }
}

impl fmt::Display for FlipPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlipPolicy::HaltOnCloseFailure => write!(f, "halt"),
            FlipPolicy::OpenAnyway => write!(f, "open-anyway"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub asset:       String,
    pub leverage:    u32,
    pub is_cross:    bool,
    pub slippage:    f64,
    pub flip_policy: FlipPolicy,
}

/// What a successful `apply_signal` did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Outcome {
    Unchanged { direction: Direction },
    Opened { position: Position },
    /// `exit_price` is `None` when the close failed under `OpenAnyway`.
    Flipped { exit_price: Option<f64>, position: Position },
}

struct Inner {
    state:  PositionState,
    sizing: Sizing,
}

pub struct Coordinator {
    gateway:   Arc<dyn Gateway>,
    settings:  CoordinatorSettings,
    inner:     Mutex<Inner>,
    published: watch::Sender<PositionSnapshot>,
}

impl Coordinator {
    pub fn new(gateway: Arc<dyn Gateway>, settings: CoordinatorSettings) -> Self {
        let inner = Inner {
            state:  PositionState::Flat,
            sizing: Sizing::NotReady(NotReadyReason::NotInitialized),
        };
        let (published, _) = watch::channel(PositionSnapshot::new(
            &settings.asset,
            &inner.state,
            &inner.sizing,
        ));
        Self {
            gateway,
            settings,
            inner: Mutex::new(inner),
            published,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Configure margin mode/leverage and size from live equity and price.
    ///
    /// Any failure leaves the coordinator not ready; it is not retried.
    pub async fn initialize(&self) -> Result<SizingSnapshot, NotReadyReason> {
        let mut inner = self.inner.lock().await;
        let s = &self.settings;

        let sizing = match self.gateway.set_leverage(&s.asset, s.leverage, s.is_cross).await {
            Ok(()) => self.measure().await,
            Err(e) => Sizing::NotReady(e.into()),
        };
        inner.sizing = sizing.clone();
        self.publish(&inner);

        match sizing {
            Sizing::Ready(snap) => {
                info!(
                    "Sizing ready: equity ${:.2}, usable ${:.2}, {} @ ${:.2}, {}x → max {} {}",
                    snap.account_equity, snap.usable_margin, s.asset, snap.asset_price,
                    snap.leverage, snap.max_position_size, s.asset
                );
                Ok(snap)
            }
            Sizing::NotReady(reason) => {
                error!("Coordinator not ready: {reason}");
                Err(reason)
            }
        }
    }

    /// Re-size from live margin. Only runs while ready; on failure the
    /// previous sizing stays in force.
    pub async fn refresh_sizing(&self) -> Result<SizingSnapshot, NotReadyReason> {
        let mut inner = self.inner.lock().await;
        if let Sizing::NotReady(reason) = &inner.sizing {
            return Err(reason.clone());
        }

        match self.measure().await {
            Sizing::Ready(snap) => {
                if inner.sizing.max_position_size() != Some(snap.max_position_size) {
                    info!(
                        "Max position size {:?} → {} {}",
                        inner.sizing.max_position_size(), snap.max_position_size, self.settings.asset
                    );
                }
                inner.sizing = Sizing::Ready(snap);
                self.publish(&inner);
                Ok(snap)
            }
            Sizing::NotReady(reason) => {
                warn!("Sizing refresh failed, keeping previous size: {reason}");
                Err(reason)
            }
        }
    }

    async fn measure(&self) -> Sizing {
        let s = &self.settings;
        let equity = match self.gateway.query_margin().await {
            Ok(v) => v,
            Err(e) => return Sizing::NotReady(e.into()),
        };
        let price = match self.gateway.query_price(&s.asset).await {
            Ok(v) => v,
            Err(e) => return Sizing::NotReady(e.into()),
        };
        compute_max_size(equity, s.leverage, price)
    }

    /// Move the held position toward `direction`.
    ///
    /// Runs to completion on a spawned task even if the returned future is
    /// dropped.
    pub async fn apply_signal(self: &Arc<Self>, direction: Direction) -> Result<Outcome, CoordinatorError> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.transition(direction).await })
            .await
            .map_err(|e| CoordinatorError::Aborted(e.to_string()))?
    }

    async fn transition(&self, direction: Direction) -> Result<Outcome, CoordinatorError> {
        let mut inner = self.inner.lock().await;

        let size = match &inner.sizing {
            Sizing::Ready(snap) => snap.max_position_size,
            Sizing::NotReady(reason) => {
                warn!("Ignoring {} signal, coordinator not ready: {}", direction, reason);
                return Err(CoordinatorError::NotReady(reason.clone()));
            }
        };

        let current = inner.state;
        let held = match current {
            PositionState::Flat => None,
            PositionState::Open(held) => Some(held),
            PositionState::Closing(held) => {
                warn!("Previous flip did not finish; treating {} position as still open", held.direction);
                inner.state = PositionState::Open(held);
                Some(held)
            }
        };

        match held {
            Some(held) if held.direction == direction => {
                info!("Already {} {} {}, no action", direction, held.size, self.settings.asset);
                Ok(Outcome::Unchanged { direction })
            }
            Some(held) => self.flip(&mut inner, held, direction, size).await,
            None => {
                let position = self
                    .open(&mut inner, direction, size, PositionState::Flat)
                    .await?;
                Ok(Outcome::Opened { position })
            }
        }
    }

    /// Open `direction`; on failure record `on_failure` instead.
    async fn open(
        &self,
        inner:      &mut Inner,
        direction:  Direction,
        size:       f64,
        on_failure: PositionState,
    ) -> Result<Position, CoordinatorError> {
        let s = &self.settings;
        info!("Opening {} {} {}", direction, size, s.asset);

        match self.gateway.open_market(&s.asset, direction.is_long(), size, s.slippage).await {
            Ok(entry_price) => {
                let position = Position { direction, size, entry_price };
                inner.state = PositionState::Open(position);
                self.publish(inner);
                info!(
                    "Opened {}: entry ${:.4}, size {} {}",
                    direction, entry_price, size, s.asset
                );
                Ok(position)
            }
            Err(e) => {
                error!("Open {} {} {} failed: {}", direction, size, s.asset, e);
                inner.state = on_failure;
                self.publish(inner);
                Err(CoordinatorError::Order(e))
            }
        }
    }

    async fn flip(
        &self,
        inner:     &mut Inner,
        held:      Position,
        direction: Direction,
        size:      f64,
    ) -> Result<Outcome, CoordinatorError> {
        let s = &self.settings;
        info!(
            "Flipping {} → {}: closing {} {} (entry ${:.4})",
            held.direction, direction, held.size, s.asset, held.entry_price
        );
        inner.state = PositionState::Closing(held);
        self.publish(inner);

        let exit_price = match self.gateway.close_market(&s.asset, &held, s.slippage).await {
            Ok(exit) => {
                info!(
                    "Closed {}: exit ${:.4}, size {} {}, est. PnL {:+.2}",
                    held.direction, exit, held.size, s.asset, estimated_pnl(&held, exit)
                );
                inner.state = PositionState::Flat;
                self.publish(inner);
                Some(exit)
            }
            Err(e) => match s.flip_policy {
                FlipPolicy::HaltOnCloseFailure => {
                    error!("Close {} failed, flip halted: {}", held.direction, e);
                    inner.state = PositionState::Open(held);
                    self.publish(inner);
                    return Err(CoordinatorError::PartialTransition {
                        held:   held.direction,
                        source: e,
                    });
                }
                FlipPolicy::OpenAnyway => {
                    error!("Close {} failed, opening {} anyway: {}", held.direction, direction, e);
                    None
                }
            },
        };

        // an unclosed position is still held if the open fails too
        let on_failure = match exit_price {
            Some(_) => PositionState::Flat,
            None => PositionState::Open(held),
        };
        let position = self.open(inner, direction, size, on_failure).await?;
        Ok(Outcome::Flipped { exit_price, position })
    }

    fn publish(&self, inner: &Inner) {
        self.published.send_replace(PositionSnapshot::new(
            &self.settings.asset,
            &inner.state,
            &inner.sizing,
        ));
    }

    /// Lock-free readiness check against the last published snapshot.
    pub fn is_ready(&self) -> bool {
        self.published.borrow().ready
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        self.published.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PositionSnapshot> {
        self.published.subscribe()
    }

    /// Position record, read under the transition lock.
    pub async fn position(&self) -> PositionState {
        self.inner.lock().await.state
    }
}

fn estimated_pnl(held: &Position, exit: f64) -> f64 {
    let sign = if held.direction.is_long() { 1.0 } else { -1.0 };
    sign * (exit - held.entry_price) * held.size
}
