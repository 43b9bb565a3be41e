/// sizing.rs — Maximum position size from live account margin
///
/// ─────────────────────────────────────────────────────────────────────────
///   usable_margin     = 0.9 × equity
///   max_position_size = round(usable_margin × leverage / price, 4)
/// ─────────────────────────────────────────────────────────────────────────
///
/// Invalid inputs produce `Sizing::NotReady(reason)`, never a bare zero:
/// "not computed" and "computed to zero" are both reasons to refuse
/// signals, and callers match on the variant instead of testing `size > 0`.
use serde::Serialize;

use crate::error::NotReadyReason;

/// Fraction of account equity committed as margin.
pub const USABLE_MARGIN_FRACTION: f64 = 0.9;
/// Decimal places kept in the computed position size.
pub const SIZE_DECIMALS: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SizingSnapshot {
    pub account_equity:    f64,
    pub usable_margin:     f64,
    pub asset_price:       f64,
    pub leverage:          u32,
    pub max_position_size: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sizing {
    Ready(SizingSnapshot),
    NotReady(NotReadyReason),
}

impl Sizing {
    pub fn is_ready(&self) -> bool {
        matches!(self, Sizing::Ready(_))
    }

    pub fn max_position_size(&self) -> Option<f64> {
        match self {
            Sizing::Ready(s) => Some(s.max_position_size),
            Sizing::NotReady(_) => None,
        }
    }

    pub fn not_ready_reason(&self) -> Option<&NotReadyReason> {
        match self {
            Sizing::Ready(_) => None,
            Sizing::NotReady(r) => Some(r),
        }
    }
}

/// Size the single position the coordinator may hold.
pub fn compute_max_size(equity: f64, leverage: u32, price: f64) -> Sizing {
    let usable_margin = equity * USABLE_MARGIN_FRACTION;
    let raw = if equity > 0.0 && price > 0.0 {
        usable_margin * leverage as f64 / price
    } else {
        0.0
    };
    let size = round_to(raw, SIZE_DECIMALS);

    if !(size > 0.0) || !size.is_finite() {
        return Sizing::NotReady(NotReadyReason::NonPositiveSize { equity, price, size });
    }

    Sizing::Ready(SizingSnapshot {
        account_equity: equity,
        usable_margin,
        asset_price: price,
        leverage,
        max_position_size: size,
    })
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizing_arithmetic() {
        // 0.9 × 1000 × 5 / 2000 = 2.25
        let sizing = compute_max_size(1000.0, 5, 2000.0);
        assert_eq!(sizing.max_position_size(), Some(2.25));
        match sizing {
            Sizing::Ready(s) => {
                assert!((s.usable_margin - 900.0).abs() < 1e-9);
                assert_eq!(s.asset_price, 2000.0);
            }
            Sizing::NotReady(r) => panic!("unexpected not-ready: {r}"),
        }
    }

    #[test]
    fn rounds_to_four_decimals() {
        // 0.9 × 1234.56 × 3 / 3071.17 = 1.085355...
        let size = compute_max_size(1234.56, 3, 3071.17).max_position_size().unwrap();
        assert_eq!(size, 1.0854);
    }

    #[test]
    fn zero_equity_is_not_ready() {
        let sizing = compute_max_size(0.0, 5, 2000.0);
        assert!(!sizing.is_ready());
        assert!(matches!(
            sizing.not_ready_reason(),
            Some(NotReadyReason::NonPositiveSize { .. })
        ));
    }

    #[test]
    fn zero_price_is_not_ready() {
        assert!(!compute_max_size(1000.0, 5, 0.0).is_ready());
        assert!(!compute_max_size(1000.0, 5, -1.0).is_ready());
    }

    #[test]
    fn size_rounding_to_zero_is_not_ready() {
        // 0.9 × 1 × 1 / 100000 = 0.000009 → rounds to 0.0
        let sizing = compute_max_size(1.0, 1, 100_000.0);
        assert_eq!(sizing.max_position_size(), None);
    }
}
