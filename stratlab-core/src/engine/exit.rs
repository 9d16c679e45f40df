//! Stop/target resolution for one open position on one bar.
//!
//! Gap opens fill at the open. When the bar's range covers both levels and the
//! open lies between them, the configured tie-breaker decides which came first.

use crate::domain::{Bar, ExitReason, Side};
use crate::strategy::TieBreaker;

/// Exit produced by a bar: reason and fill price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitFill {
    pub reason: ExitReason,
    pub price: f64,
}

/// Check `bar` against the stop and target of a position on `side`.
pub fn resolve_exit(
    side: Side,
    stop_loss: f64,
    take_profit: f64,
    bar: &Bar,
    tie_breaker: TieBreaker,
) -> Option<ExitFill> {
    let stop = |price| ExitFill {
        reason: ExitReason::StopLoss,
        price,
    };
    let target = |price| ExitFill {
        reason: ExitReason::TakeProfit,
        price,
    };

    // Adverse and favourable excursions relative to the position side.
    let (open_through_stop, open_through_target, hit_stop, hit_target) = match side {
        Side::Long => (
            bar.open <= stop_loss,
            bar.open >= take_profit,
            bar.low <= stop_loss,
            bar.high >= take_profit,
        ),
        Side::Short => (
            bar.open >= stop_loss,
            bar.open <= take_profit,
            bar.high >= stop_loss,
            bar.low <= take_profit,
        ),
    };

    if open_through_stop {
        return Some(stop(bar.open));
    }
    if open_through_target {
        return Some(target(bar.open));
    }
    match (hit_stop, hit_target) {
        (true, true) => Some(match tie_breaker {
            TieBreaker::Sl => stop(stop_loss),
            TieBreaker::Tp => target(take_profit),
        }),
        (true, false) => Some(stop(stop_loss)),
        (false, true) => Some(target(take_profit)),
        (false, false) => None,
    }
}
