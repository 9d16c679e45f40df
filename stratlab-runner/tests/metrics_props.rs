//! Property tests for trade statistics and the equity curve.

use chrono::NaiveDate;
use proptest::prelude::*;
use stratlab_core::domain::{ExitReason, Outcome};
use stratlab_core::{Side, Trade};
use stratlab_runner::metrics::{compute_equity, compute_stats};

fn closed_trade(i: usize, r: f64) -> Trade {
    let t0 = NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + chrono::Duration::hours(i as i64 * 4);
    Trade {
        side: Side::Long,
        entry_index: i * 4,
        entry_time: t0,
        entry_price: 100.0,
        stop_loss: 99.0,
        take_profit: 102.0,
        exit_index: Some(i * 4 + 2),
        exit_time: Some(t0 + chrono::Duration::hours(2)),
        exit_price: Some(100.0 + r),
        exit_reason: Some(if r > 0.0 {
            ExitReason::TakeProfit
        } else {
            ExitReason::StopLoss
        }),
        outcome: if r > 0.0 { Outcome::Win } else { Outcome::Loss },
        r_multiple: r,
        regime: None,
        htf_bias: None,
    }
}

fn trades_from(rs: &[f64]) -> Vec<Trade> {
    rs.iter().enumerate().map(|(i, &r)| closed_trade(i, r)).collect()
}

proptest! {
    #[test]
    fn equity_closes_on_net_r(rs in prop::collection::vec(-3.0f64..5.0, 0..60)) {
        let trades = trades_from(&rs);
        let stats = compute_stats(&trades);
        let equity = compute_equity(&trades);

        prop_assert_eq!(equity.points.len(), stats.trade_count);
        prop_assert!((equity.net_r - stats.net_r).abs() < 1e-9);
        if let Some(last) = equity.points.last() {
            prop_assert!((last - stats.net_r).abs() < 1e-9);
        }
        prop_assert!(equity.max_drawdown >= 0.0);
        prop_assert!(equity.max_drawdown <= stats.gross_loss_r + 1e-9);
    }

    #[test]
    fn profit_factor_defined_only_with_losses(rs in prop::collection::vec(-3.0f64..5.0, 0..60)) {
        let stats = compute_stats(&trades_from(&rs));
        let has_loss = rs.iter().any(|&r| r < 0.0);
        prop_assert_eq!(stats.profit_factor.is_some(), has_loss);
        if let Some(pf) = stats.profit_factor {
            prop_assert!(pf.is_finite() && pf >= 0.0);
        }
        prop_assert!((0.0..=1.0).contains(&stats.win_rate));
    }
}
