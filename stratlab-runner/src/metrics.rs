//! Performance statistics: pure functions from a trade list to R-based metrics.
//!
//! Every figure is in R (multiples of initial risk). Open trades never count
//! toward win rate or profit factor; they enter net R and the equity walk only
//! when `StatsOptions::include_open` is set.

use serde::{Deserialize, Serialize};
use stratlab_core::domain::{Outcome, Trade};

/// Aggregate statistics for one trade list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// Closed trades only.
    pub trade_count: usize,
    pub open_count: usize,
    pub win_count: usize,
    pub loss_count: usize,
    pub win_rate: f64,
    /// Mean R per closed trade.
    pub expectancy: f64,
    /// `None` when no closed trade lost any R.
    pub profit_factor: Option<f64>,
    pub median_r: f64,
    pub net_r: f64,
    pub gross_win_r: f64,
    /// Positive magnitude.
    pub gross_loss_r: f64,
}

impl Stats {
    pub fn empty() -> Self {
        compute_stats(&[])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsOptions {
    pub include_open: bool,
}

/// Cumulative R walk over a trade list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityCurve {
    /// Cumulative R after each counted trade.
    pub points: Vec<f64>,
    pub net_r: f64,
    /// Largest peak-to-trough decline in cumulative R (non-negative).
    pub max_drawdown: f64,
    pub max_win_streak: usize,
    pub max_loss_streak: usize,
}

pub fn compute_stats(trades: &[Trade]) -> Stats {
    compute_stats_with(trades, StatsOptions::default())
}

pub fn compute_stats_with(trades: &[Trade], opts: StatsOptions) -> Stats {
    let closed: Vec<f64> = trades
        .iter()
        .filter(|t| !t.is_open())
        .map(|t| t.r_multiple)
        .collect();
    let open_r: f64 = trades
        .iter()
        .filter(|t| t.is_open())
        .map(|t| t.r_multiple)
        .sum();

    let win_count = trades.iter().filter(|t| t.is_winner()).count();
    let loss_count = trades.iter().filter(|t| t.is_loser()).count();
    let decided = win_count + loss_count;

    let gross_win_r: f64 = closed.iter().filter(|&&r| r > 0.0).sum();
    let gross_loss_r: f64 = closed.iter().filter(|&&r| r < 0.0).map(|r| -r).sum();
    let closed_net = gross_win_r - gross_loss_r;

    Stats {
        trade_count: closed.len(),
        open_count: trades.len() - closed.len(),
        win_count,
        loss_count,
        win_rate: if decided == 0 {
            0.0
        } else {
            win_count as f64 / decided as f64
        },
        expectancy: if closed.is_empty() {
            0.0
        } else {
            closed_net / closed.len() as f64
        },
        profit_factor: profit_factor(gross_win_r, gross_loss_r),
        median_r: median(&closed),
        net_r: if opts.include_open {
            closed_net + open_r
        } else {
            closed_net
        },
        gross_win_r,
        gross_loss_r,
    }
}

pub fn compute_equity(trades: &[Trade]) -> EquityCurve {
    compute_equity_with(trades, StatsOptions::default())
}

pub fn compute_equity_with(trades: &[Trade], opts: StatsOptions) -> EquityCurve {
    let mut points = Vec::with_capacity(trades.len());
    let mut equity = 0.0_f64;
    let mut peak = 0.0_f64;
    let mut max_drawdown = 0.0_f64;

    for trade in trades.iter().filter(|t| opts.include_open || !t.is_open()) {
        equity += trade.r_multiple;
        peak = peak.max(equity);
        max_drawdown = max_drawdown.max(peak - equity);
        points.push(equity);
    }

    EquityCurve {
        net_r: equity,
        points,
        max_drawdown,
        max_win_streak: max_consecutive(trades, Outcome::Win),
        max_loss_streak: max_consecutive(trades, Outcome::Loss),
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn profit_factor(gross_win: f64, gross_loss: f64) -> Option<f64> {
    if gross_loss == 0.0 {
        None
    } else {
        Some(gross_win / gross_loss)
    }
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; 0 below two values.
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

pub(crate) fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Longest run of closed trades with `outcome`; open trades are skipped.
fn max_consecutive(trades: &[Trade], outcome: Outcome) -> usize {
    let mut max_streak = 0;
    let mut current = 0;

    for trade in trades.iter().filter(|t| !t.is_open()) {
        if trade.outcome == outcome {
            current += 1;
            max_streak = max_streak.max(current);
        } else {
            current = 0;
        }
    }
    max_streak
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use stratlab_core::domain::{ExitReason, Side};

    pub(crate) fn make_trade(r: f64, outcome: Outcome) -> Trade {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let closed = outcome != Outcome::Open;
        Trade {
            side: Side::Long,
            entry_index: 0,
            entry_time: ts,
            entry_price: 100.0,
            stop_loss: 99.0,
            take_profit: 102.0,
            exit_index: closed.then_some(5),
            exit_time: closed.then_some(ts),
            exit_price: closed.then_some(100.0 + r),
            exit_reason: match outcome {
                Outcome::Win => Some(ExitReason::TakeProfit),
                Outcome::Loss => Some(ExitReason::StopLoss),
                Outcome::Open => None,
            },
            outcome,
            r_multiple: r,
            regime: None,
            htf_bias: None,
        }
    }

    fn win(r: f64) -> Trade {
        make_trade(r, Outcome::Win)
    }

    fn loss(r: f64) -> Trade {
        make_trade(r, Outcome::Loss)
    }

    // ── Stats ──

    #[test]
    fn empty_trades_are_all_zero() {
        let s = compute_stats(&[]);
        assert_eq!(s.trade_count, 0);
        assert_eq!(s.win_rate, 0.0);
        assert_eq!(s.expectancy, 0.0);
        assert_eq!(s.profit_factor, None);
        assert_eq!(s.net_r, 0.0);
    }

    #[test]
    fn mixed_trades() {
        let trades = vec![win(2.0), loss(-1.0), win(2.0), loss(-1.0)];
        let s = compute_stats(&trades);
        assert_eq!(s.trade_count, 4);
        assert_eq!(s.win_count, 2);
        assert_eq!(s.loss_count, 2);
        assert!((s.win_rate - 0.5).abs() < 1e-12);
        assert!((s.net_r - 2.0).abs() < 1e-12);
        assert!((s.expectancy - 0.5).abs() < 1e-12);
        assert!((s.profit_factor.unwrap() - 2.0).abs() < 1e-12);
        assert!((s.median_r - 0.5).abs() < 1e-12);
    }

    #[test]
    fn all_winners_have_undefined_profit_factor() {
        let s = compute_stats(&[win(2.0), win(1.5)]);
        assert_eq!(s.profit_factor, None);
        assert!((s.gross_win_r - 3.5).abs() < 1e-12);
    }

    #[test]
    fn open_trade_excluded_by_default() {
        let trades = vec![win(2.0), make_trade(0.7, Outcome::Open)];
        let s = compute_stats(&trades);
        assert_eq!(s.trade_count, 1);
        assert_eq!(s.open_count, 1);
        assert!((s.net_r - 2.0).abs() < 1e-12);
        assert!((s.win_rate - 1.0).abs() < 1e-12);

        let with_open = compute_stats_with(
            &trades,
            StatsOptions {
                include_open: true,
            },
        );
        assert!((with_open.net_r - 2.7).abs() < 1e-12);
        assert!((with_open.win_rate - 1.0).abs() < 1e-12);
    }

    // ── Equity ──

    #[test]
    fn drawdown_is_peak_to_trough() {
        let trades = vec![win(2.0), loss(-1.0), loss(-1.0), win(2.0), loss(-1.0)];
        let eq = compute_equity(&trades);
        assert_eq!(eq.points, vec![2.0, 1.0, 0.0, 2.0, 1.0]);
        assert!((eq.max_drawdown - 2.0).abs() < 1e-12);
        assert_eq!(eq.max_loss_streak, 2);
        assert_eq!(eq.max_win_streak, 1);
    }

    #[test]
    fn drawdown_from_zero_baseline() {
        let eq = compute_equity(&[loss(-1.0), loss(-1.0)]);
        assert!((eq.max_drawdown - 2.0).abs() < 1e-12);
        assert!((eq.net_r + 2.0).abs() < 1e-12);
    }

    #[test]
    fn equity_net_matches_stats_net() {
        let trades = vec![win(2.0), loss(-1.0), win(0.4)];
        assert!((compute_equity(&trades).net_r - compute_stats(&trades).net_r).abs() < 1e-12);
    }

    // ── Helpers ──

    #[test]
    fn sample_std_dev() {
        let s = std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((s - 2.138_089_935).abs() < 1e-6);
        assert_eq!(std_dev(&[1.0]), 0.0);
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }
}
