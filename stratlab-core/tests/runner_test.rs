//! Integration tests for the strategy runner.

use chrono::NaiveDate;
use stratlab_core::domain::{Bar, BarSeries, ExitReason, Outcome, Timeframe};
use stratlab_core::strategy::{ExitParams, StrategyConfig, StrategyFamily, TieBreaker};
use stratlab_core::synthetic::generate_series;
use stratlab_core::{run, PreparedStrategy, TimeWindow};

// ── Helpers ──────────────────────────────────────────────────────────

fn series_from(data: &[(f64, f64, f64, f64)]) -> BarSeries {
    let base = NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let bars = data
        .iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| Bar {
            timestamp: base + chrono::Duration::days(i as i64),
            open,
            high,
            low,
            close,
            volume: 1_000,
        })
        .collect();
    BarSeries::new("TEST", Timeframe::D1, bars).unwrap()
}

const FLAT: (f64, f64, f64, f64) = (100.0, 101.0, 99.0, 100.0);
const BREAKOUT: (f64, f64, f64, f64) = (100.0, 102.5, 99.5, 102.0);

/// Two breakout trades: the first exits on a bar that spans both stop and
/// target, the second wins cleanly.
fn tie_break_series() -> BarSeries {
    let mut data = vec![FLAT; 10];
    data.push(BREAKOUT); // 10
    data.push((102.0, 120.0, 80.0, 100.0)); // 11: ambiguous
    data.extend(vec![FLAT; 14]); // 12..=25
    data.push(BREAKOUT); // 26
    data.push((102.0, 130.0, 101.0, 125.0)); // 27: clean target
    series_from(&data)
}

fn breakout_config(tie_breaker: TieBreaker) -> StrategyConfig {
    StrategyConfig::RangeBreakout {
        lookback: 5,
        exits: ExitParams {
            atr_period: 3,
            atr_mult: 1.5,
            rr: 2.0,
            tie_breaker,
            ..ExitParams::default()
        },
    }
}

// ── Tie-breaker ──────────────────────────────────────────────────────

#[test]
fn sl_tie_breaker_books_ambiguous_bar_as_loss() {
    let series = tie_break_series();
    for _ in 0..2 {
        let trades = run(&series, &breakout_config(TieBreaker::Sl), None).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].entry_index, 10);
        assert_eq!(trades[0].exit_index, Some(11));
        assert_eq!(trades[0].outcome, Outcome::Loss);
        assert_eq!(trades[0].exit_reason, Some(ExitReason::StopLoss));
        assert!((trades[0].r_multiple + 1.0).abs() < 1e-9);
    }
}

#[test]
fn flipping_tie_breaker_flips_only_the_ambiguous_trade() {
    let series = tie_break_series();
    let sl = run(&series, &breakout_config(TieBreaker::Sl), None).unwrap();
    let tp = run(&series, &breakout_config(TieBreaker::Tp), None).unwrap();

    assert_eq!(tp.len(), sl.len());
    assert_eq!(tp[0].outcome, Outcome::Win);
    assert!((tp[0].r_multiple - 2.0).abs() < 1e-9);
    assert_eq!(sl[1], tp[1]);
    assert_eq!(sl[1].outcome, Outcome::Win);
}

// ── Determinism ──────────────────────────────────────────────────────

#[test]
fn range_breakout_over_500_bars_is_bitwise_reproducible() {
    let series = generate_series("EURUSD", Timeframe::D1, 500).unwrap();
    let config = StrategyConfig::RangeBreakout {
        lookback: 20,
        exits: ExitParams {
            atr_mult: 1.5,
            rr: 2.0,
            ..ExitParams::default()
        },
    };
    let first = run(&series, &config, None).unwrap();
    let second = run(&series, &config, None).unwrap();

    assert!(!first.is_empty());
    assert_eq!(first, second);
    let net = |trades: &[stratlab_core::Trade]| -> f64 { trades.iter().map(|t| t.r_multiple).sum() };
    assert_eq!(net(&first).to_bits(), net(&second).to_bits());
}

#[test]
fn every_family_runs_on_synthetic_data() {
    let series = generate_series("GBPUSD", Timeframe::H1, 1_500).unwrap();
    for family in StrategyFamily::ALL {
        let trades = run(&series, &family.default_config(), None).unwrap();
        let open = trades.iter().filter(|t| t.is_open()).count();
        assert!(open <= 1, "{family}: {open} open trades");
    }
}

// ── Windows ──────────────────────────────────────────────────────────

#[test]
fn prepared_strategy_windows_partition_entries() {
    let series = generate_series("USDJPY", Timeframe::D1, 400).unwrap();
    let config = StrategyFamily::RangeBreakout.default_config();
    let prepared = PreparedStrategy::prepare(&series, &config).unwrap();
    let start = series.first_date().unwrap();

    let first = TimeWindow::from_days(start, 200);
    let second = TimeWindow::from_days(start + chrono::Duration::days(200), 200);
    for (window, trades) in [
        (first, prepared.run(Some(&first)).unwrap()),
        (second, prepared.run(Some(&second)).unwrap()),
    ] {
        for t in &trades {
            assert!(window.contains(t.entry_time));
            if let Some(exit) = t.exit_time {
                assert!(window.contains(exit));
            }
        }
    }
}
