//! Entry signals per strategy family.
//!
//! Signals are stateless: each call looks at bars `..=i` and the precomputed
//! indicators and returns at most one entry. Families that wait for a setup
//! (retest, gap fill) scan back over their own bounded window.

use super::StrategyConfig;
use crate::domain::{Bar, Side};
use crate::indicators::{Atr, Donchian, Ema, Indicator, IndicatorValues, RollingStd, Rsi, Sma};

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;

/// Direction and fill price of an entry on the current bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntrySignal {
    pub side: Side,
    pub price: f64,
    /// Filled before the bar closed, so the rest of the bar can still stop it out.
    pub intrabar: bool,
}

impl EntrySignal {
    fn at_close(side: Side, bar: &Bar) -> Self {
        Self {
            side,
            price: bar.close,
            intrabar: false,
        }
    }
}

/// Indicators a configuration reads, ATR and the bias EMA included.
pub fn required_indicators(config: &StrategyConfig) -> Vec<Box<dyn Indicator>> {
    let exits = config.exits();
    let mut out: Vec<Box<dyn Indicator>> = vec![Box::new(Atr::new(exits.atr_period))];
    if let Some(period) = exits.htf_ema {
        out.push(Box::new(Ema::new(period)));
    }
    match config {
        StrategyConfig::RangeBreakout { lookback, .. }
        | StrategyConfig::BreakAndRetest { lookback, .. } => {
            out.push(Box::new(Donchian::upper(*lookback)));
            out.push(Box::new(Donchian::lower(*lookback)));
        }
        StrategyConfig::FvgRetrace { .. } => {}
        StrategyConfig::TrendPullback {
            fast_ema, slow_ema, ..
        } => {
            out.push(Box::new(Ema::new(*fast_ema)));
            out.push(Box::new(Ema::new(*slow_ema)));
        }
        StrategyConfig::MeanReversion {
            period, rsi_period, ..
        } => {
            out.push(Box::new(Sma::new(*period)));
            out.push(Box::new(RollingStd::new(*period)));
            out.push(Box::new(Rsi::new(*rsi_period)));
        }
    }
    out
}

/// Family entry condition at bar `i`, before direction and bias filters.
pub fn evaluate_entry(
    config: &StrategyConfig,
    bars: &[Bar],
    i: usize,
    ind: &IndicatorValues,
) -> Option<EntrySignal> {
    let atr = ind.get(&format!("atr_{}", config.exits().atr_period), i)?;
    match config {
        StrategyConfig::RangeBreakout { lookback, .. } => range_breakout(bars, i, *lookback, ind),
        StrategyConfig::BreakAndRetest {
            lookback,
            retest_window,
            retest_tolerance_atr,
            ..
        } => break_and_retest(
            bars,
            i,
            *lookback,
            *retest_window,
            retest_tolerance_atr * atr,
            ind,
        ),
        StrategyConfig::FvgRetrace {
            min_gap_atr,
            max_gap_age,
            ..
        } => fvg_retrace(bars, i, min_gap_atr * atr, *max_gap_age),
        StrategyConfig::TrendPullback {
            fast_ema, slow_ema, ..
        } => trend_pullback(bars, i, *fast_ema, *slow_ema, ind),
        StrategyConfig::MeanReversion {
            period,
            entry_z,
            rsi_period,
            rsi_confirm,
            ..
        } => mean_reversion(bars, i, *period, *entry_z, *rsi_period, *rsi_confirm, ind),
    }
}

/// Prior-bar channel: (highest high, lowest low) of the `lookback` bars before `i`.
fn prior_channel(i: usize, lookback: usize, ind: &IndicatorValues) -> Option<(f64, f64)> {
    let prev = i.checked_sub(1)?;
    let upper = ind.get(&format!("donchian_upper_{lookback}"), prev)?;
    let lower = ind.get(&format!("donchian_lower_{lookback}"), prev)?;
    Some((upper, lower))
}

fn range_breakout(
    bars: &[Bar],
    i: usize,
    lookback: usize,
    ind: &IndicatorValues,
) -> Option<EntrySignal> {
    let (upper, lower) = prior_channel(i, lookback, ind)?;
    let bar = &bars[i];
    if bar.close > upper {
        Some(EntrySignal::at_close(Side::Long, bar))
    } else if bar.close < lower {
        Some(EntrySignal::at_close(Side::Short, bar))
    } else {
        None
    }
}

fn break_and_retest(
    bars: &[Bar],
    i: usize,
    lookback: usize,
    retest_window: usize,
    tolerance: f64,
    ind: &IndicatorValues,
) -> Option<EntrySignal> {
    let bar = &bars[i];
    let earliest = i.saturating_sub(retest_window);
    // Most recent breakout inside the window sets the level.
    for j in (earliest..i).rev() {
        let Some((upper, lower)) = prior_channel(j, lookback, ind) else {
            continue;
        };
        let broke_up = bars[j].close > upper;
        let broke_down = bars[j].close < lower;
        if !broke_up && !broke_down {
            continue;
        }
        let between = &bars[j + 1..i];
        if broke_up {
            let level = upper;
            let already_retested = between.iter().any(|b| b.low <= level + tolerance);
            if !already_retested && bar.low <= level + tolerance && bar.close > level {
                return Some(EntrySignal::at_close(Side::Long, bar));
            }
        } else {
            let level = lower;
            let already_retested = between.iter().any(|b| b.high >= level - tolerance);
            if !already_retested && bar.high >= level - tolerance && bar.close < level {
                return Some(EntrySignal::at_close(Side::Short, bar));
            }
        }
        return None;
    }
    None
}

fn fvg_retrace(bars: &[Bar], i: usize, min_gap: f64, max_gap_age: usize) -> Option<EntrySignal> {
    let bar = &bars[i];
    let earliest = i.saturating_sub(max_gap_age).max(2);
    for k in (earliest..i).rev() {
        let (left, right) = (&bars[k - 2], &bars[k]);
        let after = &bars[k + 1..i];

        // Bullish gap: right low above left high.
        let top = right.low;
        if top - left.high >= min_gap && top > left.high && after.iter().all(|b| b.low > top) {
            if bar.low <= top {
                return Some(EntrySignal {
                    side: Side::Long,
                    price: bar.open.min(top),
                    intrabar: true,
                });
            }
            continue;
        }

        // Bearish gap: right high below left low.
        let bottom = right.high;
        if left.low - bottom >= min_gap && bottom < left.low && after.iter().all(|b| b.high < bottom)
        {
            if bar.high >= bottom {
                return Some(EntrySignal {
                    side: Side::Short,
                    price: bar.open.max(bottom),
                    intrabar: true,
                });
            }
        }
    }
    None
}

fn trend_pullback(
    bars: &[Bar],
    i: usize,
    fast: usize,
    slow: usize,
    ind: &IndicatorValues,
) -> Option<EntrySignal> {
    let fast_v = ind.get(&format!("ema_{fast}"), i)?;
    let slow_v = ind.get(&format!("ema_{slow}"), i)?;
    let bar = &bars[i];
    if fast_v > slow_v && bar.low <= fast_v && bar.close > fast_v {
        Some(EntrySignal::at_close(Side::Long, bar))
    } else if fast_v < slow_v && bar.high >= fast_v && bar.close < fast_v {
        Some(EntrySignal::at_close(Side::Short, bar))
    } else {
        None
    }
}

fn mean_reversion(
    bars: &[Bar],
    i: usize,
    period: usize,
    entry_z: f64,
    rsi_period: usize,
    rsi_confirm: bool,
    ind: &IndicatorValues,
) -> Option<EntrySignal> {
    let mean = ind.get(&format!("sma_{period}"), i)?;
    let std = ind.get(&format!("std_{period}"), i)?;
    if std <= 0.0 {
        return None;
    }
    let bar = &bars[i];
    let z = (bar.close - mean) / std;
    let rsi = if rsi_confirm {
        Some(ind.get(&format!("rsi_{rsi_period}"), i)?)
    } else {
        None
    };
    if z <= -entry_z && rsi.map_or(true, |r| r <= RSI_OVERSOLD) {
        Some(EntrySignal::at_close(Side::Long, bar))
    } else if z >= entry_z && rsi.map_or(true, |r| r >= RSI_OVERBOUGHT) {
        Some(EntrySignal::at_close(Side::Short, bar))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::make_ohlc_bars;
    use crate::strategy::{ExitParams, StrategyFamily};

    fn prepare(config: &StrategyConfig, bars: &[Bar]) -> IndicatorValues {
        let mut ind = IndicatorValues::new();
        for indicator in required_indicators(config) {
            ind.compute(indicator.as_ref(), bars);
        }
        ind
    }

    fn flat(n: usize) -> Vec<(f64, f64, f64, f64)> {
        vec![(100.0, 101.0, 99.0, 100.0); n]
    }

    fn exits(atr_period: usize) -> ExitParams {
        ExitParams {
            atr_period,
            ..ExitParams::default()
        }
    }

    #[test]
    fn range_breakout_long_and_short() {
        let mut data = flat(10);
        data.push((100.0, 103.0, 99.5, 102.5));
        data.push((100.0, 100.5, 96.0, 97.0));
        let bars = make_ohlc_bars(&data);
        let config = StrategyConfig::RangeBreakout {
            lookback: 5,
            exits: exits(3),
        };
        let ind = prepare(&config, &bars);
        assert_eq!(evaluate_entry(&config, &bars, 9, &ind), None);
        let long = evaluate_entry(&config, &bars, 10, &ind).unwrap();
        assert_eq!(long.side, Side::Long);
        assert_eq!(long.price, 102.5);
        assert!(!long.intrabar);
        let short = evaluate_entry(&config, &bars, 11, &ind).unwrap();
        assert_eq!(short.side, Side::Short);
    }

    #[test]
    fn break_and_retest_enters_once_on_first_retest() {
        let mut data = flat(10);
        data.push((100.0, 104.0, 100.0, 103.5)); // 10: breakout above 101
        data.push((103.5, 103.9, 103.0, 103.8)); // 11: holds above
        data.push((103.8, 104.0, 101.1, 102.0)); // 12: retest of 101 and close above
        data.push((102.0, 103.0, 101.0, 102.5)); // 13: second touch, no new entry
        let bars = make_ohlc_bars(&data);
        let config = StrategyConfig::BreakAndRetest {
            lookback: 5,
            retest_window: 5,
            retest_tolerance_atr: 0.25,
            exits: exits(3),
        };
        let ind = prepare(&config, &bars);
        assert_eq!(evaluate_entry(&config, &bars, 11, &ind), None);
        let entry = evaluate_entry(&config, &bars, 12, &ind).unwrap();
        assert_eq!(entry.side, Side::Long);
        assert_eq!(evaluate_entry(&config, &bars, 13, &ind), None);
    }

    #[test]
    fn fvg_retrace_fills_at_gap_edge() {
        let mut data = flat(6);
        data.push((100.0, 101.0, 99.0, 100.5)); // 6: left bar, high 101
        data.push((100.5, 106.0, 100.5, 105.5)); // 7: impulse
        data.push((105.5, 108.0, 104.0, 107.0)); // 8: right bar, low 104 -> gap 101..104
        data.push((107.0, 109.0, 105.0, 108.0)); // 9: stays above gap
        data.push((108.0, 108.5, 103.0, 104.0)); // 10: trades back into the gap
        let bars = make_ohlc_bars(&data);
        let config = StrategyConfig::FvgRetrace {
            min_gap_atr: 0.3,
            max_gap_age: 10,
            exits: exits(3),
        };
        let ind = prepare(&config, &bars);
        assert_eq!(evaluate_entry(&config, &bars, 9, &ind), None);
        let entry = evaluate_entry(&config, &bars, 10, &ind).unwrap();
        assert_eq!(entry.side, Side::Long);
        assert_eq!(entry.price, 104.0);
        assert!(entry.intrabar);
    }

    #[test]
    fn mean_reversion_fades_stretched_close() {
        let mut data = flat(20);
        data.push((100.0, 100.0, 90.0, 91.0));
        let bars = make_ohlc_bars(&data);
        let config = StrategyFamily::MeanReversion
            .default_config()
            .with_param("atr_period", &crate::strategy::ParamValue::Int(3))
            .unwrap();
        let ind = prepare(&config, &bars);
        let entry = evaluate_entry(&config, &bars, 20, &ind).unwrap();
        assert_eq!(entry.side, Side::Long);
    }

    #[test]
    fn no_signal_before_atr_warmup() {
        let mut data = flat(3);
        data.push((100.0, 110.0, 99.0, 109.0));
        let bars = make_ohlc_bars(&data);
        let config = StrategyConfig::RangeBreakout {
            lookback: 2,
            exits: exits(14),
        };
        let ind = prepare(&config, &bars);
        assert_eq!(evaluate_entry(&config, &bars, 3, &ind), None);
    }
}
