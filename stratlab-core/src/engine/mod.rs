//! Strategy runner: single-position bar loop over a `BarSeries`.
//!
//! Per bar, in index order:
//! 1. An open position is checked against its stop and target.
//! 2. If flat, and no exit happened on this bar, the family signal is evaluated.
//!    Direction and trend-bias filters apply, then stop/target are placed from ATR.
//! 3. An entry filled inside the bar (gap retrace) is stopped out on the same
//!    bar when the bar's extreme reaches the stop. The target is not credited
//!    on the entry bar since its high (low) may have printed before the fill.
//!
//! Indicators are computed once over the whole series, so a windowed run gets
//! full warm-up history without re-simulating bars outside the window.

pub mod exit;

pub use exit::{resolve_exit, ExitFill};

use crate::domain::{Bar, BarSeries, ExitReason, HtfBias, Outcome, Side, TimeWindow, Trade};
use crate::indicators::IndicatorValues;
use crate::strategy::{evaluate_entry, required_indicators, ConfigError, Direction, StrategyConfig};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("non-finite R-multiple for trade entered at bar {entry_index}")]
    NonFinite { entry_index: usize },
}

/// Run `config` over `series`, optionally restricted to `window`.
///
/// The configuration is validated before any bar is touched.
pub fn run(
    series: &BarSeries,
    config: &StrategyConfig,
    window: Option<&TimeWindow>,
) -> Result<Vec<Trade>, RunError> {
    PreparedStrategy::prepare(series, config)?.run(window)
}

/// A validated configuration with its indicators precomputed over one series.
#[derive(Debug, Clone)]
pub struct PreparedStrategy<'a> {
    series: &'a BarSeries,
    config: StrategyConfig,
    indicators: IndicatorValues,
    atr_key: String,
    bias_key: Option<String>,
}

impl<'a> PreparedStrategy<'a> {
    pub fn prepare(series: &'a BarSeries, config: &StrategyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut indicators = IndicatorValues::new();
        for indicator in required_indicators(config) {
            indicators.compute(indicator.as_ref(), series.bars());
        }
        let exits = config.exits();
        Ok(Self {
            series,
            config: config.clone(),
            indicators,
            atr_key: format!("atr_{}", exits.atr_period),
            bias_key: exits.htf_ema.map(|p| format!("ema_{p}")),
        })
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn series(&self) -> &BarSeries {
        self.series
    }

    /// Simulate over the bars inside `window` (all bars when `None`).
    pub fn run(&self, window: Option<&TimeWindow>) -> Result<Vec<Trade>, RunError> {
        let range = match window {
            Some(w) => self.series.index_range(w),
            None => 0..self.series.len(),
        };
        self.run_range(range)
    }

    /// Simulate over an index range of the series.
    pub fn run_range(&self, range: Range<usize>) -> Result<Vec<Trade>, RunError> {
        let bars = self.series.bars();
        let end = range.end.min(bars.len());
        let exits = self.config.exits();
        let mut trades = Vec::new();
        let mut open: Option<Trade> = None;

        for i in range.start..end {
            let bar = &bars[i];
            let mut exited_here = false;

            if let Some(mut trade) = open.take() {
                match resolve_exit(
                    trade.side,
                    trade.stop_loss,
                    trade.take_profit,
                    bar,
                    exits.tie_breaker,
                ) {
                    Some(fill) => {
                        close_trade(&mut trade, i, bar, fill)?;
                        trades.push(trade);
                        exited_here = true;
                    }
                    None => open = Some(trade),
                }
            }

            if open.is_none() && !exited_here {
                if let Some((mut trade, intrabar)) = self.try_enter(i) {
                    if intrabar && stopped_on_entry_bar(&trade, bar) {
                        let fill = ExitFill {
                            reason: ExitReason::StopLoss,
                            price: trade.stop_loss,
                        };
                        close_trade(&mut trade, i, bar, fill)?;
                        trades.push(trade);
                    } else {
                        open = Some(trade);
                    }
                }
            }
        }

        if let Some(mut trade) = open {
            let last = &bars[end - 1];
            trade.r_multiple = r_multiple(&trade, last.close);
            if !trade.r_multiple.is_finite() {
                return Err(RunError::NonFinite {
                    entry_index: trade.entry_index,
                });
            }
            trades.push(trade);
        }
        Ok(trades)
    }

    /// The entered trade, and whether it was filled before the bar closed.
    fn try_enter(&self, i: usize) -> Option<(Trade, bool)> {
        let bars = self.series.bars();
        let exits = self.config.exits();
        let signal = evaluate_entry(&self.config, bars, i, &self.indicators)?;

        let allowed = match exits.direction {
            Direction::Both => true,
            Direction::LongOnly => signal.side == Side::Long,
            Direction::ShortOnly => signal.side == Side::Short,
        };
        if !allowed {
            return None;
        }

        let htf_bias = match &self.bias_key {
            Some(key) => {
                let ema = self.indicators.get(key, i)?;
                let bias = if bars[i].close > ema {
                    HtfBias::Bullish
                } else {
                    HtfBias::Bearish
                };
                let agrees = matches!(
                    (signal.side, bias),
                    (Side::Long, HtfBias::Bullish) | (Side::Short, HtfBias::Bearish)
                );
                if !agrees {
                    return None;
                }
                Some(bias)
            }
            None => None,
        };

        let atr = self.indicators.get(&self.atr_key, i)?;
        let risk = atr * exits.atr_mult;
        if !(risk.is_finite() && risk > 0.0 && signal.price.is_finite()) {
            return None;
        }
        let sign = signal.side.sign();
        let trade = Trade {
            side: signal.side,
            entry_index: i,
            entry_time: bars[i].timestamp,
            entry_price: signal.price,
            stop_loss: signal.price - sign * risk,
            take_profit: signal.price + sign * risk * exits.rr,
            exit_index: None,
            exit_time: None,
            exit_price: None,
            exit_reason: None,
            outcome: Outcome::Open,
            r_multiple: 0.0,
            regime: None,
            htf_bias,
        };
        Some((trade, signal.intrabar))
    }
}

fn stopped_on_entry_bar(trade: &Trade, bar: &Bar) -> bool {
    match trade.side {
        Side::Long => bar.low <= trade.stop_loss,
        Side::Short => bar.high >= trade.stop_loss,
    }
}

fn r_multiple(trade: &Trade, price: f64) -> f64 {
    trade.side.sign() * (price - trade.entry_price) / trade.risk()
}

fn close_trade(trade: &mut Trade, index: usize, bar: &Bar, fill: ExitFill) -> Result<(), RunError> {
    let r = r_multiple(trade, fill.price);
    if !r.is_finite() {
        return Err(RunError::NonFinite {
            entry_index: trade.entry_index,
        });
    }
    trade.exit_index = Some(index);
    trade.exit_time = Some(bar.timestamp);
    trade.exit_price = Some(fill.price);
    trade.exit_reason = Some(fill.reason);
    trade.r_multiple = r;
    trade.outcome = match fill.reason {
        ExitReason::TakeProfit => Outcome::Win,
        _ => Outcome::Loss,
    };
    Ok(())
}
