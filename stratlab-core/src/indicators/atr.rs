//! Average True Range with Wilder smoothing.
//!
//! TR[t] = max(high - low, |high - close[t-1]|, |low - close[t-1]|). The first
//! bar has no previous close so TR[0] is NaN and ATR[period] is the first value.

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    name: String,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("atr_{period}"),
        }
    }
}

pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    let mut tr = vec![f64::NAN; bars.len()];
    for i in 1..bars.len() {
        let (h, l, pc) = (bars[i].high, bars[i].low, bars[i - 1].close);
        tr[i] = (h - l).max((h - pc).abs()).max((l - pc).abs());
    }
    tr
}

/// Wilder smoothing (alpha = 1/period), seeded with the mean of the first
/// `period` finite values after any leading NaNs.
pub fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 {
        return out;
    }
    let Some(first) = values.iter().position(|v| v.is_finite()) else {
        return out;
    };
    let seed_end = first + period;
    if seed_end > values.len() {
        return out;
    }
    let mut prev = values[first..seed_end].iter().sum::<f64>() / period as f64;
    out[seed_end - 1] = prev;
    let alpha = 1.0 / period as f64;
    for i in seed_end..values.len() {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        out[i] = prev;
    }
    out
}

impl Indicator for Atr {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        wilder_smooth(&true_range(bars), self.period)
    }
}
