//! Indicators used by the strategy families and the regime classifier.
//!
//! Every indicator is a pure function of the bar history: bar `t` never sees
//! data from `t+1` or later. Series have the same length as the input and carry
//! `f64::NAN` through the warmup.

pub mod atr;
pub mod donchian;
pub mod ema;
pub mod rsi;
pub mod sma;
pub mod stddev;

pub use atr::{true_range, wilder_smooth, Atr};
pub use donchian::{rolling_max, rolling_min, Donchian, DonchianBand};
pub use ema::{ema_of_series, Ema};
pub use rsi::Rsi;
pub use sma::{sma_of_series, Sma};
pub use stddev::{rolling_std, RollingStd};

use crate::domain::Bar;
use std::collections::HashMap;

/// A named, precomputable indicator.
pub trait Indicator: Send + Sync {
    /// Series name, e.g. `"atr_14"`.
    fn name(&self) -> &str;

    /// Number of leading bars that are NaN.
    fn lookback(&self) -> usize;

    fn compute(&self, bars: &[Bar]) -> Vec<f64>;
}

/// Precomputed indicator series, queried by bar index.
#[derive(Debug, Clone, Default)]
pub struct IndicatorValues {
    series: HashMap<String, Vec<f64>>,
}

impl IndicatorValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.series.insert(name.into(), values);
    }

    /// Compute `indicator` over `bars` and store it under its own name.
    /// Already-present series are not recomputed.
    pub fn compute(&mut self, indicator: &dyn Indicator, bars: &[Bar]) {
        if !self.series.contains_key(indicator.name()) {
            self.series
                .insert(indicator.name().to_string(), indicator.compute(bars));
        }
    }

    /// Value at `bar_index`, `None` when the series is missing, out of range, or NaN.
    pub fn get(&self, name: &str, bar_index: usize) -> Option<f64> {
        self.series
            .get(name)
            .and_then(|v| v.get(bar_index).copied())
            .filter(|v| v.is_finite())
    }

    pub fn get_series(&self, name: &str) -> Option<&[f64]> {
        self.series.get(name).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Close prices of a bar slice.
pub fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

/// Daily bars from close prices: open = previous close, high/low one point outside.
#[cfg(test)]
pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    let data: Vec<(f64, f64, f64, f64)> = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            (open, open.max(close) + 1.0, open.min(close) - 1.0, close)
        })
        .collect();
    make_ohlc_bars(&data)
}

/// Daily bars from `(open, high, low, close)` tuples.
#[cfg(test)]
pub fn make_ohlc_bars(data: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
    let base = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    data.iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| Bar {
            timestamp: base + chrono::Duration::days(i as i64),
            open,
            high,
            low,
            close,
            volume: 1000,
        })
        .collect()
}

#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, epsilon={epsilon}"
    );
}

#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_get_skips_nan_and_out_of_range() {
        let mut iv = IndicatorValues::new();
        iv.insert("sma_3", vec![f64::NAN, f64::NAN, 10.0]);
        assert_eq!(iv.get("sma_3", 0), None);
        assert_eq!(iv.get("sma_3", 2), Some(10.0));
        assert_eq!(iv.get("sma_3", 3), None);
        assert_eq!(iv.get("missing", 0), None);
    }

    #[test]
    fn compute_is_idempotent_per_name() {
        let bars = make_bars(&[1.0, 2.0, 3.0, 4.0]);
        let mut iv = IndicatorValues::new();
        iv.compute(&Sma::new(2), &bars);
        iv.compute(&Sma::new(2), &bars);
        iv.compute(&Ema::new(2), &bars);
        assert_eq!(iv.len(), 2);
        assert_eq!(iv.get("sma_2", 1), Some(1.5));
    }
}
