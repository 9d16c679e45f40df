//! Relative Strength Index with Wilder-smoothed gains and losses.
//!
//! First value at index `period`. No movement gives 50, no losses 100,
//! no gains 0.

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    name: String,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("rsi_{period}"),
        }
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let n = bars.len();
        let p = self.period;
        let mut out = vec![f64::NAN; n];
        if n <= p {
            return out;
        }
        let change = |i: usize| bars[i].close - bars[i - 1].close;

        let (mut gain, mut loss) = (1..=p).fold((0.0, 0.0), |(g, l), i| {
            let ch = change(i);
            (g + ch.max(0.0), l + (-ch).max(0.0))
        });
        gain /= p as f64;
        loss /= p as f64;
        out[p] = rsi_value(gain, loss);

        let alpha = 1.0 / p as f64;
        for i in (p + 1)..n {
            let ch = change(i);
            gain = alpha * ch.max(0.0) + (1.0 - alpha) * gain;
            loss = alpha * (-ch).max(0.0) + (1.0 - alpha) * loss;
            out[i] = rsi_value(gain, loss);
        }
        out
    }
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars};

    #[test]
    fn rsi_all_gains() {
        let result = Rsi::new(3).compute(&make_bars(&[100.0, 101.0, 102.0, 103.0, 104.0]));
        assert!(result[2].is_nan());
        assert_approx(result[3], 100.0, 1e-9);
    }

    #[test]
    fn rsi_all_losses() {
        let result = Rsi::new(3).compute(&make_bars(&[105.0, 104.0, 103.0, 102.0, 101.0]));
        assert_approx(result[3], 0.0, 1e-9);
    }

    #[test]
    fn rsi_flat_is_fifty() {
        let result = Rsi::new(3).compute(&make_bars(&[100.0; 5]));
        assert_approx(result[4], 50.0, 1e-9);
    }

    #[test]
    fn rsi_bounds() {
        let result = Rsi::new(3).compute(&make_bars(&[
            100.0, 105.0, 98.0, 110.0, 95.0, 115.0, 90.0, 120.0,
        ]));
        for v in result.iter().filter(|v| !v.is_nan()) {
            assert!((0.0..=100.0).contains(v));
        }
    }
}
