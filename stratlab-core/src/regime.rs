//! Market regime classification of trades.
//!
//! A `RegimeKey` buckets the conditions at a trade's entry bar by volatility,
//! trend, and trading session. Classification is a pure function of the trade
//! and a precomputed `BarsContext`.

use crate::domain::{BarSeries, Trade};
use crate::indicators::{ema_of_series, true_range, wilder_smooth};
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Volatility {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Trend {
    Up,
    Down,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Session {
    Asia,
    London,
    NewYork,
    OffHours,
    /// Daily bars carry no session.
    Daily,
}

impl Volatility {
    fn as_str(&self) -> &'static str {
        match self {
            Volatility::Low => "low_vol",
            Volatility::Normal => "normal_vol",
            Volatility::High => "high_vol",
        }
    }
}

impl Trend {
    fn as_str(&self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Range => "range",
        }
    }
}

impl Session {
    fn as_str(&self) -> &'static str {
        match self {
            Session::Asia => "asia",
            Session::London => "london",
            Session::NewYork => "new_york",
            Session::OffHours => "off_hours",
            Session::Daily => "daily",
        }
    }

    /// Session of a UTC hour.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=6 => Session::Asia,
            7..=11 => Session::London,
            12..=20 => Session::NewYork,
            _ => Session::OffHours,
        }
    }
}

/// Volatility × trend × session bucket, serialized as `"high_vol/up/london"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegimeKey {
    pub volatility: Volatility,
    pub trend: Trend,
    pub session: Session,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed regime key: {0:?}")]
pub struct RegimeKeyError(pub String);

impl RegimeKey {
    pub fn new(volatility: Volatility, trend: Trend, session: Session) -> Self {
        Self {
            volatility,
            trend,
            session,
        }
    }
}

impl fmt::Display for RegimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.volatility.as_str(),
            self.trend.as_str(),
            self.session.as_str()
        )
    }
}

impl FromStr for RegimeKey {
    type Err = RegimeKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || RegimeKeyError(s.to_string());
        let mut parts = s.trim().split('/');
        let (Some(vol), Some(trend), Some(session), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(err());
        };
        let volatility = [Volatility::Low, Volatility::Normal, Volatility::High]
            .into_iter()
            .find(|v| v.as_str() == vol)
            .ok_or_else(err)?;
        let trend = [Trend::Up, Trend::Down, Trend::Range]
            .into_iter()
            .find(|t| t.as_str() == trend)
            .ok_or_else(err)?;
        let session = [
            Session::Asia,
            Session::London,
            Session::NewYork,
            Session::OffHours,
            Session::Daily,
        ]
        .into_iter()
        .find(|x| x.as_str() == session)
        .ok_or_else(err)?;
        Ok(Self::new(volatility, trend, session))
    }
}

impl TryFrom<String> for RegimeKey {
    type Error = RegimeKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RegimeKey> for String {
    fn from(key: RegimeKey) -> Self {
        key.to_string()
    }
}

/// Thresholds for the default classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub atr_period: usize,
    /// Trailing bars used for the ATR median baseline.
    pub vol_baseline: usize,
    /// ATR / median below this is low volatility.
    pub low_vol_ratio: f64,
    /// ATR / median above this is high volatility.
    pub high_vol_ratio: f64,
    pub trend_ema: usize,
    /// Bars over which the EMA slope is measured.
    pub slope_bars: usize,
    /// Slope below this many ATRs counts as range.
    pub trend_atr_threshold: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            atr_period: 14,
            vol_baseline: 100,
            low_vol_ratio: 0.8,
            high_vol_ratio: 1.25,
            trend_ema: 50,
            slope_bars: 5,
            trend_atr_threshold: 0.5,
        }
    }
}

/// Per-bar series the classifier reads, computed once per bar series.
#[derive(Debug, Clone)]
pub struct BarsContext<'a> {
    series: &'a BarSeries,
    config: RegimeConfig,
    atr: Vec<f64>,
    atr_median: Vec<f64>,
    trend_ema: Vec<f64>,
}

impl<'a> BarsContext<'a> {
    pub fn new(series: &'a BarSeries, config: RegimeConfig) -> Self {
        let bars = series.bars();
        let atr = wilder_smooth(&true_range(bars), config.atr_period.max(1));
        let atr_median = trailing_median(&atr, config.vol_baseline.max(1));
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let trend_ema = ema_of_series(&closes, config.trend_ema.max(1));
        Self {
            series,
            config,
            atr,
            atr_median,
            trend_ema,
        }
    }

    pub fn series(&self) -> &BarSeries {
        self.series
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }
}

/// Median of the finite values in each trailing window.
fn trailing_median(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    let mut buf = Vec::with_capacity(window);
    for i in 0..values.len() {
        buf.clear();
        buf.extend(
            values[i.saturating_sub(window - 1)..=i]
                .iter()
                .copied()
                .filter(|v| v.is_finite()),
        );
        if buf.is_empty() {
            continue;
        }
        buf.sort_by(f64::total_cmp);
        let mid = buf.len() / 2;
        out[i] = if buf.len() % 2 == 0 {
            (buf[mid - 1] + buf[mid]) / 2.0
        } else {
            buf[mid]
        };
    }
    out
}

/// Assigns a regime to a trade.
pub trait RegimeClassifier: Send + Sync {
    fn classify(&self, trade: &Trade, ctx: &BarsContext<'_>) -> RegimeKey;
}

/// ATR-vs-median volatility, EMA-slope trend, entry-hour session.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtrTrendClassifier;

impl RegimeClassifier for AtrTrendClassifier {
    fn classify(&self, trade: &Trade, ctx: &BarsContext<'_>) -> RegimeKey {
        let i = trade.entry_index.min(ctx.atr.len().saturating_sub(1));
        let cfg = &ctx.config;
        let atr = ctx.atr.get(i).copied().unwrap_or(f64::NAN);

        let ratio = atr / ctx.atr_median.get(i).copied().unwrap_or(f64::NAN);
        let volatility = if !ratio.is_finite() {
            Volatility::Normal
        } else if ratio < cfg.low_vol_ratio {
            Volatility::Low
        } else if ratio > cfg.high_vol_ratio {
            Volatility::High
        } else {
            Volatility::Normal
        };

        let slope = i
            .checked_sub(cfg.slope_bars)
            .map(|j| ctx.trend_ema[i] - ctx.trend_ema[j])
            .unwrap_or(f64::NAN);
        let trend = if !(slope.is_finite() && atr.is_finite()) {
            Trend::Range
        } else if slope > cfg.trend_atr_threshold * atr {
            Trend::Up
        } else if slope < -cfg.trend_atr_threshold * atr {
            Trend::Down
        } else {
            Trend::Range
        };

        let session = if ctx.series.timeframe().is_intraday() {
            Session::from_hour(trade.entry_time.hour())
        } else {
            Session::Daily
        };

        RegimeKey::new(volatility, trend, session)
    }
}

/// Copy of `trades` with each trade's `regime` filled in.
pub fn tag_trades(
    trades: &[Trade],
    classifier: &dyn RegimeClassifier,
    ctx: &BarsContext<'_>,
) -> Vec<Trade> {
    trades
        .iter()
        .map(|t| {
            let mut tagged = t.clone();
            tagged.regime = Some(classifier.classify(t, ctx));
            tagged
        })
        .collect()
}
