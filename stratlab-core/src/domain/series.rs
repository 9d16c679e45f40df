//! BarSeries: validated, immutable, time-ordered bars for one symbol/timeframe.

use super::bar::Bar;
use super::timeframe::Timeframe;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BarError {
    #[error("bar {index} at {timestamp} fails OHLC sanity")]
    Insane {
        index: usize,
        timestamp: NaiveDateTime,
    },
    #[error("bar {index} at {timestamp} is not after the previous bar")]
    NotIncreasing {
        index: usize,
        timestamp: NaiveDateTime,
    },
}

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// Window of `days` whole calendar days starting at midnight of `start`.
    pub fn from_days(start: NaiveDate, days: i64) -> Self {
        let start = start.and_time(chrono::NaiveTime::MIN);
        Self {
            start,
            end: start + chrono::Duration::days(days),
        }
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// Ordered bar series. Timestamps are strictly increasing and every bar is sane.
#[derive(Debug, Clone, Serialize)]
pub struct BarSeries {
    symbol: String,
    timeframe: Timeframe,
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        bars: Vec<Bar>,
    ) -> Result<Self, BarError> {
        for (index, bar) in bars.iter().enumerate() {
            if !bar.is_sane() {
                return Err(BarError::Insane {
                    index,
                    timestamp: bar.timestamp,
                });
            }
            if index > 0 && bar.timestamp <= bars[index - 1].timestamp {
                return Err(BarError::NotIncreasing {
                    index,
                    timestamp: bar.timestamp,
                });
            }
        }
        Ok(Self {
            symbol: symbol.into(),
            timeframe,
            bars,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.date())
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date())
    }

    /// Calendar days spanned, first and last date inclusive. Zero when empty.
    pub fn total_days(&self) -> i64 {
        match (self.first_date(), self.last_date()) {
            (Some(first), Some(last)) => (last - first).num_days() + 1,
            _ => 0,
        }
    }

    /// Index range of bars whose timestamp falls inside `window`.
    pub fn index_range(&self, window: &TimeWindow) -> Range<usize> {
        let start = self.bars.partition_point(|b| b.timestamp < window.start);
        let end = self.bars.partition_point(|b| b.timestamp < window.end);
        start..end.max(start)
    }

    /// Copy of the series restricted to the trailing `days` calendar days.
    pub fn tail_days(&self, days: i64) -> BarSeries {
        let Some(last) = self.last_date() else {
            return self.clone();
        };
        let cutoff = (last - chrono::Duration::days(days - 1)).and_time(chrono::NaiveTime::MIN);
        let start = self.bars.partition_point(|b| b.timestamp < cutoff);
        BarSeries {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            bars: self.bars[start..].to_vec(),
        }
    }
}
