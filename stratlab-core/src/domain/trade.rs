//! Trade: one simulated position from entry to exit, measured in R.

use crate::regime::RegimeKey;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Loss,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    EndOfData,
}

/// Higher-timeframe trend bias at entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HtfBias {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub side: Side,

    // ── Entry ──
    pub entry_index: usize,
    pub entry_time: NaiveDateTime,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,

    // ── Exit ──
    pub exit_index: Option<usize>,
    pub exit_time: Option<NaiveDateTime>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,

    // ── Result ──
    pub outcome: Outcome,
    /// Realized R for closed trades, unrealized R at the last close for open ones.
    pub r_multiple: f64,

    // ── Metadata ──
    pub regime: Option<RegimeKey>,
    pub htf_bias: Option<HtfBias>,
}

impl Trade {
    /// Initial risk per unit: distance from entry to stop.
    pub fn risk(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }

    pub fn is_open(&self) -> bool {
        self.outcome == Outcome::Open
    }

    pub fn is_winner(&self) -> bool {
        self.outcome == Outcome::Win
    }

    pub fn is_loser(&self) -> bool {
        self.outcome == Outcome::Loss
    }

    pub fn bars_held(&self) -> Option<usize> {
        self.exit_index.map(|exit| exit - self.entry_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_trade() -> Trade {
        let t0 = NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        Trade {
            side: Side::Short,
            entry_index: 4,
            entry_time: t0,
            entry_price: 100.0,
            stop_loss: 102.0,
            take_profit: 96.0,
            exit_index: Some(8),
            exit_time: Some(t0 + chrono::Duration::hours(4)),
            exit_price: Some(96.0),
            exit_reason: Some(ExitReason::TakeProfit),
            outcome: Outcome::Win,
            r_multiple: 2.0,
            regime: None,
            htf_bias: Some(HtfBias::Bearish),
        }
    }

    #[test]
    fn risk_is_entry_stop_distance() {
        assert!((sample_trade().risk() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn outcome_helpers() {
        let trade = sample_trade();
        assert!(trade.is_winner());
        assert!(!trade.is_loser());
        assert!(!trade.is_open());
        assert_eq!(trade.bars_held(), Some(4));
    }

    #[test]
    fn serializes_snake_case_enums() {
        let json = serde_json::to_value(sample_trade()).unwrap();
        assert_eq!(json["side"], "short");
        assert_eq!(json["exit_reason"], "take_profit");
        assert_eq!(json["htf_bias"], "bearish");
        assert!(json["regime"].is_null());
    }
}
