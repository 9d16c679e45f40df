//! Sort keys for ranking optimizer results.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::metrics::{EquityCurve, Stats};

/// Which metric orders the optimizer leaderboard.
///
/// Every key ranks best-first; `MaxDrawdown` is the only ascending one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    NetR,
    Expectancy,
    ProfitFactor,
    WinRate,
    MaxDrawdown,
}

impl SortKey {
    pub const ALL: [SortKey; 5] = [
        SortKey::NetR,
        SortKey::Expectancy,
        SortKey::ProfitFactor,
        SortKey::WinRate,
        SortKey::MaxDrawdown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::NetR => "net_r",
            SortKey::Expectancy => "expectancy",
            SortKey::ProfitFactor => "profit_factor",
            SortKey::WinRate => "win_rate",
            SortKey::MaxDrawdown => "max_drawdown",
        }
    }

    /// Order two results best-first under this key, then by trade count
    /// (more first). Callers append their own final tie-break.
    pub fn compare(&self, a: (&Stats, &EquityCurve), b: (&Stats, &EquityCurve)) -> Ordering {
        let primary = match self {
            SortKey::NetR => b.0.net_r.total_cmp(&a.0.net_r),
            SortKey::Expectancy => b.0.expectancy.total_cmp(&a.0.expectancy),
            SortKey::WinRate => b.0.win_rate.total_cmp(&a.0.win_rate),
            SortKey::MaxDrawdown => a.1.max_drawdown.total_cmp(&b.1.max_drawdown),
            SortKey::ProfitFactor => match (a.0.profit_factor, b.0.profit_factor) {
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };
        primary.then_with(|| b.0.trade_count.cmp(&a.0.trade_count))
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == lowered)
            .ok_or_else(|| format!("unknown sort key: {s:?}"))
    }
}
