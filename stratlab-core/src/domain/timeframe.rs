//! Bar timeframes and resolution-string normalization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported bar resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported timeframe: {0:?}")]
pub struct TimeframeError(pub String);

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Bar length in minutes.
    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.minutes())
    }

    pub fn is_intraday(&self) -> bool {
        !matches!(self, Timeframe::D1)
    }

    /// Normalize a loosely formatted resolution string.
    ///
    /// Accepts the canonical form (`"5m"`), letter-first aliases (`"M5"`,
    /// `"h1"`, `"D1"`) and bare minute counts (`"1"`, `"5"`, `"15"`, `"30"`,
    /// `"60"`).
    pub fn normalize(raw: &str) -> Option<Timeframe> {
        let lowered = raw.trim().to_ascii_lowercase();
        if lowered.is_empty() || !lowered.is_ascii() {
            return None;
        }
        if let Some(tf) = Self::from_canonical(&lowered) {
            return Some(tf);
        }
        let (head, tail) = lowered.split_at(1);
        if matches!(head, "m" | "h" | "d")
            && !tail.is_empty()
            && tail.chars().all(|c| c.is_ascii_digit())
        {
            return Self::from_canonical(&format!("{tail}{head}"));
        }
        if lowered.chars().all(|c| c.is_ascii_digit()) {
            return match lowered.as_str() {
                "60" => Some(Timeframe::H1),
                "1" | "5" | "15" | "30" => Self::from_canonical(&format!("{lowered}m")),
                _ => None,
            };
        }
        None
    }

    fn from_canonical(s: &str) -> Option<Timeframe> {
        Self::ALL.iter().copied().find(|tf| tf.as_str() == s)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s).ok_or_else(|| TimeframeError(s.to_string()))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = TimeframeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_strings_parse() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
    }

    #[test]
    fn letter_first_aliases() {
        assert_eq!(Timeframe::normalize("M5"), Some(Timeframe::M5));
        assert_eq!(Timeframe::normalize("h1"), Some(Timeframe::H1));
        assert_eq!(Timeframe::normalize("H4"), Some(Timeframe::H4));
        assert_eq!(Timeframe::normalize("d1"), Some(Timeframe::D1));
        assert_eq!(Timeframe::normalize("m7"), None);
    }

    #[test]
    fn bare_minute_counts() {
        assert_eq!(Timeframe::normalize("60"), Some(Timeframe::H1));
        assert_eq!(Timeframe::normalize("15"), Some(Timeframe::M15));
        assert_eq!(Timeframe::normalize("1"), Some(Timeframe::M1));
        assert_eq!(Timeframe::normalize("240"), None);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!("".parse::<Timeframe>().is_err());
        assert!("weekly".parse::<Timeframe>().is_err());
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&Timeframe::M15).unwrap();
        assert_eq!(json, "\"15m\"");
        let back: Timeframe = serde_json::from_str("\"H1\"").unwrap();
        assert_eq!(back, Timeframe::H1);
    }
}
