//! Strategy families and their configuration.
//!
//! `StrategyConfig` is a closed sum type: one variant per family, each with its
//! own parameter record plus the shared `ExitParams`. Grid generation, param
//! access, validation, and signal dispatch all match exhaustively on it.

pub mod params;
pub mod signals;

pub use params::{ParamKind, ParamSpec, ParamValue, EXIT_PARAMS};
pub use signals::{evaluate_entry, required_indicators, EntrySignal};

use crate::domain::ConfigHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    InvalidParam { name: String, reason: String },

    #[error("{family} has no parameter named {name:?}")]
    UnknownParam { family: StrategyFamily, name: String },

    #[error("parameter {name} expects {expected}, got {got}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("fast_ema ({fast}) must be below slow_ema ({slow})")]
    FastNotBelowSlow { fast: usize, slow: usize },

    #[error("unknown strategy family: {0:?}")]
    UnknownFamily(String),
}

fn invalid(name: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParam {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Which level wins when one bar's range contains both stop and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreaker {
    #[default]
    Sl,
    Tp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Both,
    LongOnly,
    ShortOnly,
}

/// Stop/target placement shared by every family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitParams {
    pub atr_period: usize,
    /// Stop distance in ATRs.
    pub atr_mult: f64,
    /// Target distance in multiples of the stop distance.
    pub rr: f64,
    pub tie_breaker: TieBreaker,
    pub direction: Direction,
    /// Trend-bias EMA period; entries must agree with close vs this EMA.
    pub htf_ema: Option<usize>,
}

impl Default for ExitParams {
    fn default() -> Self {
        Self {
            atr_period: 14,
            atr_mult: 1.5,
            rr: 2.0,
            tie_breaker: TieBreaker::Sl,
            direction: Direction::Both,
            htf_ema: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyFamily {
    RangeBreakout,
    BreakAndRetest,
    FvgRetrace,
    TrendPullback,
    MeanReversion,
}

impl StrategyFamily {
    pub const ALL: [StrategyFamily; 5] = [
        StrategyFamily::RangeBreakout,
        StrategyFamily::BreakAndRetest,
        StrategyFamily::FvgRetrace,
        StrategyFamily::TrendPullback,
        StrategyFamily::MeanReversion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyFamily::RangeBreakout => "RANGE_BREAKOUT",
            StrategyFamily::BreakAndRetest => "BREAK_AND_RETEST",
            StrategyFamily::FvgRetrace => "FVG_RETRACE",
            StrategyFamily::TrendPullback => "TREND_PULLBACK",
            StrategyFamily::MeanReversion => "MEAN_REVERSION",
        }
    }

    /// Family-specific parameters in declaration order (exit params excluded).
    pub fn own_params(&self) -> &'static [ParamSpec] {
        const RANGE_BREAKOUT: &[ParamSpec] = &[ParamSpec::new("lookback", ParamKind::Int)];
        const BREAK_AND_RETEST: &[ParamSpec] = &[
            ParamSpec::new("lookback", ParamKind::Int),
            ParamSpec::new("retest_window", ParamKind::Int),
            ParamSpec::new("retest_tolerance_atr", ParamKind::Float),
        ];
        const FVG_RETRACE: &[ParamSpec] = &[
            ParamSpec::new("min_gap_atr", ParamKind::Float),
            ParamSpec::new("max_gap_age", ParamKind::Int),
        ];
        const TREND_PULLBACK: &[ParamSpec] = &[
            ParamSpec::new("fast_ema", ParamKind::Int),
            ParamSpec::new("slow_ema", ParamKind::Int),
        ];
        const MEAN_REVERSION: &[ParamSpec] = &[
            ParamSpec::new("period", ParamKind::Int),
            ParamSpec::new("entry_z", ParamKind::Float),
            ParamSpec::new("rsi_period", ParamKind::Int),
            ParamSpec::new("rsi_confirm", ParamKind::Bool),
        ];
        match self {
            StrategyFamily::RangeBreakout => RANGE_BREAKOUT,
            StrategyFamily::BreakAndRetest => BREAK_AND_RETEST,
            StrategyFamily::FvgRetrace => FVG_RETRACE,
            StrategyFamily::TrendPullback => TREND_PULLBACK,
            StrategyFamily::MeanReversion => MEAN_REVERSION,
        }
    }

    /// All parameters in declaration order: family fields, then exit fields.
    pub fn param_specs(&self) -> Vec<ParamSpec> {
        self.own_params()
            .iter()
            .chain(EXIT_PARAMS.iter())
            .copied()
            .collect()
    }

    pub fn param_spec(&self, name: &str) -> Option<ParamSpec> {
        self.param_specs().into_iter().find(|s| s.name == name)
    }

    /// Position of `name` in declaration order.
    pub fn param_position(&self, name: &str) -> Option<usize> {
        self.param_specs().iter().position(|s| s.name == name)
    }

    pub fn default_config(&self) -> StrategyConfig {
        let exits = ExitParams::default();
        match self {
            StrategyFamily::RangeBreakout => StrategyConfig::RangeBreakout {
                lookback: 20,
                exits,
            },
            StrategyFamily::BreakAndRetest => StrategyConfig::BreakAndRetest {
                lookback: 20,
                retest_window: 10,
                retest_tolerance_atr: 0.25,
                exits,
            },
            StrategyFamily::FvgRetrace => StrategyConfig::FvgRetrace {
                min_gap_atr: 0.3,
                max_gap_age: 20,
                exits,
            },
            StrategyFamily::TrendPullback => StrategyConfig::TrendPullback {
                fast_ema: 20,
                slow_ema: 50,
                exits,
            },
            StrategyFamily::MeanReversion => StrategyConfig::MeanReversion {
                period: 20,
                entry_z: 2.0,
                rsi_period: 14,
                rsi_confirm: false,
                exits,
            },
        }
    }
}

impl fmt::Display for StrategyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyFamily {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownFamily(s.to_string()))
    }
}

/// A fully specified strategy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyConfig {
    /// Close beyond the prior `lookback`-bar high/low.
    RangeBreakout {
        lookback: usize,
        #[serde(default)]
        exits: ExitParams,
    },
    /// Breakout, then a pullback to the broken level that holds.
    BreakAndRetest {
        lookback: usize,
        retest_window: usize,
        retest_tolerance_atr: f64,
        #[serde(default)]
        exits: ExitParams,
    },
    /// Retrace into an unfilled three-bar fair value gap.
    FvgRetrace {
        min_gap_atr: f64,
        max_gap_age: usize,
        #[serde(default)]
        exits: ExitParams,
    },
    /// Pullback to the fast EMA while fast and slow EMAs agree on trend.
    TrendPullback {
        fast_ema: usize,
        slow_ema: usize,
        #[serde(default)]
        exits: ExitParams,
    },
    /// Fade a close stretched `entry_z` standard deviations from its mean.
    MeanReversion {
        period: usize,
        entry_z: f64,
        rsi_period: usize,
        rsi_confirm: bool,
        #[serde(default)]
        exits: ExitParams,
    },
}

impl StrategyConfig {
    pub fn family(&self) -> StrategyFamily {
        match self {
            StrategyConfig::RangeBreakout { .. } => StrategyFamily::RangeBreakout,
            StrategyConfig::BreakAndRetest { .. } => StrategyFamily::BreakAndRetest,
            StrategyConfig::FvgRetrace { .. } => StrategyFamily::FvgRetrace,
            StrategyConfig::TrendPullback { .. } => StrategyFamily::TrendPullback,
            StrategyConfig::MeanReversion { .. } => StrategyFamily::MeanReversion,
        }
    }

    pub fn exits(&self) -> &ExitParams {
        match self {
            StrategyConfig::RangeBreakout { exits, .. }
            | StrategyConfig::BreakAndRetest { exits, .. }
            | StrategyConfig::FvgRetrace { exits, .. }
            | StrategyConfig::TrendPullback { exits, .. }
            | StrategyConfig::MeanReversion { exits, .. } => exits,
        }
    }

    fn exits_mut(&mut self) -> &mut ExitParams {
        match self {
            StrategyConfig::RangeBreakout { exits, .. }
            | StrategyConfig::BreakAndRetest { exits, .. }
            | StrategyConfig::FvgRetrace { exits, .. }
            | StrategyConfig::TrendPullback { exits, .. }
            | StrategyConfig::MeanReversion { exits, .. } => exits,
        }
    }

    /// Content fingerprint over the canonical JSON form.
    pub fn fingerprint(&self) -> ConfigHash {
        let json = serde_json::to_vec(self).unwrap_or_default();
        ConfigHash::from_bytes(&json)
    }

    /// Current value of a parameter by name.
    pub fn param(&self, name: &str) -> Option<ParamValue> {
        let int = |v: usize| Some(ParamValue::Int(v as i64));
        let float = |v: f64| Some(ParamValue::Float(v));
        let own = match (self, name) {
            (StrategyConfig::RangeBreakout { lookback, .. }, "lookback")
            | (StrategyConfig::BreakAndRetest { lookback, .. }, "lookback") => int(*lookback),
            (StrategyConfig::BreakAndRetest { retest_window, .. }, "retest_window") => {
                int(*retest_window)
            }
            (
                StrategyConfig::BreakAndRetest {
                    retest_tolerance_atr,
                    ..
                },
                "retest_tolerance_atr",
            ) => float(*retest_tolerance_atr),
            (StrategyConfig::FvgRetrace { min_gap_atr, .. }, "min_gap_atr") => float(*min_gap_atr),
            (StrategyConfig::FvgRetrace { max_gap_age, .. }, "max_gap_age") => int(*max_gap_age),
            (StrategyConfig::TrendPullback { fast_ema, .. }, "fast_ema") => int(*fast_ema),
            (StrategyConfig::TrendPullback { slow_ema, .. }, "slow_ema") => int(*slow_ema),
            (StrategyConfig::MeanReversion { period, .. }, "period") => int(*period),
            (StrategyConfig::MeanReversion { entry_z, .. }, "entry_z") => float(*entry_z),
            (StrategyConfig::MeanReversion { rsi_period, .. }, "rsi_period") => int(*rsi_period),
            (StrategyConfig::MeanReversion { rsi_confirm, .. }, "rsi_confirm") => {
                Some(ParamValue::Bool(*rsi_confirm))
            }
            _ => None,
        };
        if own.is_some() {
            return own;
        }
        let exits = self.exits();
        match name {
            "atr_period" => int(exits.atr_period),
            "atr_mult" => float(exits.atr_mult),
            "rr" => float(exits.rr),
            "tie_breaker" => Some(ParamValue::Mode(
                match exits.tie_breaker {
                    TieBreaker::Sl => "sl",
                    TieBreaker::Tp => "tp",
                }
                .to_string(),
            )),
            "direction" => Some(ParamValue::Mode(
                match exits.direction {
                    Direction::Both => "both",
                    Direction::LongOnly => "long_only",
                    Direction::ShortOnly => "short_only",
                }
                .to_string(),
            )),
            "htf_ema" => int(exits.htf_ema.unwrap_or(0)),
            _ => None,
        }
    }

    /// All parameters with their current values, in declaration order.
    pub fn params(&self) -> Vec<(&'static str, ParamValue)> {
        self.family()
            .param_specs()
            .into_iter()
            .filter_map(|spec| self.param(spec.name).map(|v| (spec.name, v)))
            .collect()
    }

    /// `name=value` pairs joined by `;`, e.g. for CSV rows.
    pub fn params_string(&self) -> String {
        self.params()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Copy with one parameter replaced. The result is not validated.
    pub fn with_param(&self, name: &str, value: &ParamValue) -> Result<Self, ConfigError> {
        let family = self.family();
        let spec = family
            .param_spec(name)
            .ok_or_else(|| ConfigError::UnknownParam {
                family,
                name: name.to_string(),
            })?;
        let mismatch = |expected: &'static str| ConfigError::TypeMismatch {
            name: name.to_string(),
            expected,
            got: value.type_name(),
        };

        let as_usize = || -> Result<usize, ConfigError> {
            match value {
                ParamValue::Int(v) if *v >= 0 => Ok(*v as usize),
                ParamValue::Int(_) => Err(invalid(name, "must be non-negative")),
                _ => Err(mismatch("int")),
            }
        };
        let as_f64 = || value.as_f64().ok_or_else(|| mismatch("float"));
        let as_bool = || match value {
            ParamValue::Bool(b) => Ok(*b),
            _ => Err(mismatch("bool")),
        };
        let as_mode = || match value {
            ParamValue::Mode(m) => Ok(m.clone()),
            _ => Err(mismatch("mode")),
        };

        let mut next = self.clone();
        match (&mut next, spec.name) {
            (StrategyConfig::RangeBreakout { lookback, .. }, "lookback")
            | (StrategyConfig::BreakAndRetest { lookback, .. }, "lookback") => {
                *lookback = as_usize()?
            }
            (StrategyConfig::BreakAndRetest { retest_window, .. }, "retest_window") => {
                *retest_window = as_usize()?
            }
            (
                StrategyConfig::BreakAndRetest {
                    retest_tolerance_atr,
                    ..
                },
                "retest_tolerance_atr",
            ) => *retest_tolerance_atr = as_f64()?,
            (StrategyConfig::FvgRetrace { min_gap_atr, .. }, "min_gap_atr") => {
                *min_gap_atr = as_f64()?
            }
            (StrategyConfig::FvgRetrace { max_gap_age, .. }, "max_gap_age") => {
                *max_gap_age = as_usize()?
            }
            (StrategyConfig::TrendPullback { fast_ema, .. }, "fast_ema") => *fast_ema = as_usize()?,
            (StrategyConfig::TrendPullback { slow_ema, .. }, "slow_ema") => *slow_ema = as_usize()?,
            (StrategyConfig::MeanReversion { period, .. }, "period") => *period = as_usize()?,
            (StrategyConfig::MeanReversion { entry_z, .. }, "entry_z") => *entry_z = as_f64()?,
            (StrategyConfig::MeanReversion { rsi_period, .. }, "rsi_period") => {
                *rsi_period = as_usize()?
            }
            (StrategyConfig::MeanReversion { rsi_confirm, .. }, "rsi_confirm") => {
                *rsi_confirm = as_bool()?
            }
            (config, exit_name) => {
                let exits = config.exits_mut();
                match exit_name {
                    "atr_period" => exits.atr_period = as_usize()?,
                    "atr_mult" => exits.atr_mult = as_f64()?,
                    "rr" => exits.rr = as_f64()?,
                    "tie_breaker" => {
                        exits.tie_breaker = match as_mode()?.as_str() {
                            "tp" => TieBreaker::Tp,
                            "sl" => TieBreaker::Sl,
                            other => return Err(invalid(name, format!("unknown mode {other:?}"))),
                        }
                    }
                    "direction" => {
                        exits.direction = match as_mode()?.as_str() {
                            "both" => Direction::Both,
                            "long_only" => Direction::LongOnly,
                            "short_only" => Direction::ShortOnly,
                            other => return Err(invalid(name, format!("unknown mode {other:?}"))),
                        }
                    }
                    "htf_ema" => {
                        let period = as_usize()?;
                        exits.htf_ema = (period > 0).then_some(period);
                    }
                    _ => {
                        return Err(ConfigError::UnknownParam {
                            family,
                            name: name.to_string(),
                        })
                    }
                }
            }
        }
        Ok(next)
    }

    /// Reject parameter combinations that cannot be simulated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let at_least = |name: &str, value: usize, min: usize| {
            if value < min {
                Err(invalid(name, format!("must be >= {min}, got {value}")))
            } else {
                Ok(())
            }
        };
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(invalid(name, format!("must be a positive number, got {value}")))
            }
        };
        let non_negative = |name: &str, value: f64| {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(invalid(name, format!("must be >= 0, got {value}")))
            }
        };

        match self {
            StrategyConfig::RangeBreakout { lookback, .. } => at_least("lookback", *lookback, 1)?,
            StrategyConfig::BreakAndRetest {
                lookback,
                retest_window,
                retest_tolerance_atr,
                ..
            } => {
                at_least("lookback", *lookback, 1)?;
                at_least("retest_window", *retest_window, 1)?;
                non_negative("retest_tolerance_atr", *retest_tolerance_atr)?;
            }
            StrategyConfig::FvgRetrace {
                min_gap_atr,
                max_gap_age,
                ..
            } => {
                non_negative("min_gap_atr", *min_gap_atr)?;
                at_least("max_gap_age", *max_gap_age, 1)?;
            }
            StrategyConfig::TrendPullback {
                fast_ema, slow_ema, ..
            } => {
                at_least("fast_ema", *fast_ema, 1)?;
                if fast_ema >= slow_ema {
                    return Err(ConfigError::FastNotBelowSlow {
                        fast: *fast_ema,
                        slow: *slow_ema,
                    });
                }
            }
            StrategyConfig::MeanReversion {
                period,
                entry_z,
                rsi_period,
                ..
            } => {
                at_least("period", *period, 2)?;
                positive("entry_z", *entry_z)?;
                at_least("rsi_period", *rsi_period, 1)?;
            }
        }

        let exits = self.exits();
        at_least("atr_period", exits.atr_period, 1)?;
        positive("atr_mult", exits.atr_mult)?;
        positive("rr", exits.rr)?;
        if let Some(period) = exits.htf_ema {
            at_least("htf_ema", period, 2)?;
        }
        Ok(())
    }

    /// Short human-readable label: family plus params.
    pub fn label(&self) -> String {
        format!("{}({})", self.family(), self.params_string())
    }
}
