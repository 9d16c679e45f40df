//! Typed parameter values and per-family parameter specs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single parameter value as used by grids and perturbation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Mode(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Mode(_) => "mode",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Mode(v) => f.write_str(v),
        }
    }
}

/// Value domain of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    Float,
    Bool,
    Mode(&'static [&'static str]),
}

/// Name and kind of one configurable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub const fn new(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind }
    }

    /// Parse one textual value for this parameter.
    pub fn parse_value(&self, raw: &str) -> Option<ParamValue> {
        let raw = raw.trim();
        match self.kind {
            ParamKind::Int => raw.parse::<i64>().ok().map(ParamValue::Int),
            ParamKind::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(ParamValue::Float),
            ParamKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(ParamValue::Bool(true)),
                "false" | "0" | "no" | "off" => Some(ParamValue::Bool(false)),
                _ => None,
            },
            ParamKind::Mode(allowed) => {
                let lowered = raw.to_ascii_lowercase();
                allowed
                    .iter()
                    .find(|m| **m == lowered)
                    .map(|m| ParamValue::Mode((*m).to_string()))
            }
        }
    }
}

pub const TIE_BREAKER_MODES: &[&str] = &["sl", "tp"];
pub const DIRECTION_MODES: &[&str] = &["both", "long_only", "short_only"];

/// Exit parameters shared by every family, in declaration order.
pub const EXIT_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("atr_period", ParamKind::Int),
    ParamSpec::new("atr_mult", ParamKind::Float),
    ParamSpec::new("rr", ParamKind::Float),
    ParamSpec::new("tie_breaker", ParamKind::Mode(TIE_BREAKER_MODES)),
    ParamSpec::new("direction", ParamKind::Mode(DIRECTION_MODES)),
    ParamSpec::new("htf_ema", ParamKind::Int),
];
