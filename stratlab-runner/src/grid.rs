//! Parameter grids: string-parsed axes enumerated by mixed-radix index.
//!
//! Axis syntax:
//! - list: `10,20,30`
//! - inclusive range with step: `1.0..2.0:0.5` (ints: `10..30:10`)
//! - booleans: `true,false`
//! - modes: `sl,tp`, `both,long_only`
//!
//! Axes are kept in the family's declaration order. Index 0 is the first value
//! of every axis; the first axis varies slowest. The Cartesian product is never
//! materialized.

use serde::{Deserialize, Serialize};
use stratlab_core::strategy::{ConfigError, ParamKind, ParamSpec, ParamValue};
use stratlab_core::{StrategyConfig, StrategyFamily};

const MAX_AXIS_VALUES: usize = 10_000;

/// One parameter and its candidate values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamAxis {
    pub name: String,
    pub values: Vec<ParamValue>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamGrid {
    axes: Vec<ParamAxis>,
}

impl ParamGrid {
    /// A grid with no axes: exactly one combination, the base config.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse `(name, axis)` pairs for `family`.
    pub fn parse<N, V>(family: StrategyFamily, specs: &[(N, V)]) -> Result<Self, ConfigError>
    where
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let mut axes = Vec::with_capacity(specs.len());
        for (name, raw) in specs {
            let spec = lookup(family, name.as_ref())?;
            axes.push(ParamAxis {
                name: spec.name.to_string(),
                values: parse_axis(&spec, raw.as_ref())?,
            });
        }
        Self::from_axes(family, axes)
    }

    /// Parse `name=axis` strings as given on a command line.
    pub fn parse_assignments<S: AsRef<str>>(
        family: StrategyFamily,
        assignments: &[S],
    ) -> Result<Self, ConfigError> {
        let pairs = assignments
            .iter()
            .map(|a| {
                a.as_ref()
                    .split_once('=')
                    .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
                    .ok_or_else(|| ConfigError::InvalidParam {
                        name: a.as_ref().to_string(),
                        reason: "expected name=values".into(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::parse(family, &pairs)
    }

    /// Build from already-typed axes; checks names and types, then sorts.
    pub fn from_axes(family: StrategyFamily, mut axes: Vec<ParamAxis>) -> Result<Self, ConfigError> {
        let base = family.default_config();
        for axis in &axes {
            lookup(family, &axis.name)?;
            if axis.values.is_empty() {
                return Err(ConfigError::InvalidParam {
                    name: axis.name.clone(),
                    reason: "axis has no values".into(),
                });
            }
            if axes.iter().filter(|a| a.name == axis.name).count() > 1 {
                return Err(ConfigError::InvalidParam {
                    name: axis.name.clone(),
                    reason: "axis given more than once".into(),
                });
            }
            for value in &axis.values {
                base.with_param(&axis.name, value)?;
            }
        }
        axes.sort_by_key(|a| family.param_position(&a.name).unwrap_or(usize::MAX));
        Ok(Self { axes })
    }

    pub fn axes(&self) -> &[ParamAxis] {
        &self.axes
    }

    pub fn axis(&self, name: &str) -> Option<&ParamAxis> {
        self.axes.iter().find(|a| a.name == name)
    }

    /// Number of combinations (saturating).
    pub fn size(&self) -> u64 {
        self.axes
            .iter()
            .fold(1u64, |acc, a| acc.saturating_mul(a.values.len() as u64))
    }

    /// Values at combination `index`, one per axis, in axis order.
    pub fn decode(&self, index: u64) -> Vec<(&str, &ParamValue)> {
        let mut rest = index;
        let mut picked = Vec::with_capacity(self.axes.len());
        for axis in self.axes.iter().rev() {
            let radix = axis.values.len() as u64;
            picked.push((axis.name.as_str(), &axis.values[(rest % radix) as usize]));
            rest /= radix;
        }
        picked.reverse();
        picked
    }

    /// `base` with combination `index` applied. Not validated.
    pub fn config_at(&self, base: &StrategyConfig, index: u64) -> Result<StrategyConfig, ConfigError> {
        self.decode(index)
            .into_iter()
            .try_fold(base.clone(), |cfg, (name, value)| cfg.with_param(name, value))
    }

    /// `name=value;...` for combination `index`.
    pub fn describe(&self, index: u64) -> String {
        self.decode(index)
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Indices to evaluate under a `max` cap, and whether the grid was cut.
    ///
    /// Under the cap every index is returned; over it, exactly `max` indices
    /// evenly strided across the product (`k * total / max`).
    pub fn sample_indices(&self, max: u64) -> (Vec<u64>, bool) {
        let total = self.size();
        if total <= max {
            return ((0..total).collect(), false);
        }
        let indices = (0..max)
            .map(|k| ((k as u128 * total as u128) / max as u128) as u64)
            .collect();
        (indices, true)
    }

    /// A grid of at most three values per axis: the neighbours of `config`'s
    /// current value on each axis of `self`, plus the value itself.
    pub fn neighbourhood(&self, config: &StrategyConfig) -> ParamGrid {
        let axes = self
            .axes
            .iter()
            .map(|axis| {
                let at = config
                    .param(&axis.name)
                    .map(|v| nearest_position(&axis.values, &v))
                    .unwrap_or(0);
                let lo = at.saturating_sub(1);
                let hi = (at + 1).min(axis.values.len() - 1);
                ParamAxis {
                    name: axis.name.clone(),
                    values: axis.values[lo..=hi].to_vec(),
                }
            })
            .collect();
        ParamGrid { axes }
    }
}

/// Index of the value equal to `target`, or numerically closest to it.
pub fn nearest_position(values: &[ParamValue], target: &ParamValue) -> usize {
    if let Some(i) = values.iter().position(|v| v == target) {
        return i;
    }
    match target.as_f64() {
        Some(t) => values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_f64().map(|x| (i, (x - t).abs())))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
            .unwrap_or(0),
        None => 0,
    }
}

fn lookup(family: StrategyFamily, name: &str) -> Result<ParamSpec, ConfigError> {
    family
        .param_spec(name.trim())
        .ok_or_else(|| ConfigError::UnknownParam {
            family,
            name: name.to_string(),
        })
}

/// Parse one axis string for `spec`.
pub fn parse_axis(spec: &ParamSpec, raw: &str) -> Result<Vec<ParamValue>, ConfigError> {
    let bad = |reason: String| ConfigError::InvalidParam {
        name: spec.name.to_string(),
        reason,
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(bad("empty axis".into()));
    }

    let numeric = matches!(spec.kind, ParamKind::Int | ParamKind::Float);
    let values = match raw.split_once("..") {
        Some((start, rest)) if numeric => {
            let (end, step) = rest
                .split_once(':')
                .ok_or_else(|| bad(format!("range {raw:?} needs a step, e.g. 1..5:1")))?;
            expand_range(spec, start, end, step).map_err(bad)?
        }
        _ => raw
            .split(',')
            .map(|item| {
                spec.parse_value(item)
                    .ok_or_else(|| bad(format!("cannot parse {:?}", item.trim())))
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    let mut unique: Vec<ParamValue> = Vec::with_capacity(values.len());
    for v in values {
        if !unique.contains(&v) {
            unique.push(v);
        }
    }
    Ok(unique)
}

fn expand_range(spec: &ParamSpec, start: &str, end: &str, step: &str) -> Result<Vec<ParamValue>, String> {
    let num = |s: &str| {
        s.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("not a number: {:?}", s.trim()))
    };
    let (start, end, step) = (num(start)?, num(end)?, num(step)?);
    if step <= 0.0 {
        return Err(format!("step must be positive, got {step}"));
    }
    if end < start {
        return Err(format!("range end {end} is below start {start}"));
    }
    let count = ((end - start) / step + 1e-9).floor() as usize + 1;
    if count > MAX_AXIS_VALUES {
        return Err(format!("range expands to {count} values (max {MAX_AXIS_VALUES})"));
    }

    (0..count)
        .map(|k| {
            let v = start + k as f64 * step;
            match spec.kind {
                ParamKind::Int => {
                    if v.fract().abs() > 1e-9 {
                        Err(format!("{v} is not an integer"))
                    } else {
                        Ok(ParamValue::Int(v.round() as i64))
                    }
                }
                _ => Ok(ParamValue::Float((v * 1e9).round() / 1e9)),
            }
        })
        .collect()
}
