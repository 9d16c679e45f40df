//! `stratlab.toml`: file configuration with environment overrides.
//!
//! Every section is optional and falls back to its defaults. Grids use the
//! same axis strings as the command line (`"10,20,30"`, `"1.0..2.0:0.5"`).
//!
//! ```toml
//! [strategy]
//! family = "RANGE_BREAKOUT"
//! params = { rr = "2.5" }
//! grid = { lookback = "10..30:10", atr_mult = "1.0,1.5,2.0" }
//!
//! [optimizer]
//! max_combos = 200
//! sort_key = "net_r"
//!
//! [autopilot.gate]
//! min_regimes_seen = 3
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stratlab_core::domain::Timeframe;
use stratlab_core::{ConfigError, RegimeConfig, StrategyConfig, StrategyFamily};

use crate::autopilot::AutopilotSettings;
use crate::grid::ParamGrid;
use crate::optimizer::OptimizerOptions;
use crate::walk_forward::WalkForwardConfig;

pub const ENV_WORKERS: &str = "STRATLAB_WORKERS";
pub const ENV_BRIDGE_URL: &str = "STRATLAB_BRIDGE_URL";

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("strategy section: {0}")]
    Strategy(#[from] ConfigError),

    #[error("environment variable {name}={value:?} is not valid")]
    Env { name: &'static str, value: String },
}

// ─── Sections ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySection {
    pub family: StrategyFamily,
    /// Fixed parameter overrides on the family defaults.
    pub params: BTreeMap<String, String>,
    /// Axis string per parameter.
    pub grid: BTreeMap<String, String>,
}

impl Default for StrategySection {
    fn default() -> Self {
        Self {
            family: StrategyFamily::RangeBreakout,
            params: BTreeMap::new(),
            grid: BTreeMap::new(),
        }
    }
}

impl StrategySection {
    pub fn base_config(&self) -> Result<StrategyConfig, ConfigError> {
        let pairs: Vec<(&str, &str)> = self
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        strategy_from_params(self.family, &pairs)
    }

    pub fn grid(&self) -> Result<ParamGrid, ConfigError> {
        let pairs: Vec<(&str, &str)> = self
            .grid
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        ParamGrid::parse(self.family, &pairs)
    }
}

/// Family defaults with `(name, value)` overrides applied and validated.
pub fn strategy_from_params<N, V>(
    family: StrategyFamily,
    params: &[(N, V)],
) -> Result<StrategyConfig, ConfigError>
where
    N: AsRef<str>,
    V: AsRef<str>,
{
    let mut config = family.default_config();
    for (name, raw) in params {
        let name = name.as_ref().trim();
        let spec = family
            .param_spec(name)
            .ok_or_else(|| ConfigError::UnknownParam {
                family,
                name: name.to_string(),
            })?;
        let value = spec
            .parse_value(raw.as_ref())
            .ok_or_else(|| ConfigError::InvalidParam {
                name: name.to_string(),
                reason: format!("cannot parse {:?}", raw.as_ref()),
            })?;
        config = config.with_param(name, &value)?;
    }
    config.validate()?;
    Ok(config)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSection {
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub workers: usize,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            timeframes: vec![Timeframe::H1],
            workers: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    #[default]
    Synthetic,
    Csv,
    Bridge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    pub source: DataSource,
    /// Trailing calendar days to request.
    pub range_days: u32,
    pub csv_dir: PathBuf,
    pub bridge_url: Option<String>,
    pub bridge_limit: u32,
    /// Where autopilot session snapshots live.
    pub session_dir: PathBuf,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            source: DataSource::Synthetic,
            range_days: 365,
            csv_dir: PathBuf::from("data"),
            bridge_url: None,
            bridge_limit: 2_000,
            session_dir: PathBuf::from("sessions"),
        }
    }
}

// ─── Root ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StratlabConfig {
    pub strategy: StrategySection,
    pub optimizer: OptimizerOptions,
    pub walk_forward: WalkForwardConfig,
    pub batch: BatchSection,
    pub autopilot: AutopilotSettings,
    pub regime: RegimeConfig,
    pub data: DataSection,
}

impl StratlabConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        let config: Self = toml::from_str(content)?;
        config.strategy.base_config()?;
        config.strategy.grid()?;
        Ok(config)
    }

    /// Apply `STRATLAB_WORKERS` and `STRATLAB_BRIDGE_URL` from the process
    /// environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigFileError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigFileError> {
        if let Some(raw) = lookup(ENV_WORKERS) {
            let workers: usize = raw
                .trim()
                .parse()
                .ok()
                .filter(|&n| n >= 1)
                .ok_or(ConfigFileError::Env {
                    name: ENV_WORKERS,
                    value: raw.clone(),
                })?;
            self.optimizer.workers = workers;
            self.batch.workers = workers;
            self.autopilot.workers = workers;
        }
        if let Some(url) = lookup(ENV_BRIDGE_URL) {
            let url = url.trim();
            if !url.is_empty() {
                self.data.bridge_url = Some(url.to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::SortKey;
    use stratlab_core::strategy::ParamValue;

    const SAMPLE: &str = r#"
        [strategy]
        family = "TREND_PULLBACK"
        params = { fast_ema = "10", rr = "3" }
        grid = { slow_ema = "30..50:10" }

        [optimizer]
        max_combos = 50
        sort_key = "expectancy"

        [walk_forward]
        train_days = 60

        [batch]
        symbols = ["EURUSD", "GBPUSD"]
        timeframes = ["M15", "1h"]

        [autopilot]
        max_experiments = 8

        [autopilot.decision]
        noise_k = 2.0

        [data]
        source = "csv"
        csv_dir = "bars"
    "#;

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(StratlabConfig::from_toml("").unwrap(), StratlabConfig::default());
    }

    #[test]
    fn sections_parse() {
        let c = StratlabConfig::from_toml(SAMPLE).unwrap();
        let base = c.strategy.base_config().unwrap();
        assert_eq!(base.param("fast_ema"), Some(ParamValue::Int(10)));
        assert_eq!(base.exits().rr, 3.0);
        assert_eq!(c.strategy.grid().unwrap().size(), 3);
        assert_eq!(c.optimizer.max_combos, 50);
        assert_eq!(c.optimizer.sort_key, SortKey::Expectancy);
        assert_eq!(c.walk_forward.train_days, 60);
        assert_eq!(c.walk_forward.test_days, 30);
        assert_eq!(c.batch.timeframes, vec![Timeframe::M15, Timeframe::H1]);
        assert_eq!(c.autopilot.max_experiments, 8);
        assert_eq!(c.autopilot.decision.noise_k, 2.0);
        assert_eq!(c.autopilot.gate.min_regimes_seen, 2);
        assert_eq!(c.data.source, DataSource::Csv);
    }

    #[test]
    fn bad_strategy_section_fails_at_load() {
        let err = StratlabConfig::from_toml("[strategy]\ngrid = { nope = \"1,2\" }").unwrap_err();
        assert!(matches!(err, ConfigFileError::Strategy(ConfigError::UnknownParam { .. })));
        let err = StratlabConfig::from_toml(
            "[strategy]\nfamily = \"TREND_PULLBACK\"\nparams = { fast_ema = \"80\" }",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigFileError::Strategy(_)));
    }

    #[test]
    fn environment_overrides() {
        let mut c = StratlabConfig::default();
        c.apply_overrides(|name| match name {
            ENV_WORKERS => Some("4".into()),
            ENV_BRIDGE_URL => Some(" http://127.0.0.1:8000 ".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(c.optimizer.workers, 4);
        assert_eq!(c.batch.workers, 4);
        assert_eq!(c.autopilot.workers, 4);
        assert_eq!(c.data.bridge_url.as_deref(), Some("http://127.0.0.1:8000"));

        let err = c
            .apply_overrides(|name| (name == ENV_WORKERS).then(|| "zero".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigFileError::Env { name: ENV_WORKERS, .. }));
    }
}
