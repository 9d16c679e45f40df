//! Error taxonomy for research operations.
//!
//! `ResearchError` aborts an operation; `ErrorKind` is the serializable tag
//! carried in partial-failure rows (skipped combinations, failed batch pairs).

use serde::{Deserialize, Serialize};
use std::fmt;
use stratlab_core::{ConfigError, RunError};
use thiserror::Error;

use crate::provider::DataError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigInvalid,
    DataUnavailable,
    CombinationFailed,
    BudgetExceeded,
    Cancelled,
    GateRejected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigInvalid => "config_invalid",
            ErrorKind::DataUnavailable => "data_unavailable",
            ErrorKind::CombinationFailed => "combination_failed",
            ErrorKind::BudgetExceeded => "budget_exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::GateRejected => "gate_rejected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(#[from] ConfigError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no data for {symbol} {timeframe}: {reason}")]
    DataUnavailable {
        symbol: String,
        timeframe: String,
        reason: String,
    },

    #[error("combination {combo} failed: {reason}")]
    CombinationFailed { combo: String, reason: String },

    #[error("budget exceeded: requested {requested}, cap {cap}")]
    BudgetExceeded { requested: u64, cap: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("promotion refused: {0}")]
    PromotionRefused(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResearchError::ConfigInvalid(_) | ResearchError::InvalidRequest(_) => {
                ErrorKind::ConfigInvalid
            }
            ResearchError::DataUnavailable { .. } => ErrorKind::DataUnavailable,
            ResearchError::CombinationFailed { .. } => ErrorKind::CombinationFailed,
            ResearchError::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            ResearchError::Cancelled => ErrorKind::Cancelled,
            ResearchError::PromotionRefused(_) => ErrorKind::GateRejected,
            ResearchError::Persistence(_)
            | ResearchError::Serialization(_)
            | ResearchError::Io(_) => ErrorKind::DataUnavailable,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ResearchError::InvalidRequest(msg.into())
    }

    pub(crate) fn data(symbol: &str, timeframe: impl fmt::Display, err: DataError) -> Self {
        ResearchError::DataUnavailable {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<RunError> for ResearchError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Config(e) => ResearchError::ConfigInvalid(e),
            RunError::NonFinite { entry_index } => ResearchError::CombinationFailed {
                combo: String::new(),
                reason: format!("non-finite R at entry bar {entry_index}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_snake_case() {
        let json = serde_json::to_string(&ErrorKind::DataUnavailable).unwrap();
        assert_eq!(json, "\"data_unavailable\"");
        assert_eq!(ErrorKind::GateRejected.to_string(), "gate_rejected");
    }

    #[test]
    fn run_errors_map_to_kinds() {
        let cfg: ResearchError = RunError::Config(ConfigError::FastNotBelowSlow {
            fast: 50,
            slow: 20,
        })
        .into();
        assert_eq!(cfg.kind(), ErrorKind::ConfigInvalid);

        let numeric: ResearchError = RunError::NonFinite { entry_index: 3 }.into();
        assert_eq!(numeric.kind(), ErrorKind::CombinationFailed);
    }
}
