//! StratLab Runner: research orchestration over `stratlab-core`.
//!
//! This crate builds on `stratlab-core` to provide:
//! - R-based statistics and equity curves
//! - Grid optimizer with a combination cap and rayon workers
//! - Walk-forward validation with stability and drift diagnostics
//! - Batch optimization over symbols × timeframes with cancellation
//! - Research autopilot: seeded proposals, regime robustness gate, champions,
//!   resumable sessions and promotion
//! - Bar providers (synthetic, CSV, HTTP bridge, in-memory)
//! - TOML configuration and JSON/CSV export

pub mod autopilot;
pub mod batch;
pub mod cancel;
pub mod config;
pub mod error;
pub mod export;
pub mod grid;
pub mod metrics;
pub mod optimizer;
pub mod provider;
pub mod ranking;
pub mod walk_forward;

pub use autopilot::session::{
    ExperimentNote, PromotionRequest, PromotionTarget, ResearchSession, SessionStatus, StopReason,
};
pub use autopilot::store::{JsonFileStore, MemoryStore, SessionStore};
pub use autopilot::{Autopilot, AutopilotConfig, AutopilotSettings};
pub use batch::{run_batch, BatchProgress, BatchRequest, BatchRun, BatchSession};
pub use cancel::CancelToken;
pub use config::StratlabConfig;
pub use error::{ErrorKind, ResearchError};
pub use grid::ParamGrid;
pub use metrics::{compute_equity, compute_stats, EquityCurve, Stats};
pub use optimizer::{optimize, run_optimizer, OptimizerOptions, OptimizerReport, OptimizerResult};
pub use provider::{BarProvider, BridgeProvider, CsvProvider, DataError, InMemoryProvider, SyntheticProvider};
pub use ranking::SortKey;
pub use walk_forward::{run_walk_forward, walk_forward, WalkForwardConfig, WalkForwardReport};
