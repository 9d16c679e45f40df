//! StratLab Core: bar series, indicators, strategy families, strategy runner.
//!
//! This crate holds everything needed to turn one bar series and one strategy
//! configuration into a list of trades:
//! - Domain types (bars, validated series, timeframes, trades)
//! - Indicators precomputed once per series
//! - The closed set of strategy families with typed parameters and validation
//! - The single-position strategy runner with a configurable tie-breaker
//! - Regime classification of trades
//! - Deterministic RNG hierarchy and synthetic bars

pub mod domain;
pub mod engine;
pub mod fingerprint;
pub mod indicators;
pub mod regime;
pub mod rng;
pub mod strategy;
pub mod synthetic;

pub use domain::{Bar, BarSeries, ConfigHash, Side, TimeWindow, Timeframe, Trade};
pub use engine::{run, PreparedStrategy, RunError};
pub use regime::{AtrTrendClassifier, BarsContext, RegimeClassifier, RegimeConfig, RegimeKey};
pub use strategy::{ConfigError, StrategyConfig, StrategyFamily};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types handed to worker threads are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<BarSeries>();
        require_sync::<BarSeries>();
        require_send::<StrategyConfig>();
        require_sync::<StrategyConfig>();
        require_send::<Trade>();
        require_sync::<Trade>();
        require_send::<PreparedStrategy<'static>>();
        require_sync::<PreparedStrategy<'static>>();
        require_send::<RegimeKey>();
        require_sync::<RegimeKey>();
        require_send::<rng::RngHierarchy>();
        require_sync::<rng::RngHierarchy>();
    }

    /// Classifiers are shared across evaluation threads.
    #[test]
    fn classifier_is_object_safe_and_shareable() {
        fn _check(c: &dyn RegimeClassifier, trade: &Trade, ctx: &BarsContext<'_>) -> RegimeKey {
            c.classify(trade, ctx)
        }
        let boxed: Box<dyn RegimeClassifier> = Box::new(AtrTrendClassifier);
        let _shared: std::sync::Arc<dyn RegimeClassifier> = std::sync::Arc::from(boxed);
    }
}
