//! Parameter optimizer: evaluate a grid of configurations over one series
//! and rank the results.
//!
//! Combinations run on a rayon pool sized by `workers`. Results are collected
//! in grid order and then sorted, so the ranking never depends on completion
//! order.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use stratlab_core::domain::Timeframe;
use stratlab_core::{BarSeries, ConfigHash, PreparedStrategy, StrategyConfig};

use crate::error::{ErrorKind, ResearchError};
use crate::grid::ParamGrid;
use crate::metrics::{compute_equity_with, compute_stats_with, EquityCurve, Stats, StatsOptions};
use crate::provider::BarProvider;
use crate::ranking::SortKey;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerOptions {
    pub max_combos: u64,
    /// Keep only the best `top_n` after ranking.
    pub top_n: Option<usize>,
    pub sort_key: SortKey,
    pub workers: usize,
    pub stats: StatsOptions,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            max_combos: 500,
            top_n: None,
            sort_key: SortKey::NetR,
            workers: 1,
            stats: StatsOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerResult {
    /// Config fingerprint.
    pub id: ConfigHash,
    /// 1-based position after sorting.
    pub rank: usize,
    pub grid_index: u64,
    pub config: StrategyConfig,
    pub stats: Stats,
    pub equity: EquityCurve,
}

/// A grid point that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedCombination {
    pub index: u64,
    pub params: String,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerReport {
    pub results: Vec<OptimizerResult>,
    pub skipped: Vec<SkippedCombination>,
    pub combos_total: u64,
    pub combos_evaluated: u64,
    pub truncated: bool,
    pub sort_key: SortKey,
    pub notices: Vec<Notice>,
}

impl OptimizerReport {
    pub fn best(&self) -> Option<&OptimizerResult> {
        self.results.first()
    }
}

/// Build a rayon pool for `workers > 1`; `None` means run inline.
pub(crate) fn build_pool(workers: usize) -> Option<rayon::ThreadPool> {
    if workers <= 1 {
        return None;
    }
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => Some(pool),
        Err(e) => {
            tracing::warn!(workers, error = %e, "thread pool unavailable, running inline");
            None
        }
    }
}

/// Evaluate every (or a strided sample of) combination of `grid` applied to
/// `base` over `series`.
pub fn optimize(
    series: &BarSeries,
    base: &StrategyConfig,
    grid: &ParamGrid,
    options: &OptimizerOptions,
) -> Result<OptimizerReport, ResearchError> {
    if options.max_combos == 0 {
        return Err(ResearchError::invalid("max_combos must be at least 1"));
    }
    let family = base.family();
    if let Some(axis) = grid.axes().iter().find(|a| family.param_spec(&a.name).is_none()) {
        return Err(stratlab_core::ConfigError::UnknownParam {
            family,
            name: axis.name.clone(),
        }
        .into());
    }
    if series.is_empty() {
        return Err(ResearchError::DataUnavailable {
            symbol: series.symbol().to_string(),
            timeframe: series.timeframe().to_string(),
            reason: "series has no bars".into(),
        });
    }

    let combos_total = grid.size();
    let (indices, truncated) = grid.sample_indices(options.max_combos);
    let mut notices = Vec::new();
    if truncated {
        let err = ResearchError::BudgetExceeded {
            requested: combos_total,
            cap: options.max_combos,
        };
        notices.push(Notice {
            kind: err.kind(),
            message: err.to_string(),
        });
    }
    info!(
        symbol = series.symbol(),
        timeframe = %series.timeframe(),
        family = %family,
        combos_total,
        evaluating = indices.len(),
        truncated,
        "optimizer start"
    );

    let evaluate = |index: u64| evaluate_one(series, base, grid, index, options.stats);
    let outcomes: Vec<Result<OptimizerResult, SkippedCombination>> =
        match build_pool(options.workers) {
            Some(pool) => pool.install(|| indices.par_iter().map(|&i| evaluate(i)).collect()),
            None => indices.iter().map(|&i| evaluate(i)).collect(),
        };

    let mut results = Vec::with_capacity(outcomes.len());
    let mut skipped = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(result) => results.push(result),
            Err(skip) => {
                debug!(index = skip.index, params = %skip.params, kind = %skip.kind, reason = %skip.reason, "combination skipped");
                skipped.push(skip);
            }
        }
    }

    let key = options.sort_key;
    results.sort_by(|a, b| {
        key.compare((&a.stats, &a.equity), (&b.stats, &b.equity))
            .then_with(|| a.grid_index.cmp(&b.grid_index))
    });
    if let Some(n) = options.top_n {
        results.truncate(n);
    }
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }

    info!(
        evaluated = indices.len(),
        ranked = results.len(),
        skipped = skipped.len(),
        best_net_r = results.first().map(|r| r.stats.net_r),
        "optimizer finished"
    );

    Ok(OptimizerReport {
        results,
        skipped,
        combos_total,
        combos_evaluated: indices.len() as u64,
        truncated,
        sort_key: key,
        notices,
    })
}

fn evaluate_one(
    series: &BarSeries,
    base: &StrategyConfig,
    grid: &ParamGrid,
    index: u64,
    stats_opts: StatsOptions,
) -> Result<OptimizerResult, SkippedCombination> {
    let skip = |err: ResearchError| SkippedCombination {
        index,
        params: grid.describe(index),
        kind: err.kind(),
        reason: err.to_string(),
    };

    let config = grid
        .config_at(base, index)
        .map_err(|e| skip(e.into()))?;
    let prepared = PreparedStrategy::prepare(series, &config).map_err(|e| skip(e.into()))?;
    let trades = prepared.run(None).map_err(|e| skip(e.into()))?;

    Ok(OptimizerResult {
        id: config.fingerprint(),
        rank: 0,
        grid_index: index,
        stats: compute_stats_with(&trades, stats_opts),
        equity: compute_equity_with(&trades, stats_opts),
        config,
    })
}

/// Fetch a series from `provider` and optimize over it.
pub fn run_optimizer(
    provider: &dyn BarProvider,
    symbol: &str,
    timeframe: Timeframe,
    range_days: u32,
    base: &StrategyConfig,
    grid: &ParamGrid,
    options: &OptimizerOptions,
) -> Result<OptimizerReport, ResearchError> {
    let series = provider
        .get_bars(symbol, timeframe, range_days)
        .map_err(|e| ResearchError::data(symbol, timeframe, e))?;
    optimize(&series, base, grid, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratlab_core::synthetic::generate_series;
    use stratlab_core::StrategyFamily;

    fn series() -> BarSeries {
        generate_series("EURUSD", Timeframe::H1, 1_200).unwrap()
    }

    fn rb_grid() -> ParamGrid {
        ParamGrid::parse(
            StrategyFamily::RangeBreakout,
            &[("lookback", "10,20,30"), ("atr_mult", "1,1.5,2"), ("rr", "1,2,3")],
        )
        .unwrap()
    }

    #[test]
    fn full_grid_under_cap() {
        let opts = OptimizerOptions {
            max_combos: 100,
            ..Default::default()
        };
        let report = optimize(
            &series(),
            &StrategyFamily::RangeBreakout.default_config(),
            &rb_grid(),
            &opts,
        )
        .unwrap();
        assert_eq!(report.combos_total, 27);
        assert_eq!(report.combos_evaluated, 27);
        assert!(!report.truncated);
        assert!(report.notices.is_empty());
        assert_eq!(report.results.len() + report.skipped.len(), 27);
        let ranks: Vec<_> = report.results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, (1..=report.results.len()).collect::<Vec<_>>());
    }

    #[test]
    fn results_sorted_by_key() {
        let report = optimize(
            &series(),
            &StrategyFamily::RangeBreakout.default_config(),
            &rb_grid(),
            &OptimizerOptions::default(),
        )
        .unwrap();
        assert!(report
            .results
            .windows(2)
            .all(|w| w[0].stats.net_r >= w[1].stats.net_r));
    }

    #[test]
    fn invalid_combinations_are_skipped_not_fatal() {
        let grid = ParamGrid::parse(StrategyFamily::TrendPullback, &[("fast_ema", "10,60")]).unwrap();
        let report = optimize(
            &series(),
            &StrategyFamily::TrendPullback.default_config(),
            &grid,
            &OptimizerOptions::default(),
        )
        .unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, 1);
        assert_eq!(report.skipped[0].kind, ErrorKind::ConfigInvalid);
        assert_eq!(report.skipped[0].params, "fast_ema=60");
    }

    #[test]
    fn worker_count_does_not_change_ranking() {
        let s = series();
        let base = StrategyFamily::RangeBreakout.default_config();
        let serial = optimize(&s, &base, &rb_grid(), &OptimizerOptions::default()).unwrap();
        let parallel = optimize(
            &s,
            &base,
            &rb_grid(),
            &OptimizerOptions {
                workers: 4,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn top_n_truncates_after_sorting() {
        let opts = OptimizerOptions {
            top_n: Some(3),
            ..Default::default()
        };
        let report = optimize(
            &series(),
            &StrategyFamily::RangeBreakout.default_config(),
            &rb_grid(),
            &opts,
        )
        .unwrap();
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.combos_evaluated, 27);
    }

    #[test]
    fn zero_cap_and_empty_series_are_rejected() {
        let base = StrategyFamily::RangeBreakout.default_config();
        let zero = OptimizerOptions {
            max_combos: 0,
            ..Default::default()
        };
        let err = optimize(&series(), &base, &rb_grid(), &zero).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let empty = BarSeries::new("EMPTY", Timeframe::D1, vec![]).unwrap();
        let err = optimize(&empty, &base, &rb_grid(), &OptimizerOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataUnavailable);
    }

    #[test]
    fn grid_for_another_family_is_rejected() {
        let grid = ParamGrid::parse(StrategyFamily::TrendPullback, &[("fast_ema", "10")]).unwrap();
        let err = optimize(
            &series(),
            &StrategyFamily::RangeBreakout.default_config(),
            &grid,
            &OptimizerOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }
}
