//! Walk-forward validation: rolling calendar-day train/test folds.
//!
//! Fold `k` trains on `[start + k·step, start + k·step + train)` and tests on
//! the `test_days` immediately after, where `start` is midnight of the first
//! bar's date. Indicators are computed once for the whole series; each fold
//! only re-runs the bar loop over its window.
//!
//! Folds with fewer than `min_trades` closed test trades are kept but marked
//! `excluded` and left out of every summary aggregate.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use stratlab_core::domain::{Timeframe, Trade};
use stratlab_core::{BarSeries, PreparedStrategy, StrategyConfig, TimeWindow};

use crate::error::ResearchError;
use crate::metrics::{compute_equity, compute_stats, mean_f64, std_dev, EquityCurve, Stats};
use crate::provider::BarProvider;

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardConfig {
    pub train_days: u32,
    pub test_days: u32,
    pub step_days: u32,
    /// Closed test trades a fold needs to count toward the summary.
    pub min_trades: usize,
    /// Number of trailing folds compared against the full mean for drift.
    pub drift_window: usize,
    /// Recent expectancy below this fraction of the full mean flags degradation.
    pub drift_fraction: f64,
    /// Penalty on the dispersion of fold net R in the stability score.
    pub dispersion_weight: f64,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_days: 90,
            test_days: 30,
            step_days: 30,
            min_trades: 5,
            drift_window: 3,
            drift_fraction: 0.5,
            dispersion_weight: 0.25,
        }
    }
}

impl WalkForwardConfig {
    pub fn validate(&self) -> Result<(), ResearchError> {
        for (name, value) in [
            ("train_days", self.train_days),
            ("test_days", self.test_days),
            ("step_days", self.step_days),
        ] {
            if value == 0 {
                return Err(ResearchError::invalid(format!("{name} must be at least 1")));
            }
        }
        if !(self.drift_fraction.is_finite() && self.dispersion_weight.is_finite())
            || self.dispersion_weight < 0.0
        {
            return Err(ResearchError::invalid(
                "drift_fraction and dispersion_weight must be finite, dispersion_weight >= 0",
            ));
        }
        Ok(())
    }
}

// ─── Result types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftFlag {
    /// Recent folds earn well below the overall mean.
    Degrading,
    /// Recent folds lose while earlier folds made money.
    RegimeShift,
    /// More than half of all folds were excluded.
    LowSample,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fold {
    pub index: usize,
    pub train_window: TimeWindow,
    pub test_window: TimeWindow,
    pub train_stats: Stats,
    pub train_equity: EquityCurve,
    pub test_stats: Stats,
    pub test_equity: EquityCurve,
    pub excluded: bool,
    pub test_trades: Vec<Trade>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub fold_count: usize,
    pub included_folds: usize,
    pub pct_positive: f64,
    pub avg_test_net_r: f64,
    pub avg_test_expectancy: f64,
    pub avg_test_win_rate: f64,
    /// Mean over folds with a defined profit factor.
    pub avg_test_profit_factor: Option<f64>,
    /// Mean test expectancy over mean train expectancy.
    pub efficiency: Option<f64>,
    pub stability_score: f64,
    pub drift_flags: Vec<DriftFlag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub config: StrategyConfig,
    pub total_days: i64,
    pub folds: Vec<Fold>,
    pub summary: Summary,
}

impl WalkForwardReport {
    /// Test trades of every included fold, in fold order.
    pub fn included_test_trades(&self) -> Vec<Trade> {
        self.folds
            .iter()
            .filter(|f| !f.excluded)
            .flat_map(|f| f.test_trades.iter().cloned())
            .collect()
    }
}

/// Below this mean train expectancy the efficiency ratio is not reported.
const MIN_TRAIN_EXPECTANCY: f64 = 0.01;

// ─── Fold creation ───────────────────────────────────────────────────

/// `floor((total − train − test) / step) + 1`, or 0 when one fold does not fit.
pub fn fold_count(total_days: i64, config: &WalkForwardConfig) -> usize {
    let span = total_days - config.train_days as i64 - config.test_days as i64;
    if span < 0 || config.step_days == 0 {
        return 0;
    }
    (span / config.step_days as i64 + 1) as usize
}

/// Train and test windows for every fold of `series`.
pub fn create_folds(series: &BarSeries, config: &WalkForwardConfig) -> Vec<(TimeWindow, TimeWindow)> {
    let Some(first) = series.first_date() else {
        return Vec::new();
    };
    (0..fold_count(series.total_days(), config))
        .map(|k| {
            let train_start = first + chrono::Duration::days(k as i64 * config.step_days as i64);
            let test_start = train_start + chrono::Duration::days(config.train_days as i64);
            (
                TimeWindow::from_days(train_start, config.train_days as i64),
                TimeWindow::from_days(test_start, config.test_days as i64),
            )
        })
        .collect()
}

// ─── Walk-forward orchestration ──────────────────────────────────────

pub fn walk_forward(
    series: &BarSeries,
    config: &StrategyConfig,
    wf: &WalkForwardConfig,
) -> Result<WalkForwardReport, ResearchError> {
    wf.validate()?;
    if series.is_empty() {
        return Err(ResearchError::DataUnavailable {
            symbol: series.symbol().to_string(),
            timeframe: series.timeframe().to_string(),
            reason: "series has no bars".into(),
        });
    }
    let prepared = PreparedStrategy::prepare(series, config)?;

    let mut folds = Vec::new();
    for (index, (train_window, test_window)) in create_folds(series, wf).into_iter().enumerate() {
        let train = prepared.run(Some(&train_window))?;
        let test = prepared.run(Some(&test_window))?;
        let test_stats = compute_stats(&test);
        let excluded = test_stats.trade_count < wf.min_trades;
        debug!(
            fold = index,
            train_net_r = compute_stats(&train).net_r,
            test_net_r = test_stats.net_r,
            test_trades = test_stats.trade_count,
            excluded,
            "fold evaluated"
        );
        folds.push(Fold {
            index,
            train_window,
            test_window,
            train_stats: compute_stats(&train),
            train_equity: compute_equity(&train),
            test_equity: compute_equity(&test),
            test_stats,
            excluded,
            test_trades: test,
        });
    }

    let summary = summarize(&folds, wf);
    info!(
        symbol = series.symbol(),
        folds = summary.fold_count,
        included = summary.included_folds,
        stability = summary.stability_score,
        drift = ?summary.drift_flags,
        "walk-forward finished"
    );

    Ok(WalkForwardReport {
        symbol: series.symbol().to_string(),
        timeframe: series.timeframe(),
        config: config.clone(),
        total_days: series.total_days(),
        folds,
        summary,
    })
}

/// Fetch a series from `provider` and walk it forward.
pub fn run_walk_forward(
    provider: &dyn BarProvider,
    symbol: &str,
    timeframe: Timeframe,
    range_days: u32,
    config: &StrategyConfig,
    wf: &WalkForwardConfig,
) -> Result<WalkForwardReport, ResearchError> {
    let series = provider
        .get_bars(symbol, timeframe, range_days)
        .map_err(|e| ResearchError::data(symbol, timeframe, e))?;
    walk_forward(&series, config, wf)
}

/// Aggregate the included folds.
pub fn summarize(folds: &[Fold], wf: &WalkForwardConfig) -> Summary {
    let included: Vec<&Fold> = folds.iter().filter(|f| !f.excluded).collect();
    let net: Vec<f64> = included.iter().map(|f| f.test_stats.net_r).collect();
    let expectancy: Vec<f64> = included.iter().map(|f| f.test_stats.expectancy).collect();
    let train_expectancy: Vec<f64> = included.iter().map(|f| f.train_stats.expectancy).collect();
    let win_rate: Vec<f64> = included.iter().map(|f| f.test_stats.win_rate).collect();
    let profit_factors: Vec<f64> = included
        .iter()
        .filter_map(|f| f.test_stats.profit_factor)
        .collect();

    let pct_positive = if included.is_empty() {
        0.0
    } else {
        net.iter().filter(|&&r| r > 0.0).count() as f64 / included.len() as f64
    };
    let stability_score = pct_positive / (1.0 + wf.dispersion_weight * std_dev(&net));

    let mean_train = mean_f64(&train_expectancy);
    let efficiency = (!included.is_empty() && mean_train >= MIN_TRAIN_EXPECTANCY)
        .then(|| mean_f64(&expectancy) / mean_train);

    let excluded_count = folds.len() - included.len();
    let mut drift_flags = drift_flags(&expectancy, wf);
    if excluded_count * 2 > folds.len() {
        drift_flags.push(DriftFlag::LowSample);
    }

    Summary {
        fold_count: folds.len(),
        included_folds: included.len(),
        pct_positive,
        avg_test_net_r: mean_f64(&net),
        avg_test_expectancy: mean_f64(&expectancy),
        avg_test_win_rate: mean_f64(&win_rate),
        avg_test_profit_factor: (!profit_factors.is_empty()).then(|| mean_f64(&profit_factors)),
        efficiency,
        stability_score,
        drift_flags,
    }
}

/// Degradation and regime-shift checks over per-fold test expectancy.
fn drift_flags(expectancy: &[f64], wf: &WalkForwardConfig) -> Vec<DriftFlag> {
    let mut flags = Vec::new();
    let window = wf.drift_window;
    if window == 0 || expectancy.len() < window {
        return flags;
    }
    let split = expectancy.len() - window;
    let full_mean = mean_f64(expectancy);
    let recent_mean = mean_f64(&expectancy[split..]);

    if full_mean > 0.0 && recent_mean < wf.drift_fraction * full_mean {
        flags.push(DriftFlag::Degrading);
    }
    if split > 0 && recent_mean < 0.0 && mean_f64(&expectancy[..split]) > 0.0 {
        flags.push(DriftFlag::RegimeShift);
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::tests::make_trade;
    use stratlab_core::domain::Outcome;
    use stratlab_core::synthetic::generate_series;
    use stratlab_core::StrategyFamily;

    fn fold_with(index: usize, train_rs: &[f64], test_rs: &[f64], excluded: bool) -> Fold {
        let to_trades = |rs: &[f64]| -> Vec<Trade> {
            rs.iter()
                .map(|&r| make_trade(r, if r > 0.0 { Outcome::Win } else { Outcome::Loss }))
                .collect()
        };
        let train = to_trades(train_rs);
        let test = to_trades(test_rs);
        let window = TimeWindow::from_days(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 1);
        Fold {
            index,
            train_window: window,
            test_window: window,
            train_stats: compute_stats(&train),
            train_equity: compute_equity(&train),
            test_stats: compute_stats(&test),
            test_equity: compute_equity(&test),
            excluded,
            test_trades: test,
        }
    }

    // ─── Fold creation ───────────────────────────────────────────

    #[test]
    fn fold_count_formula() {
        let wf = WalkForwardConfig::default();
        assert_eq!(fold_count(300, &wf), 7);
        assert_eq!(fold_count(120, &wf), 1);
        assert_eq!(fold_count(119, &wf), 0);
        assert_eq!(fold_count(0, &wf), 0);
    }

    #[test]
    fn three_hundred_days_make_seven_contiguous_folds() {
        let series = generate_series("EURUSD", Timeframe::D1, 300).unwrap();
        assert_eq!(series.total_days(), 300);
        let folds = create_folds(&series, &WalkForwardConfig::default());
        assert_eq!(folds.len(), 7);
        for (train, test) in &folds {
            assert_eq!(train.end, test.start);
            assert_eq!((test.end - test.start).num_days(), 30);
        }
        assert_eq!((folds[1].0.start - folds[0].0.start).num_days(), 30);
    }

    #[test]
    fn walk_forward_report_shape() {
        let series = generate_series("EURUSD", Timeframe::D1, 300).unwrap();
        let wf = WalkForwardConfig {
            min_trades: 0,
            ..Default::default()
        };
        let report = walk_forward(&series, &StrategyFamily::RangeBreakout.default_config(), &wf)
            .unwrap();
        assert_eq!(report.summary.fold_count, 7);
        assert_eq!(report.summary.included_folds, 7);
        for fold in &report.folds {
            for t in &fold.test_trades {
                assert!(fold.test_window.contains(t.entry_time));
            }
        }
        assert!((0.0..=1.0).contains(&report.summary.stability_score));
    }

    #[test]
    fn zero_day_windows_are_rejected() {
        let series = generate_series("EURUSD", Timeframe::D1, 300).unwrap();
        let wf = WalkForwardConfig {
            step_days: 0,
            ..Default::default()
        };
        let err = walk_forward(&series, &StrategyFamily::RangeBreakout.default_config(), &wf)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigInvalid);
    }

    #[test]
    fn short_series_yields_no_folds() {
        let series = generate_series("EURUSD", Timeframe::D1, 60).unwrap();
        let report = walk_forward(
            &series,
            &StrategyFamily::RangeBreakout.default_config(),
            &WalkForwardConfig::default(),
        )
        .unwrap();
        assert!(report.folds.is_empty());
        assert_eq!(report.summary.stability_score, 0.0);
    }

    // ─── Summary ─────────────────────────────────────────────────

    #[test]
    fn excluded_folds_do_not_count() {
        let folds = vec![
            fold_with(0, &[1.0], &[2.0, -1.0], false),
            fold_with(1, &[1.0], &[-1.0], true),
        ];
        let s = summarize(&folds, &WalkForwardConfig::default());
        assert_eq!(s.included_folds, 1);
        assert!((s.pct_positive - 1.0).abs() < 1e-12);
        assert!((s.avg_test_net_r - 1.0).abs() < 1e-12);
        assert!((s.stability_score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stability_penalizes_dispersion() {
        let wf = WalkForwardConfig::default();
        let steady = summarize(
            &[
                fold_with(0, &[1.0], &[1.0], false),
                fold_with(1, &[1.0], &[1.0], false),
            ],
            &wf,
        );
        let noisy = summarize(
            &[
                fold_with(0, &[1.0], &[0.5], false),
                fold_with(1, &[1.0], &[4.0], false),
            ],
            &wf,
        );
        assert!(steady.stability_score > noisy.stability_score);
    }

    #[test]
    fn efficiency_needs_positive_train_expectancy() {
        let wf = WalkForwardConfig::default();
        let good = summarize(&[fold_with(0, &[2.0], &[1.0], false)], &wf);
        assert!((good.efficiency.unwrap() - 0.5).abs() < 1e-12);
        let flat = summarize(&[fold_with(0, &[-1.0], &[1.0], false)], &wf);
        assert_eq!(flat.efficiency, None);
    }

    #[test]
    fn drift_flags_fire() {
        let wf = WalkForwardConfig {
            drift_window: 2,
            ..Default::default()
        };
        let folds = vec![
            fold_with(0, &[1.0], &[2.0], false),
            fold_with(1, &[1.0], &[2.0], false),
            fold_with(2, &[1.0], &[2.0], false),
            fold_with(3, &[1.0], &[-1.0], false),
            fold_with(4, &[1.0], &[-1.0], false),
        ];
        let s = summarize(&folds, &wf);
        assert!(s.drift_flags.contains(&DriftFlag::Degrading));
        assert!(s.drift_flags.contains(&DriftFlag::RegimeShift));
        assert!(!s.drift_flags.contains(&DriftFlag::LowSample));
    }

    #[test]
    fn low_sample_when_most_folds_excluded() {
        let folds = vec![
            fold_with(0, &[1.0], &[1.0], false),
            fold_with(1, &[1.0], &[], true),
            fold_with(2, &[1.0], &[], true),
        ];
        let s = summarize(&folds, &WalkForwardConfig::default());
        assert_eq!(s.drift_flags, vec![DriftFlag::LowSample]);
    }
}
