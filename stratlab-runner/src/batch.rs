//! Batch optimizer: the optimizer fanned out over symbols × timeframes.
//!
//! Pairs run symbol-major in chunks of `workers`; within a chunk they run on
//! the rayon pool, and cancellation is checked between chunks. Progress is
//! reported from the calling thread as each pair finishes, while rows keep
//! symbol-major order. A pair whose data or grid fails becomes a failed row;
//! its siblings carry on.

use std::sync::mpsc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use stratlab_core::domain::Timeframe;
use stratlab_core::StrategyConfig;

use crate::cancel::CancelToken;
use crate::error::{ErrorKind, ResearchError};
use crate::grid::ParamGrid;
use crate::optimizer::{build_pool, optimize, OptimizerOptions, OptimizerResult};
use crate::provider::BarProvider;
use crate::ranking::SortKey;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub base_config: StrategyConfig,
    pub grid: ParamGrid,
    pub range_days: u32,
    pub max_combos: u64,
    pub top_n: Option<usize>,
    pub sort_key: SortKey,
    pub workers: usize,
}

impl BatchRequest {
    pub fn total_pairs(&self) -> usize {
        self.symbols.len() * self.timeframes.len()
    }

    fn pairs(&self) -> Vec<(String, Timeframe)> {
        self.symbols
            .iter()
            .flat_map(|s| self.timeframes.iter().map(move |tf| (s.clone(), *tf)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Running,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub phase: BatchPhase,
    pub done: usize,
    pub total: usize,
    pub pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Success {
        best: Option<OptimizerResult>,
        combos_tested: u64,
        truncated: bool,
        skipped: usize,
    },
    Failure {
        kind: ErrorKind,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRun {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub outcome: BatchOutcome,
}

impl BatchRun {
    pub fn best(&self) -> Option<&OptimizerResult> {
        match &self.outcome {
            BatchOutcome::Success { best, .. } => best.as_ref(),
            BatchOutcome::Failure { .. } => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, BatchOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSession {
    pub runs: Vec<BatchRun>,
    pub ok_count: usize,
    pub fail_count: usize,
    pub total_pairs: usize,
    pub duration_ms: u64,
    pub cancelled: bool,
}

/// A caller-side request to apply one batch winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub config: StrategyConfig,
    pub net_r: f64,
}

impl BatchSession {
    /// Successful runs with a best result, highest net R first.
    pub fn ranked_by_net_r(&self) -> Vec<&BatchRun> {
        let mut ranked: Vec<&BatchRun> = self.runs.iter().filter(|r| r.best().is_some()).collect();
        ranked.sort_by(|a, b| {
            let net = |r: &BatchRun| r.best().map_or(f64::NEG_INFINITY, |b| b.stats.net_r);
            net(b).total_cmp(&net(a))
        });
        ranked
    }

    /// Apply requests for the top `n` runs by net R.
    pub fn apply_requests(&self, n: usize) -> Vec<ApplyRequest> {
        self.ranked_by_net_r()
            .into_iter()
            .take(n)
            .filter_map(|run| {
                run.best().map(|best| ApplyRequest {
                    symbol: run.symbol.clone(),
                    timeframe: run.timeframe,
                    config: best.config.clone(),
                    net_r: best.stats.net_r,
                })
            })
            .collect()
    }
}

pub fn run_batch(
    provider: &dyn BarProvider,
    request: &BatchRequest,
    progress: Option<&dyn Fn(&BatchProgress)>,
    cancel: &CancelToken,
) -> Result<BatchSession, ResearchError> {
    if request.symbols.is_empty() || request.timeframes.is_empty() {
        return Err(ResearchError::invalid(
            "batch needs at least one symbol and one timeframe",
        ));
    }
    if request.max_combos == 0 {
        return Err(ResearchError::invalid("max_combos must be at least 1"));
    }

    let start = Instant::now();
    let pairs = request.pairs();
    let total = pairs.len();
    let chunk_size = request.workers.max(1);
    let options = OptimizerOptions {
        max_combos: request.max_combos,
        top_n: Some(request.top_n.unwrap_or(1).max(1)),
        sort_key: request.sort_key,
        // Pairs already run in parallel; each optimizer stays inline.
        workers: 1,
        ..OptimizerOptions::default()
    };
    let pool = build_pool(request.workers);
    let report = |phase: BatchPhase, done: usize| {
        if let Some(cb) = progress {
            cb(&BatchProgress {
                phase,
                done,
                total,
                pct: done as f64 / total as f64 * 100.0,
            });
        }
    };

    info!(pairs = total, workers = chunk_size, provider = provider.name(), "batch start");
    let mut runs: Vec<BatchRun> = Vec::with_capacity(total);
    let mut cancelled = false;

    for chunk in pairs.chunks(chunk_size) {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let evaluate = |(symbol, tf): &(String, Timeframe)| {
            run_pair(provider, request, &options, symbol, *tf)
        };
        match &pool {
            Some(pool) => {
                let done_before = runs.len();
                let mut slots: Vec<Option<BatchRun>> = vec![None; chunk.len()];
                let (tx, rx) = mpsc::channel();
                pool.in_place_scope(|scope| {
                    for (slot, pair) in chunk.iter().enumerate() {
                        let tx = tx.clone();
                        let evaluate = &evaluate;
                        scope.spawn(move |_| {
                            // The receiver drains until every sender is gone.
                            let _ = tx.send((slot, evaluate(pair)));
                        });
                    }
                    drop(tx);
                    for (finished, (slot, run)) in rx.iter().enumerate() {
                        slots[slot] = Some(run);
                        report(BatchPhase::Running, done_before + finished + 1);
                    }
                });
                runs.extend(slots.into_iter().flatten());
            }
            None => {
                for pair in chunk {
                    runs.push(evaluate(pair));
                    report(BatchPhase::Running, runs.len());
                }
            }
        }
    }

    let ok_count = runs.iter().filter(|r| r.is_ok()).count();
    let session = BatchSession {
        fail_count: runs.len() - ok_count,
        ok_count,
        total_pairs: total,
        duration_ms: start.elapsed().as_millis() as u64,
        cancelled,
        runs,
    };
    report(
        if cancelled {
            BatchPhase::Cancelled
        } else {
            BatchPhase::Completed
        },
        session.runs.len(),
    );
    info!(
        ok = session.ok_count,
        failed = session.fail_count,
        cancelled,
        duration_ms = session.duration_ms,
        "batch finished"
    );
    Ok(session)
}

fn run_pair(
    provider: &dyn BarProvider,
    request: &BatchRequest,
    options: &OptimizerOptions,
    symbol: &str,
    timeframe: Timeframe,
) -> BatchRun {
    let result = provider
        .get_bars(symbol, timeframe, request.range_days)
        .map_err(|e| ResearchError::data(symbol, timeframe, e))
        .and_then(|series| optimize(&series, &request.base_config, &request.grid, options));

    let outcome = match result {
        Ok(report) => {
            info!(
                symbol,
                %timeframe,
                combos = report.combos_evaluated,
                best_net_r = report.best().map(|b| b.stats.net_r),
                "pair done"
            );
            BatchOutcome::Success {
                combos_tested: report.combos_evaluated,
                truncated: report.truncated,
                skipped: report.skipped.len(),
                best: report.results.into_iter().next(),
            }
        }
        Err(err) => {
            warn!(symbol, %timeframe, kind = %err.kind(), error = %err, "pair failed");
            BatchOutcome::Failure {
                kind: err.kind(),
                reason: err.to_string(),
            }
        }
    };
    BatchRun {
        symbol: symbol.to_string(),
        timeframe,
        outcome,
    }
}
