//! Research autopilot: a seeded propose → evaluate → gate → record loop.
//!
//! Each iteration proposes one configuration, evaluates its one-step grid
//! neighbourhood with the optimizer, walks the best neighbour forward,
//! classifies the out-of-sample trades by regime and runs the robustness gate.
//! The outcome is folded into a `ResearchSession` by the pure
//! [`session::transition`], and the snapshot is saved after every step so a
//! session can be resumed from any process. A run that fails outright (data
//! fetch, storage) is saved as `stopped` with `stop_error` before the error is
//! returned.

pub mod champion;
pub mod gate;
pub mod proposal;
pub mod session;
pub mod store;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use stratlab_core::domain::Timeframe;
use stratlab_core::regime::tag_trades;
use stratlab_core::{
    AtrTrendClassifier, BarSeries, BarsContext, RegimeClassifier, RegimeConfig, RegimeKey,
    StrategyConfig,
};

use crate::cancel::CancelToken;
use crate::error::ResearchError;
use crate::grid::ParamGrid;
use crate::metrics::{compute_equity, compute_stats};
use crate::optimizer::{optimize, OptimizerOptions};
use crate::provider::{BarProvider, DataError};
use crate::ranking::SortKey;
use crate::walk_forward::{walk_forward, WalkForwardConfig};

use gate::{apply_gate, compute_coverage, decide, edge_margin, score};
use proposal::{propose, Proposal};
use session::{
    apply, Evaluation, IterationOutcome, PromotionRequest, PromotionTarget, ResearchSession,
    SessionStatus,
};
use store::{validate_session_id, SessionStore};

// ─── Configuration ───────────────────────────────────────────────────

/// Robustness gate over regime coverage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Regimes with at least one closed test trade.
    pub min_regimes_seen: usize,
    pub required_regime_pass_rate: f64,
    /// Accept a low pass rate, flagging the result as brittle.
    pub allow_regime_brittle: bool,
    /// Regimes that must be qualified and profitable.
    pub critical_regimes: Vec<RegimeKey>,
    /// Closed test trades for a regime to count as qualified.
    pub regime_min_trades: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_regimes_seen: 2,
            required_regime_pass_rate: 0.5,
            allow_regime_brittle: false,
            critical_regimes: Vec::new(),
            regime_min_trades: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Standard errors subtracted from mean R for the edge margin.
    pub noise_k: f64,
    /// Edge margin at or above which a gate-passing result is adopted.
    pub adopt_margin: f64,
    pub edge_weight: f64,
    pub drawdown_weight: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            noise_k: 1.0,
            adopt_margin: 0.1,
            edge_weight: 1.0,
            drawdown_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    /// Experiments without a best-score gain above `min_improvement`; 0 disables.
    pub plateau_patience: u32,
    pub min_improvement: f64,
    /// Consecutive gate rejections; 0 disables.
    pub robustness_patience: u32,
    /// Cumulative rate-limit wait before the session stops.
    pub max_backoff_ms: u64,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            plateau_patience: 3,
            min_improvement: 0.0,
            robustness_patience: 3,
            max_backoff_ms: 60_000,
        }
    }
}

/// Tunables shared by every session; the `[autopilot]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopilotSettings {
    pub seed: u64,
    pub max_experiments: u64,
    /// Optimizer cap per experiment neighbourhood.
    pub batch_max_combos: u64,
    pub explore_rate: f64,
    pub max_duplicate_streak: u32,
    pub workers: usize,
    pub gate: GateConfig,
    pub decision: DecisionConfig,
    pub stop: StopConfig,
}

impl Default for AutopilotSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            max_experiments: 20,
            batch_max_combos: 27,
            explore_rate: 0.3,
            max_duplicate_streak: 10,
            workers: 1,
            gate: GateConfig::default(),
            decision: DecisionConfig::default(),
            stop: StopConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutopilotConfig {
    pub session_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub range_days: u32,
    /// Values for every parameter outside `param_space`.
    pub base_config: StrategyConfig,
    pub param_space: ParamGrid,
    #[serde(default)]
    pub walk_forward: WalkForwardConfig,
    #[serde(default)]
    pub regime: RegimeConfig,
    #[serde(default)]
    pub settings: AutopilotSettings,
}

impl AutopilotConfig {
    pub fn new(
        session_id: impl Into<String>,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        base_config: StrategyConfig,
        param_space: ParamGrid,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            symbol: symbol.into(),
            timeframe,
            range_days: 365,
            base_config,
            param_space,
            walk_forward: WalkForwardConfig::default(),
            regime: RegimeConfig::default(),
            settings: AutopilotSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ResearchError> {
        validate_session_id(&self.session_id)?;
        if self.symbol.trim().is_empty() {
            return Err(ResearchError::invalid("symbol must not be empty"));
        }
        self.base_config.validate()?;
        let family = self.base_config.family();
        if let Some(axis) = self
            .param_space
            .axes()
            .iter()
            .find(|a| family.param_spec(&a.name).is_none())
        {
            return Err(stratlab_core::ConfigError::UnknownParam {
                family,
                name: axis.name.clone(),
            }
            .into());
        }
        self.walk_forward.validate()?;

        let s = &self.settings;
        if s.max_experiments == 0 || s.batch_max_combos == 0 || s.max_duplicate_streak == 0 {
            return Err(ResearchError::invalid(
                "max_experiments, batch_max_combos and max_duplicate_streak must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&s.explore_rate) {
            return Err(ResearchError::invalid("explore_rate must lie in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&s.gate.required_regime_pass_rate) {
            return Err(ResearchError::invalid(
                "required_regime_pass_rate must lie in [0, 1]",
            ));
        }
        let d = &s.decision;
        if ![d.noise_k, d.adopt_margin, d.edge_weight, d.drawdown_weight]
            .iter()
            .all(|v| v.is_finite())
            || d.noise_k < 0.0
        {
            return Err(ResearchError::invalid(
                "decision weights must be finite and noise_k non-negative",
            ));
        }
        Ok(())
    }
}

// ─── Evaluation ──────────────────────────────────────────────────────

/// Optimizer over the neighbourhood, walk-forward on the best neighbour,
/// regime coverage and gate over its included test trades.
pub fn evaluate(
    series: &BarSeries,
    ctx: &BarsContext<'_>,
    classifier: &dyn RegimeClassifier,
    config: &AutopilotConfig,
    proposal: &Proposal,
) -> Result<Evaluation, ResearchError> {
    proposal.config.validate()?;
    let settings = &config.settings;

    let neighbourhood = config.param_space.neighbourhood(&proposal.config);
    let options = OptimizerOptions {
        max_combos: settings.batch_max_combos,
        top_n: Some(1),
        sort_key: SortKey::NetR,
        workers: settings.workers,
        ..OptimizerOptions::default()
    };
    let report = optimize(series, &proposal.config, &neighbourhood, &options)?;
    let evaluated_config = report
        .best()
        .map(|r| r.config.clone())
        .unwrap_or_else(|| proposal.config.clone());

    let wf = walk_forward(series, &evaluated_config, &config.walk_forward)?;
    let test_trades = tag_trades(&wf.included_test_trades(), classifier, ctx);
    let test_stats = compute_stats(&test_trades);
    let test_equity = compute_equity(&test_trades);
    let closed_r: Vec<f64> = test_trades
        .iter()
        .filter(|t| !t.is_open())
        .map(|t| t.r_multiple)
        .collect();

    let noise_k = settings.decision.noise_k;
    let coverage = compute_coverage(&test_trades, settings.gate.regime_min_trades, noise_k);
    let gate = apply_gate(&coverage, &settings.gate);
    let edge = edge_margin(&closed_r, noise_k);
    let score = score(test_stats.net_r, edge, test_equity.max_drawdown, &settings.decision);
    let decision = decide(&gate, edge, &settings.decision);

    debug!(
        config = %evaluated_config.params_string(),
        neighbours = report.combos_evaluated,
        regimes = coverage.seen,
        qualified = coverage.qualified,
        "proposal evaluated"
    );

    Ok(Evaluation {
        proposal: proposal.clone(),
        evaluated_config,
        test_stats,
        test_max_drawdown: test_equity.max_drawdown,
        walk_forward: wf.summary,
        coverage,
        gate,
        decision,
        score,
        edge_margin: edge,
    })
}

// ─── Driver ──────────────────────────────────────────────────────────

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;
type Sleep = Box<dyn Fn(Duration) + Send + Sync>;

/// First wait when the provider gives no retry hint; doubles per attempt.
const BASE_BACKOFF_MS: u64 = 1_000;

pub struct Autopilot<'a> {
    provider: &'a dyn BarProvider,
    store: &'a dyn SessionStore,
    classifier: Box<dyn RegimeClassifier>,
    clock: Clock,
    sleep: Sleep,
    cancel: CancelToken,
}

impl<'a> Autopilot<'a> {
    pub fn new(provider: &'a dyn BarProvider, store: &'a dyn SessionStore) -> Self {
        Self {
            provider,
            store,
            classifier: Box::new(AtrTrendClassifier),
            clock: Box::new(Utc::now),
            sleep: Box::new(std::thread::sleep),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn RegimeClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_sleep(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Create a new session and run it until it stops or completes.
    pub fn start(&self, config: AutopilotConfig) -> Result<ResearchSession, ResearchError> {
        config.validate()?;
        if self.store.load(&config.session_id)?.is_some() {
            return Err(ResearchError::invalid(format!(
                "session {} already exists; resume it instead",
                config.session_id
            )));
        }
        self.store.clear_stop(&config.session_id)?;
        let session = ResearchSession::new(config, (self.clock)());
        self.store.save(&session)?;
        self.run(session)
    }

    /// Continue a stored session from its next iteration.
    pub fn resume(&self, session_id: &str) -> Result<ResearchSession, ResearchError> {
        let session = self
            .store
            .load(session_id)?
            .ok_or_else(|| ResearchError::invalid(format!("no session {session_id}")))?;
        if session.is_completed() {
            info!(session = session_id, reason = ?session.stop_reason, "session already completed");
            return Ok(session);
        }
        self.store.clear_stop(session_id)?;
        self.run(session)
    }

    /// Ask a running session to stop after its current iteration.
    pub fn stop(&self, session_id: &str) -> Result<(), ResearchError> {
        self.store.request_stop(session_id)?;
        info!(session = session_id, "stop requested");
        Ok(())
    }

    pub fn promote(
        &self,
        session_id: &str,
        target: PromotionTarget,
    ) -> Result<PromotionRequest, ResearchError> {
        let mut session = self
            .store
            .load(session_id)?
            .ok_or_else(|| ResearchError::invalid(format!("no session {session_id}")))?;
        let request = session.promote(target, (self.clock)())?;
        self.store.save(&session)?;
        info!(
            session = session_id,
            target = %target,
            experiment = %request.experiment_id,
            review = request.requires_review,
            "champion promoted"
        );
        Ok(request)
    }

    fn run(&self, mut session: ResearchSession) -> Result<ResearchSession, ResearchError> {
        session.config.validate()?;
        session.begin((self.clock)());
        if let Some(reason) = session::stop_condition(&session) {
            session.finish(reason, (self.clock)());
        }
        self.store.save(&session)?;

        match self.drive(&mut session) {
            Ok(()) => Ok(session),
            Err(e) => {
                warn!(session = %session.session_id, error = %e, "autopilot run aborted");
                if session.status == SessionStatus::Running {
                    let outcome = IterationOutcome::Aborted {
                        kind: e.kind(),
                        reason: e.to_string(),
                    };
                    apply(&mut session, outcome, (self.clock)());
                    if let Err(save_err) = self.store.save(&session) {
                        warn!(
                            session = %session.session_id,
                            error = %save_err,
                            "aborted session not saved"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Fetch bars and iterate until the session leaves `running`.
    fn drive(&self, session: &mut ResearchSession) -> Result<(), ResearchError> {
        let series = match self.fetch(session)? {
            Some(series) => series,
            None => return Ok(()),
        };
        let ctx = BarsContext::new(&series, session.config.regime.clone());
        info!(
            session = %session.session_id,
            symbol = %session.config.symbol,
            timeframe = %session.config.timeframe,
            bars = series.len(),
            iteration = session.counters.next_iteration,
            "autopilot running"
        );

        while session.status == SessionStatus::Running {
            if self.cancel.is_cancelled() || self.store.stop_requested(&session.session_id)? {
                apply(session, IterationOutcome::StopRequested, (self.clock)());
                self.store.save(session)?;
                break;
            }

            let iteration = session.counters.next_iteration;
            let proposal = propose(session, iteration)?;
            let outcome = if session.evaluated.contains(&proposal.fingerprint) {
                IterationOutcome::Duplicate { proposal }
            } else {
                match evaluate(&series, &ctx, self.classifier.as_ref(), &session.config, &proposal) {
                    Ok(evaluation) => IterationOutcome::Evaluated(Box::new(evaluation)),
                    Err(e) => {
                        warn!(iteration, error = %e, "experiment failed");
                        IterationOutcome::Failed {
                            proposal,
                            kind: e.kind(),
                            reason: e.to_string(),
                        }
                    }
                }
            };
            apply(session, outcome, (self.clock)());
            self.store.save(session)?;
        }
        Ok(())
    }

    /// Fetch the session's series, backing off on rate limits. `None` when
    /// the backoff budget ran out and the session stopped.
    fn fetch(&self, session: &mut ResearchSession) -> Result<Option<BarSeries>, ResearchError> {
        let (symbol, timeframe, range_days) = (
            session.config.symbol.clone(),
            session.config.timeframe,
            session.config.range_days,
        );
        let mut attempt: u32 = 0;
        while session.status == SessionStatus::Running {
            match self.provider.get_bars(&symbol, timeframe, range_days) {
                Ok(series) => return Ok(Some(series)),
                Err(DataError::RateLimited { retry_after_ms }) => {
                    let waited_ms = if retry_after_ms > 0 {
                        retry_after_ms
                    } else {
                        BASE_BACKOFF_MS.saturating_mul(1 << attempt.min(16))
                    };
                    attempt += 1;
                    warn!(symbol = %symbol, waited_ms, attempt, "provider rate limited");
                    apply(
                        session,
                        IterationOutcome::RateLimited { waited_ms },
                        (self.clock)(),
                    );
                    self.store.save(session)?;
                    if session.status == SessionStatus::Running {
                        (self.sleep)(Duration::from_millis(waited_ms));
                    }
                }
                Err(e) => return Err(ResearchError::data(&symbol, timeframe, e)),
            }
        }
        Ok(None)
    }
}
