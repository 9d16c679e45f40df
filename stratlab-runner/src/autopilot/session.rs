//! Research session state and the pure iteration transition.
//!
//! A `ResearchSession` is the whole persisted state of an autopilot run.
//! `transition` folds one `IterationOutcome` into it and applies the stop
//! conditions; it performs no I/O and reads no clock.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use stratlab_core::{ConfigHash, RegimeKey, StrategyConfig};

use crate::error::{ErrorKind, ResearchError};
use crate::metrics::Stats;
use crate::walk_forward::Summary;

use super::champion::{offer, RegimeChampionRecord};
use super::gate::{Decision, GateOutcome, RegimeCoverage};
use super::proposal::{Proposal, ProposalKind};
use super::AutopilotConfig;

/// Version written into every session snapshot.
pub const SCHEMA_VERSION: u32 = 1;

// ─── State ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Stopped,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    StopBudget,
    StopPlateau,
    StopRobustness,
    StopExhausted,
    StopRateLimit,
    StopUser,
    StopError,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::StopBudget => "stop_budget",
            StopReason::StopPlateau => "stop_plateau",
            StopReason::StopRobustness => "stop_robustness",
            StopReason::StopExhausted => "stop_exhausted",
            StopReason::StopRateLimit => "stop_rate_limit",
            StopReason::StopUser => "stop_user",
            StopReason::StopError => "stop_error",
        }
    }

    /// Reasons that end the session for good; the rest leave it resumable.
    pub fn completes(&self) -> bool {
        !matches!(
            self,
            StopReason::StopRateLimit | StopReason::StopUser | StopReason::StopError
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Resumed,
    SkippedDuplicate,
    ExperimentRecorded,
    ExperimentFailed,
    GateRejected,
    NewGlobalBest,
    ChampionReplaced,
    RateLimited,
    Aborted,
    Stopped,
    Completed,
    Promoted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub iteration: u64,
    pub kind: EventKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentNote {
    pub id: String,
    pub iteration: u64,
    pub proposal_kind: ProposalKind,
    pub proposed_config: StrategyConfig,
    /// Best neighbour of the proposal; the one walked forward.
    pub evaluated_config: StrategyConfig,
    pub test_stats: Stats,
    pub test_max_drawdown: f64,
    pub walk_forward: Summary,
    pub coverage: RegimeCoverage,
    pub gate: GateOutcome,
    pub decision: Decision,
    pub target_regime: Option<RegimeKey>,
    pub target_regime_passed: Option<bool>,
    pub hypothesis: String,
    pub score: f64,
    pub edge_margin: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalBest {
    pub experiment_id: String,
    pub iteration: u64,
    pub config: StrategyConfig,
    pub score: f64,
    pub decision: Decision,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub next_iteration: u64,
    pub experiments_run: u64,
    pub experiments_planned: u64,
    pub duplicates_skipped: u64,
    pub duplicate_streak: u32,
    pub plateau_streak: u32,
    pub rejection_streak: u32,
    pub backoff_ms_total: u64,
}

// ─── Promotion ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PromotionTarget {
    Global,
    Regime(RegimeKey),
}

impl fmt::Display for PromotionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromotionTarget::Global => f.write_str("global"),
            PromotionTarget::Regime(key) => write!(f, "{key}"),
        }
    }
}

impl FromStr for PromotionTarget {
    type Err = ResearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "global" => Ok(PromotionTarget::Global),
            other => other
                .parse()
                .map(PromotionTarget::Regime)
                .map_err(|e| ResearchError::invalid(format!("promotion target: {e}"))),
        }
    }
}

impl TryFrom<String> for PromotionTarget {
    type Error = ResearchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PromotionTarget> for String {
    fn from(target: PromotionTarget) -> Self {
        target.to_string()
    }
}

/// A champion handed to the caller for deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRequest {
    pub session_id: String,
    pub target: PromotionTarget,
    pub experiment_id: String,
    pub config: StrategyConfig,
    pub score: f64,
    pub decision: Decision,
    /// Set for `investigate` champions.
    pub requires_review: bool,
    pub requested_at: DateTime<Utc>,
}

// ─── Session ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSession {
    pub schema_version: u32,
    pub session_id: String,
    pub config: AutopilotConfig,
    pub status: SessionStatus,
    pub stop_reason: Option<StopReason>,
    pub notes: Vec<ExperimentNote>,
    pub events: Vec<SessionEvent>,
    pub champions: BTreeMap<RegimeKey, RegimeChampionRecord>,
    pub global_best: Option<GlobalBest>,
    pub evaluated: BTreeSet<ConfigHash>,
    pub counters: Counters,
    pub promotions: Vec<PromotionRequest>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResearchSession {
    pub fn new(config: AutopilotConfig, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            session_id: config.session_id.clone(),
            counters: Counters {
                experiments_planned: config.settings.max_experiments,
                ..Counters::default()
            },
            config,
            status: SessionStatus::Idle,
            stop_reason: None,
            notes: Vec::new(),
            events: Vec::new(),
            champions: BTreeMap::new(),
            global_best: None,
            evaluated: BTreeSet::new(),
            promotions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn note(&self, id: &str) -> Option<&ExperimentNote> {
        self.notes.iter().find(|n| n.id == id)
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    pub(crate) fn log(&mut self, kind: EventKind, message: impl Into<String>, at: DateTime<Utc>) {
        self.events.push(SessionEvent {
            iteration: self.counters.next_iteration,
            kind,
            message: message.into(),
            at,
        });
    }

    /// Put an idle or stopped session into `running`.
    pub(crate) fn begin(&mut self, now: DateTime<Utc>) {
        let kind = if self.status == SessionStatus::Idle {
            EventKind::Started
        } else {
            EventKind::Resumed
        };
        self.status = SessionStatus::Running;
        self.stop_reason = None;
        self.counters.backoff_ms_total = 0;
        self.updated_at = now;
        self.log(kind, format!("at iteration {}", self.counters.next_iteration), now);
    }

    pub(crate) fn finish(&mut self, reason: StopReason, now: DateTime<Utc>) {
        let (status, kind) = if reason.completes() {
            (SessionStatus::Completed, EventKind::Completed)
        } else {
            (SessionStatus::Stopped, EventKind::Stopped)
        };
        self.status = status;
        self.stop_reason = Some(reason);
        self.updated_at = now;
        self.log(kind, reason.as_str(), now);
        info!(
            session = %self.session_id,
            reason = %reason,
            experiments = self.counters.experiments_run,
            "autopilot session ended"
        );
    }

    /// Hand out the global or a regime champion and log the promotion.
    pub fn promote(
        &mut self,
        target: PromotionTarget,
        now: DateTime<Utc>,
    ) -> Result<PromotionRequest, ResearchError> {
        let (experiment_id, config, score, decision) = match target {
            PromotionTarget::Global => {
                let best = self
                    .global_best
                    .as_ref()
                    .ok_or_else(|| ResearchError::invalid("session has no global best yet"))?;
                (best.experiment_id.clone(), best.config.clone(), best.score, best.decision)
            }
            PromotionTarget::Regime(key) => {
                let champion = self
                    .champions
                    .get(&key)
                    .ok_or_else(|| ResearchError::invalid(format!("no champion for {key}")))?;
                (
                    champion.experiment_id.clone(),
                    champion.config.clone(),
                    champion.score,
                    champion.decision,
                )
            }
        };
        if decision == Decision::Reject {
            return Err(ResearchError::PromotionRefused(format!(
                "{target} champion {experiment_id} was rejected"
            )));
        }

        let request = PromotionRequest {
            session_id: self.session_id.clone(),
            target,
            experiment_id,
            config,
            score,
            decision,
            requires_review: decision == Decision::Investigate,
            requested_at: now,
        };
        self.log(
            EventKind::Promoted,
            format!("{target} -> {}", request.experiment_id),
            now,
        );
        self.updated_at = now;
        self.promotions.push(request.clone());
        Ok(request)
    }
}

// ─── Transition ──────────────────────────────────────────────────────

/// Everything measured about one evaluated proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub proposal: Proposal,
    pub evaluated_config: StrategyConfig,
    pub test_stats: Stats,
    pub test_max_drawdown: f64,
    pub walk_forward: Summary,
    pub coverage: RegimeCoverage,
    pub gate: GateOutcome,
    pub decision: Decision,
    pub score: f64,
    pub edge_margin: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    Duplicate {
        proposal: Proposal,
    },
    Evaluated(Box<Evaluation>),
    Failed {
        proposal: Proposal,
        kind: ErrorKind,
        reason: String,
    },
    RateLimited {
        waited_ms: u64,
    },
    StopRequested,
    /// The run itself failed (data fetch, proposal, storage); no experiment
    /// is charged.
    Aborted {
        kind: ErrorKind,
        reason: String,
    },
}

pub fn transition(
    mut session: ResearchSession,
    outcome: IterationOutcome,
    now: DateTime<Utc>,
) -> ResearchSession {
    apply(&mut session, outcome, now);
    session
}

/// In-place form of [`transition`].
pub(crate) fn apply(session: &mut ResearchSession, outcome: IterationOutcome, now: DateTime<Utc>) {
    session.updated_at = now;
    match outcome {
        IterationOutcome::StopRequested => {
            session.finish(StopReason::StopUser, now);
            return;
        }
        IterationOutcome::Aborted { kind, reason } => {
            session.log(EventKind::Aborted, format!("{kind}: {reason}"), now);
            session.finish(StopReason::StopError, now);
            return;
        }
        IterationOutcome::RateLimited { waited_ms } => {
            session.counters.backoff_ms_total += waited_ms;
            let total = session.counters.backoff_ms_total;
            session.log(
                EventKind::RateLimited,
                format!("waiting {waited_ms}ms (total {total}ms)"),
                now,
            );
            if total > session.config.settings.stop.max_backoff_ms {
                session.finish(StopReason::StopRateLimit, now);
            }
            return;
        }
        IterationOutcome::Duplicate { proposal } => {
            session.counters.duplicates_skipped += 1;
            session.counters.duplicate_streak += 1;
            session.log(
                EventKind::SkippedDuplicate,
                format!("{} already evaluated", proposal.fingerprint.short()),
                now,
            );
            debug!(
                session = %session.session_id,
                iteration = session.counters.next_iteration,
                "duplicate proposal skipped"
            );
        }
        IterationOutcome::Failed {
            proposal,
            kind,
            reason,
        } => {
            session.evaluated.insert(proposal.fingerprint);
            session.counters.experiments_run += 1;
            session.counters.duplicate_streak = 0;
            session.counters.plateau_streak += 1;
            session.log(EventKind::ExperimentFailed, format!("{kind}: {reason}"), now);
        }
        IterationOutcome::Evaluated(evaluation) => record(session, *evaluation, now),
    }
    session.counters.next_iteration += 1;

    if let Some(reason) = stop_condition(session) {
        session.finish(reason, now);
    }
}

fn record(session: &mut ResearchSession, e: Evaluation, now: DateTime<Utc>) {
    let iteration = session.counters.next_iteration;
    let id = format!("exp-{:04}", session.notes.len() + 1);
    let min_improvement = session.config.settings.stop.min_improvement;

    let note = ExperimentNote {
        id: id.clone(),
        iteration,
        proposal_kind: e.proposal.kind,
        target_regime_passed: e.proposal.target_regime.map(|r| e.coverage.passes(&r)),
        target_regime: e.proposal.target_regime,
        proposed_config: e.proposal.config,
        evaluated_config: e.evaluated_config,
        test_stats: e.test_stats,
        test_max_drawdown: e.test_max_drawdown,
        walk_forward: e.walk_forward,
        coverage: e.coverage,
        gate: e.gate,
        decision: e.decision,
        hypothesis: e.proposal.hypothesis,
        score: e.score,
        edge_margin: e.edge_margin,
        created_at: now,
    };

    session.evaluated.insert(e.proposal.fingerprint);
    session.counters.experiments_run += 1;
    session.counters.duplicate_streak = 0;

    info!(
        session = %session.session_id,
        experiment = %id,
        decision = %note.decision,
        score = note.score,
        edge = note.edge_margin,
        "experiment recorded"
    );
    session.log(
        EventKind::ExperimentRecorded,
        format!("{id} {} score {:.3}", note.decision, note.score),
        now,
    );

    if note.gate.passed {
        session.counters.rejection_streak = 0;
    } else {
        session.counters.rejection_streak += 1;
        debug!(experiment = %id, reasons = ?note.gate.reasons, "gate rejected");
        session.log(EventKind::GateRejected, note.gate.reasons.join("; "), now);
    }

    let previous = session.global_best.as_ref().map(|b| b.score);
    let improved = note.gate.passed
        && note.decision != Decision::Reject
        && note.score.is_finite()
        && previous.map_or(true, |p| note.score > p);
    if improved {
        session.global_best = Some(GlobalBest {
            experiment_id: id.clone(),
            iteration,
            config: note.evaluated_config.clone(),
            score: note.score,
            decision: note.decision,
        });
        session.log(
            EventKind::NewGlobalBest,
            format!("{id} score {:.3}", note.score),
            now,
        );
    }
    let meaningful = improved && previous.map_or(true, |p| note.score - p > min_improvement);
    if meaningful {
        session.counters.plateau_streak = 0;
    } else {
        session.counters.plateau_streak += 1;
    }

    for (regime, stats) in note.coverage.regimes.iter().filter(|(_, s)| s.qualified) {
        let challenger = RegimeChampionRecord {
            regime: *regime,
            experiment_id: id.clone(),
            iteration,
            config: note.evaluated_config.clone(),
            decision: note.decision,
            score: stats.edge,
            sample_count: stats.trades,
        };
        if offer(&mut session.champions, challenger) {
            session.events.push(SessionEvent {
                iteration,
                kind: EventKind::ChampionReplaced,
                message: format!("{regime} -> {id}"),
                at: now,
            });
        }
    }

    session.notes.push(note);
}

/// First stop condition that holds, checked in a fixed order.
pub(crate) fn stop_condition(session: &ResearchSession) -> Option<StopReason> {
    let c = &session.counters;
    let settings = &session.config.settings;
    let stop = &settings.stop;
    if c.experiments_run >= settings.max_experiments {
        Some(StopReason::StopBudget)
    } else if stop.robustness_patience > 0 && c.rejection_streak >= stop.robustness_patience {
        Some(StopReason::StopRobustness)
    } else if stop.plateau_patience > 0 && c.plateau_streak >= stop.plateau_patience {
        Some(StopReason::StopPlateau)
    } else if c.duplicate_streak >= settings.max_duplicate_streak {
        Some(StopReason::StopExhausted)
    } else {
        None
    }
}

// ─── Snapshot codec ──────────────────────────────────────────────────

pub fn encode(session: &ResearchSession) -> Result<String, ResearchError> {
    Ok(serde_json::to_string_pretty(session)?)
}

/// Parse a snapshot, refusing versions newer than `SCHEMA_VERSION`.
pub fn decode(json: &str) -> Result<ResearchSession, ResearchError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let version = value
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ResearchError::Persistence("snapshot has no schema_version".into()))?;
    if version > SCHEMA_VERSION as u64 {
        return Err(ResearchError::Persistence(format!(
            "snapshot schema_version {version} is newer than supported {SCHEMA_VERSION}"
        )));
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autopilot::gate::RegimeStats;
    use crate::autopilot::tests::test_config;
    use crate::metrics::Stats;
    use crate::walk_forward::summarize;
    use stratlab_core::fingerprint::experiment_key;

    fn t(i: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + chrono::Duration::seconds(i)
    }

    fn proposal(tag: u64) -> Proposal {
        let config = test_config();
        let cfg = config.param_space.config_at(&config.base_config, tag).unwrap();
        Proposal {
            kind: ProposalKind::Explore,
            fingerprint: experiment_key(&config.symbol, config.timeframe, &cfg),
            config: cfg,
            target_regime: None,
            hypothesis: format!("point {tag}"),
        }
    }

    fn evaluation(tag: u64, score: f64, passed: bool, regime_edge: f64) -> IterationOutcome {
        let p = proposal(tag);
        let key: RegimeKey = "high_vol/up/london".parse().unwrap();
        let mut coverage = RegimeCoverage::default();
        coverage.regimes.insert(
            key,
            RegimeStats {
                trades: 5,
                net_r: regime_edge * 5.0,
                expectancy: regime_edge,
                edge: regime_edge,
                qualified: true,
                profitable: regime_edge > 0.0,
            },
        );
        IterationOutcome::Evaluated(Box::new(Evaluation {
            evaluated_config: p.config.clone(),
            proposal: p,
            test_stats: Stats::empty(),
            test_max_drawdown: 0.0,
            walk_forward: summarize(&[], &Default::default()),
            coverage,
            gate: GateOutcome {
                passed,
                brittle: false,
                reasons: if passed { vec![] } else { vec!["thin".into()] },
            },
            decision: if passed { Decision::Adopt } else { Decision::Reject },
            score,
            edge_margin: score,
        }))
    }

    fn fresh() -> ResearchSession {
        let mut s = ResearchSession::new(test_config(), t(0));
        s.begin(t(0));
        s
    }

    #[test]
    fn duplicates_do_not_consume_budget() {
        let mut s = fresh();
        s = transition(s, IterationOutcome::Duplicate { proposal: proposal(0) }, t(1));
        assert_eq!(s.counters.experiments_run, 0);
        assert_eq!(s.counters.duplicates_skipped, 1);
        assert_eq!(s.counters.next_iteration, 1);
        assert_eq!(s.events.last().unwrap().kind, EventKind::SkippedDuplicate);
        assert_eq!(s.status, SessionStatus::Running);
    }

    #[test]
    fn duplicate_streak_exhausts() {
        let mut s = fresh();
        let limit = s.config.settings.max_duplicate_streak;
        for i in 0..limit {
            s = transition(s, IterationOutcome::Duplicate { proposal: proposal(0) }, t(i as i64));
        }
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.stop_reason, Some(StopReason::StopExhausted));
    }

    #[test]
    fn budget_completes_the_session() {
        let mut s = fresh();
        s.config.settings.max_experiments = 2;
        s = transition(s, evaluation(0, 1.0, true, 0.5), t(1));
        assert_eq!(s.status, SessionStatus::Running);
        s = transition(s, evaluation(1, 2.0, true, 0.5), t(2));
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.stop_reason, Some(StopReason::StopBudget));
        assert_eq!(s.notes.len(), 2);
        assert_eq!(s.notes[1].id, "exp-0002");
    }

    #[test]
    fn global_best_only_from_gate_passing_notes() {
        let mut s = fresh();
        s = transition(s, evaluation(0, 9.0, false, 0.5), t(1));
        assert!(s.global_best.is_none());
        s = transition(s, evaluation(1, 1.0, true, 0.5), t(2));
        assert_eq!(s.global_best.as_ref().unwrap().experiment_id, "exp-0002");
        s = transition(s, evaluation(2, 0.5, true, 0.5), t(3));
        assert_eq!(s.global_best.as_ref().unwrap().experiment_id, "exp-0002");
    }

    #[test]
    fn rejected_note_never_becomes_global_best() {
        let mut s = fresh();
        // Gate passes but a negative edge margin rejects the experiment.
        let mut outcome = evaluation(0, 3.0, true, 0.5);
        if let IterationOutcome::Evaluated(e) = &mut outcome {
            e.decision = Decision::Reject;
            e.edge_margin = -0.2;
        }
        s = transition(s, outcome, t(1));
        assert_eq!(s.notes[0].decision, Decision::Reject);
        assert!(s.global_best.is_none());
        assert!(s.promote(PromotionTarget::Global, t(2)).is_err());

        s = transition(s, evaluation(1, 1.0, true, 0.5), t(3));
        let best = s.global_best.as_ref().unwrap();
        assert_eq!(best.experiment_id, "exp-0002");
        assert_eq!(best.decision, Decision::Adopt);
    }

    #[test]
    fn aborted_run_stops_resumably_without_charging_budget() {
        let mut s = fresh();
        s = transition(s, evaluation(0, 1.0, true, 0.5), t(1));
        s = transition(
            s,
            IterationOutcome::Aborted {
                kind: ErrorKind::DataUnavailable,
                reason: "feed offline".into(),
            },
            t(2),
        );
        assert_eq!(s.status, SessionStatus::Stopped);
        assert_eq!(s.stop_reason, Some(StopReason::StopError));
        assert_eq!(s.counters.experiments_run, 1);
        assert_eq!(s.counters.next_iteration, 1);
        assert!(s
            .events
            .iter()
            .any(|e| e.kind == EventKind::Aborted && e.message.contains("feed offline")));
        s.begin(t(3));
        assert_eq!(s.status, SessionStatus::Running);
        assert_eq!(s.stop_reason, None);
    }

    #[test]
    fn robustness_patience_stops() {
        let mut s = fresh();
        s.config.settings.stop.robustness_patience = 2;
        s = transition(s, evaluation(0, 1.0, false, 0.5), t(1));
        s = transition(s, evaluation(1, 1.0, false, 0.5), t(2));
        assert_eq!(s.stop_reason, Some(StopReason::StopRobustness));
        assert!(s.is_completed());
    }

    #[test]
    fn plateau_patience_stops() {
        let mut s = fresh();
        s.config.settings.stop.plateau_patience = 2;
        s.config.settings.stop.robustness_patience = 0;
        s = transition(s, evaluation(0, 5.0, true, 0.5), t(1));
        assert_eq!(s.counters.plateau_streak, 0);
        s = transition(s, evaluation(1, 4.0, true, 0.5), t(2));
        s = transition(s, evaluation(2, 3.0, true, 0.5), t(3));
        assert_eq!(s.stop_reason, Some(StopReason::StopPlateau));
    }

    #[test]
    fn rate_limit_backoff_stops_resumably() {
        let mut s = fresh();
        let cap = s.config.settings.stop.max_backoff_ms;
        s = transition(s, IterationOutcome::RateLimited { waited_ms: cap }, t(1));
        assert_eq!(s.status, SessionStatus::Running);
        s = transition(s, IterationOutcome::RateLimited { waited_ms: 1 }, t(2));
        assert_eq!(s.status, SessionStatus::Stopped);
        assert_eq!(s.stop_reason, Some(StopReason::StopRateLimit));
        assert_eq!(s.counters.next_iteration, 0);
    }

    #[test]
    fn champions_follow_regime_edge() {
        let mut s = fresh();
        s.config.settings.stop.plateau_patience = 0;
        s = transition(s, evaluation(0, 1.0, false, 0.4), t(1));
        s = transition(s, evaluation(1, 1.0, true, 0.2), t(2));
        s = transition(s, evaluation(2, 1.0, true, 0.6), t(3));
        let champ = s.champions.values().next().unwrap();
        assert_eq!(champ.experiment_id, "exp-0003");
        assert!((champ.score - 0.6).abs() < 1e-12);
    }

    #[test]
    fn promotion_rules() {
        let mut s = fresh();
        assert!(s.promote(PromotionTarget::Global, t(1)).is_err());

        s = transition(s, evaluation(0, 1.0, false, 0.4), t(1));
        let regime = *s.champions.keys().next().unwrap();
        let refused = s.promote(PromotionTarget::Regime(regime), t(2)).unwrap_err();
        assert_eq!(refused.kind(), ErrorKind::GateRejected);

        s = transition(s, evaluation(1, 2.0, true, 0.5), t(3));
        let req = s.promote(PromotionTarget::Global, t(4)).unwrap();
        assert_eq!(req.experiment_id, "exp-0002");
        assert!(!req.requires_review);
        assert_eq!(s.promotions.len(), 1);
        assert_eq!(s.events.last().unwrap().kind, EventKind::Promoted);
    }

    #[test]
    fn user_stop_is_resumable() {
        let mut s = fresh();
        s = transition(s, IterationOutcome::StopRequested, t(1));
        assert_eq!(s.status, SessionStatus::Stopped);
        assert_eq!(s.stop_reason, Some(StopReason::StopUser));
        s.begin(t(2));
        assert_eq!(s.status, SessionStatus::Running);
        assert_eq!(s.events.last().unwrap().kind, EventKind::Resumed);
    }

    #[test]
    fn snapshot_round_trip_and_version_guard() {
        let mut s = fresh();
        s = transition(s, evaluation(0, 1.0, true, 0.5), t(1));
        let json = encode(&s).unwrap();
        assert_eq!(decode(&json).unwrap(), s);

        let newer = json.replacen(
            &format!("\"schema_version\": {SCHEMA_VERSION}"),
            &format!("\"schema_version\": {}", SCHEMA_VERSION + 1),
            1,
        );
        assert!(matches!(decode(&newer), Err(ResearchError::Persistence(_))));
    }

    #[test]
    fn promotion_target_parses() {
        assert_eq!("global".parse::<PromotionTarget>().unwrap(), PromotionTarget::Global);
        let t: PromotionTarget = "low_vol/range/daily".parse().unwrap();
        assert_eq!(t.to_string(), "low_vol/range/daily");
        assert!("nowhere".parse::<PromotionTarget>().is_err());
    }
}
