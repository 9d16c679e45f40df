//! Export: JSON and CSV artifacts for batch sessions, optimizer reports and
//! autopilot experiment notes.
//!
//! JSON artifacts are wrapped in an envelope carrying `schema_version` and the
//! artifact kind. Versions newer than `EXPORT_SCHEMA_VERSION` are rejected on
//! load. CSV rows are flat: one row per batch pair, optimizer result or note.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use stratlab_core::domain::Timeframe;

use crate::autopilot::session::ExperimentNote;
use crate::batch::{BatchOutcome, BatchSession};
use crate::optimizer::OptimizerReport;

pub const EXPORT_SCHEMA_VERSION: u32 = 1;

const BATCH_ARTIFACT: &str = "batch_session";
const OPTIMIZER_ARTIFACT: &str = "optimizer_report";

// ─── JSON export ────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    schema_version: u32,
    artifact: String,
    data: T,
}

fn to_envelope<T: Serialize>(artifact: &str, data: &T) -> Result<String> {
    let envelope = Envelope {
        schema_version: EXPORT_SCHEMA_VERSION,
        artifact: artifact.to_string(),
        data,
    };
    serde_json::to_string_pretty(&envelope)
        .with_context(|| format!("failed to serialize {artifact} to JSON"))
}

fn from_envelope<T: DeserializeOwned>(artifact: &str, json: &str) -> Result<T> {
    let value: serde_json::Value =
        serde_json::from_str(json).with_context(|| format!("{artifact}: invalid JSON"))?;
    let version = value
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .with_context(|| format!("{artifact}: missing schema_version"))?;
    if version > EXPORT_SCHEMA_VERSION as u64 {
        bail!(
            "unsupported schema version {} (max supported: {})",
            version,
            EXPORT_SCHEMA_VERSION
        );
    }
    let envelope: Envelope<T> = serde_json::from_value(value)
        .with_context(|| format!("failed to deserialize {artifact}"))?;
    if envelope.artifact != artifact {
        bail!("expected a {artifact} artifact, found {}", envelope.artifact);
    }
    Ok(envelope.data)
}

pub fn export_batch_json(session: &BatchSession) -> Result<String> {
    to_envelope(BATCH_ARTIFACT, session)
}

pub fn import_batch_json(json: &str) -> Result<BatchSession> {
    from_envelope(BATCH_ARTIFACT, json)
}

pub fn export_optimizer_json(report: &OptimizerReport) -> Result<String> {
    to_envelope(OPTIMIZER_ARTIFACT, report)
}

pub fn import_optimizer_json(json: &str) -> Result<OptimizerReport> {
    from_envelope(OPTIMIZER_ARTIFACT, json)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// One batch pair. Failure rows leave the metric columns empty.
#[derive(Debug, Serialize)]
struct BatchRow<'a> {
    symbol: &'a str,
    timeframe: Timeframe,
    status: &'static str,
    net_r: Option<f64>,
    win_rate: Option<f64>,
    profit_factor: Option<f64>,
    max_drawdown: Option<f64>,
    trade_count: Option<usize>,
    combos_tested: Option<u64>,
    truncated: Option<bool>,
    params: String,
    error_kind: &'static str,
    reason: &'a str,
}

pub fn export_batch_csv(session: &BatchSession) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for run in &session.runs {
        let row = match &run.outcome {
            BatchOutcome::Success {
                best,
                combos_tested,
                truncated,
                ..
            } => BatchRow {
                symbol: &run.symbol,
                timeframe: run.timeframe,
                status: "success",
                net_r: best.as_ref().map(|b| b.stats.net_r),
                win_rate: best.as_ref().map(|b| b.stats.win_rate),
                profit_factor: best.as_ref().and_then(|b| b.stats.profit_factor),
                max_drawdown: best.as_ref().map(|b| b.equity.max_drawdown),
                trade_count: best.as_ref().map(|b| b.stats.trade_count),
                combos_tested: Some(*combos_tested),
                truncated: Some(*truncated),
                params: best
                    .as_ref()
                    .map(|b| b.config.params_string())
                    .unwrap_or_default(),
                error_kind: "",
                reason: "",
            },
            BatchOutcome::Failure { kind, reason } => BatchRow {
                symbol: &run.symbol,
                timeframe: run.timeframe,
                status: "failure",
                net_r: None,
                win_rate: None,
                profit_factor: None,
                max_drawdown: None,
                trade_count: None,
                combos_tested: None,
                truncated: None,
                params: String::new(),
                error_kind: kind.as_str(),
                reason,
            },
        };
        wtr.serialize(row)?;
    }
    finish(wtr)
}

#[derive(Debug, Serialize)]
struct OptimizerRow<'a> {
    symbol: &'a str,
    timeframe: &'a str,
    rank: usize,
    id: &'a str,
    net_r: f64,
    win_rate: f64,
    profit_factor: Option<f64>,
    expectancy: f64,
    max_drawdown: f64,
    trade_count: usize,
    combos_tested: u64,
    params: String,
}

/// Optimizer results in rank order, tagged with the series they came from.
pub fn export_optimizer_csv(
    report: &OptimizerReport,
    symbol: &str,
    timeframe: Timeframe,
) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for r in &report.results {
        wtr.serialize(OptimizerRow {
            symbol,
            timeframe: timeframe.as_str(),
            rank: r.rank,
            id: &r.id.0,
            net_r: r.stats.net_r,
            win_rate: r.stats.win_rate,
            profit_factor: r.stats.profit_factor,
            expectancy: r.stats.expectancy,
            max_drawdown: r.equity.max_drawdown,
            trade_count: r.stats.trade_count,
            combos_tested: report.combos_evaluated,
            params: r.config.params_string(),
        })?;
    }
    finish(wtr)
}

#[derive(Debug, Serialize)]
struct NoteRow<'a> {
    id: &'a str,
    iteration: u64,
    proposal: &'static str,
    decision: &'static str,
    score: f64,
    edge_margin: f64,
    net_r: f64,
    win_rate: f64,
    profit_factor: Option<f64>,
    max_drawdown: f64,
    trade_count: usize,
    stability_score: f64,
    regimes_seen: usize,
    regimes_qualified: usize,
    regime_pass_rate: f64,
    worst_regime: String,
    gate_passed: bool,
    brittle: bool,
    target_regime: String,
    target_regime_passed: Option<bool>,
    params: String,
    hypothesis: &'a str,
}

pub fn export_notes_csv(notes: &[ExperimentNote]) -> Result<String> {
    use crate::autopilot::proposal::ProposalKind;

    let mut wtr = csv::Writer::from_writer(vec![]);
    for n in notes {
        wtr.serialize(NoteRow {
            id: &n.id,
            iteration: n.iteration,
            proposal: match n.proposal_kind {
                ProposalKind::Explore => "explore",
                ProposalKind::Perturb => "perturb",
            },
            decision: n.decision.as_str(),
            score: n.score,
            edge_margin: n.edge_margin,
            net_r: n.test_stats.net_r,
            win_rate: n.test_stats.win_rate,
            profit_factor: n.test_stats.profit_factor,
            max_drawdown: n.test_max_drawdown,
            trade_count: n.test_stats.trade_count,
            stability_score: n.walk_forward.stability_score,
            regimes_seen: n.coverage.seen,
            regimes_qualified: n.coverage.qualified,
            regime_pass_rate: n.coverage.pass_rate,
            worst_regime: n.coverage.worst_regime.map(|r| r.to_string()).unwrap_or_default(),
            gate_passed: n.gate.passed,
            brittle: n.gate.brittle,
            target_regime: n.target_regime.map(|r| r.to_string()).unwrap_or_default(),
            target_regime_passed: n.target_regime_passed,
            params: n.evaluated_config.params_string(),
            hypothesis: &n.hypothesis,
        })?;
    }
    finish(wtr)
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String> {
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Files ──────────────────────────────────────────────────────────

/// Write `contents` to `path`, creating parent directories.
pub fn write_artifact(path: &Path, contents: &str) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path.to_path_buf())
}
