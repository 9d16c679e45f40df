//! Regime coverage, the robustness gate, edge margin, and the decision rule.
//!
//! All functions here are pure: tagged test trades in, verdicts out.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stratlab_core::{RegimeKey, Trade};

use crate::metrics::{mean_f64, std_dev};

use super::{DecisionConfig, GateConfig};

/// Out-of-sample figures for one regime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeStats {
    pub trades: usize,
    pub net_r: f64,
    pub expectancy: f64,
    pub edge: f64,
    /// At least `regime_min_trades` closed trades.
    pub qualified: bool,
    pub profitable: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegimeCoverage {
    pub regimes: BTreeMap<RegimeKey, RegimeStats>,
    pub seen: usize,
    pub qualified: usize,
    /// Qualified regimes with positive net R.
    pub passed: usize,
    /// `passed / seen`, 0 when nothing was seen. Seen regimes that never
    /// qualified count against the rate.
    pub pass_rate: f64,
    /// Lowest-expectancy qualified regime (any seen regime if none qualified).
    pub worst_regime: Option<RegimeKey>,
}

impl RegimeCoverage {
    pub fn passes(&self, key: &RegimeKey) -> bool {
        self.regimes
            .get(key)
            .is_some_and(|r| r.qualified && r.profitable)
    }
}

/// Noise-adjusted mean R: `mean − k × stderr`.
///
/// Fewer than two trades give no dispersion estimate; their standard error is
/// taken as one R.
pub fn edge_margin(rs: &[f64], noise_k: f64) -> f64 {
    let stderr = if rs.len() < 2 {
        1.0
    } else {
        std_dev(rs) / (rs.len() as f64).sqrt()
    };
    mean_f64(rs) - noise_k * stderr
}

/// Group closed, regime-tagged trades and score each regime.
pub fn compute_coverage(trades: &[Trade], min_trades: usize, noise_k: f64) -> RegimeCoverage {
    let mut by_regime: BTreeMap<RegimeKey, Vec<f64>> = BTreeMap::new();
    for trade in trades.iter().filter(|t| !t.is_open()) {
        if let Some(regime) = trade.regime {
            by_regime.entry(regime).or_default().push(trade.r_multiple);
        }
    }

    let regimes: BTreeMap<RegimeKey, RegimeStats> = by_regime
        .into_iter()
        .map(|(key, rs)| {
            let net_r: f64 = rs.iter().sum();
            let stats = RegimeStats {
                trades: rs.len(),
                net_r,
                expectancy: mean_f64(&rs),
                edge: edge_margin(&rs, noise_k),
                qualified: rs.len() >= min_trades.max(1),
                profitable: net_r > 0.0,
            };
            (key, stats)
        })
        .collect();

    let qualified = regimes.values().filter(|r| r.qualified).count();
    let passed = regimes
        .values()
        .filter(|r| r.qualified && r.profitable)
        .count();
    let lowest = |only_qualified: bool| {
        regimes
            .iter()
            .filter(|(_, r)| !only_qualified || r.qualified)
            .min_by(|a, b| a.1.expectancy.total_cmp(&b.1.expectancy))
            .map(|(k, _)| *k)
    };
    let worst_regime = if qualified > 0 {
        lowest(true)
    } else {
        lowest(false)
    };

    RegimeCoverage {
        seen: regimes.len(),
        qualified,
        passed,
        pass_rate: if regimes.is_empty() {
            0.0
        } else {
            passed as f64 / regimes.len() as f64
        },
        worst_regime,
        regimes,
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GateOutcome {
    pub passed: bool,
    /// Pass rate fell short but brittle results were allowed.
    pub brittle: bool,
    pub reasons: Vec<String>,
}

pub fn apply_gate(coverage: &RegimeCoverage, config: &GateConfig) -> GateOutcome {
    let mut reasons = Vec::new();
    let mut brittle = false;

    if coverage.seen < config.min_regimes_seen {
        reasons.push(format!(
            "{} regimes seen, need {}",
            coverage.seen, config.min_regimes_seen
        ));
    }
    if coverage.pass_rate < config.required_regime_pass_rate {
        if config.allow_regime_brittle {
            brittle = true;
        } else {
            reasons.push(format!(
                "regime pass rate {:.2} below {:.2}",
                coverage.pass_rate, config.required_regime_pass_rate
            ));
        }
    }
    for critical in &config.critical_regimes {
        if !coverage.passes(critical) {
            reasons.push(format!("critical regime {critical} not passed"));
        }
    }

    GateOutcome {
        passed: reasons.is_empty(),
        brittle,
        reasons,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Adopt,
    Investigate,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Adopt => "adopt",
            Decision::Investigate => "investigate",
            Decision::Reject => "reject",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `net_r + edge_weight × edge − drawdown_weight × max_drawdown`.
pub fn score(net_r: f64, edge: f64, max_drawdown: f64, config: &DecisionConfig) -> f64 {
    net_r + config.edge_weight * edge - config.drawdown_weight * max_drawdown
}

pub fn decide(gate: &GateOutcome, edge: f64, config: &DecisionConfig) -> Decision {
    if !gate.passed || edge < 0.0 {
        Decision::Reject
    } else if edge >= config.adopt_margin {
        Decision::Adopt
    } else {
        Decision::Investigate
    }
}
