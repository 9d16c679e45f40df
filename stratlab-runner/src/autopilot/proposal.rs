//! Seeded proposal of the next configuration to evaluate.
//!
//! Each iteration draws from its own RNG stream
//! (`RngHierarchy::rng_for(session_id, "proposal", iteration)`), so a resumed
//! session proposes exactly what an uninterrupted one would have.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use stratlab_core::fingerprint::experiment_key;
use stratlab_core::rng::RngHierarchy;
use stratlab_core::{ConfigHash, RegimeKey, StrategyConfig};

use crate::error::ResearchError;
use crate::grid::nearest_position;

use super::session::ResearchSession;

/// Random grid points drawn per exploration attempt.
const EXPLORE_CANDIDATES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    Explore,
    Perturb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub kind: ProposalKind,
    pub config: StrategyConfig,
    /// Experiment key over symbol, timeframe and config.
    pub fingerprint: ConfigHash,
    pub target_regime: Option<RegimeKey>,
    pub hypothesis: String,
}

pub fn propose(session: &ResearchSession, iteration: u64) -> Result<Proposal, ResearchError> {
    let config = &session.config;
    let mut rng = RngHierarchy::new(config.settings.seed).rng_for(
        &config.session_id,
        "proposal",
        iteration,
    );

    let target_regime = session
        .global_best
        .as_ref()
        .and_then(|best| session.note(&best.experiment_id))
        .and_then(|note| note.coverage.worst_regime);

    let explore = session.global_best.is_none() || rng.gen_bool(config.settings.explore_rate);
    let perturbed = if explore {
        None
    } else {
        perturb(session, &mut rng)?
    };
    let (kind, candidate, hypothesis) = match perturbed {
        Some((cfg, text)) => (ProposalKind::Perturb, cfg, text),
        None => {
            let (cfg, text) = explore_space(session, &mut rng)?;
            (ProposalKind::Explore, cfg, text)
        }
    };

    let hypothesis = match target_regime {
        Some(regime) => format!("{hypothesis}; aims to lift {regime}"),
        None => hypothesis,
    };
    Ok(Proposal {
        kind,
        fingerprint: experiment_key(&config.symbol, config.timeframe, &candidate),
        config: candidate,
        target_regime,
        hypothesis,
    })
}

/// Random grid points, preferring valid ones not yet evaluated.
fn explore_space(
    session: &ResearchSession,
    rng: &mut StdRng,
) -> Result<(StrategyConfig, String), ResearchError> {
    let config = &session.config;
    let space = &config.param_space;
    let total = space.size().max(1);

    let mut fallback: Option<(StrategyConfig, u64)> = None;
    for _ in 0..EXPLORE_CANDIDATES {
        let index = rng.gen_range(0..total);
        let candidate = space.config_at(&config.base_config, index)?;
        if candidate.validate().is_err() {
            continue;
        }
        let key = experiment_key(&config.symbol, config.timeframe, &candidate);
        if !session.evaluated.contains(&key) {
            let text = format!("explore untested point {}", space.describe(index));
            return Ok((candidate, text));
        }
        fallback.get_or_insert((candidate, index));
    }

    Ok(match fallback {
        Some((candidate, index)) => {
            let text = format!("revisit {}", space.describe(index));
            (candidate, text)
        }
        None => {
            let index = rng.gen_range(0..total);
            let text = format!("explore {}", space.describe(index));
            (space.config_at(&config.base_config, index)?, text)
        }
    })
}

/// Move one random multi-valued axis of the global best one step.
fn perturb(
    session: &ResearchSession,
    rng: &mut StdRng,
) -> Result<Option<(StrategyConfig, String)>, ResearchError> {
    let Some(best) = &session.global_best else {
        return Ok(None);
    };
    let movable: Vec<_> = session
        .config
        .param_space
        .axes()
        .iter()
        .filter(|a| a.values.len() > 1)
        .collect();
    if movable.is_empty() {
        return Ok(None);
    }

    let axis = movable[rng.gen_range(0..movable.len())];
    let Some(current) = best.config.param(&axis.name) else {
        return Ok(None);
    };
    let at = nearest_position(&axis.values, &current);
    let last = axis.values.len() - 1;
    let step_up = rng.gen_bool(0.5);
    let next = match (step_up, at) {
        (true, i) if i < last => i + 1,
        (true, i) => i - 1,
        (false, 0) => 1,
        (false, i) => i - 1,
    };

    let value = &axis.values[next];
    let candidate = best.config.with_param(&axis.name, value)?;
    let text = format!(
        "perturb {} {} -> {} from {}",
        axis.name, current, value, best.experiment_id
    );
    Ok(Some((candidate, text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autopilot::session::GlobalBest;
    use crate::autopilot::tests::test_config;
    use crate::autopilot::gate::Decision;

    fn session() -> ResearchSession {
        ResearchSession::new(test_config(), chrono::DateTime::UNIX_EPOCH)
    }

    #[test]
    fn proposals_are_reproducible() {
        let s = session();
        for i in 0..5 {
            assert_eq!(propose(&s, i).unwrap(), propose(&s, i).unwrap());
        }
    }

    #[test]
    fn without_a_best_every_proposal_explores() {
        let s = session();
        for i in 0..10 {
            let p = propose(&s, i).unwrap();
            assert_eq!(p.kind, ProposalKind::Explore);
            assert!(p.target_regime.is_none());
            p.config.validate().unwrap();
        }
    }

    #[test]
    fn perturbation_moves_a_single_axis_one_step() {
        let mut s = session();
        s.config.settings.explore_rate = 0.0;
        let best_config = s.config.param_space.config_at(&s.config.base_config, 4).unwrap();
        s.global_best = Some(GlobalBest {
            experiment_id: "exp-0001".into(),
            iteration: 0,
            config: best_config.clone(),
            score: 1.0,
            decision: Decision::Adopt,
        });

        for i in 0..10 {
            let p = propose(&s, i).unwrap();
            assert_eq!(p.kind, ProposalKind::Perturb);
            let changed: Vec<_> = best_config
                .params()
                .into_iter()
                .zip(p.config.params())
                .filter(|(a, b)| a != b)
                .collect();
            assert_eq!(changed.len(), 1, "{}", p.hypothesis);
            let name = changed[0].0 .0;
            let axis = s.config.param_space.axis(name).unwrap();
            let from = nearest_position(&axis.values, &changed[0].0 .1);
            let to = nearest_position(&axis.values, &changed[0].1 .1);
            assert_eq!(from.abs_diff(to), 1);
        }
    }
}
