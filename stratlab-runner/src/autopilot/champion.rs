//! Per-regime champion records.

use serde::{Deserialize, Serialize};
use stratlab_core::{RegimeKey, StrategyConfig};

use super::gate::Decision;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeChampionRecord {
    pub regime: RegimeKey,
    pub experiment_id: String,
    pub iteration: u64,
    pub config: StrategyConfig,
    pub decision: Decision,
    /// Edge margin of the experiment's test trades inside this regime.
    pub score: f64,
    pub sample_count: usize,
}

impl RegimeChampionRecord {
    /// Whether `challenger` replaces `self`: a higher score, or an equal score
    /// with more samples, or equal on both from a later iteration.
    pub fn is_beaten_by(&self, challenger: &RegimeChampionRecord) -> bool {
        if challenger.score > self.score {
            return true;
        }
        if challenger.score < self.score || challenger.score.is_nan() {
            return false;
        }
        challenger.sample_count > self.sample_count
            || (challenger.sample_count == self.sample_count && challenger.iteration > self.iteration)
    }
}

/// Insert `challenger` if the slot is empty or the incumbent is beaten.
/// Returns whether the map changed.
pub fn offer(
    champions: &mut std::collections::BTreeMap<RegimeKey, RegimeChampionRecord>,
    challenger: RegimeChampionRecord,
) -> bool {
    if !challenger.score.is_finite() {
        return false;
    }
    match champions.get(&challenger.regime) {
        Some(incumbent) if !incumbent.is_beaten_by(&challenger) => false,
        _ => {
            champions.insert(challenger.regime, challenger);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use stratlab_core::StrategyFamily;

    fn record(score: f64, samples: usize, iteration: u64) -> RegimeChampionRecord {
        RegimeChampionRecord {
            regime: "high_vol/up/london".parse().unwrap(),
            experiment_id: format!("exp-{iteration:04}"),
            iteration,
            config: StrategyFamily::RangeBreakout.default_config(),
            decision: Decision::Investigate,
            score,
            sample_count: samples,
        }
    }

    #[test]
    fn replacement_rule() {
        let incumbent = record(1.0, 5, 3);
        assert!(incumbent.is_beaten_by(&record(1.1, 1, 1)));
        assert!(!incumbent.is_beaten_by(&record(0.9, 50, 9)));
        assert!(incumbent.is_beaten_by(&record(1.0, 6, 1)));
        assert!(!incumbent.is_beaten_by(&record(1.0, 4, 9)));
        assert!(incumbent.is_beaten_by(&record(1.0, 5, 4)));
        assert!(!incumbent.is_beaten_by(&record(1.0, 5, 3)));
    }

    #[test]
    fn offer_fills_empty_slot_and_skips_nan() {
        let mut map = BTreeMap::new();
        assert!(!offer(&mut map, record(f64::NAN, 5, 1)));
        assert!(offer(&mut map, record(-2.0, 5, 1)));
        assert!(!offer(&mut map, record(-3.0, 9, 2)));
        assert_eq!(map.len(), 1);
    }

    proptest! {
        #[test]
        fn champion_scores_never_decrease(
            offers in prop::collection::vec((-5.0f64..5.0, 0usize..20), 1..40)
        ) {
            let mut map = BTreeMap::new();
            let mut last: Option<f64> = None;
            for (i, (score, samples)) in offers.into_iter().enumerate() {
                offer(&mut map, record(score, samples, i as u64));
                let current = map.values().next().map(|r: &RegimeChampionRecord| r.score);
                if let (Some(prev), Some(now)) = (last, current) {
                    prop_assert!(now >= prev);
                }
                last = current;
            }
        }
    }
}
