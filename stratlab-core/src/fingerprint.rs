//! Fingerprints for deduplicating evaluated configurations.

use crate::domain::{ConfigHash, Timeframe};
use crate::strategy::StrategyConfig;
use serde_json::json;

/// Identity of "this config on this market": two proposals with the same key
/// would reproduce the same evaluation.
pub fn experiment_key(symbol: &str, timeframe: Timeframe, config: &StrategyConfig) -> ConfigHash {
    let canonical = json!({
        "symbol": symbol,
        "timeframe": timeframe.as_str(),
        "config": config,
    });
    ConfigHash::from_bytes(canonical.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{ParamValue, StrategyFamily};

    #[test]
    fn key_depends_on_market_and_params() {
        let config = StrategyFamily::RangeBreakout.default_config();
        let base = experiment_key("EURUSD", Timeframe::H1, &config);
        assert_eq!(base, experiment_key("EURUSD", Timeframe::H1, &config.clone()));
        assert_ne!(base, experiment_key("GBPUSD", Timeframe::H1, &config));
        assert_ne!(base, experiment_key("EURUSD", Timeframe::M15, &config));
        let other = config.with_param("lookback", &ParamValue::Int(30)).unwrap();
        assert_ne!(base, experiment_key("EURUSD", Timeframe::H1, &other));
    }
}
