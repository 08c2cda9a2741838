//! Strategy id -> instance resolution.
//!
//! The plugin loader's only job is to produce values satisfying the
//! `Strategy` capability; its internals live outside the core. The built-in
//! table below is what tests and the default deployment use.

use crate::error::{CoreError, CoreResult};
use crate::strategy::builtin::{
    HoldStrategy, ScheduledConfig, ScheduledStrategy, WindowProbeConfig, WindowProbeStrategy,
};
use crate::strategy::Strategy;
use std::collections::HashMap;

/// Available strategy ids with one-line descriptions.
pub fn available_strategies() -> HashMap<&'static str, &'static str> {
    let mut map = HashMap::new();
    map.insert("hold", "Never trades (smoke test)");
    map.insert("scheduled", "Market orders at configured bar indices");
    map.insert("window_probe", "Fetches a lookback window, optionally buys on arrival");
    map
}

/// Create a strategy by id. `config` is the run's free-form config object.
pub fn make_strategy(strategy_id: &str, config: &serde_json::Value) -> CoreResult<Box<dyn Strategy>> {
    match strategy_id {
        "hold" => Ok(Box::new(HoldStrategy)),
        "scheduled" => {
            let parsed: ScheduledConfig = parse_config(strategy_id, config)?;
            Ok(Box::new(ScheduledStrategy::new(parsed)))
        }
        "window_probe" => {
            let parsed: WindowProbeConfig = parse_config(strategy_id, config)?;
            Ok(Box::new(WindowProbeStrategy::new(parsed)))
        }
        unknown => Err(CoreError::validation(format!(
            "unknown strategy `{unknown}`; available: {}",
            available_strategies().keys().copied().collect::<Vec<_>>().join(", ")
        ))),
    }
}

fn parse_config<T: serde::de::DeserializeOwned + Default>(
    strategy_id: &str,
    config: &serde_json::Value,
) -> CoreResult<T> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone()).map_err(|e| {
        CoreError::validation(format!("bad config for strategy `{strategy_id}`: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_ids_resolve() {
        for id in available_strategies().keys() {
            make_strategy(id, &serde_json::Value::Null).unwrap();
        }
    }

    #[test]
    fn test_unknown_id_fails_validation() {
        assert!(matches!(
            make_strategy("nope", &serde_json::Value::Null),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_scheduled_config_parses() {
        let config = json!({"orders": [{"bar_index": 2, "side": "buy", "qty": "1"}]});
        make_strategy("scheduled", &config).unwrap();
    }
}
