use rust_decimal::Decimal;
use serde_json::{Map, Value as JsonValue};
use std::str::FromStr;

use crate::error::StrategyError;

/// The merged, free-form parameter map a strategy is constructed from.
///
/// Merge precedence (lowest to highest): strategy defaults, the bot's trading
/// configuration, the bot's `strategy_settings`. Values may arrive as JSON
/// numbers or strings; getters accept both.
#[derive(Debug, Clone, Default)]
pub struct StrategyParams {
    values: Map<String, JsonValue>,
}

impl StrategyParams {
    pub fn new(values: Map<String, JsonValue>) -> Self {
        Self { values }
    }

    /// Builds the effective parameter map for one bot.
    pub fn merged(
        defaults: &JsonValue,
        bot_configuration: &JsonValue,
        strategy_settings: &JsonValue,
    ) -> Self {
        let mut values = Map::new();
        for layer in [defaults, bot_configuration, strategy_settings] {
            if let JsonValue::Object(map) = layer {
                for (key, value) in map {
                    values.insert(key.clone(), value.clone());
                }
            }
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.values.get(key)
    }

    pub fn string(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(JsonValue::String(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    pub fn required_string(&self, key: &str) -> Result<String, StrategyError> {
        match self.values.get(key) {
            Some(JsonValue::String(s)) if !s.is_empty() => Ok(s.clone()),
            _ => Err(StrategyError::InvalidParameters(format!(
                "`{}` is required",
                key
            ))),
        }
    }

    pub fn decimal(&self, key: &str, default: Decimal) -> Result<Decimal, StrategyError> {
        match self.values.get(key) {
            None | Some(JsonValue::Null) => Ok(default),
            Some(JsonValue::String(s)) => Decimal::from_str(s).map_err(|_| {
                StrategyError::InvalidParameters(format!("`{}` is not a decimal: {}", key, s))
            }),
            Some(JsonValue::Number(n)) => Decimal::from_str(&n.to_string()).map_err(|_| {
                StrategyError::InvalidParameters(format!("`{}` is not a decimal: {}", key, n))
            }),
            Some(other) => Err(StrategyError::InvalidParameters(format!(
                "`{}` is not a decimal: {}",
                key, other
            ))),
        }
    }

    pub fn usize(&self, key: &str, default: usize) -> Result<usize, StrategyError> {
        match self.values.get(key) {
            None | Some(JsonValue::Null) => Ok(default),
            Some(JsonValue::Number(n)) => n.as_u64().map(|v| v as usize).ok_or_else(|| {
                StrategyError::InvalidParameters(format!("`{}` is not a whole number: {}", key, n))
            }),
            Some(JsonValue::String(s)) => s.parse::<usize>().map_err(|_| {
                StrategyError::InvalidParameters(format!("`{}` is not a whole number: {}", key, s))
            }),
            Some(other) => Err(StrategyError::InvalidParameters(format!(
                "`{}` is not a whole number: {}",
                key, other
            ))),
        }
    }

    pub fn u64(&self, key: &str, default: u64) -> Result<u64, StrategyError> {
        Ok(self.usize(key, default as usize)? as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn merge_precedence_is_defaults_then_config_then_settings() {
        let params = StrategyParams::merged(
            &json!({"ema_fast": 5, "ema_slow": 13, "quantity": "0.01"}),
            &json!({"symbol": "BTCUSDT", "quantity": "0.02"}),
            &json!({"ema_fast": 8}),
        );
        assert_eq!(params.usize("ema_fast", 0).unwrap(), 8);
        assert_eq!(params.usize("ema_slow", 0).unwrap(), 13);
        assert_eq!(params.decimal("quantity", dec!(0)).unwrap(), dec!(0.02));
        assert_eq!(params.string("symbol", ""), "BTCUSDT");
    }

    #[test]
    fn getters_accept_numbers_and_strings() {
        let params = StrategyParams::merged(
            &json!({"a": "1.5", "b": 2.5, "c": "7", "d": 7}),
            &JsonValue::Null,
            &JsonValue::Null,
        );
        assert_eq!(params.decimal("a", dec!(0)).unwrap(), dec!(1.5));
        assert_eq!(params.decimal("b", dec!(0)).unwrap(), dec!(2.5));
        assert_eq!(params.usize("c", 0).unwrap(), 7);
        assert_eq!(params.usize("d", 0).unwrap(), 7);
        assert_eq!(params.decimal("missing", dec!(9)).unwrap(), dec!(9));
    }

    #[test]
    fn malformed_values_are_parameter_errors() {
        let params =
            StrategyParams::merged(&json!({"a": [1, 2]}), &JsonValue::Null, &JsonValue::Null);
        assert!(params.decimal("a", dec!(0)).is_err());
        assert!(params.required_string("missing").is_err());
    }
}
