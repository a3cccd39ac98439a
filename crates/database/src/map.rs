//! Enum <-> text column mapping.
//!
//! Status-like columns are stored as their wire spelling (the same one serde
//! uses), so the round trip goes through the existing serde impls instead of
//! a second hand-written vocabulary.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::DbError;

pub(crate) fn enum_to_str<T: Serialize>(value: &T) -> Result<String, DbError> {
    match serde_json::to_value(value)? {
        JsonValue::String(s) => Ok(s),
        other => Err(DbError::Decode(format!(
            "expected string-encoded enum, got {}",
            other
        ))),
    }
}

pub(crate) fn enum_from_str<T: DeserializeOwned>(field: &str, value: &str) -> Result<T, DbError> {
    serde_json::from_value(JsonValue::String(value.to_string()))
        .map_err(|e| DbError::Decode(format!("{}: {}", field, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{BotStatus, OrderStatus, OrderType, RiskSeverity};

    #[test]
    fn round_trips_wire_spellings() {
        assert_eq!(enum_to_str(&OrderStatus::PartiallyFilled).unwrap(), "PARTIALLY_FILLED");
        assert_eq!(enum_to_str(&OrderType::StopMarket).unwrap(), "STOP_MARKET");
        assert_eq!(enum_to_str(&BotStatus::Running).unwrap(), "RUNNING");

        let status: OrderStatus = enum_from_str("status", "PARTIALLY_FILLED").unwrap();
        assert_eq!(status, OrderStatus::PartiallyFilled);
        let severity: RiskSeverity = enum_from_str("severity", "BREACHED").unwrap();
        assert_eq!(severity, RiskSeverity::Breached);
    }

    #[test]
    fn unknown_spelling_is_a_decode_error() {
        let result: Result<OrderStatus, _> = enum_from_str("status", "HALF_DONE");
        assert!(matches!(result, Err(DbError::Decode(_))));
    }
}
