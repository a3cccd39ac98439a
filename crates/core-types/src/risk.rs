use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::{RiskLimitKind, RiskSeverity};
use crate::error::CoreError;

/// A configured risk limit. `symbol = None` makes the limit global;
/// symbol-scoped limits coexist with globals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: RiskLimitKind,
    pub limit_value: Decimal,
    pub symbol: Option<String>,
    /// Percentage of the limit at which a warning alert fires.
    pub warning_threshold: Decimal,
    /// Percentage of the limit at which the alert escalates to critical.
    pub critical_threshold: Decimal,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RiskLimit {
    pub const DEFAULT_WARNING_THRESHOLD: Decimal = Decimal::from_parts(80, 0, 0, false, 0);
    pub const DEFAULT_CRITICAL_THRESHOLD: Decimal = Decimal::from_parts(95, 0, 0, false, 0);

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.limit_value <= Decimal::ZERO {
            return Err(CoreError::InvalidInput(
                "limit_value".to_string(),
                "must be positive".to_string(),
            ));
        }
        let hundred = Decimal::from(100);
        if self.warning_threshold <= Decimal::ZERO || self.warning_threshold > hundred {
            return Err(CoreError::InvalidInput(
                "warning_threshold".to_string(),
                "must be between 0 and 100".to_string(),
            ));
        }
        if self.critical_threshold <= Decimal::ZERO || self.critical_threshold > hundred {
            return Err(CoreError::InvalidInput(
                "critical_threshold".to_string(),
                "must be between 0 and 100".to_string(),
            ));
        }
        if self.warning_threshold >= self.critical_threshold {
            return Err(CoreError::InvalidInput(
                "warning_threshold".to_string(),
                "must be less than critical_threshold".to_string(),
            ));
        }
        Ok(())
    }
}

/// Snapshot of a user's risk posture handed to the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub equity: Decimal,
    pub daily_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub drawdown_percentage: Decimal,
    pub margin_ratio: Decimal,
    pub exposure_percentage: Decimal,
}

impl RiskMetrics {
    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }

    /// Equity currently at risk: the losing side of unrealized P&L.
    pub fn equity_at_risk(&self) -> Decimal {
        if self.unrealized_pnl < Decimal::ZERO {
            self.unrealized_pnl.abs()
        } else {
            Decimal::ZERO
        }
    }
}

/// How far a current value sits against its limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitViolation {
    pub kind: RiskLimitKind,
    pub current_value: Decimal,
    pub limit_value: Decimal,
    pub violation_percentage: Decimal,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub id: Uuid,
    pub user_id: Uuid,
    pub risk_limit_id: Uuid,
    pub kind: RiskLimitKind,
    pub message: String,
    pub severity: RiskSeverity,
    pub symbol: Option<String>,
    pub current_value: Decimal,
    pub limit_value: Decimal,
    pub violation_percentage: Decimal,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl RiskAlert {
    pub fn acknowledge(&mut self) {
        self.acknowledged = true;
        self.acknowledged_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limit() -> RiskLimit {
        RiskLimit {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind: RiskLimitKind::DailyLoss,
            limit_value: dec!(500),
            symbol: None,
            warning_threshold: dec!(80),
            critical_threshold: dec!(95),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn thresholds_must_be_ordered() {
        let mut l = limit();
        assert!(l.validate().is_ok());
        l.warning_threshold = dec!(95);
        assert!(l.validate().is_err());
        l.warning_threshold = dec!(80);
        l.limit_value = Decimal::ZERO;
        assert!(l.validate().is_err());
    }

    #[test]
    fn equity_at_risk_only_counts_losses() {
        let metrics = RiskMetrics {
            equity: dec!(10000),
            daily_pnl: dec!(-100),
            unrealized_pnl: dec!(-250),
            realized_pnl: dec!(150),
            drawdown_percentage: dec!(5),
            margin_ratio: dec!(20),
            exposure_percentage: dec!(40),
        };
        assert_eq!(metrics.equity_at_risk(), dec!(250));
        assert_eq!(metrics.total_pnl(), dec!(-100));
    }
}
