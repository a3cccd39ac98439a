use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use core_types::{RiskAlert, RiskLimit, RiskLimitKind, RiskMetrics, RiskSeverity};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Evaluates enabled risk limits against current metrics and produces
/// alerts.
///
/// Severity tiers: at or above 100% of the limit the alert is `BREACHED`; at
/// or above the limit's critical threshold it is `CRITICAL`; at or above the
/// warning threshold, `WARNING`. Repeat alerts for the same (limit, severity)
/// inside the debounce window are collapsed.
pub struct RiskMonitor {
    debounce_window: Duration,
    recent: Mutex<HashMap<(Uuid, RiskSeverity), DateTime<Utc>>>,
}

impl Default for RiskMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskMonitor {
    pub fn new() -> Self {
        Self::with_debounce(Duration::seconds(60))
    }

    pub fn with_debounce(debounce_window: Duration) -> Self {
        Self {
            debounce_window,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Checks every limit and returns the alerts to persist and fan out.
    /// Symbol-scoped limits only apply when `symbol` matches; global limits
    /// always apply.
    pub fn evaluate(
        &self,
        limits: &[RiskLimit],
        metrics: &RiskMetrics,
        symbol: Option<&str>,
    ) -> Vec<RiskAlert> {
        let now = Utc::now();
        let mut alerts = Vec::new();

        for limit in limits {
            if !limit.enabled {
                continue;
            }
            if let Some(scope) = limit.symbol.as_deref() {
                if symbol != Some(scope) {
                    continue;
                }
            }
            let Some(current_value) = current_value_for(limit.kind, metrics) else {
                continue;
            };
            if limit.limit_value <= Decimal::ZERO {
                continue;
            }

            let violation_percentage =
                (current_value / limit.limit_value * Decimal::from(100)).round_dp(2);
            let Some(severity) = severity_for(limit, violation_percentage) else {
                continue;
            };
            if self.is_debounced(limit.id, severity, now) {
                continue;
            }

            tracing::warn!(
                user_id = %limit.user_id,
                kind = limit.kind.as_str(),
                %violation_percentage,
                severity = ?severity,
                "Risk limit violation"
            );

            alerts.push(RiskAlert {
                id: Uuid::new_v4(),
                user_id: limit.user_id,
                risk_limit_id: limit.id,
                kind: limit.kind,
                message: alert_message(limit, current_value, violation_percentage),
                severity,
                symbol: limit.symbol.clone().or_else(|| symbol.map(str::to_string)),
                current_value,
                limit_value: limit.limit_value,
                violation_percentage,
                acknowledged: false,
                created_at: now,
                acknowledged_at: None,
            });
        }

        alerts
    }

    fn is_debounced(&self, limit_id: Uuid, severity: RiskSeverity, now: DateTime<Utc>) -> bool {
        let mut recent = self.recent.lock().expect("risk monitor lock poisoned");
        let key = (limit_id, severity);
        if let Some(last) = recent.get(&key) {
            if now - *last < self.debounce_window {
                return true;
            }
        }
        recent.insert(key, now);
        false
    }
}

fn current_value_for(kind: RiskLimitKind, metrics: &RiskMetrics) -> Option<Decimal> {
    match kind {
        RiskLimitKind::DailyLoss => {
            if metrics.daily_pnl < Decimal::ZERO {
                Some(metrics.daily_pnl.abs())
            } else {
                Some(Decimal::ZERO)
            }
        }
        RiskLimitKind::Drawdown => Some(metrics.drawdown_percentage),
        RiskLimitKind::Exposure => Some(metrics.exposure_percentage),
        RiskLimitKind::Leverage => Some(metrics.margin_ratio),
        RiskLimitKind::PositionSize => Some(metrics.equity_at_risk()),
    }
}

fn severity_for(limit: &RiskLimit, violation_percentage: Decimal) -> Option<RiskSeverity> {
    let hundred = Decimal::from(100);
    if violation_percentage >= hundred {
        Some(RiskSeverity::Breached)
    } else if violation_percentage >= limit.critical_threshold {
        Some(RiskSeverity::Critical)
    } else if violation_percentage >= limit.warning_threshold {
        Some(RiskSeverity::Warning)
    } else {
        None
    }
}

fn alert_message(limit: &RiskLimit, current_value: Decimal, violation: Decimal) -> String {
    let scope = limit
        .symbol
        .as_deref()
        .map(|s| format!(" for {}", s))
        .unwrap_or_default();
    let verb = if violation >= Decimal::from(100) {
        "exceeded"
    } else {
        "approached"
    };
    format!(
        "{} limit {}{}. Current: {}, Limit: {} ({}%)",
        limit.kind.as_str(),
        verb,
        scope,
        current_value,
        limit.limit_value,
        violation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn daily_loss_limit() -> RiskLimit {
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

    fn metrics(daily_pnl: Decimal) -> RiskMetrics {
        RiskMetrics {
            equity: dec!(10000),
            daily_pnl,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: daily_pnl,
            drawdown_percentage: Decimal::ZERO,
            margin_ratio: Decimal::ZERO,
            exposure_percentage: Decimal::ZERO,
        }
    }

    #[test]
    fn approaching_loss_escalates_to_critical() {
        let monitor = RiskMonitor::new();
        let alerts = monitor.evaluate(&[daily_loss_limit()], &metrics(dec!(-480)), None);
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.severity, RiskSeverity::Critical);
        assert_eq!(alert.current_value, dec!(480));
        assert_eq!(alert.limit_value, dec!(500));
        assert_eq!(alert.violation_percentage, dec!(96.00));
        assert!(alert.message.contains("approached"));
    }

    #[test]
    fn crossing_the_limit_is_breached() {
        let monitor = RiskMonitor::new();
        let alerts = monitor.evaluate(&[daily_loss_limit()], &metrics(dec!(-510)), None);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, RiskSeverity::Breached);
        assert_eq!(alerts[0].violation_percentage, dec!(102.00));
        assert!(alerts[0].message.contains("exceeded"));
    }

    #[test]
    fn below_warning_threshold_is_silent() {
        let monitor = RiskMonitor::new();
        let alerts = monitor.evaluate(&[daily_loss_limit()], &metrics(dec!(-100)), None);
        assert!(alerts.is_empty());

        // A profitable day never counts against a loss limit.
        let alerts = monitor.evaluate(&[daily_loss_limit()], &metrics(dec!(600)), None);
        assert!(alerts.is_empty());
    }

    #[test]
    fn duplicate_severity_is_debounced_but_escalation_passes() {
        let monitor = RiskMonitor::new();
        let limit = daily_loss_limit();

        let first = monitor.evaluate(std::slice::from_ref(&limit), &metrics(dec!(-480)), None);
        assert_eq!(first.len(), 1);
        let repeat = monitor.evaluate(std::slice::from_ref(&limit), &metrics(dec!(-481)), None);
        assert!(repeat.is_empty());

        // Escalation to a different severity is a new alert.
        let breached = monitor.evaluate(std::slice::from_ref(&limit), &metrics(dec!(-510)), None);
        assert_eq!(breached.len(), 1);
        assert_eq!(breached[0].severity, RiskSeverity::Breached);
    }

    #[test]
    fn symbol_scoped_limits_only_apply_to_their_symbol() {
        let mut limit = daily_loss_limit();
        limit.symbol = Some("BTCUSDT".to_string());
        let monitor = RiskMonitor::new();

        let none = monitor.evaluate(std::slice::from_ref(&limit), &metrics(dec!(-510)), Some("ETHUSDT"));
        assert!(none.is_empty());
        let hit = monitor.evaluate(std::slice::from_ref(&limit), &metrics(dec!(-510)), Some("BTCUSDT"));
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].symbol.as_deref(), Some("BTCUSDT"));
    }

    #[test]
    fn disabled_limits_are_ignored() {
        let mut limit = daily_loss_limit();
        limit.enabled = false;
        let monitor = RiskMonitor::new();
        assert!(
            monitor
                .evaluate(&[limit], &metrics(dec!(-510)), None)
                .is_empty()
        );
    }
}
