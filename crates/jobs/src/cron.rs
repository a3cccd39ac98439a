use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::error::CronError;

/// One field of a five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CronField {
    Any,
    /// `*/n`
    Step(u32),
    /// `a-b`
    Range(u32, u32),
    /// `a,b,c`
    List(Vec<u32>),
    Value(u32),
}

impl CronField {
    fn parse(pattern: &str, min: u32, max: u32, expr: &str) -> Result<Self, CronError> {
        let invalid = |why: &str| CronError::Invalid(expr.to_string(), why.to_string());

        if pattern == "*" {
            return Ok(CronField::Any);
        }
        if let Some(step) = pattern.strip_prefix("*/") {
            let step: u32 = step.parse().map_err(|_| invalid("bad step value"))?;
            if step == 0 {
                return Err(invalid("step of zero"));
            }
            return Ok(CronField::Step(step));
        }
        if let Some((start, end)) = pattern.split_once('-') {
            let start: u32 = start.parse().map_err(|_| invalid("bad range start"))?;
            let end: u32 = end.parse().map_err(|_| invalid("bad range end"))?;
            if start > end || start < min || end > max {
                return Err(invalid("range out of bounds"));
            }
            return Ok(CronField::Range(start, end));
        }
        if pattern.contains(',') {
            let values = pattern
                .split(',')
                .map(|v| v.trim().parse::<u32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| invalid("bad list value"))?;
            if values.iter().any(|v| *v < min || *v > max) {
                return Err(invalid("list value out of bounds"));
            }
            return Ok(CronField::List(values));
        }
        let value: u32 = pattern.parse().map_err(|_| invalid("bad value"))?;
        if value < min || value > max {
            return Err(invalid("value out of bounds"));
        }
        Ok(CronField::Value(value))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Step(step) => value % step == 0,
            CronField::Range(start, end) => (*start..=*end).contains(&value),
            CronField::List(values) => values.contains(&value),
            CronField::Value(v) => *v == value,
        }
    }

    fn is_any(&self) -> bool {
        matches!(self, CronField::Any)
    }
}

/// A five-field cron expression: minute, hour, day-of-month, month,
/// day-of-week (Monday = 0).
///
/// Day-of-month and day-of-week combine the way real cron does: when both
/// are restricted, either matching is enough; when one is `*`, the other
/// decides alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CronError::Invalid(
                expression.to_string(),
                format!("expected 5 fields, got {}", parts.len()),
            ));
        }
        Ok(Self {
            minute: CronField::parse(parts[0], 0, 59, expression)?,
            hour: CronField::parse(parts[1], 0, 23, expression)?,
            day_of_month: CronField::parse(parts[2], 1, 31, expression)?,
            month: CronField::parse(parts[3], 1, 12, expression)?,
            day_of_week: CronField::parse(parts[4], 0, 6, expression)?,
        })
    }

    /// Whether the given instant (truncated to the minute) matches.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        if !self.minute.matches(at.minute())
            || !self.hour.matches(at.hour())
            || !self.month.matches(at.month())
        {
            return false;
        }

        let dom = self.day_of_month.matches(at.day());
        let dow = self.day_of_week.matches(at.weekday().num_days_from_monday());
        match (self.day_of_month.is_any(), self.day_of_week.is_any()) {
            // Both restricted: real cron treats them as alternatives.
            (false, false) => dom || dow,
            _ => dom && dow,
        }
    }

    /// The next matching minute after `from`, searched linearly with a
    /// one-year ceiling.
    pub fn next_run(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = from
            .with_second(0)?
            .with_nanosecond(0)?
            + Duration::minutes(1);
        // Minutes in a year.
        for _ in 0..525_600 {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(CronExpr::parse("* * * *").is_err());
        assert!(CronExpr::parse("61 * * * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("5-2 * * * *").is_err());
        assert!(CronExpr::parse("a * * * *").is_err());
    }

    #[test]
    fn every_five_minutes_hits_multiples_of_five() {
        let expr = CronExpr::parse("*/5 * * * *").unwrap();
        let base = at(2024, 3, 1, 10, 0);
        let mut runs = Vec::new();
        let mut cursor = base;
        for _ in 0..12 {
            cursor = expr.next_run(cursor).unwrap();
            runs.push(cursor.minute());
        }
        assert_eq!(runs, vec![5, 10, 15, 20, 25, 30, 35, 40, 45, 50, 55, 0]);
    }

    #[test]
    fn daily_at_half_past_two() {
        let expr = CronExpr::parse("30 2 * * *").unwrap();
        let next = expr.next_run(at(2024, 3, 1, 10, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 2, 2, 30));
    }

    #[test]
    fn ranges_and_lists() {
        let expr = CronExpr::parse("0 9-17 * * 0-4").unwrap();
        // 2024-03-01 is a Friday (weekday 4).
        assert!(expr.matches(at(2024, 3, 1, 9, 0)));
        assert!(!expr.matches(at(2024, 3, 2, 9, 0))); // Saturday
        assert!(!expr.matches(at(2024, 3, 1, 18, 0)));

        let expr = CronExpr::parse("0,30 12 * * *").unwrap();
        assert!(expr.matches(at(2024, 3, 1, 12, 0)));
        assert!(expr.matches(at(2024, 3, 1, 12, 30)));
        assert!(!expr.matches(at(2024, 3, 1, 12, 15)));
    }

    #[test]
    fn dom_and_dow_are_alternatives_when_both_restricted() {
        // The 15th, or any Monday.
        let expr = CronExpr::parse("0 0 15 * 0").unwrap();
        assert!(expr.matches(at(2024, 3, 15, 0, 0))); // a Friday, but the 15th
        assert!(expr.matches(at(2024, 3, 4, 0, 0))); // a Monday, not the 15th
        assert!(!expr.matches(at(2024, 3, 5, 0, 0))); // Tuesday the 5th

        // With dom = *, dow alone decides.
        let expr = CronExpr::parse("0 0 * * 0").unwrap();
        assert!(expr.matches(at(2024, 3, 4, 0, 0)));
        assert!(!expr.matches(at(2024, 3, 15, 0, 0)));
    }

    #[test]
    fn next_run_starts_strictly_after_from() {
        let expr = CronExpr::parse("0 * * * *").unwrap();
        let next = expr.next_run(at(2024, 3, 1, 10, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 1, 11, 0));
    }
}
