//! Standard 5-field cron evaluation in a fixed IANA zone.
//!
//! Only `minute hour dom month dow` expressions are accepted, with the
//! standard day-of-week numbering (0 or 7 = Sunday, 1 = Monday). Six-field
//! (seconds) and Quartz-style (`?`) expressions are rejected at validation
//! time, before any durable state changes.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::SchedulerError;

/// Zone cron expressions are evaluated in unless configured otherwise.
pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";

/// Validates cron expressions and computes fire times.
#[derive(Debug, Clone)]
pub struct CronEngine {
    tz: Tz,
}

impl Default for CronEngine {
    fn default() -> Self {
        Self {
            tz: chrono_tz::Asia::Shanghai,
        }
    }
}

impl CronEngine {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Build an engine for a named IANA zone.
    pub fn with_zone_name(name: &str) -> Result<Self, SchedulerError> {
        let tz = Tz::from_str(name).map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))?;
        Ok(Self { tz })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Validate a 5-field expression. Total: every invalid expression is
    /// rejected here, never at fire time.
    pub fn validate(&self, expr: &str) -> Result<(), SchedulerError> {
        self.parse(expr).map(|_| ())
    }

    /// First firing strictly after `from`, evaluated in the engine's zone.
    pub fn next_after(&self, expr: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
        let schedule = self.parse(expr)?;
        let local = from.with_timezone(&self.tz);

        schedule
            .after(&local)
            .next()
            .map(|fire| fire.with_timezone(&Utc))
            .ok_or_else(|| {
                SchedulerError::InvalidCron(format!("'{}' has no future firing", expr))
            })
    }

    /// The next `count` firings after `from`, for previews.
    pub fn upcoming(
        &self,
        expr: &str,
        from: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>, SchedulerError> {
        let schedule = self.parse(expr)?;
        let local = from.with_timezone(&self.tz);

        Ok(schedule
            .after(&local)
            .take(count.clamp(1, 10))
            .map(|fire| fire.with_timezone(&Utc))
            .collect())
    }

    /// Human description for the common patterns, used by list views.
    pub fn describe(expr: &str) -> &'static str {
        match expr {
            "* * * * *" => "every minute",
            "*/5 * * * *" => "every 5 minutes",
            "*/10 * * * *" => "every 10 minutes",
            "*/30 * * * *" => "every 30 minutes",
            "0 * * * *" => "hourly",
            "0 */2 * * *" => "every 2 hours",
            "0 */6 * * *" => "every 6 hours",
            "0 */12 * * *" => "every 12 hours",
            "0 0 * * *" => "daily at midnight",
            "0 0 * * 0" => "weekly on Sunday",
            "0 0 1 * *" => "monthly on the 1st",
            _ => "custom schedule",
        }
    }

    fn parse(&self, expr: &str) -> Result<::cron::Schedule, SchedulerError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(SchedulerError::InvalidCron("expression is empty".to_string()));
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::InvalidCron(format!(
                "expected 5 fields (minute hour dom month dow), got {}: {}",
                fields.len(),
                trimmed
            )));
        }

        if fields.iter().any(|f| f.contains('?')) {
            return Err(SchedulerError::InvalidCron(format!(
                "Quartz-style '?' is not supported: {}",
                trimmed
            )));
        }

        // The parser wants a seconds field, and numbers day-of-week 1-7
        // with Sunday first; standard input numbers Sunday as 0 or 7 and
        // Monday as 1. Rewrite day values to names, which both conventions
        // agree on.
        let normalized = format!(
            "0 {} {} {} {} {}",
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            remap_dow_field(fields[4])
        );
        ::cron::Schedule::from_str(&normalized)
            .map_err(|e| SchedulerError::InvalidCron(format!("{}: {}", trimmed, e)))
    }
}

const DOW_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Rewrite a standard day-of-week field to day names.
fn remap_dow_field(field: &str) -> String {
    field
        .split(',')
        .map(|item| match item.split_once('/') {
            // The step count after '/' is not a day value.
            Some((range, step)) => format!("{}/{}", remap_dow_range(range), step),
            None => remap_dow_range(item),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn remap_dow_range(range: &str) -> String {
    match range.split_once('-') {
        Some((start, end)) => format!("{}-{}", remap_dow_value(start), remap_dow_value(end)),
        None => remap_dow_value(range),
    }
}

fn remap_dow_value(value: &str) -> String {
    match value.parse::<u32>() {
        // 0 and 7 are both Sunday; out-of-range numbers pass through for
        // the parser to reject.
        Ok(n) if n <= 7 => DOW_NAMES[(n % 7) as usize].to_string(),
        _ => value.to_string(),
    }
}

/// Preset expressions offered by task-authoring UIs.
pub fn preset_expressions() -> Vec<(&'static str, &'static str)> {
    vec![
        ("every_5_minutes", "*/5 * * * *"),
        ("every_10_minutes", "*/10 * * * *"),
        ("every_30_minutes", "*/30 * * * *"),
        ("hourly", "0 * * * *"),
        ("every_2_hours", "0 */2 * * *"),
        ("every_6_hours", "0 */6 * * *"),
        ("every_12_hours", "0 */12 * * *"),
        ("daily", "0 0 * * *"),
        ("weekly", "0 0 * * 0"),
        ("monthly", "0 0 1 * *"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    fn engine() -> CronEngine {
        CronEngine::default()
    }

    #[test]
    fn test_validate_accepts_standard_expressions() {
        let engine = engine();
        for (_, expr) in preset_expressions() {
            assert!(engine.validate(expr).is_ok(), "{} should validate", expr);
        }
        assert!(engine.validate("* * * * *").is_ok());
        assert!(engine.validate("15 3 * * 1-5").is_ok());
    }

    #[test]
    fn test_validate_rejects_six_fields() {
        let err = engine().validate("0 * * * * *").unwrap_err();
        assert!(err.to_string().contains("got 6"));
    }

    #[test]
    fn test_validate_rejects_quartz_question_mark() {
        let err = engine().validate("0 12 ? * 3").unwrap_err();
        assert!(err.to_string().contains("'?'"));
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(engine().validate("").is_err());
        assert!(engine().validate("   ").is_err());
    }

    #[test]
    fn test_validate_rejects_garbage() {
        assert!(engine().validate("not a cron").is_err());
        assert!(engine().validate("61 * * * *").is_err());
    }

    #[test]
    fn test_next_after_every_minute() {
        let from = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 15).unwrap();
        let next = engine().next_after("* * * * *", from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 1, 10, 31, 0).unwrap());
    }

    #[test]
    fn test_next_after_is_strictly_after() {
        // Exactly on a boundary: the same instant must not fire again.
        let from = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap();
        let next = engine().next_after("* * * * *", from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 1, 10, 31, 0).unwrap());
    }

    #[test]
    fn test_next_after_evaluates_in_fixed_zone() {
        // Daily midnight in Asia/Shanghai (UTC+8) is 16:00 UTC the day before.
        let from = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let next = engine().next_after("0 0 * * *", from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 1, 16, 0, 0).unwrap());
    }

    #[test]
    fn test_next_after_monday_lands_on_monday() {
        // 2024-06-05 is a Wednesday in both UTC and Asia/Shanghai.
        let from = Utc.with_ymd_and_hms(2024, 6, 5, 0, 0, 0).unwrap();
        let next = engine().next_after("0 0 * * 1", from).unwrap();

        // Midnight Monday in Shanghai is 16:00 UTC the Sunday before.
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 9, 16, 0, 0).unwrap());
        let local = next.with_timezone(&engine().timezone());
        assert_eq!(local.weekday(), Weekday::Mon);
        assert_eq!(local.hour(), 0);
    }

    #[test]
    fn test_next_after_sunday_preset_lands_on_sunday() {
        let from = Utc.with_ymd_and_hms(2024, 6, 5, 0, 0, 0).unwrap();
        let next = engine().next_after("0 0 * * 0", from).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 8, 16, 0, 0).unwrap());
        let local = next.with_timezone(&engine().timezone());
        assert_eq!(local.weekday(), Weekday::Sun);
    }

    #[test]
    fn test_weekday_range_excludes_weekend() {
        // Friday 13:00 in Shanghai; the next 1-5 firing must skip the
        // weekend and land on Monday, not Sunday.
        let from = Utc.with_ymd_and_hms(2024, 6, 7, 5, 0, 0).unwrap();
        let next = engine().next_after("15 3 * * 1-5", from).unwrap();

        let local = next.with_timezone(&engine().timezone());
        assert_eq!(local.weekday(), Weekday::Mon);
        assert_eq!((local.hour(), local.minute()), (3, 15));
    }

    #[test]
    fn test_validate_accepts_sunday_spellings() {
        let engine = engine();
        assert!(engine.validate("0 0 * * 0").is_ok());
        assert!(engine.validate("0 0 * * 7").is_ok());
        assert!(engine.validate("0 0 * * SUN").is_ok());
        assert!(engine.validate("0 9 * * MON-FRI").is_ok());
        assert!(engine.validate("0 12 * * 0,3").is_ok());
    }

    #[test]
    fn test_dow_remapping() {
        assert_eq!(remap_dow_field("0"), "SUN");
        assert_eq!(remap_dow_field("7"), "SUN");
        assert_eq!(remap_dow_field("1-5"), "MON-FRI");
        assert_eq!(remap_dow_field("*/2"), "*/2");
        assert_eq!(remap_dow_field("1-5/2"), "MON-FRI/2");
        assert_eq!(remap_dow_field("0,3,6"), "SUN,WED,SAT");
        assert_eq!(remap_dow_field("MON"), "MON");
        assert_eq!(remap_dow_field("*"), "*");
    }

    #[test]
    fn test_next_after_invalid_expression() {
        let from = Utc::now();
        assert!(engine().next_after("bogus", from).is_err());
    }

    #[test]
    fn test_upcoming_count() {
        let from = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let fires = engine().upcoming("*/10 * * * *", from, 3).unwrap();
        assert_eq!(fires.len(), 3);
        assert_eq!(fires[0], Utc.with_ymd_and_hms(2024, 6, 1, 10, 10, 0).unwrap());
        assert_eq!(fires[1], Utc.with_ymd_and_hms(2024, 6, 1, 10, 20, 0).unwrap());
        assert_eq!(fires[2], Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap());
    }

    #[test]
    fn test_upcoming_clamps_count() {
        let from = Utc::now();
        let fires = engine().upcoming("* * * * *", from, 100).unwrap();
        assert_eq!(fires.len(), 10);
    }

    #[test]
    fn test_with_zone_name() {
        let engine = CronEngine::with_zone_name("Europe/Berlin").unwrap();
        assert_eq!(engine.timezone(), chrono_tz::Europe::Berlin);

        assert!(CronEngine::with_zone_name("Not/AZone").is_err());
    }

    #[test]
    fn test_describe() {
        assert_eq!(CronEngine::describe("0 * * * *"), "hourly");
        assert_eq!(CronEngine::describe("7 3 * * 2"), "custom schedule");
    }
}
