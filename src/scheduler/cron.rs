//! Five-field cron expressions (minute, hour, day-of-month, month, day-of-week).
//!
//! The `cron` crate expects a leading seconds field and numbers Sunday as 1,
//! so expressions are normalised before parsing: seconds are pinned to 0 and
//! numeric weekdays (0-7, both 0 and 7 meaning Sunday) are rewritten as names.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use super::PipelineError;

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A parsed five-field cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parse a standard five-field expression such as `*/15 * * * *`.
    ///
    /// Only syntax is checked; an expression that never fires (e.g. Feb 31)
    /// is accepted.
    pub fn parse(expr: &str) -> Result<Self, PipelineError> {
        let invalid = |reason: String| PipelineError::InvalidSchedule {
            expr: expr.to_string(),
            reason,
        };

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        }

        let day_of_week = translate_day_of_week(fields[4]).map_err(invalid)?;
        let six_field = format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], day_of_week
        );
        let schedule = Schedule::from_str(&six_field).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            expr: fields.join(" "),
            schedule,
        })
    }

    /// The normalised five-field source expression.
    pub fn as_str(&self) -> &str {
        &self.expr
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }

    /// All fire times in `(start, end]`.
    pub fn fires_between(&self, start: &DateTime<Utc>, end: &DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(start)
            .take_while(|t| t <= end)
            .collect()
    }
}

impl FromStr for CronSchedule {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

/// Rewrite numeric weekdays as names so `0`/`7` mean Sunday and `1-5` means
/// Monday to Friday, the way classic cron reads them.
fn translate_day_of_week(field: &str) -> Result<String, String> {
    let mut items = Vec::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };

        let base = match (base.split_once('-'), step) {
            (Some(("0", "7")), _) => "*".to_string(),
            // Stepped ranges through Sunday-as-7 become an explicit day list.
            (Some((from, "7")), Some(step)) => {
                items.push(stepped_days(from, step)?);
                continue;
            }
            // A range ending on Sunday-as-7 wraps past Saturday.
            (Some((from, "7")), None) if from != "7" => match day_name(from)?.as_str() {
                "SAT" => "SAT,SUN".to_string(),
                from => format!("{from}-SAT,SUN"),
            },
            (Some((from, to)), _) => format!("{}-{}", day_name(from)?, day_name(to)?),
            (None, _) => day_name(base)?,
        };

        match step {
            Some(step) => items.push(format!("{base}/{step}")),
            None => items.push(base),
        }
    }
    Ok(items.join(","))
}

/// `from-7/step` as a list of day names, e.g. `1-7/2` -> `MON,WED,FRI,SUN`.
fn stepped_days(from: &str, step: &str) -> Result<String, String> {
    let start: u8 = from
        .parse()
        .map_err(|_| format!("day-of-week range start '{from}' must be 0-7"))?;
    let step: usize = match step.parse() {
        Ok(n) if n > 0 => n,
        _ => return Err(format!("invalid day-of-week step '{step}'")),
    };
    if start > 7 {
        return Err(format!("day-of-week {start} is out of range 0-7"));
    }

    let mut days: Vec<&str> = Vec::new();
    for n in (start..=7).step_by(step) {
        let name = DAY_NAMES[usize::from(n % 7)];
        if !days.contains(&name) {
            days.push(name);
        }
    }
    Ok(days.join(","))
}

fn day_name(token: &str) -> Result<String, String> {
    match token.parse::<u8>() {
        Ok(n) if n <= 7 => Ok(DAY_NAMES[usize::from(n % 7)].to_string()),
        Ok(n) => Err(format!("day-of-week {n} is out of range 0-7")),
        // `*`, `?` and names pass through untouched.
        Err(_) => Ok(token.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_every_minute_fires_on_next_minute() {
        let schedule = CronSchedule::parse("*/1 * * * *").unwrap();
        let next = schedule.next_after(&at(2026, 3, 2, 10, 15)).unwrap();
        assert_eq!(next, at(2026, 3, 2, 10, 16));
    }

    #[test]
    fn test_sunday_as_zero_and_seven() {
        // 2026-03-02 is a Monday.
        let from = at(2026, 3, 2, 0, 0);
        for expr in ["0 4 * * 0", "0 4 * * 7"] {
            let next = CronSchedule::parse(expr).unwrap().next_after(&from).unwrap();
            assert_eq!(next.weekday(), Weekday::Sun, "{expr}");
            assert_eq!(next.hour(), 4);
        }
    }

    #[test]
    fn test_weekday_range() {
        // Saturday 2026-03-07 -> next weekday run is Monday.
        let schedule = CronSchedule::parse("30 9 * * 1-5").unwrap();
        let next = schedule.next_after(&at(2026, 3, 7, 12, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 9, 9, 30));
    }

    #[test]
    fn test_range_ending_in_seven_includes_sunday() {
        let schedule = CronSchedule::parse("0 0 * * 6-7").unwrap();
        let fires = schedule.fires_between(&at(2026, 3, 2, 0, 0), &at(2026, 3, 9, 0, 0));
        let days: Vec<Weekday> = fires.iter().map(|t| t.weekday()).collect();
        assert_eq!(days, vec![Weekday::Sat, Weekday::Sun]);
    }

    #[test]
    fn test_stepped_range_ending_in_seven() {
        // Sunday 2026-03-01 23:00 to Sunday 2026-03-08 23:00 covers one midnight per weekday.
        let (start, end) = (at(2026, 3, 1, 23, 0), at(2026, 3, 8, 23, 0));
        let cases = [
            ("0 0 * * 1-7/2", vec![Weekday::Mon, Weekday::Wed, Weekday::Fri, Weekday::Sun]),
            ("0 0 * * 3-7/2", vec![Weekday::Wed, Weekday::Fri, Weekday::Sun]),
            ("0 0 * * 1-7/3,6", vec![Weekday::Mon, Weekday::Thu, Weekday::Sat, Weekday::Sun]),
        ];
        for (expr, expected) in cases {
            let schedule = CronSchedule::parse(expr).unwrap();
            let days: Vec<Weekday> = schedule.fires_between(&start, &end).iter().map(|t| t.weekday()).collect();
            assert_eq!(days, expected, "{expr}");
        }
        assert_eq!(translate_day_of_week("1-7/2").unwrap(), "MON,WED,FRI,SUN");
        assert!(CronSchedule::parse("0 0 * * 1-7/0").is_err());
    }

    #[test]
    fn test_fires_between_is_bounded() {
        let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
        let fires = schedule.fires_between(&at(2026, 3, 2, 10, 0), &at(2026, 3, 2, 11, 0));
        assert_eq!(fires.len(), 4);
        assert_eq!(fires.last().copied(), Some(at(2026, 3, 2, 11, 0)));
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        for expr in ["", "* * * *", "0 * * * * *", "0 0 * * * * 2026"] {
            assert!(
                matches!(CronSchedule::parse(expr), Err(PipelineError::InvalidSchedule { .. })),
                "{expr:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_unparseable_fields() {
        for expr in ["61 * * * *", "* 25 * * *", "* * * * 9", "every minute please x"] {
            assert!(CronSchedule::parse(expr).is_err(), "{expr:?} should be rejected");
        }
    }

    #[test]
    fn test_display_normalises_whitespace() {
        let schedule: CronSchedule = "0   3 *  * *".parse().unwrap();
        assert_eq!(schedule.to_string(), "0 3 * * *");
    }
}
