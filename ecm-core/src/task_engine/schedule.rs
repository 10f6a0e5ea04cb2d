//! Cron/Schedule Calculator (Component L): given a `TaskSchedule` and
//! "now", compute the next UTC fire time.
//!
//! Grounded on the teacher's `scheduler/cron.rs` use of the `cron`
//! crate for the `cron` schedule type; the interval/daily/weekly/
//! biweekly/monthly calculators have no teacher precedent and are
//! written directly from `spec.md` §4.L.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::error::SchedulerError;
use crate::store::models::{ScheduleType, TaskSchedule};

/// Compute the next fire time in UTC for `schedule`, relative to `now`.
pub fn next_fire_at(schedule: &TaskSchedule, now: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
    match schedule.schedule_type {
        ScheduleType::Interval => next_interval(schedule, now),
        ScheduleType::Daily => next_daily(schedule, now),
        ScheduleType::Weekly => next_weekly(schedule, now),
        ScheduleType::Biweekly => next_biweekly(schedule, now),
        ScheduleType::Monthly => next_monthly(schedule, now),
        ScheduleType::Cron => next_cron(schedule, now),
    }
}

/// Validate a cron expression (presets + standard five-field), for
/// store-time validation per `spec.md` §4.L.
pub fn validate_cron(expression: &str) -> Result<(), SchedulerError> {
    to_cron_schedule(expression).map(|_| ())
}

/// Preview the next `n` fire times for a cron expression, for the
/// operator-facing "description + next-N preview" `spec.md` §4.L
/// requires.
pub fn preview_cron(expression: &str, now: DateTime<Utc>, n: usize) -> Result<Vec<DateTime<Utc>>, SchedulerError> {
    let parsed = to_cron_schedule(expression)?;
    Ok(parsed.after(&now).take(n).collect())
}

fn resolve_preset(expression: &str) -> &str {
    match expression.trim() {
        "@yearly" | "@annually" => "0 0 1 1 *",
        "@monthly" => "0 0 1 * *",
        "@weekly" => "0 0 * * 0",
        "@daily" | "@midnight" => "0 0 * * *",
        "@hourly" => "0 * * * *",
        other => other,
    }
}

/// Translate a five-field (`minute hour day month weekday`) expression
/// into the seconds-first, year-suffixed form the `cron` crate expects.
fn to_cron_schedule(expression: &str) -> Result<cron::Schedule, SchedulerError> {
    let five_field = resolve_preset(expression);
    let translated = format!("0 {five_field} *");
    cron::Schedule::from_str(&translated).map_err(|_| SchedulerError::InvalidCron {
        expression: expression.to_string(),
    })
}

fn parse_hhmm(value: &str) -> Result<(u32, u32), SchedulerError> {
    let (h, m) = value.split_once(':').ok_or_else(|| SchedulerError::InvalidCron { expression: value.into() })?;
    let hour: u32 = h.parse().map_err(|_| SchedulerError::InvalidCron { expression: value.into() })?;
    let minute: u32 = m.parse().map_err(|_| SchedulerError::InvalidCron { expression: value.into() })?;
    Ok((hour, minute))
}

fn parse_timezone(tz: &str) -> Result<Tz, SchedulerError> {
    Tz::from_str(tz).map_err(|_| SchedulerError::ConfigPath { path: tz.into() })
}

fn next_interval(schedule: &TaskSchedule, now: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
    let interval = schedule.interval_seconds.unwrap_or(60).max(1);
    let epoch = now.timestamp();
    let floored = (epoch / interval) * interval;
    Ok(DateTime::from_timestamp(floored + interval, 0).unwrap_or(now))
}

fn next_daily(schedule: &TaskSchedule, now: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
    let time = schedule.schedule_time.as_deref().unwrap_or("00:00");
    let (hour, minute) = parse_hhmm(time)?;
    let tz = parse_timezone(&schedule.timezone)?;
    let now_local = now.with_timezone(&tz);

    let mut candidate = local_at(&tz, now_local.year(), now_local.month(), now_local.day(), hour, minute)?;
    if candidate <= now_local {
        candidate = local_at(&tz, now_local.year(), now_local.month(), now_local.day(), hour, minute)? + Duration::days(1);
    }
    Ok(candidate.with_timezone(&Utc))
}

fn local_at(tz: &Tz, year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Result<DateTime<Tz>, SchedulerError> {
    tz.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .ok_or(SchedulerError::InvalidCron { expression: format!("{year}-{month}-{day} {hour}:{minute}") })
}

fn next_weekly(schedule: &TaskSchedule, now: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
    let days = schedule.days_of_week.as_ref().filter(|d| !d.is_empty()).ok_or(SchedulerError::EmptyDaysOfWeek)?;
    find_next_on_days(schedule, now, days, None)
}

fn next_biweekly(schedule: &TaskSchedule, now: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
    let days = schedule.days_of_week.as_ref().filter(|d| !d.is_empty()).ok_or(SchedulerError::EmptyDaysOfWeek)?;
    let tz = parse_timezone(&schedule.timezone)?;
    let anchor_monday = start_of_iso_week(schedule.created_at.with_timezone(&tz));
    find_next_on_days(schedule, now, days, Some(anchor_monday))
}

fn start_of_iso_week(date: DateTime<Tz>) -> DateTime<Tz> {
    let days_from_monday = date.weekday().num_days_from_monday();
    (date - Duration::days(days_from_monday as i64))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| date.timezone().from_local_datetime(&naive).single().unwrap_or(date))
        .unwrap_or(date)
}

fn find_next_on_days(
    schedule: &TaskSchedule,
    now: DateTime<Utc>,
    days: &[u8],
    biweekly_anchor: Option<DateTime<Tz>>,
) -> Result<DateTime<Utc>, SchedulerError> {
    let time = schedule.schedule_time.as_deref().unwrap_or("00:00");
    let (hour, minute) = parse_hhmm(time)?;
    let tz = parse_timezone(&schedule.timezone)?;
    let now_local = now.with_timezone(&tz);
    let horizon: i64 = if biweekly_anchor.is_some() { 15 } else { 8 };

    for offset in 0..horizon {
        let day = now_local.date_naive() + Duration::days(offset);
        let weekday_idx = day.weekday().num_days_from_sunday() as u8;
        if !days.contains(&weekday_idx) {
            continue;
        }
        if let Some(anchor) = biweekly_anchor {
            let this_monday = start_of_iso_week(tz.from_local_datetime(&day.and_hms_opt(0, 0, 0).unwrap()).single().unwrap());
            let weeks_since = (this_monday.date_naive() - anchor.date_naive()).num_days().div_euclid(7);
            if weeks_since.rem_euclid(2) != 0 {
                continue;
            }
        }
        let candidate = local_at(&tz, day.year(), day.month(), day.day(), hour, minute)?;
        if candidate > now_local {
            return Ok(candidate.with_timezone(&Utc));
        }
    }
    Err(SchedulerError::EmptyDaysOfWeek)
}

fn next_monthly(schedule: &TaskSchedule, now: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
    let time = schedule.schedule_time.as_deref().unwrap_or("00:00");
    let (hour, minute) = parse_hhmm(time)?;
    let day_of_month = schedule.day_of_month.unwrap_or(1);
    let tz = parse_timezone(&schedule.timezone)?;
    let now_local = now.with_timezone(&tz);

    let mut year = now_local.year();
    let mut month = now_local.month();
    for _ in 0..24 {
        if let Some(day) = resolve_day_of_month(year, month, day_of_month) {
            let candidate = local_at(&tz, year, month, day, hour, minute)?;
            if candidate > now_local {
                return Ok(candidate.with_timezone(&Utc));
            }
        }
        if month == 12 {
            month = 1;
            year += 1;
        } else {
            month += 1;
        }
    }
    Err(SchedulerError::InvalidCron { expression: format!("day_of_month={day_of_month}") })
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next_month_first = if month == 12 {
        chrono::NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        chrono::NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let this_month_first = chrono::NaiveDate::from_ymd_opt(year, month, 1).expect("valid month");
    next_month_first
        .map(|d| (d - this_month_first).num_days() as u32)
        .unwrap_or(31)
}

fn resolve_day_of_month(year: i32, month: u32, day_of_month: i32) -> Option<u32> {
    let last = days_in_month(year, month);
    if day_of_month == -1 {
        return Some(last);
    }
    if day_of_month < 1 || day_of_month as u32 > last {
        return None;
    }
    Some(day_of_month as u32)
}

fn next_cron(schedule: &TaskSchedule, now: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
    let expression = schedule.cron_expression.as_deref().ok_or(SchedulerError::InvalidCron { expression: String::new() })?;
    let parsed = to_cron_schedule(expression)?;
    parsed.after(&now).next().ok_or(SchedulerError::InvalidCron { expression: expression.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn base_schedule(schedule_type: ScheduleType) -> TaskSchedule {
        TaskSchedule {
            id: 1,
            task_id: "probe_streams".into(),
            name: None,
            enabled: true,
            schedule_type,
            interval_seconds: None,
            schedule_time: None,
            timezone: "UTC".into(),
            days_of_week: None,
            day_of_month: None,
            cron_expression: None,
            parameters: serde_json::Value::Null,
            created_at: Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_interval_floors_then_adds() {
        let mut schedule = base_schedule(ScheduleType::Interval);
        schedule.interval_seconds = Some(300);
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 7, 30).unwrap();
        let next = next_fire_at(&schedule, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 12, 10, 0).unwrap());
    }

    #[test]
    fn test_daily_next_occurrence_today() {
        let mut schedule = base_schedule(ScheduleType::Daily);
        schedule.schedule_time = Some("15:00".into());
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let next = next_fire_at(&schedule, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 15, 0, 0).unwrap());
    }

    #[test]
    fn test_daily_rolls_to_tomorrow_when_passed() {
        let mut schedule = base_schedule(ScheduleType::Daily);
        schedule.schedule_time = Some("08:00".into());
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let next = next_fire_at(&schedule, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 2, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_weekly_empty_days_is_error() {
        let schedule = base_schedule(ScheduleType::Weekly);
        let now = Utc::now();
        assert!(matches!(next_fire_at(&schedule, now), Err(SchedulerError::EmptyDaysOfWeek)));
    }

    #[test]
    fn test_weekly_picks_next_matching_day() {
        let mut schedule = base_schedule(ScheduleType::Weekly);
        schedule.schedule_time = Some("09:00".into());
        schedule.days_of_week = Some(vec![3]); // Wednesday
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(); // Thursday
        let next = next_fire_at(&schedule, now).unwrap();
        assert_eq!(next.weekday(), Weekday::Wed);
        assert!(next > now);
    }

    #[test]
    fn test_monthly_last_day() {
        let mut schedule = base_schedule(ScheduleType::Monthly);
        schedule.schedule_time = Some("00:00".into());
        schedule.day_of_month = Some(-1);
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let next = next_fire_at(&schedule, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_monthly_skips_invalid_day() {
        let mut schedule = base_schedule(ScheduleType::Monthly);
        schedule.schedule_time = Some("00:00".into());
        schedule.day_of_month = Some(31);
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let next = next_fire_at(&schedule, now).unwrap();
        assert_eq!(next.month(), 3);
        assert_eq!(next.day(), 31);
    }

    #[test]
    fn test_cron_preset_hourly() {
        let mut schedule = base_schedule(ScheduleType::Cron);
        schedule.cron_expression = Some("@hourly".into());
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 30, 0).unwrap();
        let next = next_fire_at(&schedule, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn test_cron_invalid_expression_rejected() {
        assert!(validate_cron("not a cron").is_err());
    }

    #[test]
    fn test_cron_preview_returns_n() {
        let times = preview_cron("0 * * * *", Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(), 3).unwrap();
        assert_eq!(times.len(), 3);
    }

    #[test]
    fn test_biweekly_skips_off_weeks() {
        let mut schedule = base_schedule(ScheduleType::Biweekly);
        schedule.schedule_time = Some("09:00".into());
        schedule.days_of_week = Some(vec![1]); // Monday
        schedule.created_at = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap(); // a Monday
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        let next = next_fire_at(&schedule, now).unwrap();
        // Jan 12 is the off week; Jan 19 is the next on-week Monday.
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 19, 9, 0, 0).unwrap());
    }
}
