//! Working-hours evaluation for agent schedules.
//!
//! A missing or disabled schedule means "always open": a misconfigured tenant
//! must never silently block every conversation.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub enabled: bool,
    /// Local wall-clock time, `HH:MM`.
    pub start: String,
    /// Local wall-clock time, `HH:MM`. The end minute itself is closed.
    pub end: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    pub enabled: bool,
    /// IANA timezone name, e.g. `Europe/Paris`.
    pub timezone: String,
    /// Keyed by lowercase weekday name (`monday` .. `sunday`). Absent days
    /// are closed.
    pub days: BTreeMap<String, DayHours>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoursVerdict {
    pub is_open: bool,
    pub next_open: Option<DateTime<Utc>>,
    pub next_open_description: Option<String>,
}

impl HoursVerdict {
    fn open() -> Self {
        Self { is_open: true, next_open: None, next_open_description: None }
    }
}

pub fn weekday_key(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

fn weekday_label(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Answers "is now within hours?" and, when closed, when the next open slot
/// starts. The `[start, end)` interval is half-open: the end minute is
/// already closed.
pub fn is_open(schedule: Option<&WeeklySchedule>, now: DateTime<Utc>) -> HoursVerdict {
    let Some(schedule) = schedule else {
        return HoursVerdict::open();
    };
    if !schedule.enabled {
        return HoursVerdict::open();
    }
    let Ok(timezone) = schedule.timezone.parse::<Tz>() else {
        // Unparseable timezone is treated like a missing schedule.
        return HoursVerdict::open();
    };

    let local = now.with_timezone(&timezone);
    if let Some((start, end)) = day_window(schedule, local.weekday()) {
        let time = local.time();
        if time >= start && time < end {
            return HoursVerdict::open();
        }
    }

    next_open_slot(schedule, &timezone, now)
}

fn day_window(schedule: &WeeklySchedule, weekday: Weekday) -> Option<(NaiveTime, NaiveTime)> {
    let day = schedule.days.get(weekday_key(weekday))?;
    if !day.enabled {
        return None;
    }
    let start = parse_clock(&day.start)?;
    let end = parse_clock(&day.end)?;
    (start < end).then_some((start, end))
}

fn parse_clock(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

fn next_open_slot(schedule: &WeeklySchedule, timezone: &Tz, now: DateTime<Utc>) -> HoursVerdict {
    let local = now.with_timezone(timezone);

    for day_offset in 0..=7 {
        let date = local.date_naive() + Duration::days(day_offset);
        let Some((start, _end)) = day_window(schedule, date.weekday()) else {
            continue;
        };
        // Today only counts if the window has not started yet.
        if day_offset == 0 && local.time() >= start {
            continue;
        }

        let Some(opens_at) = timezone.from_local_datetime(&date.and_time(start)).earliest() else {
            continue;
        };
        let label = if day_offset == 0 {
            format!("today at {}", start.format("%H:%M"))
        } else {
            format!("{} at {}", weekday_label(date.weekday()), start.format("%H:%M"))
        };
        return HoursVerdict {
            is_open: false,
            next_open: Some(opens_at.with_timezone(&Utc)),
            next_open_description: Some(label),
        };
    }

    // Every configured day is closed; report closed with nothing upcoming.
    HoursVerdict { is_open: false, next_open: None, next_open_description: None }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, Timelike, Utc};

    use super::{is_open, DayHours, WeeklySchedule};

    fn business_week(timezone: &str) -> WeeklySchedule {
        let mut days = BTreeMap::new();
        for day in ["monday", "tuesday", "wednesday", "thursday", "friday"] {
            days.insert(
                day.to_string(),
                DayHours { enabled: true, start: "08:00".to_string(), end: "18:00".to_string() },
            );
        }
        WeeklySchedule { enabled: true, timezone: timezone.to_string(), days }
    }

    fn at(raw: &str) -> DateTime<Utc> {
        raw.parse().expect("test timestamp should parse")
    }

    #[test]
    fn missing_schedule_is_always_open() {
        assert!(is_open(None, Utc::now()).is_open);
    }

    #[test]
    fn disabled_schedule_is_always_open() {
        let mut schedule = business_week("UTC");
        schedule.enabled = false;
        // 03:00 Sunday would be closed for any enabled schedule.
        assert!(is_open(Some(&schedule), at("2024-06-02T03:00:00Z")).is_open);
    }

    #[test]
    fn start_minute_is_open_end_minute_is_closed() {
        let schedule = business_week("UTC");
        // Monday 2024-06-03.
        assert!(is_open(Some(&schedule), at("2024-06-03T08:00:00Z")).is_open);
        assert!(!is_open(Some(&schedule), at("2024-06-03T18:00:00Z")).is_open);
        assert!(is_open(Some(&schedule), at("2024-06-03T17:59:59Z")).is_open);
    }

    #[test]
    fn late_evening_points_at_next_morning() {
        let schedule = business_week("UTC");
        // Monday 22:00 -> Tuesday 08:00.
        let verdict = is_open(Some(&schedule), at("2024-06-03T22:00:00Z"));
        assert!(!verdict.is_open);
        let next_open = verdict.next_open.expect("closed verdict should carry next open");
        assert_eq!(next_open, at("2024-06-04T08:00:00Z"));
        let description = verdict.next_open_description.expect("description");
        assert!(description.contains("Tuesday"));
        assert!(description.contains("08:00"));
    }

    #[test]
    fn early_morning_points_at_today() {
        let schedule = business_week("UTC");
        let verdict = is_open(Some(&schedule), at("2024-06-03T06:30:00Z"));
        assert!(!verdict.is_open);
        assert_eq!(verdict.next_open, Some(at("2024-06-03T08:00:00Z")));
        assert!(verdict.next_open_description.expect("description").starts_with("today"));
    }

    #[test]
    fn weekend_rolls_over_to_monday() {
        let schedule = business_week("UTC");
        // Saturday 2024-06-01.
        let verdict = is_open(Some(&schedule), at("2024-06-01T11:00:00Z"));
        assert!(!verdict.is_open);
        assert_eq!(verdict.next_open, Some(at("2024-06-03T08:00:00Z")));
        assert!(verdict.next_open_description.expect("description").contains("Monday"));
    }

    #[test]
    fn schedule_times_are_local_to_the_configured_timezone() {
        let schedule = business_week("Europe/Paris");
        // 07:00 UTC in June is 09:00 in Paris: open.
        assert!(is_open(Some(&schedule), at("2024-06-03T07:00:00Z")).is_open);
        // 17:00 UTC is 19:00 in Paris: closed.
        let verdict = is_open(Some(&schedule), at("2024-06-03T17:00:00Z"));
        assert!(!verdict.is_open);
        // Next open is 08:00 Paris = 06:00 UTC.
        assert_eq!(verdict.next_open.expect("next open").hour(), 6);
    }

    #[test]
    fn unknown_timezone_fails_open() {
        let schedule = business_week("Mars/Olympus_Mons");
        assert!(is_open(Some(&schedule), at("2024-06-02T03:00:00Z")).is_open);
    }

    #[test]
    fn fully_closed_week_reports_no_upcoming_slot() {
        let mut schedule = business_week("UTC");
        for day in schedule.days.values_mut() {
            day.enabled = false;
        }
        let verdict = is_open(Some(&schedule), at("2024-06-03T10:00:00Z"));
        assert!(!verdict.is_open);
        assert!(verdict.next_open.is_none());
        assert!(verdict.next_open_description.is_none());
    }
}
