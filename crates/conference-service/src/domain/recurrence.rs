//! Next-occurrence calculation for recurring conferences.

use crate::models::{RecurrenceFrequency, RecurrenceRuleRow};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};

/// Compute the next occurrence of a recurrence rule strictly after `from`.
///
/// - daily: `from` + 1 day
/// - weekly with no weekday set: `from` + 7 days; otherwise the first date
///   after `from` whose weekday is in the set, scanning forward up to 7
///   days, with `from` + 7 days as the defensive fallback
/// - biweekly: the weekly search, padded by 7 more days whenever the
///   candidate lands less than 7 days out, guaranteeing at least one week
///   of spacing
/// - monthly with a day-of-month: that day in the following calendar month
///   at `from`'s time of day, clamped to the last day of short months
///   (day 31 in April yields April 30); without one: `from` + 1 calendar
///   month
///
/// Returns `None` when the candidate falls on or after the rule's `until`
/// bound, or when the rule's frequency is unrecognized. Exhaustion of
/// `occurrence_count` is the caller's responsibility, not this function's.
#[must_use]
pub fn next_occurrence(rule: &RecurrenceRuleRow, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let frequency = RecurrenceFrequency::parse(&rule.frequency)?;

    let candidate = match frequency {
        RecurrenceFrequency::Daily => from + Duration::days(1),
        RecurrenceFrequency::Weekly => next_weekday_match(from, &rule.days_of_week)
            .unwrap_or_else(|| from + Duration::days(7)),
        RecurrenceFrequency::Biweekly => {
            let candidate = next_weekday_match(from, &rule.days_of_week)
                .unwrap_or_else(|| from + Duration::days(7));
            if candidate - from < Duration::days(7) {
                candidate + Duration::days(7)
            } else {
                candidate
            }
        }
        RecurrenceFrequency::Monthly => next_month_occurrence(from, rule.day_of_month)?,
    };

    match rule.until {
        Some(until) if candidate >= until => None,
        _ => Some(candidate),
    }
}

/// First datetime strictly after `from` whose weekday (ISO, Monday = 0)
/// is in `days`, up to 7 days out. `None` for an empty set.
fn next_weekday_match(from: DateTime<Utc>, days: &[i16]) -> Option<DateTime<Utc>> {
    if days.is_empty() {
        return None;
    }

    (1..=7)
        .map(|offset| from + Duration::days(offset))
        .find(|candidate| {
            let weekday = i16::try_from(candidate.weekday().num_days_from_monday()).unwrap_or(-1);
            days.contains(&weekday)
        })
}

/// The occurrence in the calendar month after `from`'s.
fn next_month_occurrence(
    from: DateTime<Utc>,
    day_of_month: Option<i16>,
) -> Option<DateTime<Utc>> {
    let Some(day) = day_of_month else {
        return from.checked_add_months(Months::new(1));
    };

    let next_month = from.date_naive().checked_add_months(Months::new(1))?;
    let last = last_day_of_month(next_month.year(), next_month.month())?;
    let day = u32::try_from(day).ok()?.clamp(1, last);

    let date = NaiveDate::from_ymd_opt(next_month.year(), next_month.month(), day)?;
    Some(DateTime::from_naive_utc_and_offset(
        date.and_time(from.time()),
        Utc,
    ))
}

fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    Some(first_of_next.pred_opt()?.day())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn rule(
        frequency: &str,
        days_of_week: Vec<i16>,
        day_of_month: Option<i16>,
        until: Option<DateTime<Utc>>,
    ) -> RecurrenceRuleRow {
        RecurrenceRuleRow {
            rule_id: Uuid::nil(),
            conference_id: Uuid::nil(),
            frequency: frequency.to_string(),
            days_of_week,
            day_of_month,
            until,
            occurrence_count: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_adds_one_day() {
        let next = next_occurrence(&rule("daily", vec![], None, None), at(2024, 1, 2, 10)).unwrap();
        assert_eq!(next, at(2024, 1, 3, 10));
    }

    #[test]
    fn test_weekly_without_days_adds_seven() {
        let next =
            next_occurrence(&rule("weekly", vec![], None, None), at(2024, 1, 2, 10)).unwrap();
        assert_eq!(next, at(2024, 1, 9, 10));
    }

    #[test]
    fn test_weekly_finds_next_matching_weekday() {
        // 2024-01-02 is a Tuesday; Mon=0, Wed=2 -> following Wednesday.
        let next = next_occurrence(&rule("weekly", vec![0, 2], None, None), at(2024, 1, 2, 10))
            .unwrap();
        assert_eq!(next, at(2024, 1, 3, 10));
    }

    #[test]
    fn test_weekly_wraps_past_weekend() {
        // 2024-01-03 is a Wednesday; Mon=0, Wed=2 -> next Monday, five days out.
        let next = next_occurrence(&rule("weekly", vec![0, 2], None, None), at(2024, 1, 3, 10))
            .unwrap();
        assert_eq!(next, at(2024, 1, 8, 10));
    }

    #[test]
    fn test_weekly_same_weekday_is_strictly_after() {
        // From a Monday with only Monday in the set: a full week out, never today.
        let next =
            next_occurrence(&rule("weekly", vec![0], None, None), at(2024, 1, 1, 9)).unwrap();
        assert_eq!(next, at(2024, 1, 8, 9));
    }

    #[test]
    fn test_biweekly_pads_to_seven_days() {
        // Candidate is tomorrow (Wednesday): under a week out, so pushed one
        // more week to keep biweekly distinguishable from weekly.
        let next = next_occurrence(&rule("biweekly", vec![2], None, None), at(2024, 1, 2, 10))
            .unwrap();
        assert_eq!(next, at(2024, 1, 10, 10));
    }

    #[test]
    fn test_biweekly_keeps_full_week_candidate() {
        // From a Tuesday with only Tuesday in the set: candidate is exactly
        // seven days out and is kept as-is.
        let next = next_occurrence(&rule("biweekly", vec![1], None, None), at(2024, 1, 2, 10))
            .unwrap();
        assert_eq!(next, at(2024, 1, 9, 10));
    }

    #[test]
    fn test_monthly_with_day_of_month() {
        let next = next_occurrence(&rule("monthly", vec![], Some(15), None), at(2024, 1, 15, 14))
            .unwrap();
        assert_eq!(next, at(2024, 2, 15, 14));
    }

    #[test]
    fn test_monthly_clamps_short_months() {
        // Day 31 from late January of a non-leap year clamps to Feb 28.
        let next = next_occurrence(&rule("monthly", vec![], Some(31), None), at(2023, 1, 31, 9))
            .unwrap();
        assert_eq!(next, at(2023, 2, 28, 9));
    }

    #[test]
    fn test_monthly_clamps_to_leap_day() {
        let next = next_occurrence(&rule("monthly", vec![], Some(31), None), at(2024, 1, 31, 9))
            .unwrap();
        assert_eq!(next, at(2024, 2, 29, 9));
    }

    #[test]
    fn test_monthly_without_day_adds_calendar_month() {
        let next = next_occurrence(&rule("monthly", vec![], None, None), at(2024, 3, 10, 8))
            .unwrap();
        assert_eq!(next, at(2024, 4, 10, 8));
    }

    #[test]
    fn test_monthly_preserves_time_of_day() {
        let from = Utc.with_ymd_and_hms(2024, 5, 15, 16, 30, 45).unwrap();
        let next = next_occurrence(&rule("monthly", vec![], Some(15), None), from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 15, 16, 30, 45).unwrap());
    }

    #[test]
    fn test_until_bound_is_exclusive() {
        let until = at(2024, 1, 3, 10);

        // Candidate lands exactly on `until` -> discarded.
        let none = next_occurrence(&rule("daily", vec![], None, Some(until)), at(2024, 1, 2, 10));
        assert!(none.is_none());

        // Candidate strictly before `until` -> kept.
        let some = next_occurrence(&rule("daily", vec![], None, Some(until)), at(2024, 1, 2, 9));
        assert_eq!(some, Some(at(2024, 1, 3, 9)));
    }

    #[test]
    fn test_unknown_frequency_yields_none() {
        assert!(next_occurrence(&rule("hourly", vec![], None, None), at(2024, 1, 2, 10)).is_none());
    }
}
