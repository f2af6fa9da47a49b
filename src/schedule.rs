use chrono::{Datelike, Days, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use ts_rs::TS;

use crate::cms::Event;
use crate::service_times::{
    DEFAULT_EVENT_HOUR, DEFAULT_HORIZON_MONTHS, Recurrence, ServiceRule, parse_time_of_day,
};

/// A concrete resolved instance of a recurring rule or a one-off event.
/// Never persisted; recomputed from the wall clock on every call.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    pub title: String,
    pub starts_at: NaiveDateTime,
    pub time: Option<String>,
    pub description: Option<String>,
    pub source: OccurrenceSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "kebab-case")]
pub enum OccurrenceSource {
    Recurring,
    OneOff,
}

fn at_time(date: NaiveDate, hour: u32, minute: u32) -> NaiveDateTime {
    date.and_hms_opt(hour, minute, 0)
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN))
}

/// Next calendar date (today or later) matching `weekday`, at the given time;
/// rolls a full week forward when today's slot has already passed.
fn next_weekly(weekday: u8, hour: u32, minute: u32, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date();
    let ahead =
        (i64::from(weekday) - i64::from(today.weekday().num_days_from_sunday())).rem_euclid(7);
    let candidate = at_time(today + Duration::days(ahead), hour, minute);
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(7)
    }
}

/// First occurrence of `weekday` within the month containing `month_start`
/// (day 1 plus a 0-6 day offset). "Third" is exactly 14 days later.
fn first_weekday_in_month(month_start: NaiveDate, weekday: u8) -> Option<NaiveDate> {
    let offset = (i64::from(weekday) - i64::from(month_start.weekday().num_days_from_sunday()))
        .rem_euclid(7);
    month_start.checked_add_days(Days::new(offset as u64))
}

fn next_monthly(
    rule: &ServiceRule,
    now: NaiveDateTime,
    horizon_months: u32,
) -> Option<NaiveDateTime> {
    let (hour, minute) = rule.time_of_day();
    let current_month = NaiveDate::from_ymd_opt(now.date().year(), now.date().month(), 1)?;

    // Month-by-month forward search. December to January rolls the year via
    // calendar month arithmetic; exceeding the cap yields no result rather
    // than an arbitrary date.
    for ahead in 0..=horizon_months {
        let month_start = current_month.checked_add_months(Months::new(ahead))?;
        let mut date = first_weekday_in_month(month_start, rule.weekday)?;
        if rule.recurrence == Recurrence::MonthlyThird {
            date = date.checked_add_days(Days::new(14))?;
        }
        let candidate = at_time(date, hour, minute);
        if candidate > now {
            return Some(candidate);
        }
    }

    None
}

/// Resolve the next concrete occurrence of `rule` strictly after `now`.
///
/// Alternating pairs share one weekly slot: the next matching date belongs to
/// the cycle lead, the sibling lands exactly seven days later, so the two
/// rules can never claim the same calendar date.
pub fn next_occurrence(rule: &ServiceRule, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let (hour, minute) = rule.time_of_day();
    match rule.recurrence {
        Recurrence::Weekly => Some(next_weekly(rule.weekday, hour, minute, now)),
        Recurrence::AlternatingWeekly => {
            let anchor = next_weekly(rule.weekday, hour, minute, now);
            if rule.cycle_lead {
                Some(anchor)
            } else {
                Some(anchor + Duration::days(7))
            }
        }
        Recurrence::MonthlyFirst | Recurrence::MonthlyThird => {
            next_monthly(rule, now, DEFAULT_HORIZON_MONTHS)
        }
    }
}

/// Enumerate all occurrences of `rule` within `horizon_months` of `now`,
/// ascending. Monthly rules that never land inside the horizon contribute
/// nothing.
pub fn occurrences_within(
    rule: &ServiceRule,
    now: NaiveDateTime,
    horizon_months: u32,
) -> Vec<NaiveDateTime> {
    let Some(end) = now.checked_add_months(Months::new(horizon_months)) else {
        return Vec::new();
    };

    match rule.recurrence {
        Recurrence::Weekly => {
            let mut out = Vec::new();
            let Some(mut next) = next_occurrence(rule, now) else {
                return out;
            };
            while next <= end {
                out.push(next);
                next += Duration::days(7);
            }
            out
        }
        Recurrence::AlternatingWeekly => {
            // Each sibling recurs on a 14-day stride from its own anchor.
            let mut out = Vec::new();
            let Some(mut next) = next_occurrence(rule, now) else {
                return out;
            };
            while next <= end {
                out.push(next);
                next += Duration::days(14);
            }
            out
        }
        Recurrence::MonthlyFirst | Recurrence::MonthlyThird => {
            let mut out = Vec::new();
            let mut cursor = now;
            while let Some(next) = next_monthly(rule, cursor, horizon_months) {
                if next > end {
                    break;
                }
                out.push(next);
                cursor = next;
            }
            out
        }
    }
}

/// The instant a one-off event starts: its date combined with its parsed
/// time, or the configured fallback hour when the time is missing or
/// unparseable.
pub fn event_start(event: &Event) -> NaiveDateTime {
    let (hour, minute) = event
        .time
        .as_deref()
        .and_then(parse_time_of_day)
        .unwrap_or((DEFAULT_EVENT_HOUR, 0));
    at_time(event.date, hour, minute)
}

fn event_occurrence(event: &Event) -> Occurrence {
    Occurrence {
        title: event.title.clone(),
        starts_at: event_start(event),
        time: event.time.clone(),
        description: Some(event.description.clone()),
        source: OccurrenceSource::OneOff,
    }
}

fn rule_occurrence(rule: &ServiceRule, starts_at: NaiveDateTime) -> Occurrence {
    Occurrence {
        title: rule.name.to_string(),
        starts_at,
        time: Some(rule.time.to_string()),
        description: Some(rule.description.to_string()),
        source: OccurrenceSource::Recurring,
    }
}

/// Merge resolved recurring occurrences with one-off events: keep only
/// strictly-future instants, deduplicate by title preferring the earlier
/// date, and sort ascending. Merging is idempotent.
pub fn merge(
    mut occurrences: Vec<Occurrence>,
    events: &[Event],
    now: NaiveDateTime,
) -> Vec<Occurrence> {
    occurrences.extend(events.iter().map(event_occurrence));
    occurrences.retain(|o| o.starts_at > now);
    occurrences.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then(a.title.cmp(&b.title)));

    let mut seen = std::collections::HashSet::new();
    occurrences.retain(|o| seen.insert(o.title.clone()));
    occurrences
}

/// Everything on the calendar within `horizon_months`: every recurring rule's
/// occurrences plus the one-off events, merged.
pub fn upcoming_schedule(
    rules: &[ServiceRule],
    events: &[Event],
    now: NaiveDateTime,
    horizon_months: u32,
) -> Vec<Occurrence> {
    let mut occurrences = Vec::new();
    for rule in rules {
        for starts_at in occurrences_within(rule, now, horizon_months) {
            occurrences.push(rule_occurrence(rule, starts_at));
        }
    }
    merge(occurrences, events, now)
}

/// The single soonest upcoming service or special event, if any.
pub fn next_service(
    rules: &[ServiceRule],
    events: &[Event],
    now: NaiveDateTime,
) -> Option<Occurrence> {
    let mut occurrences = Vec::new();
    for rule in rules {
        if let Some(starts_at) = next_occurrence(rule, now) {
            occurrences.push(rule_occurrence(rule, starts_at));
        }
    }
    merge(occurrences, events, now).into_iter().next()
}

/// Split one-off events for the activities page: upcoming ascending, past
/// descending. An event counts as past only once its whole day is over.
pub fn partition_events(events: &[Event], now: NaiveDateTime) -> (Vec<Event>, Vec<Event>) {
    let mut upcoming: Vec<Event> = Vec::new();
    let mut past: Vec<Event> = Vec::new();

    for event in events {
        let end_of_day = at_time(event.date, 23, 59);
        if end_of_day < now {
            past.push(event.clone());
        } else {
            upcoming.push(event.clone());
        }
    }

    upcoming.sort_by_key(|e| event_start(e));
    past.sort_by_key(|e| std::cmp::Reverse(event_start(e)));
    (upcoming, past)
}
