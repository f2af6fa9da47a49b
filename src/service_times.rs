use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use ts_rs::TS;

/// Fallback hour (24h) applied when an event or rule carries no parseable
/// time of day.
pub const DEFAULT_EVENT_HOUR: u32 = 10;

/// How many months ahead the monthly-rule search looks before giving up.
pub const DEFAULT_HORIZON_MONTHS: u32 = 6;

/// Recurrence pattern for a service rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "kebab-case")]
pub enum Recurrence {
    Weekly,
    AlternatingWeekly,
    MonthlyFirst,
    MonthlyThird,
}

/// A declarative recurring service definition. The rule set is fixed at
/// compile time and immutable for the life of the process.
#[derive(Debug, Clone, Copy)]
pub struct ServiceRule {
    pub name: &'static str,
    /// 0 = Sunday .. 6 = Saturday
    pub weekday: u8,
    /// Display form, e.g. "9:20 AM". Parsed with [`parse_time_of_day`].
    pub time: &'static str,
    pub recurrence: Recurrence,
    /// For alternating rules: the sibling rule sharing weekday and time.
    pub alternates_with: Option<&'static str>,
    /// For alternating pairs, exactly one sibling leads the cycle and
    /// claims the next matching calendar date.
    pub cycle_lead: bool,
    pub description: &'static str,
}

pub const SERVICE_TIMES: &[ServiceRule] = &[
    ServiceRule {
        name: "Sunday Service",
        weekday: 0,
        time: "9:20 AM",
        recurrence: Recurrence::Weekly,
        alternates_with: None,
        cycle_lead: false,
        description: "Main worship service",
    },
    ServiceRule {
        name: "Digging Deep",
        weekday: 3,
        time: "7:00 PM",
        recurrence: Recurrence::AlternatingWeekly,
        alternates_with: Some("Faith Clinic"),
        cycle_lead: true,
        description: "Midweek Bible study",
    },
    ServiceRule {
        name: "Faith Clinic",
        weekday: 3,
        time: "7:00 PM",
        recurrence: Recurrence::AlternatingWeekly,
        alternates_with: Some("Digging Deep"),
        cycle_lead: false,
        description: "Midweek prayer session",
    },
    ServiceRule {
        name: "Thanksgiving Service",
        weekday: 0,
        time: "9:20 AM",
        recurrence: Recurrence::MonthlyFirst,
        alternates_with: None,
        cycle_lead: false,
        description: "Monthly thanksgiving celebration",
    },
    ServiceRule {
        name: "Youth Ministry",
        weekday: 0,
        time: "9:20 AM",
        recurrence: Recurrence::MonthlyThird,
        alternates_with: None,
        cycle_lead: false,
        description: "Youth-led service",
    },
];

impl ServiceRule {
    /// Hour and minute for this rule, falling back to [`DEFAULT_EVENT_HOUR`]
    /// when the display string does not parse.
    pub fn time_of_day(&self) -> (u32, u32) {
        parse_time_of_day(self.time).unwrap_or((DEFAULT_EVENT_HOUR, 0))
    }

    pub fn find(name: &str) -> Option<&'static ServiceRule> {
        SERVICE_TIMES.iter().find(|r| r.name == name)
    }
}

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d{1,2})(?::(\d{2}))?\s*(am|pm|a\.m\.|p\.m\.)?\s*$")
        .expect("time-of-day regex is valid")
});

/// Parse a human time string ("10:00 AM", "10am", "7:00 PM", "19:00") into
/// a 24h `(hour, minute)` pair. Returns `None` on anything unparseable so
/// callers can apply the configured fallback instead of failing the whole
/// schedule computation.
pub fn parse_time_of_day(s: &str) -> Option<(u32, u32)> {
    let caps = TIME_RE.captures(s)?;

    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };

    match caps.get(3).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(ref meridiem) if meridiem.starts_with('p') => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            if hour != 12 {
                hour += 12;
            }
        }
        Some(_) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            // 12 AM is midnight
            if hour == 12 {
                hour = 0;
            }
        }
        None => {
            if hour > 23 {
                return None;
            }
        }
    }

    if minute > 59 {
        return None;
    }

    Some((hour, minute))
}
