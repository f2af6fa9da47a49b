use chrono::NaiveDateTime;
use serde::Serialize;
use ts_rs::TS;

/// Days/hours/minutes/seconds until a target instant. All components are
/// non-negative; a past target is all zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
pub struct TimeRemaining {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl TimeRemaining {
    pub const ZERO: TimeRemaining = TimeRemaining {
        days: 0,
        hours: 0,
        minutes: 0,
        seconds: 0,
    };
}

/// Plain integer division of the millisecond delta; "1 day" means exactly
/// 86,400,000 ms, with no calendar-aware rounding. Consumers re-invoke this
/// on a one-second timer; no scheduling lives here.
pub fn time_remaining(target: NaiveDateTime, now: NaiveDateTime) -> TimeRemaining {
    let diff_ms = (target - now).num_milliseconds();
    if diff_ms <= 0 {
        return TimeRemaining::ZERO;
    }
    let diff_ms = diff_ms as u64;

    TimeRemaining {
        days: diff_ms / (1000 * 60 * 60 * 24),
        hours: (diff_ms % (1000 * 60 * 60 * 24)) / (1000 * 60 * 60),
        minutes: (diff_ms % (1000 * 60 * 60)) / (1000 * 60),
        seconds: (diff_ms % (1000 * 60)) / 1000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn counts_down_a_future_target() {
        let now = dt(2025, 1, 27, 10, 0, 0);
        let target = dt(2025, 1, 29, 15, 30, 0);
        assert_eq!(
            time_remaining(target, now),
            TimeRemaining {
                days: 2,
                hours: 5,
                minutes: 30,
                seconds: 0
            }
        );
    }

    #[test]
    fn past_targets_are_all_zeros() {
        let now = dt(2025, 1, 27, 10, 0, 0);
        assert_eq!(
            time_remaining(dt(2025, 1, 25, 10, 0, 0), now),
            TimeRemaining::ZERO
        );
        assert_eq!(time_remaining(now, now), TimeRemaining::ZERO);
    }

    #[test]
    fn one_of_each_unit() {
        let now = dt(2025, 1, 27, 10, 0, 0);
        let target = now + Duration::milliseconds(90_061_000);
        assert_eq!(
            time_remaining(target, now),
            TimeRemaining {
                days: 1,
                hours: 1,
                minutes: 1,
                seconds: 1
            }
        );
    }

    #[test]
    fn seconds_only() {
        let now = dt(2025, 1, 27, 10, 0, 0);
        let target = dt(2025, 1, 27, 10, 0, 45);
        let remaining = time_remaining(target, now);
        assert_eq!(remaining.seconds, 45);
        assert_eq!(remaining.minutes, 0);
        assert_eq!(remaining.days, 0);
    }
}
