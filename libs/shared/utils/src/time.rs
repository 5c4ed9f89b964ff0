//! Time-of-day arithmetic for availability windows and slots.
//!
//! All functions are pure. Windows are half-open `[start, end)` intervals
//! within a single day; `start < end` is enforced upstream, so nothing here
//! depends on wrap-around behaviour.

use chrono::{Duration, NaiveTime, Timelike};

/// Add minutes to a time of day, wrapping past midnight (modulo 24h).
pub fn add_minutes(time: NaiveTime, minutes: i64) -> NaiveTime {
    time.overflowing_add_signed(Duration::minutes(minutes)).0
}

/// Minutes since midnight, for ordering comparisons.
pub fn to_minutes(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Half-open interval overlap: `[a_start, a_end)` intersects `[b_start, b_end)`.
pub fn ranges_overlap(
    a_start: NaiveTime,
    a_end: NaiveTime,
    b_start: NaiveTime,
    b_end: NaiveTime,
) -> bool {
    a_start < b_end && b_start < a_end
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn add_minutes_steps_within_day() {
        assert_eq!(add_minutes(t(9, 0), 15), t(9, 15));
        assert_eq!(add_minutes(t(9, 45), 30), t(10, 15));
    }

    #[test]
    fn add_minutes_wraps_past_midnight() {
        assert_eq!(add_minutes(t(23, 50), 20), t(0, 10));
    }

    #[test]
    fn to_minutes_orders_times() {
        assert_eq!(to_minutes(t(0, 0)), 0);
        assert_eq!(to_minutes(t(9, 30)), 570);
        assert!(to_minutes(t(9, 0)) < to_minutes(t(17, 0)));
    }

    #[test]
    fn overlap_is_half_open() {
        // Touching endpoints do not overlap.
        assert!(!ranges_overlap(t(9, 0), t(12, 0), t(12, 0), t(14, 0)));
        // Partial overlap from either side.
        assert!(ranges_overlap(t(9, 0), t(12, 0), t(11, 0), t(13, 0)));
        assert!(ranges_overlap(t(11, 0), t(13, 0), t(9, 0), t(12, 0)));
        // Containment counts as overlap.
        assert!(ranges_overlap(t(9, 0), t(17, 0), t(10, 0), t(11, 0)));
        // Disjoint ranges do not.
        assert!(!ranges_overlap(t(9, 0), t(10, 0), t(14, 0), t(15, 0)));
    }
}
