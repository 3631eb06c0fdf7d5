//! Consecutive-day riding streaks.
//!
//! A streak is anchored to today or yesterday in the rider's time zone. A
//! broken streak is 0 immediately; there is no "last known streak".
//! Rides dated after today (device clock skew) are ignored.

use std::collections::BTreeSet;

use chrono::{DateTime, Local, NaiveDate, TimeZone};

/// Current streak for ride start timestamps (ms since epoch), measured in
/// calendar days of `now`'s time zone.
///
/// # Example
/// ```
/// use chrono::{TimeZone, Utc};
/// use ride_tracker::streak::current_streak;
///
/// let now = Utc.with_ymd_and_hms(2024, 6, 3, 18, 0, 0).unwrap();
/// let day = 24 * 60 * 60 * 1000;
/// let today = now.timestamp_millis();
/// assert_eq!(current_streak(&[today, today - day, today - 2 * day], &now), 3);
/// ```
pub fn current_streak<Tz: TimeZone>(start_times: &[i64], now: &DateTime<Tz>) -> u32 {
    let tz = now.timezone();
    let today = now.date_naive();
    let days: BTreeSet<NaiveDate> = start_times
        .iter()
        .filter_map(|&ms| tz.timestamp_millis_opt(ms).single())
        .map(|dt| dt.date_naive())
        .filter(|day| *day <= today)
        .collect();

    let mut walk = days.iter().rev();

    let Some(&latest) = walk.next() else {
        return 0;
    };
    if latest != today && Some(latest) != today.pred_opt() {
        return 0;
    }

    let mut streak = 1;
    let mut previous = latest;
    for &day in walk {
        if Some(day) == previous.pred_opt() {
            streak += 1;
            previous = day;
        } else {
            break;
        }
    }
    streak
}

/// [`current_streak`] against the system clock and local time zone.
pub fn current_streak_local(start_times: &[i64]) -> u32 {
    current_streak(start_times, &Local::now())
}
