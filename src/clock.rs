//! C1: region resolution and business-day arithmetic.
//!
//! Holidays are not modeled (spec.md §4.1, §9 Open Question) — only Saturday
//! and Sunday are skipped.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use tracing::warn;

static WARNED_REGIONS: Mutex<Option<HashSet<String>>> = Mutex::new(None);

/// Resolve a region hint to an IANA timezone id. Unknown input falls back to
/// UTC, emitting one warning per unknown region per process lifetime.
pub fn resolve_region(region: &str) -> Tz {
    let upper = region.trim().to_uppercase();
    let mapped = match upper.as_str() {
        "AMER" | "AMERICAS" | "NA" => Some("America/Chicago"),
        "EMEA" | "EU" => Some("Europe/London"),
        "APAC" | "APJ" => Some("Asia/Singapore"),
        "AUS" => Some("Australia/Sydney"),
        "NZ" | "NZL" | "AUCKLAND" | "WELLINGTON" | "NEW ZEALAND" => Some("Pacific/Auckland"),
        _ => None,
    };

    if let Some(zone) = mapped {
        return zone.parse().expect("static zone table entries are valid IANA ids");
    }

    if let Ok(tz) = region.parse::<Tz>() {
        return tz;
    }

    let mut guard = WARNED_REGIONS.lock().unwrap();
    let warned = guard.get_or_insert_with(HashSet::new);
    if warned.insert(region.to_string()) {
        warn!(region = %region, "unknown region, falling back to UTC");
    }
    Tz::UTC
}

fn is_weekend(weekday: Weekday) -> bool {
    matches!(weekday, Weekday::Sat | Weekday::Sun)
}

/// Add `n` business days to `t` in UTC. Saturday/Sunday are skipped.
/// Negative `n` moves backward. `add_business_days(t, 0) == t`.
pub fn add_business_days(t: DateTime<Utc>, n: i64) -> DateTime<Utc> {
    if n == 0 {
        return t;
    }

    let step = if n > 0 { 1 } else { -1 };
    let mut remaining = n.abs();
    let mut cursor = t;

    while remaining > 0 {
        cursor += Duration::days(step);
        if !is_weekend(cursor.weekday()) {
            remaining -= 1;
        }
    }

    cursor
}

/// Resolve `region`, move `from_utc` to local time, step forward one
/// calendar day (always strictly in the future), skip to the next
/// Monday-Friday, and set the local clock to `send_hour_local:00:00`.
/// `send_hour_local` is clamped to [0, 23]. Returns the UTC instant.
pub fn next_business_day_at_hour_utc(region: &str, send_hour_local: u32, from_utc: DateTime<Utc>) -> DateTime<Utc> {
    let tz = resolve_region(region);
    let hour = send_hour_local.min(23);

    let from_local = from_utc.with_timezone(&tz);
    let mut date = from_local.date_naive() + Duration::days(1);

    while is_weekend(date.weekday()) {
        date += Duration::days(1);
    }

    let naive_time = chrono::NaiveTime::from_hms_opt(hour, 0, 0).expect("hour clamped to [0,23]");

    // Spring-forward DST gaps: if the wall-clock instant doesn't exist, try
    // subsequent days until one does (mirrors chrono's usual DST handling).
    let mut candidate_date = date;
    loop {
        match tz.from_local_datetime(&candidate_date.and_time(naive_time)) {
            chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
                return dt.with_timezone(&Utc);
            }
            chrono::LocalResult::None => {
                candidate_date += Duration::days(1);
                while is_weekend(candidate_date.weekday()) {
                    candidate_date += Duration::days(1);
                }
            }
        }
    }
}

/// True iff local weekday is Mon-Fri and `start_hour_local <= local_hour <
/// end_hour_local`. `cushion_hours` is reserved for narrowing the window and
/// is accepted but currently ignored (spec.md §4.1).
pub fn is_within_window(
    region: &str,
    start_hour_local: u32,
    end_hour_local: u32,
    _cushion_hours: u32,
    now_utc: DateTime<Utc>,
) -> bool {
    let tz = resolve_region(region);
    let local = now_utc.with_timezone(&tz);

    if is_weekend(local.weekday()) {
        return false;
    }

    let hour = local.hour();
    hour >= start_hour_local && hour < end_hour_local
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[test]
    fn resolves_known_region_aliases() {
        assert_eq!(resolve_region("emea"), chrono_tz::Europe::London);
        assert_eq!(resolve_region("AMER"), chrono_tz::America::Chicago);
        assert_eq!(resolve_region("apac"), chrono_tz::Asia::Singapore);
        assert_eq!(resolve_region("nz"), chrono_tz::Pacific::Auckland);
    }

    #[test]
    fn passes_through_iana_ids_and_falls_back_on_unknown() {
        assert_eq!(resolve_region("Asia/Tokyo"), chrono_tz::Asia::Tokyo);
        assert_eq!(resolve_region("definitely-not-a-zone"), chrono_tz::Tz::UTC);
    }

    #[test]
    fn add_business_days_identity_and_inverse() {
        let monday = Utc.with_ymd_and_hms(2025, 1, 6, 12, 0, 0).unwrap();
        assert_eq!(add_business_days(monday, 0), monday);

        for n in [1, 2, 5, 10, -1, -3] {
            let forward = add_business_days(monday, n);
            let back = add_business_days(forward, -n);
            assert_eq!(back, monday, "n={n}");
        }
    }

    #[test]
    fn add_business_days_skips_weekends() {
        let friday = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let next = add_business_days(friday, 1);
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.date_naive(), Utc.with_ymd_and_hms(2025, 1, 13, 12, 0, 0).unwrap().date_naive());
    }

    #[test]
    fn next_business_day_is_strictly_future_weekday_at_clamped_hour() {
        let from = Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap(); // Monday
        let next = next_business_day_at_hour_utc("EMEA", 9, from);
        assert!(next > from);
        let local = next.with_timezone(&chrono_tz::Europe::London);
        assert!(!matches!(local.weekday(), Weekday::Sat | Weekday::Sun));
        assert_eq!(local.hour(), 9);
    }

    #[test]
    fn next_business_day_skips_weekend() {
        // Friday evening London time
        let from = Utc.with_ymd_and_hms(2025, 1, 10, 23, 0, 0).unwrap();
        let next = next_business_day_at_hour_utc("EMEA", 9, from);
        let local = next.with_timezone(&chrono_tz::Europe::London);
        assert_eq!(local.weekday(), Weekday::Mon);
    }

    #[test]
    fn send_hour_local_is_clamped() {
        let from = Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap();
        let next = next_business_day_at_hour_utc("EMEA", 99, from);
        let local = next.with_timezone(&chrono_tz::Europe::London);
        assert_eq!(local.hour(), 23);
    }

    #[test]
    fn window_check_respects_weekday_and_hours() {
        // Monday 10:00 London — in window
        let in_window = Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap();
        assert!(is_within_window("EMEA", 8, 18, 0, in_window));

        // Monday 03:00 UTC = 03:00 London in January — before window
        let before_window = Utc.with_ymd_and_hms(2025, 1, 6, 3, 0, 0).unwrap();
        assert!(!is_within_window("EMEA", 8, 18, 0, before_window));

        // Saturday — never in window
        let saturday = Utc.with_ymd_and_hms(2025, 1, 11, 10, 0, 0).unwrap();
        assert!(!is_within_window("EMEA", 8, 18, 0, saturday));
    }
}
