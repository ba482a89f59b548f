//! Credit-deadline arithmetic.
//!
//! Deadlines arrive as free text from upstream entry screens. Parsing is
//! lenient and happens at read time; a value that cannot be parsed means
//! "no deadline" for display and "never lapses" for the sweeps.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use chrono_tz::Tz;

/// Civil-day calculations are anchored to the business timezone, not the
/// server clock.
pub const QUEUE_TZ: Tz = Kolkata;

/// Requests whose deadline is this close get flagged in queue listings.
pub const DUE_SOON_WINDOW_DAYS: i64 = 2;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%d %b %Y", "%d %B %Y"];

/// Parse a raw deadline into an instant at end of the civil day in
/// [`QUEUE_TZ`]. RFC 3339 timestamps are taken as-is.
pub fn parse_deadline(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(stamp) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(stamp.with_timezone(&Utc));
    }
    let date = DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())?;
    let end_of_day = date.and_hms_opt(23, 59, 59)?;
    QUEUE_TZ.from_local_datetime(&end_of_day).single().map(|local| local.with_timezone(&Utc))
}

/// Whole civil days from `now` until the deadline, negative when the
/// deadline has passed. `None` when the raw value does not parse.
pub fn remaining_days(raw: &str, now: DateTime<Utc>) -> Option<i64> {
    let deadline = parse_deadline(raw)?;
    let deadline_day = deadline.with_timezone(&QUEUE_TZ).date_naive();
    let today = now.with_timezone(&QUEUE_TZ).date_naive();
    Some((deadline_day - today).num_days())
}

/// Queue filter semantics for the `delaydays` parameter:
/// `Some(n >= 0)` keeps deadlines falling within the next `n` days,
/// `Some(-1)` keeps overdue ones, `None` from an unparseable deadline
/// matches nothing.
pub fn matches_delay_window(remaining: Option<i64>, delay_days: i64) -> bool {
    match remaining {
        Some(days) if delay_days >= 0 => (0..=delay_days).contains(&days),
        Some(days) => days < 0,
        None => false,
    }
}

pub fn is_due_soon(remaining: Option<i64>) -> bool {
    remaining.is_some_and(|days| (0..=DUE_SOON_WINDOW_DAYS).contains(&days))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{is_due_soon, matches_delay_window, parse_deadline, remaining_days, QUEUE_TZ};

    #[test]
    fn parses_common_date_spellings() {
        for raw in ["2026-09-05", "05-09-2026", "05/09/2026", "5 Sep 2026", "5 September 2026"] {
            let parsed = parse_deadline(raw).expect(raw);
            assert_eq!(parsed.with_timezone(&QUEUE_TZ).date_naive().to_string(), "2026-09-05");
        }
        assert_eq!(parse_deadline("whenever"), None);
        assert_eq!(parse_deadline("  "), None);
    }

    #[test]
    fn remaining_days_counts_civil_days_in_business_zone() {
        // 2026-09-01 10:00 IST.
        let now = Utc.with_ymd_and_hms(2026, 9, 1, 4, 30, 0).single().expect("now");
        assert_eq!(remaining_days("2026-09-05", now), Some(4));
        assert_eq!(remaining_days("2026-09-01", now), Some(0));
        assert_eq!(remaining_days("2026-08-30", now), Some(-2));
        assert_eq!(remaining_days("bad", now), None);
    }

    #[test]
    fn delay_window_distinguishes_overdue_from_upcoming() {
        assert!(matches_delay_window(Some(3), 7));
        assert!(!matches_delay_window(Some(9), 7));
        assert!(!matches_delay_window(Some(-1), 7));
        assert!(matches_delay_window(Some(-4), -1));
        assert!(!matches_delay_window(Some(0), -1));
        assert!(!matches_delay_window(None, 7));
        assert!(!matches_delay_window(None, -1));
    }

    #[test]
    fn due_soon_covers_today_through_the_window() {
        assert!(is_due_soon(Some(0)));
        assert!(is_due_soon(Some(2)));
        assert!(!is_due_soon(Some(3)));
        assert!(!is_due_soon(Some(-1)));
        assert!(!is_due_soon(None));
    }
}
