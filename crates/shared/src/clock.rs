use chrono::{DateTime, Datelike, Days, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

pub const DEFAULT_BOUNDARY_TIME_ZONE: &str = "UTC";

/// Returns the current UTC instant. Injected everywhere `Utc::now()` would
/// otherwise be called inline, so tests can pin a fixed instant instead of
/// racing the wall clock.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Input timezone strings sometimes carry a human-readable offset
/// annotation, e.g. `"Asia/Kolkata (UTC +05:30)"`. Only the token up to the
/// first whitespace is a real IANA zone name; the rest is a data-quality
/// artifact from the campaign authoring UI and is discarded.
pub fn normalize_time_zone(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let token = trimmed.split_whitespace().next().unwrap_or(trimmed);
    token.parse::<Tz>().ok().map(|tz| tz.name().to_string())
}

pub fn parse_time_zone(value: &str) -> Option<Tz> {
    normalize_time_zone(value).and_then(|normalized| normalized.parse::<Tz>().ok())
}

/// Converts a UTC instant into its local calendar view in `time_zone`.
/// Returns `None` if `time_zone` cannot be resolved at all, so callers can
/// fail closed rather than silently defaulting to UTC (unlike the
/// presentational helpers below, schedule evaluation must not guess).
pub fn local_view(now_utc: DateTime<Utc>, time_zone: &str) -> Option<DateTime<Tz>> {
    let tz = parse_time_zone(time_zone)?;
    Some(now_utc.with_timezone(&tz))
}

/// `YYYY-MM-DD` in `boundary_tz`, used to key Account Runtime State
/// records. Falls back to UTC if `boundary_tz` is unparseable, since the
/// boundary timezone is an operator-configured constant, not per-campaign
/// untrusted input.
pub fn date_key(now_utc: DateTime<Utc>, boundary_tz: &str) -> String {
    let tz = parse_time_zone(boundary_tz).unwrap_or(chrono_tz::UTC);
    now_utc.with_timezone(&tz).date_naive().to_string()
}

/// Start-of-day instant (UTC) for `date_key` in `boundary_tz`. Used to seed
/// a freshly-created Account Runtime State's `next_available_at`.
pub fn start_of_day_utc(now_utc: DateTime<Utc>, boundary_tz: &str) -> DateTime<Utc> {
    let tz = parse_time_zone(boundary_tz).unwrap_or(chrono_tz::UTC);
    let local_date = now_utc.with_timezone(&tz).date_naive();
    resolve_local_midnight(&tz, local_date).unwrap_or(now_utc)
}

/// Start of the current UTC calendar day, independent of any configured
/// boundary timezone. Used for the campaign daily-cap count, which is
/// always scoped to true UTC midnight regardless of `DAY_BOUNDARY_TZ`.
pub fn start_of_day_true_utc(now_utc: DateTime<Utc>) -> DateTime<Utc> {
    now_utc
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
}

/// `[start, end)` UTC bounds of `date_key` in `boundary_tz`, used by
/// administrative recount to scope the Activity scan.
pub fn day_bounds_utc(date_key: &str, boundary_tz: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let local_date = NaiveDate::parse_from_str(date_key, "%Y-%m-%d").ok()?;
    let next_date = local_date.checked_add_days(Days::new(1))?;
    let tz = parse_time_zone(boundary_tz).unwrap_or(chrono_tz::UTC);
    let start = resolve_local_midnight(&tz, local_date)?;
    let end = resolve_local_midnight(&tz, next_date)?;
    Some((start, end))
}

fn resolve_local_midnight(tz: &Tz, date: NaiveDate) -> Option<DateTime<Utc>> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    resolve_local_datetime(tz, midnight).map(|dt| dt.with_timezone(&Utc))
}

fn resolve_local_datetime(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(value) => Some(value),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => None,
    }
}

pub fn weekday_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        chrono::Weekday::Mon => "monday",
        chrono::Weekday::Tue => "tuesday",
        chrono::Weekday::Wed => "wednesday",
        chrono::Weekday::Thu => "thursday",
        chrono::Weekday::Fri => "friday",
        chrono::Weekday::Sat => "saturday",
        chrono::Weekday::Sun => "sunday",
    }
}

pub fn parse_clock_time(value: &str) -> Option<NaiveTime> {
    let trimmed = value.trim();
    if let Ok(time) = NaiveTime::parse_from_str(trimmed, "%H:%M") {
        return Some(time);
    }
    let lower = trimmed.to_lowercase();
    if lower.ends_with("am") || lower.ends_with("pm") {
        for fmt in ["%I:%M %p", "%I:%M%p"] {
            if let Ok(time) = NaiveTime::parse_from_str(&lower, fmt) {
                return Some(time);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn normalize_time_zone_strips_human_annotation() {
        assert_eq!(
            normalize_time_zone("Asia/Kolkata (UTC +05:30)"),
            Some("Asia/Kolkata".to_string())
        );
    }

    #[test]
    fn normalize_time_zone_rejects_garbage() {
        assert_eq!(normalize_time_zone(""), None);
        assert_eq!(normalize_time_zone("Mars/Olympus"), None);
    }

    #[test]
    fn date_key_uses_boundary_timezone() {
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 1, 15, 0).single().unwrap();
        assert_eq!(date_key(now, "UTC"), "2026-02-17");
        assert_eq!(date_key(now, "America/Los_Angeles"), "2026-02-16");
    }

    #[test]
    fn parse_clock_time_accepts_24h_and_12h() {
        assert_eq!(parse_clock_time("09:45"), NaiveTime::from_hms_opt(9, 45, 0));
        assert_eq!(parse_clock_time("9:45"), None);
        assert_eq!(
            parse_clock_time("01:00 pm"),
            NaiveTime::from_hms_opt(13, 0, 0)
        );
        assert_eq!(
            parse_clock_time("01:00 PM"),
            NaiveTime::from_hms_opt(13, 0, 0)
        );
        assert_eq!(parse_clock_time("24:00"), None);
    }

    #[test]
    fn day_bounds_round_trip_through_date_key() {
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 18, 0, 0).single().unwrap();
        let key = date_key(now, "America/Los_Angeles");
        let (start, end) = day_bounds_utc(&key, "America/Los_Angeles").unwrap();
        assert!(start <= now && now < end);
    }
}
