use chrono::{DateTime, Datelike, Utc};

use crate::clock::{local_view, parse_clock_time, weekday_name};
use crate::models::{CampaignSchedule, Weekday};

/// Evaluates whether `now_utc` falls inside a campaign's configured sending
/// window. Fails closed: any malformed or unresolvable input returns
/// `false` rather than propagating an error, since a schedule mistake
/// should pause sending, not crash the dispatcher tick.
pub fn in_window(now_utc: DateTime<Utc>, schedule: &CampaignSchedule) -> bool {
    let Some(now_local) = local_view(now_utc, &schedule.timezone) else {
        return false;
    };
    let today = now_local.date_naive();

    let allowed_days = schedule.scheduled_days.as_ref();
    if let Some(days) = allowed_days {
        let today_name = weekday_name(today);
        let in_days = days
            .iter()
            .any(|day| day.name() == today_name);
        if !in_days {
            return false;
        }
    }

    if let Some(start_date) = schedule.start_date {
        if today < start_date {
            return false;
        }
    }
    if let Some(end_date) = schedule.end_date {
        if today > end_date {
            return false;
        }
    }

    let (Some(time_from), Some(time_to)) = (&schedule.time_from, &schedule.time_to) else {
        return true;
    };
    let Some(t_from) = parse_clock_time(time_from) else {
        return false;
    };
    let Some(t_to) = parse_clock_time(time_to) else {
        return false;
    };
    let now_time = now_local.time();
    if t_from <= t_to {
        now_time >= t_from && now_time <= t_to
    } else {
        now_time >= t_from || now_time <= t_to
    }
}

/// Convenience for callers holding a weekday already, without round-
/// tripping through its string name.
pub fn weekday_matches(allowed: &[Weekday], today: chrono::Weekday) -> bool {
    let name = match today {
        chrono::Weekday::Mon => "monday",
        chrono::Weekday::Tue => "tuesday",
        chrono::Weekday::Wed => "wednesday",
        chrono::Weekday::Thu => "thursday",
        chrono::Weekday::Fri => "friday",
        chrono::Weekday::Sat => "saturday",
        chrono::Weekday::Sun => "sunday",
    };
    allowed.iter().any(|day| day.name() == name)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn schedule(timezone: &str) -> CampaignSchedule {
        CampaignSchedule {
            campaign_id: crate::id::Id::from("campaign-1"),
            timezone: timezone.to_string(),
            scheduled_days: None,
            start_date: None,
            end_date: None,
            time_from: None,
            time_to: None,
        }
    }

    #[test]
    fn fails_closed_on_unparseable_timezone() {
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 12, 0, 0).single().unwrap();
        assert!(!in_window(now, &schedule("Not/AZone")));
    }

    #[test]
    fn open_window_with_no_constraints_is_always_true() {
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 3, 0, 0).single().unwrap();
        assert!(in_window(now, &schedule("UTC")));
    }

    #[test]
    fn respects_scheduled_days() {
        let mut s = schedule("UTC");
        s.scheduled_days = Some(vec![Weekday::Monday]);
        // 2026-02-17 is a Tuesday.
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 12, 0, 0).single().unwrap();
        assert!(!in_window(now, &s));
        let monday = Utc.with_ymd_and_hms(2026, 2, 16, 12, 0, 0).single().unwrap();
        assert!(in_window(monday, &s));
    }

    #[test]
    fn respects_date_range() {
        let mut s = schedule("UTC");
        s.start_date = chrono::NaiveDate::from_ymd_opt(2026, 2, 18);
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 12, 0, 0).single().unwrap();
        assert!(!in_window(now, &s));
        let later = Utc.with_ymd_and_hms(2026, 2, 19, 12, 0, 0).single().unwrap();
        assert!(in_window(later, &s));
    }

    #[test]
    fn time_window_handles_midnight_wrap() {
        let mut s = schedule("UTC");
        s.time_from = Some("22:00".to_string());
        s.time_to = Some("06:00".to_string());
        let late_night = Utc.with_ymd_and_hms(2026, 2, 17, 23, 0, 0).single().unwrap();
        assert!(in_window(late_night, &s));
        let early_morning = Utc.with_ymd_and_hms(2026, 2, 17, 3, 0, 0).single().unwrap();
        assert!(in_window(early_morning, &s));
        let midday = Utc.with_ymd_and_hms(2026, 2, 17, 12, 0, 0).single().unwrap();
        assert!(!in_window(midday, &s));
    }

    #[test]
    fn time_window_straight_range_accepts_12h_format() {
        let mut s = schedule("UTC");
        s.time_from = Some("09:00 am".to_string());
        s.time_to = Some("05:00 pm".to_string());
        let afternoon = Utc.with_ymd_and_hms(2026, 2, 17, 14, 0, 0).single().unwrap();
        assert!(in_window(afternoon, &s));
        let evening = Utc.with_ymd_and_hms(2026, 2, 17, 20, 0, 0).single().unwrap();
        assert!(!in_window(evening, &s));
    }

    #[test]
    fn malformed_time_fails_closed() {
        let mut s = schedule("UTC");
        s.time_from = Some("not-a-time".to_string());
        s.time_to = Some("06:00".to_string());
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 3, 0, 0).single().unwrap();
        assert!(!in_window(now, &s));
    }
}
