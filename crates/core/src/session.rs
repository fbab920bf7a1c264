//! Market-session clock helpers. All trading-hours arithmetic happens in the
//! exchange's local zone (US/Eastern); persisted timestamps stay naive UTC.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

use crate::config::SessionConfig;

#[must_use]
pub fn market_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).expect("valid time")
}

#[must_use]
pub fn market_close() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).expect("valid time")
}

/// End-of-session summary time (16:05 ET).
#[must_use]
pub fn summary_time() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 5, 0).expect("valid time")
}

#[must_use]
pub fn now_eastern() -> DateTime<Tz> {
    Utc::now().with_timezone(&New_York)
}

#[must_use]
pub fn to_eastern(utc: DateTime<Utc>) -> DateTime<Tz> {
    utc.with_timezone(&New_York)
}

/// Trading-session date for a given eastern wall-clock instant.
#[must_use]
pub fn session_date(now_et: DateTime<Tz>) -> NaiveDate {
    now_et.date_naive()
}

/// Interprets a naive-UTC database timestamp as a UTC instant.
#[must_use]
pub fn from_naive_utc(naive: chrono::NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&naive)
}

/// Parses an `HH:MM` config string, falling back to the given default.
#[must_use]
pub fn parse_time(s: &str, default: NaiveTime) -> NaiveTime {
    NaiveTime::parse_from_str(s, "%H:%M").unwrap_or_else(|_| {
        tracing::warn!(value = s, "Unparseable session time, using default");
        default
    })
}

impl SessionConfig {
    #[must_use]
    pub fn first_entry_time(&self) -> NaiveTime {
        parse_time(&self.first_entry, NaiveTime::from_hms_opt(10, 0, 0).expect("valid time"))
    }

    #[must_use]
    pub fn last_entry_time(&self) -> NaiveTime {
        parse_time(&self.last_entry, NaiveTime::from_hms_opt(14, 45, 0).expect("valid time"))
    }

    #[must_use]
    pub fn force_exit_time(&self) -> NaiveTime {
        parse_time(&self.force_exit, NaiveTime::from_hms_opt(15, 0, 0).expect("valid time"))
    }

    #[must_use]
    pub fn afternoon_cutoff_time(&self) -> NaiveTime {
        parse_time(&self.afternoon_cutoff, NaiveTime::from_hms_opt(12, 0, 0).expect("valid time"))
    }

    /// Whether `now_et` falls inside the entry window.
    #[must_use]
    pub fn in_entry_window(&self, now_et: DateTime<Tz>) -> bool {
        let t = now_et.time();
        t >= self.first_entry_time() && t < self.last_entry_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn et(h: u32, m: u32) -> DateTime<Tz> {
        New_York
            .with_ymd_and_hms(2026, 3, 2, h, m, 0)
            .single()
            .expect("valid datetime")
    }

    #[test]
    fn entry_window_boundaries() {
        let session = SessionConfig::default();
        assert!(!session.in_entry_window(et(9, 59)));
        assert!(session.in_entry_window(et(10, 0)));
        assert!(session.in_entry_window(et(14, 44)));
        assert!(!session.in_entry_window(et(14, 45)));
    }

    #[test]
    fn bad_time_string_falls_back() {
        let t = parse_time("not-a-time", NaiveTime::from_hms_opt(15, 0, 0).unwrap());
        assert_eq!(t, NaiveTime::from_hms_opt(15, 0, 0).unwrap());
    }

    #[test]
    fn session_date_is_eastern_date() {
        // 01:30 UTC on Mar 3 is still Mar 2 in New York.
        let utc = Utc.with_ymd_and_hms(2026, 3, 3, 1, 30, 0).unwrap();
        assert_eq!(
            session_date(to_eastern(utc)),
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
        );
    }
}
