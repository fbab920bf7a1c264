//! Event-day calendar.
//!
//! A JSON file listing dates whose afternoons are blocked for new entries
//! (FOMC, CPI). Reading is best effort: a missing or unparseable file only
//! logs a warning and blocks nothing.

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CalendarFile {
    #[serde(default)]
    blocked_afternoons: Vec<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct EventCalendar {
    path: PathBuf,
}

impl EventCalendar {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn is_blocked_afternoon(&self, date: NaiveDate) -> bool {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return false,
        };
        match serde_json::from_str::<CalendarFile>(&raw) {
            Ok(calendar) => calendar.blocked_afternoons.contains(&date),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "Event calendar parse failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "event_calendar_{}_{}.json",
            std::process::id(),
            content.len()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn blocked_date_is_found() {
        let path = write_temp(r#"{"blocked_afternoons": ["2026-03-18", "2026-04-29"]}"#);
        let calendar = EventCalendar::new(&path);
        assert!(calendar.is_blocked_afternoon(NaiveDate::from_ymd_opt(2026, 3, 18).unwrap()));
        assert!(!calendar.is_blocked_afternoon(NaiveDate::from_ymd_opt(2026, 3, 19).unwrap()));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_file_blocks_nothing() {
        let calendar = EventCalendar::new("/nonexistent/calendar.json");
        assert!(!calendar.is_blocked_afternoon(NaiveDate::from_ymd_opt(2026, 3, 18).unwrap()));
    }

    #[test]
    fn malformed_file_blocks_nothing() {
        let path = write_temp("not json at all");
        let calendar = EventCalendar::new(&path);
        assert!(!calendar.is_blocked_afternoon(NaiveDate::from_ymd_opt(2026, 3, 18).unwrap()));
        std::fs::remove_file(path).ok();
    }
}
