//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "GMSEC time strings and interval helpers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

const GMSEC_TIME_FORMAT: &str = "%Y-%j-%H:%M:%S%.3f";

/// Current time as `YYYY-DDD-HH:MM:SS.sss` (day-of-year form).
pub fn gmsec_time_now() -> String {
    format_gmsec_time(Utc::now())
}

/// Format a timestamp in day-of-year form.
pub fn format_gmsec_time(timestamp: DateTime<Utc>) -> String {
    timestamp.format(GMSEC_TIME_FORMAT).to_string()
}

/// Parse a day-of-year timestamp.
pub fn parse_gmsec_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, GMSEC_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Convert a millisecond count into a duration, treating negatives as zero.
pub fn millis(value: i64) -> Duration {
    Duration::from_millis(u64::try_from(value).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn formats_day_of_year() {
        let timestamp = Utc
            .with_ymd_and_hms(2024, 2, 1, 13, 4, 5)
            .single()
            .expect("valid timestamp");
        assert_eq!(format_gmsec_time(timestamp), "2024-032-13:04:05.000");
    }

    #[test]
    fn parse_inverts_format() {
        let now = gmsec_time_now();
        let parsed = parse_gmsec_time(&now).expect("parse own output");
        assert_eq!(format_gmsec_time(parsed), now);
        assert!(parse_gmsec_time("yesterday").is_none());
    }

    #[test]
    fn negative_millis_clamp_to_zero() {
        assert_eq!(millis(-5), Duration::ZERO);
        assert_eq!(millis(1500), Duration::from_millis(1500));
    }
}
