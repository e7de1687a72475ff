/// Utility functions
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};

/// Parse a registry timestamp. Phoscon sends naive strings that are UTC.
pub fn parse_utc_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

/// Format only the wall-clock part of a timestamp as `HH:MM:SS`
pub fn format_time_only<Tz: TimeZone>(dt: &DateTime<Tz>) -> String {
    format!("{:02}:{:02}:{:02}", dt.hour(), dt.minute(), dt.second())
}

/// Signed difference between the time-of-day of two instants, date ignored
pub fn time_of_day_delta<Tz: TimeZone>(begin: &DateTime<Tz>, end: &DateTime<Tz>) -> Duration {
    let secs = |dt: &DateTime<Tz>| i64::from(dt.num_seconds_from_midnight());
    Duration::seconds(secs(end) - secs(begin))
}

/// Human readable form of a delta, e.g. "2 minutes earlier"
pub fn format_delta(delta: Duration) -> String {
    let total = delta.num_seconds();
    let abs = total.unsigned_abs();

    let (disp, unit) = if abs < 60 {
        (abs, "second")
    } else if abs < 3600 {
        (abs / 60, "minute")
    } else {
        (abs / 3600, "hour")
    };

    format!(
        "{} {}{} {}",
        disp,
        unit,
        if disp == 1 { "" } else { "s" },
        if total < 0 { "earlier" } else { "later" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_naive_timestamp_as_utc() {
        let dt = parse_utc_timestamp("2019-04-05T18:30:21").unwrap();
        assert_eq!(dt, at("2019-04-05T18:30:21Z"));
    }

    #[test]
    fn test_parse_fractional_timestamp() {
        let dt = parse_utc_timestamp("2019-04-05T18:30:21.250").unwrap();
        assert_eq!(dt.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_parse_rfc3339_timestamp() {
        let dt = parse_utc_timestamp("2024-06-01T05:12:44+02:00").unwrap();
        assert_eq!(dt, at("2024-06-01T03:12:44Z"));
    }

    #[test]
    fn test_parse_invalid_timestamp() {
        assert_eq!(parse_utc_timestamp("yesterday"), None);
        assert_eq!(parse_utc_timestamp(""), None);
    }

    #[test]
    fn test_format_time_only_pads() {
        assert_eq!(format_time_only(&at("2024-01-15T07:05:09Z")), "07:05:09");
    }

    #[test]
    fn test_delta_ignores_date() {
        let prev = at("2024-01-15T07:05:09Z");
        let new = at("2024-01-16T07:03:09Z");
        assert_eq!(time_of_day_delta(&prev, &new), Duration::seconds(-120));
    }

    #[test]
    fn test_delta_drops_subsecond_part() {
        let prev = at("2024-01-15T07:05:09.900Z");
        let new = at("2024-01-16T07:05:10.100Z");
        assert_eq!(time_of_day_delta(&prev, &new), Duration::seconds(1));
    }

    #[test]
    fn test_format_delta_units() {
        assert_eq!(format_delta(Duration::seconds(1)), "1 second later");
        assert_eq!(format_delta(Duration::seconds(-45)), "45 seconds earlier");
        assert_eq!(format_delta(Duration::seconds(-150)), "2 minutes earlier");
        assert_eq!(format_delta(Duration::seconds(3600)), "1 hour later");
        assert_eq!(format_delta(Duration::seconds(-7300)), "2 hours earlier");
    }
}
