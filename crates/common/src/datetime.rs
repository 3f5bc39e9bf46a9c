//! Date and time helpers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Current UTC time.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a datetime string into UTC.
///
/// Accepts RFC 3339, RFC 2822, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`
/// and a bare `YYYY-MM-DD` (midnight UTC). Naive values are taken as UTC.
///
/// ```
/// use cms_common::datetime::parse_datetime;
///
/// let dt = parse_datetime("2024-03-01T08:00:00+08:00").unwrap();
/// assert_eq!(dt.to_rfc3339(), "2024-03-01T00:00:00+00:00");
/// ```
pub fn parse_datetime(datetime_str: &str) -> Result<DateTime<Utc>, String> {
    let input = datetime_str.trim();
    DateTime::parse_from_rfc3339(input)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| DateTime::parse_from_rfc2822(input).map(|dt| dt.with_timezone(&Utc)))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        })
        .or_else(|_| {
            NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S")
                .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        })
        .or_else(|_| NaiveDate::parse_from_str(input, "%Y-%m-%d").map(start_of_day))
        .map_err(|e| format!("Failed to parse datetime '{}': {}", datetime_str, e))
}

/// Midnight UTC at the start of `date`.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(date.and_time(chrono::NaiveTime::MIN), Utc)
}

/// Every calendar day from `start` to `end`, both inclusive. Empty when
/// `start > end`.
pub fn days_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|day| *day <= end).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_datetime_formats() {
        for input in [
            "2023-12-01T12:30:45Z",
            "2023-12-01T12:30:45+00:00",
            "Fri, 01 Dec 2023 12:30:45 +0000",
            "2023-12-01 12:30:45",
            "2023-12-01T12:30:45",
        ] {
            let dt = parse_datetime(input).unwrap();
            assert_eq!((dt.year(), dt.month(), dt.day()), (2023, 12, 1), "{}", input);
            assert_eq!(dt.hour(), 12, "{}", input);
        }
    }

    #[test]
    fn test_parse_bare_date() {
        let dt = parse_datetime("2024-02-29").unwrap();
        assert_eq!(dt, start_of_day(date(2024, 2, 29)));
    }

    #[test]
    fn test_parse_datetime_invalid() {
        assert!(parse_datetime("yesterday").is_err());
        assert!(parse_datetime("2023-02-30").is_err());
    }

    #[test]
    fn test_start_of_day() {
        let dt = start_of_day(date(2024, 1, 15));
        assert_eq!(dt.to_rfc3339(), "2024-01-15T00:00:00+00:00");
    }

    #[test]
    fn test_days_between() {
        let days = days_between(date(2024, 2, 27), date(2024, 3, 1));
        assert_eq!(
            days,
            vec![date(2024, 2, 27), date(2024, 2, 28), date(2024, 2, 29), date(2024, 3, 1)]
        );
        assert_eq!(days_between(date(2024, 1, 1), date(2024, 1, 1)).len(), 1);
        assert!(days_between(date(2024, 1, 2), date(2024, 1, 1)).is_empty());
    }
}
