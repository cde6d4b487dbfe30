use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{OtelMapError, Result};

pub fn parse_time_or_relative(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(duration) = humantime::parse_duration(input) {
        return Ok(now
            - chrono::Duration::from_std(duration).map_err(|e| {
                OtelMapError::Parse(format!("failed to parse duration to chrono: {e}"))
            })?);
    }

    Err(OtelMapError::Parse(format!(
        "expected RFC3339 time or duration, got {input}"
    )))
}

pub fn parse_rfc3339(input: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(input)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| OtelMapError::Parse(format!("invalid RFC3339 time {input}: {e}")))
}

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| OtelMapError::Parse(format!("invalid duration {input}: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parses_rfc3339() {
        let ts = parse_time_or_relative("2026-01-01T00:00:00Z", Utc::now()).unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn parses_duration_relative_to_now() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 10, 0).unwrap();
        let ts = parse_time_or_relative("5m", now).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 2, 1, 0, 5, 0).unwrap());
    }

    #[test]
    fn rejects_invalid() {
        assert!(parse_time_or_relative("nope", Utc::now()).is_err());
        assert!(parse_rfc3339("5m").is_err());
    }
}
