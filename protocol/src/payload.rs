use chrono::{DateTime, Utc};
use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayloadError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("empty payload")]
    Empty,
    #[error("not a number: {0:?}")]
    NotANumber(String),
}

/// Formats `<isoTimestamp>Z,<value>`, the convention for every sensor and
/// state message on the bus. Second precision.
pub fn format<V: Display>(ts: DateTime<Utc>, value: V) -> String {
    format!("{}Z,{}", ts.format("%Y-%m-%dT%H:%M:%S"), value)
}

pub fn decode(payload: &[u8]) -> Result<&str, PayloadError> {
    std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)
}

/// The value field of a timestamped payload. The leading timestamp is
/// informational only; a payload without a comma is taken as a bare value.
pub fn value_field(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_ts, value)) => value,
        None => payload,
    }
}

pub fn parse_reading(payload: &str) -> Result<f64, PayloadError> {
    let field = value_field(payload).trim();
    if field.is_empty() {
        return Err(PayloadError::Empty);
    }
    field
        .parse::<f64>()
        .map_err(|_| PayloadError::NotANumber(field.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_second_precision() -> anyhow::Result<()> {
        let ts = Utc
            .timestamp_opt(1_700_000_000, 123_000_000)
            .single()
            .ok_or_else(|| anyhow::anyhow!("bad timestamp"))?;
        assert_eq!(format(ts, 1), "2023-11-14T22:13:20Z,1");
        Ok(())
    }

    #[test]
    fn parses_timestamped_reading() {
        assert_eq!(parse_reading("2024-01-05T10:00:00Z,25.5"), Ok(25.5));
        assert_eq!(parse_reading("2024-01-05T10:00:00Z,-3"), Ok(-3.0));
    }

    #[test]
    fn bare_value_without_timestamp() {
        assert_eq!(parse_reading("19.25"), Ok(19.25));
        assert_eq!(parse_reading(" 7 \n"), Ok(7.0));
    }

    #[test]
    fn only_first_comma_splits() {
        assert_eq!(value_field("ts,1,2"), "1,2");
        assert!(matches!(
            parse_reading("ts,1,2"),
            Err(PayloadError::NotANumber(_))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_reading("2024-01-05T10:00:00Z,"), Err(PayloadError::Empty));
        assert_eq!(
            parse_reading("2024-01-05T10:00:00Z,warm"),
            Err(PayloadError::NotANumber("warm".to_string()))
        );
        assert_eq!(decode(&[0xff, 0xfe]), Err(PayloadError::NotUtf8));
    }
}
