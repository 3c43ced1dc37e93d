//! Duration parsing utilities
//!
//! Parses duration strings with a unit suffix (s, m, h, d) or plain seconds.

use std::time::Duration;
use thiserror::Error;

/// Duration parsing errors
#[derive(Debug, Error, PartialEq)]
pub enum DurationParseError {
    #[error("Invalid duration format: {input}. Expected format like '30s', '5m', '2h', '7d'")]
    InvalidFormat { input: String },

    #[error("Invalid duration unit: {unit}. Supported units: s, m, h, d")]
    InvalidUnit { unit: String },

    #[error("Invalid duration value: {value}. Must be a non-negative whole number")]
    InvalidValue { value: String },

    #[error("Duration too large: {input}")]
    TooLarge { input: String },
}

/// Parse a duration string
///
/// Supported units:
/// - none, s, sec, secs: seconds
/// - m, min, mins: minutes
/// - h, hr, hrs: hours
/// - d, day, days: days
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use plugmon::cli::duration_parser::parse_duration;
///
/// assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
/// assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
/// assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
/// assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
/// assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(7 * 86400));
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let input = input.trim().to_lowercase();

    if input.is_empty() {
        return Err(DurationParseError::InvalidFormat { input });
    }

    let number_end = input
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(input.len());

    if number_end == 0 {
        return Err(DurationParseError::InvalidFormat { input });
    }

    let (number_str, unit_str) = input.split_at(number_end);
    let value = number_str
        .parse::<u64>()
        .map_err(|_| DurationParseError::InvalidValue { value: number_str.to_string() })?;

    let multiplier = parse_unit(unit_str.trim())?;
    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or(DurationParseError::TooLarge { input: input.clone() })
}

/// Format a duration using the largest unit that divides it exactly
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0 => "0s".to_string(),
        s if s % 86400 == 0 => format!("{}d", s / 86400),
        s if s % 3600 == 0 => format!("{}h", s / 3600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

/// Parse unit string and return the multiplier in seconds
fn parse_unit(unit: &str) -> Result<u64, DurationParseError> {
    match unit {
        "" | "s" | "sec" | "secs" => Ok(1),
        "m" | "min" | "mins" => Ok(60),
        "h" | "hr" | "hrs" => Ok(3600),
        "d" | "day" | "days" => Ok(86400),
        _ => Err(DurationParseError::InvalidUnit { unit: unit.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("10 s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("15min").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("3H").unwrap(), Duration::from_secs(3 * 3600));
        assert_eq!(parse_duration(" 1day ").unwrap(), Duration::from_secs(86400));
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(parse_duration(""), Err(DurationParseError::InvalidFormat { .. })));
        assert!(matches!(parse_duration("m5"), Err(DurationParseError::InvalidFormat { .. })));
        assert!(matches!(parse_duration("-5s"), Err(DurationParseError::InvalidFormat { .. })));
        assert!(matches!(parse_duration("1.5h"), Err(DurationParseError::InvalidUnit { .. })));
        assert!(matches!(parse_duration("5w"), Err(DurationParseError::InvalidUnit { .. })));
        assert!(matches!(
            parse_duration("99999999999999999999d"),
            Err(DurationParseError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_duration("999999999999999999d"),
            Err(DurationParseError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
        assert_eq!(format_duration(Duration::from_secs(7 * 86400)), "7d");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(parse_duration(&format_duration(Duration::from_secs(3600))).unwrap(), Duration::from_secs(3600));
    }
}
