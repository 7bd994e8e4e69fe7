//! Timecode parsing and formatting.
//!
//! Accepted grammar: `[-][d.]h:mm[:ss[.fffffff]]`, surrounding whitespace
//! allowed. Hours are 0-23, minutes and seconds 0-59, and the fraction has
//! one to seven digits. Precision below a millisecond is dropped.

use std::time::Duration;

use crate::TimecodeError;

const MAX_FRACTION_DIGITS: usize = 7;

/// Parse a timecode into signed milliseconds.
pub fn parse_timecode(text: &str) -> Result<i64, TimecodeError> {
    let invalid = || TimecodeError(text.to_string());

    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let mut parts = body.split(':');
    let head = parts.next().ok_or_else(invalid)?;
    let minutes = parts.next().ok_or_else(invalid)?;
    let seconds = parts.next();
    if parts.next().is_some() {
        return Err(invalid());
    }

    let (days, hours) = match head.split_once('.') {
        Some((days, hours)) => (
            bounded(days, u32::MAX as i64).ok_or_else(invalid)?,
            bounded(hours, 23).ok_or_else(invalid)?,
        ),
        None => (0, bounded(head, 23).ok_or_else(invalid)?),
    };
    let minutes = bounded(minutes, 59).ok_or_else(invalid)?;

    let (seconds, millis) = match seconds {
        None => (0, 0),
        Some(seconds) => match seconds.split_once('.') {
            Some((whole, fraction)) => (
                bounded(whole, 59).ok_or_else(invalid)?,
                fraction_millis(fraction).ok_or_else(invalid)?,
            ),
            None => (bounded(seconds, 59).ok_or_else(invalid)?, 0),
        },
    };

    let total = (((days * 24 + hours) * 60 + minutes) * 60 + seconds) * 1000 + millis;
    Ok(if negative { -total } else { total })
}

/// Format a position as `h:mm:ss.fff`.
pub fn format_position(position: Duration) -> String {
    let total_ms = position.as_millis();
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = total_secs / 3600;
    format!("{}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
}

/// Parse a run of ASCII digits no larger than `max`.
fn bounded(digits: &str, max: i64) -> Option<i64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: i64 = digits.parse().ok()?;
    (value <= max).then_some(value)
}

/// Convert a fractional-seconds digit string to whole milliseconds.
fn fraction_millis(fraction: &str) -> Option<i64> {
    if fraction.is_empty()
        || fraction.len() > MAX_FRACTION_DIGITS
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let head = &fraction[..fraction.len().min(3)];
    format!("{:0<3}", head).parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hours_minutes_seconds() {
        assert_eq!(parse_timecode("0:00:04").unwrap(), 4_000);
        assert_eq!(parse_timecode("1:02:03").unwrap(), 3_723_000);
    }

    #[test]
    fn test_parse_fraction() {
        assert_eq!(parse_timecode("0:00:04.000").unwrap(), 4_000);
        assert_eq!(parse_timecode("0:00:04.5").unwrap(), 4_500);
        assert_eq!(parse_timecode("0:00:04.05").unwrap(), 4_050);
        assert_eq!(parse_timecode("0:00:04.1234567").unwrap(), 4_123);
    }

    #[test]
    fn test_parse_hours_minutes_only() {
        assert_eq!(parse_timecode("0:02").unwrap(), 120_000);
    }

    #[test]
    fn test_parse_days_and_sign() {
        assert_eq!(parse_timecode("1.00:00:01").unwrap(), 86_401_000);
        assert_eq!(parse_timecode("-0:00:02").unwrap(), -2_000);
        assert_eq!(parse_timecode("  0:00:01 ").unwrap(), 1_000);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in [
            "",
            "abc",
            "12",
            "0:60:00",
            "24:00:00",
            "0:00:61",
            "0:00:01.",
            "0:00:01.12345678",
            "0:00:00:00",
            "0:0a:00",
            "# Offset",
        ] {
            assert!(parse_timecode(bad).is_err(), "expected {:?} to fail", bad);
        }
    }

    #[test]
    fn test_format_position() {
        assert_eq!(format_position(Duration::ZERO), "0:00:00.000");
        assert_eq!(format_position(Duration::from_millis(3_723_045)), "1:02:03.045");
    }
}
