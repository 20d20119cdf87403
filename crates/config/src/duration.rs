//! Go-style duration strings such as `"500ms"`, `"30s"`, or `"1h30m"`.

use crate::DurationError;
use std::time::Duration;

/// Parses a duration string made of one or more `<number><unit>` pairs.
///
/// Units are `ns`, `us`, `µs`, `ms`, `s`, `m`, and `h`. Numbers may have a fractional part.
/// A bare `"0"` is accepted. Negative durations are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let original = input;
    let mut remaining = input.trim();
    if remaining.is_empty() {
        return Err(DurationError::Empty);
    }
    if remaining == "0" {
        return Ok(Duration::ZERO);
    }
    if let Some(stripped) = remaining.strip_prefix('+') {
        remaining = stripped;
    } else if remaining.starts_with('-') {
        return Err(DurationError::Negative(original.to_string()));
    }

    let mut total = 0f64;
    while !remaining.is_empty() {
        let number_end = remaining
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(remaining.len());
        if number_end == 0 {
            return Err(DurationError::Invalid(original.to_string()));
        }
        let value: f64 = remaining[..number_end]
            .parse()
            .map_err(|_| DurationError::Invalid(original.to_string()))?;
        remaining = &remaining[number_end..];

        let unit_end = remaining
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(remaining.len());
        let nanos_per_unit = match &remaining[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(DurationError::MissingUnit(original.to_string())),
            unit => {
                return Err(DurationError::UnknownUnit(
                    unit.to_string(),
                    original.to_string(),
                ))
            }
        };
        remaining = &remaining[unit_end..];
        total += value * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(DurationError::Overflow(original.to_string()));
    }
    Ok(Duration::from_nanos(total.round() as u64))
}

/// Formats a duration using the largest units that represent it exactly.
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return String::from("0s");
    }
    if duration.subsec_nanos() != 0 {
        let nanos = duration.as_nanos();
        return if nanos % 1_000_000 == 0 {
            format!("{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            format!("{}us", nanos / 1_000)
        } else {
            format!("{}ns", nanos)
        };
    }

    let mut seconds = duration.as_secs();
    let mut formatted = String::new();
    let hours = seconds / 3600;
    if hours > 0 {
        formatted.push_str(&format!("{}h", hours));
        seconds %= 3600;
    }
    let minutes = seconds / 60;
    if minutes > 0 {
        formatted.push_str(&format!("{}m", minutes));
        seconds %= 60;
    }
    if seconds > 0 {
        formatted.push_str(&format!("{}s", seconds));
    }
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(parse_duration("30s")?, Duration::from_secs(30));
        assert_eq!(parse_duration("60s")?, Duration::from_secs(60));
        assert_eq!(parse_duration("500ms")?, Duration::from_millis(500));
        assert_eq!(parse_duration("1m30s")?, Duration::from_secs(90));
        assert_eq!(parse_duration("2h")?, Duration::from_secs(7200));
        assert_eq!(parse_duration("1.5s")?, Duration::from_millis(1500));
        assert_eq!(parse_duration("0")?, Duration::ZERO);

        Ok(())
    }

    #[test]
    fn test_parse_duration_errors() {
        assert!(matches!(parse_duration(""), Err(DurationError::Empty)));
        assert!(matches!(
            parse_duration("30"),
            Err(DurationError::MissingUnit(_))
        ));
        assert!(matches!(
            parse_duration("30d"),
            Err(DurationError::UnknownUnit(_, _))
        ));
        assert!(matches!(
            parse_duration("-5s"),
            Err(DurationError::Negative(_))
        ));
        assert!(matches!(
            parse_duration("s"),
            Err(DurationError::Invalid(_))
        ));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }
}
