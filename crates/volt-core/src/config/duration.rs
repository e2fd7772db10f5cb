use std::time::Duration;

use crate::error::{Result, VoltError};

/// Parse a duration such as `"3s"`, `"250ms"`, `"1m30s"` or `"2h"`.
///
/// A bare integer is taken as nanoseconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(VoltError::Config("empty duration".to_string()));
    }

    if let Ok(nanos) = input.parse::<u64>() {
        return Ok(Duration::from_nanos(nanos));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;

    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| VoltError::Config(format!("missing unit in duration '{}'", input)))?;
        if digits == 0 {
            return Err(VoltError::Config(format!("invalid duration '{}'", input)));
        }

        let value: f64 = rest[..digits]
            .parse()
            .map_err(|_| VoltError::Config(format!("invalid number in duration '{}'", input)))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let seconds = match unit {
            "ns" => value / 1e9,
            "us" | "µs" => value / 1e6,
            "ms" => value / 1e3,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            other => {
                return Err(VoltError::Config(format!(
                    "unknown unit '{}' in duration '{}'",
                    other, input
                )))
            }
        };

        total += Duration::from_secs_f64(seconds);
    }

    Ok(total)
}

/// Format a duration in the shortest unit that represents it exactly.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return format!("{}ns", duration.as_nanos());
    }
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }

    let secs = duration.as_secs();
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}
