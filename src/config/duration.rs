//! Hand-rolled parser for Go-style duration strings (`"30s"`, `"100ms"`,
//! `"1h30m"`).
//!
//! No dependency in this crate covers duration parsing, so this is a
//! small, self-contained parser for the tiny grammar the config format
//! actually needs, in the same spirit as the recorder's hand-rolled RFC
//! 3339 timestamp formatter.

use std::time::Duration;

/// Parses a Go-style duration string into a [`Duration`].
///
/// Accepts a sequence of `<number><unit>` segments (e.g. `"1h30m"`,
/// `"100ms"`, `"30s"`) with no separators between segments and no
/// whitespace. Supported units: `ns`, `us`, `ms`, `s`, `m`, `h`. The number
/// may contain a decimal point.
///
/// # Errors
///
/// Returns an error string if the input is empty, contains a segment with
/// no unit, an unknown unit, or a malformed number.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("duration string is empty".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| format!("duration '{trimmed}' is missing a unit"))?;

        if digits_end == 0 {
            return Err(format!("duration '{trimmed}' has a segment with no number"));
        }

        let number: f64 = rest[..digits_end]
            .parse()
            .map_err(|_| format!("duration '{trimmed}' has an invalid number"))?;

        let unit_start = digits_end;
        let unit_end = rest[unit_start..]
            .find(|c: char| c.is_ascii_digit())
            .map_or(rest.len(), |offset| unit_start + offset);

        let unit = &rest[unit_start..unit_end];
        let nanos_per_unit: f64 = match unit {
            "ns" => 1.0,
            "us" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60.0 * 1_000_000_000.0,
            "h" => 3_600.0 * 1_000_000_000.0,
            other => return Err(format!("duration '{trimmed}' has unknown unit '{other}'")),
        };

        let nanos = number * nanos_per_unit;
        if nanos < 0.0 {
            return Err(format!("duration '{trimmed}' cannot be negative"));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let segment = Duration::from_nanos(nanos as u64);
        total += segment;

        rest = &rest[unit_end..];
    }

    Ok(total)
}
