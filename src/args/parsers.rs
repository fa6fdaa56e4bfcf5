use std::time::Duration;

use super::types::{PositiveU64, PositiveUsize};
use crate::error::{AppError, AppResult, ValidationError};

pub(crate) fn parse_header(s: &str) -> Result<(String, String), ValidationError> {
    match s.split_once(':') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.trim().to_owned()))
        }
        Some(_) | None => Err(ValidationError::InvalidHeaderFormat {
            value: s.to_owned(),
        }),
    }
}

pub(super) fn parse_positive_u64(s: &str) -> AppResult<PositiveU64> {
    s.parse::<PositiveU64>().map_err(AppError::from)
}

pub(super) fn parse_positive_usize(s: &str) -> AppResult<PositiveUsize> {
    s.parse::<PositiveUsize>().map_err(AppError::from)
}

pub(super) fn parse_duration_arg(s: &str) -> AppResult<Duration> {
    parse_duration(s).map_err(AppError::from)
}

pub(super) fn parse_percent_arg(s: &str) -> AppResult<u64> {
    parse_percent_x100(s).map_err(AppError::from)
}

/// Parses `500ms`, `5s`, `2m`, `1h` or bare seconds.
///
/// # Errors
///
/// Returns an error for an empty, zero, overflowing or unit-less-but-invalid
/// value.
pub fn parse_duration(s: &str) -> Result<Duration, ValidationError> {
    let value = s.trim();
    if value.is_empty() {
        return Err(ValidationError::DurationEmpty);
    }

    let digits_len = value.chars().take_while(char::is_ascii_digit).count();
    if digits_len == 0 {
        return Err(ValidationError::InvalidDurationFormat {
            value: value.to_owned(),
        });
    }
    let (num_part, unit_part) = value.split_at(digits_len);
    let number: u64 = num_part
        .parse()
        .map_err(|err| ValidationError::InvalidDurationNumber {
            value: value.to_owned(),
            source: err,
        })?;

    let unit = if unit_part.is_empty() { "s" } else { unit_part };
    let duration = match unit {
        "ms" => Duration::from_millis(number),
        "s" => Duration::from_secs(number),
        "m" => Duration::from_secs(
            number
                .checked_mul(60)
                .ok_or(ValidationError::DurationOverflow)?,
        ),
        "h" => Duration::from_secs(
            number
                .checked_mul(3600)
                .ok_or(ValidationError::DurationOverflow)?,
        ),
        _ => {
            return Err(ValidationError::InvalidDurationUnit {
                unit: unit.to_owned(),
            });
        }
    };

    if duration.is_zero() {
        return Err(ValidationError::DurationZero);
    }
    Ok(duration)
}

/// Parses `5%`, `0.5%` or `12.25` into hundredths of a percent (`5%` = 500).
///
/// # Errors
///
/// Returns an error for more than two decimals, a malformed number, or a
/// value above 100%.
pub fn parse_percent_x100(s: &str) -> Result<u64, ValidationError> {
    let trimmed = s.trim();
    let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
    let invalid = || ValidationError::InvalidPercent {
        value: s.to_owned(),
    };

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let digits_only = |part: &str| part.chars().all(|ch| ch.is_ascii_digit());
    if whole.is_empty() || fraction.len() > 2 || !digits_only(whole) || !digits_only(fraction) {
        return Err(invalid());
    }
    let whole: u64 = whole.parse().map_err(|_parse| invalid())?;
    let fraction: u64 = match fraction.len() {
        0 => 0,
        1 => fraction
            .parse::<u64>()
            .map_err(|_parse| invalid())?
            .saturating_mul(10),
        _ => fraction.parse().map_err(|_parse| invalid())?,
    };
    let value = whole.saturating_mul(100).saturating_add(fraction);
    if value > 10_000 {
        return Err(ValidationError::PercentOutOfRange {
            value: s.to_owned(),
        });
    }
    Ok(value)
}
