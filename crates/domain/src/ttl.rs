use chrono::Duration;
use passage_core::{AppError, AppResult};

const NANOS_PER_MICROSECOND: u128 = 1_000;
const NANOS_PER_MILLISECOND: u128 = 1_000_000;
const NANOS_PER_SECOND: u128 = 1_000_000_000;
const NANOS_PER_MINUTE: u128 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MINUTE;
const NANOS_PER_DAY: u128 = 24 * NANOS_PER_HOUR;

/// Parses a requested access duration such as `72h`, `1h30m`, `1.5h` or `2d`.
///
/// Parsing is done by `humantime`, so its units (`ns`, `us`, `ms`, `s`, `m`,
/// `h`, `d`, `w` and their long forms) are all accepted. Components with a
/// decimal point, which `humantime` rejects, are expanded to whole
/// nanoseconds first for the units `ns` through `d`. Every number needs a
/// unit. Empty, zero and overflowing values are rejected.
pub fn parse_ttl(value: &str) -> AppResult<Duration> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("ttl must not be empty".to_owned()));
    }

    let expanded = expand_fractions(trimmed).ok_or_else(|| invalid_ttl(value))?;
    let parsed = humantime::parse_duration(expanded.as_str()).map_err(|error| match error {
        humantime::DurationError::NumberOverflow => {
            AppError::Validation(format!("ttl '{value}' is out of range"))
        }
        other => AppError::Validation(format!("invalid ttl '{value}': {other}")),
    })?;

    if parsed.is_zero() {
        return Err(AppError::Validation(format!(
            "ttl '{value}' must be greater than zero"
        )));
    }

    Duration::from_std(parsed)
        .map_err(|_| AppError::Validation(format!("ttl '{value}' is out of range")))
}

/// Rewrites `<digits>.<digits><unit>` components as whole nanoseconds.
///
/// Values without a decimal point pass through untouched.
fn expand_fractions(value: &str) -> Option<String> {
    if !value.contains('.') {
        return Some(value.to_owned());
    }

    let mut components = Vec::new();
    let mut rest = value;
    while !rest.is_empty() {
        let number_len = rest
            .find(|character: char| !(character.is_ascii_digit() || character == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|character: char| character.is_ascii_digit() || character == '.')
            .unwrap_or(tail.len());
        let (unit, remainder) = tail.split_at(unit_len);
        let unit = unit.trim();

        if number.contains('.') {
            let nanos = fraction_nanos(number, unit_scale(unit)?)?;
            components.push(format!("{nanos}ns"));
        } else {
            components.push(format!("{number}{unit}"));
        }

        rest = remainder;
    }

    Some(components.join(" "))
}

fn unit_scale(unit: &str) -> Option<u128> {
    match unit {
        "d" => Some(NANOS_PER_DAY),
        "h" => Some(NANOS_PER_HOUR),
        "m" => Some(NANOS_PER_MINUTE),
        "s" => Some(NANOS_PER_SECOND),
        "ms" => Some(NANOS_PER_MILLISECOND),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICROSECOND),
        "ns" => Some(1),
        _ => None,
    }
}

fn fraction_nanos(number: &str, scale: u128) -> Option<u128> {
    let (whole, fraction) = number.split_once('.')?;
    if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
        return None;
    }

    let whole_value = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().ok()?
    };
    let mut nanos = whole_value.checked_mul(scale)?;

    // Digits finer than one nanosecond are truncated.
    let mut divisor: u128 = 10;
    for digit in fraction.chars() {
        if divisor > scale {
            break;
        }
        let digit = u128::from(digit.to_digit(10)?);
        nanos = nanos.checked_add(digit * scale / divisor)?;
        divisor *= 10;
    }

    Some(nanos)
}

fn invalid_ttl(value: &str) -> AppError {
    AppError::Validation(format!("invalid ttl '{value}'"))
}
