use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};

const EPOCH_SECONDS_CUTOFF: i128 = 100_000_000_000;
const EPOCH_MILLIS_CUTOFF: i128 = 100_000_000_000_000;
const EPOCH_MICROS_CUTOFF: i128 = 100_000_000_000_000_000;
const NANOS_PER_MILLI: i128 = 1_000_000;
/// 9999-12-31T23:59:59.999Z
const MAX_SUPPORTED_UNIX_MS: u64 = 253_402_300_799_999;

#[must_use]
pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            u64::try_from(duration.as_millis()).unwrap_or(MAX_SUPPORTED_UNIX_MS)
        })
}

/// Accepts RFC 3339 strings and integer or fractional epoch values in
/// seconds, milliseconds, microseconds or nanoseconds.
pub fn parse_timestamp_to_unix_ms(raw: &str) -> Result<u64> {
    let candidate = raw.trim();
    if candidate.is_empty() {
        bail!("timestamp input is empty");
    }

    if let Ok(epoch_raw) = candidate.parse::<i128>() {
        return epoch_to_unix_ms(epoch_raw);
    }

    if let Ok(epoch_float) = candidate.parse::<f64>() {
        return fractional_epoch_to_unix_ms(epoch_float);
    }

    if let Ok(parsed) = OffsetDateTime::parse(candidate, &Rfc3339) {
        return to_unix_ms(parsed);
    }

    bail!("unsupported timestamp format: {candidate}");
}

/// Reads a timestamp out of a JSON field that may hold a number or a string.
pub fn timestamp_from_value(value: &Value) -> Result<u64> {
    match value {
        Value::Number(number) => {
            if let Some(integer) = number.as_u64() {
                epoch_to_unix_ms(i128::from(integer))
            } else if let Some(float) = number.as_f64() {
                fractional_epoch_to_unix_ms(float)
            } else {
                bail!("unsupported numeric timestamp: {number}")
            }
        }
        Value::String(text) => parse_timestamp_to_unix_ms(text),
        other => bail!("timestamp must be a number or string, found {other}"),
    }
}

#[must_use]
pub fn format_unix_ms(timestamp_unix_ms: u64) -> String {
    let dt = to_utc_datetime(timestamp_unix_ms);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.millisecond()
    )
}

/// UTC calendar date (`YYYY-MM-DD`) used for archive partitioning.
#[must_use]
pub fn calendar_date(timestamp_unix_ms: u64) -> String {
    let dt = to_utc_datetime(timestamp_unix_ms);
    format!(
        "{:04}-{:02}-{:02}",
        dt.year(),
        u8::from(dt.month()),
        dt.day()
    )
}

/// Validates a user supplied `YYYY-MM-DD` date and returns it unchanged.
pub fn parse_calendar_date(raw: &str) -> Result<String> {
    let candidate = raw.trim();
    Date::parse(candidate, format_description!("[year]-[month]-[day]"))
        .with_context(|| format!("invalid calendar date `{candidate}` (expected YYYY-MM-DD)"))?;
    Ok(candidate.to_string())
}

fn to_utc_datetime(timestamp_unix_ms: u64) -> OffsetDateTime {
    let clamped = i128::from(timestamp_unix_ms.min(MAX_SUPPORTED_UNIX_MS));
    OffsetDateTime::from_unix_timestamp_nanos(clamped * NANOS_PER_MILLI)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .to_offset(UtcOffset::UTC)
}

fn epoch_to_unix_ms(epoch_raw: i128) -> Result<u64> {
    if epoch_raw < 0 {
        bail!("negative epoch values are not supported");
    }

    let epoch_ms = if epoch_raw < EPOCH_SECONDS_CUTOFF {
        epoch_raw.checked_mul(1_000)
    } else if epoch_raw < EPOCH_MILLIS_CUTOFF {
        Some(epoch_raw)
    } else if epoch_raw < EPOCH_MICROS_CUTOFF {
        Some(epoch_raw / 1_000)
    } else {
        Some(epoch_raw / 1_000_000)
    }
    .ok_or_else(|| anyhow::anyhow!("epoch conversion overflow"))?;

    bounded_unix_ms(epoch_ms)
}

fn fractional_epoch_to_unix_ms(epoch: f64) -> Result<u64> {
    if !epoch.is_finite() {
        bail!("non-finite epoch values are not supported");
    }
    if epoch < 0.0 {
        bail!("negative epoch values are not supported");
    }

    // Fractional epochs only show up as seconds in practice.
    if epoch >= EPOCH_SECONDS_CUTOFF as f64 {
        return epoch_to_unix_ms(epoch as i128);
    }
    bounded_unix_ms((epoch * 1_000.0).floor() as i128)
}

fn to_unix_ms(parsed: OffsetDateTime) -> Result<u64> {
    if parsed.unix_timestamp() < 0 {
        bail!("timestamps before 1970-01-01T00:00:00Z are not supported");
    }

    bounded_unix_ms(parsed.unix_timestamp_nanos() / NANOS_PER_MILLI)
}

fn bounded_unix_ms(unix_ms: i128) -> Result<u64> {
    let unix_ms = u64::try_from(unix_ms)
        .map_err(|_| anyhow::anyhow!("timestamp exceeds supported unix millisecond range"))?;
    if unix_ms > MAX_SUPPORTED_UNIX_MS {
        bail!("timestamp exceeds supported unix millisecond range");
    }
    Ok(unix_ms)
}
