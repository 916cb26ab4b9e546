//! Type-to-type value conversion with defined failure modes.
//!
//! A conversion either succeeds, fails because the value does not fit the
//! target (`ConversionFailed` / `ArithmeticOverflow`), or fails because no
//! conversion path exists between the two types (`UnsupportedConversion`).

use crate::expression::error::{ExpressionError, ExpressionResult};
use crate::value::cell::MONEY_SCALE;
use crate::value::{DataType, Value};
use chrono::{Duration, NaiveDate, NaiveDateTime};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Day zero for numeric <-> datetime conversions.
pub fn base_date() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Fractional days between day zero and `dt`.
pub fn datetime_to_days(dt: &NaiveDateTime) -> f64 {
    (*dt - base_date()).num_milliseconds() as f64 / MILLIS_PER_DAY
}

pub fn days_to_datetime(days: f64) -> ExpressionResult<NaiveDateTime> {
    let millis = (days * MILLIS_PER_DAY).round();
    if !millis.is_finite() || millis.abs() > i64::MAX as f64 / 2.0 {
        return Err(ExpressionError::overflow(DataType::DateTime));
    }
    base_date()
        .checked_add_signed(Duration::milliseconds(millis as i64))
        .ok_or_else(|| ExpressionError::overflow(DataType::DateTime))
}

pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn parse_uniqueidentifier(text: &str) -> Option<u128> {
    let hex: String = text
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .chars()
        .filter(|c| *c != '-')
        .collect();
    if hex.len() != 32 {
        return None;
    }
    u128::from_str_radix(&hex, 16).ok()
}

fn same_family(value: &Value, target: DataType) -> bool {
    match value {
        Value::String(_) => target.is_character(),
        Value::Binary(_) => target.is_binary(),
        other => other.data_type() == Some(target),
    }
}

/// Convert `value` to `target`.
pub fn convert(value: Value, target: DataType) -> ExpressionResult<Value> {
    if value.is_null() || same_family(&value, target) {
        return Ok(value);
    }
    let source = value.data_type().unwrap_or(DataType::NVarChar);
    match target {
        DataType::Bit => to_bit(value, source),
        DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt => {
            to_integer(value, source, target)
        }
        DataType::Real | DataType::Float | DataType::Numeric => to_floating(value, source, target),
        DataType::Money => to_money(value, source),
        DataType::NChar | DataType::NVarChar | DataType::NText => Ok(Value::String(match value {
            Value::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            other => other.to_string(),
        })),
        DataType::Binary | DataType::VarBinary | DataType::Image => to_binary(value, source, target),
        DataType::DateTime => to_datetime(value, source),
        DataType::UniqueIdentifier => match &value {
            Value::String(s) => parse_uniqueidentifier(s)
                .map(Value::UniqueIdentifier)
                .ok_or_else(|| ExpressionError::conversion_failed(s, target)),
            Value::Binary(bytes) if bytes.len() == 16 => {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(bytes);
                Ok(Value::UniqueIdentifier(u128::from_be_bytes(raw)))
            }
            _ => Err(ExpressionError::unsupported_conversion(source, target)),
        },
        DataType::RowVersion => match &value {
            Value::Binary(bytes) if bytes.len() <= 8 => {
                let mut raw = [0u8; 8];
                raw[8 - bytes.len()..].copy_from_slice(bytes);
                Ok(Value::RowVersion(u64::from_be_bytes(raw)))
            }
            Value::BigInt(v) if *v >= 0 => Ok(Value::RowVersion(*v as u64)),
            Value::Int(v) if *v >= 0 => Ok(Value::RowVersion(*v as u64)),
            _ => Err(ExpressionError::unsupported_conversion(source, target)),
        },
    }
}

/// Whether some value of `from` may convert to `to`. Used to reject an
/// explicit conversion before any value is seen.
pub fn can_convert(from: DataType, to: DataType) -> bool {
    if from == to || from.is_character() || to.is_character() {
        return true;
    }
    let numeric_like = |t: DataType| t.is_numeric() || t == DataType::Bit;
    match to {
        DataType::Bit | DataType::Real | DataType::Float | DataType::Numeric | DataType::Money => {
            numeric_like(from) || (from.is_date() && to != DataType::Bit && to != DataType::Money)
        }
        DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt => {
            numeric_like(from) || from.is_date() || from.is_binary() || from == DataType::RowVersion
        }
        DataType::Binary | DataType::VarBinary | DataType::Image => {
            from.is_integer()
                || from.is_binary()
                || matches!(from, DataType::Bit | DataType::UniqueIdentifier | DataType::RowVersion)
        }
        DataType::DateTime => from.is_numeric(),
        DataType::UniqueIdentifier => from.is_binary(),
        DataType::RowVersion => from.is_binary() || matches!(from, DataType::Int | DataType::BigInt),
        DataType::NChar | DataType::NVarChar | DataType::NText => true,
    }
}

fn to_bit(value: Value, source: DataType) -> ExpressionResult<Value> {
    match &value {
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" => Ok(Value::Bit(true)),
            "0" | "false" => Ok(Value::Bit(false)),
            _ => Err(ExpressionError::conversion_failed(s, DataType::Bit)),
        },
        other => other
            .as_f64()
            .map(|v| Value::Bit(v != 0.0))
            .ok_or_else(|| ExpressionError::unsupported_conversion(source, DataType::Bit)),
    }
}

fn integer_in_range(v: i64, target: DataType) -> ExpressionResult<Value> {
    let overflow = || ExpressionError::overflow(target);
    Ok(match target {
        DataType::TinyInt => Value::TinyInt(u8::try_from(v).map_err(|_| overflow())?),
        DataType::SmallInt => Value::SmallInt(i16::try_from(v).map_err(|_| overflow())?),
        DataType::Int => Value::Int(i32::try_from(v).map_err(|_| overflow())?),
        _ => Value::BigInt(v),
    })
}

fn float_to_integer(v: f64, target: DataType) -> ExpressionResult<Value> {
    let truncated = v.trunc();
    if !truncated.is_finite() || truncated < i64::MIN as f64 || truncated > i64::MAX as f64 {
        return Err(ExpressionError::overflow(target));
    }
    integer_in_range(truncated as i64, target)
}

fn to_integer(value: Value, source: DataType, target: DataType) -> ExpressionResult<Value> {
    match &value {
        Value::String(s) => {
            let parsed = s
                .trim()
                .parse::<i64>()
                .map_err(|_| ExpressionError::conversion_failed(s, target))?;
            integer_in_range(parsed, target)
        }
        Value::Money(m) => integer_in_range(m / MONEY_SCALE, target),
        Value::DateTime(dt) => float_to_integer(datetime_to_days(dt).round(), target),
        Value::RowVersion(v) => {
            integer_in_range(i64::try_from(*v).map_err(|_| ExpressionError::overflow(target))?, target)
        }
        Value::Binary(bytes) => {
            let tail = &bytes[bytes.len().saturating_sub(8)..];
            let mut raw = [0u8; 8];
            raw[8 - tail.len()..].copy_from_slice(tail);
            integer_in_range(i64::from_be_bytes(raw), target)
        }
        other => {
            if let Some(i) = other.as_i64() {
                integer_in_range(i, target)
            } else if let Some(f) = other.as_f64() {
                float_to_integer(f, target)
            } else {
                Err(ExpressionError::unsupported_conversion(source, target))
            }
        }
    }
}

fn to_floating(value: Value, source: DataType, target: DataType) -> ExpressionResult<Value> {
    let f = match &value {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ExpressionError::conversion_failed(s, target))?,
        Value::DateTime(dt) => datetime_to_days(dt),
        other => other
            .as_f64()
            .ok_or_else(|| ExpressionError::unsupported_conversion(source, target))?,
    };
    Ok(match target {
        DataType::Real => {
            if f.is_finite() && f.abs() > f32::MAX as f64 {
                return Err(ExpressionError::overflow(target));
            }
            Value::Real(f as f32)
        }
        DataType::Numeric => Value::Numeric(f),
        _ => Value::Float(f),
    })
}

fn to_money(value: Value, source: DataType) -> ExpressionResult<Value> {
    if let Some(i) = value.as_i64() {
        return i
            .checked_mul(MONEY_SCALE)
            .map(Value::Money)
            .ok_or_else(|| ExpressionError::overflow(DataType::Money));
    }
    let f = match &value {
        Value::String(s) => s
            .trim()
            .trim_start_matches('$')
            .parse::<f64>()
            .map_err(|_| ExpressionError::conversion_failed(s, DataType::Money))?,
        other => other
            .as_f64()
            .ok_or_else(|| ExpressionError::unsupported_conversion(source, DataType::Money))?,
    };
    let scaled = (f * MONEY_SCALE as f64).round();
    if !scaled.is_finite() || scaled.abs() >= i64::MAX as f64 {
        return Err(ExpressionError::overflow(DataType::Money));
    }
    Ok(Value::Money(scaled as i64))
}

fn to_binary(value: Value, source: DataType, target: DataType) -> ExpressionResult<Value> {
    let bytes = match value {
        Value::String(s) => s.into_bytes(),
        Value::Bit(b) => vec![b as u8],
        Value::TinyInt(v) => vec![v],
        Value::SmallInt(v) => v.to_be_bytes().to_vec(),
        Value::Int(v) => v.to_be_bytes().to_vec(),
        Value::BigInt(v) => v.to_be_bytes().to_vec(),
        Value::UniqueIdentifier(id) => id.to_be_bytes().to_vec(),
        Value::RowVersion(v) => v.to_be_bytes().to_vec(),
        _ => return Err(ExpressionError::unsupported_conversion(source, target)),
    };
    Ok(Value::Binary(bytes))
}

fn to_datetime(value: Value, source: DataType) -> ExpressionResult<Value> {
    match &value {
        Value::String(s) => parse_datetime(s)
            .map(Value::DateTime)
            .ok_or_else(|| ExpressionError::conversion_failed(s, DataType::DateTime)),
        Value::Bit(_) | Value::Binary(_) | Value::UniqueIdentifier(_) | Value::RowVersion(_) => {
            Err(ExpressionError::unsupported_conversion(source, DataType::DateTime))
        }
        other => match other.as_f64() {
            Some(days) => days_to_datetime(days).map(Value::DateTime),
            None => Err(ExpressionError::unsupported_conversion(source, DataType::DateTime)),
        },
    }
}
