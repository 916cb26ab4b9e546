//! Built-in scalar functions and the registry of user-defined routines.
//!
//! User routines are native closures registered with a fixed signature;
//! arguments are converted to the declared parameter types before the call
//! and the result is converted to the declared return type after it.

use crate::context::Culture;
use crate::expression::error::{ErrorKind, ExpressionError, ExpressionResult};
use crate::value::convert::base_date;
use crate::value::{compare_values, convert, DataType, Value};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Date and time units accepted by `DATEADD`, `DATEDIFF`, `DATEPART` and `DATENAME`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatePart {
    Year,
    Quarter,
    Month,
    DayOfYear,
    Day,
    Week,
    Weekday,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl DatePart {
    pub fn parse(name: &str) -> Option<DatePart> {
        Some(match name.trim().to_ascii_lowercase().as_str() {
            "year" | "yy" | "yyyy" => DatePart::Year,
            "quarter" | "qq" | "q" => DatePart::Quarter,
            "month" | "mm" | "m" => DatePart::Month,
            "dayofyear" | "dy" | "y" => DatePart::DayOfYear,
            "day" | "dd" | "d" => DatePart::Day,
            "week" | "wk" | "ww" => DatePart::Week,
            "weekday" | "dw" => DatePart::Weekday,
            "hour" | "hh" => DatePart::Hour,
            "minute" | "mi" | "n" => DatePart::Minute,
            "second" | "ss" | "s" => DatePart::Second,
            "millisecond" | "ms" => DatePart::Millisecond,
            _ => return None,
        })
    }

    /// Length of the unit in milliseconds for the fixed-length parts.
    fn fixed_millis(self) -> Option<i64> {
        match self {
            DatePart::DayOfYear | DatePart::Day | DatePart::Weekday => Some(86_400_000),
            DatePart::Week => Some(7 * 86_400_000),
            DatePart::Hour => Some(3_600_000),
            DatePart::Minute => Some(60_000),
            DatePart::Second => Some(1_000),
            DatePart::Millisecond => Some(1),
            DatePart::Year | DatePart::Quarter | DatePart::Month => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFunction {
    Abs,
    Ceiling,
    Floor,
    Round,
    Power,
    Sqrt,
    Sign,
    Len,
    Upper,
    Lower,
    LTrim,
    RTrim,
    Substring,
    Replace,
    CharIndex,
    Left,
    Right,
    DateAdd,
    DateDiff,
    DatePart,
    DateName,
    GetDate,
    NewId,
    LastIdentity,
    Iif,
}

const BUILTINS: [BuiltinFunction; 25] = [
    BuiltinFunction::Abs,
    BuiltinFunction::Ceiling,
    BuiltinFunction::Floor,
    BuiltinFunction::Round,
    BuiltinFunction::Power,
    BuiltinFunction::Sqrt,
    BuiltinFunction::Sign,
    BuiltinFunction::Len,
    BuiltinFunction::Upper,
    BuiltinFunction::Lower,
    BuiltinFunction::LTrim,
    BuiltinFunction::RTrim,
    BuiltinFunction::Substring,
    BuiltinFunction::Replace,
    BuiltinFunction::CharIndex,
    BuiltinFunction::Left,
    BuiltinFunction::Right,
    BuiltinFunction::DateAdd,
    BuiltinFunction::DateDiff,
    BuiltinFunction::DatePart,
    BuiltinFunction::DateName,
    BuiltinFunction::GetDate,
    BuiltinFunction::NewId,
    BuiltinFunction::LastIdentity,
    BuiltinFunction::Iif,
];

impl BuiltinFunction {
    pub fn from_name(name: &str) -> Option<BuiltinFunction> {
        BUILTINS
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinFunction::Abs => "ABS",
            BuiltinFunction::Ceiling => "CEILING",
            BuiltinFunction::Floor => "FLOOR",
            BuiltinFunction::Round => "ROUND",
            BuiltinFunction::Power => "POWER",
            BuiltinFunction::Sqrt => "SQRT",
            BuiltinFunction::Sign => "SIGN",
            BuiltinFunction::Len => "LEN",
            BuiltinFunction::Upper => "UPPER",
            BuiltinFunction::Lower => "LOWER",
            BuiltinFunction::LTrim => "LTRIM",
            BuiltinFunction::RTrim => "RTRIM",
            BuiltinFunction::Substring => "SUBSTRING",
            BuiltinFunction::Replace => "REPLACE",
            BuiltinFunction::CharIndex => "CHARINDEX",
            BuiltinFunction::Left => "LEFT",
            BuiltinFunction::Right => "RIGHT",
            BuiltinFunction::DateAdd => "DATEADD",
            BuiltinFunction::DateDiff => "DATEDIFF",
            BuiltinFunction::DatePart => "DATEPART",
            BuiltinFunction::DateName => "DATENAME",
            BuiltinFunction::GetDate => "GETDATE",
            BuiltinFunction::NewId => "NEWID",
            BuiltinFunction::LastIdentity => "LASTIDENTITY",
            BuiltinFunction::Iif => "IIF",
        }
    }

    /// Minimum and maximum argument counts.
    pub fn arity(&self) -> (usize, usize) {
        match self {
            BuiltinFunction::GetDate | BuiltinFunction::NewId => (0, 0),
            BuiltinFunction::Abs
            | BuiltinFunction::Ceiling
            | BuiltinFunction::Floor
            | BuiltinFunction::Sqrt
            | BuiltinFunction::Sign
            | BuiltinFunction::Len
            | BuiltinFunction::Upper
            | BuiltinFunction::Lower
            | BuiltinFunction::LTrim
            | BuiltinFunction::RTrim
            | BuiltinFunction::LastIdentity => (1, 1),
            BuiltinFunction::Round
            | BuiltinFunction::Power
            | BuiltinFunction::Left
            | BuiltinFunction::Right
            | BuiltinFunction::DatePart
            | BuiltinFunction::DateName => (2, 2),
            BuiltinFunction::CharIndex => (2, 3),
            BuiltinFunction::Substring
            | BuiltinFunction::Replace
            | BuiltinFunction::DateAdd
            | BuiltinFunction::DateDiff
            | BuiltinFunction::Iif => (3, 3),
        }
    }

    pub fn check_arity(&self, actual: usize) -> ExpressionResult<()> {
        let (min, max) = self.arity();
        if actual < min || actual > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            };
            return Err(ExpressionError::arity(self.name(), expected, actual));
        }
        Ok(())
    }

    /// Functions whose value changes between calls with identical arguments.
    pub fn is_volatile(&self) -> bool {
        matches!(
            self,
            BuiltinFunction::GetDate | BuiltinFunction::NewId | BuiltinFunction::LastIdentity
        )
    }

    /// Functions whose first argument is a date-part keyword.
    pub fn takes_date_part(&self) -> bool {
        matches!(
            self,
            BuiltinFunction::DateAdd
                | BuiltinFunction::DateDiff
                | BuiltinFunction::DatePart
                | BuiltinFunction::DateName
        )
    }

    /// Result type for the given argument types. `LASTIDENTITY` takes its
    /// type from the catalog and is resolved by the caller.
    pub fn result_type(&self, args: &[DataType]) -> ExpressionResult<DataType> {
        let name = self.name();
        let numeric = |i: usize| -> ExpressionResult<DataType> {
            let t = args[i];
            if t.is_numeric() || t == DataType::Bit || t.is_character() {
                Ok(if t.is_character() { DataType::Float } else { t })
            } else {
                Err(ExpressionError::type_mismatch(DataType::Float, t, name))
            }
        };
        let integer = |i: usize| -> ExpressionResult<()> {
            let t = args[i];
            if t.is_numeric() || t == DataType::Bit || t.is_character() {
                Ok(())
            } else {
                Err(ExpressionError::type_mismatch(DataType::Int, t, name))
            }
        };
        let date = |i: usize| -> ExpressionResult<()> {
            let t = args[i];
            if t.is_date() || t.is_character() || t.is_numeric() {
                Ok(())
            } else {
                Err(ExpressionError::type_mismatch(DataType::DateTime, t, name))
            }
        };

        Ok(match self {
            BuiltinFunction::Abs
            | BuiltinFunction::Ceiling
            | BuiltinFunction::Floor
            | BuiltinFunction::Sign => numeric(0)?.promoted(),
            BuiltinFunction::Round => {
                integer(1)?;
                numeric(0)?.promoted()
            }
            BuiltinFunction::Power => {
                numeric(1)?;
                numeric(0)?.promoted()
            }
            BuiltinFunction::Sqrt => {
                numeric(0)?;
                DataType::Float
            }
            BuiltinFunction::Len => DataType::Int,
            BuiltinFunction::Upper
            | BuiltinFunction::Lower
            | BuiltinFunction::LTrim
            | BuiltinFunction::RTrim
            | BuiltinFunction::Replace => DataType::NVarChar,
            BuiltinFunction::Substring => {
                integer(1)?;
                integer(2)?;
                DataType::NVarChar
            }
            BuiltinFunction::Left | BuiltinFunction::Right => {
                integer(1)?;
                DataType::NVarChar
            }
            BuiltinFunction::CharIndex => {
                if args.len() == 3 {
                    integer(2)?;
                }
                DataType::Int
            }
            BuiltinFunction::DateAdd => {
                integer(1)?;
                date(2)?;
                DataType::DateTime
            }
            BuiltinFunction::DateDiff => {
                date(1)?;
                date(2)?;
                DataType::Int
            }
            BuiltinFunction::DatePart => {
                date(1)?;
                DataType::Int
            }
            BuiltinFunction::DateName => {
                date(1)?;
                DataType::NVarChar
            }
            BuiltinFunction::GetDate => DataType::DateTime,
            BuiltinFunction::NewId => DataType::UniqueIdentifier,
            BuiltinFunction::LastIdentity => DataType::BigInt,
            BuiltinFunction::Iif => {
                if args[0] != DataType::Bit {
                    return Err(ExpressionError::type_mismatch(DataType::Bit, args[0], name));
                }
                args[1]
                    .max_type(args[2])
                    .ok_or_else(|| ExpressionError::type_mismatch(args[1], args[2], name))?
            }
        })
    }

    /// Evaluate over already computed argument values. For the date
    /// functions `args[0]` is the date-part keyword and `date_part` its
    /// parsed form.
    pub fn evaluate(
        &self,
        args: &[Value],
        date_part: Option<DatePart>,
        result_type: DataType,
        culture: &Culture,
    ) -> ExpressionResult<Value> {
        match self {
            BuiltinFunction::GetDate => {
                return Ok(Value::DateTime(chrono::Local::now().naive_local()))
            }
            BuiltinFunction::NewId => return Ok(Value::UniqueIdentifier(new_id())),
            BuiltinFunction::Iif => {
                let pick = if args[0].as_bool() == Some(true) { 1 } else { 2 };
                return convert(args[pick].clone(), result_type);
            }
            BuiltinFunction::LastIdentity => {
                return Err(ExpressionError::evaluation(
                    "LASTIDENTITY is resolved against the catalog",
                ))
            }
            _ => {}
        }

        let values = if self.takes_date_part() { &args[1..] } else { args };
        if values.iter().any(Value::is_null) {
            return Ok(Value::Null);
        }
        let cs = culture.case_sensitive;

        match self {
            BuiltinFunction::Abs => {
                let v = &values[0];
                let negative = compare_values(v, &Value::Int(0), true)? == Some(std::cmp::Ordering::Less);
                let v = if negative {
                    crate::value::arith::negate(v.clone())?
                } else {
                    v.clone()
                };
                convert(v, result_type)
            }
            BuiltinFunction::Ceiling | BuiltinFunction::Floor => {
                if values[0].as_i64().is_some() {
                    return convert(values[0].clone(), result_type);
                }
                let f = float_arg(&values[0])?;
                let r = if *self == BuiltinFunction::Ceiling {
                    f.ceil()
                } else {
                    f.floor()
                };
                convert(Value::Float(r), result_type)
            }
            BuiltinFunction::Round => {
                let digits = int_arg(&values[1])?;
                if let Some(v) = values[0].as_i64() {
                    return convert(Value::BigInt(round_integer(v, digits)?), result_type);
                }
                let f = float_arg(&values[0])?;
                let scale = 10f64.powi(digits.clamp(-308, 308) as i32);
                convert(Value::Float((f * scale).round() / scale), result_type)
            }
            BuiltinFunction::Power => {
                let r = float_arg(&values[0])?.powf(float_arg(&values[1])?);
                if !r.is_finite() {
                    return Err(ExpressionError::overflow(result_type));
                }
                convert(Value::Float(r), result_type)
            }
            BuiltinFunction::Sqrt => {
                let f = float_arg(&values[0])?;
                if f < 0.0 {
                    return Err(ExpressionError::evaluation(format!(
                        "SQRT of negative value {}",
                        f
                    )));
                }
                Ok(Value::Float(f.sqrt()))
            }
            BuiltinFunction::Sign => {
                let sign = match compare_values(&values[0], &Value::Int(0), true)? {
                    Some(std::cmp::Ordering::Less) => -1,
                    Some(std::cmp::Ordering::Greater) => 1,
                    _ => 0,
                };
                convert(Value::Int(sign), result_type)
            }
            BuiltinFunction::Len => {
                let s = text_arg(&values[0])?;
                Ok(Value::Int(s.trim_end_matches(' ').chars().count() as i32))
            }
            BuiltinFunction::Upper => Ok(Value::String(text_arg(&values[0])?.to_uppercase())),
            BuiltinFunction::Lower => Ok(Value::String(text_arg(&values[0])?.to_lowercase())),
            BuiltinFunction::LTrim => Ok(Value::String(
                text_arg(&values[0])?.trim_start_matches(' ').to_string(),
            )),
            BuiltinFunction::RTrim => Ok(Value::String(
                text_arg(&values[0])?.trim_end_matches(' ').to_string(),
            )),
            BuiltinFunction::Substring => {
                let chars: Vec<char> = text_arg(&values[0])?.chars().collect();
                let start = int_arg(&values[1])?;
                let length = non_negative(self, int_arg(&values[2])?)?;
                let first = start.saturating_sub(1);
                let end = first.saturating_add(length);
                let lo = first.clamp(0, chars.len() as i64) as usize;
                let hi = end.clamp(0, chars.len() as i64) as usize;
                Ok(Value::String(if lo < hi {
                    chars[lo..hi].iter().collect()
                } else {
                    String::new()
                }))
            }
            BuiltinFunction::Replace => Ok(Value::String(replace_text(
                &text_arg(&values[0])?,
                &text_arg(&values[1])?,
                &text_arg(&values[2])?,
                cs,
            ))),
            BuiltinFunction::CharIndex => {
                let needle: Vec<char> = text_arg(&values[0])?.chars().collect();
                let hay: Vec<char> = text_arg(&values[1])?.chars().collect();
                let from = match values.get(2) {
                    Some(v) => (int_arg(v)? - 1).max(0) as usize,
                    None => 0,
                };
                let found = find_chars(&hay, &needle, from, cs).map_or(0, |p| p + 1);
                Ok(Value::Int(found as i32))
            }
            BuiltinFunction::Left | BuiltinFunction::Right => {
                let chars: Vec<char> = text_arg(&values[0])?.chars().collect();
                let n = (non_negative(self, int_arg(&values[1])?)? as usize).min(chars.len());
                let slice = if *self == BuiltinFunction::Left {
                    &chars[..n]
                } else {
                    &chars[chars.len() - n..]
                };
                Ok(Value::String(slice.iter().collect()))
            }
            BuiltinFunction::DateAdd => {
                let part = require_part(self, date_part)?;
                let n = int_arg(&values[0])?;
                date_add(part, n, date_arg(&values[1])?).map(Value::DateTime)
            }
            BuiltinFunction::DateDiff => {
                let part = require_part(self, date_part)?;
                let diff = date_diff(part, &date_arg(&values[0])?, &date_arg(&values[1])?);
                i32::try_from(diff)
                    .map(Value::Int)
                    .map_err(|_| ExpressionError::overflow(DataType::Int))
            }
            BuiltinFunction::DatePart => {
                let part = require_part(self, date_part)?;
                Ok(Value::Int(date_part_of(part, &date_arg(&values[0])?)))
            }
            BuiltinFunction::DateName => {
                let part = require_part(self, date_part)?;
                let dt = date_arg(&values[0])?;
                Ok(Value::String(match part {
                    DatePart::Month => culture.month_names[dt.month0() as usize].clone(),
                    DatePart::Weekday => {
                        culture.day_names[dt.weekday().num_days_from_sunday() as usize].clone()
                    }
                    other => date_part_of(other, &dt).to_string(),
                }))
            }
            BuiltinFunction::GetDate
            | BuiltinFunction::NewId
            | BuiltinFunction::LastIdentity
            | BuiltinFunction::Iif => unreachable!("handled above"),
        }
    }
}

fn require_part(function: &BuiltinFunction, part: Option<DatePart>) -> ExpressionResult<DatePart> {
    part.ok_or_else(|| {
        ExpressionError::evaluation(format!("{} requires a date part", function.name()))
    })
}

fn non_negative(function: &BuiltinFunction, n: i64) -> ExpressionResult<i64> {
    if n < 0 {
        return Err(ExpressionError::evaluation(format!(
            "Invalid length parameter {} passed to {}",
            n,
            function.name()
        )));
    }
    Ok(n)
}

fn int_arg(value: &Value) -> ExpressionResult<i64> {
    convert(value.clone(), DataType::BigInt)?
        .as_i64()
        .ok_or_else(|| ExpressionError::conversion_failed(value, DataType::BigInt))
}

fn float_arg(value: &Value) -> ExpressionResult<f64> {
    convert(value.clone(), DataType::Float)?
        .as_f64()
        .ok_or_else(|| ExpressionError::conversion_failed(value, DataType::Float))
}

fn text_arg(value: &Value) -> ExpressionResult<String> {
    match convert(value.clone(), DataType::NVarChar)? {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

fn date_arg(value: &Value) -> ExpressionResult<NaiveDateTime> {
    match convert(value.clone(), DataType::DateTime)? {
        Value::DateTime(dt) => Ok(dt),
        _ => Err(ExpressionError::conversion_failed(value, DataType::DateTime)),
    }
}

/// Round an integer to `digits` decimal places; only negative places change it.
fn round_integer(v: i64, digits: i64) -> ExpressionResult<i64> {
    if digits >= 0 {
        return Ok(v);
    }
    if digits < -18 {
        return Ok(0);
    }
    let p = 10i64.pow((-digits) as u32);
    let rounded = (v.unsigned_abs() + (p as u64) / 2) / (p as u64) * (p as u64);
    let rounded = i64::try_from(rounded).map_err(|_| ExpressionError::overflow(DataType::BigInt))?;
    Ok(if v < 0 { -rounded } else { rounded })
}

fn fold_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn chars_equal(a: &[char], b: &[char], case_sensitive: bool) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x == y || (!case_sensitive && fold_char(*x) == fold_char(*y)))
}

fn find_chars(hay: &[char], needle: &[char], from: usize, case_sensitive: bool) -> Option<usize> {
    if needle.is_empty() || needle.len() > hay.len() {
        return None;
    }
    (from..=hay.len() - needle.len())
        .find(|&i| chars_equal(&hay[i..i + needle.len()], needle, case_sensitive))
}

fn replace_text(s: &str, find: &str, with: &str, case_sensitive: bool) -> String {
    if find.is_empty() {
        return s.to_string();
    }
    let hay: Vec<char> = s.chars().collect();
    let needle: Vec<char> = find.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < hay.len() {
        if i + needle.len() <= hay.len()
            && chars_equal(&hay[i..i + needle.len()], &needle, case_sensitive)
        {
            out.push_str(with);
            i += needle.len();
        } else {
            out.push(hay[i]);
            i += 1;
        }
    }
    out
}

fn new_id() -> u128 {
    let mut id: u128 = rand::random();
    // version 4, RFC 4122 variant
    id = (id & !(0xF << 76)) | (0x4 << 76);
    id = (id & !(0x3 << 62)) | (0x2 << 62);
    id
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?
        .pred_opt()
        .map(|d| d.day())
}

fn add_months(dt: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let total = (dt.year() as i64).checked_mul(12)? + dt.month0() as i64 + months;
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    let month = total.rem_euclid(12) as u32 + 1;
    let day = dt.day().min(days_in_month(year, month)?);
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.and_time(dt.time()))
}

pub fn date_add(part: DatePart, n: i64, dt: NaiveDateTime) -> ExpressionResult<NaiveDateTime> {
    let overflow = || ExpressionError::overflow(DataType::DateTime);
    match part {
        DatePart::Year => add_months(dt, n.checked_mul(12).ok_or_else(overflow)?),
        DatePart::Quarter => add_months(dt, n.checked_mul(3).ok_or_else(overflow)?),
        DatePart::Month => add_months(dt, n),
        fixed => {
            let unit = fixed.fixed_millis().unwrap_or(1);
            let millis = n.checked_mul(unit).ok_or_else(overflow)?;
            dt.checked_add_signed(Duration::milliseconds(millis))
        }
    }
    .ok_or_else(overflow)
}

/// Number of `part` boundaries crossed going from `a` to `b`.
pub fn date_diff(part: DatePart, a: &NaiveDateTime, b: &NaiveDateTime) -> i64 {
    let months = |d: &NaiveDateTime| d.year() as i64 * 12 + d.month0() as i64;
    match part {
        DatePart::Year => (b.year() - a.year()) as i64,
        DatePart::Quarter => months(b).div_euclid(3) - months(a).div_euclid(3),
        DatePart::Month => months(b) - months(a),
        DatePart::DayOfYear | DatePart::Day | DatePart::Weekday => {
            (b.date() - a.date()).num_days()
        }
        // weeks start on Sunday; day 7 from the common era is the first one
        DatePart::Week => {
            (b.num_days_from_ce() as i64).div_euclid(7) - (a.num_days_from_ce() as i64).div_euclid(7)
        }
        fixed => {
            let unit = fixed.fixed_millis().unwrap_or(1);
            let since = |d: &NaiveDateTime| (*d - base_date()).num_milliseconds().div_euclid(unit);
            since(b) - since(a)
        }
    }
}

pub fn date_part_of(part: DatePart, dt: &NaiveDateTime) -> i32 {
    match part {
        DatePart::Year => dt.year(),
        DatePart::Quarter => (dt.month0() / 3 + 1) as i32,
        DatePart::Month => dt.month() as i32,
        DatePart::DayOfYear => dt.ordinal() as i32,
        DatePart::Day => dt.day() as i32,
        DatePart::Week => {
            let jan1 = NaiveDate::from_ymd_opt(dt.year(), 1, 1)
                .map_or(0, |d| d.weekday().num_days_from_sunday());
            ((dt.ordinal0() + jan1) / 7 + 1) as i32
        }
        DatePart::Weekday => dt.weekday().number_from_sunday() as i32,
        DatePart::Hour => dt.hour() as i32,
        DatePart::Minute => dt.minute() as i32,
        DatePart::Second => dt.second() as i32,
        DatePart::Millisecond => (dt.nanosecond() / 1_000_000) as i32,
    }
}

type ScalarBody = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;
type TableBody = Arc<dyn Fn(&[Value]) -> anyhow::Result<Vec<Vec<Value>>> + Send + Sync>;

fn convert_args(parameters: &[DataType], args: &[Value]) -> ExpressionResult<Vec<Value>> {
    args.iter()
        .zip(parameters)
        .map(|(v, t)| convert(v.clone(), *t))
        .collect()
}

fn invocation_error(routine: &str, error: anyhow::Error) -> ExpressionError {
    ErrorKind::RuntimeInvocation {
        routine: routine.to_string(),
        message: format!("{:#}", error),
    }
    .into()
}

/// A user-defined scalar routine with a fixed signature.
#[derive(Clone)]
pub struct ScalarRoutine {
    pub name: String,
    pub parameters: Vec<DataType>,
    pub returns: DataType,
    pub deterministic: bool,
    body: ScalarBody,
}

impl ScalarRoutine {
    pub fn new(
        name: impl Into<String>,
        parameters: Vec<DataType>,
        returns: DataType,
        body: impl Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            returns,
            deterministic: true,
            body: Arc::new(body),
        }
    }

    /// Mark the routine as returning different results for the same input,
    /// so callers re-invoke it on every row.
    pub fn non_deterministic(mut self) -> Self {
        self.deterministic = false;
        self
    }

    pub fn invoke(&self, args: &[Value]) -> ExpressionResult<Value> {
        let args = convert_args(&self.parameters, args)?;
        let result = (self.body)(&args).map_err(|e| invocation_error(&self.name, e))?;
        convert(result, self.returns)
    }
}

impl fmt::Debug for ScalarRoutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarRoutine")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("returns", &self.returns)
            .field("deterministic", &self.deterministic)
            .finish()
    }
}

/// A user-defined table-valued routine; its result columns are part of the
/// signature.
#[derive(Clone)]
pub struct TableRoutine {
    pub name: String,
    pub parameters: Vec<DataType>,
    pub columns: Vec<(String, DataType)>,
    body: TableBody,
}

impl TableRoutine {
    pub fn new(
        name: impl Into<String>,
        parameters: Vec<DataType>,
        columns: Vec<(String, DataType)>,
        body: impl Fn(&[Value]) -> anyhow::Result<Vec<Vec<Value>>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            columns,
            body: Arc::new(body),
        }
    }

    /// Run the routine and convert every row to the declared column types.
    pub fn invoke(&self, args: &[Value]) -> ExpressionResult<Vec<Vec<Value>>> {
        let args = convert_args(&self.parameters, args)?;
        let rows = (self.body)(&args).map_err(|e| invocation_error(&self.name, e))?;
        rows.into_iter()
            .map(|row| {
                if row.len() != self.columns.len() {
                    return Err(invocation_error(
                        &self.name,
                        anyhow::anyhow!(
                            "returned a row of {} values for {} columns",
                            row.len(),
                            self.columns.len()
                        ),
                    ));
                }
                row.into_iter()
                    .zip(&self.columns)
                    .map(|(v, (_, t))| convert(v, *t))
                    .collect()
            })
            .collect()
    }
}

impl fmt::Debug for TableRoutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableRoutine")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("columns", &self.columns)
            .finish()
    }
}

/// Routines visible to one statement, looked up case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    scalars: HashMap<String, ScalarRoutine>,
    tables: HashMap<String, TableRoutine>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scalar routine, returning the one it replaces.
    pub fn register_scalar(&mut self, routine: ScalarRoutine) -> Option<ScalarRoutine> {
        log::debug!("registering scalar routine {}", routine.name);
        self.scalars.insert(routine.name.to_lowercase(), routine)
    }

    pub fn register_table(&mut self, routine: TableRoutine) -> Option<TableRoutine> {
        log::debug!("registering table routine {}", routine.name);
        self.tables.insert(routine.name.to_lowercase(), routine)
    }

    pub fn scalar(&self, name: &str) -> Option<&ScalarRoutine> {
        self.scalars.get(&name.to_lowercase())
    }

    pub fn table(&self, name: &str) -> Option<&TableRoutine> {
        self.tables.get(&name.to_lowercase())
    }
}
