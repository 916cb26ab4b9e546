//! Typed arithmetic and comparison keyed by the type lattice.
//!
//! Operands are converted to the operator's resolved type before the
//! operation runs; the result always has exactly that type.

use crate::expression::error::{ExpressionError, ExpressionResult};
use crate::expression::operator::BinaryOperator;
use crate::value::cell::MONEY_SCALE;
use crate::value::convert::{convert, datetime_to_days, days_to_datetime};
use crate::value::{DataType, Value};
use std::cmp::Ordering;

fn integer_result(v: Option<i64>, data_type: DataType) -> ExpressionResult<Value> {
    let v = v.ok_or_else(|| ExpressionError::overflow(data_type))?;
    convert(Value::BigInt(v), data_type)
}

fn invalid(op: BinaryOperator, left: &Value, right: &Value) -> ExpressionError {
    ExpressionError::invalid_operands(op.as_str(), left.data_type(), right.data_type())
}

/// Apply an arithmetic or bitwise operator. Null operands yield null.
pub fn arithmetic(
    op: BinaryOperator,
    left: Value,
    right: Value,
    result_type: DataType,
) -> ExpressionResult<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    if result_type.is_date() {
        return date_arithmetic(op, left, right);
    }
    if result_type.is_character() {
        return match op {
            BinaryOperator::Add | BinaryOperator::Concat => {
                let l = convert(left, result_type)?;
                let r = convert(right, result_type)?;
                match (l, r) {
                    (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
                    (l, r) => Err(invalid(op, &l, &r)),
                }
            }
            _ => Err(invalid(op, &left, &right)),
        };
    }
    if op.is_bitwise() {
        return bitwise(op, left, right, result_type);
    }

    let l = convert(left, result_type)?;
    let r = convert(right, result_type)?;
    match result_type {
        DataType::Bit | DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt => {
            let (a, b) = match (l.as_i64(), r.as_i64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(invalid(op, &l, &r)),
            };
            let out = match op {
                BinaryOperator::Add => a.checked_add(b),
                BinaryOperator::Sub => a.checked_sub(b),
                BinaryOperator::Mul => a.checked_mul(b),
                BinaryOperator::Div | BinaryOperator::Mod if b == 0 => {
                    return Err(ExpressionError::new(
                        crate::expression::error::ErrorKind::DivisionByZero,
                    ))
                }
                BinaryOperator::Div => a.checked_div(b),
                BinaryOperator::Mod => a.checked_rem(b),
                _ => return Err(invalid(op, &l, &r)),
            };
            integer_result(out, result_type)
        }
        DataType::Money => {
            let (Value::Money(a), Value::Money(b)) = (&l, &r) else {
                return Err(invalid(op, &l, &r));
            };
            let (a, b) = (*a as i128, *b as i128);
            let out = match op {
                BinaryOperator::Add => a + b,
                BinaryOperator::Sub => a - b,
                BinaryOperator::Mul => a * b / MONEY_SCALE as i128,
                BinaryOperator::Div | BinaryOperator::Mod if b == 0 => {
                    return Err(ExpressionError::new(
                        crate::expression::error::ErrorKind::DivisionByZero,
                    ))
                }
                BinaryOperator::Div => a * MONEY_SCALE as i128 / b,
                BinaryOperator::Mod => a % b,
                _ => return Err(invalid(op, &l, &r)),
            };
            i64::try_from(out)
                .map(Value::Money)
                .map_err(|_| ExpressionError::overflow(DataType::Money))
        }
        DataType::Real | DataType::Float | DataType::Numeric => {
            let (a, b) = match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(invalid(op, &l, &r)),
            };
            let out = match op {
                BinaryOperator::Add => a + b,
                BinaryOperator::Sub => a - b,
                BinaryOperator::Mul => a * b,
                BinaryOperator::Div | BinaryOperator::Mod if b == 0.0 => {
                    return Err(ExpressionError::new(
                        crate::expression::error::ErrorKind::DivisionByZero,
                    ))
                }
                BinaryOperator::Div => a / b,
                BinaryOperator::Mod => a % b,
                _ => return Err(invalid(op, &l, &r)),
            };
            if !out.is_finite() {
                return Err(ExpressionError::overflow(result_type));
            }
            convert(Value::Float(out), result_type)
        }
        _ => Err(invalid(op, &l, &r)),
    }
}

fn bitwise(
    op: BinaryOperator,
    left: Value,
    right: Value,
    result_type: DataType,
) -> ExpressionResult<Value> {
    let (a, b) = match (left.as_i64(), right.as_i64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(invalid(op, &left, &right)),
    };
    let out = match op {
        BinaryOperator::BitAnd => a & b,
        BinaryOperator::BitOr => a | b,
        BinaryOperator::BitXor => a ^ b,
        _ => return Err(invalid(op, &left, &right)),
    };
    if result_type == DataType::Bit {
        return Ok(Value::Bit(out != 0));
    }
    convert(Value::BigInt(out), result_type)
}

/// `date + days`, `days + date`, `date - days` and `date - date`.
fn date_arithmetic(op: BinaryOperator, left: Value, right: Value) -> ExpressionResult<Value> {
    match (op, &left, &right) {
        (BinaryOperator::Add, Value::DateTime(d), n) | (BinaryOperator::Add, n, Value::DateTime(d)) => {
            let days = offset_days(op, &left, &right, n)?;
            days_to_datetime(datetime_to_days(d) + days).map(Value::DateTime)
        }
        (BinaryOperator::Sub, Value::DateTime(a), Value::DateTime(b)) => {
            Ok(Value::Float(datetime_to_days(a) - datetime_to_days(b)))
        }
        (BinaryOperator::Sub, Value::DateTime(d), n) => {
            let days = offset_days(op, &left, &right, n)?;
            days_to_datetime(datetime_to_days(d) - days).map(Value::DateTime)
        }
        _ => Err(invalid(op, &left, &right)),
    }
}

fn offset_days(op: BinaryOperator, left: &Value, right: &Value, n: &Value) -> ExpressionResult<f64> {
    match n {
        Value::String(s) => convert(Value::String(s.clone()), DataType::Float)?
            .as_f64()
            .ok_or_else(|| invalid(op, left, right)),
        other => other.as_f64().ok_or_else(|| invalid(op, left, right)),
    }
}

/// Arithmetic negation.
pub fn negate(value: Value) -> ExpressionResult<Value> {
    let data_type = value.data_type();
    let overflow = || ExpressionError::overflow(data_type.unwrap_or(DataType::Int));
    Ok(match value {
        Value::Null => Value::Null,
        Value::TinyInt(v) => Value::Int(-(v as i32)),
        Value::SmallInt(v) => Value::SmallInt(v.checked_neg().ok_or_else(overflow)?),
        Value::Int(v) => Value::Int(v.checked_neg().ok_or_else(overflow)?),
        Value::BigInt(v) => Value::BigInt(v.checked_neg().ok_or_else(overflow)?),
        Value::Real(v) => Value::Real(-v),
        Value::Float(v) => Value::Float(-v),
        Value::Numeric(v) => Value::Numeric(-v),
        Value::Money(v) => Value::Money(v.checked_neg().ok_or_else(overflow)?),
        other => {
            return Err(ExpressionError::invalid_operands(
                "-",
                other.data_type(),
                None,
            ))
        }
    })
}

/// Bitwise complement.
pub fn bit_not(value: Value) -> ExpressionResult<Value> {
    Ok(match value {
        Value::Null => Value::Null,
        Value::Bit(b) => Value::Bit(!b),
        Value::TinyInt(v) => Value::TinyInt(!v),
        Value::SmallInt(v) => Value::SmallInt(!v),
        Value::Int(v) => Value::Int(!v),
        Value::BigInt(v) => Value::BigInt(!v),
        other => {
            return Err(ExpressionError::invalid_operands(
                "~",
                other.data_type(),
                None,
            ))
        }
    })
}

/// Compare two strings the way character columns compare: trailing blanks are
/// insignificant and case folding follows the culture.
pub fn compare_strings(a: &str, b: &str, case_sensitive: bool) -> Ordering {
    let a = a.trim_end_matches(' ');
    let b = b.trim_end_matches(' ');
    if case_sensitive {
        return a.cmp(b);
    }
    let fold = |s: &str| s.chars().flat_map(char::to_lowercase).collect::<Vec<char>>();
    fold(a).cmp(&fold(b))
}

/// Compare two non-null values of compatible types. Returns `Ok(None)` when
/// either side is null.
pub fn compare_values(
    left: &Value,
    right: &Value,
    case_sensitive: bool,
) -> ExpressionResult<Option<Ordering>> {
    let ordering = match (left, right) {
        (Value::Null, _) | (_, Value::Null) => return Ok(None),
        (Value::String(a), Value::String(b)) => compare_strings(a, b, case_sensitive),
        (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
        (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
        (Value::UniqueIdentifier(a), Value::UniqueIdentifier(b)) => a.cmp(b),
        (Value::RowVersion(a), Value::RowVersion(b)) => a.cmp(b),
        (Value::Money(a), Value::Money(b)) => a.cmp(b),
        (l, r) => match (l.as_i64(), r.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                _ => {
                    // Mixed families: bring the right side over to the left's type.
                    let target = l.data_type().unwrap_or(DataType::NVarChar);
                    let converted = convert(r.clone(), target)?;
                    if converted.data_type() == r.data_type() {
                        return Err(ExpressionError::invalid_operands(
                            "comparison",
                            l.data_type(),
                            r.data_type(),
                        ));
                    }
                    return compare_values(l, &converted, case_sensitive);
                }
            },
        },
    };
    Ok(Some(ordering))
}
