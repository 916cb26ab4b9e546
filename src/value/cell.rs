//! Scalar values and the typed, nullable cells expressions cache them in.

use crate::expression::error::ExpressionResult;
use crate::value::convert::convert;
use crate::value::DataType;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Money values are stored as integers scaled by this factor.
pub const MONEY_SCALE: i64 = 10_000;

/// Values that an expression can produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bit(bool),
    TinyInt(u8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Real(f32),
    Float(f64),
    Numeric(f64),
    /// Fixed point, four decimal places
    Money(i64),
    String(String),
    Binary(Vec<u8>),
    DateTime(NaiveDateTime),
    UniqueIdentifier(u128),
    RowVersion(u64),
}

impl Value {
    /// Get the natural data type of this value
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Bit(_) => Some(DataType::Bit),
            Value::TinyInt(_) => Some(DataType::TinyInt),
            Value::SmallInt(_) => Some(DataType::SmallInt),
            Value::Int(_) => Some(DataType::Int),
            Value::BigInt(_) => Some(DataType::BigInt),
            Value::Real(_) => Some(DataType::Real),
            Value::Float(_) => Some(DataType::Float),
            Value::Numeric(_) => Some(DataType::Numeric),
            Value::Money(_) => Some(DataType::Money),
            Value::String(_) => Some(DataType::NVarChar),
            Value::Binary(_) => Some(DataType::VarBinary),
            Value::DateTime(_) => Some(DataType::DateTime),
            Value::UniqueIdentifier(_) => Some(DataType::UniqueIdentifier),
            Value::RowVersion(_) => Some(DataType::RowVersion),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn money(units: i64, cents_of_ten_thousand: i64) -> Value {
        Value::Money(units * MONEY_SCALE + cents_of_ten_thousand)
    }

    /// Integer view of an exact integral value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bit(b) => Some(*b as i64),
            Value::TinyInt(v) => Some(*v as i64),
            Value::SmallInt(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating view of any numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v as f64),
            Value::Float(v) | Value::Numeric(v) => Some(*v),
            Value::Money(v) => Some(*v as f64 / MONEY_SCALE as f64),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bit(b) => Some(*b),
            other => other.as_i64().map(|v| v != 0),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bit(b) => write!(f, "{}", *b as u8),
            Value::TinyInt(v) => write!(f, "{}", v),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Float(v) | Value::Numeric(v) => write!(f, "{}", v),
            Value::Money(v) => {
                let sign = if *v < 0 { "-" } else { "" };
                let abs = v.unsigned_abs();
                write!(
                    f,
                    "{}{}.{:04}",
                    sign,
                    abs / MONEY_SCALE as u64,
                    abs % MONEY_SCALE as u64
                )
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Binary(bytes) => {
                write!(f, "0x")?;
                for b in bytes {
                    write!(f, "{:02X}", b)?;
                }
                Ok(())
            }
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.3f")),
            Value::UniqueIdentifier(id) => {
                let hex = format!("{:032x}", id);
                write!(
                    f,
                    "{}-{}-{}-{}-{}",
                    &hex[0..8],
                    &hex[8..12],
                    &hex[12..16],
                    &hex[16..20],
                    &hex[20..32]
                )
            }
            Value::RowVersion(v) => write!(f, "0x{:016X}", v),
        }
    }
}

/// A typed, nullable storage slot. A null cell still carries its declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    data_type: DataType,
    value: Value,
}

impl Cell {
    pub fn null(data_type: DataType) -> Self {
        Self {
            data_type,
            value: Value::Null,
        }
    }

    /// Create a cell of `data_type`, converting `value` into it.
    pub fn new(data_type: DataType, value: Value) -> ExpressionResult<Self> {
        let value = convert(value, data_type)?;
        Ok(Self { data_type, value })
    }

    /// Wrap a value in a cell of its natural type; a bare null becomes a
    /// null `NVarChar`.
    pub fn from_value(value: Value) -> Self {
        Self {
            data_type: value.data_type().unwrap_or(DataType::NVarChar),
            value,
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Store a new value, converting it to the cell's declared type.
    pub fn set(&mut self, value: Value) -> ExpressionResult<()> {
        self.value = convert(value, self.data_type)?;
        Ok(())
    }

    pub fn set_null(&mut self) {
        self.value = Value::Null;
    }

    /// Re-create the cell for a different declared type. The current value is
    /// dropped; callers re-evaluate afterwards.
    pub fn retype(&mut self, data_type: DataType) {
        if self.data_type != data_type {
            *self = Cell::null(data_type);
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}
