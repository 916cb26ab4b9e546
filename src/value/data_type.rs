//! SQL data types and the type lattice used for promotion and coercion.

use serde::{Deserialize, Serialize};

/// Data types supported by the expression engine
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bit = 1,
    TinyInt = 2,
    SmallInt = 3,
    Int = 4,
    BigInt = 5,
    Real = 6,
    Float = 7,
    Numeric = 8,
    Money = 9,
    NChar = 10,
    NVarChar = 11,
    NText = 12,
    Binary = 13,
    VarBinary = 14,
    Image = 15,
    DateTime = 16,
    UniqueIdentifier = 17,
    RowVersion = 18,
}

/// Every type in precedence order, lowest first.
const PRECEDENCE: [DataType; 18] = [
    DataType::RowVersion,
    DataType::Binary,
    DataType::VarBinary,
    DataType::Image,
    DataType::UniqueIdentifier,
    DataType::NChar,
    DataType::NVarChar,
    DataType::NText,
    DataType::Bit,
    DataType::TinyInt,
    DataType::SmallInt,
    DataType::Int,
    DataType::BigInt,
    DataType::Money,
    DataType::Numeric,
    DataType::Real,
    DataType::Float,
    DataType::DateTime,
];

impl DataType {
    pub fn from_u8(value: u8) -> Option<Self> {
        PRECEDENCE.iter().copied().find(|t| *t as u8 == value)
    }

    /// Position in the promotion order; the wider type has the higher rank.
    pub fn rank(self) -> usize {
        PRECEDENCE
            .iter()
            .position(|t| *t == self)
            .unwrap_or_default()
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer()
            || matches!(
                self,
                DataType::Real | DataType::Float | DataType::Numeric | DataType::Money
            )
    }

    pub fn is_character(self) -> bool {
        matches!(self, DataType::NChar | DataType::NVarChar | DataType::NText)
    }

    pub fn is_binary(self) -> bool {
        matches!(
            self,
            DataType::Binary | DataType::VarBinary | DataType::Image
        )
    }

    pub fn is_date(self) -> bool {
        self == DataType::DateTime
    }

    /// Whether `self` and `other` may meet in one operation, possibly after an
    /// implicit conversion.
    pub fn compatible(self, other: DataType) -> bool {
        if self == other || self.is_character() || other.is_character() {
            return true;
        }
        let numeric_like = |t: DataType| t.is_numeric() || t == DataType::Bit;
        let binary_like = |t: DataType| {
            t.is_binary() || t == DataType::UniqueIdentifier || t == DataType::RowVersion
        };
        (numeric_like(self) && numeric_like(other))
            || (self.is_date() && numeric_like(other))
            || (other.is_date() && numeric_like(self))
            || (binary_like(self) && binary_like(other))
    }

    /// The type both operands of a binary operator are coerced to, or `None`
    /// when the pair is incompatible. Character operands yield to the other side.
    pub fn max_type(self, other: DataType) -> Option<DataType> {
        if !self.compatible(other) {
            return None;
        }
        if self.is_character() != other.is_character() {
            return Some(if self.is_character() { other } else { self });
        }
        Some(if self.rank() >= other.rank() { self } else { other })
    }

    /// Result type of an arithmetic operator: the max type with the narrow
    /// integer types promoted to `Int`.
    pub fn arithmetic_result(self, other: DataType) -> Option<DataType> {
        self.max_type(other).map(DataType::promoted)
    }

    pub fn promoted(self) -> DataType {
        match self {
            DataType::Bit | DataType::TinyInt | DataType::SmallInt => DataType::Int,
            other => other,
        }
    }

    /// Display width in characters for fixed-width types; variable-length
    /// types report `None` and take their width from metadata.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            DataType::Bit => Some(1),
            DataType::TinyInt => Some(3),
            DataType::SmallInt => Some(6),
            DataType::Int => Some(11),
            DataType::BigInt => Some(20),
            DataType::Real => Some(14),
            DataType::Float => Some(24),
            DataType::Numeric => Some(40),
            DataType::Money => Some(21),
            DataType::DateTime => Some(23),
            DataType::UniqueIdentifier => Some(36),
            DataType::RowVersion => Some(8),
            DataType::NChar
            | DataType::NVarChar
            | DataType::NText
            | DataType::Binary
            | DataType::VarBinary
            | DataType::Image => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Bit => "bit",
            DataType::TinyInt => "tinyint",
            DataType::SmallInt => "smallint",
            DataType::Int => "int",
            DataType::BigInt => "bigint",
            DataType::Real => "real",
            DataType::Float => "float",
            DataType::Numeric => "numeric",
            DataType::Money => "money",
            DataType::NChar => "nchar",
            DataType::NVarChar => "nvarchar",
            DataType::NText => "ntext",
            DataType::Binary => "binary",
            DataType::VarBinary => "varbinary",
            DataType::Image => "image",
            DataType::DateTime => "datetime",
            DataType::UniqueIdentifier => "uniqueidentifier",
            DataType::RowVersion => "rowversion",
        }
    }

    pub fn from_name(name: &str) -> Option<DataType> {
        let lowered = name.to_ascii_lowercase();
        let alias = match lowered.as_str() {
            "integer" => "int",
            "decimal" => "numeric",
            "double" => "float",
            "char" | "nchar" => "nchar",
            "varchar" | "nvarchar" => "nvarchar",
            "text" | "ntext" => "ntext",
            "timestamp" => "rowversion",
            "datetime" | "date" => "datetime",
            other => other,
        };
        PRECEDENCE.iter().copied().find(|t| t.name() == alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u8_round_trip() {
        for t in PRECEDENCE {
            assert_eq!(DataType::from_u8(t as u8), Some(t));
        }
        assert_eq!(DataType::from_u8(99), None);
    }

    #[test]
    fn test_rank_order() {
        assert!(DataType::Int.rank() > DataType::TinyInt.rank());
        assert!(DataType::Float.rank() > DataType::Numeric.rank());
        assert!(DataType::DateTime.rank() > DataType::Float.rank());
        assert!(DataType::NVarChar.rank() < DataType::Bit.rank());
    }

    #[test]
    fn test_compatibility() {
        assert!(DataType::Int.compatible(DataType::Float));
        assert!(DataType::NVarChar.compatible(DataType::Image));
        assert!(DataType::DateTime.compatible(DataType::Int));
        assert!(DataType::VarBinary.compatible(DataType::UniqueIdentifier));
        assert!(!DataType::Int.compatible(DataType::VarBinary));
        assert!(!DataType::DateTime.compatible(DataType::UniqueIdentifier));
    }

    #[test]
    fn test_max_type_prefers_numeric_over_character() {
        assert_eq!(
            DataType::NVarChar.max_type(DataType::Int),
            Some(DataType::Int)
        );
        assert_eq!(
            DataType::Money.max_type(DataType::NChar),
            Some(DataType::Money)
        );
        assert_eq!(
            DataType::NChar.max_type(DataType::NVarChar),
            Some(DataType::NVarChar)
        );
        assert_eq!(DataType::Int.max_type(DataType::Binary), None);
    }

    #[test]
    fn test_arithmetic_promotes_narrow_integers() {
        assert_eq!(
            DataType::TinyInt.arithmetic_result(DataType::TinyInt),
            Some(DataType::Int)
        );
        assert_eq!(
            DataType::SmallInt.arithmetic_result(DataType::BigInt),
            Some(DataType::BigInt)
        );
        assert_eq!(
            DataType::Int.arithmetic_result(DataType::Real),
            Some(DataType::Real)
        );
    }

    #[test]
    fn test_names() {
        assert_eq!(DataType::from_name("VARCHAR"), Some(DataType::NVarChar));
        assert_eq!(DataType::from_name("decimal"), Some(DataType::Numeric));
        assert_eq!(DataType::from_name("money"), Some(DataType::Money));
        assert_eq!(DataType::from_name("blob"), None);
    }
}
