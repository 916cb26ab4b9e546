//! Operator definitions for expressions.

use crate::value::DataType;

/// Binary operators supported in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Bitwise
    BitAnd,
    BitOr,
    BitXor,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Logical
    And,
    Or,

    // String
    Concat,
}

impl BinaryOperator {
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Add
                | BinaryOperator::Sub
                | BinaryOperator::Mul
                | BinaryOperator::Div
                | BinaryOperator::Mod
        )
    }

    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            BinaryOperator::BitAnd | BinaryOperator::BitOr | BinaryOperator::BitXor
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::Ne
                | BinaryOperator::Lt
                | BinaryOperator::Le
                | BinaryOperator::Gt
                | BinaryOperator::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }

    /// The type both operands are coerced to before the operator runs.
    pub fn operand_type(&self, left: DataType, right: DataType) -> Option<DataType> {
        match self {
            BinaryOperator::Concat => Some(DataType::NVarChar),
            BinaryOperator::And | BinaryOperator::Or => Some(DataType::Bit),
            _ if self.is_comparison() => left.max_type(right),
            _ => self.output_type(left, right),
        }
    }

    /// Get the output type of this operator given input types
    pub fn output_type(&self, left: DataType, right: DataType) -> Option<DataType> {
        match self {
            BinaryOperator::Add | BinaryOperator::Sub
                if left.is_date() || right.is_date() =>
            {
                match (self, left.is_date(), right.is_date()) {
                    (BinaryOperator::Sub, true, true) => Some(DataType::Float),
                    (BinaryOperator::Sub, false, true) => None,
                    (_, true, true) => None,
                    _ => {
                        let other = if left.is_date() { right } else { left };
                        (other.is_numeric() || other == DataType::Bit || other.is_character())
                            .then_some(DataType::DateTime)
                    }
                }
            }

            BinaryOperator::Add if left.is_character() && right.is_character() => {
                left.max_type(right)
            }

            BinaryOperator::Add
            | BinaryOperator::Sub
            | BinaryOperator::Mul
            | BinaryOperator::Div
            | BinaryOperator::Mod => {
                let result = left.arithmetic_result(right)?;
                result.is_numeric().then_some(result)
            }

            BinaryOperator::BitAnd | BinaryOperator::BitOr | BinaryOperator::BitXor => {
                let integral = |t: DataType| t.is_integer() || t == DataType::Bit;
                if integral(left) && integral(right) {
                    left.max_type(right)
                } else {
                    None
                }
            }

            // Comparison operators always return a bit
            BinaryOperator::Eq
            | BinaryOperator::Ne
            | BinaryOperator::Lt
            | BinaryOperator::Le
            | BinaryOperator::Gt
            | BinaryOperator::Ge => left.compatible(right).then_some(DataType::Bit),

            BinaryOperator::And | BinaryOperator::Or => match (left, right) {
                (DataType::Bit, DataType::Bit) => Some(DataType::Bit),
                _ => None,
            },

            BinaryOperator::Concat => Some(DataType::NVarChar),
        }
    }

    /// The operator obtained by swapping the operands (`a < b` == `b > a`).
    pub fn flipped(&self) -> BinaryOperator {
        match self {
            BinaryOperator::Lt => BinaryOperator::Gt,
            BinaryOperator::Le => BinaryOperator::Ge,
            BinaryOperator::Gt => BinaryOperator::Lt,
            BinaryOperator::Ge => BinaryOperator::Le,
            other => *other,
        }
    }

    /// Whether an ordering satisfies this comparison operator.
    pub fn accepts(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            BinaryOperator::Eq => ordering == Equal,
            BinaryOperator::Ne => ordering != Equal,
            BinaryOperator::Lt => ordering == Less,
            BinaryOperator::Le => ordering != Greater,
            BinaryOperator::Gt => ordering == Greater,
            BinaryOperator::Ge => ordering != Less,
            _ => false,
        }
    }

    /// Get the display string for this operator
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::BitAnd => "&",
            BinaryOperator::BitOr => "|",
            BinaryOperator::BitXor => "^",
            BinaryOperator::Eq => "=",
            BinaryOperator::Ne => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Ge => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Concat => "||",
        }
    }
}

/// Unary operators supported in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    // Logical
    Not,

    // Arithmetic
    Plus,
    Minus,
    BitNot,
}

impl UnaryOperator {
    /// Get the output type of this operator given input type
    pub fn output_type(&self, operand: DataType) -> Option<DataType> {
        match self {
            UnaryOperator::Not => match operand {
                DataType::Bit => Some(DataType::Bit),
                _ => None,
            },

            UnaryOperator::Plus => operand.is_numeric().then_some(operand),

            UnaryOperator::Minus => match operand {
                DataType::TinyInt => Some(DataType::Int),
                t if t.is_numeric() => Some(t),
                _ => None,
            },

            UnaryOperator::BitNot => {
                (operand.is_integer() || operand == DataType::Bit).then_some(operand)
            }
        }
    }

    /// Get the display string for this operator
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOperator::Not => "NOT",
            UnaryOperator::Plus => "+",
            UnaryOperator::Minus => "-",
            UnaryOperator::BitNot => "~",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_operator_output_types() {
        // Arithmetic operators
        assert_eq!(
            BinaryOperator::Add.output_type(DataType::Int, DataType::Int),
            Some(DataType::Int)
        );
        assert_eq!(
            BinaryOperator::Mul.output_type(DataType::TinyInt, DataType::SmallInt),
            Some(DataType::Int)
        );
        assert_eq!(
            BinaryOperator::Div.output_type(DataType::Int, DataType::Float),
            Some(DataType::Float)
        );
        assert_eq!(
            BinaryOperator::Add.output_type(DataType::NVarChar, DataType::Int),
            Some(DataType::Int)
        );
        assert_eq!(
            BinaryOperator::Add.output_type(DataType::NVarChar, DataType::NChar),
            Some(DataType::NVarChar)
        );
        assert_eq!(
            BinaryOperator::Mul.output_type(DataType::NVarChar, DataType::NVarChar),
            None
        );
        assert_eq!(
            BinaryOperator::Add.output_type(DataType::Int, DataType::VarBinary),
            None
        );

        // Comparison operators
        assert_eq!(
            BinaryOperator::Eq.output_type(DataType::Int, DataType::Float),
            Some(DataType::Bit)
        );
        assert_eq!(
            BinaryOperator::Lt.output_type(DataType::NVarChar, DataType::DateTime),
            Some(DataType::Bit)
        );
        assert_eq!(
            BinaryOperator::Eq.output_type(DataType::Int, DataType::VarBinary),
            None
        );

        // Logical operators
        assert_eq!(
            BinaryOperator::And.output_type(DataType::Bit, DataType::Bit),
            Some(DataType::Bit)
        );
        assert_eq!(
            BinaryOperator::Or.output_type(DataType::Int, DataType::Bit),
            None
        );
    }

    #[test]
    fn test_date_arithmetic_types() {
        assert_eq!(
            BinaryOperator::Add.output_type(DataType::DateTime, DataType::Int),
            Some(DataType::DateTime)
        );
        assert_eq!(
            BinaryOperator::Add.output_type(DataType::Int, DataType::DateTime),
            Some(DataType::DateTime)
        );
        assert_eq!(
            BinaryOperator::Sub.output_type(DataType::DateTime, DataType::DateTime),
            Some(DataType::Float)
        );
        assert_eq!(
            BinaryOperator::Sub.output_type(DataType::Int, DataType::DateTime),
            None
        );
        assert_eq!(
            BinaryOperator::Add.output_type(DataType::DateTime, DataType::DateTime),
            None
        );
    }

    #[test]
    fn test_bitwise_types() {
        assert_eq!(
            BinaryOperator::BitAnd.output_type(DataType::TinyInt, DataType::Int),
            Some(DataType::Int)
        );
        assert_eq!(
            BinaryOperator::BitOr.output_type(DataType::Bit, DataType::Bit),
            Some(DataType::Bit)
        );
        assert_eq!(
            BinaryOperator::BitXor.output_type(DataType::Float, DataType::Int),
            None
        );
    }

    #[test]
    fn test_unary_operator_output_types() {
        assert_eq!(
            UnaryOperator::Not.output_type(DataType::Bit),
            Some(DataType::Bit)
        );
        assert_eq!(UnaryOperator::Not.output_type(DataType::Int), None);
        assert_eq!(
            UnaryOperator::Minus.output_type(DataType::TinyInt),
            Some(DataType::Int)
        );
        assert_eq!(UnaryOperator::Minus.output_type(DataType::NVarChar), None);
        assert_eq!(
            UnaryOperator::BitNot.output_type(DataType::SmallInt),
            Some(DataType::SmallInt)
        );
    }

    #[test]
    fn test_flip_and_accept() {
        use std::cmp::Ordering;
        assert_eq!(BinaryOperator::Lt.flipped(), BinaryOperator::Gt);
        assert_eq!(BinaryOperator::Eq.flipped(), BinaryOperator::Eq);
        assert!(BinaryOperator::Le.accepts(Ordering::Equal));
        assert!(!BinaryOperator::Lt.accepts(Ordering::Equal));
        assert!(BinaryOperator::Ne.accepts(Ordering::Greater));
    }

    #[test]
    fn test_operator_display() {
        assert_eq!(BinaryOperator::Add.as_str(), "+");
        assert_eq!(BinaryOperator::Ne.as_str(), "<>");
        assert_eq!(BinaryOperator::And.as_str(), "AND");
        assert_eq!(UnaryOperator::BitNot.as_str(), "~");
    }
}
