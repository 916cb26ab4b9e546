//! Error types for expression preparation and evaluation.

use crate::value::DataType;
use std::fmt;
use thiserror::Error;

/// The category of a failure raised while preparing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    /// Operand types are not mutually compatible under the type lattice
    #[error("Type mismatch in {context}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        expected: DataType,
        actual: DataType,
        context: String,
    },

    /// Invalid operand types for operator
    #[error("Invalid operand types for operator {operator}: left={left_type:?}, right={right_type:?}")]
    InvalidOperandTypes {
        operator: String,
        left_type: Option<DataType>,
        right_type: Option<DataType>,
    },

    /// Wrong number of function arguments
    #[error("Function {function} expects {expected} arguments, got {actual}")]
    Arity {
        function: String,
        expected: String,
        actual: usize,
    },

    /// Unknown column, table, alias, parameter or function
    #[error("Unresolved reference: {name}")]
    UnresolvedReference { name: String },

    /// Column name matches more than one source
    #[error("Ambiguous column name: {name}")]
    AmbiguousReference { name: String },

    #[error("Malformed pattern '{pattern}': {reason}")]
    MalformedPattern { pattern: String, reason: String },

    /// No conversion path between two types
    #[error("Conversion from {from:?} to {to:?} is not supported")]
    UnsupportedConversion { from: DataType, to: DataType },

    /// A conversion path exists but the value does not fit it
    #[error("Conversion of '{value}' to {to:?} failed")]
    ConversionFailed { value: String, to: DataType },

    #[error("No full-text index on {table}.{column}")]
    MissingFullTextIndex { table: String, column: String },

    /// A user-defined or external routine failed while running
    #[error("Routine {routine} failed: {message}")]
    RuntimeInvocation { routine: String, message: String },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Arithmetic overflow converting to {data_type:?}")]
    ArithmeticOverflow { data_type: DataType },

    /// Scalar subquery produced more than one row
    #[error("Subquery returned {rows} rows where at most one is allowed")]
    SubqueryCardinality { rows: usize },

    /// Aggregate call made outside the CreateNewGroup/FinishGroup sequence
    #[error("Invalid aggregate call {call} in state {state}")]
    InvalidAggregateState { call: String, state: String },

    /// Generic evaluation error
    #[error("Expression evaluation error: {message}")]
    Evaluation { message: String },
}

impl ErrorKind {
    /// Stable numeric code reported through `@@ERROR`.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::TypeMismatch { .. } => 25_001,
            ErrorKind::InvalidOperandTypes { .. } => 25_002,
            ErrorKind::Arity { .. } => 25_003,
            ErrorKind::UnresolvedReference { .. } => 25_004,
            ErrorKind::AmbiguousReference { .. } => 25_005,
            ErrorKind::MalformedPattern { .. } => 25_006,
            ErrorKind::UnsupportedConversion { .. } => 25_007,
            ErrorKind::ConversionFailed { .. } => 25_008,
            ErrorKind::MissingFullTextIndex { .. } => 25_009,
            ErrorKind::RuntimeInvocation { .. } => 25_010,
            ErrorKind::DivisionByZero => 25_011,
            ErrorKind::ArithmeticOverflow { .. } => 25_012,
            ErrorKind::SubqueryCardinality { .. } => 25_013,
            ErrorKind::InvalidAggregateState { .. } => 25_014,
            ErrorKind::Evaluation { .. } => 25_015,
        }
    }
}

/// An evaluation failure with its code and, when known, the source position of the
/// expression that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionError {
    pub kind: ErrorKind,
    pub position: Option<usize>,
}

impl ExpressionError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            position: None,
        }
    }

    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    /// Attach a source position unless a more specific one is already present.
    pub fn at(mut self, position: Option<usize>) -> Self {
        if self.position.is_none() {
            self.position = position;
        }
        self
    }

    pub fn type_mismatch(expected: DataType, actual: DataType, context: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            expected,
            actual,
            context: context.into(),
        })
    }

    pub fn invalid_operands(
        operator: impl Into<String>,
        left_type: Option<DataType>,
        right_type: Option<DataType>,
    ) -> Self {
        Self::new(ErrorKind::InvalidOperandTypes {
            operator: operator.into(),
            left_type,
            right_type,
        })
    }

    pub fn arity(function: impl Into<String>, expected: impl Into<String>, actual: usize) -> Self {
        Self::new(ErrorKind::Arity {
            function: function.into(),
            expected: expected.into(),
            actual,
        })
    }

    pub fn unresolved(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnresolvedReference { name: name.into() })
    }

    pub fn malformed_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        })
    }

    pub fn unsupported_conversion(from: DataType, to: DataType) -> Self {
        Self::new(ErrorKind::UnsupportedConversion { from, to })
    }

    pub fn conversion_failed(value: impl fmt::Display, to: DataType) -> Self {
        Self::new(ErrorKind::ConversionFailed {
            value: value.to_string(),
            to,
        })
    }

    pub fn overflow(data_type: DataType) -> Self {
        Self::new(ErrorKind::ArithmeticOverflow { data_type })
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Evaluation {
            message: message.into(),
        })
    }
}

impl From<ErrorKind> for ExpressionError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(pos) => write!(f, "[{}] {} (at position {})", self.code(), self.kind, pos),
            None => write!(f, "[{}] {}", self.code(), self.kind),
        }
    }
}

impl std::error::Error for ExpressionError {}

/// Result type for expression operations
pub type ExpressionResult<T> = Result<T, ExpressionError>;
