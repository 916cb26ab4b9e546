//! Expression trees for SQL evaluation.
//!
//! This module provides:
//! - Expression nodes with typed, cached results and change tracking
//! - Prepare-time type resolution, coercion and constant folding
//! - Row-time evaluation with three-valued logic
//! - Built-in and user-defined functions, subqueries and IN lists
//! - Constraint pushdown for sargable predicates

pub mod error;
pub mod eval;
pub mod expr;
pub mod fold;
pub mod function;
pub mod operator;
pub mod optimize;
pub mod prepare;
pub mod subquery;
pub mod table_function;

pub use error::{ErrorKind, ExpressionError, ExpressionResult};
pub use eval::evaluate_predicate;
pub use expr::{Expr, ExprKind, NodeCategory, SystemVariable};
pub use function::{BuiltinFunction, DatePart, FunctionRegistry, ScalarRoutine, TableRoutine};
pub use operator::{BinaryOperator, UnaryOperator};
pub use optimize::{
    optimize_predicate, Constraint, ConstraintAccumulator, ConstraintColumn, ConstraintStack,
    ConstraintValue, RangeBound,
};
pub use subquery::{CorrelatedSubquery, Quantifier, SubqueryNode, SubqueryStatement, ValuesSubquery};
pub use table_function::{TableColumn, TableFunctionCursor};
