//! Expression tree nodes.
//!
//! A tree is built unprepared (names only), finalized once by
//! [`Expr::prepare`](crate::expression::prepare), and then executed row by
//! row. Every node owns its cached output [`Cell`].

use crate::aggregate::{AggregateAccumulator, AggregateFunction};
use crate::catalog::ColumnBinding;
use crate::expression::error::ExpressionResult;
use crate::expression::function::{BuiltinFunction, DatePart, ScalarRoutine};
use crate::expression::operator::{BinaryOperator, UnaryOperator};
use crate::expression::subquery::{Quantifier, SubqueryNode, SubqueryStatement};
use crate::pattern::{FullTextQuery, LikePattern};
use crate::value::{Cell, DataType, Value};

/// Display width assumed for character and binary results of unknown length.
pub const VARIABLE_WIDTH: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemVariable {
    /// `@@ERROR`
    Error,
    /// `@@IDENTITY`
    Identity,
}

impl SystemVariable {
    pub fn name(&self) -> &'static str {
        match self {
            SystemVariable::Error => "@@ERROR",
            SystemVariable::Identity => "@@IDENTITY",
        }
    }
}

/// Structural category of a node, used by the optimizer and by the executor
/// when deciding what a node can be replaced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeCategory {
    Literal,
    Column,
    /// A column of an enclosing query
    ExternalColumn,
    Parameter,
    General,
    /// `*` placeholder
    Star,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct NodeFlags {
    pub prepared: bool,
    pub constant: bool,
    pub optimizable: bool,
    /// The cell holds a computed value
    pub evaluated: bool,
    /// Forced re-evaluation requested through `set_changed`
    pub dirty: bool,
}

/// Read the node's value from a materialized row source instead of
/// computing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Redirect {
    pub table: usize,
    pub column: usize,
    pub seen_version: Option<u64>,
}

#[derive(Debug)]
pub enum ExprKind {
    /// The value lives in the node's cell
    Literal,
    Column {
        qualifier: Option<String>,
        name: String,
        external: bool,
        binding: Option<ColumnBinding>,
    },
    Parameter {
        name: String,
    },
    Star {
        qualifier: Option<String>,
        bindings: Vec<ColumnBinding>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Between {
        operand: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    InList {
        probe: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        probe: Box<Expr>,
        subquery: SubqueryNode,
        negated: bool,
    },
    Quantified {
        left: Box<Expr>,
        op: BinaryOperator,
        quantifier: Quantifier,
        subquery: SubqueryNode,
    },
    ScalarSubquery {
        subquery: SubqueryNode,
    },
    Exists {
        subquery: SubqueryNode,
        negated: bool,
    },
    Like {
        operand: Box<Expr>,
        pattern: Box<Expr>,
        escape: Option<char>,
        negated: bool,
        compiled: Option<LikePattern>,
    },
    Contains {
        column: Box<Expr>,
        condition: Box<Expr>,
        query: Option<(String, FullTextQuery)>,
    },
    IsNull {
        operand: Box<Expr>,
        negated: bool,
    },
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        else_result: Option<Box<Expr>>,
    },
    /// `COALESCE`, or `ISNULL` when `first_type` is set (result takes the
    /// first argument's type)
    Coalesce {
        args: Vec<Expr>,
        first_type: bool,
    },
    NullIf {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Convert {
        operand: Box<Expr>,
        target: DataType,
        length: Option<usize>,
    },
    Function {
        function: BuiltinFunction,
        args: Vec<Expr>,
        date_part: Option<DatePart>,
    },
    UserFunction {
        name: String,
        args: Vec<Expr>,
        routine: Option<ScalarRoutine>,
    },
    /// `arg` is `None` for `COUNT(*)`
    Aggregate {
        function: AggregateFunction,
        arg: Option<Box<Expr>>,
        accumulator: Option<AggregateAccumulator>,
        result: Value,
    },
    SystemVariable(SystemVariable),
}

/// A node of an expression tree.
#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub(crate) data_type: DataType,
    pub(crate) position: Option<usize>,
    pub(crate) cell: Cell,
    pub(crate) flags: NodeFlags,
    /// Row-source or parameter version seen by the last evaluation
    pub(crate) seen_version: Option<u64>,
    pub(crate) redirect: Option<Redirect>,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            data_type: DataType::NVarChar,
            position: None,
            cell: Cell::null(DataType::NVarChar),
            flags: NodeFlags::default(),
            seen_version: None,
            redirect: None,
        }
    }

    /// Create a literal expression
    pub fn literal(value: Value) -> Self {
        let cell = Cell::from_value(value);
        Self {
            kind: ExprKind::Literal,
            data_type: cell.data_type(),
            position: None,
            cell,
            flags: NodeFlags {
                constant: true,
                evaluated: true,
                ..NodeFlags::default()
            },
            seen_version: None,
            redirect: None,
        }
    }

    /// Create a typed literal, converting `value` to `data_type`
    pub fn typed_literal(value: Value, data_type: DataType) -> ExpressionResult<Self> {
        let mut expr = Self::literal(Value::Null);
        expr.cell = Cell::new(data_type, value)?;
        expr.data_type = data_type;
        Ok(expr)
    }

    /// Create a NULL literal
    pub fn null() -> Self {
        Self::literal(Value::Null)
    }

    pub fn int(value: i32) -> Self {
        Self::literal(Value::Int(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::literal(Value::String(value.into()))
    }

    pub fn bit(value: bool) -> Self {
        Self::literal(Value::Bit(value))
    }

    /// Create an unqualified column reference
    pub fn column(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Column {
            qualifier: None,
            name: name.into(),
            external: false,
            binding: None,
        })
    }

    /// Create a column reference qualified by a table name or alias
    pub fn qualified_column(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ExprKind::Column {
            qualifier: Some(qualifier.into()),
            name: name.into(),
            external: false,
            binding: None,
        })
    }

    /// Create a reference to a column of an enclosing query
    pub fn outer_column(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ExprKind::Column {
            qualifier: Some(qualifier.into()),
            name: name.into(),
            external: true,
            binding: None,
        })
    }

    /// Create a statement parameter reference (`@name`)
    pub fn parameter(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Parameter { name: name.into() })
    }

    /// Create a `*` placeholder, optionally `alias.*`
    pub fn star(qualifier: Option<&str>) -> Self {
        Self::new(ExprKind::Star {
            qualifier: qualifier.map(str::to_string),
            bindings: Vec::new(),
        })
    }

    /// Create a unary operation expression
    pub fn unary(op: UnaryOperator, operand: Expr) -> Self {
        Self::new(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    /// Create a NOT expression
    pub fn not(operand: Expr) -> Self {
        Self::unary(UnaryOperator::Not, operand)
    }

    pub fn neg(operand: Expr) -> Self {
        Self::unary(UnaryOperator::Minus, operand)
    }

    /// Create a binary operation expression
    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Create an AND expression
    pub fn and(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::And, left, right)
    }

    /// Create an OR expression
    pub fn or(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Or, left, right)
    }

    /// Create an equality expression
    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Eq, left, right)
    }

    /// Create a not-equal expression
    pub fn ne(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Ne, left, right)
    }

    /// Create a less-than expression
    pub fn lt(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Lt, left, right)
    }

    /// Create a less-than-or-equal expression
    pub fn le(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Le, left, right)
    }

    /// Create a greater-than expression
    pub fn gt(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Gt, left, right)
    }

    /// Create a greater-than-or-equal expression
    pub fn ge(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Ge, left, right)
    }

    /// Create an addition expression
    pub fn add(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Add, left, right)
    }

    /// Create a subtraction expression
    pub fn sub(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Sub, left, right)
    }

    /// Create a multiplication expression
    pub fn mul(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Mul, left, right)
    }

    /// Create a division expression
    pub fn div(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Div, left, right)
    }

    /// Create a `BETWEEN` expression
    pub fn between(operand: Expr, low: Expr, high: Expr) -> Self {
        Self::new(ExprKind::Between {
            operand: Box::new(operand),
            low: Box::new(low),
            high: Box::new(high),
            negated: false,
        })
    }

    pub fn not_between(operand: Expr, low: Expr, high: Expr) -> Self {
        let mut expr = Self::between(operand, low, high);
        expr.negate_predicate();
        expr
    }

    /// Create an `IN (list)` expression
    pub fn in_list(probe: Expr, list: Vec<Expr>) -> Self {
        Self::new(ExprKind::InList {
            probe: Box::new(probe),
            list,
            negated: false,
        })
    }

    pub fn not_in_list(probe: Expr, list: Vec<Expr>) -> Self {
        let mut expr = Self::in_list(probe, list);
        expr.negate_predicate();
        expr
    }

    /// Create an `IN (SELECT ...)` expression
    pub fn in_subquery(probe: Expr, statement: Box<dyn SubqueryStatement>) -> Self {
        Self::new(ExprKind::InSubquery {
            probe: Box::new(probe),
            subquery: SubqueryNode::new(statement),
            negated: false,
        })
    }

    pub fn not_in_subquery(probe: Expr, statement: Box<dyn SubqueryStatement>) -> Self {
        let mut expr = Self::in_subquery(probe, statement);
        expr.negate_predicate();
        expr
    }

    /// Create a `left op ANY|ALL (SELECT ...)` expression
    pub fn quantified(
        left: Expr,
        op: BinaryOperator,
        quantifier: Quantifier,
        statement: Box<dyn SubqueryStatement>,
    ) -> Self {
        Self::new(ExprKind::Quantified {
            left: Box::new(left),
            op,
            quantifier,
            subquery: SubqueryNode::new(statement),
        })
    }

    /// Create a scalar `(SELECT ...)` expression
    pub fn scalar_subquery(statement: Box<dyn SubqueryStatement>) -> Self {
        Self::new(ExprKind::ScalarSubquery {
            subquery: SubqueryNode::new(statement),
        })
    }

    /// Create an `EXISTS (SELECT ...)` expression
    pub fn exists(statement: Box<dyn SubqueryStatement>) -> Self {
        Self::new(ExprKind::Exists {
            subquery: SubqueryNode::new(statement),
            negated: false,
        })
    }

    pub fn not_exists(statement: Box<dyn SubqueryStatement>) -> Self {
        let mut expr = Self::exists(statement);
        expr.negate_predicate();
        expr
    }

    /// Create a `LIKE` expression
    pub fn like(operand: Expr, pattern: Expr) -> Self {
        Self::like_escape(operand, pattern, None)
    }

    /// Create a `LIKE ... ESCAPE` expression
    pub fn like_escape(operand: Expr, pattern: Expr, escape: Option<char>) -> Self {
        Self::new(ExprKind::Like {
            operand: Box::new(operand),
            pattern: Box::new(pattern),
            escape,
            negated: false,
            compiled: None,
        })
    }

    pub fn not_like(operand: Expr, pattern: Expr) -> Self {
        let mut expr = Self::like(operand, pattern);
        expr.negate_predicate();
        expr
    }

    /// Create a `CONTAINS(column, condition)` expression
    pub fn contains(column: Expr, condition: Expr) -> Self {
        Self::new(ExprKind::Contains {
            column: Box::new(column),
            condition: Box::new(condition),
            query: None,
        })
    }

    /// Create an IS NULL expression
    pub fn is_null(operand: Expr) -> Self {
        Self::new(ExprKind::IsNull {
            operand: Box::new(operand),
            negated: false,
        })
    }

    /// Create an IS NOT NULL expression
    pub fn is_not_null(operand: Expr) -> Self {
        Self::new(ExprKind::IsNull {
            operand: Box::new(operand),
            negated: true,
        })
    }

    /// Create a `CASE` expression; `operand` is set for the simple form
    /// (`CASE x WHEN ...`)
    pub fn case(operand: Option<Expr>, branches: Vec<(Expr, Expr)>, else_result: Option<Expr>) -> Self {
        Self::new(ExprKind::Case {
            operand: operand.map(Box::new),
            branches,
            else_result: else_result.map(Box::new),
        })
    }

    pub fn coalesce(args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Coalesce {
            args,
            first_type: false,
        })
    }

    /// `ISNULL(value, replacement)`
    pub fn isnull(value: Expr, replacement: Expr) -> Self {
        Self::new(ExprKind::Coalesce {
            args: vec![value, replacement],
            first_type: true,
        })
    }

    pub fn nullif(left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::NullIf {
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Create a `CONVERT`/`CAST` expression
    pub fn convert(operand: Expr, target: DataType) -> Self {
        Self::new(ExprKind::Convert {
            operand: Box::new(operand),
            target,
            length: None,
        })
    }

    /// Create a `CONVERT` to a character or binary type of bounded length
    pub fn convert_with_length(operand: Expr, target: DataType, length: usize) -> Self {
        Self::new(ExprKind::Convert {
            operand: Box::new(operand),
            target,
            length: Some(length),
        })
    }

    /// Create a function call; names that are not built in resolve against
    /// the statement's routine registry during Prepare.
    pub fn function(name: &str, args: Vec<Expr>) -> Self {
        match BuiltinFunction::from_name(name) {
            Some(function) => Self::new(ExprKind::Function {
                function,
                args,
                date_part: None,
            }),
            None => Self::new(ExprKind::UserFunction {
                name: name.to_string(),
                args,
                routine: None,
            }),
        }
    }

    /// Create an aggregate call over `arg`
    pub fn aggregate(function: AggregateFunction, arg: Expr) -> Self {
        Self::new(ExprKind::Aggregate {
            function,
            arg: Some(Box::new(arg)),
            accumulator: None,
            result: Value::Null,
        })
    }

    /// `COUNT(*)`
    pub fn count_star() -> Self {
        Self::new(ExprKind::Aggregate {
            function: AggregateFunction::Count,
            arg: None,
            accumulator: None,
            result: Value::Null,
        })
    }

    pub fn system_variable(variable: SystemVariable) -> Self {
        Self::new(ExprKind::SystemVariable(variable))
    }

    /// Attach the source position reported by errors raised from this node.
    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    fn negate_predicate(&mut self) {
        match &mut self.kind {
            ExprKind::Between { negated, .. }
            | ExprKind::InList { negated, .. }
            | ExprKind::InSubquery { negated, .. }
            | ExprKind::Exists { negated, .. }
            | ExprKind::Like { negated, .. }
            | ExprKind::IsNull { negated, .. } => *negated = !*negated,
            _ => {}
        }
    }

    /// Declared result type; fixed once the node is prepared.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn is_prepared(&self) -> bool {
        self.flags.prepared
    }

    /// Whether the node is a compile-time literal.
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Literal)
    }

    pub fn is_optimizable(&self) -> bool {
        self.flags.optimizable
    }

    /// The cached value of the last evaluation.
    pub fn value(&self) -> &Value {
        self.cell.value()
    }

    /// The value of a literal node.
    pub fn literal_value(&self) -> Option<&Value> {
        match self.kind {
            ExprKind::Literal => Some(self.cell.value()),
            _ => None,
        }
    }

    pub fn column_binding(&self) -> Option<&ColumnBinding> {
        match &self.kind {
            ExprKind::Column { binding, .. } => binding.as_ref(),
            _ => None,
        }
    }

    pub fn category(&self) -> NodeCategory {
        match &self.kind {
            ExprKind::Literal => NodeCategory::Literal,
            ExprKind::Column { external: true, .. } => NodeCategory::ExternalColumn,
            ExprKind::Column { .. } => NodeCategory::Column,
            ExprKind::Parameter { .. } => NodeCategory::Parameter,
            ExprKind::Star { .. } => NodeCategory::Star,
            _ => NodeCategory::General,
        }
    }

    pub fn children(&self) -> Vec<&Expr> {
        let mut out: Vec<&Expr> = Vec::new();
        match &self.kind {
            ExprKind::Literal
            | ExprKind::Column { .. }
            | ExprKind::Parameter { .. }
            | ExprKind::Star { .. }
            | ExprKind::ScalarSubquery { .. }
            | ExprKind::Exists { .. }
            | ExprKind::SystemVariable(_) => {}
            ExprKind::Unary { operand, .. }
            | ExprKind::IsNull { operand, .. }
            | ExprKind::Convert { operand, .. } => out.push(operand),
            ExprKind::Binary { left, right, .. } | ExprKind::NullIf { left, right } => {
                out.push(left);
                out.push(right);
            }
            ExprKind::Between {
                operand, low, high, ..
            } => out.extend([&**operand, &**low, &**high]),
            ExprKind::InList { probe, list, .. } => {
                out.push(probe);
                out.extend(list.iter());
            }
            ExprKind::InSubquery { probe, .. } => out.push(probe),
            ExprKind::Quantified { left, .. } => out.push(left),
            ExprKind::Like {
                operand, pattern, ..
            } => {
                out.push(operand);
                out.push(pattern);
            }
            ExprKind::Contains {
                column, condition, ..
            } => {
                out.push(column);
                out.push(condition);
            }
            ExprKind::Case {
                operand,
                branches,
                else_result,
            } => {
                out.extend(operand.as_deref());
                for (when, then) in branches {
                    out.push(when);
                    out.push(then);
                }
                out.extend(else_result.as_deref());
            }
            ExprKind::Coalesce { args, .. }
            | ExprKind::Function { args, .. }
            | ExprKind::UserFunction { args, .. } => out.extend(args.iter()),
            ExprKind::Aggregate { arg, .. } => out.extend(arg.as_deref()),
        }
        out
    }

    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        let mut out: Vec<&mut Expr> = Vec::new();
        match &mut self.kind {
            ExprKind::Literal
            | ExprKind::Column { .. }
            | ExprKind::Parameter { .. }
            | ExprKind::Star { .. }
            | ExprKind::ScalarSubquery { .. }
            | ExprKind::Exists { .. }
            | ExprKind::SystemVariable(_) => {}
            ExprKind::Unary { operand, .. }
            | ExprKind::IsNull { operand, .. }
            | ExprKind::Convert { operand, .. } => out.push(operand),
            ExprKind::Binary { left, right, .. } | ExprKind::NullIf { left, right } => {
                out.push(left);
                out.push(right);
            }
            ExprKind::Between {
                operand, low, high, ..
            } => {
                out.push(operand);
                out.push(low);
                out.push(high);
            }
            ExprKind::InList { probe, list, .. } => {
                out.push(probe);
                out.extend(list.iter_mut());
            }
            ExprKind::InSubquery { probe, .. } => out.push(probe),
            ExprKind::Quantified { left, .. } => out.push(left),
            ExprKind::Like {
                operand, pattern, ..
            } => {
                out.push(operand);
                out.push(pattern);
            }
            ExprKind::Contains {
                column, condition, ..
            } => {
                out.push(column);
                out.push(condition);
            }
            ExprKind::Case {
                operand,
                branches,
                else_result,
            } => {
                out.extend(operand.as_deref_mut());
                for (when, then) in branches {
                    out.push(when);
                    out.push(then);
                }
                out.extend(else_result.as_deref_mut());
            }
            ExprKind::Coalesce { args, .. }
            | ExprKind::Function { args, .. }
            | ExprKind::UserFunction { args, .. } => out.extend(args.iter_mut()),
            ExprKind::Aggregate { arg, .. } => out.extend(arg.as_deref_mut()),
        }
        out
    }

    /// Force re-evaluation of this node and everything below it.
    pub fn set_changed(&mut self) {
        self.flags.dirty = true;
        for child in self.children_mut() {
            child.set_changed();
        }
    }

    /// Drop a pending forced re-evaluation once a row is fully evaluated.
    pub fn clear_changed(&mut self) {
        self.flags.dirty = false;
        for child in self.children_mut() {
            child.clear_changed();
        }
    }

    /// Whether `self` and `other` compute the same value for every row.
    /// Subqueries and volatile calls are never considered equal.
    pub fn structurally_equals(&self, other: &Expr) -> bool {
        use ExprKind as K;
        if self.flags.prepared && other.flags.prepared && self.data_type != other.data_type {
            return false;
        }
        match (&self.kind, &other.kind) {
            (K::Literal, K::Literal) => {
                self.cell.data_type() == other.cell.data_type() && self.cell.value() == other.cell.value()
            }
            (
                K::Column {
                    qualifier: q1,
                    name: n1,
                    external: e1,
                    binding: b1,
                },
                K::Column {
                    qualifier: q2,
                    name: n2,
                    external: e2,
                    binding: b2,
                },
            ) => match (b1, b2) {
                (Some(b1), Some(b2)) => e1 == e2 && b1.table == b2.table && b1.column == b2.column,
                _ => {
                    e1 == e2
                        && n1.eq_ignore_ascii_case(n2)
                        && match (q1, q2) {
                            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                            (None, None) => true,
                            _ => false,
                        }
                }
            },
            (K::Parameter { name: a }, K::Parameter { name: b }) => {
                a.trim_start_matches('@').eq_ignore_ascii_case(b.trim_start_matches('@'))
            }
            (K::Star { qualifier: a, .. }, K::Star { qualifier: b, .. }) => a == b,
            (K::Unary { op: o1, operand: a }, K::Unary { op: o2, operand: b }) => {
                o1 == o2 && a.structurally_equals(b)
            }
            (
                K::Binary {
                    op: o1,
                    left: l1,
                    right: r1,
                },
                K::Binary {
                    op: o2,
                    left: l2,
                    right: r2,
                },
            ) => o1 == o2 && l1.structurally_equals(l2) && r1.structurally_equals(r2),
            (
                K::Between {
                    operand: a,
                    low: l1,
                    high: h1,
                    negated: n1,
                },
                K::Between {
                    operand: b,
                    low: l2,
                    high: h2,
                    negated: n2,
                },
            ) => n1 == n2 && a.structurally_equals(b) && l1.structurally_equals(l2) && h1.structurally_equals(h2),
            (
                K::InList {
                    probe: a,
                    list: l1,
                    negated: n1,
                },
                K::InList {
                    probe: b,
                    list: l2,
                    negated: n2,
                },
            ) => n1 == n2 && a.structurally_equals(b) && all_equal(l1, l2),
            (
                K::Like {
                    operand: a,
                    pattern: p1,
                    escape: e1,
                    negated: n1,
                    ..
                },
                K::Like {
                    operand: b,
                    pattern: p2,
                    escape: e2,
                    negated: n2,
                    ..
                },
            ) => n1 == n2 && e1 == e2 && a.structurally_equals(b) && p1.structurally_equals(p2),
            (
                K::Contains {
                    column: a,
                    condition: c1,
                    ..
                },
                K::Contains {
                    column: b,
                    condition: c2,
                    ..
                },
            ) => a.structurally_equals(b) && c1.structurally_equals(c2),
            (
                K::IsNull {
                    operand: a,
                    negated: n1,
                },
                K::IsNull {
                    operand: b,
                    negated: n2,
                },
            ) => n1 == n2 && a.structurally_equals(b),
            (
                K::Case {
                    operand: o1,
                    branches: b1,
                    else_result: e1,
                },
                K::Case {
                    operand: o2,
                    branches: b2,
                    else_result: e2,
                },
            ) => {
                option_equal(o1.as_deref(), o2.as_deref())
                    && option_equal(e1.as_deref(), e2.as_deref())
                    && b1.len() == b2.len()
                    && b1
                        .iter()
                        .zip(b2)
                        .all(|((w1, t1), (w2, t2))| w1.structurally_equals(w2) && t1.structurally_equals(t2))
            }
            (
                K::Coalesce {
                    args: a1,
                    first_type: f1,
                },
                K::Coalesce {
                    args: a2,
                    first_type: f2,
                },
            ) => f1 == f2 && all_equal(a1, a2),
            (K::NullIf { left: l1, right: r1 }, K::NullIf { left: l2, right: r2 }) => {
                l1.structurally_equals(l2) && r1.structurally_equals(r2)
            }
            (
                K::Convert {
                    operand: a,
                    target: t1,
                    length: n1,
                },
                K::Convert {
                    operand: b,
                    target: t2,
                    length: n2,
                },
            ) => t1 == t2 && n1 == n2 && a.structurally_equals(b),
            (
                K::Function {
                    function: f1,
                    args: a1,
                    ..
                },
                K::Function {
                    function: f2,
                    args: a2,
                    ..
                },
            ) => f1 == f2 && !f1.is_volatile() && all_equal(a1, a2),
            (
                K::UserFunction {
                    name: n1,
                    args: a1,
                    routine: r1,
                },
                K::UserFunction {
                    name: n2, args: a2, ..
                },
            ) => {
                n1.eq_ignore_ascii_case(n2)
                    && r1.as_ref().map_or(true, |r| r.deterministic)
                    && all_equal(a1, a2)
            }
            (
                K::Aggregate {
                    function: f1,
                    arg: a1,
                    ..
                },
                K::Aggregate {
                    function: f2,
                    arg: a2,
                    ..
                },
            ) => f1 == f2 && option_equal(a1.as_deref(), a2.as_deref()),
            (K::SystemVariable(a), K::SystemVariable(b)) => a == b,
            _ => false,
        }
    }

    /// Redirect every subtree structurally equal to `pattern` to read
    /// `table`/`column` of a materialized row source. Returns the number of
    /// subtrees relinked.
    pub fn redirect_matching(&mut self, pattern: &Expr, table: usize, column: usize) -> usize {
        if self.structurally_equals(pattern) {
            self.switch_to_temp_table(table, column);
            return 1;
        }
        self.children_mut()
            .into_iter()
            .map(|child| child.redirect_matching(pattern, table, column))
            .sum()
    }

    /// Read this node's value from `column` of row source `table` from now on.
    pub fn switch_to_temp_table(&mut self, table: usize, column: usize) {
        log::debug!("redirecting expression to row source {} column {}", table, column);
        self.redirect = Some(Redirect {
            table,
            column,
            seen_version: None,
        });
    }

    pub fn clear_redirect(&mut self) {
        self.redirect = None;
        self.flags.evaluated = false;
    }

    pub fn is_redirected(&self) -> bool {
        self.redirect.is_some()
    }

    /// Number of result columns the node produces (`*` expands).
    pub fn column_count(&self) -> usize {
        match &self.kind {
            ExprKind::Star { bindings, .. } => bindings.len(),
            _ => 1,
        }
    }

    /// Whether the node yields null for every row.
    pub fn always_null(&self) -> bool {
        match &self.kind {
            ExprKind::Literal => self.cell.is_null(),
            ExprKind::Binary { op, left, right } if !op.is_logical() => {
                left.always_null() || right.always_null()
            }
            ExprKind::Unary { op, operand } if *op != UnaryOperator::Not => operand.always_null(),
            ExprKind::Convert { operand, .. } => operand.always_null(),
            ExprKind::NullIf { left, .. } => left.always_null(),
            ExprKind::Coalesce { args, .. } => args.iter().all(Expr::always_null),
            ExprKind::Case {
                branches,
                else_result,
                ..
            } => {
                branches.iter().all(|(_, then)| then.always_null())
                    && else_result.as_deref().map_or(true, Expr::always_null)
            }
            _ => false,
        }
    }

    /// Display width in characters of the node's result.
    pub fn width(&self) -> usize {
        if let Some(width) = self.data_type.fixed_width() {
            return width;
        }
        match &self.kind {
            ExprKind::Literal => match self.cell.value() {
                Value::String(s) => s.chars().count(),
                Value::Binary(b) => b.len(),
                _ => VARIABLE_WIDTH,
            },
            ExprKind::Column {
                binding: Some(binding),
                ..
            } => binding.metadata.max_length.unwrap_or(VARIABLE_WIDTH),
            ExprKind::Convert {
                length: Some(length),
                ..
            } => *length,
            ExprKind::Convert { operand, .. } => operand.width(),
            ExprKind::Binary { left, right, .. } => left.width() + right.width(),
            ExprKind::Coalesce { args, .. } => args.iter().map(Expr::width).max().unwrap_or(0),
            ExprKind::Case {
                branches,
                else_result,
                ..
            } => branches
                .iter()
                .map(|(_, then)| then.width())
                .chain(else_result.as_deref().map(Expr::width))
                .max()
                .unwrap_or(0),
            ExprKind::NullIf { left, .. } => left.width(),
            ExprKind::Function {
                function:
                    BuiltinFunction::Upper
                    | BuiltinFunction::Lower
                    | BuiltinFunction::LTrim
                    | BuiltinFunction::RTrim
                    | BuiltinFunction::Substring
                    | BuiltinFunction::Left
                    | BuiltinFunction::Right,
                args,
                ..
            } => args.first().map_or(VARIABLE_WIDTH, Expr::width),
            _ => VARIABLE_WIDTH,
        }
    }
}

fn all_equal(a: &[Expr], b: &[Expr]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.structurally_equals(y))
}

fn option_equal(a: Option<&Expr>, b: Option<&Expr>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.structurally_equals(b),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::subquery::ValuesSubquery;

    #[test]
    fn test_expression_builders() {
        let literal = Expr::int(10);
        assert!(literal.is_constant());
        assert_eq!(literal.category(), NodeCategory::Literal);
        assert_eq!(literal.literal_value(), Some(&Value::Int(10)));

        let column = Expr::column("age");
        assert_eq!(column.category(), NodeCategory::Column);
        assert!(!column.is_constant());
        assert_eq!(Expr::outer_column("o", "id").category(), NodeCategory::ExternalColumn);
        assert_eq!(Expr::parameter("@p").category(), NodeCategory::Parameter);
        assert_eq!(Expr::star(None).category(), NodeCategory::Star);

        let predicate = Expr::and(
            Expr::gt(Expr::column("age"), Expr::int(18)),
            Expr::is_not_null(Expr::column("name")),
        );
        assert_eq!(predicate.category(), NodeCategory::General);
        assert_eq!(predicate.children().len(), 2);

        assert!(matches!(Expr::function("upper", vec![]).kind, ExprKind::Function { .. }));
        assert!(matches!(Expr::function("my_udf", vec![]).kind, ExprKind::UserFunction { .. }));
    }

    #[test]
    fn test_negated_builders() {
        let expr = Expr::not_in_list(Expr::column("a"), vec![Expr::int(1)]);
        assert!(matches!(expr.kind, ExprKind::InList { negated: true, .. }));
        let expr = Expr::not_like(Expr::column("a"), Expr::string("x%"));
        assert!(matches!(expr.kind, ExprKind::Like { negated: true, .. }));
    }

    #[test]
    fn test_children_cover_case_branches() {
        let expr = Expr::case(
            Some(Expr::column("x")),
            vec![(Expr::int(1), Expr::string("one")), (Expr::int(2), Expr::string("two"))],
            Some(Expr::string("many")),
        );
        assert_eq!(expr.children().len(), 6);
    }

    #[test]
    fn test_structural_equality() {
        let a = Expr::add(Expr::column("price"), Expr::int(1));
        let b = Expr::add(Expr::column("PRICE"), Expr::int(1));
        let c = Expr::add(Expr::column("price"), Expr::int(2));
        assert!(a.structurally_equals(&b));
        assert!(!a.structurally_equals(&c));
        assert!(!Expr::column("a").structurally_equals(&Expr::qualified_column("t", "a")));

        let now = Expr::function("getdate", vec![]);
        assert!(!now.structurally_equals(&Expr::function("getdate", vec![])));

        let sub = |v| Box::new(ValuesSubquery::column(DataType::Int, vec![Value::Int(v)]));
        assert!(!Expr::scalar_subquery(sub(1)).structurally_equals(&Expr::scalar_subquery(sub(1))));
    }

    #[test]
    fn test_redirect_matching() {
        let pattern = Expr::aggregate(AggregateFunction::Sum, Expr::column("qty"));
        let mut tree = Expr::div(
            Expr::aggregate(AggregateFunction::Sum, Expr::column("qty")),
            Expr::count_star(),
        );
        assert_eq!(tree.redirect_matching(&pattern, 3, 0), 1);
        let ExprKind::Binary { left, right, .. } = &tree.kind else {
            panic!("expected binary");
        };
        assert!(left.is_redirected());
        assert!(!right.is_redirected());
    }

    #[test]
    fn test_always_null_and_width() {
        assert!(Expr::add(Expr::column("a"), Expr::null()).always_null());
        assert!(!Expr::or(Expr::column("a"), Expr::null()).always_null());
        assert!(Expr::coalesce(vec![Expr::null(), Expr::null()]).always_null());
        assert!(!Expr::isnull(Expr::null(), Expr::int(0)).always_null());

        assert_eq!(Expr::string("hello").width(), 5);
        assert_eq!(Expr::int(1).width(), 11);
        assert_eq!(Expr::star(None).column_count(), 0);
    }
}
