//! Constraint pushdown.
//!
//! Predicate nodes whose operands are a plain column against literals,
//! parameters or outer columns can register an index constraint with a
//! [`ConstraintAccumulator`] instead of being evaluated row by row.
//! Registration is postfix: leaves push constraints, AND/OR/NOT combine the
//! topmost entries.
//!
//! A wildcard-free `LIKE` registers an equality, which matches under the
//! trailing-space rules of `=` while `LIKE` itself treats trailing spaces as
//! significant. That constraint is only a candidate set: the predicate must
//! still be evaluated on the rows it yields, and it is never pushed under a
//! negation.

use crate::context::StatementContext;
use crate::expression::expr::{Expr, ExprKind};
use crate::expression::operator::{BinaryOperator, UnaryOperator};
use crate::pattern::PrefixConstraint;
use crate::value::Value;
use std::fmt;

/// The indexed side of a constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintColumn {
    /// Row source slot
    pub table: usize,
    pub column: usize,
    pub name: String,
}

/// The bound side of a constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintValue {
    Literal(Value),
    /// Resolved by the accumulator when the scan is opened
    Parameter(String),
    /// Column of an enclosing query; fixed for the duration of one inner scan
    OuterColumn { table: usize, column: usize },
}

impl fmt::Display for ConstraintValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintValue::Literal(v) => write!(f, "{}", v),
            ConstraintValue::Parameter(name) => write!(f, "@{}", name.trim_start_matches('@')),
            ConstraintValue::OuterColumn { table, column } => write!(f, "outer[{}].{}", table, column),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeBound {
    pub value: ConstraintValue,
    pub inclusive: bool,
}

impl RangeBound {
    pub fn inclusive(value: ConstraintValue) -> Self {
        Self {
            value,
            inclusive: true,
        }
    }

    pub fn exclusive(value: ConstraintValue) -> Self {
        Self {
            value,
            inclusive: false,
        }
    }
}

/// Receiver of index constraints.
///
/// Every registration returns whether it was accepted. A false return from
/// any step makes the predicate fall back to row-by-row filtering; callers
/// undo partial registrations with `rollback`.
pub trait ConstraintAccumulator {
    fn add_equality(&mut self, column: ConstraintColumn, value: ConstraintValue) -> bool;

    /// Either bound may be open.
    fn add_range(
        &mut self,
        column: ConstraintColumn,
        low: Option<RangeBound>,
        high: Option<RangeBound>,
    ) -> bool;

    /// `column <> value`
    fn add_inequality(&mut self, column: ConstraintColumn, value: ConstraintValue) -> bool;

    fn add_membership(&mut self, column: ConstraintColumn, values: Vec<ConstraintValue>) -> bool;

    fn add_is_null(&mut self, column: ConstraintColumn) -> bool;

    /// Replace the two most recent constraints with their conjunction.
    fn combine_and(&mut self) -> bool;

    /// Replace the two most recent constraints with their disjunction.
    fn combine_or(&mut self) -> bool;

    /// Replace the most recent constraint with its negation.
    fn negate(&mut self) -> bool;

    fn checkpoint(&self) -> usize;

    fn rollback(&mut self, checkpoint: usize);

    /// Drop everything registered; the statement filters row by row.
    fn reset_to_row_by_row(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Equality {
        column: ConstraintColumn,
        value: ConstraintValue,
    },
    Range {
        column: ConstraintColumn,
        low: Option<RangeBound>,
        high: Option<RangeBound>,
    },
    Inequality {
        column: ConstraintColumn,
        value: ConstraintValue,
    },
    Membership {
        column: ConstraintColumn,
        values: Vec<ConstraintValue>,
    },
    IsNull {
        column: ConstraintColumn,
    },
    And(Box<Constraint>, Box<Constraint>),
    Or(Box<Constraint>, Box<Constraint>),
    Not(Box<Constraint>),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Equality { column, value } => write!(f, "{} = {}", column.name, value),
            Constraint::Range { column, low, high } => {
                match low {
                    Some(b) => write!(f, "{}{}", if b.inclusive { "[" } else { "(" }, b.value)?,
                    None => write!(f, "(-inf")?,
                }
                write!(f, " <= {} <= ", column.name)?;
                match high {
                    Some(b) => write!(f, "{}{}", b.value, if b.inclusive { "]" } else { ")" }),
                    None => write!(f, "+inf)"),
                }
            }
            Constraint::Inequality { column, value } => write!(f, "{} <> {}", column.name, value),
            Constraint::Membership { column, values } => {
                let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{} IN ({})", column.name, values.join(", "))
            }
            Constraint::IsNull { column } => write!(f, "{} IS NULL", column.name),
            Constraint::And(l, r) => write!(f, "({} AND {})", l, r),
            Constraint::Or(l, r) => write!(f, "({} OR {})", l, r),
            Constraint::Not(c) => write!(f, "NOT {}", c),
        }
    }
}

/// Accumulator that keeps registered constraints on a stack.
#[derive(Debug, Clone)]
pub struct ConstraintStack {
    stack: Vec<Constraint>,
    allow_or: bool,
    row_by_row: bool,
}

impl Default for ConstraintStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintStack {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            allow_or: true,
            row_by_row: false,
        }
    }

    /// An accumulator whose index cannot serve disjunctions.
    pub fn without_or() -> Self {
        Self {
            allow_or: false,
            ..Self::new()
        }
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.stack
    }

    /// The single combined constraint, if registration completed.
    pub fn root(&self) -> Option<&Constraint> {
        match self.stack.as_slice() {
            [root] => Some(root),
            _ => None,
        }
    }

    pub fn is_row_by_row(&self) -> bool {
        self.row_by_row
    }

    fn push(&mut self, constraint: Constraint) -> bool {
        log::trace!("registered constraint {}", constraint);
        self.stack.push(constraint);
        true
    }

    fn pop_pair(&mut self) -> Option<(Constraint, Constraint)> {
        if self.stack.len() < 2 {
            return None;
        }
        let right = self.stack.pop()?;
        let left = self.stack.pop()?;
        Some((left, right))
    }
}

impl ConstraintAccumulator for ConstraintStack {
    fn add_equality(&mut self, column: ConstraintColumn, value: ConstraintValue) -> bool {
        self.push(Constraint::Equality { column, value })
    }

    fn add_range(
        &mut self,
        column: ConstraintColumn,
        low: Option<RangeBound>,
        high: Option<RangeBound>,
    ) -> bool {
        if low.is_none() && high.is_none() {
            return false;
        }
        self.push(Constraint::Range { column, low, high })
    }

    fn add_inequality(&mut self, column: ConstraintColumn, value: ConstraintValue) -> bool {
        self.push(Constraint::Inequality { column, value })
    }

    fn add_membership(&mut self, column: ConstraintColumn, values: Vec<ConstraintValue>) -> bool {
        if values.is_empty() {
            return false;
        }
        self.push(Constraint::Membership { column, values })
    }

    fn add_is_null(&mut self, column: ConstraintColumn) -> bool {
        self.push(Constraint::IsNull { column })
    }

    fn combine_and(&mut self) -> bool {
        match self.pop_pair() {
            Some((l, r)) => self.push(Constraint::And(Box::new(l), Box::new(r))),
            None => false,
        }
    }

    fn combine_or(&mut self) -> bool {
        if !self.allow_or {
            return false;
        }
        match self.pop_pair() {
            Some((l, r)) => self.push(Constraint::Or(Box::new(l), Box::new(r))),
            None => false,
        }
    }

    fn negate(&mut self) -> bool {
        match self.stack.pop() {
            Some(c) => self.push(Constraint::Not(Box::new(c))),
            None => false,
        }
    }

    fn checkpoint(&self) -> usize {
        self.stack.len()
    }

    fn rollback(&mut self, checkpoint: usize) {
        self.stack.truncate(checkpoint);
    }

    fn reset_to_row_by_row(&mut self) {
        self.stack.clear();
        self.row_by_row = true;
    }
}

impl Expr {
    /// The column this node reads, if it is a plain reference into the
    /// current query.
    fn constraint_column(&self) -> Option<ConstraintColumn> {
        match &self.kind {
            ExprKind::Column {
                external: false,
                binding: Some(binding),
                ..
            } if self.redirect.is_none() => Some(ConstraintColumn {
                table: binding.table,
                column: binding.column,
                name: binding.metadata.name.clone(),
            }),
            _ => None,
        }
    }

    /// The value this node stands for, if it is fixed for one scan.
    fn constraint_value(&self) -> Option<ConstraintValue> {
        match &self.kind {
            ExprKind::Literal => Some(ConstraintValue::Literal(self.cell.value().clone())),
            ExprKind::Parameter { name } => Some(ConstraintValue::Parameter(name.clone())),
            ExprKind::Column {
                external: true,
                binding: Some(binding),
                ..
            } => Some(ConstraintValue::OuterColumn {
                table: binding.table,
                column: binding.column,
            }),
            _ => None,
        }
    }

    /// Whether the operand shape allows `optimize`; decided once at prepare.
    pub(crate) fn compute_optimizable(&self) -> bool {
        let is_bound = |e: &Expr| e.constraint_value().is_some();
        let is_column = |e: &Expr| e.constraint_column().is_some();
        match &self.kind {
            ExprKind::Binary { op, left, right } if op.is_logical() => {
                left.is_optimizable() && right.is_optimizable()
            }
            ExprKind::Binary { op, left, right } if op.is_comparison() => {
                (is_column(left) && is_bound(right)) || (is_column(right) && is_bound(left))
            }
            ExprKind::Unary {
                op: UnaryOperator::Not,
                operand,
            } => operand.is_optimizable() && operand.constrains_exactly(),
            ExprKind::Between {
                operand, low, high, ..
            } => is_column(operand) && is_bound(low) && is_bound(high),
            ExprKind::InList { probe, list, .. } => {
                is_column(probe) && !list.is_empty() && list.iter().all(is_bound)
            }
            ExprKind::IsNull { operand, .. } => is_column(operand),
            ExprKind::Like {
                operand,
                pattern,
                compiled: Some(compiled),
                negated,
                ..
            } => {
                is_column(operand)
                    && pattern.is_constant()
                    && match compiled.prefix_constraint() {
                        Some(PrefixConstraint::Exact(_)) => !*negated,
                        Some(PrefixConstraint::Prefix(_)) => true,
                        None => false,
                    }
            }
            _ => false,
        }
    }

    /// Whether the constraint this node registers selects exactly the rows
    /// the predicate accepts, rather than a superset of them.
    fn constrains_exactly(&self) -> bool {
        match &self.kind {
            ExprKind::Binary { op, left, right } if op.is_logical() => {
                left.constrains_exactly() && right.constrains_exactly()
            }
            ExprKind::Unary {
                op: UnaryOperator::Not,
                operand,
            } => operand.constrains_exactly(),
            ExprKind::Like {
                compiled: Some(compiled),
                ..
            } => !matches!(compiled.prefix_constraint(), Some(PrefixConstraint::Exact(_))),
            _ => true,
        }
    }

    /// Register this predicate with `acc`. Returns false, leaving `acc` as
    /// it was, when the node cannot be expressed as a constraint.
    pub fn optimize(&self, ctx: &StatementContext, acc: &mut dyn ConstraintAccumulator) -> bool {
        if !self.flags.optimizable {
            return false;
        }
        let mark = acc.checkpoint();
        let registered = self.register(ctx, acc);
        if !registered {
            log::debug!("constraint registration failed, rolling back to {}", mark);
            acc.rollback(mark);
        }
        registered
    }

    fn register(&self, ctx: &StatementContext, acc: &mut dyn ConstraintAccumulator) -> bool {
        match &self.kind {
            ExprKind::Binary {
                op: BinaryOperator::And,
                left,
                right,
            } => left.optimize(ctx, acc) && right.optimize(ctx, acc) && acc.combine_and(),
            ExprKind::Binary {
                op: BinaryOperator::Or,
                left,
                right,
            } => left.optimize(ctx, acc) && right.optimize(ctx, acc) && acc.combine_or(),
            ExprKind::Binary { op, left, right } => {
                let (column, op, value) = match (left.constraint_column(), right.constraint_value()) {
                    (Some(column), Some(value)) => (column, *op, value),
                    _ => match (right.constraint_column(), left.constraint_value()) {
                        (Some(column), Some(value)) => (column, op.flipped(), value),
                        _ => return false,
                    },
                };
                register_comparison(acc, column, op, value)
            }
            ExprKind::Unary {
                op: UnaryOperator::Not,
                operand,
            } => operand.optimize(ctx, acc) && acc.negate(),
            ExprKind::Between {
                operand,
                low,
                high,
                negated,
            } => {
                let (Some(column), Some(low), Some(high)) = (
                    operand.constraint_column(),
                    low.constraint_value(),
                    high.constraint_value(),
                ) else {
                    return false;
                };
                acc.add_range(
                    column,
                    Some(RangeBound::inclusive(low)),
                    Some(RangeBound::inclusive(high)),
                ) && (!*negated || acc.negate())
            }
            ExprKind::InList {
                probe,
                list,
                negated,
            } => {
                let Some(column) = probe.constraint_column() else {
                    return false;
                };
                let Some(values) = list
                    .iter()
                    .map(Expr::constraint_value)
                    .collect::<Option<Vec<_>>>()
                else {
                    return false;
                };
                acc.add_membership(column, values) && (!*negated || acc.negate())
            }
            ExprKind::IsNull { operand, negated } => match operand.constraint_column() {
                Some(column) => acc.add_is_null(column) && (!*negated || acc.negate()),
                None => false,
            },
            ExprKind::Like {
                operand,
                compiled: Some(compiled),
                negated,
                ..
            } => {
                let (Some(column), Some(prefix)) =
                    (operand.constraint_column(), compiled.prefix_constraint())
                else {
                    return false;
                };
                let registered = match prefix {
                    PrefixConstraint::Exact(s) => {
                        acc.add_equality(column, ConstraintValue::Literal(Value::String(s)))
                    }
                    PrefixConstraint::Prefix(s) => {
                        let mut upper = s.clone();
                        upper.push(ctx.settings.max_char);
                        acc.add_range(
                            column,
                            Some(RangeBound::inclusive(ConstraintValue::Literal(Value::String(s)))),
                            Some(RangeBound::exclusive(ConstraintValue::Literal(Value::String(
                                upper,
                            )))),
                        )
                    }
                };
                registered && (!*negated || acc.negate())
            }
            _ => false,
        }
    }
}

fn register_comparison(
    acc: &mut dyn ConstraintAccumulator,
    column: ConstraintColumn,
    op: BinaryOperator,
    value: ConstraintValue,
) -> bool {
    match op {
        BinaryOperator::Eq => acc.add_equality(column, value),
        BinaryOperator::Ne => acc.add_inequality(column, value),
        BinaryOperator::Lt => acc.add_range(column, None, Some(RangeBound::exclusive(value))),
        BinaryOperator::Le => acc.add_range(column, None, Some(RangeBound::inclusive(value))),
        BinaryOperator::Gt => acc.add_range(column, Some(RangeBound::exclusive(value)), None),
        BinaryOperator::Ge => acc.add_range(column, Some(RangeBound::inclusive(value)), None),
        _ => false,
    }
}

/// Optimize a statement's filter. When the root cannot be pushed down the
/// accumulator is reset and the statement filters row by row.
pub fn optimize_predicate(
    root: &Expr,
    ctx: &StatementContext,
    acc: &mut dyn ConstraintAccumulator,
) -> bool {
    if root.optimize(ctx, acc) {
        return true;
    }
    log::debug!("predicate is not sargable, filtering row by row");
    acc.reset_to_row_by_row();
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnMetadata, SchemaCatalog, TableSchema};
    use crate::context::MemoryRows;
    use crate::value::DataType;

    fn context() -> StatementContext {
        let mut catalog = SchemaCatalog::new();
        catalog.add_table(TableSchema::new(
            "orders",
            vec![
                ColumnMetadata::new("id", DataType::Int).key(),
                ColumnMetadata::new("customer", DataType::NVarChar).with_max_length(40),
                ColumnMetadata::new("total", DataType::Money),
            ],
        ));
        let mut ctx = StatementContext::new(Box::new(catalog));
        ctx.parameters.declare("@min", DataType::Int);
        ctx
    }

    fn column(index: usize, name: &str) -> ConstraintColumn {
        ConstraintColumn {
            table: 0,
            column: index,
            name: name.into(),
        }
    }

    fn int(v: i32) -> ConstraintValue {
        ConstraintValue::Literal(Value::Int(v))
    }

    fn prepared(mut expr: Expr, ctx: &StatementContext) -> Expr {
        expr.prepare(ctx).unwrap();
        expr
    }

    #[test]
    fn test_between_on_plain_column() {
        let ctx = context();
        let expr = prepared(Expr::between(Expr::column("id"), Expr::int(1), Expr::int(10)), &ctx);
        assert!(expr.is_optimizable());

        let mut acc = ConstraintStack::new();
        assert!(optimize_predicate(&expr, &ctx, &mut acc));
        assert_eq!(
            acc.root(),
            Some(&Constraint::Range {
                column: column(0, "id"),
                low: Some(RangeBound::inclusive(int(1))),
                high: Some(RangeBound::inclusive(int(10))),
            })
        );
    }

    #[test]
    fn test_between_on_computed_expression() {
        let ctx = context();
        let expr = prepared(
            Expr::between(
                Expr::add(Expr::column("id"), Expr::int(1)),
                Expr::int(1),
                Expr::int(10),
            ),
            &ctx,
        );
        assert!(!expr.is_optimizable());
        let mut acc = ConstraintStack::new();
        assert!(!optimize_predicate(&expr, &ctx, &mut acc));
        assert!(acc.is_row_by_row());
        assert!(acc.constraints().is_empty());
    }

    #[test]
    fn test_literal_on_left_is_flipped() {
        let ctx = context();
        let expr = prepared(Expr::lt(Expr::int(5), Expr::column("id")), &ctx);
        let mut acc = ConstraintStack::new();
        assert!(expr.optimize(&ctx, &mut acc));
        assert_eq!(
            acc.root(),
            Some(&Constraint::Range {
                column: column(0, "id"),
                low: Some(RangeBound::exclusive(int(5))),
                high: None,
            })
        );
    }

    #[test]
    fn test_parameter_and_membership() {
        let ctx = context();
        let expr = prepared(
            Expr::and(
                Expr::ge(Expr::column("id"), Expr::parameter("@min")),
                Expr::in_list(Expr::column("customer"), vec![Expr::string("a"), Expr::string("b")]),
            ),
            &ctx,
        );
        let mut acc = ConstraintStack::new();
        assert!(expr.optimize(&ctx, &mut acc));
        let Some(Constraint::And(left, right)) = acc.root() else {
            panic!("expected conjunction, got {:?}", acc.constraints());
        };
        assert!(matches!(
            left.as_ref(),
            Constraint::Range { low: Some(RangeBound { value: ConstraintValue::Parameter(_), inclusive: true }), .. }
        ));
        assert!(matches!(right.as_ref(), Constraint::Membership { values, .. } if values.len() == 2));
    }

    #[test]
    fn test_or_rolls_back_when_rejected() {
        let ctx = context();
        let expr = prepared(
            Expr::or(
                Expr::eq(Expr::column("id"), Expr::int(1)),
                Expr::eq(Expr::column("id"), Expr::int(2)),
            ),
            &ctx,
        );
        assert!(expr.is_optimizable());
        let mut acc = ConstraintStack::without_or();
        acc.add_is_null(column(2, "total"));
        assert!(!expr.optimize(&ctx, &mut acc));
        // the unrelated entry registered before the OR survives
        assert_eq!(acc.constraints().len(), 1);
    }

    #[test]
    fn test_and_with_unsargable_side_is_not_optimizable() {
        let ctx = context();
        let expr = prepared(
            Expr::and(
                Expr::eq(Expr::column("id"), Expr::int(1)),
                Expr::eq(Expr::function("len", vec![Expr::column("customer")]), Expr::int(3)),
            ),
            &ctx,
        );
        assert!(!expr.is_optimizable());
    }

    #[test]
    fn test_like_prefix_becomes_range() {
        let ctx = context();
        let expr = prepared(Expr::like(Expr::column("customer"), Expr::string("smith%")), &ctx);
        assert!(expr.is_optimizable());
        let mut acc = ConstraintStack::new();
        assert!(expr.optimize(&ctx, &mut acc));
        let upper = format!("smith{}", ctx.settings.max_char);
        assert_eq!(
            acc.root(),
            Some(&Constraint::Range {
                column: column(1, "customer"),
                low: Some(RangeBound::inclusive(ConstraintValue::Literal(Value::String("smith".into())))),
                high: Some(RangeBound::exclusive(ConstraintValue::Literal(Value::String(upper)))),
            })
        );

        let exact = prepared(Expr::like(Expr::column("customer"), Expr::string("smith")), &ctx);
        let mut acc = ConstraintStack::new();
        assert!(exact.optimize(&ctx, &mut acc));
        assert!(matches!(acc.root(), Some(Constraint::Equality { .. })));

        let suffix = prepared(Expr::like(Expr::column("customer"), Expr::string("%smith")), &ctx);
        assert!(!suffix.is_optimizable());
    }

    #[test]
    fn test_exact_like_is_a_candidate_set() {
        let mut ctx = context();
        ctx.attach_source(
            0,
            Box::new(MemoryRows::new(vec![vec![
                Value::Int(1),
                Value::String("smith ".into()),
                Value::money(10, 0),
            ]])),
        );
        // the equality would admit 'smith ', so the row still has to be tested
        let mut exact = prepared(Expr::like(Expr::column("customer"), Expr::string("smith")), &ctx);
        let mut acc = ConstraintStack::new();
        assert!(exact.optimize(&ctx, &mut acc));
        assert_eq!(exact.execute(&ctx).unwrap(), &Value::Bit(false));

        let negated = prepared(Expr::not_like(Expr::column("customer"), Expr::string("smith")), &ctx);
        assert!(!negated.is_optimizable());
        let wrapped = prepared(
            Expr::not(Expr::and(
                Expr::like(Expr::column("customer"), Expr::string("smith")),
                Expr::gt(Expr::column("id"), Expr::int(0)),
            )),
            &ctx,
        );
        assert!(!wrapped.is_optimizable());
        let mut acc = ConstraintStack::new();
        assert!(!optimize_predicate(&wrapped, &ctx, &mut acc));

        let prefix = prepared(Expr::not_like(Expr::column("customer"), Expr::string("smith%")), &ctx);
        assert!(prefix.is_optimizable());
    }

    #[test]
    fn test_negated_forms() {
        let ctx = context();
        let expr = prepared(Expr::is_not_null(Expr::column("total")), &ctx);
        let mut acc = ConstraintStack::new();
        assert!(expr.optimize(&ctx, &mut acc));
        assert_eq!(acc.root().map(|c| c.to_string()), Some("NOT total IS NULL".to_string()));

        let expr = prepared(Expr::not(Expr::ne(Expr::column("id"), Expr::int(3))), &ctx);
        let mut acc = ConstraintStack::new();
        assert!(expr.optimize(&ctx, &mut acc));
        assert_eq!(acc.root().map(|c| c.to_string()), Some("NOT id <> 3".to_string()));
    }
}
