//! Expression evaluation.
//!
//! `execute` recomputes a node only when `is_changed` says an input moved.
//! Change is derived bottom-up on every call: a column compares its row
//! source's version with the one it last read, a parameter compares the
//! binding version, and every other node asks its children.

use crate::aggregate::AggregateAccumulator;
use crate::context::StatementContext;
use crate::expression::error::{ExpressionError, ExpressionResult};
use crate::expression::expr::{Expr, ExprKind, Redirect, SystemVariable};
use crate::expression::function::BuiltinFunction;
use crate::expression::operator::{BinaryOperator, UnaryOperator};
use crate::expression::subquery::{in_values, quantified_compare, scalar_value};
use crate::pattern::{FullTextQuery, LikePattern};
use crate::value::arith::{bit_not, negate};
use crate::value::{arithmetic, compare_values, convert, DataType, Value};
use std::cmp::Ordering;

fn not_prepared() -> ExpressionError {
    ExpressionError::evaluation("expression was executed before it was prepared")
}

fn truth(value: &Value) -> Option<bool> {
    value.as_bool()
}

fn from_truth(value: Option<bool>) -> Value {
    value.map_or(Value::Null, Value::Bit)
}

/// Compare two operand values in the common type of their static types, so
/// a character column against a number compares numerically.
fn compare_as(
    left: &Value,
    left_type: DataType,
    right: &Value,
    right_type: DataType,
    cs: bool,
) -> ExpressionResult<Option<Ordering>> {
    if left.is_null() || right.is_null() {
        return Ok(None);
    }
    match left_type.max_type(right_type) {
        Some(common) if left_type != right_type => {
            let l = convert(left.clone(), common)?;
            let r = convert(right.clone(), common)?;
            compare_values(&l, &r, cs)
        }
        _ => compare_values(left, right, cs),
    }
}

/// Three-valued AND.
fn and3(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

/// Three-valued OR.
fn or3(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupCall {
    Create,
    Add,
}

impl Expr {
    /// Whether the next `execute` has to recompute this node.
    pub fn is_changed(&self, ctx: &StatementContext) -> bool {
        if let Some(redirect) = &self.redirect {
            return ctx
                .source(redirect.table)
                .map_or(true, |s| Some(s.row_version()) != redirect.seen_version);
        }
        if matches!(self.kind, ExprKind::Literal) {
            return false;
        }
        if !self.flags.evaluated || self.flags.dirty {
            return true;
        }
        match &self.kind {
            ExprKind::Column {
                binding: Some(binding),
                ..
            } => ctx
                .source(binding.table)
                .map_or(true, |s| Some(s.row_version()) != self.seen_version),
            ExprKind::Column { .. } => true,
            ExprKind::Parameter { .. } => Some(ctx.parameters.version()) != self.seen_version,
            ExprKind::Function { function, .. } if function.is_volatile() => true,
            ExprKind::UserFunction { routine, .. }
                if routine.as_ref().map_or(true, |r| !r.deterministic) =>
            {
                true
            }
            ExprKind::SystemVariable(_) => true,
            // refreshed by finish_group
            ExprKind::Aggregate { .. } => false,
            ExprKind::InSubquery { subquery, .. }
            | ExprKind::Quantified { subquery, .. }
            | ExprKind::ScalarSubquery { subquery }
            | ExprKind::Exists { subquery, .. } => {
                subquery.is_changed(ctx) || self.children().iter().any(|c| c.is_changed(ctx))
            }
            _ => self.children().iter().any(|c| c.is_changed(ctx)),
        }
    }

    /// Current value of the node, recomputed if any input changed.
    pub fn execute(&mut self, ctx: &StatementContext) -> ExpressionResult<&Value> {
        if let Some(redirect) = self.redirect {
            let source = ctx.source(redirect.table)?;
            let version = source.row_version();
            if redirect.seen_version != Some(version) {
                let value = source.value(redirect.column)?;
                self.cell.set(value).map_err(|e| e.at(self.position))?;
                self.redirect = Some(Redirect {
                    seen_version: Some(version),
                    ..redirect
                });
            }
            return Ok(self.cell.value());
        }
        if self.is_changed(ctx) {
            let position = self.position;
            let value = self.compute(ctx).map_err(|e| e.at(position))?;
            self.cell.set(value).map_err(|e| e.at(position))?;
            self.flags.evaluated = true;
            self.flags.dirty = false;
        }
        Ok(self.cell.value())
    }

    pub(crate) fn compute(&mut self, ctx: &StatementContext) -> ExpressionResult<Value> {
        let data_type = self.data_type;
        let cs = ctx.culture.case_sensitive;
        match &mut self.kind {
            ExprKind::Literal => Ok(self.cell.value().clone()),

            ExprKind::Column { binding, .. } => {
                let binding = binding.as_ref().ok_or_else(not_prepared)?;
                let source = ctx.source(binding.table)?;
                self.seen_version = Some(source.row_version());
                source.value(binding.column)
            }

            ExprKind::Parameter { name } => {
                self.seen_version = Some(ctx.parameters.version());
                ctx.parameters.value(name)
            }

            ExprKind::Star { .. } => Err(ExpressionError::evaluation(
                "'*' cannot be evaluated as a scalar expression",
            )),

            ExprKind::Unary { op, operand } => {
                let value = operand.execute(ctx)?.clone();
                match op {
                    UnaryOperator::Not => Ok(from_truth(truth(&value).map(|b| !b))),
                    UnaryOperator::Plus => Ok(value),
                    UnaryOperator::Minus => negate(value),
                    UnaryOperator::BitNot => bit_not(value),
                }
            }

            ExprKind::Binary { op, left, right } => match op {
                BinaryOperator::And => {
                    let l = truth(left.execute(ctx)?);
                    if l == Some(false) {
                        return Ok(Value::Bit(false));
                    }
                    let r = truth(right.execute(ctx)?);
                    Ok(from_truth(and3(l, r)))
                }
                BinaryOperator::Or => {
                    let l = truth(left.execute(ctx)?);
                    if l == Some(true) {
                        return Ok(Value::Bit(true));
                    }
                    let r = truth(right.execute(ctx)?);
                    Ok(from_truth(or3(l, r)))
                }
                op if op.is_comparison() => {
                    let (lt, rt) = (left.data_type, right.data_type);
                    let l = left.execute(ctx)?.clone();
                    let r = right.execute(ctx)?;
                    Ok(from_truth(
                        compare_as(&l, lt, r, rt, cs)?.map(|ordering| op.accepts(ordering)),
                    ))
                }
                op => {
                    let l = left.execute(ctx)?.clone();
                    let r = right.execute(ctx)?.clone();
                    arithmetic(*op, l, r, data_type)
                }
            },

            ExprKind::Between {
                operand,
                low,
                high,
                negated,
            } => {
                let (vt, lt, ht) = (operand.data_type, low.data_type, high.data_type);
                let value = operand.execute(ctx)?.clone();
                let above = compare_as(&value, vt, low.execute(ctx)?, lt, cs)?.map(|o| o != Ordering::Less);
                let below = compare_as(&value, vt, high.execute(ctx)?, ht, cs)?.map(|o| o != Ordering::Greater);
                let inside = and3(above, below);
                Ok(from_truth(if *negated { inside.map(|b| !b) } else { inside }))
            }

            ExprKind::InList {
                probe,
                list,
                negated,
            } => {
                let probe = probe.execute(ctx)?.clone();
                if probe.is_null() {
                    return Ok(Value::Bit(false));
                }
                let mut values = Vec::with_capacity(list.len());
                for element in list.iter_mut() {
                    values.push(element.execute(ctx)?.clone());
                }
                Ok(Value::Bit(in_values(&probe, &values, cs)? != *negated))
            }

            ExprKind::InSubquery {
                probe,
                subquery,
                negated,
            } => {
                let probe = probe.execute(ctx)?.clone();
                if probe.is_null() {
                    return Ok(Value::Bit(false));
                }
                let rows = subquery.rows(ctx)?;
                let found = in_values(&probe, rows.iter().filter_map(|row| row.first()), cs)?;
                Ok(Value::Bit(found != *negated))
            }

            ExprKind::Quantified {
                left,
                op,
                quantifier,
                subquery,
            } => {
                let left = left.execute(ctx)?.clone();
                let rows = subquery.rows(ctx)?;
                Ok(Value::Bit(quantified_compare(&left, *op, *quantifier, rows, cs)?))
            }

            ExprKind::ScalarSubquery { subquery } => scalar_value(subquery.rows(ctx)?),

            ExprKind::Exists { subquery, negated } => Ok(Value::Bit(subquery.exists(ctx)? != *negated)),

            ExprKind::Like {
                operand,
                pattern,
                escape,
                negated,
                compiled,
            } => {
                let text = operand.execute(ctx)?.clone();
                let source = pattern.execute(ctx)?.clone();
                if text.is_null() || source.is_null() {
                    return Ok(Value::Null);
                }
                let text = text_of(text)?;
                let source = text_of(source)?;
                if compiled.as_ref().map_or(true, |c| c.source() != source) {
                    log::debug!("compiling LIKE pattern '{}' for this row", source);
                    *compiled = Some(LikePattern::compile(&source, *escape, cs)?);
                }
                let matched = compiled.as_ref().is_some_and(|c| c.is_match(&text));
                Ok(Value::Bit(matched != *negated))
            }

            ExprKind::Contains {
                column,
                condition,
                query,
            } => {
                let text = column.execute(ctx)?.clone();
                let source = condition.execute(ctx)?.clone();
                if source.is_null() {
                    return Ok(Value::Null);
                }
                if text.is_null() {
                    return Ok(Value::Bit(false));
                }
                let text = text_of(text)?;
                let source = text_of(source)?;
                if query.as_ref().map_or(true, |(s, _)| *s != source) {
                    log::debug!("parsing CONTAINS condition '{}'", source);
                    let parsed = FullTextQuery::parse(&source, cs)?;
                    *query = Some((source, parsed));
                }
                let matched = query
                    .as_ref()
                    .is_some_and(|(_, q)| q.matches(&text, ctx.word_breaker.as_ref()));
                Ok(Value::Bit(matched))
            }

            ExprKind::IsNull { operand, negated } => {
                Ok(Value::Bit(operand.execute(ctx)?.is_null() != *negated))
            }

            ExprKind::Case {
                operand,
                branches,
                else_result,
            } => {
                let input = match operand {
                    Some(input) => Some((input.execute(ctx)?.clone(), input.data_type)),
                    None => None,
                };
                for (when, then) in branches.iter_mut() {
                    let hit = match &input {
                        Some((input, it)) => {
                            let wt = when.data_type;
                            compare_as(input, *it, when.execute(ctx)?, wt, cs)? == Some(Ordering::Equal)
                        }
                        None => truth(when.execute(ctx)?) == Some(true),
                    };
                    if hit {
                        return Ok(then.execute(ctx)?.clone());
                    }
                }
                match else_result {
                    Some(otherwise) => Ok(otherwise.execute(ctx)?.clone()),
                    None => Ok(Value::Null),
                }
            }

            ExprKind::Coalesce { args, .. } => {
                for arg in args.iter_mut() {
                    let value = arg.execute(ctx)?;
                    if !value.is_null() {
                        return Ok(value.clone());
                    }
                }
                Ok(Value::Null)
            }

            ExprKind::NullIf { left, right } => {
                let (lt, rt) = (left.data_type, right.data_type);
                let l = left.execute(ctx)?.clone();
                if compare_as(&l, lt, right.execute(ctx)?, rt, cs)? == Some(Ordering::Equal) {
                    Ok(Value::Null)
                } else {
                    Ok(l)
                }
            }

            ExprKind::Convert {
                operand,
                target,
                length,
            } => {
                let value = convert(operand.execute(ctx)?.clone(), *target)?;
                Ok(match (value, length) {
                    (Value::String(s), Some(n)) => Value::String(s.chars().take(*n).collect()),
                    (Value::Binary(mut b), Some(n)) => {
                        b.truncate(*n);
                        Value::Binary(b)
                    }
                    (value, _) => value,
                })
            }

            ExprKind::Function {
                function: BuiltinFunction::LastIdentity,
                args,
                ..
            } => {
                let table = args
                    .first()
                    .and_then(|a| a.value().as_str())
                    .ok_or_else(not_prepared)?;
                let (identity_type, value) = ctx.catalog.last_identity(table)?;
                if identity_type != data_type {
                    log::debug!(
                        "identity of {} changed type to {}",
                        table,
                        identity_type.name()
                    );
                    self.data_type = identity_type;
                    self.cell.retype(identity_type);
                }
                Ok(value)
            }

            ExprKind::Function {
                function,
                args,
                date_part,
            } => {
                let values = execute_all(args, ctx)?;
                function.evaluate(&values, *date_part, data_type, &ctx.culture)
            }

            ExprKind::UserFunction { args, routine, .. } => {
                let values = execute_all(args, ctx)?;
                routine.as_ref().ok_or_else(not_prepared)?.invoke(&values)
            }

            ExprKind::Aggregate { result, .. } => Ok(result.clone()),

            ExprKind::SystemVariable(SystemVariable::Error) => Ok(Value::Int(ctx.last_error())),
            ExprKind::SystemVariable(SystemVariable::Identity) => {
                convert(ctx.last_identity().clone(), DataType::BigInt)
            }
        }
    }

    /// Open a new group in every aggregate of the tree, feeding it the
    /// current row.
    pub fn create_new_group(&mut self, ctx: &StatementContext) -> ExpressionResult<()> {
        self.drive_group(ctx, GroupCall::Create)
    }

    /// Feed the current row to every aggregate of the tree.
    pub fn add_row_to_group(&mut self, ctx: &StatementContext) -> ExpressionResult<()> {
        self.drive_group(ctx, GroupCall::Add)
    }

    fn drive_group(&mut self, ctx: &StatementContext, call: GroupCall) -> ExpressionResult<()> {
        if let ExprKind::Aggregate {
            arg, accumulator, ..
        } = &mut self.kind
        {
            let input = match arg {
                Some(arg) => arg.execute(ctx)?.clone(),
                None => Value::Null,
            };
            let accumulator = accumulator.as_mut().ok_or_else(not_prepared)?;
            return match call {
                GroupCall::Create => accumulator.create_new_group(&input),
                GroupCall::Add => accumulator.add_row_to_group(&input),
            }
            .map_err(|e| e.at(self.position));
        }
        for child in self.children_mut() {
            child.drive_group(ctx, call)?;
        }
        Ok(())
    }

    /// Close the group in every aggregate of the tree; the next `execute`
    /// reports the finished values.
    pub fn finish_group(&mut self) -> ExpressionResult<()> {
        if let ExprKind::Aggregate {
            accumulator,
            result,
            ..
        } = &mut self.kind
        {
            let accumulator = accumulator.as_mut().ok_or_else(not_prepared)?;
            *result = accumulator.finish_group()?;
            self.flags.dirty = true;
            return Ok(());
        }
        for child in self.children_mut() {
            child.finish_group()?;
        }
        Ok(())
    }

    /// The accumulator behind an aggregate node, once prepared.
    pub fn accumulator_mut(&mut self) -> Option<&mut AggregateAccumulator> {
        match &mut self.kind {
            ExprKind::Aggregate { accumulator, .. } => accumulator.as_mut(),
            _ => None,
        }
    }
}

fn execute_all(args: &mut [Expr], ctx: &StatementContext) -> ExpressionResult<Vec<Value>> {
    args.iter_mut()
        .map(|arg| arg.execute(ctx).map(Value::clone))
        .collect()
}

fn text_of(value: Value) -> ExpressionResult<String> {
    match convert(value, DataType::NVarChar)? {
        Value::String(s) => Ok(s),
        other => Err(ExpressionError::conversion_failed(other, DataType::NVarChar)),
    }
}

/// Evaluate a boolean expression as a row filter; null counts as false.
pub fn evaluate_predicate(expr: &mut Expr, ctx: &StatementContext) -> ExpressionResult<bool> {
    Ok(truth(expr.execute(ctx)?) == Some(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateFunction;
    use crate::catalog::{ColumnMetadata, SchemaCatalog, TableSchema};
    use crate::context::MemoryRows;
    use crate::expression::error::ErrorKind;
    use crate::expression::function::ScalarRoutine;
    use crate::expression::subquery::{CorrelatedSubquery, Quantifier, ValuesSubquery};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    fn context(rows: Vec<Vec<Value>>) -> StatementContext {
        let mut catalog = SchemaCatalog::new();
        catalog.add_table(TableSchema::new(
            "t",
            vec![
                ColumnMetadata::new("a", DataType::Int),
                ColumnMetadata::new("s", DataType::NVarChar).with_max_length(20),
                ColumnMetadata::new("p", DataType::NVarChar),
            ],
        ));
        let mut ctx = StatementContext::new(Box::new(catalog));
        ctx.attach_source(0, Box::new(MemoryRows::new(rows)));
        ctx
    }

    fn row(a: Option<i32>, s: &str, p: &str) -> Vec<Value> {
        vec![
            a.map_or(Value::Null, Value::Int),
            Value::String(s.into()),
            Value::String(p.into()),
        ]
    }

    fn eval(expr: &mut Expr, ctx: &StatementContext) -> Value {
        expr.prepare(ctx).unwrap();
        expr.execute(ctx).unwrap().clone()
    }

    #[test]
    fn test_three_valued_logic() {
        let ctx = context(vec![]);
        let null_bit = || Expr::convert(Expr::null(), DataType::Bit);
        let cases = [
            (Expr::and(Expr::bit(false), null_bit()), Value::Bit(false)),
            (Expr::and(null_bit(), Expr::bit(false)), Value::Bit(false)),
            (Expr::and(Expr::bit(true), null_bit()), Value::Null),
            (Expr::or(Expr::bit(true), null_bit()), Value::Bit(true)),
            (Expr::or(null_bit(), Expr::bit(true)), Value::Bit(true)),
            (Expr::or(Expr::bit(false), null_bit()), Value::Null),
            (Expr::not(null_bit()), Value::Null),
        ];
        for (mut expr, expected) in cases {
            assert_eq!(eval(&mut expr, &ctx), expected);
        }
    }

    #[test]
    fn test_null_propagation() {
        let ctx = context(vec![row(None, "x", "x")]);
        assert_eq!(eval(&mut Expr::add(Expr::column("a"), Expr::int(1)), &ctx), Value::Null);
        assert_eq!(eval(&mut Expr::eq(Expr::column("a"), Expr::int(1)), &ctx), Value::Null);
        assert_eq!(eval(&mut Expr::is_null(Expr::column("a")), &ctx), Value::Bit(true));
        let mut filter = Expr::eq(Expr::column("a"), Expr::int(1));
        filter.prepare(&ctx).unwrap();
        assert!(!evaluate_predicate(&mut filter, &ctx).unwrap());
    }

    #[test]
    fn test_recompute_only_on_change() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut ctx = context(vec![row(Some(1), "", ""), row(Some(2), "", "")]);
        ctx.functions.register_scalar(ScalarRoutine::new(
            "tracked",
            vec![DataType::Int],
            DataType::Int,
            move |args| {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(args[0].clone())
            },
        ));
        let mut expr = Expr::function("tracked", vec![Expr::column("a")]);
        expr.prepare(&ctx).unwrap();

        assert_eq!(expr.execute(&ctx).unwrap(), &Value::Int(1));
        assert_eq!(expr.execute(&ctx).unwrap(), &Value::Int(1));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);

        ctx.source_mut(0).unwrap().advance();
        assert!(expr.is_changed(&ctx));
        assert_eq!(expr.execute(&ctx).unwrap(), &Value::Int(2));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);

        expr.set_changed();
        expr.execute(&ctx).unwrap();
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 3);
        expr.clear_changed();
        assert!(!expr.is_changed(&ctx));
    }

    #[test]
    fn test_parameter_rebinding() {
        let mut ctx = context(vec![row(Some(5), "", "")]);
        ctx.parameters.declare("@limit", DataType::Int);
        ctx.parameters.bind("@limit", Value::Int(3)).unwrap();
        let mut expr = Expr::gt(Expr::column("a"), Expr::parameter("@limit"));
        assert_eq!(eval(&mut expr, &ctx), Value::Bit(true));
        assert!(!expr.is_changed(&ctx));

        ctx.parameters.bind("@limit", Value::Int(9)).unwrap();
        assert!(expr.is_changed(&ctx));
        assert_eq!(expr.execute(&ctx).unwrap(), &Value::Bit(false));
    }

    #[test]
    fn test_in_list_null_probe() {
        let ctx = context(vec![row(None, "", "")]);
        let list = || vec![Expr::int(1), Expr::int(2), Expr::int(3)];
        assert_eq!(eval(&mut Expr::in_list(Expr::int(2), list()), &ctx), Value::Bit(true));
        assert_eq!(eval(&mut Expr::not_in_list(Expr::int(2), list()), &ctx), Value::Bit(false));
        assert_eq!(eval(&mut Expr::in_list(Expr::column("a"), list()), &ctx), Value::Bit(false));
        assert_eq!(
            eval(&mut Expr::not_in_list(Expr::column("a"), list()), &ctx),
            Value::Bit(false)
        );
    }

    #[test]
    fn test_between() {
        let ctx = context(vec![row(Some(10), "", "")]);
        let mut inside = Expr::between(Expr::column("a"), Expr::int(1), Expr::int(10));
        assert_eq!(eval(&mut inside, &ctx), Value::Bit(true));
        let mut outside = Expr::not_between(Expr::column("a"), Expr::int(1), Expr::int(10));
        assert_eq!(eval(&mut outside, &ctx), Value::Bit(false));
        let mut unknown = Expr::between(Expr::column("a"), Expr::null(), Expr::int(20));
        assert_eq!(eval(&mut unknown, &ctx), Value::Null);
        let mut below = Expr::between(Expr::column("a"), Expr::null(), Expr::int(5));
        assert_eq!(eval(&mut below, &ctx), Value::Bit(false));
    }

    #[test]
    fn test_character_column_against_number_compares_numerically() {
        let ctx = context(vec![row(None, "9", "05")]);
        assert_eq!(eval(&mut Expr::gt(Expr::column("s"), Expr::int(10)), &ctx), Value::Bit(false));
        assert_eq!(eval(&mut Expr::lt(Expr::int(10), Expr::column("s")), &ctx), Value::Bit(false));
        assert_eq!(eval(&mut Expr::eq(Expr::column("p"), Expr::int(5)), &ctx), Value::Bit(true));
        // as text '9' sorts after '10'
        let mut inside = Expr::between(Expr::column("s"), Expr::int(5), Expr::int(10));
        assert_eq!(eval(&mut inside, &ctx), Value::Bit(true));
        assert_eq!(eval(&mut Expr::nullif(Expr::column("p"), Expr::int(5)), &ctx), Value::Null);
        let mut simple = Expr::case(
            Some(Expr::column("p")),
            vec![(Expr::int(5), Expr::string("five"))],
            Some(Expr::string("other")),
        );
        assert_eq!(eval(&mut simple, &ctx), Value::String("five".into()));
        // same-typed operands still compare as text
        assert_eq!(eval(&mut Expr::gt(Expr::column("s"), Expr::column("p")), &ctx), Value::Bit(true));
    }

    #[test]
    fn test_like_with_column_pattern_recompiles() {
        let mut ctx = context(vec![row(None, "smithson", "smith%"), row(None, "jones", "j_n%")]);
        let mut expr = Expr::like(Expr::column("s"), Expr::column("p"));
        assert_eq!(eval(&mut expr, &ctx), Value::Bit(true));
        ctx.source_mut(0).unwrap().advance();
        assert_eq!(expr.execute(&ctx).unwrap(), &Value::Bit(true));
        let ExprKind::Like { compiled, .. } = &expr.kind else {
            panic!("expected like");
        };
        assert_eq!(compiled.as_ref().map(|c| c.source()), Some("j_n%"));
    }

    #[test]
    fn test_case_coalesce_nullif_convert() {
        let ctx = context(vec![row(Some(2), "hello world", "")]);
        let mut simple = Expr::case(
            Some(Expr::column("a")),
            vec![(Expr::int(1), Expr::string("one")), (Expr::int(2), Expr::string("two"))],
            Some(Expr::string("many")),
        );
        assert_eq!(eval(&mut simple, &ctx), Value::String("two".into()));

        let mut coalesce = Expr::coalesce(vec![Expr::null(), Expr::column("a"), Expr::int(7)]);
        assert_eq!(eval(&mut coalesce, &ctx), Value::Int(2));

        let mut nullif = Expr::nullif(Expr::column("a"), Expr::int(2));
        assert_eq!(eval(&mut nullif, &ctx), Value::Null);

        let mut truncated = Expr::convert_with_length(Expr::column("s"), DataType::NVarChar, 5);
        assert_eq!(eval(&mut truncated, &ctx), Value::String("hello".into()));
        assert_eq!(truncated.width(), 5);
    }

    #[test]
    fn test_subqueries() {
        let ctx = context(vec![row(Some(3), "", "")]);
        let values = || Box::new(ValuesSubquery::column(DataType::Int, vec![Value::Int(1), Value::Int(3)]));

        assert_eq!(eval(&mut Expr::in_subquery(Expr::column("a"), values()), &ctx), Value::Bit(true));
        assert_eq!(
            eval(&mut Expr::not_in_subquery(Expr::column("a"), values()), &ctx),
            Value::Bit(false)
        );
        assert_eq!(
            eval(
                &mut Expr::quantified(Expr::column("a"), BinaryOperator::Ge, Quantifier::All, values()),
                &ctx
            ),
            Value::Bit(true)
        );
        assert_eq!(eval(&mut Expr::exists(values()), &ctx), Value::Bit(true));

        let mut scalar = Expr::scalar_subquery(values());
        scalar.prepare(&ctx).unwrap();
        let err = scalar.execute(&ctx).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::SubqueryCardinality { rows: 2 }));
    }

    #[test]
    fn test_correlated_subquery_reads_outer_row() {
        let mut ctx = context(vec![row(Some(1), "", ""), row(Some(4), "", "")]);
        let inner = CorrelatedSubquery::new(vec![DataType::Int], |ctx: &StatementContext| {
            let outer = ctx.source(0)?.value(0)?;
            Ok(vec![vec![outer]])
        });
        let mut expr = Expr::add(Expr::scalar_subquery(Box::new(inner)), Expr::int(10));
        assert_eq!(eval(&mut expr, &ctx), Value::Int(11));
        ctx.source_mut(0).unwrap().advance();
        assert_eq!(expr.execute(&ctx).unwrap(), &Value::Int(14));
    }

    #[test]
    fn test_system_variables() {
        let mut ctx = context(vec![]);
        ctx.record_error(&ExpressionError::new(ErrorKind::DivisionByZero));
        ctx.set_last_identity(Value::Int(42));
        assert_eq!(
            eval(&mut Expr::system_variable(SystemVariable::Error), &ctx),
            Value::Int(25_011)
        );
        assert_eq!(
            eval(&mut Expr::system_variable(SystemVariable::Identity), &ctx),
            Value::BigInt(42)
        );
    }

    #[test]
    fn test_temp_table_redirect() {
        let mut ctx = context(vec![row(Some(1), "", "")]);
        ctx.attach_source(1, Box::new(MemoryRows::new(vec![vec![Value::Int(100)], vec![Value::Int(200)]])));
        let mut expr = Expr::mul(Expr::column("a"), Expr::int(3));
        assert_eq!(eval(&mut expr, &ctx), Value::Int(3));

        expr.switch_to_temp_table(1, 0);
        assert_eq!(expr.execute(&ctx).unwrap(), &Value::Int(100));
        ctx.source_mut(1).unwrap().advance();
        assert!(expr.is_changed(&ctx));
        assert_eq!(expr.execute(&ctx).unwrap(), &Value::Int(200));

        expr.clear_redirect();
        assert_eq!(expr.execute(&ctx).unwrap(), &Value::Int(3));
    }

    #[test]
    fn test_aggregate_nodes() {
        let mut ctx = context(vec![row(Some(2), "", ""), row(Some(4), "", ""), row(Some(6), "", "")]);
        let mut avg = Expr::aggregate(AggregateFunction::Avg, Expr::column("a"));
        let mut ratio = Expr::div(
            Expr::aggregate(AggregateFunction::Sum, Expr::column("a")),
            Expr::count_star(),
        );
        avg.prepare(&ctx).unwrap();
        ratio.prepare(&ctx).unwrap();

        avg.create_new_group(&ctx).unwrap();
        ratio.create_new_group(&ctx).unwrap();
        while ctx.source_mut(0).unwrap().advance() {
            avg.add_row_to_group(&ctx).unwrap();
            ratio.add_row_to_group(&ctx).unwrap();
        }
        avg.finish_group().unwrap();
        ratio.finish_group().unwrap();
        assert_eq!(avg.execute(&ctx).unwrap(), &Value::Int(4));
        assert_eq!(ratio.execute(&ctx).unwrap(), &Value::Int(4));

        let err = avg.add_row_to_group(&ctx).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidAggregateState { .. }));
    }

    #[test]
    fn test_routine_failure_surfaces() {
        let mut ctx = context(vec![row(Some(1), "", "")]);
        ctx.functions.register_scalar(ScalarRoutine::new(
            "explode",
            vec![DataType::Int],
            DataType::Int,
            |_| Err(anyhow::anyhow!("boom")),
        ));
        let mut expr = Expr::function("explode", vec![Expr::column("a")]).at(12);
        expr.prepare(&ctx).unwrap();
        let err = expr.execute(&ctx).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::RuntimeInvocation { .. }));
        assert_eq!(err.position, Some(12));
    }
}
