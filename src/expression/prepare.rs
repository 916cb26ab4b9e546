//! Prepare: name resolution, typing and literal coercion.
//!
//! Prepare runs once per compiled statement, bottom-up. It fixes every
//! node's declared type, re-wraps literal operands as literals of the type
//! their operator works in, decides optimizability and finally folds nodes
//! whose inputs are all literals.

use crate::aggregate::{AggregateAccumulator, AggregateFunction};
use crate::context::StatementContext;
use crate::expression::error::{ErrorKind, ExpressionError, ExpressionResult};
use crate::expression::expr::{Expr, ExprKind, SystemVariable};
use crate::expression::function::{BuiltinFunction, DatePart};
use crate::expression::operator::UnaryOperator;
use crate::expression::subquery::SubqueryNode;
use crate::pattern::{FullTextQuery, LikePattern};
use crate::value::{can_convert, DataType, Value};

impl Expr {
    /// Resolve and type this node and its children. Returns whether the
    /// node is a compile-time literal afterwards. Calling it again is a
    /// no-op.
    pub fn prepare(&mut self, ctx: &StatementContext) -> ExpressionResult<bool> {
        if self.flags.prepared {
            return Ok(self.is_constant());
        }
        let position = self.position;
        let data_type = self.resolve(ctx).map_err(|e| e.at(position))?;
        self.data_type = data_type;
        self.cell.retype(data_type);
        self.flags.prepared = true;
        self.flags.optimizable = self.compute_optimizable();
        if self.is_foldable() {
            self.fold(ctx).map_err(|e| e.at(position))?;
        }
        self.flags.constant = self.is_constant();
        Ok(self.flags.constant)
    }

    pub(crate) fn is_null_literal(&self) -> bool {
        matches!(self.kind, ExprKind::Literal) && self.cell.is_null()
    }

    fn resolve(&mut self, ctx: &StatementContext) -> ExpressionResult<DataType> {
        match &mut self.kind {
            ExprKind::Literal => Ok(self.cell.data_type()),

            ExprKind::Column {
                qualifier,
                name,
                binding,
                ..
            } => {
                let resolved = ctx.catalog.resolve_column(qualifier.as_deref(), name)?;
                let data_type = resolved.metadata.data_type;
                *binding = Some(resolved);
                Ok(data_type)
            }

            ExprKind::Parameter { name } => ctx
                .parameters
                .declared_type(name)
                .ok_or_else(|| ExpressionError::unresolved(name.as_str())),

            ExprKind::Star {
                qualifier,
                bindings,
            } => {
                *bindings = ctx.catalog.expand_star(qualifier.as_deref())?;
                Ok(bindings
                    .first()
                    .map_or(DataType::NVarChar, |b| b.metadata.data_type))
            }

            ExprKind::Unary { op, operand } => {
                operand.prepare(ctx)?;
                let operand_type = if operand.is_null_literal() && *op == UnaryOperator::Not {
                    DataType::Bit
                } else {
                    operand.data_type
                };
                op.output_type(operand_type).ok_or_else(|| {
                    let expected = match op {
                        UnaryOperator::Not => DataType::Bit,
                        _ => DataType::Int,
                    };
                    ExpressionError::type_mismatch(expected, operand_type, op.as_str())
                })
            }

            ExprKind::Binary { op, left, right } => {
                left.prepare(ctx)?;
                right.prepare(ctx)?;
                let (lt, rt) = operand_types(left, right);
                let output = op
                    .output_type(lt, rt)
                    .ok_or_else(|| ExpressionError::type_mismatch(lt, rt, op.as_str()))?;
                let date_arithmetic = op.is_arithmetic() && (lt.is_date() || rt.is_date());
                if let (Some(target), false) = (op.operand_type(lt, rt), date_arithmetic) {
                    coerce_literal(left, target)?;
                    coerce_literal(right, target)?;
                }
                Ok(output)
            }

            ExprKind::Between {
                operand, low, high, ..
            } => {
                operand.prepare(ctx)?;
                low.prepare(ctx)?;
                high.prepare(ctx)?;
                let common = unify(operand.data_type, [&**low, &**high], "BETWEEN")?;
                coerce_literal(low, common)?;
                coerce_literal(high, common)?;
                Ok(DataType::Bit)
            }

            ExprKind::InList { probe, list, .. } => {
                probe.prepare(ctx)?;
                let target = probe.data_type;
                for element in list.iter_mut() {
                    element.prepare(ctx)?;
                    if !element.is_null_literal() && !target.compatible(element.data_type) {
                        return Err(ExpressionError::type_mismatch(target, element.data_type, "IN")
                            .at(element.position));
                    }
                    coerce_literal(element, target)?;
                }
                Ok(DataType::Bit)
            }

            ExprKind::InSubquery {
                probe, subquery, ..
            } => {
                probe.prepare(ctx)?;
                let column = single_column(subquery, "IN")?;
                check_compatible(probe, column, "IN")?;
                Ok(DataType::Bit)
            }

            ExprKind::Quantified {
                left,
                op,
                quantifier,
                subquery,
            } => {
                left.prepare(ctx)?;
                if !op.is_comparison() {
                    return Err(ExpressionError::invalid_operands(
                        format!("{} {}", op.as_str(), quantifier.as_str()),
                        Some(left.data_type),
                        None,
                    ));
                }
                let column = single_column(subquery, quantifier.as_str())?;
                check_compatible(left, column, quantifier.as_str())?;
                Ok(DataType::Bit)
            }

            ExprKind::ScalarSubquery { subquery } => single_column(subquery, "subquery"),

            ExprKind::Exists { .. } => Ok(DataType::Bit),

            ExprKind::Like {
                operand,
                pattern,
                escape,
                compiled,
                ..
            } => {
                operand.prepare(ctx)?;
                pattern.prepare(ctx)?;
                if !pattern.is_null_literal() && !pattern.data_type.is_character() {
                    return Err(ExpressionError::type_mismatch(
                        DataType::NVarChar,
                        pattern.data_type,
                        "LIKE",
                    ));
                }
                if let Some(Value::String(text)) = pattern.literal_value() {
                    *compiled = Some(LikePattern::compile(text, *escape, ctx.culture.case_sensitive)?);
                }
                Ok(DataType::Bit)
            }

            ExprKind::Contains {
                column,
                condition,
                query,
            } => {
                column.prepare(ctx)?;
                condition.prepare(ctx)?;
                let binding = column.column_binding().ok_or_else(|| {
                    ExpressionError::invalid_operands("CONTAINS", Some(column.data_type), None)
                })?;
                if !ctx
                    .catalog
                    .has_fulltext_index(&binding.table_name, &binding.metadata.name)
                {
                    return Err(ErrorKind::MissingFullTextIndex {
                        table: binding.table_name.clone(),
                        column: binding.metadata.name.clone(),
                    }
                    .into());
                }
                if !condition.is_null_literal() && !condition.data_type.is_character() {
                    return Err(ExpressionError::type_mismatch(
                        DataType::NVarChar,
                        condition.data_type,
                        "CONTAINS",
                    ));
                }
                if let Some(Value::String(text)) = condition.literal_value() {
                    let parsed = FullTextQuery::parse(text, ctx.culture.case_sensitive)?;
                    *query = Some((text.clone(), parsed));
                }
                Ok(DataType::Bit)
            }

            ExprKind::IsNull { operand, .. } => {
                operand.prepare(ctx)?;
                Ok(DataType::Bit)
            }

            ExprKind::Case {
                operand,
                branches,
                else_result,
            } => {
                if let Some(input) = operand.as_deref_mut() {
                    input.prepare(ctx)?;
                }
                for (when, then) in branches.iter_mut() {
                    when.prepare(ctx)?;
                    then.prepare(ctx)?;
                    match operand.as_deref() {
                        Some(input) => {
                            let target = unify(input.data_type, [&*when], "CASE")?;
                            coerce_literal(when, target)?;
                        }
                        None if !when.is_null_literal() && when.data_type != DataType::Bit => {
                            return Err(ExpressionError::type_mismatch(
                                DataType::Bit,
                                when.data_type,
                                "CASE WHEN",
                            )
                            .at(when.position));
                        }
                        None => {}
                    }
                }
                if let Some(otherwise) = else_result.as_deref_mut() {
                    otherwise.prepare(ctx)?;
                }
                let results: Vec<&Expr> = branches
                    .iter()
                    .map(|(_, then)| then)
                    .chain(else_result.as_deref())
                    .collect();
                let result_type = unify_all(&results, "CASE")?;
                for (_, then) in branches.iter_mut() {
                    coerce_literal(then, result_type)?;
                }
                if let Some(otherwise) = else_result.as_deref_mut() {
                    coerce_literal(otherwise, result_type)?;
                }
                Ok(result_type)
            }

            ExprKind::Coalesce { args, first_type } => {
                let name = if *first_type { "ISNULL" } else { "COALESCE" };
                if *first_type && args.len() != 2 {
                    return Err(ExpressionError::arity(name, "2", args.len()));
                }
                if args.len() < 2 {
                    return Err(ExpressionError::arity(name, "at least 2", args.len()));
                }
                for arg in args.iter_mut() {
                    arg.prepare(ctx)?;
                }
                let refs: Vec<&Expr> = args.iter().collect();
                let unified = unify_all(&refs, name)?;
                let result_type = if *first_type && !args[0].is_null_literal() {
                    args[0].data_type
                } else {
                    unified
                };
                for arg in args.iter_mut() {
                    coerce_literal(arg, result_type)?;
                }
                Ok(result_type)
            }

            ExprKind::NullIf { left, right } => {
                left.prepare(ctx)?;
                right.prepare(ctx)?;
                let (lt, rt) = operand_types(left, right);
                if !lt.compatible(rt) {
                    return Err(ExpressionError::type_mismatch(lt, rt, "NULLIF"));
                }
                Ok(lt)
            }

            ExprKind::Convert {
                operand, target, ..
            } => {
                operand.prepare(ctx)?;
                if !operand.is_null_literal() && !can_convert(operand.data_type, *target) {
                    return Err(ExpressionError::unsupported_conversion(operand.data_type, *target));
                }
                Ok(*target)
            }

            ExprKind::Function {
                function,
                args,
                date_part,
            } => {
                function.check_arity(args.len())?;
                if function.takes_date_part() {
                    let keyword = keyword_argument(&args[0]);
                    let part = keyword
                        .as_deref()
                        .and_then(DatePart::parse)
                        .ok_or_else(|| {
                            ExpressionError::unresolved(format!(
                                "date part {}",
                                keyword.as_deref().unwrap_or("<expression>")
                            ))
                        })?;
                    *date_part = Some(part);
                    args[0] = Expr::string(keyword.unwrap_or_default());
                }
                if *function == BuiltinFunction::LastIdentity {
                    let table = keyword_argument(&args[0])
                        .ok_or_else(|| ExpressionError::unresolved("LASTIDENTITY table"))?;
                    args[0] = Expr::string(table.clone());
                    args[0].prepare(ctx)?;
                    let (data_type, _) = ctx.catalog.last_identity(&table)?;
                    return Ok(data_type);
                }
                for arg in args.iter_mut() {
                    arg.prepare(ctx)?;
                }
                let types: Vec<DataType> = args.iter().map(|a| a.data_type).collect();
                function.result_type(&types)
            }

            ExprKind::UserFunction {
                name,
                args,
                routine,
            } => {
                let resolved = ctx
                    .functions
                    .scalar(name)
                    .ok_or_else(|| ExpressionError::unresolved(name.as_str()))?
                    .clone();
                if args.len() != resolved.parameters.len() {
                    return Err(ExpressionError::arity(
                        name.as_str(),
                        resolved.parameters.len().to_string(),
                        args.len(),
                    ));
                }
                for (arg, parameter) in args.iter_mut().zip(&resolved.parameters) {
                    arg.prepare(ctx)?;
                    if !arg.is_null_literal() && !arg.data_type.compatible(*parameter) {
                        return Err(ExpressionError::type_mismatch(*parameter, arg.data_type, name.as_str())
                            .at(arg.position));
                    }
                    coerce_literal(arg, *parameter)?;
                }
                let returns = resolved.returns;
                *routine = Some(resolved);
                Ok(returns)
            }

            ExprKind::Aggregate {
                function,
                arg,
                accumulator,
                ..
            } => {
                let built = match arg {
                    None => AggregateAccumulator::count_star(*function == AggregateFunction::CountBig),
                    Some(arg) => {
                        arg.prepare(ctx)?;
                        AggregateAccumulator::new(*function, arg.data_type)?
                            .with_case_sensitivity(ctx.culture.case_sensitive)
                    }
                };
                let result_type = built.result_type();
                *accumulator = Some(built);
                Ok(result_type)
            }

            ExprKind::SystemVariable(variable) => Ok(match variable {
                SystemVariable::Error => DataType::Int,
                SystemVariable::Identity => DataType::BigInt,
            }),
        }
    }
}

/// Operand types with a bare `NULL` literal taking the other side's type.
fn operand_types(left: &Expr, right: &Expr) -> (DataType, DataType) {
    match (left.is_null_literal(), right.is_null_literal()) {
        (true, false) => (right.data_type, right.data_type),
        (false, true) => (left.data_type, left.data_type),
        _ => (left.data_type, right.data_type),
    }
}

/// Widest type of `base` and every non-null operand.
fn unify<'a>(
    base: DataType,
    operands: impl IntoIterator<Item = &'a Expr>,
    context: &str,
) -> ExpressionResult<DataType> {
    let mut common = base;
    for operand in operands {
        if operand.is_null_literal() {
            continue;
        }
        common = common.max_type(operand.data_type).ok_or_else(|| {
            ExpressionError::type_mismatch(common, operand.data_type, context).at(operand.position)
        })?;
    }
    Ok(common)
}

/// Widest type across branch results; all-null branches type as `NVarChar`.
fn unify_all(operands: &[&Expr], context: &str) -> ExpressionResult<DataType> {
    let mut typed = operands.iter().copied().filter(|e| !e.is_null_literal());
    match typed.next() {
        None => Ok(DataType::NVarChar),
        Some(first) => unify(first.data_type, typed, context),
    }
}

fn check_compatible(probe: &Expr, column: DataType, context: &str) -> ExpressionResult<()> {
    if probe.is_null_literal() || probe.data_type.compatible(column) {
        Ok(())
    } else {
        Err(ExpressionError::type_mismatch(probe.data_type, column, context))
    }
}

fn single_column(subquery: &SubqueryNode, context: &str) -> ExpressionResult<DataType> {
    match subquery.column_types().as_slice() {
        [only] => Ok(*only),
        other => Err(ExpressionError::arity(format!("{} subquery", context), "1 column", other.len())),
    }
}

/// A keyword argument such as a date part or a table name, written either
/// as a bare identifier or as a string literal.
fn keyword_argument(arg: &Expr) -> Option<String> {
    match &arg.kind {
        ExprKind::Column {
            qualifier: None,
            name,
            ..
        } => Some(name.clone()),
        ExprKind::Literal => arg.value().as_str().map(str::to_string),
        _ => None,
    }
}

/// Replace a literal operand with a new literal of `target`. Non-literal
/// operands are converted at run time.
pub(crate) fn coerce_literal(expr: &mut Expr, target: DataType) -> ExpressionResult<()> {
    if !expr.is_constant() || expr.data_type == target {
        return Ok(());
    }
    let mut replacement = Expr::typed_literal(expr.value().clone(), target).map_err(|e| e.at(expr.position))?;
    replacement.position = expr.position;
    replacement.flags.prepared = true;
    log::trace!(
        "coerced literal {} from {} to {}",
        expr.value(),
        expr.data_type.name(),
        target.name()
    );
    *expr = replacement;
    Ok(())
}
