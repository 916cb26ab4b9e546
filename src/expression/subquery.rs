//! Subquery and value-list evaluation for `IN`, `ANY`/`ALL`, `EXISTS` and
//! scalar subqueries.
//!
//! The inner statement belongs to the (external) executor; expressions only
//! see it through [`SubqueryStatement`]. A [`SubqueryNode`] caches the last
//! result and re-executes only when the statement is correlated or reports a
//! change.

use crate::context::StatementContext;
use crate::expression::error::{ErrorKind, ExpressionResult};
use crate::expression::operator::BinaryOperator;
use crate::value::{compare_values, convert, DataType, Value};
use std::cmp::Ordering;
use std::fmt;

/// A compiled inner query.
pub trait SubqueryStatement: fmt::Debug {
    /// Result column types, fixed once the statement is compiled.
    fn column_types(&self) -> Vec<DataType>;

    /// Whether the statement reads columns of the enclosing query.
    fn is_correlated(&self) -> bool;

    /// Whether anything the statement depends on changed since it last ran.
    fn is_changed(&self, ctx: &StatementContext) -> bool;

    fn execute(&mut self, ctx: &StatementContext) -> ExpressionResult<Vec<Vec<Value>>>;

    /// Row presence only, for `EXISTS`.
    fn has_rows(&mut self, ctx: &StatementContext) -> ExpressionResult<bool> {
        Ok(!self.execute(ctx)?.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantifier {
    Any,
    All,
}

impl Quantifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantifier::Any => "ANY",
            Quantifier::All => "ALL",
        }
    }
}

/// An inner statement together with its cached result.
#[derive(Debug)]
pub struct SubqueryNode {
    statement: Box<dyn SubqueryStatement>,
    rows: Option<Vec<Vec<Value>>>,
    /// Row presence from the last `EXISTS` run that skipped materializing
    present: Option<bool>,
    executions: usize,
}

impl SubqueryNode {
    pub fn new(statement: Box<dyn SubqueryStatement>) -> Self {
        Self {
            statement,
            rows: None,
            present: None,
            executions: 0,
        }
    }

    pub fn column_types(&self) -> Vec<DataType> {
        self.statement.column_types()
    }

    pub fn is_correlated(&self) -> bool {
        self.statement.is_correlated()
    }

    pub fn is_changed(&self, ctx: &StatementContext) -> bool {
        (self.rows.is_none() && self.present.is_none())
            || self.statement.is_correlated()
            || self.statement.is_changed(ctx)
    }

    /// Number of times the inner statement actually ran.
    pub fn executions(&self) -> usize {
        self.executions
    }

    /// Drop the cached result so the next access re-executes.
    pub fn invalidate(&mut self) {
        self.rows = None;
        self.present = None;
    }

    pub fn rows(&mut self, ctx: &StatementContext) -> ExpressionResult<&[Vec<Value>]> {
        if self.rows.is_none() || self.is_changed(ctx) {
            log::debug!(
                "executing subquery (correlated: {}, run {})",
                self.statement.is_correlated(),
                self.executions + 1
            );
            self.rows = Some(self.statement.execute(ctx)?);
            self.present = None;
            self.executions += 1;
        }
        Ok(self.rows.as_deref().unwrap_or(&[]))
    }

    /// `EXISTS`: answered from the cache when it is still valid, otherwise
    /// without materializing values.
    pub fn exists(&mut self, ctx: &StatementContext) -> ExpressionResult<bool> {
        let stale = self.statement.is_correlated() || self.statement.is_changed(ctx);
        if !stale {
            if let Some(rows) = &self.rows {
                return Ok(!rows.is_empty());
            }
            if let Some(present) = self.present {
                return Ok(present);
            }
        }
        self.rows = None;
        self.executions += 1;
        let present = self.statement.has_rows(ctx)?;
        self.present = Some(present);
        Ok(present)
    }
}

/// `probe IN (values)`. A null probe matches nothing, and null elements never
/// match; the result is never null. Elements are converted to the probe's
/// type before comparing.
pub fn in_values<'a>(
    probe: &Value,
    values: impl IntoIterator<Item = &'a Value>,
    case_sensitive: bool,
) -> ExpressionResult<bool> {
    let Some(target) = probe.data_type() else {
        return Ok(false);
    };
    for value in values {
        if value.is_null() {
            continue;
        }
        let value = convert(value.clone(), target)?;
        if compare_values(probe, &value, case_sensitive)? == Some(Ordering::Equal) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// `left op ANY (...)` / `left op ALL (...)` over the first column of `rows`.
/// `ALL` over no rows is true and `ANY` over no rows is false; a comparison
/// involving null counts as not satisfied.
pub fn quantified_compare(
    left: &Value,
    op: BinaryOperator,
    quantifier: Quantifier,
    rows: &[Vec<Value>],
    case_sensitive: bool,
) -> ExpressionResult<bool> {
    let satisfied = |row: &Vec<Value>| -> ExpressionResult<bool> {
        let right = row.first().unwrap_or(&Value::Null);
        Ok(compare_values(left, right, case_sensitive)?.is_some_and(|o| op.accepts(o)))
    };
    for row in rows {
        let ok = satisfied(row)?;
        match quantifier {
            Quantifier::Any if ok => return Ok(true),
            Quantifier::All if !ok => return Ok(false),
            _ => {}
        }
    }
    Ok(quantifier == Quantifier::All)
}

/// Value of a scalar subquery: null for no rows, an error for more than one.
pub fn scalar_value(rows: &[Vec<Value>]) -> ExpressionResult<Value> {
    match rows {
        [] => Ok(Value::Null),
        [row] => Ok(row.first().cloned().unwrap_or(Value::Null)),
        _ => Err(ErrorKind::SubqueryCardinality { rows: rows.len() }.into()),
    }
}

/// A fixed, uncorrelated row set.
#[derive(Debug, Clone)]
pub struct ValuesSubquery {
    types: Vec<DataType>,
    rows: Vec<Vec<Value>>,
}

impl ValuesSubquery {
    pub fn new(types: Vec<DataType>, rows: Vec<Vec<Value>>) -> Self {
        Self { types, rows }
    }

    /// Single-column row set.
    pub fn column(data_type: DataType, values: Vec<Value>) -> Self {
        Self::new(vec![data_type], values.into_iter().map(|v| vec![v]).collect())
    }
}

impl SubqueryStatement for ValuesSubquery {
    fn column_types(&self) -> Vec<DataType> {
        self.types.clone()
    }

    fn is_correlated(&self) -> bool {
        false
    }

    fn is_changed(&self, _ctx: &StatementContext) -> bool {
        false
    }

    fn execute(&mut self, _ctx: &StatementContext) -> ExpressionResult<Vec<Vec<Value>>> {
        Ok(self.rows.clone())
    }
}

type CorrelatedBody = Box<dyn FnMut(&StatementContext) -> ExpressionResult<Vec<Vec<Value>>>>;

/// A statement that reads the enclosing query's current row through the
/// context and therefore runs once per probe.
pub struct CorrelatedSubquery {
    types: Vec<DataType>,
    body: CorrelatedBody,
}

impl CorrelatedSubquery {
    pub fn new(
        types: Vec<DataType>,
        body: impl FnMut(&StatementContext) -> ExpressionResult<Vec<Vec<Value>>> + 'static,
    ) -> Self {
        Self {
            types,
            body: Box::new(body),
        }
    }
}

impl fmt::Debug for CorrelatedSubquery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelatedSubquery")
            .field("types", &self.types)
            .finish()
    }
}

impl SubqueryStatement for CorrelatedSubquery {
    fn column_types(&self) -> Vec<DataType> {
        self.types.clone()
    }

    fn is_correlated(&self) -> bool {
        true
    }

    fn is_changed(&self, _ctx: &StatementContext) -> bool {
        true
    }

    fn execute(&mut self, ctx: &StatementContext) -> ExpressionResult<Vec<Vec<Value>>> {
        (self.body)(ctx)
    }
}
