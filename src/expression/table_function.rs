//! Table-valued function calls.
//!
//! A `TableFunctionCursor` wraps a registered [`TableRoutine`]: argument
//! expressions and result columns are fixed by `prepare`, and rows are
//! pulled one at a time with `first`/`next_result` between `open` and
//! `close`. The cursor is also a [`RowSource`], so column expressions can
//! read its current row.

use crate::context::{RowSource, StatementContext};
use crate::expression::error::{ExpressionError, ExpressionResult};
use crate::expression::expr::Expr;
use crate::expression::function::TableRoutine;
use crate::expression::prepare::coerce_literal;
use crate::value::{DataType, Value};

/// A result column of a table-valued function.
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub name: String,
    pub data_type: DataType,
}

#[derive(Debug)]
pub struct TableFunctionCursor {
    name: String,
    args: Vec<Expr>,
    routine: Option<TableRoutine>,
    columns: Vec<TableColumn>,
    rows: Vec<Vec<Value>>,
    /// None before the first row
    position: Option<usize>,
    open: bool,
    version: u64,
}

impl TableFunctionCursor {
    pub fn new(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self {
            name: name.into(),
            args,
            routine: None,
            columns: Vec::new(),
            rows: Vec::new(),
            position: None,
            open: false,
            version: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve the routine, type-check the arguments and fix the result
    /// columns. Calling it again is a no-op.
    pub fn prepare(&mut self, ctx: &StatementContext) -> ExpressionResult<()> {
        if self.routine.is_some() {
            return Ok(());
        }
        let routine = ctx
            .functions
            .table(&self.name)
            .ok_or_else(|| ExpressionError::unresolved(self.name.as_str()))?
            .clone();
        if self.args.len() != routine.parameters.len() {
            return Err(ExpressionError::arity(
                self.name.as_str(),
                routine.parameters.len().to_string(),
                self.args.len(),
            ));
        }
        for (arg, parameter) in self.args.iter_mut().zip(&routine.parameters) {
            arg.prepare(ctx)?;
            if !arg.is_null_literal() && !arg.data_type().compatible(*parameter) {
                return Err(
                    ExpressionError::type_mismatch(*parameter, arg.data_type(), self.name.as_str())
                        .at(arg.position()),
                );
            }
            coerce_literal(arg, *parameter)?;
        }
        self.columns = routine
            .columns
            .iter()
            .map(|(name, data_type)| TableColumn {
                name: name.clone(),
                data_type: *data_type,
            })
            .collect();
        self.routine = Some(routine);
        Ok(())
    }

    /// Result columns; empty until prepared.
    pub fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Evaluate the arguments against the current context and run the
    /// routine. Reopening an open cursor runs it again.
    pub fn open(&mut self, ctx: &StatementContext) -> ExpressionResult<()> {
        let routine = self.routine.as_ref().ok_or_else(|| {
            ExpressionError::evaluation(format!("table function {} was opened before it was prepared", self.name))
        })?;
        let mut values = Vec::with_capacity(self.args.len());
        for arg in self.args.iter_mut() {
            values.push(arg.execute(ctx)?.clone());
        }
        self.rows = routine.invoke(&values)?;
        log::debug!("table function {} produced {} rows", self.name, self.rows.len());
        self.position = None;
        self.open = true;
        self.version += 1;
        Ok(())
    }

    /// Move to the first row.
    pub fn first(&mut self) -> ExpressionResult<Option<&[Value]>> {
        self.ensure_open()?;
        self.position = Some(0);
        self.version += 1;
        Ok(self.rows.first().map(Vec::as_slice))
    }

    /// Move to the next row; the first call after `open` yields the first row.
    pub fn next_result(&mut self) -> ExpressionResult<Option<&[Value]>> {
        self.ensure_open()?;
        let next = match self.position {
            None => 0,
            Some(p) => (p + 1).min(self.rows.len()),
        };
        self.position = Some(next);
        self.version += 1;
        Ok(self.rows.get(next).map(Vec::as_slice))
    }

    pub fn close(&mut self) {
        self.rows.clear();
        self.position = None;
        self.open = false;
        self.version += 1;
    }

    fn ensure_open(&self) -> ExpressionResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(ExpressionError::evaluation(format!("table function {} is not open", self.name)))
        }
    }

    fn current(&self) -> Option<&Vec<Value>> {
        self.position.and_then(|p| self.rows.get(p))
    }
}

impl RowSource for TableFunctionCursor {
    fn row_version(&self) -> u64 {
        self.version
    }

    fn value(&self, column: usize) -> ExpressionResult<Value> {
        let row = self.current().ok_or_else(|| {
            ExpressionError::evaluation(format!("table function {} has no current row", self.name))
        })?;
        row.get(column).cloned().ok_or_else(|| {
            ExpressionError::evaluation(format!(
                "Column index {} out of bounds for {} with {} columns",
                column,
                self.name,
                row.len()
            ))
        })
    }

    fn advance(&mut self) -> bool {
        matches!(self.next_result(), Ok(Some(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::error::ErrorKind;
    use crate::expression::function::TableRoutine;

    fn context() -> StatementContext {
        let mut ctx = StatementContext::default();
        ctx.functions.register_table(TableRoutine::new(
            "series",
            vec![DataType::Int, DataType::Int],
            vec![("n".to_string(), DataType::Int), ("label".to_string(), DataType::NVarChar)],
            |args| {
                let from = args[0].as_i64().unwrap_or(0);
                let to = args[1].as_i64().unwrap_or(-1);
                Ok((from..=to)
                    .map(|n| vec![Value::BigInt(n), Value::String(format!("#{}", n))])
                    .collect())
            },
        ));
        ctx
    }

    #[test]
    fn test_cursor_protocol() {
        let ctx = context();
        let mut cursor = TableFunctionCursor::new("SERIES", vec![Expr::int(1), Expr::add(Expr::int(1), Expr::int(2))]);
        cursor.prepare(&ctx).unwrap();
        assert_eq!(
            cursor.columns().iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["n", "label"]
        );
        assert!(cursor.first().is_err());

        cursor.open(&ctx).unwrap();
        let mut seen = Vec::new();
        while let Some(row) = cursor.next_result().unwrap() {
            seen.push(row[0].clone());
        }
        assert_eq!(seen, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(cursor.next_result().unwrap(), None);

        assert_eq!(cursor.first().unwrap().map(|r| r[1].clone()), Some(Value::String("#1".into())));
        cursor.close();
        assert!(!cursor.is_open());
        assert!(cursor.next_result().is_err());
    }

    #[test]
    fn test_prepare_errors() {
        let ctx = context();
        let err = TableFunctionCursor::new("missing", vec![]).prepare(&ctx).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnresolvedReference { .. }));

        let err = TableFunctionCursor::new("series", vec![Expr::int(1)]).prepare(&ctx).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Arity { .. }));

        let mut cursor = TableFunctionCursor::new("series", vec![Expr::int(1), Expr::int(2)]);
        assert!(cursor.open(&ctx).is_err());
    }

    #[test]
    fn test_columns_read_through_row_source() {
        let mut ctx = context();
        let mut cursor = TableFunctionCursor::new("series", vec![Expr::int(5), Expr::int(6)]);
        cursor.prepare(&ctx).unwrap();
        cursor.open(&ctx).unwrap();
        assert!(cursor.advance());
        ctx.attach_source(0, Box::new(cursor));
        assert_eq!(ctx.source(0).unwrap().value(1).unwrap(), Value::String("#5".into()));
        assert!(ctx.source_mut(0).unwrap().advance());
        assert_eq!(ctx.source(0).unwrap().value(0).unwrap(), Value::Int(6));
        assert!(!ctx.source_mut(0).unwrap().advance());
    }
}
