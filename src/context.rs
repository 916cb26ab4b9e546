//! Statement context: everything an expression tree consumes from the
//! statement and connection layers.
//!
//! One context belongs to one compiled statement. Expression trees are
//! prepared and executed against it on the thread driving row iteration.

use crate::catalog::{Catalog, SchemaCatalog};
use crate::expression::error::{ExpressionError, ExpressionResult};
use crate::expression::function::FunctionRegistry;
use crate::pattern::{DefaultWordBreaker, WordBreaker};
use crate::value::{Cell, DataType, Value};
use std::collections::HashMap;

/// Locale-dependent behaviour of comparisons, pattern matching and date names.
#[derive(Debug, Clone, PartialEq)]
pub struct Culture {
    pub case_sensitive: bool,
    pub month_names: [String; 12],
    pub day_names: [String; 7],
}

impl Default for Culture {
    fn default() -> Self {
        let months = [
            "January", "February", "March", "April", "May", "June", "July", "August",
            "September", "October", "November", "December",
        ];
        let days = [
            "Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday",
        ];
        Self {
            case_sensitive: false,
            month_names: months.map(String::from),
            day_names: days.map(String::from),
        }
    }
}

/// Evaluation switches that are not locale dependent.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalSettings {
    /// Upper bound appended to a LIKE prefix to form its range constraint
    pub max_char: char,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            max_char: '\u{FFFF}',
        }
    }
}

/// A cursor over rows of one source (base table, join input or temp table).
pub trait RowSource {
    /// Incremented whenever the cursor moves or the current row is rewritten.
    fn row_version(&self) -> u64;

    /// Value of `column` in the current row.
    fn value(&self, column: usize) -> ExpressionResult<Value>;

    /// Move to the next row; false once exhausted.
    fn advance(&mut self) -> bool;
}

/// Rows held in memory; used for temp tables and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryRows {
    rows: Vec<Vec<Value>>,
    position: usize,
    version: u64,
}

impl MemoryRows {
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self {
            rows,
            position: 0,
            version: 1,
        }
    }

    /// Overwrite the current row in place.
    pub fn set_current(&mut self, row: Vec<Value>) {
        if self.position < self.rows.len() {
            self.rows[self.position] = row;
        } else {
            self.rows.push(row);
        }
        self.version += 1;
    }

    pub fn rewind(&mut self) {
        self.position = 0;
        self.version += 1;
    }
}

impl RowSource for MemoryRows {
    fn row_version(&self) -> u64 {
        self.version
    }

    fn value(&self, column: usize) -> ExpressionResult<Value> {
        let row = self
            .rows
            .get(self.position)
            .ok_or_else(|| ExpressionError::evaluation("row cursor is past the last row"))?;
        row.get(column).cloned().ok_or_else(|| {
            ExpressionError::evaluation(format!(
                "Column index {} out of bounds for row with {} columns",
                column,
                row.len()
            ))
        })
    }

    fn advance(&mut self) -> bool {
        if self.position < self.rows.len() {
            self.position += 1;
            self.version += 1;
        }
        self.position < self.rows.len()
    }
}

/// Named statement parameters. Types are declared before Prepare, values are
/// bound (and rebound) afterwards.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    cells: HashMap<String, Cell>,
    version: u64,
}

fn parameter_key(name: &str) -> String {
    name.trim_start_matches('@').to_lowercase()
}

impl Parameters {
    pub fn declare(&mut self, name: &str, data_type: DataType) {
        self.cells.insert(parameter_key(name), Cell::null(data_type));
        self.version += 1;
    }

    /// Bind a value, converting it to the declared type.
    pub fn bind(&mut self, name: &str, value: Value) -> ExpressionResult<()> {
        let cell = self
            .cells
            .get_mut(&parameter_key(name))
            .ok_or_else(|| ExpressionError::unresolved(name))?;
        cell.set(value)?;
        self.version += 1;
        Ok(())
    }

    pub fn declared_type(&self, name: &str) -> Option<DataType> {
        self.cells.get(&parameter_key(name)).map(Cell::data_type)
    }

    pub fn value(&self, name: &str) -> ExpressionResult<Value> {
        self.cells
            .get(&parameter_key(name))
            .map(|c| c.value().clone())
            .ok_or_else(|| ExpressionError::unresolved(name))
    }

    /// Changes on every declaration or binding.
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Per-statement state shared by every node of an expression tree.
pub struct StatementContext {
    pub culture: Culture,
    pub settings: EvalSettings,
    pub catalog: Box<dyn Catalog>,
    pub functions: FunctionRegistry,
    pub parameters: Parameters,
    pub word_breaker: Box<dyn WordBreaker>,
    sources: Vec<Option<Box<dyn RowSource>>>,
    last_error: i32,
    last_identity: Value,
}

impl StatementContext {
    pub fn new(catalog: Box<dyn Catalog>) -> Self {
        Self {
            culture: Culture::default(),
            settings: EvalSettings::default(),
            catalog,
            functions: FunctionRegistry::new(),
            parameters: Parameters::default(),
            word_breaker: Box::new(DefaultWordBreaker),
            sources: Vec::new(),
            last_error: 0,
            last_identity: Value::Null,
        }
    }

    /// Attach the row cursor for `slot`, replacing any previous one.
    pub fn attach_source(&mut self, slot: usize, source: Box<dyn RowSource>) {
        if self.sources.len() <= slot {
            self.sources.resize_with(slot + 1, || None);
        }
        self.sources[slot] = Some(source);
    }

    pub fn source(&self, slot: usize) -> ExpressionResult<&dyn RowSource> {
        self.sources
            .get(slot)
            .and_then(|s| s.as_deref())
            .ok_or_else(|| ExpressionError::evaluation(format!("no row source attached to slot {}", slot)))
    }

    pub fn source_mut(&mut self, slot: usize) -> ExpressionResult<&mut (dyn RowSource + 'static)> {
        self.sources
            .get_mut(slot)
            .and_then(|s| s.as_deref_mut())
            .ok_or_else(|| ExpressionError::evaluation(format!("no row source attached to slot {}", slot)))
    }

    /// Remember the code of an error surfaced to the caller (`@@ERROR`).
    pub fn record_error(&mut self, error: &ExpressionError) {
        self.last_error = error.code();
    }

    pub fn clear_error(&mut self) {
        self.last_error = 0;
    }

    pub fn last_error(&self) -> i32 {
        self.last_error
    }

    /// Identity generated by the most recent insert on this connection
    /// (`@@IDENTITY`).
    pub fn set_last_identity(&mut self, value: Value) {
        self.last_identity = value;
    }

    pub fn last_identity(&self) -> &Value {
        &self.last_identity
    }
}

impl Default for StatementContext {
    fn default() -> Self {
        Self::new(Box::new(SchemaCatalog::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::error::ErrorKind;

    #[test]
    fn test_memory_rows_versioning() {
        let mut rows = MemoryRows::new(vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
        let v0 = rows.row_version();
        assert_eq!(rows.value(0).unwrap(), Value::Int(1));
        assert!(rows.advance());
        assert!(rows.row_version() > v0);
        assert_eq!(rows.value(0).unwrap(), Value::Int(2));
        assert!(!rows.advance());
        assert!(rows.value(0).is_err());
    }

    #[test]
    fn test_parameters() {
        let mut params = Parameters::default();
        params.declare("@limit", DataType::BigInt);
        let v = params.version();
        params.bind("limit", Value::Int(5)).unwrap();
        assert!(params.version() > v);
        assert_eq!(params.value("@LIMIT").unwrap(), Value::BigInt(5));
        let err = params.bind("@missing", Value::Int(1)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnresolvedReference { .. }));
    }

    #[test]
    fn test_sources_and_last_error() {
        let mut ctx = StatementContext::default();
        assert!(ctx.source(0).is_err());
        ctx.attach_source(2, Box::new(MemoryRows::new(vec![vec![Value::Bit(true)]])));
        assert!(ctx.source(1).is_err());
        assert_eq!(ctx.source(2).unwrap().value(0).unwrap(), Value::Bit(true));

        ctx.record_error(&ExpressionError::new(ErrorKind::DivisionByZero));
        assert_eq!(ctx.last_error(), 25_011);
        ctx.clear_error();
        assert_eq!(ctx.last_error(), 0);
    }
}
