//! Column metadata and the schema-provider contract consumed during Prepare.
//!
//! The storage and catalog layers live outside this crate; expressions only
//! see them through [`Catalog`]. [`SchemaCatalog`] is an in-memory provider
//! used by the command-line tool and by tests.

use crate::expression::error::{ErrorKind, ExpressionError, ExpressionResult};
use crate::value::{DataType, Value};
use std::collections::HashSet;

/// Metadata of one source column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: DataType,
    /// Declared length for character and binary columns
    pub max_length: Option<usize>,
    pub nullable: bool,
    pub is_key: bool,
    pub is_expression: bool,
    pub auto_increment: bool,
    pub read_only: bool,
    pub default_value: Option<String>,
    pub identity_seed: i64,
    pub identity_step: i64,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            max_length: None,
            nullable: true,
            is_key: false,
            is_expression: false,
            auto_increment: false,
            read_only: false,
            default_value: None,
            identity_seed: 1,
            identity_step: 1,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self.nullable = false;
        self
    }

    pub fn identity(mut self, seed: i64, step: i64) -> Self {
        self.auto_increment = true;
        self.read_only = true;
        self.identity_seed = seed;
        self.identity_step = step;
        self
    }

    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }
}

/// A column resolved to a row-source slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBinding {
    /// Index of the row source in the statement context
    pub table: usize,
    /// Column index within that row source
    pub column: usize,
    pub table_name: String,
    pub metadata: ColumnMetadata,
}

/// Schema lookups needed while preparing expressions.
pub trait Catalog {
    /// Resolve a possibly qualified column name.
    fn resolve_column(&self, qualifier: Option<&str>, name: &str) -> ExpressionResult<ColumnBinding>;

    /// Columns a `*` (or `alias.*`) placeholder expands to.
    fn expand_star(&self, qualifier: Option<&str>) -> ExpressionResult<Vec<ColumnBinding>>;

    /// Type and value of the most recently generated identity of `table`.
    fn last_identity(&self, table: &str) -> ExpressionResult<(DataType, Value)>;

    fn has_fulltext_index(&self, table: &str, column: &str) -> bool;
}

/// A table visible to a statement.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub alias: Option<String>,
    pub columns: Vec<ColumnMetadata>,
    pub last_identity: Option<Value>,
    fulltext_columns: HashSet<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnMetadata>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            columns,
            last_identity: None,
            fulltext_columns: HashSet::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_fulltext_index(mut self, column: impl Into<String>) -> Self {
        self.fulltext_columns.insert(column.into().to_lowercase());
        self
    }

    fn answers_to(&self, qualifier: &str) -> bool {
        self.name.eq_ignore_ascii_case(qualifier)
            || self
                .alias
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(qualifier))
    }

    fn identity_column(&self) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.auto_increment)
    }
}

/// In-memory catalog; the position of a table is its row-source slot.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: Vec<TableSchema>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table and return its slot.
    pub fn add_table(&mut self, table: TableSchema) -> usize {
        self.tables.push(table);
        self.tables.len() - 1
    }

    pub fn table_mut(&mut self, slot: usize) -> Option<&mut TableSchema> {
        self.tables.get_mut(slot)
    }

    fn binding(&self, slot: usize, column: usize) -> ColumnBinding {
        let table = &self.tables[slot];
        ColumnBinding {
            table: slot,
            column,
            table_name: table.name.clone(),
            metadata: table.columns[column].clone(),
        }
    }

    fn find_table(&self, name: &str) -> ExpressionResult<usize> {
        self.tables
            .iter()
            .position(|t| t.answers_to(name))
            .ok_or_else(|| ExpressionError::unresolved(name))
    }
}

impl Catalog for SchemaCatalog {
    fn resolve_column(&self, qualifier: Option<&str>, name: &str) -> ExpressionResult<ColumnBinding> {
        let mut found = Vec::new();
        for (slot, table) in self.tables.iter().enumerate() {
            if qualifier.is_some_and(|q| !table.answers_to(q)) {
                continue;
            }
            if let Some(column) = table
                .columns
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(name))
            {
                found.push((slot, column));
            }
        }
        let display = match qualifier {
            Some(q) => format!("{}.{}", q, name),
            None => name.to_string(),
        };
        match found.as_slice() {
            [] => Err(ExpressionError::unresolved(display)),
            [(slot, column)] => Ok(self.binding(*slot, *column)),
            _ => Err(ErrorKind::AmbiguousReference { name: display }.into()),
        }
    }

    fn expand_star(&self, qualifier: Option<&str>) -> ExpressionResult<Vec<ColumnBinding>> {
        let slots: Vec<usize> = match qualifier {
            Some(q) => vec![self.find_table(q)?],
            None => (0..self.tables.len()).collect(),
        };
        Ok(slots
            .into_iter()
            .flat_map(|slot| {
                (0..self.tables[slot].columns.len()).map(move |column| (slot, column))
            })
            .map(|(slot, column)| self.binding(slot, column))
            .collect())
    }

    fn last_identity(&self, table: &str) -> ExpressionResult<(DataType, Value)> {
        let schema = &self.tables[self.find_table(table)?];
        let column = schema
            .identity_column()
            .ok_or_else(|| ExpressionError::unresolved(format!("{}.<identity>", table)))?;
        Ok((
            column.data_type,
            schema.last_identity.clone().unwrap_or(Value::Null),
        ))
    }

    fn has_fulltext_index(&self, table: &str, column: &str) -> bool {
        self.tables
            .iter()
            .any(|t| t.answers_to(table) && t.fulltext_columns.contains(&column.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> SchemaCatalog {
        let mut catalog = SchemaCatalog::new();
        catalog.add_table(
            TableSchema::new(
                "customers",
                vec![
                    ColumnMetadata::new("id", DataType::Int).identity(1, 1),
                    ColumnMetadata::new("name", DataType::NVarChar).with_max_length(40),
                ],
            )
            .with_alias("c")
            .with_fulltext_index("name"),
        );
        catalog.add_table(TableSchema::new(
            "orders",
            vec![
                ColumnMetadata::new("id", DataType::BigInt),
                ColumnMetadata::new("total", DataType::Money),
            ],
        ));
        catalog
    }

    #[test]
    fn test_resolve_column() {
        let catalog = catalog();
        let binding = catalog.resolve_column(None, "total").unwrap();
        assert_eq!((binding.table, binding.column), (1, 1));
        assert_eq!(binding.metadata.data_type, DataType::Money);

        let binding = catalog.resolve_column(Some("C"), "NAME").unwrap();
        assert_eq!((binding.table, binding.column), (0, 1));
        assert_eq!(binding.metadata.max_length, Some(40));
    }

    #[test]
    fn test_resolution_errors() {
        let catalog = catalog();
        let err = catalog.resolve_column(None, "id").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::AmbiguousReference { .. }));
        let err = catalog.resolve_column(None, "missing").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnresolvedReference { .. }));
        let err = catalog.resolve_column(Some("x"), "id").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnresolvedReference { .. }));
    }

    #[test]
    fn test_expand_star() {
        let catalog = catalog();
        assert_eq!(catalog.expand_star(None).unwrap().len(), 4);
        let orders = catalog.expand_star(Some("orders")).unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[1].metadata.name, "total");
    }

    #[test]
    fn test_last_identity_and_fulltext() {
        let mut catalog = catalog();
        catalog.table_mut(0).unwrap().last_identity = Some(Value::Int(17));
        assert_eq!(
            catalog.last_identity("customers").unwrap(),
            (DataType::Int, Value::Int(17))
        );
        assert!(catalog.last_identity("orders").is_err());
        assert!(catalog.has_fulltext_index("customers", "Name"));
        assert!(!catalog.has_fulltext_index("orders", "total"));
    }
}
