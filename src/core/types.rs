use super::{DbError, Result, Value};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;

pub type Row = Vec<Value>;

/// Largest decimal precision representable by the 128-bit wire encoding.
pub const MAX_DECIMAL_PRECISION: u8 = 38;

const MAX_IDENTIFIER_LEN: usize = 63;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex");
}

/// Checks that `name` can be used as a table or column identifier.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(DbError::InvalidSchema(format!(
            "identifier '{}' is longer than {} characters",
            name, MAX_IDENTIFIER_LEN
        )));
    }
    if !IDENTIFIER.is_match(name) {
        return Err(DbError::InvalidSchema(format!(
            "identifier '{}' must match [A-Za-z_][A-Za-z0-9_]*",
            name
        )));
    }
    Ok(())
}

/// Column type in the database's type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Int32,
    Int64,
    Decimal { precision: u8, scale: u8 },
    Text,
    Boolean,
    Timestamp,
}

impl SqlType {
    pub fn decimal(precision: u8, scale: u8) -> Self {
        Self::Decimal { precision, scale }
    }

    /// Type name used in CREATE TABLE statements.
    pub fn ddl_name(&self) -> String {
        match self {
            Self::Int32 => "INTEGER".to_string(),
            Self::Int64 => "BIGINT".to_string(),
            Self::Decimal { precision, scale } => format!("DECIMAL({},{})", precision, scale),
            Self::Text => "TEXT".to_string(),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Timestamp => "TIMESTAMP".to_string(),
        }
    }

    fn validate(&self) -> Result<()> {
        if let Self::Decimal { precision, scale } = *self {
            if precision == 0 || precision > MAX_DECIMAL_PRECISION {
                return Err(DbError::InvalidSchema(format!(
                    "decimal precision must be in 1..={}, got {}",
                    MAX_DECIMAL_PRECISION, precision
                )));
            }
            if scale > precision {
                return Err(DbError::InvalidSchema(format!(
                    "decimal scale {} exceeds precision {}",
                    scale, precision
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ddl_name())
    }
}

/// One column of an entity schema.
///
/// `name` is the logical (field) name application code uses, `column` the
/// physical column name in the table. Both default to the same string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnDescriptor {
    pub fn new(column: impl Into<String>, sql_type: SqlType) -> Self {
        let column = column.into();
        Self {
            name: column.clone(),
            column,
            sql_type,
            nullable: false,
            primary_key: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Sets the logical field name the column is addressed by.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Immutable mapping of an entity to a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    table: String,
    columns: Vec<ColumnDescriptor>,
    primary_key: Vec<usize>,
}

impl TableSchema {
    /// Validates and builds a schema. Fails fast on bad identifiers,
    /// duplicate names, a missing or nullable primary key and invalid
    /// decimal declarations.
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Result<Self> {
        let table = table.into();
        validate_identifier(&table)?;

        if columns.is_empty() {
            return Err(DbError::InvalidSchema(format!("table '{}' has no columns", table)));
        }

        let mut physical = HashSet::new();
        let mut logical = HashSet::new();
        for column in &columns {
            validate_identifier(&column.column)?;
            column.sql_type.validate()?;
            if !physical.insert(column.column.to_ascii_lowercase()) {
                return Err(DbError::InvalidSchema(format!(
                    "duplicate column '{}' in table '{}'",
                    column.column, table
                )));
            }
            if !logical.insert(column.name.as_str()) {
                return Err(DbError::InvalidSchema(format!(
                    "duplicate field '{}' in table '{}'",
                    column.name, table
                )));
            }
            if column.primary_key && column.nullable {
                return Err(DbError::InvalidSchema(format!(
                    "primary key column '{}' cannot be nullable",
                    column.column
                )));
            }
        }

        let primary_key: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, col)| col.primary_key)
            .map(|(idx, _)| idx)
            .collect();
        if primary_key.is_empty() {
            return Err(DbError::InvalidSchema(format!(
                "table '{}' declares no primary key",
                table
            )));
        }

        Ok(Self {
            table,
            columns,
            primary_key,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn primary_key(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.primary_key.iter().map(|&idx| &self.columns[idx])
    }

    pub fn primary_key_indexes(&self) -> &[usize] {
        &self.primary_key
    }

    /// Resolves a column by logical name first, then by physical name.
    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|col| col.name == name)
            .or_else(|| self.columns.iter().position(|col| col.column == name))
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn require_column(&self, name: &str) -> Result<&ColumnDescriptor> {
        self.get_column(name)
            .ok_or_else(|| DbError::ColumnNotFound(name.to_string(), self.table.clone()))
    }

    /// Physical column names in declaration order.
    pub fn physical_names(&self) -> Vec<String> {
        self.columns.iter().map(|col| col.column.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("id", SqlType::Int64).primary_key(),
            ColumnDescriptor::new("amount", SqlType::decimal(18, 2)),
            ColumnDescriptor::new("note", SqlType::Text).nullable().field("comment"),
        ]
    }

    #[test]
    fn test_schema_lookup_by_field_and_column() {
        let schema = TableSchema::new("orders", columns()).unwrap();
        assert_eq!(schema.find_column_index("comment"), Some(2));
        assert_eq!(schema.find_column_index("note"), Some(2));
        assert_eq!(schema.find_column_index("missing"), None);
        assert_eq!(schema.primary_key().count(), 1);
    }

    #[test]
    fn test_schema_requires_primary_key() {
        let cols = vec![ColumnDescriptor::new("id", SqlType::Int64)];
        let err = TableSchema::new("orders", cols).unwrap_err();
        assert!(matches!(err, DbError::InvalidSchema(_)));
    }

    #[test]
    fn test_schema_rejects_duplicate_columns() {
        let cols = vec![
            ColumnDescriptor::new("id", SqlType::Int64).primary_key(),
            ColumnDescriptor::new("ID", SqlType::Text).field("other"),
        ];
        assert!(TableSchema::new("orders", cols).is_err());
    }

    #[test]
    fn test_schema_rejects_bad_identifiers_and_decimals() {
        assert!(TableSchema::new("orders; DROP", columns()).is_err());

        let cols = vec![
            ColumnDescriptor::new("id", SqlType::Int64).primary_key(),
            ColumnDescriptor::new("amount", SqlType::decimal(10, 12)),
        ];
        assert!(TableSchema::new("orders", cols).is_err());

        let cols = vec![
            ColumnDescriptor::new("id", SqlType::Int64).primary_key(),
            ColumnDescriptor::new("amount", SqlType::decimal(39, 2)),
        ];
        assert!(TableSchema::new("orders", cols).is_err());
    }

    #[test]
    fn test_ddl_names() {
        assert_eq!(SqlType::decimal(18, 2).ddl_name(), "DECIMAL(18,2)");
        assert_eq!(SqlType::Int32.to_string(), "INTEGER");
    }
}
