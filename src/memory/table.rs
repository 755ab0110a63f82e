use crate::core::WireValue;
use crate::session::{SessionError, SessionResult};
use std::collections::BTreeMap;

pub type WireRow = Vec<WireValue>;

/// Storage class of a column, as declared in CREATE TABLE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Int32,
    Int64,
    Decimal { scale: u8 },
    Utf8,
    Bool,
    Timestamp,
}

impl ColumnKind {
    /// Parses a DDL type name such as `BIGINT` or `DECIMAL(18,2)`.
    pub fn parse(sql_type: &str) -> SessionResult<Self> {
        let upper = sql_type.trim().to_ascii_uppercase();
        let kind = match upper.as_str() {
            "INT" | "INTEGER" | "INT4" => Self::Int32,
            "BIGINT" | "INT8" => Self::Int64,
            "TEXT" | "VARCHAR" | "STRING" | "UTF8" => Self::Utf8,
            "BOOL" | "BOOLEAN" => Self::Bool,
            "TIMESTAMP" => Self::Timestamp,
            other if other.starts_with("DECIMAL") || other.starts_with("NUMERIC") => {
                let args = other
                    .split_once('(')
                    .and_then(|(_, rest)| rest.strip_suffix(')'))
                    .ok_or_else(|| SessionError::Rejected(format!("decimal type '{}' needs (precision,scale)", sql_type)))?;
                let scale = args
                    .split(',')
                    .nth(1)
                    .and_then(|s| s.trim().parse::<u8>().ok())
                    .unwrap_or(0);
                Self::Decimal { scale }
            }
            _ => {
                return Err(SessionError::Rejected(format!(
                    "unsupported column type '{}'",
                    sql_type
                )));
            }
        };
        Ok(kind)
    }

    fn accepts(&self, value: &WireValue) -> bool {
        matches!(
            (self, value),
            (Self::Int32, WireValue::Int32(_))
                | (Self::Int64, WireValue::Int64(_))
                | (Self::Utf8, WireValue::Utf8(_))
                | (Self::Bool, WireValue::Bool(_))
                | (Self::Timestamp, WireValue::Timestamp(_))
        ) || matches!(
            (self, value),
            (Self::Decimal { scale }, WireValue::Decimal { scale: s, .. }) if scale == s
        )
    }

    /// Converts a literal or parameter to this column's representation
    /// where the conversion is lossless.
    pub fn coerce(&self, value: WireValue) -> WireValue {
        match (self, value) {
            (Self::Int32, WireValue::Int64(v)) => match i32::try_from(v) {
                Ok(v) => WireValue::Int32(v),
                Err(_) => WireValue::Int64(v),
            },
            (Self::Int64, WireValue::Int32(v)) => WireValue::Int64(i64::from(v)),
            (Self::Decimal { scale }, WireValue::Int64(v)) => {
                match 10i128.checked_pow(u32::from(*scale)).and_then(|f| i128::from(v).checked_mul(f)) {
                    Some(unscaled) => WireValue::Decimal {
                        unscaled,
                        scale: *scale,
                    },
                    None => WireValue::Int64(v),
                }
            }
            (_, value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemColumn {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub primary_key: bool,
}

/// One table of the in-memory backend, rows ordered by primary key.
#[derive(Debug, Clone)]
pub struct MemTable {
    name: String,
    columns: Vec<MemColumn>,
    key: Vec<usize>,
    rows: BTreeMap<WireRow, WireRow>,
}

impl MemTable {
    pub fn new(name: impl Into<String>, columns: Vec<MemColumn>) -> SessionResult<Self> {
        let name = name.into();
        let key: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        if key.is_empty() {
            return Err(SessionError::Rejected(format!(
                "table '{}' has no primary key",
                name
            )));
        }
        Ok(Self {
            name,
            columns,
            key,
            rows: BTreeMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[MemColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> SessionResult<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                SessionError::Rejected(format!("column '{}' does not exist in '{}'", name, self.name))
            })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn key_of(&self, row: &[WireValue]) -> WireRow {
        self.key.iter().map(|&i| row[i].clone()).collect()
    }

    pub fn is_key_column(&self, idx: usize) -> bool {
        self.key.contains(&idx)
    }

    /// Checks arity, types and nullability of a full row.
    pub fn validate(&self, row: &[WireValue]) -> SessionResult<()> {
        if row.len() != self.columns.len() {
            return Err(SessionError::Rejected(format!(
                "'{}' expects {} values, got {}",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(row) {
            if value.is_null() {
                if !column.nullable {
                    return Err(SessionError::ConstraintViolation(format!(
                        "NULL in non-nullable column '{}'",
                        column.name
                    )));
                }
                continue;
            }
            if !column.kind.accepts(value) {
                return Err(SessionError::Rejected(format!(
                    "value {} does not fit column '{}' ({:?})",
                    value, column.name, column.kind
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &[WireValue]) -> Option<&WireRow> {
        self.rows.get(key)
    }

    pub fn rows(&self) -> impl Iterator<Item = &WireRow> {
        self.rows.values()
    }

    /// Inserts a new row; an existing key is a constraint violation.
    pub fn insert(&mut self, row: WireRow) -> SessionResult<WireRow> {
        self.validate(&row)?;
        let key = self.key_of(&row);
        if self.rows.contains_key(&key) {
            return Err(SessionError::ConstraintViolation(format!(
                "duplicate primary key {:?} in '{}'",
                key, self.name
            )));
        }
        self.rows.insert(key.clone(), row);
        Ok(key)
    }

    /// Inserts or replaces the row with the same key, returning the key and
    /// the replaced row.
    pub fn upsert(&mut self, row: WireRow) -> SessionResult<(WireRow, Option<WireRow>)> {
        self.validate(&row)?;
        let key = self.key_of(&row);
        let previous = self.rows.insert(key.clone(), row);
        Ok((key, previous))
    }

    /// Replaces the row stored under `key`, returning the previous one.
    pub fn put(&mut self, key: WireRow, row: WireRow) -> Option<WireRow> {
        self.rows.insert(key, row)
    }

    pub fn remove(&mut self, key: &[WireValue]) -> Option<WireRow> {
        self.rows.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> MemTable {
        MemTable::new(
            "orders",
            vec![
                MemColumn {
                    name: "id".into(),
                    kind: ColumnKind::Int64,
                    nullable: false,
                    primary_key: true,
                },
                MemColumn {
                    name: "note".into(),
                    kind: ColumnKind::Utf8,
                    nullable: true,
                    primary_key: false,
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!(ColumnKind::parse("BIGINT").unwrap(), ColumnKind::Int64);
        assert_eq!(ColumnKind::parse("decimal(18,2)").unwrap(), ColumnKind::Decimal { scale: 2 });
        assert!(ColumnKind::parse("BLOB").is_err());
    }

    #[test]
    fn test_insert_rejects_duplicate_key() {
        let mut t = table();
        t.insert(vec![WireValue::Int64(1), WireValue::Null]).unwrap();
        let err = t.insert(vec![WireValue::Int64(1), WireValue::Utf8("x".into())]).unwrap_err();
        assert!(matches!(err, SessionError::ConstraintViolation(_)));

        let (_, previous) = t.upsert(vec![WireValue::Int64(1), WireValue::Utf8("y".into())]).unwrap();
        assert_eq!(previous, Some(vec![WireValue::Int64(1), WireValue::Null]));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_validate_types() {
        let t = table();
        assert!(t.validate(&[WireValue::Null, WireValue::Null]).is_err());
        assert!(t.validate(&[WireValue::Int32(1), WireValue::Null]).is_err());
        assert_eq!(ColumnKind::Int64.coerce(WireValue::Int32(4)), WireValue::Int64(4));
    }
}
