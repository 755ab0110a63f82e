use super::TableRef;
use crate::core::{validate_identifier, DbError, Result, Value, WireValue};
use crate::mapping::encode_row;
use crate::query::{quote_identifier, Assignments, Predicate, StatementLimits, Translator};
use crate::session::Statement;

/// Renders the statements of one table.
///
/// Everything here is pure: encoding and translation errors surface before
/// any session is opened. Predicate-scoped statements come back as a list,
/// one entry per chunk the predicate had to be split into; an empty list
/// means the predicate matches nothing.
pub struct StatementBuilder<'a> {
    table: &'a TableRef,
    limits: StatementLimits,
}

impl<'a> StatementBuilder<'a> {
    pub fn new(table: &'a TableRef, limits: StatementLimits) -> Self {
        Self { table, limits }
    }

    fn quoted_table(&self) -> String {
        quote_identifier(self.table.name())
    }

    pub fn create_table(&self) -> Statement {
        let schema = self.table.schema();
        let mut parts: Vec<String> = schema
            .columns()
            .iter()
            .map(|col| {
                let mut def = format!("{} {}", quote_identifier(&col.column), col.sql_type.ddl_name());
                if !col.nullable {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();

        let key: Vec<String> = schema.primary_key().map(|col| quote_identifier(&col.column)).collect();
        parts.push(format!("PRIMARY KEY ({})", key.join(", ")));

        Statement::text(format!("CREATE TABLE {} ({})", self.quoted_table(), parts.join(", ")))
    }

    pub fn drop_table(name: &str, if_exists: bool) -> Result<Statement> {
        validate_identifier(name)?;
        let sql = if if_exists {
            format!("DROP TABLE IF EXISTS {}", quote_identifier(name))
        } else {
            format!("DROP TABLE {}", quote_identifier(name))
        };
        Ok(Statement::text(sql))
    }

    pub fn insert(&self, row: &[Value]) -> Result<Statement> {
        let schema = self.table.schema();
        let params = encode_row(schema, row)?;

        let columns: Vec<String> = schema.columns().iter().map(|c| quote_identifier(&c.column)).collect();
        let placeholders: Vec<String> = (1..=params.len()).map(|n| format!("${}", n)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quoted_table(),
            columns.join(", "),
            placeholders.join(", ")
        );

        self.limits.check(&sql, params.len())?;
        Ok(Statement::new(sql, params))
    }

    pub fn count(&self, predicate: Option<&Predicate>) -> Result<Vec<Statement>> {
        let prefix = format!("SELECT COUNT(*) FROM {}", self.quoted_table());
        self.filtered(prefix, Vec::new(), "", predicate)
    }

    pub fn exists(&self, predicate: Option<&Predicate>) -> Result<Vec<Statement>> {
        let prefix = format!("SELECT 1 FROM {}", self.quoted_table());
        self.filtered(prefix, Vec::new(), " LIMIT 1", predicate)
    }

    /// SELECT of every column in schema order.
    pub fn select(&self, predicate: Option<&Predicate>) -> Result<Vec<Statement>> {
        let columns: Vec<String> = self
            .table
            .schema()
            .columns()
            .iter()
            .map(|c| quote_identifier(&c.column))
            .collect();
        let prefix = format!("SELECT {} FROM {}", columns.join(", "), self.quoted_table());
        self.filtered(prefix, Vec::new(), "", predicate)
    }

    pub fn update(&self, predicate: &Predicate, assignments: &Assignments) -> Result<Vec<Statement>> {
        let set = Translator::new(self.table.schema()).translate_assignments(assignments, 1)?;
        let prefix = format!("UPDATE {} SET {}", self.quoted_table(), set.sql);
        self.filtered(prefix, set.params, "", Some(predicate))
    }

    pub fn delete(&self, predicate: &Predicate) -> Result<Vec<Statement>> {
        let prefix = format!("DELETE FROM {}", self.quoted_table());
        self.filtered(prefix, Vec::new(), "", Some(predicate))
    }

    fn filtered(
        &self,
        prefix: String,
        prefix_params: Vec<WireValue>,
        suffix: &str,
        predicate: Option<&Predicate>,
    ) -> Result<Vec<Statement>> {
        let Some(predicate) = predicate else {
            let sql = format!("{}{}", prefix, suffix);
            self.limits.check(&sql, prefix_params.len())?;
            return Ok(vec![Statement::new(sql, prefix_params)]);
        };

        const WHERE: &str = " WHERE ";
        let translator = Translator::new(self.table.schema());
        let chunks = translator.plan_chunks(
            predicate,
            &self.limits,
            prefix.len() + WHERE.len() + suffix.len(),
            prefix_params.len(),
        )?;

        chunks
            .iter()
            .map(|chunk| {
                let fragment = translator.translate_predicate(chunk, prefix_params.len() + 1)?;
                let sql = format!("{}{}{}{}", prefix, WHERE, fragment.sql, suffix);
                let mut params = prefix_params.clone();
                params.extend(fragment.params);
                self.limits.check(&sql, params.len())?;
                Ok(Statement::new(sql, params))
            })
            .collect()
    }
}

/// Equality conjunction over the primary key, in key order.
pub fn key_predicate(table: &TableRef, key: &[Value]) -> Result<Predicate> {
    let schema = table.schema();
    let columns: Vec<_> = schema.primary_key().collect();
    if columns.len() != key.len() {
        return Err(DbError::TypeMismatch(format!(
            "table '{}' has a {}-column primary key, got {} value(s)",
            table.name(),
            columns.len(),
            key.len()
        )));
    }

    Ok(Predicate::all(
        columns
            .iter()
            .zip(key)
            .map(|(col, value)| Predicate::eq(col.name.clone(), value.clone())),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnDescriptor, SqlType, TableSchema};
    use crate::query::col;
    use std::sync::Arc;

    fn table() -> TableRef {
        let schema = TableSchema::new(
            "orders",
            vec![
                ColumnDescriptor::new("region", SqlType::Text).primary_key(),
                ColumnDescriptor::new("id", SqlType::Int64).primary_key(),
                ColumnDescriptor::new("amount", SqlType::decimal(18, 2)),
                ColumnDescriptor::new("note", SqlType::Text).nullable(),
            ],
        )
        .unwrap();
        TableRef::new(Arc::new(schema))
    }

    #[test]
    fn test_create_table_ddl() {
        let table = table();
        let stmt = StatementBuilder::new(&table, StatementLimits::default()).create_table();
        assert_eq!(
            stmt.sql,
            "CREATE TABLE \"orders\" (\"region\" TEXT NOT NULL, \"id\" BIGINT NOT NULL, \
             \"amount\" DECIMAL(18,2) NOT NULL, \"note\" TEXT, PRIMARY KEY (\"region\", \"id\"))"
        );
    }

    #[test]
    fn test_update_numbers_parameters_after_assignments() {
        let table = table();
        let builder = StatementBuilder::new(&table, StatementLimits::default());
        let stmts = builder
            .update(&col("id").is_in([1i64, 2]), &Assignments::new().set("note", "x"))
            .unwrap();
        assert_eq!(stmts.len(), 1);
        assert_eq!(
            stmts[0].sql,
            "UPDATE \"orders\" SET \"note\" = $1 WHERE \"id\" IN ($2, $3)"
        );
        assert_eq!(stmts[0].params.len(), 3);
    }

    #[test]
    fn test_delete_splits_large_lists() {
        let table = table();
        let limits = StatementLimits::default().max_in_list(10);
        let stmts = StatementBuilder::new(&table, limits)
            .delete(&col("id").is_in(0i64..35))
            .unwrap();
        assert_eq!(stmts.len(), 4);
        let total: usize = stmts.iter().map(|s| s.params.len()).sum();
        assert_eq!(total, 35);
    }

    #[test]
    fn test_empty_membership_builds_nothing() {
        let table = table();
        let empty: Vec<i64> = Vec::new();
        let stmts = StatementBuilder::new(&table, StatementLimits::default())
            .count(Some(&col("id").is_in(empty)))
            .unwrap();
        assert!(stmts.is_empty());
    }

    #[test]
    fn test_exists_and_insert() {
        let table = table();
        let builder = StatementBuilder::new(&table, StatementLimits::default());
        let stmts = builder.exists(None).unwrap();
        assert_eq!(stmts[0].sql, "SELECT 1 FROM \"orders\" LIMIT 1");

        let err = builder.insert(&[Value::from("eu")]).unwrap_err();
        assert!(matches!(err, DbError::TypeMismatch(_)));
    }

    #[test]
    fn test_key_predicate() {
        let table = table();
        let p = key_predicate(&table, &[Value::from("eu"), Value::from(7i64)]).unwrap();
        assert_eq!(p.conjuncts().len(), 2);
        assert!(key_predicate(&table, &[Value::from(7i64)]).is_err());
    }
}
