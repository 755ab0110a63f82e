use super::{key_predicate, CreateMode, StatementBuilder, StatementExecutor, TableRef};
use crate::core::{DbError, Operation, Result, Row, Value};
use crate::mapping::decode_row;
use crate::query::{Assignments, Predicate};
use crate::session::ExecuteOutcome;
use log::{debug, info};

impl StatementExecutor {
    pub async fn create_table(&self, table: &TableRef, mode: CreateMode) -> Result<()> {
        let create = self.builder(table).create_table();
        let statements = match mode {
            CreateMode::FailIfExists => vec![create],
            CreateMode::Replace => vec![StatementBuilder::drop_table(table.name(), true)?, create],
        };

        info!("Creating table '{}' ({:?})", table.name(), mode);
        self.execute_all(Operation::CreateTable, table.name(), &statements, true)
            .await?;
        Ok(())
    }

    /// Drops a table; a missing table is `NotFound`.
    pub async fn drop_table(&self, name: &str) -> Result<()> {
        let statement = StatementBuilder::drop_table(name, false)?;
        info!("Dropping table '{}'", name);
        self.execute_all(Operation::DropTable, name, &[statement], false)
            .await?;
        Ok(())
    }

    pub async fn drop_table_if_exists(&self, name: &str) -> Result<()> {
        let statement = StatementBuilder::drop_table(name, true)?;
        info!("Dropping table '{}' if it exists", name);
        self.execute_all(Operation::DropTable, name, &[statement], false)
            .await?;
        Ok(())
    }

    pub async fn insert(&self, table: &TableRef, row: &[Value]) -> Result<u64> {
        let statement = self.builder(table).insert(row)?;
        let outcomes = self
            .execute_all(Operation::Insert, table.name(), &[statement], false)
            .await?;
        Ok(rows_affected(&outcomes))
    }

    /// Inserts all rows in one transaction.
    pub async fn insert_many(&self, table: &TableRef, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let builder = self.builder(table);
        let statements = rows
            .iter()
            .map(|row| builder.insert(row))
            .collect::<Result<Vec<_>>>()?;
        let outcomes = self
            .execute_all(Operation::Insert, table.name(), &statements, true)
            .await?;
        Ok(rows_affected(&outcomes))
    }

    pub async fn count(&self, table: &TableRef, predicate: Option<&Predicate>) -> Result<u64> {
        let statements = self.builder(table).count(predicate)?;
        if statements.is_empty() {
            debug!("COUNT on '{}' matches nothing; skipping session", table.name());
            return Ok(0);
        }

        let outcomes = self
            .execute_all(Operation::Count, table.name(), &statements, false)
            .await?;
        outcomes.into_iter().try_fold(0u64, |total, outcome| -> Result<u64> {
            let count = outcome
                .into_rows()
                .scalar()
                .and_then(|value| value.as_i64())
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| DbError::StatementRejected {
                    operation: Operation::Count,
                    table: table.name().to_string(),
                    message: "COUNT returned no integer".to_string(),
                })?;
            Ok(total + count)
        })
    }

    pub async fn exists(&self, table: &TableRef, predicate: Option<&Predicate>) -> Result<bool> {
        let statements = self.builder(table).exists(predicate)?;
        if statements.is_empty() {
            return Ok(false);
        }

        let outcomes = self
            .execute_all(Operation::Exists, table.name(), &statements, false)
            .await?;
        Ok(outcomes.into_iter().any(|outcome| !outcome.into_rows().is_empty()))
    }

    /// Rows matching `predicate` (all rows without one), decoded in schema
    /// order.
    pub async fn select(&self, table: &TableRef, predicate: Option<&Predicate>) -> Result<Vec<Row>> {
        let statements = self.builder(table).select(predicate)?;
        if statements.is_empty() {
            return Ok(Vec::new());
        }

        let outcomes = self
            .execute_all(Operation::Select, table.name(), &statements, false)
            .await?;

        let mut rows = Vec::new();
        for outcome in outcomes {
            for wire in outcome.into_rows().rows {
                rows.push(decode_row(table.schema(), &wire)?);
            }
        }
        Ok(rows)
    }

    pub async fn find_by_key(&self, table: &TableRef, key: &[Value]) -> Result<Option<Row>> {
        let predicate = key_predicate(table, key)?;
        let mut rows = self.select(table, Some(&predicate)).await?;
        Ok(rows.pop())
    }

    /// One UPDATE scoped by `predicate`. When the predicate has to be split,
    /// all chunks run in one transaction.
    pub async fn update_where(
        &self,
        table: &TableRef,
        predicate: &Predicate,
        assignments: &Assignments,
    ) -> Result<u64> {
        let statements = self.builder(table).update(predicate, assignments)?;
        if statements.is_empty() {
            return Ok(0);
        }
        if statements.len() > 1 {
            debug!("UPDATE on '{}' split into {} statements", table.name(), statements.len());
        }

        let outcomes = self
            .execute_all(Operation::Update, table.name(), &statements, true)
            .await?;
        Ok(rows_affected(&outcomes))
    }

    pub async fn delete_where(&self, table: &TableRef, predicate: &Predicate) -> Result<u64> {
        let statements = self.builder(table).delete(predicate)?;
        if statements.is_empty() {
            return Ok(0);
        }
        if statements.len() > 1 {
            debug!("DELETE on '{}' split into {} statements", table.name(), statements.len());
        }

        let outcomes = self
            .execute_all(Operation::Delete, table.name(), &statements, true)
            .await?;
        Ok(rows_affected(&outcomes))
    }
}

fn rows_affected(outcomes: &[ExecuteOutcome]) -> u64 {
    outcomes.iter().map(ExecuteOutcome::rows_affected).sum()
}
