use super::change::{undo_all, Change};
use super::plan::{Filter, MemPlan, Operand, Projection};
use super::table::{MemTable, WireRow};
use super::MemoryDatabase;
use crate::core::WireValue;
use crate::result::ResultSet;
use crate::session::{ExecuteOutcome, Session, SessionError, SessionResult, Statement};
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Session on a [`MemoryDatabase`].
///
/// Outside a transaction every statement commits on its own. Inside one,
/// changes are applied immediately and recorded so ROLLBACK can reverse
/// them; other sessions see uncommitted rows.
pub struct MemorySession {
    id: u64,
    db: MemoryDatabase,
    undo: Option<Vec<Change>>,
}

impl MemorySession {
    pub(super) fn new(id: u64, db: MemoryDatabase) -> Self {
        Self { id, db, undo: None }
    }

    fn record(&mut self, changes: Vec<Change>) {
        if let Some(log) = self.undo.as_mut() {
            log.extend(changes);
        }
    }
}

/// A session dropped inside a transaction rolls it back, like a server
/// does when the connection goes away.
impl Drop for MemorySession {
    fn drop(&mut self) {
        let Some(log) = self.undo.take() else {
            return;
        };
        if log.is_empty() {
            return;
        }
        warn!(
            "Session {} dropped inside a transaction; rolling back {} change(s) on {:?}",
            self.id,
            log.len(),
            touched_tables(&log)
        );

        if let Ok(mut tables) = self.db.tables().try_write() {
            undo_all(log, &mut tables);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let db = self.db.clone();
                handle.spawn(async move {
                    let mut tables = db.tables().write().await;
                    undo_all(log, &mut tables);
                });
            }
            Err(_) => {
                let mut tables = self.db.tables().blocking_write();
                undo_all(log, &mut tables);
            }
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> u64 {
        self.id
    }

    async fn execute(&mut self, statement: &Statement) -> SessionResult<ExecuteOutcome> {
        self.db.before_statement(&statement.sql).await?;

        let plan = self.db.plan(&statement.sql)?;
        match plan.as_ref() {
            MemPlan::Begin => {
                self.begin().await?;
                return Ok(ExecuteOutcome::RowsAffected(0));
            }
            MemPlan::Commit => {
                self.commit().await?;
                return Ok(ExecuteOutcome::RowsAffected(0));
            }
            MemPlan::Rollback => {
                self.rollback().await?;
                return Ok(ExecuteOutcome::RowsAffected(0));
            }
            _ => {}
        }

        let mut tables = self.db.tables().write().await;
        let mut changes = Vec::new();
        match run(&plan, &statement.params, &mut tables, &mut changes) {
            Ok(outcome) => {
                drop(tables);
                self.record(changes);
                Ok(outcome)
            }
            Err(err) => {
                undo_all(changes, &mut tables);
                debug!(
                    "Session {} statement on '{}' failed: {}",
                    self.id,
                    plan.table().unwrap_or("-"),
                    err
                );
                Err(err)
            }
        }
    }

    async fn bulk_ingest(
        &mut self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<WireValue>>,
    ) -> SessionResult<u64> {
        self.db.before_bulk_batch(table).await?;

        let row_count = rows.len();
        let mut tables = self.db.tables().write().await;
        let mut changes = Vec::with_capacity(row_count);
        match ingest(table, columns, rows, &mut tables, &mut changes) {
            Ok(written) => {
                drop(tables);
                self.db.after_bulk_batch(row_count);
                self.record(changes);
                Ok(written)
            }
            Err(err) => {
                undo_all(changes, &mut tables);
                Err(err)
            }
        }
    }

    async fn begin(&mut self) -> SessionResult<()> {
        if self.undo.is_some() {
            return Err(SessionError::Rejected("transaction already active".into()));
        }
        self.undo = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> SessionResult<()> {
        match self.undo.take() {
            Some(log) => {
                let ddl = log.iter().filter(|change| change.is_ddl()).count();
                debug!(
                    "Session {} committed {} change(s), {} of them DDL",
                    self.id,
                    log.len(),
                    ddl
                );
                Ok(())
            }
            None => Err(SessionError::Rejected("no active transaction".into())),
        }
    }

    async fn rollback(&mut self) -> SessionResult<()> {
        let Some(log) = self.undo.take() else {
            return Err(SessionError::Rejected("no active transaction".into()));
        };
        debug!(
            "Session {} rolling back {} change(s) on {:?}",
            self.id,
            log.len(),
            touched_tables(&log)
        );
        let mut tables = self.db.tables().write().await;
        undo_all(log, &mut tables);
        Ok(())
    }

    fn is_in_transaction(&self) -> bool {
        self.undo.is_some()
    }
}

fn touched_tables(log: &[Change]) -> BTreeSet<&str> {
    log.iter().map(Change::table_name).collect()
}

fn table_mut<'a>(tables: &'a mut HashMap<String, MemTable>, name: &str) -> SessionResult<&'a mut MemTable> {
    tables
        .get_mut(name)
        .ok_or_else(|| SessionError::TableNotFound(name.to_string()))
}

fn bind(operand: &Operand, params: &[WireValue]) -> SessionResult<WireValue> {
    match operand {
        Operand::Param(idx) => params
            .get(*idx)
            .cloned()
            .ok_or_else(|| SessionError::Rejected(format!("no value bound for ${}", idx + 1))),
        Operand::Literal(value) => Ok(value.clone()),
    }
}

/// Filter with columns resolved and operands bound.
enum BoundFilter {
    Eq(usize, WireValue),
    In(usize, HashSet<WireValue>),
    And(Box<BoundFilter>, Box<BoundFilter>),
}

impl BoundFilter {
    fn bind(filter: &Filter, table: &MemTable, params: &[WireValue]) -> SessionResult<Self> {
        Ok(match filter {
            Filter::Eq { column, operand } => {
                let idx = table.column_index(column)?;
                let kind = table.columns()[idx].kind;
                Self::Eq(idx, kind.coerce(bind(operand, params)?))
            }
            Filter::In { column, operands } => {
                let idx = table.column_index(column)?;
                let kind = table.columns()[idx].kind;
                let values = operands
                    .iter()
                    .map(|op| bind(op, params).map(|v| kind.coerce(v)))
                    .collect::<SessionResult<HashSet<_>>>()?;
                Self::In(idx, values)
            }
            Filter::And(left, right) => Self::And(
                Box::new(Self::bind(left, table, params)?),
                Box::new(Self::bind(right, table, params)?),
            ),
        })
    }

    fn matches(&self, row: &[WireValue]) -> bool {
        match self {
            Self::Eq(idx, value) => !value.is_null() && row[*idx] == *value,
            Self::In(idx, values) => !row[*idx].is_null() && values.contains(&row[*idx]),
            Self::And(left, right) => left.matches(row) && right.matches(row),
        }
    }
}

fn matching_keys(table: &MemTable, filter: Option<&BoundFilter>) -> Vec<WireRow> {
    table
        .rows()
        .filter(|row| filter.is_none_or(|f| f.matches(row)))
        .map(|row| table.key_of(row))
        .collect()
}

fn bound_filter(filter: &Option<Filter>, table: &MemTable, params: &[WireValue]) -> SessionResult<Option<BoundFilter>> {
    filter
        .as_ref()
        .map(|f| BoundFilter::bind(f, table, params))
        .transpose()
}

fn run(
    plan: &MemPlan,
    params: &[WireValue],
    tables: &mut HashMap<String, MemTable>,
    changes: &mut Vec<Change>,
) -> SessionResult<ExecuteOutcome> {
    match plan {
        MemPlan::CreateTable {
            table,
            columns,
            if_not_exists,
        } => {
            if tables.contains_key(table) {
                if *if_not_exists {
                    return Ok(ExecuteOutcome::RowsAffected(0));
                }
                return Err(SessionError::TableExists(table.clone()));
            }
            tables.insert(table.clone(), MemTable::new(table.clone(), columns.clone())?);
            changes.push(Change::CreateTable {
                table: table.clone(),
            });
            Ok(ExecuteOutcome::RowsAffected(0))
        }
        MemPlan::DropTable { table, if_exists } => match tables.remove(table) {
            Some(dropped) => {
                changes.push(Change::DropTable { table: dropped });
                Ok(ExecuteOutcome::RowsAffected(0))
            }
            None if *if_exists => Ok(ExecuteOutcome::RowsAffected(0)),
            None => Err(SessionError::TableNotFound(table.clone())),
        },
        MemPlan::Insert {
            table,
            columns,
            rows,
        } => {
            let t = table_mut(tables, table)?;
            let positions: Vec<Option<usize>> = match columns {
                Some(names) => {
                    let given: Vec<usize> = names
                        .iter()
                        .map(|name| t.column_index(name))
                        .collect::<SessionResult<_>>()?;
                    (0..t.columns().len())
                        .map(|idx| given.iter().position(|&g| g == idx))
                        .collect()
                }
                None => (0..t.columns().len()).map(Some).collect(),
            };

            for operands in rows {
                if operands.len() != columns.as_ref().map_or(t.columns().len(), Vec::len) {
                    return Err(SessionError::Rejected(format!(
                        "INSERT into '{}' has {} value(s) for {} column(s)",
                        table,
                        operands.len(),
                        positions.iter().filter(|p| p.is_some()).count()
                    )));
                }
                let row = positions
                    .iter()
                    .zip(t.columns())
                    .map(|(pos, column)| match pos {
                        Some(p) => bind(&operands[*p], params).map(|v| column.kind.coerce(v)),
                        None => Ok(WireValue::Null),
                    })
                    .collect::<SessionResult<Vec<_>>>()?;
                let key = t.insert(row)?;
                changes.push(Change::InsertRow {
                    table: table.clone(),
                    key,
                });
            }
            Ok(ExecuteOutcome::RowsAffected(rows.len() as u64))
        }
        MemPlan::Select {
            table,
            projection,
            filter,
            limit,
        } => {
            let t = table_mut(tables, table)?;
            let filter = bound_filter(filter, t, params)?;
            let limit = limit.unwrap_or(usize::MAX);
            let matched = t
                .rows()
                .filter(|row| filter.as_ref().is_none_or(|f| f.matches(row)))
                .take(limit);

            let result = match projection {
                Projection::CountStar => ResultSet::new(
                    vec!["count".to_string()],
                    vec![vec![WireValue::Int64(matched.count() as i64)]],
                ),
                Projection::Constant(value) => {
                    ResultSet::new(vec!["?column?".to_string()], matched.map(|_| vec![value.clone()]).collect())
                }
                Projection::Wildcard => ResultSet::new(t.column_names(), matched.cloned().collect()),
                Projection::Columns(names) => {
                    let indexes = names
                        .iter()
                        .map(|name| t.column_index(name))
                        .collect::<SessionResult<Vec<_>>>()?;
                    let rows = matched
                        .map(|row| indexes.iter().map(|&i| row[i].clone()).collect())
                        .collect();
                    ResultSet::new(indexes.iter().map(|&i| t.columns()[i].name.clone()).collect(), rows)
                }
            };
            Ok(ExecuteOutcome::Rows(result))
        }
        MemPlan::Update {
            table,
            assignments,
            filter,
        } => {
            let t = table_mut(tables, table)?;
            let mut targets = Vec::with_capacity(assignments.len());
            for (column, operand) in assignments {
                let idx = t.column_index(column)?;
                if t.is_key_column(idx) {
                    return Err(SessionError::Rejected(format!(
                        "primary key column '{}' cannot be updated",
                        column
                    )));
                }
                targets.push((idx, t.columns()[idx].kind.coerce(bind(operand, params)?)));
            }

            let filter = bound_filter(filter, t, params)?;
            let keys = matching_keys(t, filter.as_ref());
            for key in &keys {
                let Some(old_row) = t.get(key).cloned() else {
                    continue;
                };
                let mut new_row = old_row.clone();
                for (idx, value) in &targets {
                    new_row[*idx] = value.clone();
                }
                t.validate(&new_row)?;
                t.put(key.clone(), new_row);
                changes.push(Change::UpdateRow {
                    table: table.clone(),
                    key: key.clone(),
                    old_row,
                });
            }
            Ok(ExecuteOutcome::RowsAffected(keys.len() as u64))
        }
        MemPlan::Delete { table, filter } => {
            let t = table_mut(tables, table)?;
            let filter = bound_filter(filter, t, params)?;
            let keys = matching_keys(t, filter.as_ref());
            for key in keys.iter().cloned() {
                if let Some(old_row) = t.remove(&key) {
                    changes.push(Change::DeleteRow {
                        table: table.clone(),
                        key,
                        old_row,
                    });
                }
            }
            Ok(ExecuteOutcome::RowsAffected(keys.len() as u64))
        }
        MemPlan::Begin | MemPlan::Commit | MemPlan::Rollback => Ok(ExecuteOutcome::RowsAffected(0)),
    }
}

fn ingest(
    table: &str,
    columns: &[String],
    rows: Vec<Vec<WireValue>>,
    tables: &mut HashMap<String, MemTable>,
    changes: &mut Vec<Change>,
) -> SessionResult<u64> {
    let t = table_mut(tables, table)?;
    if columns.len() != t.columns().len() {
        return Err(SessionError::Rejected(format!(
            "bulk rows for '{}' carry {} column(s), table has {}",
            table,
            columns.len(),
            t.columns().len()
        )));
    }
    let given: Vec<usize> = columns
        .iter()
        .map(|name| t.column_index(name))
        .collect::<SessionResult<_>>()?;
    let order: Vec<usize> = (0..t.columns().len())
        .map(|idx| {
            given
                .iter()
                .position(|&g| g == idx)
                .ok_or_else(|| SessionError::Rejected(format!("bulk rows for '{}' miss a column", table)))
        })
        .collect::<SessionResult<_>>()?;

    let mut written = 0u64;
    for row in rows {
        let row: WireRow = order.iter().map(|&i| row.get(i).cloned().unwrap_or(WireValue::Null)).collect();
        let (key, previous) = t.upsert(row)?;
        changes.push(Change::UpsertRow {
            table: table.to_string(),
            key,
            previous,
        });
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn session_with_table() -> MemorySession {
        let db = MemoryDatabase::new();
        let mut session = MemorySession::new(1, db);
        session
            .execute(&Statement::text(
                "CREATE TABLE \"items\" (\"id\" INTEGER NOT NULL, \"label\" TEXT, PRIMARY KEY (\"id\"))",
            ))
            .await
            .unwrap();
        session
    }

    fn insert(id: i32, label: &str) -> Statement {
        Statement::new(
            "INSERT INTO \"items\" (\"id\", \"label\") VALUES ($1, $2)",
            vec![WireValue::Int32(id), WireValue::Utf8(label.into())],
        )
    }

    async fn count(session: &mut MemorySession) -> i64 {
        session
            .execute(&Statement::text("SELECT COUNT(*) FROM \"items\""))
            .await
            .unwrap()
            .into_rows()
            .scalar()
            .and_then(WireValue::as_i64)
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_update_delete() {
        let mut s = session_with_table().await;
        s.execute(&insert(1, "a")).await.unwrap();
        s.execute(&insert(2, "b")).await.unwrap();

        let updated = s
            .execute(&Statement::new(
                "UPDATE \"items\" SET \"label\" = $1 WHERE \"id\" = $2",
                vec![WireValue::Utf8("z".into()), WireValue::Int32(2)],
            ))
            .await
            .unwrap();
        assert_eq!(updated.rows_affected(), 1);

        let rows = s
            .execute(&Statement::new(
                "SELECT \"label\" FROM \"items\" WHERE \"id\" IN ($1)",
                vec![WireValue::Int32(2)],
            ))
            .await
            .unwrap()
            .into_rows();
        assert_eq!(rows.rows, vec![vec![WireValue::Utf8("z".into())]]);

        let deleted = s
            .execute(&Statement::new(
                "DELETE FROM \"items\" WHERE \"id\" IN ($1, $2)",
                vec![WireValue::Int32(1), WireValue::Int32(2)],
            ))
            .await
            .unwrap();
        assert_eq!(deleted.rows_affected(), 2);
        assert_eq!(count(&mut s).await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_key_and_missing_table() {
        let mut s = session_with_table().await;
        s.execute(&insert(1, "a")).await.unwrap();
        let err = s.execute(&insert(1, "b")).await.unwrap_err();
        assert!(matches!(err, SessionError::ConstraintViolation(_)));

        let err = s.execute(&Statement::text("DROP TABLE \"nope\"")).await.unwrap_err();
        assert_eq!(err, SessionError::TableNotFound("nope".into()));
    }

    #[tokio::test]
    async fn test_rollback_restores_rows() {
        let mut s = session_with_table().await;
        s.execute(&insert(1, "a")).await.unwrap();

        s.begin().await.unwrap();
        s.execute(&insert(2, "b")).await.unwrap();
        s.execute(&Statement::text("DELETE FROM \"items\"")).await.unwrap();
        assert_eq!(count(&mut s).await, 0);
        s.rollback().await.unwrap();

        assert_eq!(count(&mut s).await, 1);
    }

    #[tokio::test]
    async fn test_dropped_session_rolls_back_open_transaction() {
        let mut s = session_with_table().await;
        s.execute(&insert(1, "a")).await.unwrap();
        let db = s.db.clone();

        s.begin().await.unwrap();
        s.execute(&insert(2, "b")).await.unwrap();
        s.execute(&Statement::text("DELETE FROM \"items\" WHERE \"id\" = 1")).await.unwrap();
        drop(s);

        let mut other = MemorySession::new(2, db);
        let rows = other
            .execute(&Statement::text("SELECT \"id\" FROM \"items\""))
            .await
            .unwrap()
            .into_rows();
        assert_eq!(rows.rows, vec![vec![WireValue::Int32(1)]]);
    }

    #[tokio::test]
    async fn test_bulk_ingest_upserts() {
        let mut s = session_with_table().await;
        s.execute(&insert(1, "old")).await.unwrap();

        let columns = vec!["label".to_string(), "id".to_string()];
        let rows = vec![
            vec![WireValue::Utf8("new".into()), WireValue::Int32(1)],
            vec![WireValue::Utf8("b".into()), WireValue::Int32(2)],
        ];
        assert_eq!(s.bulk_ingest("items", &columns, rows).await.unwrap(), 2);
        assert_eq!(count(&mut s).await, 2);
    }

    #[tokio::test]
    async fn test_failed_statement_leaves_no_partial_rows() {
        let mut s = session_with_table().await;
        let err = s
            .execute(&Statement::new(
                "INSERT INTO \"items\" (\"id\", \"label\") VALUES ($1, $2), ($3, $4)",
                vec![
                    WireValue::Int32(1),
                    WireValue::Utf8("a".into()),
                    WireValue::Int32(1),
                    WireValue::Utf8("b".into()),
                ],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ConstraintViolation(_)));
        assert_eq!(count(&mut s).await, 0);
    }
}
