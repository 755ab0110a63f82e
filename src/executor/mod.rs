pub mod crud;
pub mod statements;

pub use statements::{key_predicate, StatementBuilder};

use crate::core::{validate_identifier, DbError, Operation, Result, TableSchema};
use crate::query::StatementLimits;
use crate::session::{ExecuteOutcome, SessionGuard, SessionManager, Statement};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// A schema bound to the physical table it is stored in.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    schema: Arc<TableSchema>,
    name: String,
}

impl TableRef {
    /// Uses the schema's own table name.
    pub fn new(schema: Arc<TableSchema>) -> Self {
        let name = schema.table().to_string();
        Self { schema, name }
    }

    /// Stores the schema's rows under another table name.
    pub fn named(schema: Arc<TableSchema>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_identifier(&name)?;
        Ok(Self { schema, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn schema_arc(&self) -> &Arc<TableSchema> {
        &self.schema
    }
}

/// Behaviour of CREATE TABLE when the table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateMode {
    /// Fail with `SchemaConflict`.
    #[default]
    FailIfExists,
    /// Drop the existing table first, in the same transaction.
    Replace,
}

/// Runs typed operations as statements over sessions.
///
/// Each operation opens one session, builds its statements up front and
/// releases the session on every exit path. Session errors are wrapped
/// with the operation kind and table name and never retried.
#[derive(Clone)]
pub struct StatementExecutor {
    sessions: Arc<dyn SessionManager>,
    limits: StatementLimits,
    query_timeout: Option<Duration>,
}

impl StatementExecutor {
    pub fn new(sessions: Arc<dyn SessionManager>) -> Self {
        let query_timeout = sessions.query_timeout();
        Self {
            sessions,
            limits: StatementLimits::default(),
            query_timeout,
        }
    }

    pub fn with_limits(mut self, limits: StatementLimits) -> Result<Self> {
        limits.validate().map_err(DbError::Config)?;
        self.limits = limits;
        Ok(self)
    }

    /// Overrides the session manager's per-statement timeout.
    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn limits(&self) -> &StatementLimits {
        &self.limits
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }

    pub fn sessions(&self) -> &Arc<dyn SessionManager> {
        &self.sessions
    }

    pub fn builder<'a>(&self, table: &'a TableRef) -> StatementBuilder<'a> {
        StatementBuilder::new(table, self.limits)
    }

    pub(crate) async fn open(&self, table: &str) -> Result<SessionGuard> {
        self.sessions
            .open_session()
            .await
            .map_err(|err| err.into_db_error(Operation::OpenSession, table))
    }

    /// Runs `statements` on one session. With `transactional` and more than
    /// one statement they run inside a transaction that is rolled back on
    /// the first error.
    pub(crate) async fn execute_all(
        &self,
        operation: Operation,
        table: &str,
        statements: &[Statement],
        transactional: bool,
    ) -> Result<Vec<ExecuteOutcome>> {
        let mut session = self.open(table).await?;

        match self
            .execute_on(&mut session, operation, table, statements, transactional)
            .await
        {
            Ok(outcomes) => {
                session
                    .close()
                    .await
                    .map_err(|err| err.into_db_error(operation, table))?;
                Ok(outcomes)
            }
            Err(err @ (DbError::Cancelled { .. } | DbError::TransportError { .. })) => {
                session.discard();
                Err(err)
            }
            Err(err) => {
                if let Err(close_err) = session.close().await {
                    warn!("Closing session after failed {} on '{}': {}", operation, table, close_err);
                }
                Err(err)
            }
        }
    }

    async fn execute_on(
        &self,
        session: &mut SessionGuard,
        operation: Operation,
        table: &str,
        statements: &[Statement],
        transactional: bool,
    ) -> Result<Vec<ExecuteOutcome>> {
        let in_transaction = transactional && statements.len() > 1;
        if in_transaction {
            session
                .begin()
                .await
                .map_err(|err| err.into_db_error(operation, table))?;
        }

        let mut outcomes = Vec::with_capacity(statements.len());
        for statement in statements {
            match self.run(session, operation, table, statement).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    if in_transaction && let Err(rollback_err) = session.rollback().await {
                        warn!("Rollback of {} on '{}' failed: {}", operation, table, rollback_err);
                    }
                    return Err(err);
                }
            }
        }

        if in_transaction {
            session
                .commit()
                .await
                .map_err(|err| err.into_db_error(operation, table))?;
        }
        Ok(outcomes)
    }

    async fn run(
        &self,
        session: &mut SessionGuard,
        operation: Operation,
        table: &str,
        statement: &Statement,
    ) -> Result<ExecuteOutcome> {
        debug!("{} on '{}': {}", operation, table, statement);

        let result = match self.query_timeout {
            Some(limit) => match tokio::time::timeout(limit, session.execute(statement)).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(DbError::Cancelled {
                        operation,
                        table: table.to_string(),
                        rows_committed: 0,
                        reason: format!("statement exceeded the query timeout of {:?}", limit),
                    });
                }
            },
            None => session.execute(statement).await,
        };

        result.map_err(|err| err.into_db_error(operation, table))
    }
}
