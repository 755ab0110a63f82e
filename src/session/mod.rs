//! Boundary to the database session layer.
//!
//! The provider never talks to a transport directly. It opens a
//! [`SessionGuard`] through a [`SessionManager`], runs statements on it and
//! closes it. [`SessionPool`] is a bounded manager over any [`Connector`].

pub mod config;
pub mod pool;

use crate::core::{DbError, Operation, WireValue};
use crate::result::ResultSet;
use async_trait::async_trait;
use log::warn;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use config::SessionConfig;
pub use pool::{PoolStats, SessionPool};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("table '{0}' does not exist")]
    TableNotFound(String),

    #[error("table '{0}' already exists")]
    TableExists(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("statement rejected: {0}")]
    Rejected(String),

    #[error("session is closed")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SessionError {
    /// Attaches the operation kind and table name.
    pub fn into_db_error(self, operation: Operation, table: &str) -> DbError {
        let table = table.to_string();
        match self {
            Self::Transport(message) => DbError::TransportError {
                operation,
                table,
                message,
            },
            Self::Closed | Self::Timeout(_) => DbError::TransportError {
                operation,
                table,
                message: self.to_string(),
            },
            Self::TableNotFound(name) => DbError::NotFound(name),
            Self::TableExists(name) => {
                DbError::SchemaConflict(format!("table '{}' already exists", name))
            }
            Self::ConstraintViolation(message) => DbError::ConstraintViolation {
                operation,
                table,
                message,
            },
            Self::Rejected(message) => DbError::StatementRejected {
                operation,
                table,
                message,
            },
            Self::Config(message) => DbError::Config(message),
        }
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Statement text plus positional parameters (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<WireValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<WireValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn text(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} param(s)]", self.sql, self.params.len())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    RowsAffected(u64),
    Rows(ResultSet),
}

impl ExecuteOutcome {
    pub fn rows_affected(&self) -> u64 {
        match self {
            Self::RowsAffected(n) => *n,
            Self::Rows(rs) => rs.row_count() as u64,
        }
    }

    pub fn into_rows(self) -> ResultSet {
        match self {
            Self::Rows(rs) => rs,
            Self::RowsAffected(_) => ResultSet::empty(),
        }
    }
}

/// One database session.
#[async_trait]
pub trait Session: Send {
    fn id(&self) -> u64;

    async fn execute(&mut self, statement: &Statement) -> SessionResult<ExecuteOutcome>;

    /// Submits a batch of rows through the native bulk path. The batch is
    /// applied as one unit; rows with an existing key replace it.
    async fn bulk_ingest(
        &mut self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<WireValue>>,
    ) -> SessionResult<u64>;

    async fn begin(&mut self) -> SessionResult<()>;

    async fn commit(&mut self) -> SessionResult<()>;

    async fn rollback(&mut self) -> SessionResult<()>;

    fn is_in_transaction(&self) -> bool;

    /// `false` once the session can no longer be reused.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Hands out sessions.
#[async_trait]
pub trait SessionManager: Send + Sync {
    async fn open_session(&self) -> SessionResult<SessionGuard>;

    /// Default per-statement timeout for sessions of this manager.
    fn query_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Opens raw sessions for a [`SessionPool`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, config: &SessionConfig, id: u64) -> SessionResult<Box<dyn Session>>;
}

type Release = Box<dyn FnOnce(Option<Box<dyn Session>>) + Send>;

/// RAII handle on an open session.
///
/// `close().await` rolls back an open transaction and releases the session.
/// Dropping the guard releases it as well, except when a transaction is
/// still open: rollback needs an await, so such a session is discarded.
pub struct SessionGuard {
    id: u64,
    session: Option<Box<dyn Session>>,
    release: Option<Release>,
}

impl SessionGuard {
    /// `release` receives the session back, or `None` when it was discarded.
    pub fn new<F>(session: Box<dyn Session>, release: F) -> Self
    where
        F: FnOnce(Option<Box<dyn Session>>) + Send + 'static,
    {
        Self {
            id: session.id(),
            session: Some(session),
            release: Some(Box::new(release)),
        }
    }

    /// A guard that simply drops its session on release.
    pub fn unpooled(session: Box<dyn Session>) -> Self {
        Self::new(session, drop)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn session(&mut self) -> SessionResult<&mut Box<dyn Session>> {
        self.session.as_mut().ok_or(SessionError::Closed)
    }

    pub async fn execute(&mut self, statement: &Statement) -> SessionResult<ExecuteOutcome> {
        self.session()?.execute(statement).await
    }

    pub async fn bulk_ingest(
        &mut self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<WireValue>>,
    ) -> SessionResult<u64> {
        self.session()?.bulk_ingest(table, columns, rows).await
    }

    pub async fn begin(&mut self) -> SessionResult<()> {
        self.session()?.begin().await
    }

    pub async fn commit(&mut self) -> SessionResult<()> {
        self.session()?.commit().await
    }

    pub async fn rollback(&mut self) -> SessionResult<()> {
        self.session()?.rollback().await
    }

    pub fn is_in_transaction(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.is_in_transaction())
    }

    /// Rolls back an open transaction and releases the session.
    pub async fn close(mut self) -> SessionResult<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        if session.is_in_transaction()
            && let Err(err) = session.rollback().await
        {
            drop(session);
            self.finish(None);
            return Err(err);
        }

        self.finish(Some(session));
        Ok(())
    }

    /// Drops the session without returning it for reuse.
    pub fn discard(mut self) {
        self.session = None;
        self.finish(None);
    }

    fn finish(&mut self, session: Option<Box<dyn Session>>) {
        if let Some(release) = self.release.take() {
            release(session);
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let session = self.session.take();
        match session {
            Some(session) if session.is_in_transaction() => {
                warn!(
                    "Session {} dropped with an open transaction; discarding it. Use close().await to roll back.",
                    self.id
                );
                drop(session);
                self.finish(None);
            }
            Some(session) => self.finish(Some(session)),
            None => self.finish(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct StubSession {
        id: u64,
        in_tx: bool,
        rollbacks: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl Session for StubSession {
        fn id(&self) -> u64 {
            self.id
        }

        async fn execute(&mut self, _statement: &Statement) -> SessionResult<ExecuteOutcome> {
            Ok(ExecuteOutcome::RowsAffected(1))
        }

        async fn bulk_ingest(
            &mut self,
            _table: &str,
            _columns: &[String],
            rows: Vec<Vec<WireValue>>,
        ) -> SessionResult<u64> {
            Ok(rows.len() as u64)
        }

        async fn begin(&mut self) -> SessionResult<()> {
            self.in_tx = true;
            Ok(())
        }

        async fn commit(&mut self) -> SessionResult<()> {
            self.in_tx = false;
            Ok(())
        }

        async fn rollback(&mut self) -> SessionResult<()> {
            *self.rollbacks.lock().unwrap() += 1;
            self.in_tx = false;
            Ok(())
        }

        fn is_in_transaction(&self) -> bool {
            self.in_tx
        }
    }

    fn guard(released: Arc<Mutex<Vec<bool>>>, rollbacks: Arc<Mutex<u32>>) -> SessionGuard {
        let session = StubSession {
            id: 9,
            in_tx: false,
            rollbacks,
        };
        SessionGuard::new(Box::new(session), move |session| {
            released.lock().unwrap().push(session.is_some());
        })
    }

    #[tokio::test]
    async fn test_close_rolls_back_and_releases() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let rollbacks = Arc::new(Mutex::new(0));
        let mut g = guard(released.clone(), rollbacks.clone());

        g.begin().await.unwrap();
        assert!(g.is_in_transaction());
        g.close().await.unwrap();

        assert_eq!(*rollbacks.lock().unwrap(), 1);
        assert_eq!(*released.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn test_drop_inside_transaction_discards() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let rollbacks = Arc::new(Mutex::new(0));
        {
            let mut g = guard(released.clone(), rollbacks.clone());
            g.begin().await.unwrap();
        }
        assert_eq!(*released.lock().unwrap(), vec![false]);

        {
            let mut g = guard(released.clone(), rollbacks.clone());
            g.execute(&Statement::text("SELECT 1")).await.unwrap();
        }
        assert_eq!(*released.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn test_error_mapping() {
        let err = SessionError::Transport("reset".into()).into_db_error(Operation::Delete, "orders");
        assert!(matches!(err, DbError::TransportError { operation: Operation::Delete, .. }));

        let err = SessionError::TableNotFound("orders".into()).into_db_error(Operation::DropTable, "orders");
        assert!(matches!(err, DbError::NotFound(ref t) if t == "orders"));

        let err = SessionError::TableExists("orders".into()).into_db_error(Operation::CreateTable, "orders");
        assert!(matches!(err, DbError::SchemaConflict(_)));
    }
}
