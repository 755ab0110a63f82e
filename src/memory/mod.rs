//! In-memory reference backend.
//!
//! Implements the session interface over undo-logged tables so the
//! provider can run without a database server. Statements are parsed once
//! and cached by their text. Fault injection hooks let callers simulate
//! transport failures and slow statements.

pub mod change;
pub mod plan;
pub mod session;
pub mod table;

use crate::session::{
    Connector, Session, SessionConfig, SessionError, SessionGuard, SessionManager, SessionPool, SessionResult,
};
use async_trait::async_trait;
use log::debug;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;

pub use plan::MemPlan;
pub use session::MemorySession;
pub use table::{ColumnKind, MemColumn, MemTable};

const DEFAULT_PLAN_CACHE_SIZE: usize = 256;

/// What the backend has seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Journal {
    /// Statement texts in execution order.
    pub statements: Vec<String>,
    /// Row count of every acknowledged bulk batch.
    pub bulk_batches: Vec<usize>,
    pub plan_cache_hits: u64,
    pub plan_cache_misses: u64,
}

#[derive(Debug, Default)]
struct Faults {
    /// Fail every bulk batch after this many have been acknowledged.
    bulk_fail_after: Option<usize>,
    /// Fail statements whose text contains this fragment.
    fail_containing: Option<String>,
    statement_delay: Option<Duration>,
    /// Delay every bulk batch after this many have been acknowledged.
    bulk_delay: Option<(usize, Duration)>,
}

struct DatabaseState {
    tables: RwLock<HashMap<String, MemTable>>,
    plans: Mutex<LruCache<String, Arc<MemPlan>>>,
    faults: Mutex<Faults>,
    journal: Mutex<Journal>,
    next_session_id: AtomicU64,
}

/// Shared handle on an in-memory database.
#[derive(Clone)]
pub struct MemoryDatabase {
    state: Arc<DatabaseState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::with_plan_cache_size(DEFAULT_PLAN_CACHE_SIZE)
    }

    pub fn with_plan_cache_size(size: usize) -> Self {
        let capacity = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Arc::new(DatabaseState {
                tables: RwLock::new(HashMap::new()),
                plans: Mutex::new(LruCache::new(capacity)),
                faults: Mutex::new(Faults::default()),
                journal: Mutex::new(Journal::default()),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { db: self.clone() }
    }

    /// Builds a [`SessionPool`] of sessions on this database.
    pub async fn session_pool(&self, config: SessionConfig) -> SessionResult<SessionPool<MemoryConnector>> {
        SessionPool::new(self.connector(), config).await
    }

    pub fn open(&self) -> MemorySession {
        let id = self.state.next_session_id.fetch_add(1, Ordering::SeqCst);
        MemorySession::new(id, self.clone())
    }

    pub async fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn row_count(&self, table: &str) -> Option<usize> {
        self.state.tables.read().await.get(table).map(MemTable::len)
    }

    pub fn journal(&self) -> Journal {
        lock(&self.state.journal).clone()
    }

    pub fn clear_journal(&self) {
        *lock(&self.state.journal) = Journal::default();
    }

    /// Acknowledges `batches` more bulk batches, then fails every
    /// following one with a transport error.
    pub fn fail_bulk_after(&self, batches: usize) {
        let acknowledged = lock(&self.state.journal).bulk_batches.len();
        lock(&self.state.faults).bulk_fail_after = Some(acknowledged + batches);
    }

    /// Acknowledges `batches` more bulk batches, then delays every
    /// following one by `delay` before it is applied.
    pub fn delay_bulk_after(&self, batches: usize, delay: Duration) {
        let acknowledged = lock(&self.state.journal).bulk_batches.len();
        lock(&self.state.faults).bulk_delay = Some((acknowledged + batches, delay));
    }

    /// Fails statements whose text contains `fragment` with a transport
    /// error.
    pub fn fail_statements_containing(&self, fragment: impl Into<String>) {
        lock(&self.state.faults).fail_containing = Some(fragment.into());
    }

    /// Delays every statement before it runs.
    pub fn delay_statements(&self, delay: Duration) {
        lock(&self.state.faults).statement_delay = Some(delay);
    }

    pub fn clear_faults(&self) {
        *lock(&self.state.faults) = Faults::default();
    }

    fn tables(&self) -> &RwLock<HashMap<String, MemTable>> {
        &self.state.tables
    }

    fn plan(&self, sql: &str) -> SessionResult<Arc<MemPlan>> {
        if let Some(plan) = lock(&self.state.plans).get(sql) {
            lock(&self.state.journal).plan_cache_hits += 1;
            return Ok(Arc::clone(plan));
        }

        let plan = Arc::new(MemPlan::parse(sql)?);
        lock(&self.state.plans).put(sql.to_string(), Arc::clone(&plan));
        lock(&self.state.journal).plan_cache_misses += 1;
        Ok(plan)
    }

    async fn before_statement(&self, sql: &str) -> SessionResult<()> {
        let (delay, fail) = {
            let faults = lock(&self.state.faults);
            let fail = faults
                .fail_containing
                .as_deref()
                .is_some_and(|fragment| sql.contains(fragment));
            (faults.statement_delay, fail)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(SessionError::Transport("injected statement failure".into()));
        }

        lock(&self.state.journal).statements.push(sql.to_string());
        Ok(())
    }

    async fn before_bulk_batch(&self, table: &str) -> SessionResult<()> {
        let (limit, delay) = {
            let faults = lock(&self.state.faults);
            (faults.bulk_fail_after, faults.bulk_delay)
        };
        let acknowledged = lock(&self.state.journal).bulk_batches.len();

        if let Some((after, delay)) = delay
            && acknowledged >= after
        {
            tokio::time::sleep(delay).await;
        }
        if let Some(limit) = limit
            && acknowledged >= limit
        {
            return Err(SessionError::Transport(format!(
                "injected bulk failure on '{}'",
                table
            )));
        }
        Ok(())
    }

    fn after_bulk_batch(&self, rows: usize) {
        lock(&self.state.journal).bulk_batches.push(rows);
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Every call opens a fresh, unpooled session.
#[async_trait]
impl SessionManager for MemoryDatabase {
    async fn open_session(&self) -> SessionResult<SessionGuard> {
        Ok(SessionGuard::unpooled(Box::new(self.open())))
    }
}

/// Opens [`MemorySession`]s for a [`SessionPool`].
#[derive(Clone)]
pub struct MemoryConnector {
    db: MemoryDatabase,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, config: &SessionConfig, id: u64) -> SessionResult<Box<dyn Session>> {
        debug!(
            "Connecting in-memory session {} (endpoint {}, database {}, tls {})",
            id, config.endpoint, config.database, config.tls
        );
        Ok(Box::new(MemorySession::new(id, self.db.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Statement;

    #[tokio::test]
    async fn test_plan_cache_hits_on_repeated_text() {
        let db = MemoryDatabase::new();
        let mut guard = db.open_session().await.unwrap();
        guard
            .execute(&Statement::text("CREATE TABLE \"t\" (\"id\" BIGINT NOT NULL, PRIMARY KEY (\"id\"))"))
            .await
            .unwrap();
        for _ in 0..3 {
            guard
                .execute(&Statement::text("SELECT COUNT(*) FROM \"t\""))
                .await
                .unwrap();
        }
        guard.close().await.unwrap();

        let journal = db.journal();
        assert_eq!(journal.plan_cache_misses, 2);
        assert_eq!(journal.plan_cache_hits, 2);
        assert_eq!(db.table_names().await, vec!["t".to_string()]);
    }

    #[tokio::test]
    async fn test_injected_statement_failure() {
        let db = MemoryDatabase::new();
        db.fail_statements_containing("DROP");
        let mut session = db.open();
        let err = session.execute(&Statement::text("DROP TABLE \"t\"")).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));

        db.clear_faults();
        let err = session.execute(&Statement::text("DROP TABLE \"t\"")).await.unwrap_err();
        assert!(matches!(err, SessionError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_pool_over_memory_connector() {
        let db = MemoryDatabase::new();
        let pool = db
            .session_pool(SessionConfig::default().min_sessions(1).max_sessions(2))
            .await
            .unwrap();
        let guard = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().active_sessions, 1);
        guard.close().await.unwrap();
        assert_eq!(pool.stats().idle_sessions, 1);
    }
}
