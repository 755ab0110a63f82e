use super::{Connector, Session, SessionConfig, SessionError, SessionGuard, SessionManager, SessionResult};
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Session pool
///
/// Keeps up to `max_sessions` sessions open and hands them out behind a
/// [`SessionGuard`]. Idle sessions past `idle_timeout` or `max_lifetime`
/// are closed on the next checkout.
pub struct SessionPool<C: Connector> {
    config: SessionConfig,
    connector: C,
    shared: Arc<PoolShared>,
    next_id: AtomicU64,
}

/// State reachable from guards after a checkout.
struct PoolShared {
    idle: Mutex<VecDeque<PooledSession>>,
    total: AtomicUsize,
    max_lifetime: Option<Duration>,
}

struct PooledSession {
    session: Box<dyn Session>,
    created_at: Instant,
    last_used: Instant,
}

impl PooledSession {
    fn new(session: Box<dyn Session>, created_at: Instant) -> Self {
        Self {
            session,
            created_at,
            last_used: Instant::now(),
        }
    }

    fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|lifetime| self.created_at.elapsed() > lifetime)
    }

    fn is_idle_too_long(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|timeout| self.last_used.elapsed() > timeout)
    }
}

impl PoolShared {
    fn release(&self, session: Option<Box<dyn Session>>, created_at: Instant) {
        let Some(session) = session else {
            self.total.fetch_sub(1, Ordering::SeqCst);
            return;
        };

        let pooled = PooledSession::new(session, created_at);
        if !pooled.session.is_healthy() || pooled.is_expired(self.max_lifetime) {
            debug!("Closing session {} on release", pooled.session.id());
            self.total.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        match self.idle.lock() {
            Ok(mut idle) => idle.push_back(pooled),
            Err(_) => {
                warn!("Session pool lock poisoned; closing session {}", pooled.session.id());
                self.total.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

/// Releases a reserved slot unless the connect attempt succeeded.
struct Reservation<'a> {
    total: &'a AtomicUsize,
    armed: bool,
}

impl Reservation<'_> {
    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.total.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl<C: Connector> SessionPool<C> {
    /// Creates the pool and opens `min_sessions` sessions up front.
    pub async fn new(connector: C, config: SessionConfig) -> SessionResult<Self> {
        config.validate().map_err(SessionError::Config)?;

        let pool = Self {
            shared: Arc::new(PoolShared {
                idle: Mutex::new(VecDeque::new()),
                total: AtomicUsize::new(0),
                max_lifetime: config.max_lifetime,
            }),
            connector,
            config,
            next_id: AtomicU64::new(1),
        };

        pool.ensure_min_sessions().await?;
        Ok(pool)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Checks out a session, opening a new one while under `max_sessions`.
    /// Waits up to `connect_timeout` for a free slot.
    pub async fn acquire(&self) -> SessionResult<SessionGuard> {
        let start = Instant::now();

        loop {
            if let Some(pooled) = self.take_idle()? {
                return Ok(self.guard(pooled.session, pooled.created_at));
            }

            if let Some(reservation) = self.try_reserve() {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let session = self.connector.connect(&self.config, id).await?;
                reservation.keep();
                debug!("Opened session {} to {}{}", id, self.config.endpoint, self.config.database);
                return Ok(self.guard(session, Instant::now()));
            }

            if start.elapsed() > self.config.connect_timeout {
                return Err(SessionError::Timeout(self.config.connect_timeout));
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn guard(&self, session: Box<dyn Session>, created_at: Instant) -> SessionGuard {
        let shared = Arc::clone(&self.shared);
        SessionGuard::new(session, move |session| shared.release(session, created_at))
    }

    fn take_idle(&self) -> SessionResult<Option<PooledSession>> {
        let mut idle = self
            .shared
            .idle
            .lock()
            .map_err(|_| SessionError::Transport("session pool lock poisoned".to_string()))?;

        let before = idle.len();
        let max_lifetime = self.config.max_lifetime;
        let idle_timeout = self.config.idle_timeout;
        idle.retain(|pooled| !pooled.is_expired(max_lifetime) && !pooled.is_idle_too_long(idle_timeout));

        let removed = before - idle.len();
        if removed > 0 {
            debug!("Evicted {} expired session(s)", removed);
            self.shared.total.fetch_sub(removed, Ordering::SeqCst);
        }

        Ok(idle.pop_front())
    }

    fn try_reserve(&self) -> Option<Reservation<'_>> {
        let max = self.config.max_sessions;
        self.shared
            .total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
                (total < max).then_some(total + 1)
            })
            .ok()
            .map(|_| Reservation {
                total: &self.shared.total,
                armed: true,
            })
    }

    async fn ensure_min_sessions(&self) -> SessionResult<()> {
        while self.shared.total.load(Ordering::SeqCst) < self.config.min_sessions {
            let Some(reservation) = self.try_reserve() else {
                break;
            };
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let session = self.connector.connect(&self.config, id).await?;
            reservation.keep();

            let mut idle = self
                .shared
                .idle
                .lock()
                .map_err(|_| SessionError::Transport("session pool lock poisoned".to_string()))?;
            idle.push_back(PooledSession::new(session, Instant::now()));
        }
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.shared.idle.lock().map(|idle| idle.len()).unwrap_or(0);
        let total = self.shared.total.load(Ordering::SeqCst);

        PoolStats {
            total_sessions: total,
            idle_sessions: idle,
            active_sessions: total.saturating_sub(idle),
            max_sessions: self.config.max_sessions,
        }
    }
}

#[async_trait]
impl<C: Connector> SessionManager for SessionPool<C> {
    async fn open_session(&self) -> SessionResult<SessionGuard> {
        self.acquire().await
    }

    fn query_timeout(&self) -> Option<Duration> {
        self.config.query_timeout
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub total_sessions: usize,
    pub idle_sessions: usize,
    pub active_sessions: usize,
    pub max_sessions: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} active, {} idle, max {}",
            self.active_sessions, self.total_sessions, self.idle_sessions, self.max_sessions
        )
    }
}
