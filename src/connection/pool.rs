use super::{Connection, config::PoolConfig};
use crate::core::{StoreError, StoreResult};
use crate::storage::InMemoryStorage;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, warn};

/// Blocking connection pool
///
/// A checkout that finds no idle connection and no room to open a new one
/// blocks the calling thread until a connection is returned, the pool is
/// closed, or `connect_timeout` elapses. Only worker threads should call
/// [`ConnectionPool::get_connection`].
pub struct ConnectionPool {
    config: PoolConfig,
    storage: Arc<InMemoryStorage>,
    shared: Arc<PoolShared>,
}

struct PoolState {
    available: VecDeque<Connection>,
    total: usize,
    closed: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    returned: Condvar,
    next_id: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl PoolShared {
    /// Release must never fail to run, so a poisoned lock is recovered.
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_out(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);
    }

    /// Return a connection to the pool.
    ///
    /// Counts as exactly one release whatever happens. An open transaction is
    /// rolled back; a connection to an unreachable store is discarded instead
    /// of pooled, and that failure is reported to the caller.
    fn check_in(&self, mut connection: Connection, storage: &InMemoryStorage) -> StoreResult<()> {
        let mut outcome = Ok(());
        if connection.is_in_transaction() {
            warn!(
                connection_id = connection.id(),
                "connection released with an open transaction; rolling back"
            );
            outcome = connection.rollback();
        }

        let healthy = storage.ensure_online();

        self.released.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);

        {
            let mut state = self.lock_state();
            if state.closed || healthy.is_err() {
                state.total = state.total.saturating_sub(1);
                drop(state);
                debug!(connection_id = connection.id(), "discarding connection");
                drop(connection);
            } else {
                state.available.push_back(connection);
            }
        }
        self.returned.notify_one();

        outcome.and(healthy)
    }
}

impl ConnectionPool {
    /// Create a new pool, opening `min_connections` up front.
    ///
    /// Fails if the configuration is invalid or the store is unreachable.
    pub fn new(config: PoolConfig, storage: Arc<InMemoryStorage>) -> StoreResult<Self> {
        config.validate().map_err(StoreError::InvalidConfig)?;

        let pool = Self {
            config,
            storage,
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    available: VecDeque::new(),
                    total: 0,
                    closed: false,
                }),
                returned: Condvar::new(),
                next_id: AtomicU64::new(1),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
                active: AtomicUsize::new(0),
                peak_active: AtomicUsize::new(0),
            }),
        };

        pool.ensure_min_connections()?;
        Ok(pool)
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        self.storage.ensure_online()?;
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(connection_id = id, "opening backing store connection");
        Ok(Connection::new(id, Arc::clone(&self.storage)))
    }

    fn ensure_min_connections(&self) -> StoreResult<()> {
        let mut state = self.shared.state.lock()?;
        while state.total < self.config.min_connections {
            let connection = self.open_connection()?;
            state.available.push_back(connection);
            state.total += 1;
        }
        Ok(())
    }

    /// Get a connection from the pool, blocking while the pool is exhausted.
    pub fn get_connection(&self) -> StoreResult<PoolGuard> {
        let deadline = Instant::now() + self.config.connect_timeout;
        let mut state = self.shared.state.lock()?;

        let connection = loop {
            if state.closed {
                return Err(StoreError::PoolClosed);
            }

            if let Some(connection) = state.available.pop_front() {
                // Validate on checkout; a dead store invalidates idle connections.
                if let Err(err) = self.storage.ensure_online() {
                    state.total = state.total.saturating_sub(1);
                    return Err(err);
                }
                break connection;
            }

            if state.total < self.config.max_connections {
                let connection = self.open_connection()?;
                state.total += 1;
                break connection;
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::PoolTimeout(self.config.connect_timeout));
            }

            let (next, _) = self.shared.returned.wait_timeout(state, deadline - now)?;
            state = next;
        };
        drop(state);

        self.shared.check_out();
        Ok(PoolGuard {
            connection: Some(connection),
            shared: Arc::clone(&self.shared),
            storage: Arc::clone(&self.storage),
        })
    }

    /// Close the pool. Returns `false` if it was already closed.
    ///
    /// Idle connections are dropped immediately; connections still checked
    /// out are dropped when they are released. Threads blocked in
    /// `get_connection` wake up with `StoreError::PoolClosed`.
    pub fn close(&self) -> bool {
        let mut state = self.shared.lock_state();
        if state.closed {
            return false;
        }
        state.closed = true;
        let idle = state.available.len();
        state.available.clear();
        state.total = state.total.saturating_sub(idle);
        drop(state);

        self.shared.returned.notify_all();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock_state().closed
    }

    pub fn storage(&self) -> &Arc<InMemoryStorage> {
        &self.storage
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock_state();
        PoolStats {
            total_connections: state.total,
            available_connections: state.available.len(),
            active_connections: self.shared.active.load(Ordering::SeqCst),
            peak_active_connections: self.shared.peak_active.load(Ordering::SeqCst),
            max_connections: self.config.max_connections,
            acquired: self.shared.acquired.load(Ordering::SeqCst),
            released: self.shared.released.load(Ordering::SeqCst),
        }
    }
}

/// Connection pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub total_connections: usize,
    pub available_connections: usize,
    pub active_connections: usize,
    pub peak_active_connections: usize,
    pub max_connections: usize,
    pub acquired: u64,
    pub released: u64,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} active, {} available, max {}, {} acquired, {} released",
            self.active_connections,
            self.total_connections,
            self.available_connections,
            self.max_connections,
            self.acquired,
            self.released
        )
    }
}

/// RAII guard for pooled connections
///
/// Returns the connection to the pool exactly once: either through
/// [`PoolGuard::release`], which reports release failures, or on drop, which
/// logs them.
pub struct PoolGuard {
    connection: Option<Connection>,
    shared: Arc<PoolShared>,
    storage: Arc<InMemoryStorage>,
}

impl PoolGuard {
    /// Explicitly return the connection to the pool.
    pub fn release(mut self) -> StoreResult<()> {
        match self.connection.take() {
            Some(connection) => self.shared.check_in(connection, &self.storage),
            None => Ok(()),
        }
    }
}

impl Deref for PoolGuard {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `release` and `drop` take the connection, and both consume the guard.
        self.connection.as_ref().expect("connection already returned to pool")
    }
}

impl DerefMut for PoolGuard {
    fn deref_mut(&mut self) -> &mut Connection {
        self.connection.as_mut().expect("connection already returned to pool")
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            let id = connection.id();
            if let Err(err) = self.shared.check_in(connection, &self.storage) {
                warn!(connection_id = id, error = %err, "connection release failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Person;
    use std::thread;
    use std::time::Duration;

    fn pool(config: PoolConfig) -> ConnectionPool {
        ConnectionPool::new(config, Arc::new(InMemoryStorage::new())).unwrap()
    }

    #[test]
    fn test_pool_creation() {
        let pool = pool(PoolConfig::new().min_connections(2).max_connections(5));
        let stats = pool.stats();

        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.available_connections, 2);
        assert_eq!(stats.active_connections, 0);
    }

    #[test]
    fn test_pool_creation_fails_when_store_unreachable() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.set_online(false);

        let result = ConnectionPool::new(PoolConfig::new(), storage);
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn test_connection_return_to_pool() {
        let pool = pool(PoolConfig::new().min_connections(1).max_connections(5));

        {
            let _conn = pool.get_connection().unwrap();
            let stats = pool.stats();
            assert_eq!(stats.active_connections, 1);
            assert_eq!(stats.available_connections, 0);
        }

        let stats = pool.stats();
        assert_eq!(stats.available_connections, 1);
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.released, 1);
    }

    #[test]
    fn test_release_rolls_back_open_transaction() {
        let pool = pool(PoolConfig::new().max_connections(1));

        let mut conn = pool.get_connection().unwrap();
        conn.begin().unwrap();
        conn.merge(Person::new("Ada", 36)).unwrap();
        conn.release().unwrap();

        let conn = pool.get_connection().unwrap();
        assert!(!conn.is_in_transaction());
        assert_eq!(pool.storage().row_count(), 0);
    }

    #[test]
    fn test_release_against_offline_store_discards_connection() {
        let pool = pool(PoolConfig::new().min_connections(1).max_connections(2));

        let conn = pool.get_connection().unwrap();
        pool.storage().set_online(false);

        assert!(matches!(conn.release(), Err(StoreError::Unavailable(_))));
        let stats = pool.stats();
        assert_eq!(stats.released, 1);
        assert_eq!(stats.total_connections, 0);
    }

    #[test]
    fn test_checkout_fails_while_store_offline() {
        let pool = pool(PoolConfig::new().min_connections(1));
        pool.storage().set_online(false);

        assert!(matches!(pool.get_connection(), Err(StoreError::Unavailable(_))));
        assert_eq!(pool.stats().acquired, 0);
    }

    #[test]
    fn test_max_connections_limit() {
        let pool = pool(
            PoolConfig::new()
                .max_connections(2)
                .connect_timeout(Duration::from_millis(50)),
        );

        let _conn1 = pool.get_connection().unwrap();
        let _conn2 = pool.get_connection().unwrap();

        let result = pool.get_connection();
        assert!(matches!(result, Err(StoreError::PoolTimeout(_))));
    }

    #[test]
    fn test_exhausted_pool_blocks_until_release() {
        let pool = Arc::new(pool(
            PoolConfig::new()
                .max_connections(1)
                .connect_timeout(Duration::from_secs(5)),
        ));

        let held = pool.get_connection().unwrap();
        let held_id = held.id();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.get_connection().map(|conn| conn.id()))
        };

        thread::sleep(Duration::from_millis(50));
        drop(held);

        assert_eq!(waiter.join().unwrap().unwrap(), held_id);
        assert_eq!(pool.stats().peak_active_connections, 1);
    }

    #[test]
    fn test_close_is_idempotent_and_wakes_waiters() {
        let pool = Arc::new(pool(
            PoolConfig::new()
                .max_connections(1)
                .connect_timeout(Duration::from_secs(5)),
        ));
        let held = pool.get_connection().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.get_connection().map(|_| ()))
        };
        thread::sleep(Duration::from_millis(50));

        assert!(pool.close());
        assert!(!pool.close());
        assert!(matches!(waiter.join().unwrap(), Err(StoreError::PoolClosed)));

        held.release().unwrap();
        assert_eq!(pool.stats().total_connections, 0);
        assert!(pool.is_closed());
    }
}
