// ============================================================================
// Resource Manager
// ============================================================================
//
// Owns the backing-store connection pool for the whole process. Every
// operation checks out its own unit of work, uses it for exactly one logical
// operation and releases it on every exit path.
//
// ============================================================================

use crate::connection::Connection;
use crate::connection::config::PoolConfig;
use crate::connection::pool::{ConnectionPool, PoolGuard, PoolStats};
use crate::core::{Person, PersistenceError, PersistenceResult, StoreResult};
use crate::storage::InMemoryStorage;
use std::sync::Arc;
use tracing::{debug, error};

/// Transactional access to the backing store.
///
/// Holds no per-call state: concurrent callers each get an independent
/// connection, and the pool bounds how many run at once. All methods block
/// and must only be called from worker threads.
pub struct ResourceManager {
    pool: ConnectionPool,
}

impl ResourceManager {
    /// Open the manager against `storage`.
    ///
    /// Failing here means the store is unreachable; the process should not
    /// start.
    pub fn open(config: PoolConfig, storage: Arc<InMemoryStorage>) -> PersistenceResult<Self> {
        debug!(max_connections = config.max_connections, "opening resource manager");
        let pool = ConnectionPool::new(config, storage).map_err(|e| {
            PersistenceError::new("Unable to initialize the backing store connection pool.", e)
        })?;
        debug!("resource manager initialized");
        Ok(Self { pool })
    }

    /// Open the manager against a fresh, empty store.
    pub fn open_in_memory(config: PoolConfig) -> PersistenceResult<Self> {
        Self::open(config, Arc::new(InMemoryStorage::new()))
    }

    fn acquire(&self) -> PersistenceResult<PoolGuard> {
        self.pool.get_connection().map_err(|e| {
            PersistenceError::new("Unable to retrieve a unit of work from the resource manager.", e)
        })
    }

    /// Release never masks the outcome of the operation it closes.
    fn release(&self, conn: PoolGuard) {
        let id = conn.id();
        if let Err(err) = conn.release() {
            error!(
                connection_id = id,
                error = %err,
                "unable to release unit of work; this may leak a pooled connection"
            );
        }
    }

    /// Run a read against a fresh unit of work.
    ///
    /// ```
    /// # use peoplebus::{ResourceManager, PoolConfig};
    /// let manager = ResourceManager::open_in_memory(PoolConfig::new()).unwrap();
    /// let people = manager.execute(|conn| conn.list()).unwrap();
    /// assert!(people.is_empty());
    /// ```
    pub fn execute<F>(&self, read: F) -> PersistenceResult<Vec<Person>>
    where
        F: FnOnce(&Connection) -> StoreResult<Vec<Person>>,
    {
        let conn = self.acquire()?;
        debug!(connection_id = conn.id(), "executing read with managed unit of work");

        let result =
            read(&*conn).map_err(|e| PersistenceError::new("Unable to execute find operation.", e));

        self.release(conn);
        result
    }

    /// Run `op` inside a transaction on a fresh unit of work.
    ///
    /// Commits when `op` succeeds; rolls back when `op` or the commit fails.
    /// The connection is released afterwards in every case.
    pub fn transact<F, T>(&self, op: F) -> PersistenceResult<T>
    where
        F: FnOnce(&mut Connection) -> PersistenceResult<T>,
    {
        let mut conn = self.acquire()?;
        debug!(connection_id = conn.id(), "executing write with managed unit of work");

        let result = run_in_transaction(&mut *conn, op);

        if result.is_err() && conn.is_in_transaction() {
            match conn.rollback() {
                Ok(()) => debug!(connection_id = conn.id(), "transaction rolled back"),
                Err(err) => error!(
                    connection_id = conn.id(),
                    error = %err,
                    "rollback failed"
                ),
            }
        }

        self.release(conn);
        result
    }

    /// Upsert `person` and return it with its identity populated.
    pub fn persist(&self, person: Person) -> PersistenceResult<Person> {
        self.transact(|conn| {
            conn.merge(person).map_err(|e| {
                PersistenceError::new(
                    "An error occurred while saving the object to the database; transaction rolled back.",
                    e,
                )
            })
        })
    }

    /// Release the shared pool. Safe to call more than once.
    pub fn close(&self) {
        if self.pool.close() {
            debug!("resource manager closed");
        } else {
            debug!("resource manager already closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn storage(&self) -> &Arc<InMemoryStorage> {
        self.pool.storage()
    }
}

fn run_in_transaction<F, T>(conn: &mut Connection, op: F) -> PersistenceResult<T>
where
    F: FnOnce(&mut Connection) -> PersistenceResult<T>,
{
    conn.begin()
        .map_err(|e| PersistenceError::new("Unable to begin transaction.", e))?;
    let value = op(conn)?;
    conn.commit().map_err(|e| {
        PersistenceError::new(
            "An error occurred while committing the transaction; transaction rolled back.",
            e,
        )
    })?;
    Ok(value)
}
