pub mod config;
pub mod pool;

use crate::core::{Person, PersonId, StoreError, StoreResult};
use crate::storage::InMemoryStorage;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Unit of work against the backing store.
///
/// A connection is checked out of the [`pool::ConnectionPool`] by exactly one
/// worker for the duration of one operation. Writes made through
/// [`Connection::merge`] stay private to the connection until
/// [`Connection::commit`] applies them to the shared storage.
pub struct Connection {
    /// Unique connection ID
    id: u64,
    storage: Arc<InMemoryStorage>,
    state: ConnectionState,
    /// Write set of the active transaction
    pending: BTreeMap<PersonId, Person>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Active,
    InTransaction,
    Closed,
}

impl Connection {
    pub(crate) fn new(id: u64, storage: Arc<InMemoryStorage>) -> Self {
        Self {
            id,
            storage,
            state: ConnectionState::Active,
            pending: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.state == ConnectionState::Closed {
            return Err(StoreError::ConnectionClosed);
        }
        Ok(())
    }

    pub fn begin(&mut self) -> StoreResult<()> {
        self.ensure_open()?;

        if self.state == ConnectionState::InTransaction {
            return Err(StoreError::TransactionState("Transaction already active".into()));
        }

        self.state = ConnectionState::InTransaction;
        Ok(())
    }

    /// Upsert by identity.
    ///
    /// A person whose id is absent or unknown to the store receives a fresh
    /// identity; a person with a known id replaces that row. The returned
    /// value always carries its id.
    pub fn merge(&mut self, mut person: Person) -> StoreResult<Person> {
        self.ensure_open()?;
        if self.state != ConnectionState::InTransaction {
            return Err(StoreError::TransactionState("No active transaction".into()));
        }

        let known = match person.id {
            Some(id) => self.pending.contains_key(&id) || self.storage.contains(id)?,
            None => false,
        };
        if !known {
            person.id = Some(self.storage.next_id());
        }

        if let Some(id) = person.id {
            self.pending.insert(id, person.clone());
        }
        Ok(person)
    }

    /// Look up one person, seeing this connection's uncommitted writes.
    pub fn find(&self, id: PersonId) -> StoreResult<Option<Person>> {
        self.ensure_open()?;
        if let Some(person) = self.pending.get(&id) {
            return Ok(Some(person.clone()));
        }
        self.storage.get(id)
    }

    /// All people ordered by id, seeing this connection's uncommitted writes.
    pub fn list(&self) -> StoreResult<Vec<Person>> {
        self.ensure_open()?;
        let mut rows: BTreeMap<PersonId, Person> = self
            .storage
            .scan()?
            .into_iter()
            .filter_map(|person| person.id.map(|id| (id, person)))
            .collect();
        rows.extend(self.pending.iter().map(|(id, p)| (*id, p.clone())));
        Ok(rows.into_values().collect())
    }

    /// Commit the current transaction.
    ///
    /// On failure the transaction stays open so the caller can roll it back.
    pub fn commit(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        if self.state != ConnectionState::InTransaction {
            return Err(StoreError::TransactionState("No active transaction".into()));
        }

        self.storage.apply(self.pending.values().cloned())?;
        self.pending.clear();
        self.state = ConnectionState::Active;
        Ok(())
    }

    /// Discard the current transaction's write set.
    pub fn rollback(&mut self) -> StoreResult<()> {
        if self.state != ConnectionState::InTransaction {
            return Err(StoreError::TransactionState("No active transaction".into()));
        }

        self.pending.clear();
        self.state = ConnectionState::Active;
        Ok(())
    }

    pub fn is_in_transaction(&self) -> bool {
        self.state == ConnectionState::InTransaction
    }

    pub fn is_active(&self) -> bool {
        self.state != ConnectionState::Closed
    }

    /// Close the connection, rolling back any open transaction first.
    pub fn close(&mut self) -> StoreResult<()> {
        if self.state == ConnectionState::InTransaction {
            self.rollback()?;
        }

        self.state = ConnectionState::Closed;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_connection() -> (Connection, Arc<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        (Connection::new(1, Arc::clone(&storage)), storage)
    }

    #[test]
    fn test_transaction_lifecycle() {
        let (mut conn, storage) = create_test_connection();

        conn.begin().unwrap();
        assert!(conn.is_in_transaction());

        let saved = conn.merge(Person::new("Ada", 36)).unwrap();
        assert_eq!(saved.id, Some(1));
        assert_eq!(storage.row_count(), 0, "writes stay private until commit");
        assert_eq!(conn.find(1).unwrap(), Some(saved.clone()));

        conn.commit().unwrap();
        assert!(!conn.is_in_transaction());
        assert_eq!(storage.get(1).unwrap(), Some(saved));
    }

    #[test]
    fn test_transaction_rollback() {
        let (mut conn, storage) = create_test_connection();

        conn.begin().unwrap();
        conn.merge(Person::new("Ada", 36)).unwrap();
        conn.rollback().unwrap();

        assert!(!conn.is_in_transaction());
        assert_eq!(storage.row_count(), 0);
        assert_eq!(conn.list().unwrap(), Vec::new());
    }

    #[test]
    fn test_merge_upserts_by_identity() {
        let (mut conn, storage) = create_test_connection();

        conn.begin().unwrap();
        let first = conn.merge(Person::new("Ada", 36)).unwrap();
        conn.commit().unwrap();

        conn.begin().unwrap();
        let updated = conn
            .merge(Person::new("Ada Lovelace", 37).with_id(first.id.unwrap()))
            .unwrap();
        conn.commit().unwrap();

        assert_eq!(updated.id, first.id);
        assert_eq!(storage.row_count(), 1);
        assert_eq!(conn.find(1).unwrap().unwrap().name, "Ada Lovelace");
    }

    #[test]
    fn test_merge_with_unknown_id_creates_new_row() {
        let (mut conn, _storage) = create_test_connection();

        conn.begin().unwrap();
        let saved = conn.merge(Person::new("Ada", 36).with_id(999)).unwrap();
        conn.commit().unwrap();

        assert_eq!(saved.id, Some(1));
        assert_eq!(conn.find(999).unwrap(), None);
    }

    #[test]
    fn test_merge_requires_transaction() {
        let (mut conn, _storage) = create_test_connection();
        let err = conn.merge(Person::new("Ada", 36)).unwrap_err();
        assert!(matches!(err, StoreError::TransactionState(_)));
    }

    #[test]
    fn test_failed_commit_keeps_transaction_open() {
        let (mut conn, storage) = create_test_connection();

        conn.begin().unwrap();
        conn.merge(Person::new("Ada", 36)).unwrap();
        storage.set_online(false);

        assert!(matches!(conn.commit(), Err(StoreError::Unavailable(_))));
        assert!(conn.is_in_transaction());
        conn.rollback().unwrap();

        storage.set_online(true);
        assert_eq!(storage.row_count(), 0);
    }

    #[test]
    fn test_connection_close() {
        let (mut conn, _storage) = create_test_connection();
        conn.begin().unwrap();

        assert!(conn.close().is_ok());
        assert!(!conn.is_active());
        assert!(matches!(conn.list(), Err(StoreError::ConnectionClosed)));
    }
}
