use crate::core::{Person, PersonId, StoreError, StoreResult};
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Committed state of the `person` table.
///
/// Every method blocks on a `std::sync` lock; callers are expected to be
/// worker threads, never the async front end.
pub struct InMemoryStorage {
    rows: RwLock<BTreeMap<PersonId, Person>>,
    /// Identity sequence. Values handed out inside a rolled back transaction
    /// are not reused.
    sequence: AtomicI64,
    online: AtomicBool,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            sequence: AtomicI64::new(1),
            online: AtomicBool::new(true),
        }
    }

    /// Simulate the store becoming reachable or unreachable.
    ///
    /// While offline, checkouts, reads and commits fail with
    /// `StoreError::Unavailable`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_online(&self) -> StoreResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("backing store is not reachable".into()))
        }
    }

    pub(crate) fn next_id(&self) -> PersonId {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn get(&self, id: PersonId) -> StoreResult<Option<Person>> {
        self.ensure_online()?;
        let rows = self.rows.read()?;
        Ok(rows.get(&id).cloned())
    }

    pub(crate) fn contains(&self, id: PersonId) -> StoreResult<bool> {
        self.ensure_online()?;
        let rows = self.rows.read()?;
        Ok(rows.contains_key(&id))
    }

    /// All committed rows, ordered by id.
    pub(crate) fn scan(&self) -> StoreResult<Vec<Person>> {
        self.ensure_online()?;
        let rows = self.rows.read()?;
        Ok(rows.values().cloned().collect())
    }

    /// Apply a transaction's write set atomically.
    pub(crate) fn apply(&self, writes: impl IntoIterator<Item = Person>) -> StoreResult<()> {
        self.ensure_online()?;
        let writes = writes
            .into_iter()
            .map(|person| match person.id {
                Some(id) => Ok((id, person)),
                None => Err(StoreError::ConstraintViolation(
                    "person row without identity".into(),
                )),
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let mut rows = self.rows.write()?;
        rows.extend(writes);
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }
}
