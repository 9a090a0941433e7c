use crate::protocol::{CorrelationId, Reply};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PendingError {
    #[error("Correlation id {0} is already awaiting a reply")]
    DuplicateCorrelationId(CorrelationId),
}

/// Table of calls waiting for their reply, keyed by correlation id.
///
/// An entry leaves the table exactly once: when its reply resumes the caller,
/// or when the caller stops waiting. A reply that finds no entry is late and
/// is dropped.
#[derive(Default)]
pub struct PendingReplies {
    slots: Mutex<HashMap<CorrelationId, oneshot::Sender<Reply>>>,
    late_replies: AtomicU64,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    // Critical sections never panic, so a poisoned table is still consistent.
    fn slots(&self) -> MutexGuard<'_, HashMap<CorrelationId, oneshot::Sender<Reply>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a slot for `id` and get the receiving end the caller waits on.
    pub fn register(&self, id: CorrelationId) -> Result<oneshot::Receiver<Reply>, PendingError> {
        let (tx, rx) = oneshot::channel();
        match self.slots().entry(id) {
            Entry::Occupied(_) => Err(PendingError::DuplicateCorrelationId(id)),
            Entry::Vacant(slot) => {
                slot.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Resume the caller waiting on `reply.correlation_id`.
    ///
    /// Returns `false` when nobody is waiting any more; the reply is dropped.
    pub fn complete(&self, reply: Reply) -> bool {
        let slot = self.slots().remove(&reply.correlation_id);
        let delivered = match slot {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        };
        if !delivered {
            self.late_replies.fetch_add(1, Ordering::SeqCst);
        }
        delivered
    }

    /// Stop waiting for `id`. Returns `false` if the slot was already gone.
    pub fn cancel(&self, id: CorrelationId) -> bool {
        self.slots().remove(&id).is_some()
    }

    /// Give up on `id` once its caller has stopped waiting.
    ///
    /// A reply delivered in the instant before the caller gave up is still
    /// sitting in `rx`; it is drained and counted as late. Returns `true` in
    /// that case.
    pub fn abandon(&self, id: CorrelationId, rx: &mut oneshot::Receiver<Reply>) -> bool {
        self.cancel(id);
        rx.close();
        let raced = rx.try_recv().is_ok();
        if raced {
            self.late_replies.fetch_add(1, Ordering::SeqCst);
        }
        raced
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replies that arrived after their caller had stopped waiting.
    pub fn late_replies(&self) -> u64 {
        self.late_replies.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ReplyPayload;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn reply_resumes_only_its_own_caller() {
        let pending = PendingReplies::new();
        let first = CorrelationId::new();
        let second = CorrelationId::new();

        let mut first_rx = task::spawn(pending.register(first).unwrap());
        let mut second_rx = task::spawn(pending.register(second).unwrap());
        assert_pending!(first_rx.poll());
        assert_pending!(second_rx.poll());

        assert!(pending.complete(Reply::ok(second, ReplyPayload::NotFound)));

        assert_pending!(first_rx.poll());
        let reply = assert_ready!(second_rx.poll()).unwrap();
        assert_eq!(reply.correlation_id, second);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let pending = PendingReplies::new();
        let id = CorrelationId::new();

        let _rx = pending.register(id).unwrap();
        assert_eq!(
            pending.register(id).unwrap_err(),
            PendingError::DuplicateCorrelationId(id)
        );
    }

    #[test]
    fn late_reply_after_cancel_is_discarded() {
        let pending = PendingReplies::new();
        let id = CorrelationId::new();
        let _rx = pending.register(id).unwrap();

        assert!(pending.cancel(id));
        assert!(!pending.cancel(id));
        assert!(!pending.complete(Reply::ok(id, ReplyPayload::NotFound)));

        assert!(pending.is_empty());
        assert_eq!(pending.late_replies(), 1);
    }

    #[test]
    fn reply_to_a_dropped_receiver_counts_as_late() {
        let pending = PendingReplies::new();
        let id = CorrelationId::new();
        drop(pending.register(id).unwrap());

        assert!(!pending.complete(Reply::error(id, "boom", false)));
        assert_eq!(pending.late_replies(), 1);
        assert!(pending.is_empty());
    }

    #[test]
    fn reply_delivered_as_the_caller_gives_up_counts_as_late() {
        let pending = PendingReplies::new();
        let id = CorrelationId::new();
        let mut rx = pending.register(id).unwrap();

        assert!(pending.complete(Reply::ok(id, ReplyPayload::NotFound)));
        assert_eq!(pending.late_replies(), 0);

        assert!(pending.abandon(id, &mut rx));
        assert_eq!(pending.late_replies(), 1);
        assert!(pending.is_empty());
    }

    #[test]
    fn abandon_without_a_reply_closes_the_slot() {
        let pending = PendingReplies::new();
        let id = CorrelationId::new();
        let mut rx = pending.register(id).unwrap();

        assert!(!pending.abandon(id, &mut rx));
        assert!(!pending.complete(Reply::ok(id, ReplyPayload::NotFound)));
        assert_eq!(pending.late_replies(), 1);
    }
}
