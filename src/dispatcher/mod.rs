//! Worker dispatcher
//!
//! A fixed pool of dedicated OS threads pulls envelopes from one bounded
//! queue. Each worker handles an envelope completely, including every
//! resource-manager call it makes, before taking the next one, so a unit of
//! work never crosses threads. Replies go out on an unbounded channel that
//! the gateway drains.

pub mod registry;
mod worker;

pub use registry::{Handler, HandlerError, HandlerRegistry};

use crate::protocol::{Envelope, Operation, Reply};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use worker::Worker;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Handler already registered for address '{0}'")]
    DuplicateHandler(Operation),

    #[error("Dispatcher needs at least one worker")]
    NoWorkers,

    #[error("Dispatch queue capacity must be > 0")]
    ZeroCapacity,

    #[error("Unable to spawn dispatcher worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Dispatch queue is closed")]
    QueueClosed,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Envelopes that may wait for a free worker before `dispatch` suspends
    pub queue_capacity: usize,
}

impl DispatcherConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            queue_capacity: 64,
        }
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct DispatcherCounters {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl DispatcherCounters {
    fn record(&self, reply: &Reply) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        if !reply.is_ok() {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStats {
    pub workers: usize,
    pub processed: u64,
    pub failed: u64,
}

/// Sending side of the dispatch queue.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<Envelope>,
}

impl DispatchQueue {
    /// Hand `envelope` to exactly one worker.
    ///
    /// When every worker is busy and the queue is full this suspends the
    /// calling task, never the thread.
    pub async fn dispatch(&self, envelope: Envelope) -> Result<(), DispatchError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The two ends a gateway needs: where to send requests and where replies
/// come back.
pub struct DispatchChannels {
    pub queue: DispatchQueue,
    pub replies: mpsc::UnboundedReceiver<Reply>,
}

pub struct Dispatcher {
    workers: Vec<thread::JoinHandle<()>>,
    counters: Arc<DispatcherCounters>,
}

impl Dispatcher {
    /// Spawn the worker pool.
    ///
    /// Workers exit once every [`DispatchQueue`] clone has been dropped and
    /// the queue is drained; use [`Dispatcher::join`] to wait for that.
    pub fn start(
        handlers: HandlerRegistry,
        config: DispatcherConfig,
    ) -> Result<(Self, DispatchChannels), DispatchError> {
        if config.workers == 0 {
            return Err(DispatchError::NoWorkers);
        }
        if config.queue_capacity == 0 {
            return Err(DispatchError::ZeroCapacity);
        }

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Mutex::new(rx));
        let handlers = Arc::new(handlers);
        let counters = Arc::new(DispatcherCounters::default());

        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let worker = Worker {
                index,
                queue: Arc::clone(&queue),
                handlers: Arc::clone(&handlers),
                replies: reply_tx.clone(),
                counters: Arc::clone(&counters),
            };
            let handle = thread::Builder::new()
                .name(format!("peoplebus-worker-{index}"))
                .spawn(move || worker.run())?;
            workers.push(handle);
        }

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            handlers = handlers.len(),
            "dispatcher started"
        );

        Ok((
            Self { workers, counters },
            DispatchChannels {
                queue: DispatchQueue { tx },
                replies: reply_rx,
            },
        ))
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            workers: self.workers.len(),
            processed: self.counters.processed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Block until every worker has exited.
    pub fn join(self) {
        for (index, handle) in self.workers.into_iter().enumerate() {
            if handle.join().is_err() {
                warn!(worker = index, "dispatcher worker terminated abnormally");
            }
        }
        info!("dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Person, PersistenceError};
    use crate::protocol::{ReplyPayload, ReplyStatus};
    use std::collections::HashSet;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn echo_registry() -> HandlerRegistry {
        HandlerRegistry::new()
            .register(Operation::Find, |envelope: &Envelope| -> Result<ReplyPayload, HandlerError> {
                let id = envelope.entity_id.unwrap_or_default();
                Ok(ReplyPayload::Found(Person::new("echo", 0).with_id(id)))
            })
            .unwrap()
    }

    async fn recv(replies: &mut mpsc::UnboundedReceiver<Reply>) -> Reply {
        timeout(Duration::from_secs(5), replies.recv())
            .await
            .expect("reply should arrive")
            .expect("reply channel open")
    }

    #[test]
    fn start_rejects_empty_pool() {
        let result = Dispatcher::start(echo_registry(), DispatcherConfig::new(0));
        assert!(matches!(result, Err(DispatchError::NoWorkers)));

        let result = Dispatcher::start(echo_registry(), DispatcherConfig::new(1).queue_capacity(0));
        assert!(matches!(result, Err(DispatchError::ZeroCapacity)));
    }

    #[tokio::test]
    async fn each_envelope_gets_exactly_one_reply() {
        let (dispatcher, mut channels) =
            Dispatcher::start(echo_registry(), DispatcherConfig::new(4)).unwrap();

        let mut sent = HashSet::new();
        for id in 0..50 {
            let envelope = Envelope::find(id);
            sent.insert(envelope.correlation_id);
            channels.queue.dispatch(envelope).await.unwrap();
        }

        let mut received = HashSet::new();
        for _ in 0..50 {
            let reply = recv(&mut channels.replies).await;
            assert!(reply.is_ok());
            assert!(received.insert(reply.correlation_id), "duplicate reply");
        }
        assert_eq!(sent, received);

        drop(channels.queue);
        assert_eq!(dispatcher.stats().processed, 50);
        dispatcher.join();
        assert!(channels.replies.recv().await.is_none());
    }

    #[tokio::test]
    async fn handler_error_becomes_error_reply() {
        let registry = HandlerRegistry::new()
            .register(Operation::List, |_: &Envelope| -> Result<ReplyPayload, HandlerError> {
                Err(PersistenceError::fatal("Unable to execute find operation.").into())
            })
            .unwrap();
        let (dispatcher, mut channels) =
            Dispatcher::start(registry, DispatcherConfig::new(1)).unwrap();

        let envelope = Envelope::list();
        channels.queue.dispatch(envelope.clone()).await.unwrap();

        let reply = recv(&mut channels.replies).await;
        assert_eq!(reply.correlation_id, envelope.correlation_id);
        assert_eq!(
            reply.status,
            ReplyStatus::Error {
                error: "Unable to execute find operation.".to_string(),
                retryable: false
            }
        );
        assert_eq!(dispatcher.stats().failed, 1);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_kill_the_worker() {
        let registry = HandlerRegistry::new()
            .register(Operation::Find, |envelope: &Envelope| -> Result<ReplyPayload, HandlerError> {
                if envelope.entity_id == Some(13) {
                    panic!("unlucky id");
                }
                Ok(ReplyPayload::NotFound)
            })
            .unwrap();
        let (_dispatcher, mut channels) =
            Dispatcher::start(registry, DispatcherConfig::new(1)).unwrap();

        channels.queue.dispatch(Envelope::find(13)).await.unwrap();
        let reply = recv(&mut channels.replies).await;
        assert!(!reply.is_ok());

        channels.queue.dispatch(Envelope::find(14)).await.unwrap();
        let reply = recv(&mut channels.replies).await;
        assert!(reply.is_ok(), "same worker keeps serving after a panic");
    }

    #[tokio::test]
    async fn unregistered_address_and_invalid_envelope_get_error_replies() {
        let (_dispatcher, mut channels) =
            Dispatcher::start(echo_registry(), DispatcherConfig::new(1)).unwrap();

        channels.queue.dispatch(Envelope::list()).await.unwrap();
        let reply = recv(&mut channels.replies).await;
        assert!(matches!(
            reply.status,
            ReplyStatus::Error { ref error, .. } if error.contains("repo.person.list")
        ));

        let mut invalid = Envelope::find(1);
        invalid.entity_id = None;
        channels.queue.dispatch(invalid).await.unwrap();
        let reply = recv(&mut channels.replies).await;
        assert!(matches!(
            reply.status,
            ReplyStatus::Error { ref error, .. } if error.contains("entity-id")
        ));
    }

    #[tokio::test]
    async fn full_queue_suspends_dispatch_until_a_worker_frees_up() {
        let (gate_tx, gate_rx) = std_mpsc::channel::<()>();
        let gate = Mutex::new(gate_rx);
        let registry = HandlerRegistry::new()
            .register(Operation::List, move |_: &Envelope| -> Result<ReplyPayload, HandlerError> {
                gate.lock().unwrap().recv().ok();
                Ok(ReplyPayload::FoundMany(Vec::new()))
            })
            .unwrap();

        let (_dispatcher, mut channels) =
            Dispatcher::start(registry, DispatcherConfig::new(1).queue_capacity(2)).unwrap();

        // One envelope in the worker, two in the queue.
        for _ in 0..3 {
            timeout(Duration::from_secs(5), channels.queue.dispatch(Envelope::list()))
                .await
                .expect("queue has room")
                .unwrap();
        }

        let blocked = timeout(
            Duration::from_millis(100),
            channels.queue.dispatch(Envelope::list()),
        )
        .await;
        assert!(blocked.is_err(), "fourth dispatch must wait for capacity");

        for _ in 0..3 {
            gate_tx.send(()).unwrap();
        }
        for _ in 0..3 {
            assert!(recv(&mut channels.replies).await.is_ok());
        }
    }

    #[tokio::test]
    async fn workers_exit_once_every_queue_handle_is_dropped() {
        let (dispatcher, channels) =
            Dispatcher::start(echo_registry(), DispatcherConfig::new(2)).unwrap();
        let queue = channels.queue.clone();
        drop(channels);

        // Workers keep the queue open only as long as a sender exists.
        assert!(!queue.is_closed());
        drop(queue);
        tokio::task::spawn_blocking(move || dispatcher.join())
            .await
            .unwrap();
    }
}
