use super::DispatcherCounters;
use super::registry::HandlerRegistry;
use crate::protocol::{Envelope, Reply};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Shared end of the dispatch queue. Idle workers take turns waiting on it,
/// so each envelope is received by exactly one worker.
pub(crate) type SharedQueue = Arc<Mutex<mpsc::Receiver<Envelope>>>;

pub(crate) struct Worker {
    pub(crate) index: usize,
    pub(crate) queue: SharedQueue,
    pub(crate) handlers: Arc<HandlerRegistry>,
    pub(crate) replies: mpsc::UnboundedSender<Reply>,
    pub(crate) counters: Arc<DispatcherCounters>,
}

impl Worker {
    /// Process envelopes one at a time until the queue is closed and drained.
    pub(crate) fn run(self) {
        debug!(worker = self.index, "dispatcher worker started");

        while let Some(envelope) = self.next_envelope() {
            let reply = self.process(&envelope);
            self.counters.record(&reply);

            if self.replies.send(reply).is_err() {
                debug!(
                    worker = self.index,
                    request_id = %envelope.correlation_id,
                    "reply channel closed; dropping reply"
                );
            }
        }

        debug!(worker = self.index, "dispatcher worker stopped");
    }

    fn next_envelope(&self) -> Option<Envelope> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.blocking_recv()
    }

    /// Turn one envelope into exactly one reply. Nothing raised by a handler
    /// escapes this function.
    fn process(&self, envelope: &Envelope) -> Reply {
        debug!(
            worker = self.index,
            request_id = %envelope.correlation_id,
            address = %envelope.operation,
            "handling envelope"
        );

        if let Err(err) = envelope.validate() {
            error!(request_id = %envelope.correlation_id, error = %err, "rejecting invalid envelope");
            return Reply::error_to(envelope, err.to_string(), false);
        }

        let Some(handler) = self.handlers.get(envelope.operation) else {
            error!(
                request_id = %envelope.correlation_id,
                address = %envelope.operation,
                "no handler registered for address"
            );
            return Reply::error_to(
                envelope,
                format!("No handler registered for address '{}'", envelope.operation),
                false,
            );
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(envelope))) {
            Ok(Ok(payload)) => Reply::ok_to(envelope, payload),
            Ok(Err(err)) => {
                error!(
                    request_id = %envelope.correlation_id,
                    address = %envelope.operation,
                    error = ?err,
                    "handler failed; returning error reply"
                );
                Reply::error_to(envelope, err.to_string(), err.is_retryable())
            }
            Err(_) => {
                error!(
                    request_id = %envelope.correlation_id,
                    address = %envelope.operation,
                    "handler panicked; returning error reply"
                );
                Reply::error_to(envelope, "An unknown error occurred.", false)
            }
        }
    }
}
