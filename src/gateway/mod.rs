//! Request gateway
//!
//! Turns calls into envelopes, parks each caller on a pending-reply slot and
//! resumes it when the matching reply comes back from the dispatcher. Many
//! calls can wait at once; each one suspends only its own task.

pub mod pending;

pub use pending::{PendingError, PendingReplies};

use crate::core::{Person, PersonId};
use crate::dispatcher::{DispatchChannels, DispatchQueue};
use crate::protocol::{CorrelationId, Envelope, Outcome, Reply};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Anything that can carry an envelope to the workers and report the outcome.
///
/// The HTTP layer depends on this rather than on [`Gateway`] directly.
#[async_trait]
pub trait PeopleService: Send + Sync {
    async fn call(&self, envelope: Envelope) -> Outcome;
}

#[derive(Clone)]
pub struct Gateway {
    queue: DispatchQueue,
    pending: Arc<PendingReplies>,
    reply_timeout: Duration,
}

/// Removes the caller's slot however `call` exits, including when the
/// calling future is dropped mid-wait.
struct SlotGuard<'a> {
    pending: &'a PendingReplies,
    id: CorrelationId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.id);
    }
}

impl Gateway {
    /// Connect to a started dispatcher.
    ///
    /// Spawns the reply router on the current tokio runtime, so this must be
    /// called from within one.
    pub fn new(channels: DispatchChannels, reply_timeout: Duration) -> Self {
        let pending = Arc::new(PendingReplies::new());
        tokio::spawn(route_replies(channels.replies, Arc::clone(&pending)));

        Self {
            queue: channels.queue,
            pending,
            reply_timeout,
        }
    }

    pub fn pending(&self) -> &PendingReplies {
        &self.pending
    }

    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Send `envelope` and wait for its reply, at most `reply_timeout`.
    ///
    /// An envelope missing its operation's required field is answered
    /// locally and never dispatched. The timeout covers both waiting for
    /// queue capacity and waiting for the reply. It only stops the wait: a
    /// worker already handling the envelope runs to completion and its reply
    /// is discarded.
    pub async fn request(&self, envelope: Envelope) -> Outcome {
        let id = envelope.correlation_id;

        if let Err(err) = envelope.validate() {
            warn!(request_id = %id, error = %err, "rejecting invalid envelope before dispatch");
            return Outcome::Failed {
                message: err.to_string(),
                retryable: false,
            };
        }

        let mut rx = match self.pending.register(id) {
            Ok(rx) => rx,
            Err(err) => {
                warn!(request_id = %id, error = %err, "refusing call");
                return Outcome::Failed {
                    message: err.to_string(),
                    retryable: false,
                };
            }
        };
        let _slot = SlotGuard {
            pending: &self.pending,
            id,
        };

        debug!(request_id = %id, address = %envelope.operation, "dispatching envelope");
        let waited = tokio::time::timeout(self.reply_timeout, async {
            self.queue.dispatch(envelope).await.map_err(|err| err.to_string())?;
            let reply = (&mut rx)
                .await
                .map_err(|_| "Reply slot closed before a reply arrived".to_string())?;
            Ok::<_, String>(reply)
        })
        .await;

        match waited {
            Ok(Ok(reply)) => Outcome::from(reply),
            Ok(Err(message)) => {
                warn!(request_id = %id, error = %message, "call failed before a reply arrived");
                Outcome::Failed {
                    message,
                    retryable: true,
                }
            }
            Err(_) => {
                if self.pending.abandon(id, &mut rx) {
                    debug!(request_id = %id, "reply arrived at the deadline; discarded");
                }
                warn!(
                    request_id = %id,
                    timeout_ms = self.reply_timeout.as_millis() as u64,
                    "no reply before timeout"
                );
                Outcome::NoReply
            }
        }
    }

    pub async fn create(&self, person: Person) -> (CorrelationId, Outcome) {
        self.send(Envelope::create(person)).await
    }

    pub async fn find(&self, id: PersonId) -> (CorrelationId, Outcome) {
        self.send(Envelope::find(id)).await
    }

    pub async fn list(&self) -> (CorrelationId, Outcome) {
        self.send(Envelope::list()).await
    }

    async fn send(&self, envelope: Envelope) -> (CorrelationId, Outcome) {
        let id = envelope.correlation_id;
        (id, self.request(envelope).await)
    }
}

#[async_trait]
impl PeopleService for Gateway {
    async fn call(&self, envelope: Envelope) -> Outcome {
        self.request(envelope).await
    }
}

async fn route_replies(mut replies: mpsc::UnboundedReceiver<Reply>, pending: Arc<PendingReplies>) {
    while let Some(reply) = replies.recv().await {
        let id = reply.correlation_id;
        if !pending.complete(reply) {
            debug!(request_id = %id, "discarding late reply");
        }
    }
    debug!("reply channel closed; router stopped");
}
