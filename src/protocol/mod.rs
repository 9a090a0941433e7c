//! Request/reply message shapes exchanged between the gateway and the
//! dispatcher workers. Pure data shaping, no I/O.

pub mod envelope;
pub mod reply;

pub use envelope::{CorrelationId, Envelope, Operation};
pub use reply::{Outcome, Reply, ReplyPayload, ReplyStatus};
