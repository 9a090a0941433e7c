use super::DispatchError;
use crate::core::{PersistenceError, ValidationError};
use crate::protocol::{Envelope, Operation, ReplyPayload};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by a handler. The worker turns it into an `error` reply.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl HandlerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            HandlerError::Persistence(err) => err.is_retryable(),
            HandlerError::Validation(_) => false,
        }
    }
}

/// Blocking handler bound to one operation address.
///
/// Runs on a dispatcher worker thread and may block for as long as it needs.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, envelope: &Envelope) -> Result<ReplyPayload, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Envelope) -> Result<ReplyPayload, HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, envelope: &Envelope) -> Result<ReplyPayload, HandlerError> {
        self(envelope)
    }
}

/// Operation → handler table, filled before the dispatcher starts.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<Operation, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `operation` to `handler`. Binding an address twice is a
    /// configuration error.
    pub fn register<H: Handler>(
        mut self,
        operation: Operation,
        handler: H,
    ) -> Result<Self, DispatchError> {
        if self.handlers.contains_key(&operation) {
            return Err(DispatchError::DuplicateHandler(operation));
        }
        self.handlers.insert(operation, Arc::new(handler));
        Ok(self)
    }

    pub fn get(&self, operation: Operation) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(&operation)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
