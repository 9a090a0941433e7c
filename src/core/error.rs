use thiserror::Error;

/// Failures raised by the blocking backing store and its connection pool.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    #[error("Connection pool timeout: no connections available after {0:?}")]
    PoolTimeout(std::time::Duration),

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Transaction error: {0}")]
    TransactionState(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("Lock error: {0}")]
    LockPoisoned(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockPoisoned(err.to_string())
    }
}

impl StoreError {
    /// Whether retrying the same operation later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::PoolTimeout(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceErrorKind {
    /// The store could not be reached or the pool was exhausted.
    Retryable,
    /// The operation itself failed; repeating it will fail again.
    Fatal,
}

/// Single error type surfaced by the resource manager.
///
/// Acquisition failures and execution failures are folded together: both are
/// fatal to the one operation, never to the process. The low-level cause is
/// kept as `source` for logging and is not meant to cross the worker boundary.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct PersistenceError {
    message: String,
    kind: PersistenceErrorKind,
    #[source]
    source: Option<StoreError>,
}

impl PersistenceError {
    pub fn new(message: impl Into<String>, source: StoreError) -> Self {
        let kind = if source.is_transient() {
            PersistenceErrorKind::Retryable
        } else {
            PersistenceErrorKind::Fatal
        };
        Self {
            message: message.into(),
            kind,
            source: Some(source),
        }
    }

    /// An error with no store-level cause, e.g. a failed application check
    /// inside a transaction.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: PersistenceErrorKind::Fatal,
            source: None,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> PersistenceErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == PersistenceErrorKind::Retryable
    }

    pub fn cause(&self) -> Option<&StoreError> {
        self.source.as_ref()
    }
}

/// Store failures raised inside a transaction body. The store's own text
/// stays in `source`; the message carries no low-level detail.
impl From<StoreError> for PersistenceError {
    fn from(err: StoreError) -> Self {
        PersistenceError::new("An error occurred while accessing the backing store.", err)
    }
}

pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

/// Malformed or missing request fields, detected before anything is dispatched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unsupported content type '{0}', expected application/json")]
    UnsupportedContentType(String),

    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid person payload: {0}")]
    InvalidBody(String),

    #[error("Invalid entity id '{0}'")]
    InvalidId(String),
}
