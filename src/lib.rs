// ============================================================================
// peoplebus
// ============================================================================
//
// People API over a request/reply bridge: an async HTTP gateway hands
// envelopes to a pool of blocking worker threads, each of which talks to the
// backing store through a transactional resource manager.
//
// ============================================================================

pub mod config;
pub mod connection;
pub mod core;
pub mod dispatcher;
pub mod gateway;
pub mod handlers;
pub mod protocol;
pub mod resource;
pub mod storage;
pub mod web;

pub use config::AppConfig;
pub use connection::config::PoolConfig;
pub use connection::pool::{ConnectionPool, PoolGuard, PoolStats};
pub use connection::Connection;
pub use core::{
    Person, PersonId, PersistenceError, PersistenceErrorKind, PersistenceResult, StoreError,
    StoreResult, ValidationError,
};
pub use dispatcher::{
    DispatchError, Dispatcher, DispatcherConfig, DispatcherStats, HandlerError, HandlerRegistry,
};
pub use gateway::{Gateway, PeopleService};
pub use handlers::person_handlers;
pub use protocol::{CorrelationId, Envelope, Operation, Outcome, Reply, ReplyPayload, ReplyStatus};
pub use resource::ResourceManager;
pub use storage::InMemoryStorage;
pub use web::{AppState, build_router};
