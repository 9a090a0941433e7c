pub mod error;
pub mod person;

pub use error::{
    PersistenceError, PersistenceErrorKind, PersistenceResult, StoreError, StoreResult,
    ValidationError,
};
pub use person::{Person, PersonId};
