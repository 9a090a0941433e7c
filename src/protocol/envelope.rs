use crate::core::{Person, PersonId, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque token linking one request to its one reply.
///
/// Random v4 UUIDs: unique within any realistic in-flight window, not a
/// security token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Operation addresses understood by the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Find,
    List,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Create, Operation::Find, Operation::List];

    /// Stable address string, used in logs.
    pub fn address(self) -> &'static str {
        match self {
            Operation::Create => "repo.person.create",
            Operation::Find => "repo.person.find",
            Operation::List => "repo.person.list",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.address())
    }
}

/// Request message unit.
///
/// `entity_id` is only meaningful for `find` and `body` only for `create`;
/// [`Envelope::validate`] enforces that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Envelope {
    pub correlation_id: CorrelationId,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<PersonId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Person>,
}

impl Envelope {
    pub fn create(person: Person) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            operation: Operation::Create,
            entity_id: None,
            body: Some(person),
        }
    }

    pub fn find(id: PersonId) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            operation: Operation::Find,
            entity_id: Some(id),
            body: None,
        }
    }

    pub fn list() -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            operation: Operation::List,
            entity_id: None,
            body: None,
        }
    }

    /// Check that the operation's required field is present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.operation {
            Operation::Create if self.body.is_none() => Err(ValidationError::MissingField("body")),
            Operation::Find if self.entity_id.is_none() => {
                Err(ValidationError::MissingField("entity-id"))
            }
            _ => Ok(()),
        }
    }
}
