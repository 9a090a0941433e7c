use super::ValidationError;
use serde::{Deserialize, Serialize};

pub type PersonId = i64;

/// The only resource exposed by the service: a person with a name and an age.
///
/// `id` is assigned by the store on first persist and is absent before that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PersonId>,
    pub name: String,
    pub age: i32,
}

/// Lenient decoding target: every field optional, unknown fields ignored.
#[derive(Debug, Default, Deserialize)]
struct PersonPayload {
    id: Option<PersonId>,
    name: Option<String>,
    age: Option<i32>,
}

impl Person {
    pub fn new(name: impl Into<String>, age: i32) -> Self {
        Self {
            id: None,
            name: name.into(),
            age,
        }
    }

    pub fn with_id(mut self, id: PersonId) -> Self {
        self.id = Some(id);
        self
    }

    /// Decode a request body into a `Person`.
    ///
    /// Unknown fields are ignored. `name` and `age` are required; `id` is
    /// optional and, when present, turns a create into an update.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ValidationError> {
        let payload: PersonPayload = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::InvalidBody(e.to_string()))?;

        let name = payload.name.ok_or(ValidationError::MissingField("name"))?;
        let age = payload.age.ok_or(ValidationError::MissingField("age"))?;

        Ok(Self {
            id: payload.id,
            name,
            age,
        })
    }

    /// Location of this person's resource, if it has been persisted.
    pub fn location(&self) -> Option<String> {
        self.id.map(|id| format!("/api/people/{}", id))
    }
}
