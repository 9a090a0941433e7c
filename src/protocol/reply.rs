use super::envelope::{CorrelationId, Envelope};
use crate::core::Person;
use serde::{Deserialize, Serialize};

/// Result carried by a successful reply.
///
/// Absence is its own variant rather than an empty serialized value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum ReplyPayload {
    Found(Person),
    FoundMany(Vec<Person>),
    NotFound,
}

/// Exhaustive reply status. A missing reply is not a status; the gateway
/// reports it locally as [`Outcome::NoReply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok { result: ReplyPayload },
    Error { error: String, retryable: bool },
}

/// Response to exactly one [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Reply {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub status: ReplyStatus,
}

impl Reply {
    pub fn ok(correlation_id: CorrelationId, result: ReplyPayload) -> Self {
        Self {
            correlation_id,
            status: ReplyStatus::Ok { result },
        }
    }

    pub fn error(correlation_id: CorrelationId, error: impl Into<String>, retryable: bool) -> Self {
        Self {
            correlation_id,
            status: ReplyStatus::Error {
                error: error.into(),
                retryable,
            },
        }
    }

    /// Successful reply to `request`, keeping its correlation id.
    pub fn ok_to(request: &Envelope, result: ReplyPayload) -> Self {
        Self::ok(request.correlation_id, result)
    }

    /// Error reply to `request`, keeping its correlation id.
    pub fn error_to(request: &Envelope, error: impl Into<String>, retryable: bool) -> Self {
        Self::error(request.correlation_id, error, retryable)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, ReplyStatus::Ok { .. })
    }
}

/// What the gateway makes of a reply, or of its absence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Found(Person),
    FoundMany(Vec<Person>),
    NotFound,
    Failed { message: String, retryable: bool },
    NoReply,
}

impl From<Reply> for Outcome {
    fn from(reply: Reply) -> Self {
        match reply.status {
            ReplyStatus::Ok { result } => match result {
                ReplyPayload::Found(person) => Outcome::Found(person),
                // An empty list is reported like a missing entity.
                ReplyPayload::FoundMany(people) if people.is_empty() => Outcome::NotFound,
                ReplyPayload::FoundMany(people) => Outcome::FoundMany(people),
                ReplyPayload::NotFound => Outcome::NotFound,
            },
            ReplyStatus::Error { error, retryable } => Outcome::Failed {
                message: error,
                retryable,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_keeps_request_correlation_id() {
        let request = Envelope::list();
        let reply = Reply::ok_to(&request, ReplyPayload::FoundMany(vec![]));
        assert_eq!(reply.correlation_id, request.correlation_id);

        let reply = Reply::error_to(&request, "boom", false);
        assert_eq!(reply.correlation_id, request.correlation_id);
        assert!(!reply.is_ok());
    }

    #[test]
    fn empty_results_decode_as_not_found() {
        let id = CorrelationId::new();
        assert_eq!(
            Outcome::from(Reply::ok(id, ReplyPayload::NotFound)),
            Outcome::NotFound
        );
        assert_eq!(
            Outcome::from(Reply::ok(id, ReplyPayload::FoundMany(Vec::new()))),
            Outcome::NotFound
        );
    }

    #[test]
    fn populated_results_decode_as_found() {
        let id = CorrelationId::new();
        let ada = Person::new("Ada", 36).with_id(1);

        assert_eq!(
            Outcome::from(Reply::ok(id, ReplyPayload::Found(ada.clone()))),
            Outcome::Found(ada.clone())
        );
        assert_eq!(
            Outcome::from(Reply::ok(id, ReplyPayload::FoundMany(vec![ada.clone()]))),
            Outcome::FoundMany(vec![ada])
        );
    }

    #[test]
    fn error_status_decodes_as_failure() {
        let outcome = Outcome::from(Reply::error(CorrelationId::new(), "store offline", true));
        assert_eq!(
            outcome,
            Outcome::Failed {
                message: "store offline".to_string(),
                retryable: true
            }
        );
    }

    #[test]
    fn error_reply_wire_shape() {
        let id = CorrelationId::new();
        let value = serde_json::to_value(Reply::error(id, "store offline", true)).unwrap();
        assert_eq!(
            value,
            json!({
                "correlation-id": id.to_string(),
                "status": "error",
                "error": "store offline",
                "retryable": true
            })
        );
    }
}
