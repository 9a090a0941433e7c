//! Person repository handlers run by the dispatcher workers.

use crate::core::ValidationError;
use crate::dispatcher::{DispatchError, HandlerError, HandlerRegistry};
use crate::protocol::{Envelope, Operation, ReplyPayload};
use crate::resource::ResourceManager;
use std::sync::Arc;
use tracing::debug;

/// Registry with `create`, `find` and `list` bound to `manager`.
pub fn person_handlers(manager: Arc<ResourceManager>) -> Result<HandlerRegistry, DispatchError> {
    let create = {
        let manager = Arc::clone(&manager);
        move |envelope: &Envelope| create_person(&manager, envelope)
    };
    let find = {
        let manager = Arc::clone(&manager);
        move |envelope: &Envelope| find_person(&manager, envelope)
    };
    let list = move |envelope: &Envelope| list_people(&manager, envelope);

    HandlerRegistry::new()
        .register(Operation::Create, create)?
        .register(Operation::Find, find)?
        .register(Operation::List, list)
}

pub fn create_person(
    manager: &ResourceManager,
    envelope: &Envelope,
) -> Result<ReplyPayload, HandlerError> {
    let person = envelope
        .body
        .clone()
        .ok_or(ValidationError::MissingField("body"))?;

    debug!(request_id = %envelope.correlation_id, "creating new person");
    let saved = manager.persist(person)?;
    debug!(request_id = %envelope.correlation_id, id = ?saved.id, "person saved");

    Ok(ReplyPayload::Found(saved))
}

pub fn find_person(
    manager: &ResourceManager,
    envelope: &Envelope,
) -> Result<ReplyPayload, HandlerError> {
    let id = envelope
        .entity_id
        .ok_or(ValidationError::MissingField("entity-id"))?;

    debug!(request_id = %envelope.correlation_id, id, "finding person");
    let mut found = manager.execute(|conn| Ok(conn.find(id)?.into_iter().collect()))?;

    Ok(match found.pop() {
        Some(person) => ReplyPayload::Found(person),
        None => ReplyPayload::NotFound,
    })
}

pub fn list_people(
    manager: &ResourceManager,
    envelope: &Envelope,
) -> Result<ReplyPayload, HandlerError> {
    debug!(request_id = %envelope.correlation_id, "reading all people");
    let people = manager.execute(|conn| conn.list())?;
    debug!(request_id = %envelope.correlation_id, rows = people.len(), "query complete");

    Ok(ReplyPayload::FoundMany(people))
}
