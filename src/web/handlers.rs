use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use serde_json::json;
use tracing::{debug, warn};

use super::error::{AppError, AppResult, ErrorKind, with_request_id};
use super::state::AppState;
use crate::core::{Person, PersonId, ValidationError};
use crate::protocol::{CorrelationId, Envelope, Outcome};

pub async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_people(State(state): State<AppState>) -> AppResult<Response> {
    let envelope = Envelope::list();
    let id = envelope.correlation_id;

    let outcome = state.service.call(envelope).await;
    respond(id, outcome, StatusCode::OK)
}

pub async fn get_person(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> AppResult<Response> {
    let person_id = parse_id(&raw_id)?;
    let envelope = Envelope::find(person_id);
    let id = envelope.correlation_id;

    let outcome = state.service.call(envelope).await;
    respond(id, outcome, StatusCode::OK)
}

pub async fn create_person(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    ensure_json(&headers)?;
    let person = Person::from_json(&body).map_err(|err| {
        debug!(error = %err, "rejecting create payload");
        AppError::validation(err)
    })?;

    let envelope = Envelope::create(person);
    let id = envelope.correlation_id;

    match state.service.call(envelope).await {
        Outcome::Found(saved) => {
            let Some(location) = saved.location() else {
                warn!(request_id = %id, "created entity has no identity");
                return Err(AppError::new(
                    id,
                    ErrorKind::Failed {
                        message: "Created entity has no identity".to_string(),
                        retryable: false,
                    },
                ));
            };
            Ok(with_request_id(
                id,
                (
                    StatusCode::CREATED,
                    [(header::LOCATION, location)],
                    Json(saved),
                ),
            ))
        }
        other => respond(id, other, StatusCode::CREATED),
    }
}

fn respond(id: CorrelationId, outcome: Outcome, success: StatusCode) -> AppResult<Response> {
    match outcome {
        Outcome::Found(person) => Ok(with_request_id(id, (success, Json(person)))),
        Outcome::FoundMany(people) => Ok(with_request_id(id, (success, Json(people)))),
        Outcome::NotFound => Err(AppError::new(id, ErrorKind::NotFound)),
        Outcome::Failed { message, retryable } => {
            Err(AppError::new(id, ErrorKind::Failed { message, retryable }))
        }
        Outcome::NoReply => Err(AppError::new(id, ErrorKind::NoReply)),
    }
}

fn parse_id(raw: &str) -> AppResult<PersonId> {
    raw.parse::<PersonId>()
        .map_err(|_| AppError::validation(ValidationError::InvalidId(raw.to_string())))
}

/// Only the media type counts; parameters such as `charset` are ignored.
fn ensure_json(headers: &HeaderMap) -> AppResult<()> {
    let raw = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let media_type = raw.split(';').next().unwrap_or_default().trim();

    if media_type.eq_ignore_ascii_case("application/json") {
        Ok(())
    } else {
        Err(AppError::validation(ValidationError::UnsupportedContentType(
            raw.to_string(),
        )))
    }
}
