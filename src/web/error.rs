use crate::core::ValidationError;
use crate::protocol::CorrelationId;
use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation(ValidationError),
    Failed { message: String, retryable: bool },
    NoReply,
}

/// Failed call, tagged with the correlation id echoed to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppError {
    pub request_id: CorrelationId,
    pub kind: ErrorKind,
}

impl AppError {
    pub fn new(request_id: CorrelationId, kind: ErrorKind) -> Self {
        Self { request_id, kind }
    }

    /// A request rejected before dispatch gets a fresh correlation id.
    pub fn validation(err: ValidationError) -> Self {
        Self::new(CorrelationId::new(), ErrorKind::Validation(err))
    }

    pub fn status(&self) -> StatusCode {
        match &self.kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation(ValidationError::UnsupportedContentType(_)) => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::Validation(_) | ErrorKind::Failed { .. } | ErrorKind::NoReply => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Attach the correlation id header to any response.
pub fn with_request_id(request_id: CorrelationId, response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self.kind {
            ErrorKind::NotFound => None,
            ErrorKind::Validation(ValidationError::UnsupportedContentType(_)) => None,
            ErrorKind::Validation(err) => Some(ErrorResponse {
                error: err.to_string(),
                code: "validation_error".to_string(),
                retryable: None,
            }),
            ErrorKind::Failed { message, retryable } => Some(ErrorResponse {
                error: message,
                code: "persistence_error".to_string(),
                retryable: Some(retryable),
            }),
            ErrorKind::NoReply => Some(ErrorResponse {
                error: "No reply received before the request timed out".to_string(),
                code: "no_reply".to_string(),
                retryable: Some(true),
            }),
        };

        match body {
            Some(body) => with_request_id(self.request_id, (status, Json(body))),
            None => with_request_id(self.request_id, status),
        }
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
