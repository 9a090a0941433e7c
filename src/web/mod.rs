//! HTTP surface
//!
//! Thin axum layer over a [`PeopleService`](crate::gateway::PeopleService):
//! each route turns the request into one envelope, awaits the outcome and
//! maps it to a status code. Every response carries `x-request-id`.

pub mod error;
pub mod handlers;
pub mod state;

pub use error::{AppError, AppResult, ErrorKind, ErrorResponse, REQUEST_ID_HEADER};
pub use state::AppState;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::healthcheck))
        .route(
            "/api/people",
            get(handlers::list_people).post(handlers::create_person),
        )
        .route("/api/people/:id", get(handlers::get_person))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
