use std::sync::Arc;

use crate::gateway::PeopleService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn PeopleService>,
}

impl AppState {
    pub fn new(service: Arc<dyn PeopleService>) -> Self {
        Self { service }
    }
}
