use std::sync::Arc;

use axum::http::StatusCode;
use serde::Deserialize;

use queue::{FlowQueue, QueueError};

pub mod control;
pub mod flows;

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<FlowQueue>,
}

/// `?name=` query parameter used by every targeted route.
#[derive(Debug, Deserialize)]
pub struct NameParam {
    pub name: String,
}

pub(crate) fn status_of(e: &QueueError) -> StatusCode {
    match e {
        QueueError::UnknownFlow(_) | QueueError::UnknownName(_) => StatusCode::NOT_FOUND,
        QueueError::Engine(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

/// Turn a control outcome into the `Done` / error-text reply.
pub(crate) fn reply(result: Result<(), QueueError>) -> Result<&'static str, (StatusCode, String)> {
    result
        .map(|()| "Done")
        .map_err(|e| (status_of(&e), e.to_string()))
}
