//! Queue-level error type.

use engine::EngineError;
use thiserror::Error;

/// Errors returned by control operations on a [`FlowQueue`](crate::FlowQueue).
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no flow named '{0}'")]
    UnknownFlow(String),

    /// Neither a flow name nor the ID of any live node.
    #[error("no flow or node named '{0}'")]
    UnknownName(String),

    /// Loading or building failed; the running flows are untouched.
    #[error(transparent)]
    Engine(#[from] EngineError),
}
