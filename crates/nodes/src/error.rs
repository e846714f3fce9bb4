//! Node-level error type.

use thiserror::Error;

/// Errors raised while instantiating or driving a node.
///
/// Execution failures of a job never show up here: they are folded into
/// [`ReturnValue::Retry`](crate::ReturnValue::Retry) so the owning retry or
/// timed driver can back off. These variants cover what is left:
/// - configuration that cannot be turned into a live node, and
/// - a root driver whose signal source went away.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A schedule expression could not be parsed.
    #[error("invalid schedule '{expression}' for node '{node}': {message}")]
    InvalidSchedule {
        node: String,
        expression: String,
        message: String,
    },

    /// The node was asked to play a role it does not support.
    #[error("node '{node}' cannot act as a {role}")]
    UnsupportedRole { node: String, role: &'static str },

    /// The socket a driver listens on could not be opened or read.
    #[error("socket '{path}' of node '{node}' failed: {source}")]
    Socket {
        node: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The peer closed the signal connection.
    #[error("socket '{path}' of node '{node}' was closed by the peer")]
    SocketClosed { node: String, path: String },

    /// The credential store could not produce a secret.
    #[error("credential lookup for {service}/{username} failed: {message}")]
    Credential {
        service: String,
        username: String,
        message: String,
    },
}
