//! Engine-level error types.

use std::path::PathBuf;

use nodes::NodeError;
use thiserror::Error;

/// Errors produced while loading descriptions and flows or building graphs.
///
/// Load errors always carry the offending file so the whole load can fail
/// with a message the user can act on.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Load errors ------

    /// A file or directory could not be read.
    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{}' is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    /// The file is not valid JSON or does not match the expected shape.
    #[error("malformed file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("file '{}' does not name a kind", path.display())]
    MissingKind { path: PathBuf },

    #[error("file '{}' has unknown kind '{kind}'", path.display())]
    UnknownKind { path: PathBuf, kind: String },

    /// A parser is already registered for this kind.
    #[error("kind '{0}' is already registered")]
    DuplicateKind(String),

    /// Two descriptions declare the same name within one role.
    #[error("file '{}' redefines {role} '{id}'", path.display())]
    DuplicateId {
        path: PathBuf,
        id: String,
        role: &'static str,
    },

    /// Two flow fragments define a flow with the same name.
    #[error("flow '{name}' defined again in '{}'", path.display())]
    DuplicateFlow { name: String, path: PathBuf },

    // ------ Build errors ------

    #[error("no flow named '{0}'")]
    FlowNotFound(String),

    /// A flow refers to a name the store has no description for in the
    /// needed role.
    #[error("no {role} named '{name}'")]
    NotFound { name: String, role: &'static str },

    /// A flow node has targets but its description cannot take any.
    #[error("'{0}' has targets but is not a Triggerer")]
    NotATriggerer(String),

    /// A wired node cannot be used as a child (root-only drivers).
    #[error("'{0}' can only run as the root of a flow")]
    NotATriggerable(String),

    /// The description was found but turning it into a live node failed.
    #[error("cannot instantiate '{id}': {source}")]
    Instantiate {
        id: String,
        #[source]
        source: NodeError,
    },

    // ------ Validation errors ------

    #[error("flow '{flow}': {source}")]
    InvalidFlow {
        flow: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn in_flow(self, flow: &str) -> Self {
        EngineError::InvalidFlow {
            flow: flow.to_string(),
            source: Box::new(self),
        }
    }
}
