//! Error types for flow construction and the update lifecycle.

use thiserror::Error;

/// Errors raised by an execution engine behind one of the
/// [`traits`](crate::traits) seams.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A handle passed to the engine does not belong to it.
    #[error("unknown {what}: {id}")]
    UnknownHandle { what: &'static str, id: u64 },
    /// The scope has been released and can no longer be modified.
    #[error("scope {id} has been released")]
    ScopeReleased { id: u64 },
    /// A field name is already taken in the target scope.
    #[error("field `{field}` already exists in scope {scope}")]
    DuplicateField { scope: u64, field: String },
    /// The graph cannot be compiled.
    #[error("invalid flow graph: {message}")]
    InvalidGraph { message: String },
    /// An evaluation or update run failed.
    #[error("execution error: {message}")]
    Execution { message: String },
    /// An I/O failure while dumping output.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from building and running flows.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FlowError {
    /// A flow with this name is already registered.
    #[error("flow with name `{name}` already exists")]
    DuplicateFlow { name: String },
    /// No flow with this name is registered.
    #[error("flow not found: {name}")]
    FlowNotFound { name: String },
    /// The data slice was already bound to a field or realized standalone.
    #[error("data slice is already attached to a field")]
    AlreadyAttached,
    /// Internal state accessed before it was set.
    #[error("{what} is not initialized")]
    Uninitialized { what: &'static str },
    /// The requested field does not exist.
    #[error("field not found: {field}")]
    MissingField { field: String },
    /// Transient flow parameters and argument types disagree in number.
    #[error(
        "number of parameters in the flow function ({params}) does not match \
         the number of argument types ({types})"
    )]
    ArityMismatch { params: usize, types: usize },
    /// A transient flow parameter cannot be supplied by name.
    #[error("parameter `{param}` cannot be passed by name")]
    NotNameable { param: String },
    /// More than one generated field in a single `collect` call.
    #[error("only one generated field is allowed, got `{first}` and `{second}`")]
    MultipleGeneratedFields { first: String, second: String },
    /// A generated-field marker this layer does not support.
    #[error("unsupported generated field `{marker}` for `{field}`")]
    UnsupportedGeneratedField { field: String, marker: String },
    /// An earlier build of this flow failed; it is not retried.
    #[error("flow `{flow}` failed to build: {message}")]
    BuildFailed { flow: String, message: String },
    /// A spec or options record could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// An engine collaborator failed.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}
