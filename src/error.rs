//! Error handling for ratflow
//!
//! This module defines the crate-wide error type and a Result alias used by
//! the actor engine, the queue bridge and the pipeline supervisor.

use crate::flow::token::PayloadType;
use crate::rats::RatState;
use thiserror::Error;

/// Main error type for ratflow operations
#[derive(Error, Debug)]
pub enum FlowError {
    /// Invalid actor or pipeline configuration, raised during set-up
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ancestor lookup found no collaborator of the requested type
    #[error("Missing required collaborator: {expected}")]
    MissingCollaborator { expected: &'static str },

    /// A token was handed to an actor that does not accept its type
    #[error("Unhandled data: {actor} does not accept {found}")]
    UnhandledData { actor: String, found: PayloadType },

    /// Two connected stages have no payload type in common
    #[error("Incompatible types: {0}")]
    Incompatible(String),

    /// Failure inside an actor's unit of work
    #[error("Execution error: {0}")]
    Execution(String),

    /// Errors related to Rhai script compilation or evaluation
    #[error("Script error: {0}")]
    Script(String),

    /// A wait observed the cooperative stop flag. Not a fault.
    #[error("Stopped")]
    Stopped,

    /// The queue bridge reached its hard capacity
    #[error("Queue '{queue}' is full (capacity {capacity})")]
    QueueFull { queue: String, capacity: usize },

    /// Supervisor call on a pipeline in the wrong state
    #[error("Pipeline '{name}' is {actual}, expected {expected}")]
    InvalidState {
        name: String,
        expected: &'static str,
        actual: RatState,
    },

    #[error("Pipeline '{0}' is not pausable")]
    NotPausable(String),

    #[error("Pipeline '{0}' is not stoppable")]
    NotStoppable(String),

    #[error("Unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// A control request could not be delivered or was answered with a failure
    #[error("Remote control error: {0}")]
    Remote(String),

    /// Malformed tabular status text
    #[error("Status format error: {0}")]
    StatusFormat(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An error raised by the actor at `path` in the tree
    #[error("{path}: {source}")]
    Actor {
        path: String,
        #[source]
        source: Box<FlowError>,
    },

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FlowError>,
    },
}

impl FlowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FlowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Attribute an error to the actor at `path`. Already attributed errors
    /// keep their innermost path.
    pub fn at(self, path: impl Into<String>) -> Self {
        match self {
            err @ FlowError::Actor { .. } => err,
            err => FlowError::Actor {
                path: path.into(),
                source: Box::new(err),
            },
        }
    }

    /// True when the error only reports a cooperative stop.
    pub fn is_stop(&self) -> bool {
        match self {
            FlowError::Stopped => true,
            FlowError::Actor { source, .. } | FlowError::WithContext { source, .. } => {
                source.is_stop()
            }
            _ => false,
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        match *err {
            rhai::EvalAltResult::ErrorTerminated(..) => FlowError::Stopped,
            other => FlowError::Script(other.to_string()),
        }
    }
}

/// Result type alias for ratflow operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, Box<rhai::EvalAltResult>> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| FlowError::from_rhai_error(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| FlowError::from_rhai_error(e).with_context(f()))
    }
}
