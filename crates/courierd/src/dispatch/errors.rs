//! Error types for call parsing and dispatch.

use std::io;

use thiserror::Error;

use crate::bus::BusStatus;

/// Errors surfaced while parsing and dispatching a call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Call line could not be parsed as a valid envelope.
    #[error("malformed call: {message}")]
    MalformedCall {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Envelope parsed but the object or method field is unusable.
    #[error("invalid call structure: {message}")]
    InvalidStructure { message: String },

    /// No object with the requested name is registered.
    #[error("unknown object: {object}")]
    UnknownObject { object: String },

    /// The object exists but the method does not.
    #[error("unknown method '{method}' on object '{object}'")]
    UnknownMethod { object: String, method: String },

    /// Call line exceeds the maximum allowed size.
    #[error("call too large: {size} bytes exceeds {max_size} byte limit")]
    CallTooLarge { size: usize, max_size: usize },

    /// A required argument is absent.
    #[error("missing required argument '{name}'")]
    MissingArgument { name: &'static str },

    /// An argument is present with the wrong JSON type.
    #[error("argument '{name}' must be {expected}")]
    InvalidArgumentType {
        name: &'static str,
        expected: &'static str,
    },

    /// IO error on the caller connection.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Outbound frame serialisation failed.
    #[error("failed to serialise frame: {0}")]
    SerialiseFrame(#[from] serde_json::Error),
}

impl DispatchError {
    /// Maps the error onto the completion status reported to the caller.
    ///
    /// Argument faults deliberately collapse into the generic failure status
    /// rather than a dedicated invalid-argument code; only envelope-level
    /// faults get their own codes, because the bus layer rejects those before
    /// any method is involved.
    pub fn status(&self) -> BusStatus {
        match self {
            Self::MalformedCall { .. } | Self::InvalidStructure { .. } | Self::CallTooLarge { .. } => {
                BusStatus::MalformedCall
            }
            Self::UnknownObject { .. } => BusStatus::UnknownObject,
            Self::UnknownMethod { .. } => BusStatus::UnknownMethod,
            Self::MissingArgument { .. }
            | Self::InvalidArgumentType { .. }
            | Self::Io(_)
            | Self::SerialiseFrame(_) => BusStatus::UnknownError,
        }
    }

    /// Creates a malformed call error from a serde error.
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::MalformedCall {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a malformed call error with a custom message.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedCall {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Creates an unknown object error.
    pub fn unknown_object(object: impl Into<String>) -> Self {
        Self::UnknownObject {
            object: object.into(),
        }
    }

    /// Creates an unknown method error.
    pub fn unknown_method(object: impl Into<String>, method: impl Into<String>) -> Self {
        Self::UnknownMethod {
            object: object.into(),
            method: method.into(),
        }
    }

    /// Creates a call too large error.
    pub fn call_too_large(size: usize, max_size: usize) -> Self {
        Self::CallTooLarge { size, max_size }
    }
}
