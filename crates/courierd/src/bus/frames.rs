//! Wire frames exchanged over the bus socket.
//!
//! Calls arrive as one JSONL line per connection. Replies stream back as
//! JSONL frames tagged by `kind`; the `complete` frame is terminal. The CLI
//! keeps its own deserialising mirror of the outbound frames, so changes here
//! must stay in step with `courier-cli`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dispatch::DispatchError;

/// Maximum size of a single call line in bytes.
pub const MAX_CALL_BYTES: usize = 64 * 1024;

/// Parsed call envelope from a caller.
#[derive(Debug, Deserialize)]
pub struct CallEnvelope {
    /// Call identification (object and method).
    pub call: CallTarget,
    /// Structured arguments validated against the method's policy.
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Object and method named by a call.
#[derive(Debug, Deserialize)]
pub struct CallTarget {
    /// The registered object (for example `curl`).
    pub object: String,
    /// The method on that object (for example `get`).
    pub method: String,
}

impl CallEnvelope {
    /// Parses a JSONL line into a call envelope.
    ///
    /// Trailing whitespace (including the newline delimiter) is trimmed
    /// before parsing.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::MalformedCall`] if the line is empty or is
    /// not valid JSON matching the envelope schema.
    pub fn parse(line: &[u8]) -> Result<Self, DispatchError> {
        let trimmed = trim_trailing_whitespace(line);
        if trimmed.is_empty() {
            return Err(DispatchError::malformed("empty call line"));
        }

        serde_json::from_slice(trimmed).map_err(DispatchError::from_json_error)
    }

    /// Validates that the object and method fields are non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidStructure`] when either field is empty
    /// or whitespace-only.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.call.object.trim().is_empty() {
            return Err(DispatchError::invalid_structure("object field is empty"));
        }
        if self.call.method.trim().is_empty() {
            return Err(DispatchError::invalid_structure("method field is empty"));
        }
        Ok(())
    }

    /// Returns the normalised object name.
    pub fn object(&self) -> &str {
        self.call.object.trim()
    }

    /// Returns the normalised method name.
    pub fn method(&self) -> &str {
        self.call.method.trim()
    }

    /// Returns the call arguments.
    pub fn args(&self) -> &Map<String, Value> {
        &self.args
    }
}

fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |pos| pos + 1);
    &bytes[..end]
}

/// Outbound frames sent to callers.
///
/// Each frame is one JSONL line. A caller reads frames until `complete`,
/// which signals the end of the call; when `stream_fd` is set the sendmsg
/// carrying the frame also carries the stream descriptor.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusMessage {
    /// The structured reply produced by the method.
    Reply {
        /// Reply payload forwarded to the caller.
        data: Value,
    },
    /// Terminal frame carrying the completion status.
    Complete {
        /// Completion status code (0 for success).
        status: i32,
        /// Whether a stream descriptor accompanies this frame.
        stream_fd: bool,
    },
}

impl BusMessage {
    /// Creates a reply frame.
    pub fn reply(data: Value) -> Self {
        Self::Reply { data }
    }

    /// Creates a completion frame without a descriptor.
    pub fn complete(status: BusStatus) -> Self {
        Self::Complete {
            status: status.code(),
            stream_fd: false,
        }
    }

    /// Creates a completion frame that announces a descriptor handoff.
    pub fn complete_with_stream(status: BusStatus) -> Self {
        Self::Complete {
            status: status.code(),
            stream_fd: true,
        }
    }
}

/// Completion statuses understood by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusStatus {
    /// The call succeeded.
    Ok,
    /// The call line was not a valid envelope.
    MalformedCall,
    /// No object with the requested name is registered.
    UnknownObject,
    /// The object exists but has no such method.
    UnknownMethod,
    /// Generic failure: bad arguments, fetch failure, or internal fault.
    UnknownError,
}

impl BusStatus {
    /// Returns the numeric status carried in completion frames.
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::MalformedCall => 1,
            Self::UnknownObject => 2,
            Self::UnknownMethod => 3,
            Self::UnknownError => 9,
        }
    }
}
