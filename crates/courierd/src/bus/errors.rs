//! Error types for bus socket binding.

use std::io;

use thiserror::Error;

/// Errors surfaced while binding the bus listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind bus socket at {path}: {source}")]
    Bind {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("existing bus socket {path} is already in use")]
    InUse { path: String },
    #[error("bus socket path {path} exists and is not a socket")]
    NotSocket { path: String },
    #[error("failed to read metadata for bus socket {path}: {source}")]
    Metadata {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to probe existing bus socket {path}: {source}")]
    Probe {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove stale bus socket {path}: {source}")]
    Cleanup {
        path: String,
        #[source]
        source: io::Error,
    },
}
