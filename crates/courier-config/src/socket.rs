//! Bus socket endpoint type shared by the daemon and the CLI.
//!
//! The bus is always a Unix-domain stream socket. TCP is deliberately not
//! supported: completing a call hands the caller a file descriptor via
//! `SCM_RIGHTS` ancillary data, which only exists on Unix-domain sockets.

use std::fmt;
use std::fs::DirBuilder;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Filesystem location of the bus socket.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct BusSocket {
    path: Utf8PathBuf,
}

impl BusSocket {
    /// Builds a bus socket endpoint from a filesystem path.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the socket path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        self.path.as_ref()
    }

    /// Returns the socket path as a standard-library path.
    #[must_use]
    pub fn as_std_path(&self) -> &std::path::Path {
        self.path.as_std_path()
    }

    /// Ensures the socket's parent directory exists with restrictive permissions.
    ///
    /// # Errors
    ///
    /// Returns [`SocketPreparationError`] when the path has no parent or the
    /// directory cannot be created.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        let Some(parent) = self.path.parent().filter(|p| !p.as_str().is_empty()) else {
            return Err(SocketPreparationError::MissingParent {
                path: self.path.clone(),
            });
        };

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }

        if let Err(source) = builder.create(parent.as_std_path())
            && source.kind() != std::io::ErrorKind::AlreadyExists
        {
            return Err(SocketPreparationError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            });
        }

        Ok(())
    }
}

impl fmt::Display for BusSocket {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "unix://{}", self.path)
    }
}

impl FromStr for BusSocket {
    type Err = SocketParseError;

    /// Accepts either a bare filesystem path or a `unix://` URL.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.is_empty() {
            return Err(SocketParseError::EmptyPath);
        }
        if !input.contains("://") {
            return Ok(Self::new(input));
        }

        let url = Url::parse(input)?;
        match url.scheme() {
            "unix" => {
                let path = url.path();
                if path.is_empty() {
                    return Err(SocketParseError::MissingUnixPath(input.to_owned()));
                }
                Ok(Self::new(path))
            }
            other => Err(SocketParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

/// Errors encountered while parsing a [`BusSocket`] from text.
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// The endpoint string was empty.
    #[error("socket path is empty")]
    EmptyPath,
    /// Scheme other than `unix` was supplied.
    #[error("unsupported socket scheme '{0}' (descriptor handoff requires unix sockets)")]
    UnsupportedScheme(String),
    /// `unix://` URL carried no path component.
    #[error("missing unix socket path in '{0}'")]
    MissingUnixPath(String),
    /// The endpoint string was not a valid URL.
    #[error("invalid socket endpoint: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Errors raised while preparing the socket directory on disk.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// The socket path has no parent directory.
    #[error("socket path '{path}' has no parent directory")]
    MissingParent { path: Utf8PathBuf },
    /// Creating the parent directory failed.
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}
