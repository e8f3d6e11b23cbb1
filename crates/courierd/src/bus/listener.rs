//! Bus socket binding and stale-socket recovery.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;

use camino::Utf8PathBuf;
use mio::net::{UnixListener, UnixStream};
use tracing::warn;

use courier_config::BusSocket;

use super::BUS_TARGET;
use super::errors::ListenerError;

/// Non-blocking listener bound to the bus socket path.
///
/// Binding refuses to displace a live socket: an existing socket file is
/// probed with a connect attempt and only removed when nothing accepts on it.
/// The socket file is removed again when the listener is dropped.
#[derive(Debug)]
pub struct BusListener {
    listener: UnixListener,
    path: Utf8PathBuf,
}

impl BusListener {
    /// Binds the bus socket, clearing a stale socket file if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the path is occupied by a live socket,
    /// a non-socket file, or binding fails.
    pub fn bind(socket: &BusSocket) -> Result<Self, ListenerError> {
        let path = socket.path().to_path_buf();
        clear_stale_socket(path.as_std_path())?;

        let listener =
            UnixListener::bind(path.as_std_path()).map_err(|source| ListenerError::Bind {
                path: path.to_string(),
                source,
            })?;

        Ok(Self { listener, path })
    }

    /// Accepts one pending connection, if any.
    ///
    /// # Errors
    ///
    /// Propagates accept errors; `WouldBlock` means the backlog is drained.
    pub fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _addr) = self.listener.accept()?;
        Ok(stream)
    }

    /// Returns the poll registration source for this listener.
    pub fn source_mut(&mut self) -> &mut UnixListener {
        &mut self.listener
    }

    /// Returns the bound socket path.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }
}

impl Drop for BusListener {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(self.path.as_std_path())
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(
                target: BUS_TARGET,
                error = %error,
                path = %self.path,
                "failed to remove bus socket file"
            );
        }
    }
}

fn clear_stale_socket(path: &Path) -> Result<(), ListenerError> {
    if !path.exists() {
        return Ok(());
    }

    let display = path.display().to_string();
    let metadata = fs::symlink_metadata(path).map_err(|source| ListenerError::Metadata {
        path: display.clone(),
        source,
    })?;
    if !metadata.file_type().is_socket() {
        return Err(ListenerError::NotSocket { path: display });
    }

    match StdUnixStream::connect(path) {
        Ok(_stream) => Err(ListenerError::InUse { path: display }),
        Err(error)
            if error.kind() == io::ErrorKind::ConnectionRefused
                || error.kind() == io::ErrorKind::NotFound =>
        {
            fs::remove_file(path).map_err(|source| ListenerError::Cleanup {
                path: display,
                source,
            })
        }
        Err(error) => Err(ListenerError::Probe {
            path: display,
            source: error,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::os::unix::net::UnixListener as StdUnixListener;

    fn socket_in(dir: &tempfile::TempDir, name: &str) -> BusSocket {
        let path = dir.path().join(name);
        BusSocket::new(Utf8PathBuf::from_path_buf(path).expect("utf8 temp path"))
    }

    #[test]
    fn binds_and_accepts_a_connection() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = socket_in(&dir, "bus.sock");
        let listener = BusListener::bind(&socket).expect("bind");

        let _client = StdUnixStream::connect(socket.as_std_path()).expect("connect");
        // Non-blocking accept may need a beat for the connection to land.
        let mut accepted = false;
        for _ in 0..50 {
            match listener.accept() {
                Ok(_stream) => {
                    accepted = true;
                    break;
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
                Err(error) => panic!("accept failed: {error}"),
            }
        }
        assert!(accepted, "expected a pending connection");
    }

    #[test]
    fn clears_stale_socket_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = socket_in(&dir, "bus.sock");
        {
            let _stale = StdUnixListener::bind(socket.as_std_path()).expect("bind stale");
        }
        assert!(socket.as_std_path().exists(), "stale socket should remain");

        let listener = BusListener::bind(&socket).expect("bind over stale socket");
        drop(listener);
        assert!(
            !socket.as_std_path().exists(),
            "socket file should be removed on drop"
        );
    }

    #[test]
    fn refuses_socket_in_use() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = socket_in(&dir, "bus.sock");
        let _existing = StdUnixListener::bind(socket.as_std_path()).expect("bind existing");

        let error = BusListener::bind(&socket).expect_err("bind should fail");
        assert!(matches!(error, ListenerError::InUse { .. }));
    }

    #[test]
    fn refuses_non_socket_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = socket_in(&dir, "bus.sock");
        fs::write(socket.as_std_path(), b"junk").expect("write plain file");

        let error = BusListener::bind(&socket).expect_err("bind should fail");
        assert!(matches!(error, ListenerError::NotSocket { .. }));
    }
}
