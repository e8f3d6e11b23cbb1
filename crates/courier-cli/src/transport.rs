//! Socket transport helpers for the courier CLI.
//!
//! Connecting goes through `socket2` so the connect itself is bounded; a
//! missing or wedged daemon should fail fast rather than hang the caller.

use std::io;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use socket2::{Domain, SockAddr, Socket, Type};

use courier_config::BusSocket;

pub(crate) const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects to the daemon's bus socket with a bounded connect timeout.
pub(crate) fn connect(endpoint: &BusSocket) -> io::Result<UnixStream> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(endpoint.as_std_path())?;
    socket.connect_timeout(&address, CONNECTION_TIMEOUT)?;
    let stream = UnixStream::from(std::os::fd::OwnedFd::from(socket));
    stream.set_read_timeout(Some(CONNECTION_TIMEOUT))?;
    Ok(stream)
}
