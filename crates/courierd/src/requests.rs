//! Pending request records and the table that owns them.
//!
//! A request exists from the moment a fetch succeeds until its stream write
//! fails. The table is the single owner: ticks take the record out, work on
//! it, and either put it back (re-arming the next tick) or let it drop. A
//! drop closes the stream write end and the caller connection, so teardown
//! is one code path by construction.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};

use nix::fcntl::{FcntlArg, OFlag, fcntl};

use crate::bus::CallerConnection;

pub(crate) const STREAM_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::stream");

/// Opaque identifier for an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    #[cfg(test)]
    pub(crate) fn for_tests(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "req-{}", self.0)
    }
}

/// Lifecycle phase of a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// Fetch done; the deferred reply handshake has not run yet.
    AwaitingHandshake,
    /// Handshake done; heartbeat lines are being streamed.
    Streaming,
}

/// Per-call record created after a successful fetch.
#[derive(Debug)]
pub struct PendingRequest {
    connection: Option<CallerConnection>,
    payload: String,
    sequence: u64,
    stream: Option<OwnedFd>,
    phase: RequestPhase,
}

impl PendingRequest {
    /// Builds a record from the caller connection and the fetched body.
    ///
    /// The body is snapshotted as text once; every streamed line reuses it
    /// verbatim. Invalid UTF-8 is replaced rather than rejected, since the
    /// stream format is a text line.
    pub fn new(connection: CallerConnection, body: &[u8]) -> Self {
        Self {
            connection: Some(connection),
            payload: String::from_utf8_lossy(body).into_owned(),
            sequence: 0,
            stream: None,
            phase: RequestPhase::AwaitingHandshake,
        }
    }

    /// Returns the fetched payload snapshot.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Returns the current lifecycle phase.
    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    /// Takes the caller connection for the handshake.
    pub fn take_connection(&mut self) -> Option<CallerConnection> {
        self.connection.take()
    }

    /// Installs the stream write end and enters the streaming phase.
    pub fn start_streaming(&mut self, write_end: OwnedFd) {
        self.stream = Some(write_end);
        self.phase = RequestPhase::Streaming;
    }

    /// Writes the next heartbeat line to the stream.
    ///
    /// The sequence is incremented before formatting, so the first line is
    /// `msg1`. A short write counts as failure; the line format has no way to
    /// resume mid-line.
    ///
    /// # Errors
    ///
    /// Returns the write error; the caller is expected to drop this record,
    /// which closes the write end.
    pub fn write_stream_line(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "stream not established",
            ));
        };

        self.sequence = self.sequence.wrapping_add(1);
        let line = format!("msg{}: {}\n", self.sequence, self.payload);
        let written = nix::unistd::write(stream, line.as_bytes())
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
        if written != line.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "heartbeat line truncated",
            ));
        }
        Ok(())
    }
}

/// Table of in-flight requests keyed by [`RequestId`].
#[derive(Debug, Default)]
pub struct RequestTable {
    entries: HashMap<RequestId, PendingRequest>,
    next_id: u64,
}

impl RequestTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record and returns its freshly assigned id.
    pub fn insert(&mut self, request: PendingRequest) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.entries.insert(id, request);
        id
    }

    /// Removes and returns the record for `id`, if still live.
    pub fn take(&mut self, id: RequestId) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    /// Re-inserts a record taken for a tick.
    pub fn put_back(&mut self, id: RequestId, request: PendingRequest) {
        self.entries.insert(id, request);
    }

    /// Number of live requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Creates the byte-stream pipe for a request.
///
/// The write end is set non-blocking: a caller that stops draining fills the
/// pipe and the next heartbeat write fails with `EAGAIN`, which tears the
/// request down instead of blocking the loop.
///
/// # Errors
///
/// Returns the underlying OS error when the pipe cannot be created or
/// configured.
pub fn open_stream_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let (read_end, write_end) =
        nix::unistd::pipe().map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;

    let flags = fcntl(write_end.as_raw_fd(), FcntlArg::F_GETFL)
        .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
    let flags = OFlag::from_bits_retain(flags) | OFlag::O_NONBLOCK;
    fcntl(write_end.as_raw_fd(), FcntlArg::F_SETFL(flags))
        .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;

    Ok((read_end, write_end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    use mio::net::UnixStream;

    fn test_request() -> PendingRequest {
        let (ours, _theirs) = UnixStream::pair().expect("socket pair");
        PendingRequest::new(CallerConnection::new(ours), br#"{"ok":true}"#)
    }

    fn read_line(fd: &OwnedFd) -> String {
        let mut collected = Vec::new();
        let mut byte = [0_u8; 1];
        loop {
            match nix::unistd::read(fd.as_raw_fd(), &mut byte) {
                Ok(1) if byte[0] == b'\n' => break,
                Ok(1) => collected.push(byte[0]),
                Ok(_) => break,
                Err(error) => panic!("pipe read failed: {error}"),
            }
        }
        String::from_utf8(collected).expect("utf8 line")
    }

    #[test]
    fn first_line_is_msg1_with_verbatim_payload() {
        let mut request = test_request();
        let (read_end, write_end) = open_stream_pipe().expect("pipe");
        request.start_streaming(write_end);

        request.write_stream_line().expect("first write");
        assert_eq!(read_line(&read_end), r#"msg1: {"ok":true}"#);

        request.write_stream_line().expect("second write");
        assert_eq!(read_line(&read_end), r#"msg2: {"ok":true}"#);
    }

    #[test]
    fn write_fails_once_reader_closes() {
        let mut request = test_request();
        let (read_end, write_end) = open_stream_pipe().expect("pipe");
        request.start_streaming(write_end);

        request.write_stream_line().expect("first write");
        drop(read_end);

        let error = request.write_stream_line().expect_err("EPIPE expected");
        assert_eq!(error.raw_os_error(), Some(libc_epipe()));
    }

    fn libc_epipe() -> i32 {
        nix::errno::Errno::EPIPE as i32
    }

    #[test]
    fn full_pipe_degrades_to_write_failure() {
        let mut request = test_request();
        let (read_end, write_end) = open_stream_pipe().expect("pipe");
        request.start_streaming(write_end);

        // Never drain the read end; the non-blocking write end must fail
        // rather than block the loop.
        let mut failed = false;
        for _ in 0..200_000 {
            if request.write_stream_line().is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed, "writes should fail once the pipe fills");
        drop(read_end);
    }

    #[test]
    fn non_utf8_bodies_are_replaced_not_rejected() {
        let (ours, _theirs) = UnixStream::pair().expect("socket pair");
        let request =
            PendingRequest::new(CallerConnection::new(ours), &[b'h', b'i', 0xFF, 0xFE]);
        assert!(request.payload().starts_with("hi"));
    }

    #[test]
    fn table_assigns_unique_ids() {
        let mut table = RequestTable::new();
        let first = table.insert(test_request());
        let second = table.insert(test_request());
        assert_ne!(first, second);
        assert_eq!(table.len(), 2);

        let record = table.take(first).expect("live record");
        assert_eq!(table.len(), 1);
        table.put_back(first, record);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn take_of_released_request_is_none() {
        let mut table = RequestTable::new();
        let id = table.insert(test_request());
        assert!(table.take(id).is_some());
        assert!(table.take(id).is_none(), "lazy timer fire must find nothing");
    }
}
