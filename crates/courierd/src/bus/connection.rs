//! Per-caller connection state and frame writing.
//!
//! Reads are non-blocking and accumulate into a bounded line buffer until the
//! call envelope's newline arrives. Writes are fire-and-forget: a caller that
//! cannot accept a small frame immediately is treated as gone.

use std::io::{self, IoSlice, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use mio::net::UnixStream;
use nix::sys::socket::{ControlMessage, MsgFlags, UnixAddr, sendmsg};
use serde_json::Value;

use crate::dispatch::DispatchError;

use super::frames::{BusMessage, BusStatus, CallEnvelope, MAX_CALL_BYTES};

/// Progress of reading a call envelope from a caller.
#[derive(Debug)]
pub enum CallRead {
    /// A complete call line (newline included, or EOF with partial data).
    Complete(Vec<u8>),
    /// No complete line yet; wait for more readable events.
    Pending,
    /// The caller disconnected without sending a call.
    Disconnected,
}

/// One caller connection on the bus.
#[derive(Debug)]
pub struct CallerConnection {
    stream: UnixStream,
    buffer: Vec<u8>,
}

impl CallerConnection {
    /// Wraps an accepted stream.
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    /// Returns the poll registration source for this connection.
    pub fn source_mut(&mut self) -> &mut UnixStream {
        &mut self.stream
    }

    /// Drains readable bytes, returning a complete call line when one arrives.
    ///
    /// Must be called until it reports [`CallRead::Pending`]; the stream is
    /// registered edge-triggered.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::CallTooLarge`] when the line exceeds
    /// [`MAX_CALL_BYTES`], or an IO error from the socket.
    pub fn read_call(&mut self) -> Result<CallRead, DispatchError> {
        let mut chunk = [0_u8; 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Ok(if self.buffer.is_empty() {
                        CallRead::Disconnected
                    } else {
                        CallRead::Complete(std::mem::take(&mut self.buffer))
                    });
                }
                Ok(read) => {
                    if let Some(pos) = chunk[..read].iter().position(|byte| *byte == b'\n') {
                        self.buffer.extend_from_slice(&chunk[..=pos]);
                        self.enforce_limit()?;
                        return Ok(CallRead::Complete(std::mem::take(&mut self.buffer)));
                    }
                    self.buffer.extend_from_slice(&chunk[..read]);
                    self.enforce_limit()?;
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(CallRead::Pending);
                }
                Err(error) => return Err(DispatchError::Io(error)),
            }
        }
    }

    /// Parses the buffered call line.
    ///
    /// # Errors
    ///
    /// See [`CallEnvelope::parse`].
    pub fn parse_call(line: &[u8]) -> Result<CallEnvelope, DispatchError> {
        let envelope = CallEnvelope::parse(line)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Writes the structured reply frame.
    ///
    /// # Errors
    ///
    /// Returns an error when serialisation or the socket write fails.
    pub fn send_reply(&mut self, data: Value) -> Result<(), DispatchError> {
        let frame = encode_frame(&BusMessage::reply(data))?;
        self.write_now(&frame)
    }

    /// Writes a completion frame without a descriptor and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error when serialisation or the socket write fails.
    pub fn send_complete(&mut self, status: BusStatus) -> Result<(), DispatchError> {
        let frame = encode_frame(&BusMessage::complete(status))?;
        self.write_now(&frame)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Writes a completion frame with the stream descriptor attached.
    ///
    /// The descriptor travels as `SCM_RIGHTS` ancillary data on the sendmsg
    /// carrying the frame bytes; the local copy is closed when `read_end`
    /// drops on return.
    ///
    /// # Errors
    ///
    /// Returns an error when serialisation fails, the sendmsg fails, or the
    /// frame is truncated.
    pub fn send_complete_with_stream(
        &mut self,
        status: BusStatus,
        read_end: OwnedFd,
    ) -> Result<(), DispatchError> {
        let frame = encode_frame(&BusMessage::complete_with_stream(status))?;
        let iov = [IoSlice::new(&frame)];
        let descriptors: [RawFd; 1] = [read_end.as_raw_fd()];
        let control = [ControlMessage::ScmRights(&descriptors)];

        let sent = loop {
            match sendmsg::<UnixAddr>(
                self.stream.as_raw_fd(),
                &iov,
                &control,
                MsgFlags::empty(),
                None,
            ) {
                Ok(sent) => break sent,
                Err(nix::errno::Errno::EINTR) => {}
                Err(errno) => {
                    return Err(DispatchError::Io(io::Error::from_raw_os_error(
                        errno as i32,
                    )));
                }
            }
        };

        if sent != frame.len() {
            return Err(DispatchError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                "completion frame truncated",
            )));
        }
        Ok(())
    }

    fn write_now(&mut self, bytes: &[u8]) -> Result<(), DispatchError> {
        let mut written = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => {
                    return Err(DispatchError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "caller stopped accepting frames",
                    )));
                }
                Ok(count) => written += count,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(DispatchError::Io(error)),
            }
        }
        Ok(())
    }

    fn enforce_limit(&self) -> Result<(), DispatchError> {
        if self.buffer.len() > MAX_CALL_BYTES {
            return Err(DispatchError::call_too_large(
                self.buffer.len(),
                MAX_CALL_BYTES,
            ));
        }
        Ok(())
    }
}

fn encode_frame(message: &BusMessage) -> Result<Vec<u8>, DispatchError> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}
