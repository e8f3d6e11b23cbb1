//! Caller-side view of the daemon's reply frames.
//!
//! The daemon owns the canonical frame types; this module keeps a
//! deserialising mirror plus a reader that collects any descriptors arriving
//! as `SCM_RIGHTS` ancillary data alongside the frame bytes. Reading with
//! plain buffered IO would discard those descriptors, so every byte comes in
//! through `recvmsg`.

use std::io::{self, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{ControlMessageOwned, MsgFlags, UnixAddr, recvmsg};
use serde::Deserialize;
use serde_json::Value;

use crate::AppError;

/// Frames the daemon sends to callers.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum BusMessage {
    /// Structured reply payload.
    Reply { data: Value },
    /// Terminal completion frame.
    Complete {
        status: i32,
        #[serde(default)]
        stream_fd: bool,
    },
}

/// Result of a completed call.
#[derive(Debug)]
pub(crate) struct CallOutcome {
    /// Reply payload, when the call produced one.
    pub(crate) reply: Option<Value>,
    /// Completion status code (0 is success).
    pub(crate) status: i32,
    /// Stream descriptor handed off with the completion.
    pub(crate) stream: Option<OwnedFd>,
}

/// Reads JSONL frames and collects handed-off descriptors.
pub(crate) struct FrameReader<'stream> {
    stream: &'stream UnixStream,
    buffer: Vec<u8>,
    descriptors: Vec<OwnedFd>,
}

impl<'stream> FrameReader<'stream> {
    pub(crate) fn new(stream: &'stream UnixStream) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    /// Reads frames until the completion frame arrives.
    ///
    /// # Errors
    ///
    /// Fails when the connection closes before completion, a frame is not
    /// valid JSON, or reading fails.
    pub(crate) fn read_outcome(&mut self) -> Result<CallOutcome, AppError> {
        let mut reply = None;
        loop {
            let Some(line) = self.next_line()? else {
                return Err(AppError::MissingCompletion);
            };
            match serde_json::from_str(&line).map_err(AppError::ParseFrame)? {
                BusMessage::Reply { data } => reply = Some(data),
                BusMessage::Complete { status, stream_fd } => {
                    let stream = if stream_fd {
                        // The descriptor rides the same message as the frame
                        // bytes; by the time the line parses it is queued.
                        Some(self.descriptors.pop().ok_or(AppError::MissingDescriptor)?)
                    } else {
                        None
                    };
                    return Ok(CallOutcome {
                        reply,
                        status,
                        stream,
                    });
                }
            }
        }
    }

    fn next_line(&mut self) -> Result<Option<String>, AppError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
                let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim_end().to_string();
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }

            let received = self.receive_chunk()?;
            if received == 0 {
                return Ok(None);
            }
        }
    }

    fn receive_chunk(&mut self) -> Result<usize, AppError> {
        let mut chunk = [0_u8; 4096];
        let mut iov = [IoSliceMut::new(&mut chunk)];
        let mut space = nix::cmsg_space!([RawFd; 2]);

        let received = {
            let message = recvmsg::<UnixAddr>(
                self.stream.as_raw_fd(),
                &mut iov,
                Some(&mut space),
                MsgFlags::empty(),
            )
            .map_err(|errno| AppError::ReadResponse(io::Error::from_raw_os_error(errno as i32)))?;

            let controls = message
                .cmsgs()
                .map_err(|errno| AppError::ReadResponse(io::Error::from_raw_os_error(errno as i32)))?;
            for control in controls {
                if let ControlMessageOwned::ScmRights(fds) = control {
                    for fd in fds {
                        // SAFETY: the kernel just delivered this descriptor;
                        // this process is its sole owner.
                        self.descriptors.push(unsafe { OwnedFd::from_raw_fd(fd) });
                    }
                }
            }
            message.bytes
        };

        self.buffer.extend_from_slice(&chunk[..received]);
        Ok(received)
    }
}
