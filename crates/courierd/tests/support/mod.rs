//! Shared harness for daemon behaviour tests: an in-process daemon runner,
//! a canned HTTP endpoint, and a bus client that understands descriptor
//! handoff.

use std::io::{IoSliceMut, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::socket::{ControlMessageOwned, MsgFlags, UnixAddr, recvmsg};
use serde_json::{Value, json};

use courier_config::BusSocket;
use courierd::{BusListener, BusService, Fetcher};

/// A daemon running on its own thread for the duration of a test.
pub struct DaemonHandle {
    socket: BusSocket,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<usize>>,
}

impl DaemonHandle {
    /// Bus socket the daemon is serving.
    pub fn socket(&self) -> &BusSocket {
        &self.socket
    }

    /// Stops the daemon and returns how many requests were still live.
    pub fn stop(mut self) -> usize {
        self.shutdown.store(true, Ordering::SeqCst);
        self.thread
            .take()
            .expect("daemon thread handle")
            .join()
            .expect("daemon thread")
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Starts a daemon on a fresh socket under `dir`.
pub fn spawn_daemon(dir: &tempfile::TempDir, fetch_timeout: Duration) -> DaemonHandle {
    let path = dir.path().join("courierd.sock");
    let socket = BusSocket::new(Utf8PathBuf::from_path_buf(path).expect("utf8 temp path"));
    let shutdown = Arc::new(AtomicBool::new(false));

    let thread_socket = socket.clone();
    let thread_shutdown = Arc::clone(&shutdown);
    let thread = thread::spawn(move || {
        let listener = BusListener::bind(&thread_socket).expect("bind daemon socket");
        let fetcher = Fetcher::new(fetch_timeout).expect("build fetcher");
        let mut service = BusService::new(listener, fetcher).expect("build service");
        service.run_until(&thread_shutdown).expect("event loop");
        service.live_requests()
    });

    wait_for_socket(&socket);
    DaemonHandle {
        socket,
        shutdown,
        thread: Some(thread),
    }
}

fn wait_for_socket(socket: &BusSocket) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if UnixStream::connect(socket.as_std_path()).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("daemon socket never became connectable");
}

/// Serves canned HTTP responses forever on a loopback port.
pub fn spawn_http_stub(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind http stub");
    let addr = listener.local_addr().expect("stub addr");
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut request = [0_u8; 2048];
            let _ = stream.read(&mut request);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    addr
}

/// Accepts connections and never responds, to exercise the fetch timeout.
pub fn spawn_silent_endpoint() -> SocketAddr {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind silent stub");
    let addr = listener.local_addr().expect("stub addr");
    thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            held.push(stream);
        }
    });
    addr
}

/// Everything a completed call produced, in order.
pub struct CallOutcome {
    /// Reply payload, if a reply frame arrived before completion.
    pub reply: Option<Value>,
    /// Completion status code.
    pub status: i32,
    /// Stream descriptor, when the completion announced one.
    pub stream: Option<OwnedFd>,
}

/// Minimal bus client speaking the caller side of the protocol.
pub struct BusClient {
    stream: UnixStream,
    buffer: Vec<u8>,
    descriptors: Vec<OwnedFd>,
}

impl BusClient {
    /// Connects to the daemon's bus socket.
    pub fn connect(socket: &BusSocket) -> Self {
        let stream = UnixStream::connect(socket.as_std_path()).expect("connect to bus");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        Self {
            stream,
            buffer: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    /// Writes a call envelope line.
    pub fn call(&mut self, object: &str, method: &str, args: Value) {
        let line = json!({"call": {"object": object, "method": method}, "args": args});
        let mut bytes = serde_json::to_vec(&line).expect("encode call");
        bytes.push(b'\n');
        self.stream.write_all(&bytes).expect("write call");
    }

    /// Writes raw bytes, for malformed-call tests.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("write raw");
    }

    /// Reads frames until the completion frame and returns the outcome.
    pub fn read_outcome(&mut self) -> CallOutcome {
        let mut reply = None;
        loop {
            let line = self
                .next_frame_line()
                .expect("connection closed before completion frame");
            let frame: Value = serde_json::from_str(&line).expect("frame is JSON");
            match frame.get("kind").and_then(Value::as_str) {
                Some("reply") => {
                    reply = Some(frame.get("data").cloned().expect("reply data"));
                }
                Some("complete") => {
                    let status = frame
                        .get("status")
                        .and_then(Value::as_i64)
                        .expect("completion status") as i32;
                    let announced = frame
                        .get("stream_fd")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    let stream = if announced {
                        Some(self.descriptors.pop().expect("announced descriptor"))
                    } else {
                        None
                    };
                    return CallOutcome {
                        reply,
                        status,
                        stream,
                    };
                }
                other => panic!("unexpected frame kind {other:?}: {line}"),
            }
        }
    }

    /// Returns `None` on EOF before any further frame.
    pub fn next_frame_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                let text = String::from_utf8(line).expect("utf8 frame");
                return Some(text.trim_end().to_string());
            }

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
                .expect("recvmsg");
                for control in message.cmsgs().expect("control messages") {
                    if let ControlMessageOwned::ScmRights(fds) = control {
                        for fd in fds {
                            // SAFETY: freshly delivered descriptor; we own it.
                            self.descriptors.push(unsafe { OwnedFd::from_raw_fd(fd) });
                        }
                    }
                }
                message.bytes
            };

            if received == 0 {
                return None;
            }
            self.buffer.extend_from_slice(&chunk[..received]);
        }
    }
}

/// Reads one `\n`-terminated line from a stream descriptor, with a deadline.
pub fn read_stream_line(fd: &OwnedFd, timeout: Duration) -> String {
    let deadline = Instant::now() + timeout;
    let mut collected = Vec::new();
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .unwrap_or_else(|| panic!("timed out waiting for stream line"));
        let millis = u16::try_from(remaining.as_millis().min(60_000)).unwrap_or(u16::MAX);

        let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLIN)];
        let ready = poll(&mut fds, PollTimeout::from(millis)).expect("poll stream");
        if ready == 0 {
            continue;
        }

        let mut byte = [0_u8; 1];
        match nix::unistd::read(fd.as_raw_fd(), &mut byte) {
            Ok(0) => panic!("stream closed mid-line"),
            Ok(_) if byte[0] == b'\n' => {
                return String::from_utf8(collected).expect("utf8 stream line");
            }
            Ok(_) => collected.push(byte[0]),
            Err(error) => panic!("stream read failed: {error}"),
        }
    }
}
