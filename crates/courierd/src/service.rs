//! The bus service: one event loop owning every piece of daemon state.
//!
//! Readiness comes from a poll over the listener and caller connections; time
//! comes from a binary-heap timer queue whose earliest deadline bounds the
//! poll timeout. Every callback runs to completion on this one thread, so no
//! request state is ever shared or locked. The only blocking operation is
//! the URL fetch, which is bounded by the configured timeout.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Token};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bus::{BUS_TARGET, BusListener, BusStatus, CallRead, CallerConnection};
use crate::dispatch::{DISPATCH_TARGET, MethodId, ObjectRegistry, parse_reply, url_argument};
use crate::fetch::Fetcher;
use crate::requests::{
    PendingRequest, RequestId, RequestPhase, RequestTable, STREAM_TARGET, open_stream_pipe,
};
use crate::timers::TimerQueue;

const LISTENER_TOKEN: Token = Token(0);

/// Delay before the deferred reply handshake runs, effectively "the next
/// loop iteration".
const HANDSHAKE_DELAY: Duration = Duration::from_millis(1);

/// Cadence of heartbeat lines after the zero-delay first write.
const STREAM_INTERVAL: Duration = Duration::from_millis(1000);

/// Upper bound on the poll timeout so the shutdown flag stays responsive.
const IDLE_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Errors that abort the event loop.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Creating the poll instance failed.
    #[error("failed to create poll instance: {source}")]
    CreatePoll {
        #[source]
        source: io::Error,
    },
    /// Registering the listener failed.
    #[error("failed to register bus listener: {source}")]
    RegisterListener {
        #[source]
        source: io::Error,
    },
    /// Polling for readiness failed.
    #[error("poll failed: {source}")]
    Poll {
        #[source]
        source: io::Error,
    },
}

/// The daemon's single-threaded service loop.
#[derive(Debug)]
pub struct BusService {
    poll: Poll,
    listener: BusListener,
    registry: ObjectRegistry,
    fetcher: Fetcher,
    connections: HashMap<Token, CallerConnection>,
    requests: RequestTable,
    timers: TimerQueue,
    next_token: usize,
}

impl BusService {
    /// Wires the service around a bound listener and a fetcher.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] when the poll instance cannot be created or
    /// the listener cannot be registered.
    pub fn new(mut listener: BusListener, fetcher: Fetcher) -> Result<Self, ServiceError> {
        let poll = Poll::new().map_err(|source| ServiceError::CreatePoll { source })?;
        poll.registry()
            .register(listener.source_mut(), LISTENER_TOKEN, Interest::READABLE)
            .map_err(|source| ServiceError::RegisterListener { source })?;

        Ok(Self {
            poll,
            listener,
            registry: ObjectRegistry::courier_surface(),
            fetcher,
            connections: HashMap::new(),
            requests: RequestTable::new(),
            timers: TimerQueue::new(),
            next_token: 1,
        })
    }

    /// Number of requests currently streaming or awaiting handshake.
    pub fn live_requests(&self) -> usize {
        self.requests.len()
    }

    /// Runs the loop until `shutdown` becomes true.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Poll`] when polling fails for a reason other
    /// than an interrupt.
    pub fn run_until(&mut self, shutdown: &AtomicBool) -> Result<(), ServiceError> {
        info!(
            target: BUS_TARGET,
            socket = %self.listener.path(),
            "bus service active"
        );

        let mut events = Events::with_capacity(64);
        while !shutdown.load(Ordering::SeqCst) {
            let timeout = self.poll_timeout();
            if let Err(source) = self.poll.poll(&mut events, Some(timeout)) {
                if source.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ServiceError::Poll { source });
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_ready(),
                    token => self.connection_ready(token),
                }
            }

            self.fire_due_timers();
        }

        info!(
            target: BUS_TARGET,
            live_requests = self.requests.len(),
            armed_timers = self.timers.len(),
            "bus service stopping"
        );
        Ok(())
    }

    fn poll_timeout(&self) -> Duration {
        match self.timers.next_deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(IDLE_POLL_TIMEOUT),
            None => IDLE_POLL_TIMEOUT,
        }
    }

    /// Drains the accept backlog, registering each new caller.
    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok(stream) => self.register_connection(stream),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    warn!(target: BUS_TARGET, %error, "accept failed");
                    break;
                }
            }
        }
    }

    fn register_connection(&mut self, mut stream: mio::net::UnixStream) {
        let token = Token(self.next_token);
        self.next_token = self.next_token.wrapping_add(1).max(1);

        if let Err(error) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
        {
            warn!(target: BUS_TARGET, %error, "failed to register caller");
            return;
        }
        debug!(target: BUS_TARGET, token = token.0, "caller connected");
        self.connections.insert(token, CallerConnection::new(stream));
    }

    /// Handles readable data on a caller connection.
    fn connection_ready(&mut self, token: Token) {
        let Some(connection) = self.connections.get_mut(&token) else {
            return;
        };

        match connection.read_call() {
            Ok(CallRead::Pending) => {}
            Ok(CallRead::Disconnected) => {
                debug!(target: BUS_TARGET, token = token.0, "caller left without a call");
                self.drop_connection(token);
            }
            Ok(CallRead::Complete(line)) => {
                if let Some(connection) = self.detach_connection(token) {
                    self.dispatch_call(connection, &line);
                }
            }
            Err(error) => {
                warn!(target: BUS_TARGET, token = token.0, %error, "failed to read call");
                if let Some(mut connection) = self.detach_connection(token) {
                    let _ = connection.send_complete(error.status());
                }
            }
        }
    }

    /// Removes a connection from the readable set without responding.
    fn drop_connection(&mut self, token: Token) {
        if let Some(mut connection) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(connection.source_mut());
        }
    }

    /// Removes a connection from the readable set, keeping it alive for the
    /// response path.
    fn detach_connection(&mut self, token: Token) -> Option<CallerConnection> {
        let mut connection = self.connections.remove(&token)?;
        if let Err(error) = self.poll.registry().deregister(connection.source_mut()) {
            warn!(target: BUS_TARGET, %error, "failed to deregister caller");
        }
        Some(connection)
    }

    /// Parses, validates, and routes one call.
    fn dispatch_call(&mut self, mut connection: CallerConnection, line: &[u8]) {
        let envelope = match CallerConnection::parse_call(line) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %error, "rejecting call");
                let _ = connection.send_complete(error.status());
                return;
            }
        };

        let method_id = match self
            .registry
            .resolve(envelope.object(), envelope.method())
            .and_then(|spec| spec.validate_args(envelope.args()).map(|()| spec.id))
        {
            Ok(id) => id,
            Err(error) => {
                warn!(
                    target: DISPATCH_TARGET,
                    object = envelope.object(),
                    method = envelope.method(),
                    %error,
                    "call failed validation"
                );
                let _ = connection.send_complete(error.status());
                return;
            }
        };

        debug!(
            target: DISPATCH_TARGET,
            object = envelope.object(),
            method = envelope.method(),
            "dispatching call"
        );

        match method_id {
            MethodId::CurlGet => self.curl_get(connection, envelope.args()),
        }
    }

    /// `curl.get`: fetch now, defer the reply, start the timer chain.
    fn curl_get(
        &mut self,
        mut connection: CallerConnection,
        args: &serde_json::Map<String, serde_json::Value>,
    ) {
        let url = match url_argument(args) {
            Ok(url) => url,
            Err(error) => {
                let _ = connection.send_complete(error.status());
                return;
            }
        };

        match self.fetcher.fetch(url) {
            Ok(body) => {
                let request = PendingRequest::new(connection, &body);
                let id = self.requests.insert(request);
                self.timers.arm(HANDSHAKE_DELAY, id);
                debug!(
                    target: DISPATCH_TARGET,
                    request = %id,
                    bytes = body.len(),
                    "fetch succeeded, completion deferred"
                );
            }
            Err(error) => {
                debug!(target: DISPATCH_TARGET, url, %error, "fetch failed");
                let _ = connection.send_complete(BusStatus::UnknownError);
            }
        }
    }

    fn fire_due_timers(&mut self) {
        let now = Instant::now();
        for id in self.timers.pop_expired(now) {
            self.request_tick(id);
        }
    }

    /// One tick for one request. A released request's timer finds no table
    /// entry and fires into nothing.
    fn request_tick(&mut self, id: RequestId) {
        let Some(request) = self.requests.take(id) else {
            return;
        };
        match request.phase() {
            RequestPhase::AwaitingHandshake => self.handshake_tick(id, request),
            RequestPhase::Streaming => self.stream_tick(id, request),
        }
    }

    /// The deferred reply handshake; runs exactly once per request.
    ///
    /// Any failure drops `request`, which closes the caller connection and
    /// whatever ends of the pipe exist. A pipe failure after the reply was
    /// sent is deliberately silent to the caller: the connection closes with
    /// no completion frame and no stream ever materialises.
    fn handshake_tick(&mut self, id: RequestId, mut request: PendingRequest) {
        let Some(mut connection) = request.take_connection() else {
            warn!(target: DISPATCH_TARGET, request = %id, "handshake without a caller");
            return;
        };

        let reply = parse_reply(request.payload());
        if let Err(error) = connection.send_reply(reply) {
            debug!(target: DISPATCH_TARGET, request = %id, %error, "caller gone before reply");
            return;
        }

        let (read_end, write_end) = match open_stream_pipe() {
            Ok(pair) => pair,
            Err(error) => {
                warn!(
                    target: DISPATCH_TARGET,
                    request = %id,
                    %error,
                    "stream pipe creation failed after reply; abandoning handshake"
                );
                return;
            }
        };

        if let Err(error) = connection.send_complete_with_stream(BusStatus::Ok, read_end) {
            debug!(target: DISPATCH_TARGET, request = %id, %error, "descriptor handoff failed");
            return;
        }
        drop(connection);

        request.start_streaming(write_end);
        debug!(target: DISPATCH_TARGET, request = %id, "handshake complete, stream open");

        // Tick zero runs immediately; the 1-second cadence starts after it.
        self.stream_tick(id, request);
    }

    /// One heartbeat write. Success re-arms the interval timer; failure
    /// releases the request by dropping it.
    fn stream_tick(&mut self, id: RequestId, mut request: PendingRequest) {
        match request.write_stream_line() {
            Ok(()) => {
                self.requests.put_back(id, request);
                self.timers.arm(STREAM_INTERVAL, id);
            }
            Err(error) => {
                debug!(
                    target: STREAM_TARGET,
                    request = %id,
                    %error,
                    "stream write failed; releasing request"
                );
            }
        }
    }
}
