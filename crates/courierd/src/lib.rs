//! The courier daemon: a bus RPC service with streaming heartbeats.
//!
//! The daemon registers one object, `curl`, with one method, `get`, on a
//! Unix-socket bus. A call names a URL; the daemon fetches it with a hard
//! one-second bound, replies with the body parsed as structured data, and
//! completes the deferred call with the read end of a pipe attached. From
//! then on a timer writes one `msg<N>: <body>` line into the pipe per second
//! until the caller closes its end, which is the only way a request ends.
//!
//! Everything runs on a single thread: a readiness poll over the bus socket
//! plus a timer heap. The fetch is the one blocking operation and is bounded
//! by its timeout. Request records are owned by a table with exactly one
//! removal path, so the lifecycle rule (torn down once, on write failure)
//! is enforced structurally rather than by convention.

mod bus;
mod dispatch;
mod fetch;
mod process;
mod requests;
mod service;
mod telemetry;
mod timers;

pub use bus::{BusListener, BusMessage, BusStatus, CallEnvelope, ListenerError, MAX_CALL_BYTES};
pub use dispatch::{DispatchError, ObjectRegistry};
pub use fetch::{FetchError, Fetcher};
pub use process::{LaunchError, run_daemon};
pub use service::{BusService, ServiceError};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};
