//! Process lifecycle: signal disposition and the daemon run loop.

use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use nix::sys::signal::{SigHandler, Signal, signal};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use thiserror::Error;
use tracing::info;

use courier_config::{Config, SocketPreparationError};

use crate::bus::{BusListener, ListenerError};
use crate::fetch::{FetchError, Fetcher};
use crate::service::{BusService, ServiceError};
use crate::telemetry::{self, TelemetryError};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Errors surfaced while launching or running the daemon.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        #[source]
        source: TelemetryError,
    },
    /// Adjusting signal disposition failed.
    #[error("failed to configure signals: {source}")]
    Signals {
        #[source]
        source: io::Error,
    },
    /// Socket directory preparation failed.
    #[error("failed to prepare bus socket: {source}")]
    Socket {
        #[source]
        source: SocketPreparationError,
    },
    /// Binding the bus socket failed.
    #[error(transparent)]
    Bind(#[from] ListenerError),
    /// Building the fetch client failed.
    #[error(transparent)]
    Fetcher(#[from] FetchError),
    /// The event loop aborted.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Runs the daemon until a termination signal arrives.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap fails or the event loop aborts.
pub fn run_daemon(config: &Config) -> Result<(), LaunchError> {
    telemetry::initialise(config).map_err(|source| LaunchError::Telemetry { source })?;
    ignore_sigpipe()?;

    config
        .bus_socket()
        .prepare_filesystem()
        .map_err(|source| LaunchError::Socket { source })?;

    let listener = BusListener::bind(config.bus_socket())?;
    let fetcher = Fetcher::new(config.fetch_timeout())?;
    let mut service = BusService::new(listener, fetcher)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    for termination in [SIGINT, SIGTERM] {
        signal_hook::flag::register(termination, Arc::clone(&shutdown))
            .map_err(|source| LaunchError::Signals { source })?;
    }

    service.run_until(&shutdown)?;
    info!(target: PROCESS_TARGET, "daemon shut down cleanly");
    Ok(())
}

/// Ignores `SIGPIPE` so heartbeat writes to a closed pipe surface as `EPIPE`.
///
/// The Rust runtime already arranges this for binaries, but the disposition
/// is load-bearing here: write failure is the sole request teardown trigger,
/// so it is pinned explicitly rather than inherited.
fn ignore_sigpipe() -> Result<(), LaunchError> {
    // SAFETY: installing the kernel's ignore disposition touches no Rust
    // state and cannot race with other signal configuration at this point.
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }
        .map(|_previous| ())
        .map_err(|errno| LaunchError::Signals {
            source: io::Error::from_raw_os_error(errno as i32),
        })
}
