//! Default values shared by the daemon and the CLI.

use std::time::Duration;

use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

use crate::socket::BusSocket;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default bound on a single URL fetch, connect through body completion.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(1);

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Computes the default bus socket location.
///
/// Prefers the user runtime directory; falls back to a per-uid namespace
/// under the system temporary directory when no runtime directory exists.
#[must_use]
pub fn default_bus_socket() -> BusSocket {
    let mut base = match runtime_base_directory() {
        Some(dir) => {
            let mut dir = dir;
            dir.push("courier");
            dir
        }
        None => {
            let mut dir = fallback_base_directory();
            dir.push("courier");
            dir.push(user_namespace());
            dir
        }
    };

    base.push("courierd.sock");
    BusSocket::new(base)
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(not(unix))]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    None
}

fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn user_namespace() -> String {
    "shared".to_owned()
}
