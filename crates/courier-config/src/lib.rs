//! Shared configuration for the courier daemon and CLI.
//!
//! Both binaries need to agree on where the bus socket lives and how long a
//! fetch may run, so the resolved [`Config`] type lives in its own crate.
//! The surface is intentionally small: a socket path, a fetch timeout, and
//! telemetry settings. Binaries populate it from their own command lines.

mod defaults;
mod logging;
mod socket;

pub use defaults::{
    DEFAULT_FETCH_TIMEOUT, DEFAULT_LOG_FILTER, default_bus_socket, default_log_filter,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{BusSocket, SocketParseError, SocketPreparationError};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resolved configuration shared by the binaries.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Config {
    /// Bus socket the daemon binds and callers connect to.
    #[serde(default = "defaults::default_bus_socket")]
    pub bus_socket: BusSocket,
    /// Bound on a single URL fetch, connect through body completion.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: Duration,
    /// Log filter expression in `EnvFilter` syntax.
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,
    /// Telemetry output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_fetch_timeout() -> Duration {
    DEFAULT_FETCH_TIMEOUT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus_socket: default_bus_socket(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Accessor for the bus socket endpoint.
    #[must_use]
    pub fn bus_socket(&self) -> &BusSocket {
        &self.bus_socket
    }

    /// Accessor for the fetch timeout.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Accessor for the log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Accessor for the log format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_one_second_fetch_timeout() {
        let config = Config::default();
        assert_eq!(config.fetch_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn default_config_uses_info_filter_and_compact_format() {
        let config = Config::default();
        assert_eq!(config.log_filter(), "info");
        assert_eq!(config.log_format(), LogFormat::Compact);
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().expect("parse"), LogFormat::Json);
        assert_eq!(
            "compact".parse::<LogFormat>().expect("parse"),
            LogFormat::Compact
        );
    }
}
