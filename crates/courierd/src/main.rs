//! Entry point for the courier daemon.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use courier_config::{BusSocket, Config, LogFormat, default_bus_socket};

#[derive(Parser, Debug)]
#[command(name = "courierd")]
#[command(about = "Bus RPC daemon: fetch a URL, reply, stream heartbeats")]
struct Args {
    /// Bus socket path (or unix:// URL) to bind.
    #[arg(short = 's', long = "socket")]
    socket: Option<BusSocket>,

    /// Log filter expression (EnvFilter syntax).
    #[arg(long, default_value = courier_config::DEFAULT_LOG_FILTER)]
    log_filter: String,

    /// Log output format.
    #[arg(long, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Bound on a single URL fetch, in seconds.
    #[arg(long, default_value_t = 1)]
    fetch_timeout_secs: u64,
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            bus_socket: self.socket.unwrap_or_else(default_bus_socket),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            log_filter: self.log_filter,
            log_format: self.log_format,
        }
    }
}

fn main() -> ExitCode {
    let config = Args::parse().into_config();
    match courierd::run_daemon(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("courierd: {error}");
            ExitCode::FAILURE
        }
    }
}
