//! Caller binary for the courier bus.
//!
//! `courier get URL` invokes `curl.get` on the daemon, prints the structured
//! reply on stdout, then follows the handed-off heartbeat stream until the
//! daemon goes away or `--follow` lines have been printed.

mod frames;
mod transport;

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::json;
use thiserror::Error;

use courier_config::{BusSocket, default_bus_socket};

use frames::FrameReader;

#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Call methods on the courier bus")]
struct Cli {
    /// Bus socket path (or unix:// URL) to connect to.
    #[arg(short = 's', long = "socket", global = true)]
    socket: Option<BusSocket>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a URL through the daemon and follow its heartbeat stream.
    Get {
        /// URL the daemon should fetch.
        url: String,

        /// Optional request id forwarded in the call arguments.
        #[arg(long)]
        id: Option<i64>,

        /// Stop after this many heartbeat lines (0 follows forever).
        #[arg(long, default_value_t = 0)]
        follow: u64,
    },
}

/// Errors surfaced by the CLI.
#[derive(Debug, Error)]
enum AppError {
    /// Connecting to the bus socket failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// Writing the call envelope failed.
    #[error("failed to send call: {0}")]
    SendCall(#[source] io::Error),
    /// Reading a response frame failed.
    #[error("failed to read response: {0}")]
    ReadResponse(#[source] io::Error),
    /// A response frame was not valid JSON.
    #[error("malformed response frame: {0}")]
    ParseFrame(#[source] serde_json::Error),
    /// The daemon closed the connection without completing the call.
    #[error("daemon closed the connection before completing the call")]
    MissingCompletion,
    /// The completion announced a descriptor that never arrived.
    #[error("completion announced a stream descriptor but none arrived")]
    MissingDescriptor,
    /// Forwarding output to the terminal failed.
    #[error("failed to write output: {0}")]
    ForwardOutput(#[source] io::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("courier: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, AppError> {
    let socket = cli.socket.unwrap_or_else(default_bus_socket);
    let Command::Get { url, id, follow } = cli.command;

    let mut stream = transport::connect(&socket).map_err(|source| AppError::Connect {
        endpoint: socket.to_string(),
        source,
    })?;

    let mut args = json!({ "url": url });
    if let Some(id) = id {
        args["id"] = json!(id);
    }
    let envelope = json!({"call": {"object": "curl", "method": "get"}, "args": args});
    let mut line = serde_json::to_vec(&envelope).map_err(AppError::ParseFrame)?;
    line.push(b'\n');
    stream.write_all(&line).map_err(AppError::SendCall)?;

    let outcome = FrameReader::new(&stream).read_outcome()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if let Some(reply) = &outcome.reply {
        writeln!(out, "{reply}").map_err(AppError::ForwardOutput)?;
    }

    if outcome.status != 0 {
        return Ok(ExitCode::from(exit_code_for(outcome.status)));
    }

    if let Some(descriptor) = outcome.stream {
        follow_stream(File::from(descriptor), follow, &mut out)?;
    }

    Ok(ExitCode::SUCCESS)
}

/// Prints heartbeat lines until EOF or `limit` lines (0 means no limit).
fn follow_stream(stream: File, limit: u64, out: &mut impl Write) -> Result<(), AppError> {
    let mut reader = BufReader::new(stream);
    let mut printed = 0_u64;
    let mut line = String::new();

    loop {
        line.clear();
        let read = reader.read_line(&mut line).map_err(AppError::ReadResponse)?;
        if read == 0 {
            return Ok(());
        }
        out.write_all(line.as_bytes())
            .map_err(AppError::ForwardOutput)?;
        out.flush().map_err(AppError::ForwardOutput)?;

        printed += 1;
        if limit != 0 && printed >= limit {
            return Ok(());
        }
    }
}

fn exit_code_for(status: i32) -> u8 {
    u8::try_from(status).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_with_defaults() {
        let cli = Cli::try_parse_from(["courier", "get", "http://example.test/"])
            .expect("parse");
        let Command::Get { url, id, follow } = cli.command;
        assert_eq!(url, "http://example.test/");
        assert_eq!(id, None);
        assert_eq!(follow, 0);
        assert!(cli.socket.is_none());
    }

    #[test]
    fn parses_socket_and_options() {
        let cli = Cli::try_parse_from([
            "courier",
            "--socket",
            "unix:///tmp/bus.sock",
            "get",
            "http://example.test/",
            "--id",
            "7",
            "--follow",
            "3",
        ])
        .expect("parse");
        let Command::Get { id, follow, .. } = cli.command;
        assert_eq!(id, Some(7));
        assert_eq!(follow, 3);
        assert_eq!(
            cli.socket.expect("socket").path().as_str(),
            "/tmp/bus.sock"
        );
    }

    #[test]
    fn requires_a_url() {
        assert!(Cli::try_parse_from(["courier", "get"]).is_err());
    }

    #[test]
    fn follow_stream_honours_the_limit() {
        let (read_half, mut write_half) = std::os::unix::net::UnixStream::pair()
            .expect("socket pair");
        write_half
            .write_all(b"msg1: x\nmsg2: x\nmsg3: x\n")
            .expect("write lines");

        // A socket stands in for the pipe; both are plain byte streams.
        let file = File::from(std::os::fd::OwnedFd::from(read_half));

        let mut captured = Vec::new();
        follow_stream(file, 2, &mut captured).expect("follow");
        assert_eq!(captured, b"msg1: x\nmsg2: x\n");
    }

    #[rstest::rstest]
    #[case(9, 9)]
    #[case(0, 0)]
    #[case(-1, 1)]
    #[case(300, 1)]
    fn completion_status_maps_to_exit_code(#[case] status: i32, #[case] expected: u8) {
        assert_eq!(exit_code_for(status), expected);
    }
}
