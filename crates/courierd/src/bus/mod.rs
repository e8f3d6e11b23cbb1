//! Bus transport: the Unix socket callers connect to.
//!
//! The bus speaks JSONL in both directions. A caller connects, writes one
//! call envelope, and reads frames until a completion frame arrives. When a
//! completion carries a stream descriptor, the descriptor travels as
//! `SCM_RIGHTS` ancillary data on the same sendmsg as the frame bytes.

mod connection;
mod errors;
mod frames;
mod listener;

pub use self::connection::{CallRead, CallerConnection};
pub use self::errors::ListenerError;
pub use self::frames::{BusMessage, BusStatus, CallEnvelope, MAX_CALL_BYTES};
pub use self::listener::BusListener;

pub(crate) const BUS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bus");
