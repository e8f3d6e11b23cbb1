//! Method dispatch: object registry, argument policies, and dispatch errors.
//!
//! The registry is declarative. It resolves an (object, method) pair to a
//! method identifier and validates the call arguments against the method's
//! declared policy; the service owns the handler bodies so that all mutable
//! daemon state stays in one place.

mod curl;
mod errors;
mod registry;

pub use self::curl::{parse_reply, url_argument};
pub use self::errors::DispatchError;
pub use self::registry::{ArgKind, ArgSpec, MethodId, MethodSpec, ObjectRegistry, ObjectSpec};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
