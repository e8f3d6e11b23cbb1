//! The `curl` object: declaration and argument helpers for `curl.get`.

use serde_json::{Map, Value};

use super::errors::DispatchError;
use super::registry::{ArgKind, ArgSpec, MethodId, MethodSpec, ObjectSpec};

/// Argument policy for `curl.get`: `id` is accepted but unused, `url` is
/// required.
const GET_POLICY: &[ArgSpec] = &[
    ArgSpec {
        name: "id",
        kind: ArgKind::Integer,
        required: false,
    },
    ArgSpec {
        name: "url",
        kind: ArgKind::String,
        required: true,
    },
];

const CURL_METHODS: &[MethodSpec] = &[MethodSpec {
    name: "get",
    id: MethodId::CurlGet,
    policy: GET_POLICY,
}];

/// Every object the daemon registers on the bus.
pub(super) const OBJECTS: &[ObjectSpec] = &[ObjectSpec {
    name: "curl",
    methods: CURL_METHODS,
}];

/// Extracts the `url` argument after policy validation has passed.
///
/// # Errors
///
/// Returns [`DispatchError::MissingArgument`] if validation was skipped and
/// the argument is absent or not a string.
pub fn url_argument(args: &Map<String, Value>) -> Result<&str, DispatchError> {
    args.get("url")
        .and_then(Value::as_str)
        .ok_or(DispatchError::MissingArgument { name: "url" })
}

/// Interprets a fetched body as the structured reply payload.
///
/// A body that is not valid JSON degrades to an empty object rather than
/// failing the handshake; the raw body still streams verbatim afterwards.
pub fn parse_reply(payload: &str) -> Value {
    serde_json::from_str(payload).unwrap_or_else(|_| Value::Object(Map::new()))
}
