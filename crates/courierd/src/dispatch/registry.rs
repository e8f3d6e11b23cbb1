//! Declarative object registry with per-method argument policies.

use serde_json::{Map, Value};

use super::curl;
use super::errors::DispatchError;

/// JSON types accepted by an argument policy entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// A JSON integer.
    Integer,
    /// A JSON string.
    String,
}

impl ArgKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::String => value.is_string(),
        }
    }

    fn expected(self) -> &'static str {
        match self {
            Self::Integer => "an integer",
            Self::String => "a string",
        }
    }
}

/// One entry in a method's argument policy.
#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    /// Argument name as it appears in the call's `args` object.
    pub name: &'static str,
    /// Required JSON type when the argument is present.
    pub kind: ArgKind,
    /// Whether the argument must be present.
    pub required: bool,
}

/// Identifies a resolved method for the service's handler match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodId {
    /// `curl.get`: fetch a URL, reply with its body, stream heartbeats.
    CurlGet,
}

/// A method exposed on a registered object.
#[derive(Debug)]
pub struct MethodSpec {
    /// Method name.
    pub name: &'static str,
    /// Handler identifier matched by the service.
    pub id: MethodId,
    /// Argument policy validated before the handler runs.
    pub policy: &'static [ArgSpec],
}

impl MethodSpec {
    /// Validates call arguments against this method's policy.
    ///
    /// Arguments not named by the policy are ignored, mirroring schema
    /// filtering on message buses: the policy describes what the method
    /// consumes, not an exhaustive schema.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::MissingArgument`] or
    /// [`DispatchError::InvalidArgumentType`].
    pub fn validate_args(&self, args: &Map<String, Value>) -> Result<(), DispatchError> {
        for spec in self.policy {
            match args.get(spec.name) {
                Some(value) if spec.kind.matches(value) => {}
                Some(_) => {
                    return Err(DispatchError::InvalidArgumentType {
                        name: spec.name,
                        expected: spec.kind.expected(),
                    });
                }
                None if spec.required => {
                    return Err(DispatchError::MissingArgument { name: spec.name });
                }
                None => {}
            }
        }
        Ok(())
    }
}

/// An object registered on the bus.
#[derive(Debug)]
pub struct ObjectSpec {
    /// Object name callers address.
    pub name: &'static str,
    /// Methods exposed by the object.
    pub methods: &'static [MethodSpec],
}

/// Registry of every object the daemon exposes.
#[derive(Debug)]
pub struct ObjectRegistry {
    objects: &'static [ObjectSpec],
}

impl ObjectRegistry {
    /// Builds the registry with the courier surface: the `curl` object.
    pub fn courier_surface() -> Self {
        Self {
            objects: curl::OBJECTS,
        }
    }

    /// Resolves an (object, method) pair to its method spec.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownObject`] or
    /// [`DispatchError::UnknownMethod`].
    pub fn resolve(&self, object: &str, method: &str) -> Result<&MethodSpec, DispatchError> {
        let spec = self
            .objects
            .iter()
            .find(|candidate| candidate.name == object)
            .ok_or_else(|| DispatchError::unknown_object(object))?;
        spec.methods
            .iter()
            .find(|candidate| candidate.name == method)
            .ok_or_else(|| DispatchError::unknown_method(object, method))
    }
}
