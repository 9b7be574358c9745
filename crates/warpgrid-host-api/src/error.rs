use thiserror::Error;

/// Name carried by generic host errors.
pub const ERROR: &str = "Error";
/// Name carried by host type errors (wrong argument shapes, released locks).
pub const TYPE_ERROR: &str = "TypeError";
/// Name carried by host range errors (out-of-range numeric arguments).
pub const RANGE_ERROR: &str = "RangeError";
/// Name carried by operations on objects in the wrong lifecycle state.
pub const INVALID_STATE_ERROR: &str = "InvalidStateError";

/// A host-side error object.
///
/// Mirrors the host's `Error` shape: a constructor name plus a message.
/// Errors cross the bridge by value, so this type is cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct HostError {
    name: String,
    message: String,
}

impl HostError {
    /// A plain `Error`.
    pub fn new(message: impl Into<String>) -> Self {
        Self::named(ERROR, message)
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::named(TYPE_ERROR, message)
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Self::named(RANGE_ERROR, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::named(INVALID_STATE_ERROR, message)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the host rejected the operation because the target object had
    /// already finished (e.g. cancelling a closed stream).
    pub fn is_invalid_state(&self) -> bool {
        self.name == INVALID_STATE_ERROR
    }
}

impl From<&str> for HostError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HostError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}
