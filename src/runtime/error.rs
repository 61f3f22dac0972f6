//! Error types for the bridge.
//!
//! Conversion and proxy failures surface to script code as thrown `Error`
//! objects; initialization failures surface to the editor as strings. Both
//! are built from [`BridgeError`].

use thiserror::Error;

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors produced by the bridge, its hosts and its runtime shell.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// `execute` was called before a successful `init`.
    #[error("not initialized")]
    NotInitialized,

    /// The plugin library (or the host process image) could not be opened.
    #[error("library error: {0}")]
    Library(String),

    /// A symbol of the host import surface could not be resolved.
    #[error("missing host symbol: {name}")]
    MissingSymbol { name: &'static str },

    /// A host container handle no longer refers to a live container.
    #[error("host container is no longer available")]
    HostUnavailable,

    /// The host evaluator or command executor reported a failure.
    #[error("{0}")]
    Host(String),

    /// A script value has no host representation.
    #[error("cannot convert {0} to a Vim value")]
    Unsupported(&'static str),

    /// Conversion recursed past the depth ceiling.
    #[error("conversion depth exceeded maximum of {limit}")]
    TooDeep { limit: usize },

    /// Host dictionaries cannot hold zero-length keys.
    #[error("empty key is not allowed for a Vim Dictionary")]
    EmptyKey,

    /// The host allocator returned nothing.
    #[error("out of memory while allocating {0}")]
    Allocation(&'static str),

    /// A list store past the end of the list.
    #[error("list index out of range: {index} (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// A bridge entry point was called with unusable arguments.
    #[error("{0}")]
    InvalidArgument(String),

    /// Bridge bookkeeping diverged from the engine's view of the world.
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid plugin configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// File access for `load()` and log files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON configuration or snapshot error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Create a host-side failure from any message.
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host(message.into())
    }

    /// Create an internal invariant violation.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(BridgeError::NotInitialized.to_string(), "not initialized");
        assert_eq!(
            BridgeError::TooDeep { limit: 100 }.to_string(),
            "conversion depth exceeded maximum of 100"
        );
        assert_eq!(
            BridgeError::Unsupported("a function").to_string(),
            "cannot convert a function to a Vim value"
        );
        assert_eq!(
            BridgeError::MissingSymbol { name: "eval_expr" }.to_string(),
            "missing host symbol: eval_expr"
        );
    }
}
