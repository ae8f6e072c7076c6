//! Error handling for calcgraph
//!
//! This module defines the crate error type and a Result alias used by the
//! graph, the calculators and the configuration loaders.

use thiserror::Error;

/// Main error type for calcgraph operations
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Malformed graph configuration, detected before any node runs
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stream or port contract was broken while the graph was running
    #[error("Contract violation: {0}")]
    Contract(String),

    /// A packet holds a different type than the one requested
    #[error("Type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// A calculator reported a failure from `open`, `process` or `close`
    #[error("Calculator {node} failed: {message}")]
    Calculator { node: String, message: String },

    /// Named item (stream, side packet, calculator, executor) is unknown
    #[error("Not found: {0}")]
    NotFound(String),

    /// Named item is declared twice
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Operation is not valid in the current run state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A graph input stream queue is full and the add mode does not wait
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Input throttling left the graph without runnable work
    #[error("Deadlock: {0}")]
    Deadlock(String),

    /// Cooperative stop signal from a calculator; closes the node
    #[error("Calculator requested stop")]
    Stop,

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Error::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a calculator failure for `node`.
    pub fn calculator(node: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Calculator {
            node: node.into(),
            message: message.into(),
        }
    }

    /// The innermost error beneath any added context.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::WithContext { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True for the cooperative stop signal, looking through context.
    pub fn is_stop(&self) -> bool {
        match self {
            Error::Stop => true,
            Error::WithContext { source, .. } => source.is_stop(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias for calcgraph operations
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("stream \"video\"".to_string());
        assert_eq!(err.to_string(), "Not found: stream \"video\"");
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::Config("duplicate producer".to_string());
        let with_ctx = err.with_context("Failed to validate graph");
        assert!(with_ctx.to_string().contains("Failed to validate graph"));
        assert!(with_ctx.to_string().contains("duplicate producer"));
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = Error::TypeMismatch {
            expected: "i32",
            actual: "alloc::string::String",
        };
        assert!(err.to_string().contains("expected i32"));
        assert!(err.to_string().contains("String"));
    }

    #[test]
    fn test_stop_through_context() {
        assert!(Error::Stop.is_stop());
        assert!(Error::Stop.with_context("source").is_stop());
        assert!(!Error::calculator("a", "b").is_stop());
    }
}
