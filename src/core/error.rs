//! Unified error handling for microframe
//!
//! Every component reports failures through [`FrameError`], so callers on
//! either side of the frame boundary match on one type.

use std::{fmt, time::Duration};

use super::instance::AppStatus;

/// Unified error types for the orchestration engine
#[derive(Debug, Clone, PartialEq)]
pub enum FrameError {
    /// Generic configuration errors (bad YAML, failed validation)
    Configuration(String),

    /// An application with the same name is already registered
    DuplicateName(String),

    /// The container an application should render into does not exist
    MissingContainer {
        name: String,
        selector: Option<String>,
    },

    /// The application URL is empty or unparsable
    InvalidUrl { name: String, url: String },

    /// The embedded resource did not signal readiness in time
    LoadTimeout { name: String, after: Duration },

    /// The embedded resource reported an error while loading
    LoadFailure { name: String, reason: String },

    /// No response arrived for a request in time
    RequestTimeout { method: String, after: Duration },

    /// The other side answered a request with a failure
    RequestFailed(String),

    /// The transport is closed or refused a message
    Transport(String),

    /// A message or request handler failed
    Handler(String),

    /// A lifecycle transition outside the state machine was attempted
    InvalidTransition {
        name: String,
        from: AppStatus,
        to: AppStatus,
    },

    /// Resource not found errors
    NotFound(String),

    /// Internal system errors
    Internal(String),
}

impl FrameError {
    /// Returns `true` for the errors surfaced synchronously on registration or load
    /// because of a bad descriptor.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FrameError::Configuration(_)
                | FrameError::DuplicateName(_)
                | FrameError::MissingContainer { .. }
                | FrameError::InvalidUrl { .. }
        )
    }

    /// Returns `true` for timeouts of either loads or requests.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::LoadTimeout { .. } | FrameError::RequestTimeout { .. }
        )
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            FrameError::DuplicateName(name) => {
                write!(f, "Configuration error: app {name} is already registered")
            }
            FrameError::MissingContainer { name, selector } => write!(
                f,
                "Configuration error: container {} for app {name} not found",
                selector.as_deref().unwrap_or("<default>")
            ),
            FrameError::InvalidUrl { name, url } => {
                write!(f, "Configuration error: invalid url {url:?} for app {name}")
            }
            FrameError::LoadTimeout { name, after } => {
                write!(f, "Load timeout: app {name} not ready after {}ms", after.as_millis())
            }
            FrameError::LoadFailure { name, reason } => {
                write!(f, "Load failed for app {name}: {reason}")
            }
            FrameError::RequestTimeout { method, after } => write!(
                f,
                "Request timeout: {method} got no response after {}ms",
                after.as_millis()
            ),
            FrameError::RequestFailed(msg) => write!(f, "Request failed: {msg}"),
            FrameError::Transport(msg) => write!(f, "Transport error: {msg}"),
            FrameError::Handler(msg) => write!(f, "Handler error: {msg}"),
            FrameError::InvalidTransition { name, from, to } => {
                write!(f, "Invalid transition for app {name}: {from} -> {to}")
            }
            FrameError::NotFound(msg) => write!(f, "Resource not found: {msg}"),
            FrameError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<serde_json::Error> for FrameError {
    fn from(err: serde_json::Error) -> Self {
        FrameError::Internal(format!("json encoding failed: {err}"))
    }
}

/// Result type alias for orchestration operations
pub type FrameResult<T> = std::result::Result<T, FrameError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> FrameResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> FrameResult<T> {
        self.map_err(|e| FrameError::Internal(format!("{context}: {e}")))
    }
}

/// Convenience macros for error creation
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::error::FrameError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::FrameError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::core::error::FrameError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::FrameError::Internal(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_taxonomy() {
        assert!(FrameError::DuplicateName("a".into()).is_configuration());
        assert!(FrameError::InvalidUrl {
            name: "a".into(),
            url: String::new()
        }
        .is_configuration());
        assert!(!FrameError::LoadFailure {
            name: "a".into(),
            reason: "boom".into()
        }
        .is_configuration());
        assert!(FrameError::RequestTimeout {
            method: "ping".into(),
            after: Duration::from_millis(10)
        }
        .is_timeout());
    }

    #[test]
    fn test_with_context() {
        let res: Result<(), &str> = Err("closed");
        let err = res.with_context("posting envelope").unwrap_err();
        assert_eq!(err.to_string(), "Internal error: posting envelope: closed");
    }

    #[test]
    fn test_macros() {
        let err = config_error!("app {} has no url", "a");
        assert_eq!(err, FrameError::Configuration("app a has no url".into()));
        let err = internal_error!("broken");
        assert_eq!(err, FrameError::Internal("broken".into()));
    }
}
