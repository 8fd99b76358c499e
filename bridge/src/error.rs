//! Bridge error types

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Errors returned by Bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Timed out after {timeout:?} waiting for service '{name}'")]
    ServiceTimeout { name: String, timeout: Duration },

    #[error("Timed out after {timeout:?} waiting for a message on '{channel}'")]
    MessageTimeout { channel: String, timeout: Duration },

    #[error("Invalid store path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Service '{name}' is not a {expected}")]
    ServiceType { name: String, expected: &'static str },

    #[error("Cannot merge a non-mapping value into '{path}'")]
    NotAMapping { path: String },

    #[error("Value at '{path}' has an unexpected shape: {message}")]
    ValueType { path: String, message: String },

    #[error("Cancelled while waiting for {what}")]
    Cancelled { what: String },

    #[error("Dispatcher channel closed")]
    DispatcherClosed,
}

impl BridgeError {
    /// Check if this error is a deadline expiry from `use_service` or `wait_for`
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            BridgeError::ServiceTimeout { .. } | BridgeError::MessageTimeout { .. }
        )
    }

    /// Get the elapsed deadline if this is a timeout
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            BridgeError::ServiceTimeout { timeout, .. } | BridgeError::MessageTimeout { timeout, .. } => {
                Some(*timeout)
            }
            _ => None,
        }
    }

    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        BridgeError::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias for Bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Which kind of callback failed during delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallbackKind {
    Subscriber,
    Watcher,
    Listener,
}

impl std::fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CallbackKind::Subscriber => "subscriber",
            CallbackKind::Watcher => "watcher",
            CallbackKind::Listener => "listener",
        };
        f.write_str(name)
    }
}

/// A delivery callback panicked
///
/// Never propagated to the publisher or writer. It is logged, counted, and
/// published on the diagnostics channel.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind} for '{target}' failed: {message}")]
pub struct SubscriberError {
    /// Channel name or store path the callback was attached to
    pub target: String,
    pub kind: CallbackKind,
    pub message: String,
}
