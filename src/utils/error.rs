/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/5/25
******************************************************************************/

use std::error::Error;
use std::fmt;

/// Raised when a method receives an argument outside of its accepted domain.
///
/// Setters of `ConnectionDetails`, `ConnectionOptions`, `Subscription` and the MPN value
/// objects return this error synchronously, before anything reaches the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalArgumentException {
    details: String,
}

impl IllegalArgumentException {
    /// Creates a new exception carrying the given description.
    pub fn new(msg: &str) -> IllegalArgumentException {
        IllegalArgumentException {
            details: msg.to_string(),
        }
    }
}

impl fmt::Display for IllegalArgumentException {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.details)
    }
}

impl Error for IllegalArgumentException {
    fn description(&self) -> &str {
        &self.details
    }
}

/// Raised when a method is invoked while the object is not in a state that allows it,
/// e.g. subscribing a `Subscription` that is already active or connecting without a
/// server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalStateException {
    details: String,
}

impl IllegalStateException {
    /// Creates a new exception carrying the given description.
    pub fn new(msg: &str) -> IllegalStateException {
        IllegalStateException {
            details: msg.to_string(),
        }
    }
}

impl fmt::Display for IllegalStateException {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.details)
    }
}

impl Error for IllegalStateException {
    fn description(&self) -> &str {
        &self.details
    }
}

/// Failures detected inside the session engine.
///
/// None of these ever reaches the application directly: the engine resolves them into
/// status changes and, for server-attributable failures, a server error notification.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// An inbound protocol line could not be parsed.
    #[error("Malformed line from server: {0}")]
    Parse(String),
    /// The server sent something that contradicts the protocol state.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
    /// A transport primitive failed.
    #[error("Transport error: {0}")]
    Transport(String),
    /// The default environment needs a running tokio runtime.
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

impl SessionError {
    /// Error code reported through `on_server_error` when this failure ends the session.
    pub fn code(&self) -> i32 {
        match self {
            SessionError::Parse(_) | SessionError::ProtocolViolation(_) => 61,
            SessionError::Transport(_) | SessionError::NoRuntime(_) => 0,
        }
    }
}
