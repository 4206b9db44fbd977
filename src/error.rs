// src/error.rs
// Error taxonomy shared by the simulation core and its HTTP shell.

use thiserror::Error;

/// The primary error type used across the discovery core.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The text-generation service failed (transport, auth, rate limit, timeout).
    #[error("service error: {message}")]
    Service { message: String },

    /// Model output could not be turned into structured data.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structured data is missing required fields or holds out-of-range values.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown simulation id.
    #[error("simulation not found: {0}")]
    NotFound(String),

    /// A command was issued outside the state it requires.
    #[error("simulation {id} is {actual}, expected {expected}")]
    InvalidState {
        id: String,
        expected: String,
        actual: String,
    },

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// A supervised background task panicked or was aborted.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DiscoveryError {
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
