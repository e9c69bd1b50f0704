//! Runtime error types.

use std::time::Duration;

use edgewire_core::EdgeError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while running an edge server.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error raised by the dispatch engine (registration, cluster start, ...).
    #[error(transparent)]
    Edge(#[from] EdgeError),

    #[error("Edge server is already running")]
    AlreadyRunning,

    #[error("Edge server is not running")]
    NotRunning,

    /// A server that was shut down cannot be started again.
    #[error("Edge server has been shut down")]
    Stopped,

    /// Gateways or the cluster did not stop in time.
    #[error("Shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    /// Installing a signal handler failed.
    #[error("Signal handling failed: {0}")]
    Signal(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
