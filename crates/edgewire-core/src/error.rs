//! Unified error types for the Edgewire core.
//!
//! Every failure that can surface while resolving, executing or forwarding a
//! request is an [`EdgeError`]. All of them funnel into the process-wide
//! [`ErrHandler`](crate::ErrHandler) supplied at startup; only registration
//! errors are returned synchronously to the caller.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the dispatch and forwarding engine.
#[derive(Debug, Clone, Error)]
pub enum EdgeError {
    // =========================================================================
    // Resolution
    // =========================================================================
    /// No contract matches the inbound request.
    #[error("no handler found for route: {route}")]
    NoHandler {
        /// The route (or predicate) that failed to resolve.
        route: String,
    },

    /// The gateway could not turn the raw bytes into an executable request.
    #[error("dispatch failed: {0}")]
    DispatchFailed(String),

    // =========================================================================
    // Codec
    // =========================================================================
    /// Decoding the incoming message failed.
    #[error("decode incoming message failed: {0}")]
    Decode(String),

    /// Encoding the outgoing message failed.
    #[error("encode outgoing message failed: {0}")]
    Encode(String),

    // =========================================================================
    // Connection
    // =========================================================================
    /// A write was attempted on a connection that is already closed.
    #[error("write to closed connection")]
    WriteToClosedConn,

    /// Writing to the connection failed.
    #[error("connection write failed: {0}")]
    Write(String),

    // =========================================================================
    // Forwarding
    // =========================================================================
    /// The contract's edge selector failed.
    #[error("edge selector failed: {0}")]
    Selector(String),

    /// Transmitting to (or receiving from) the target member failed.
    #[error("forwarding to '{target}' failed: {reason}")]
    Forward {
        /// Server id of the target member.
        target: String,
        /// Reason for failure.
        reason: String,
    },

    /// The target member did not answer before the deadline.
    #[error("forwarding to '{target}' timed out after {timeout:?}")]
    ForwardTimeout {
        /// Server id of the target member.
        target: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// A forwarded request resolved to a contract that would forward again.
    #[error("contract '{contract}' would forward again to '{target}', multi-hop is not supported")]
    MultiHop {
        /// The contract id.
        contract: String,
        /// The member the selector picked on the target.
        target: String,
    },

    // =========================================================================
    // Cluster
    // =========================================================================
    /// A contract needs a cluster but none was configured.
    #[error("cluster is not set")]
    ClusterNotSet,

    /// The requested member is not known to the cluster.
    #[error("cluster member not found: {0}")]
    MemberNotFound(String),

    /// Generic cluster transport failure.
    #[error("cluster error: {0}")]
    Cluster(String),

    /// The membership store failed.
    #[error("cluster store error: {0}")]
    Store(String),

    // =========================================================================
    // Registration
    // =========================================================================
    /// A service with the same name is already registered.
    #[error("service '{0}' is already registered")]
    DuplicateService(String),

    /// A contract with the same id already exists in the service.
    #[error("contract '{contract}' is already registered in service '{service}'")]
    DuplicateContract {
        /// The service name.
        service: String,
        /// The duplicated contract id.
        contract: String,
    },

    /// A route pattern is malformed or conflicts with another one.
    #[error("invalid route '{route}': {reason}")]
    InvalidRoute {
        /// The offending route pattern.
        route: String,
        /// Reason for rejection.
        reason: String,
    },

    // =========================================================================
    // Misc
    // =========================================================================
    /// A handler panicked; the request was abandoned.
    #[error("handler panicked: {message}")]
    Panic {
        /// The panic payload, if it was a string.
        message: String,
        /// Captured stack trace.
        backtrace: String,
    },

    /// Application-defined error.
    #[error("{0}")]
    Custom(String),
}

impl EdgeError {
    /// Creates a custom error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a no-handler error for the given route.
    pub fn no_handler(route: impl Into<String>) -> Self {
        Self::NoHandler {
            route: route.into(),
        }
    }

    /// Creates a forwarding error.
    pub fn forward(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Forward {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an invalid route error.
    pub fn invalid_route(route: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRoute {
            route: route.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors raised while forwarding to a peer.
    pub fn is_forwarding(&self) -> bool {
        matches!(
            self,
            Self::Selector(_) | Self::Forward { .. } | Self::ForwardTimeout { .. } | Self::MultiHop { .. }
        )
    }

    /// HTTP-like status code used for the generic failure response.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoHandler { .. } => 404,
            Self::Decode(_) => 400,
            Self::Selector(_) | Self::Forward { .. } | Self::MultiHop { .. } => 502,
            Self::ForwardTimeout { .. } => 504,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for EdgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type for core operations.
pub type EdgeResult<T> = Result<T, EdgeError>;
