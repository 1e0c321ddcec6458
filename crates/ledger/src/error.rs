//! Error types for the ledger gateway.
//!
//! Every failure the gateway can observe is mapped onto [`LedgerError`]. The
//! read path (`check_access`) and the best-effort write path (`log_access`)
//! absorb these errors; `deploy` and the typed `try_*` variants surface them.
//!
//! # Error Types
//!
//! - [`LedgerError::Transport`] - endpoint unreachable or HTTP failure
//! - [`LedgerError::Rpc`] - the node answered with a JSON-RPC error object
//! - [`LedgerError::Timeout`] - a call exceeded its configured deadline
//! - [`LedgerError::NoAdminAccount`] - write attempted without a signing identity
//! - [`LedgerError::ContractUnbound`] - no contract address is known yet
//! - [`LedgerError::SequenceConflict`] - the ledger rejected the transaction nonce
//! - [`LedgerError::DeploymentFailed`] - contract deployment did not complete
//! - [`LedgerError::Io`] - the env file could not be read or written

use std::{path::PathBuf, sync::Arc, time::Duration};

use thiserror::Error;

/// A shareable boxed error for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors produced by the ledger gateway and its collaborators.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// The ledger endpoint could not be reached or the HTTP exchange failed.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
        /// The underlying error, when one is available.
        #[source]
        source: Option<BoxError>,
    },

    /// The node returned a JSON-RPC error object.
    #[error("RPC error ({code}): {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message reported by the node.
        message: String,
    },

    /// A ledger call exceeded its deadline.
    #[error("Ledger call timed out after {}ms", elapsed.as_millis())]
    Timeout {
        /// The deadline that was exceeded.
        elapsed: Duration,
    },

    /// A write was attempted without a loaded admin signing identity.
    #[error("No admin account loaded; ledger writes are disabled")]
    NoAdminAccount,

    /// An operation required a contract address but none is bound.
    #[error("Consent contract is not bound to an address")]
    ContractUnbound,

    /// `deploy` was called on a gateway that is already bound.
    #[error("Consent contract already bound at {address}")]
    AlreadyBound {
        /// The address the gateway is bound to.
        address: String,
    },

    /// The ledger rejected a transaction because its nonce was already used.
    #[error("Sequence conflict for nonce {nonce}: {message}")]
    SequenceConflict {
        /// The nonce that was rejected.
        nonce: u64,
        /// Message reported by the ledger.
        message: String,
    },

    /// Contract deployment failed before the address could be bound.
    #[error("Deployment failed: {reason}")]
    DeploymentFailed {
        /// Why the deployment failed.
        reason: String,
    },

    /// Signing or signature recovery failed.
    #[error("Signing error: {0}")]
    Signing(String),

    /// A value could not be encoded or decoded (hex, ABI, RPC payloads).
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The circuit breaker is open and the call was rejected without I/O.
    #[error("Ledger circuit breaker is open")]
    CircuitOpen,

    /// Invalid gateway or logger configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Reading or writing a local file failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl LedgerError {
    /// Creates a new `Transport` error with the given message.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into(), source: None }
    }

    /// Creates a new `Transport` error with a message and source error.
    #[must_use]
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Encoding` error.
    #[must_use]
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding(message.into())
    }

    /// Creates a new `DeploymentFailed` error.
    #[must_use]
    pub fn deployment_failed(reason: impl Into<String>) -> Self {
        Self::DeploymentFailed { reason: reason.into() }
    }

    /// Returns `true` for failures that may succeed if the operation is retried.
    ///
    /// Transport faults, timeouts, an open breaker and nonce conflicts are
    /// transient. Missing identity or binding, encoding and configuration
    /// problems are not: retrying them cannot change the outcome.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. }
            | Self::Timeout { .. }
            | Self::CircuitOpen
            | Self::SequenceConflict { .. } => true,
            // -32000 is the generic server error most nodes use for pool rejections.
            Self::Rpc { code, .. } => *code == -32000,
            _ => false,
        }
    }

    /// Returns `true` if this failure means the ledger itself could not be
    /// consulted, as opposed to the gateway lacking an identity or binding.
    #[must_use]
    pub fn is_unavailability(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Rpc { .. } | Self::Timeout { .. } | Self::CircuitOpen
        )
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric field is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// Minimum accepted value.
        min: String,
        /// The rejected value.
        value: String,
    },

    /// A duration or quantity must be strictly positive.
    #[error("{field} must be positive, got {value}")]
    MustBePositive {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A field could not be parsed or is otherwise invalid.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}
