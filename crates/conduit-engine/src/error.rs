//! Error types for the Conduit engine
//!
//! Each concern keeps its own enum next to its code; this module collects
//! them and defines `DispatchError`, the error of the `DelegateFactory`
//! façade.

use thiserror::Error;

pub use crate::codegen::{CodegenError, FormatError};
pub use crate::delegate::GenerationError;
pub use crate::invoke::AdapterError;
pub use crate::loader::{LoadError, VerifyError};
pub use crate::reflect::ClassBuildError;

/// Errors creating forwarding objects
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The interface cannot be forwarded
    #[error("Malformed interface {interface}: {reason}")]
    MalformedInterface {
        /// Interface name
        interface: String,
        /// What is wrong with it
        reason: String,
    },

    /// No strategy could synthesize a forwarder
    #[error("No dispatch strategy for {interface}: {reason}")]
    StrategiesExhausted {
        /// Interface name
        interface: String,
        /// Last failure
        reason: String,
    },

    /// Generated synthesis failed (only surfaced when requested explicitly)
    #[error("Generated dispatch failed: {0}")]
    Generation(#[from] GenerationError),

    /// An adapter could not be built
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

/// Result alias for façade operations
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
