//! Backend-agnostic code emission traits
//!
//! A `CodegenBackend` turns an interface shape into an encoded forwarder
//! module. The pipeline is:
//!   InterfaceShape → emit() → CompiledUnit → ModuleLoader::load() → ModuleHandle

use std::sync::atomic::{AtomicU64, Ordering};

use crate::invoke::InterfaceShape;

/// Error during code emission
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodegenError {
    /// The backend cannot express this shape
    #[error("Unsupported shape {shape}: {reason}")]
    UnsupportedShape {
        /// Shape description
        shape: String,
        /// Why it was rejected
        reason: String,
    },

    /// Internal backend failure
    #[error("Backend error: {0}")]
    BackendError(String),
}

/// An encoded code unit ready for loading
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    /// Unique unit name
    pub name: String,
    /// Encoded `ForwarderModule`
    pub bytes: Vec<u8>,
}

/// Pluggable code emitter
pub trait CodegenBackend: Send + Sync {
    /// Backend name (for diagnostics)
    fn name(&self) -> &str;

    /// Emit a forwarder module implementing `shape`
    fn emit(&self, shape: &InterfaceShape) -> Result<CompiledUnit, CodegenError>;
}

static UNIT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique unit name for a forwarder of `interface`
pub fn unit_name(interface: &str) -> String {
    let n = UNIT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("Fwd${}${}", interface, n)
}
