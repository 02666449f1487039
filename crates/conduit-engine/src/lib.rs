//! Conduit Engine
//!
//! Member adapters and forwarding objects over a small host object model:
//! - **Reflection**: classes, interfaces, members and instances (`reflect` module)
//! - **Adapters**: members adapted to functional shapes (`invoke` module)
//! - **Forwarding objects**: interface implementations delegating to a supplier
//!   (`delegate` module), built reflectively or from generated forwarder modules
//!   (`codegen` and `loader` modules)
//!
//! # Example
//!
//! ```rust,ignore
//! use conduit_engine::{DelegateFactory, InterfaceBuilder, ValueType, invoke};
//!
//! let iface = InterfaceBuilder::new("Source")
//!     .method("getInt", &[], ValueType::I32)
//!     .build()?;
//!
//! let factory = DelegateFactory::default();
//! let wrapper = factory.create_wrapper(&iface, move || current_backing())?;
//!
//! // Every call asks the supplier for the current backing instance
//! let n = invoke(&wrapper, "getInt", &[])?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Host reflection: classes, interfaces, members, instances
pub mod reflect;

/// Member adapters and functional shapes
pub mod invoke;

/// Host capability probing
pub mod probe;

/// Weak per-shape factory cache
pub mod cache;

/// Forwarder module emission
pub mod codegen;

/// Forwarder module verification and loading
pub mod loader;

/// Forwarding objects and dispatch strategies
pub mod delegate;

/// Dispatch configuration
pub mod config;

/// Error types
pub mod error;

pub use conduit_sdk;
pub use conduit_sdk::{CallResult, FromValue, ObjectRef, Thrown, ThrownKind, ToValue, Value, ValueType};

// ============================================================================
// Re-exports
// ============================================================================

pub use reflect::{
    // Types
    Class, ClassBuilder, Interface, InterfaceBuilder, Instance, ClassRegistry,
    // Members
    Constructor, Field, Method, Visibility,
    // Access and calls
    Lookup, invoke, receiver_instance,
};

pub use invoke::{
    Adapter, AdapterFlavor, AdapterRequest, FieldAccess, FunctionalShape, InterfaceShape,
    MemberAdapterBuilder, MemberDescriptor,
};

pub use probe::{Backend, CapabilityProbe, HostEnvironment, NativeHost, SimulatedHost};

pub use cache::{CacheStats, ShapeCache, ShapeState};

pub use codegen::{CodegenBackend, CompiledUnit, StubBackend, TemplateBackend};

pub use loader::{LoadContext, ModuleHandle, ModuleLoader};

pub use delegate::{
    factory_of, strategy_of, supplier_fn, DelegateFactory, DispatchStrategy, InstanceSupplier,
    StrategyKind, SynthesizedFactory,
};

pub use config::DispatchConfig;

pub use error::{
    AdapterError, ClassBuildError, CodegenError, DispatchError, DispatchResult, GenerationError,
    LoadError,
};
