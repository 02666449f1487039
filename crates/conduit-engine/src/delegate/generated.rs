//! Generated dispatch
//!
//! Emits a forwarder module for the interface shape, loads it through the
//! `ModuleLoader` and wraps the linked bodies in a forwarding class. The
//! class owns the module handle; nothing else keeps it alive.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{delegate_state, StrategyKind, SynthesizedFactory};
use crate::codegen::{CodegenBackend, CodegenError};
use crate::invoke::InterfaceShape;
use crate::loader::{LoadContext, LoadError, ModuleLoader};
use crate::probe::Backend;
use crate::reflect::{ClassBuildError, ClassBuilder, Interface};

/// Why generated synthesis failed
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    /// The host cannot emit code
    #[error("Code generation unavailable on this host")]
    Unavailable,

    /// A recent attempt for the shape failed and its retry delay has not
    /// expired
    #[error("Generation deferred until the retry delay expires")]
    Deferred,

    /// The backend rejected the shape
    #[error(transparent)]
    Codegen(#[from] CodegenError),

    /// The loader rejected the unit or has no primitive
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The forwarding class could not be built
    #[error("Forwarding class rejected: {0}")]
    Class(#[from] ClassBuildError),
}

/// Code-generating forwarding
pub struct GeneratedDispatchStrategy {
    backend: Arc<dyn CodegenBackend>,
    loader: Arc<ModuleLoader>,
}

impl GeneratedDispatchStrategy {
    /// Strategy emitting with `backend` and loading with `loader`
    pub fn new(backend: Arc<dyn CodegenBackend>, loader: Arc<ModuleLoader>) -> Self {
        Self { backend, loader }
    }

    /// Code emitter
    pub fn backend(&self) -> &Arc<dyn CodegenBackend> {
        &self.backend
    }

    /// Module loader
    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    /// Whether the host can emit code
    pub fn is_available(&self) -> bool {
        self.loader.probe().is_available(Backend::Codegen)
    }

    /// Emit, load and wrap a forwarder for `interface`
    pub fn synthesize(
        &self,
        interface: &Arc<Interface>,
        shape: &InterfaceShape,
    ) -> Result<Arc<SynthesizedFactory>, GenerationError> {
        if !self.is_available() {
            return Err(GenerationError::Unavailable);
        }
        let unit = self.backend.emit(shape)?;
        let module = self.loader.load(&unit.bytes, &LoadContext::new(interface))?;

        let mut builder = ClassBuilder::new(module.name())
            .module(interface.module())
            .implements(interface);
        for (index, method) in interface.methods().iter().enumerate() {
            let module = module.clone();
            builder = builder.method(
                method.name(),
                method.params(),
                method.ret().clone(),
                move |this, args| {
                    let state = delegate_state(this)?;
                    module.forward(index, || state.supplier().get(), args)
                },
            );
        }
        let class = builder.build()?;

        debug!(
            interface = interface.name(),
            unit = module.name(),
            backend = self.backend.name(),
            "generated forwarder synthesized"
        );
        Ok(Arc::new(SynthesizedFactory::new(
            StrategyKind::Generated,
            shape.clone(),
            class,
            Some(module),
        )))
    }
}

impl fmt::Debug for GeneratedDispatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedDispatchStrategy")
            .field("backend", &self.backend.name())
            .field("loader", &self.loader)
            .finish()
    }
}
