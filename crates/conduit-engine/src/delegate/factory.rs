//! DelegateFactory: the forwarding-object façade
//!
//! Validates the interface, picks a strategy, synthesizes (or reuses) the
//! factory for the interface shape through the `ShapeCache`, and wraps the
//! supplier in a new forwarding instance.
//!
//! Strategy choice per call:
//! 1. Generated, when the config prefers it, the host can emit code and the
//!    shape is outside its retry window.
//! 2. Reflective otherwise, or when generation fails for this shape.

use std::sync::Arc;

use conduit_sdk::{CallResult, Value};
use tracing::debug;

use super::{
    supplier_fn, DispatchStrategy, FailureLedger, GeneratedDispatchStrategy, GenerationError,
    InstanceSupplier, ReflectiveDispatchStrategy, StrategyKind, SynthesizedFactory,
};
use crate::cache::{CacheStats, ShapeCache, ShapeState};
use crate::codegen::{CodegenBackend, TemplateBackend};
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::invoke::{InterfaceShape, MemberAdapterBuilder};
use crate::loader::ModuleLoader;
use crate::probe::{Backend, CapabilityProbe, HostEnvironment};
use crate::reflect::{ClassRegistry, Interface};

type CacheKey = (InterfaceShape, StrategyKind);

/// Creates forwarding objects for interfaces
#[derive(Debug)]
pub struct DelegateFactory {
    config: DispatchConfig,
    probe: Arc<CapabilityProbe>,
    loader: Arc<ModuleLoader>,
    generated: DispatchStrategy,
    reflective: DispatchStrategy,
    cache: ShapeCache<CacheKey, SynthesizedFactory>,
    failures: FailureLedger,
}

impl Default for DelegateFactory {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

impl DelegateFactory {
    /// Factory probing the native host, emitting with `TemplateBackend`
    pub fn new(config: DispatchConfig) -> Self {
        let probe = Arc::new(CapabilityProbe::native(&config));
        let backend = Arc::new(TemplateBackend::new(config.max_generated_arity));
        Self::assemble(config, probe, backend, Arc::new(ClassRegistry::new()))
    }

    /// Factory over an explicit host and code emitter
    pub fn with_parts(
        config: DispatchConfig,
        host: Arc<dyn HostEnvironment>,
        backend: Arc<dyn CodegenBackend>,
    ) -> Self {
        Self::with_registry(config, host, backend, Arc::new(ClassRegistry::new()))
    }

    /// Factory whose reflective adapters check subtyping against `registry`
    pub fn with_registry(
        config: DispatchConfig,
        host: Arc<dyn HostEnvironment>,
        backend: Arc<dyn CodegenBackend>,
        registry: Arc<ClassRegistry>,
    ) -> Self {
        Self::assemble(config, Arc::new(CapabilityProbe::new(host)), backend, registry)
    }

    fn assemble(
        config: DispatchConfig,
        probe: Arc<CapabilityProbe>,
        backend: Arc<dyn CodegenBackend>,
        registry: Arc<ClassRegistry>,
    ) -> Self {
        let loader = Arc::new(ModuleLoader::new(probe.clone()));
        let generated =
            DispatchStrategy::Generated(GeneratedDispatchStrategy::new(backend, loader.clone()));
        let reflective = DispatchStrategy::Reflective(ReflectiveDispatchStrategy::new(
            MemberAdapterBuilder::new(registry),
        ));
        let failures = FailureLedger::new(config.retry_backoff(), config.max_retry_backoff());
        Self {
            config,
            probe,
            loader,
            generated,
            reflective,
            cache: ShapeCache::new(),
            failures,
        }
    }

    /// Forwarding object for `interface` delegating to whatever `supplier`
    /// returns at call time. The supplier is not called here.
    pub fn create_wrapper<F>(
        &self,
        interface: &Arc<Interface>,
        supplier: F,
    ) -> Result<Value, DispatchError>
    where
        F: Fn() -> CallResult + Send + Sync + 'static,
    {
        self.create_wrapper_from(interface, supplier_fn(supplier))
    }

    /// `create_wrapper` with a shared supplier
    pub fn create_wrapper_from(
        &self,
        interface: &Arc<Interface>,
        supplier: Arc<dyn InstanceSupplier>,
    ) -> Result<Value, DispatchError> {
        validate(interface)?;
        let shape = InterfaceShape::of(interface);

        if self.generated_eligible(&shape) {
            // Failures are recorded inside the synthesis, under the slot lock
            if let Ok(factory) = self.synthesize(StrategyKind::Generated, interface, &shape, true) {
                return Ok(factory.instantiate(supplier));
            }
        }

        let factory = self
            .synthesize(StrategyKind::Reflective, interface, &shape, false)
            .map_err(|e| DispatchError::StrategiesExhausted {
                interface: interface.name().to_string(),
                reason: e.to_string(),
            })?;
        Ok(factory.instantiate(supplier))
    }

    /// Forwarding object built by `kind` only. Failures are returned, not
    /// recovered.
    pub fn create_wrapper_with(
        &self,
        kind: StrategyKind,
        interface: &Arc<Interface>,
        supplier: Arc<dyn InstanceSupplier>,
    ) -> Result<Value, DispatchError> {
        validate(interface)?;
        let shape = InterfaceShape::of(interface);
        if !self.strategy(kind).is_available() {
            return Err(GenerationError::Unavailable.into());
        }
        let factory = self.synthesize(kind, interface, &shape, false)?;
        Ok(factory.instantiate(supplier))
    }

    /// Strategy `create_wrapper` would try first for `interface` right now
    pub fn strategy_for(&self, interface: &Interface) -> StrategyKind {
        if self.generated_eligible(&InterfaceShape::of(interface)) {
            StrategyKind::Generated
        } else {
            StrategyKind::Reflective
        }
    }

    /// Cache state of the `kind` factory for `interface`
    pub fn shape_state(&self, interface: &Interface, kind: StrategyKind) -> ShapeState {
        self.cache.state(&(InterfaceShape::of(interface), kind))
    }

    /// Cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop cache slots whose factory is gone
    pub fn purge(&self) -> usize {
        let removed = self.cache.purge();
        if removed > 0 {
            debug!(removed, "purged dead shape cache slots");
        }
        removed
    }

    /// Capability probe
    pub fn probe(&self) -> &Arc<CapabilityProbe> {
        &self.probe
    }

    /// Module loader used by generated dispatch
    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    /// Generation failure ledger
    pub fn failures(&self) -> &FailureLedger {
        &self.failures
    }

    /// Active configuration
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    fn generated_eligible(&self, shape: &InterfaceShape) -> bool {
        self.config.prefer_generated
            && self.probe.is_available(Backend::Codegen)
            && self.failures.should_attempt(shape)
    }

    fn strategy(&self, kind: StrategyKind) -> &DispatchStrategy {
        match kind {
            StrategyKind::Generated => &self.generated,
            StrategyKind::Reflective => &self.reflective,
        }
    }

    /// Synthesize through the cache. Callers that waited on a failed
    /// synthesis see its ledger entry once they hold the slot lock; with
    /// `respect_backoff` they give up instead of repeating the attempt.
    fn synthesize(
        &self,
        kind: StrategyKind,
        interface: &Arc<Interface>,
        shape: &InterfaceShape,
        respect_backoff: bool,
    ) -> Result<Arc<SynthesizedFactory>, DispatchError> {
        let strategy = self.strategy(kind);
        let generated = kind == StrategyKind::Generated;
        self.cache.get_or_create::<DispatchError, _>(&(shape.clone(), kind), || {
            if generated && respect_backoff && !self.failures.should_attempt(shape) {
                return Err(GenerationError::Deferred.into());
            }
            debug!(interface = interface.name(), strategy = %kind, "synthesizing forwarder");
            match strategy.synthesize(interface, shape) {
                Ok(factory) => {
                    if generated {
                        self.failures.record_success(shape);
                    }
                    Ok(factory)
                }
                Err(e) => {
                    if generated {
                        self.failures.record_failure(shape, &e);
                    }
                    Err(e)
                }
            }
        })
    }
}

fn validate(interface: &Interface) -> Result<(), DispatchError> {
    let reason = if interface.name().is_empty() {
        "interface name is empty"
    } else if interface.methods().is_empty() {
        "interface declares no methods"
    } else {
        return Ok(());
    };
    Err(DispatchError::MalformedInterface {
        interface: interface.name().to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::StubBackend;
    use crate::probe::SimulatedHost;
    use crate::reflect::{ClassBuilder, InterfaceBuilder};
    use conduit_sdk::ValueType;

    fn greeter() -> Arc<Interface> {
        InterfaceBuilder::new("Greeter")
            .method("greet", &[ValueType::Str], ValueType::Str)
            .build()
            .unwrap()
    }

    fn backing(iface: &Arc<Interface>) -> Value {
        ClassBuilder::new("Polite")
            .implements(iface)
            .method("greet", &[ValueType::Str], ValueType::Str, |_, a| {
                Ok(Value::str(&format!("hello {}", a[0].as_str().unwrap_or("?"))))
            })
            .build()
            .unwrap()
            .new_instance(&[])
            .unwrap()
    }

    fn simulated(backend: Arc<dyn CodegenBackend>) -> DelegateFactory {
        DelegateFactory::with_parts(
            DispatchConfig::default(),
            Arc::new(SimulatedHost::new()),
            backend,
        )
    }

    #[test]
    fn test_prefers_generated() {
        let factory = simulated(Arc::new(TemplateBackend::default()));
        let iface = greeter();
        assert_eq!(factory.strategy_for(&iface), StrategyKind::Generated);
        let target = backing(&iface);
        let wrapper = factory.create_wrapper(&iface, move || Ok(target.clone())).unwrap();
        assert_eq!(super::super::strategy_of(&wrapper), Some(StrategyKind::Generated));
        assert_eq!(
            crate::reflect::invoke(&wrapper, "greet", &[Value::str("bob")]).unwrap(),
            Value::str("hello bob")
        );
        assert_eq!(
            factory.shape_state(&iface, StrategyKind::Generated),
            ShapeState::Ready
        );
    }

    #[test]
    fn test_native_factory_forwards() {
        let factory = DelegateFactory::new(DispatchConfig::default());
        assert_eq!(factory.probe().host().name(), "native");

        // Codegen may be switched off by the environment; either strategy forwards
        let iface = greeter();
        let target = backing(&iface);
        let wrapper = factory.create_wrapper(&iface, move || Ok(target.clone())).unwrap();
        assert_eq!(
            crate::reflect::invoke(&wrapper, "greet", &[Value::str("ann")]).unwrap(),
            Value::str("hello ann")
        );
    }

    #[test]
    fn test_reflective_only_config() {
        let factory = DelegateFactory::with_parts(
            DispatchConfig::reflective_only(),
            Arc::new(SimulatedHost::new()),
            Arc::new(TemplateBackend::default()),
        );
        let iface = greeter();
        assert_eq!(factory.strategy_for(&iface), StrategyKind::Reflective);
        let wrapper = factory.create_wrapper(&iface, || Ok(Value::Null)).unwrap();
        assert_eq!(super::super::strategy_of(&wrapper), Some(StrategyKind::Reflective));
    }

    #[test]
    fn test_fallback_enters_retry_window() {
        let factory = simulated(Arc::new(StubBackend));
        let iface = greeter();
        let wrapper = factory.create_wrapper(&iface, || Ok(Value::Null)).unwrap();
        assert_eq!(super::super::strategy_of(&wrapper), Some(StrategyKind::Reflective));

        let shape = InterfaceShape::of(&iface);
        assert_eq!(factory.failures().attempts(&shape), 1);
        assert_eq!(factory.strategy_for(&iface), StrategyKind::Reflective);
        assert_eq!(factory.cache_stats().failures, 1);
    }

    #[test]
    fn test_malformed_interface() {
        let factory = simulated(Arc::new(TemplateBackend::default()));
        let empty = InterfaceBuilder::new("Empty").build().unwrap();
        let err = factory.create_wrapper(&empty, || Ok(Value::Null)).unwrap_err();
        assert!(matches!(err, DispatchError::MalformedInterface { .. }));
    }

    #[test]
    fn test_explicit_generated_unavailable() {
        let factory = DelegateFactory::with_parts(
            DispatchConfig::default(),
            Arc::new(SimulatedHost::without(Backend::Codegen)),
            Arc::new(TemplateBackend::default()),
        );
        let err = factory
            .create_wrapper_with(
                StrategyKind::Generated,
                &greeter(),
                supplier_fn(|| Ok(Value::Null)),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Generation(GenerationError::Unavailable)
        ));
    }
}
