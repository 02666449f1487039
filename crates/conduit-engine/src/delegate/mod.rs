//! Forwarding objects
//!
//! A forwarding object implements an interface and delegates every call to
//! the instance its supplier returns at call time. Two strategies build the
//! forwarding class for an interface shape:
//! - `Reflective`: one unbound adapter per method, dispatched virtually
//! - `Generated`: an emitted, verified forwarder module calling itable slots
//!
//! Ownership runs one way: instance → `DelegateState` → `SynthesizedFactory`
//! → forwarding class → module. Nothing points back, so dropping the last
//! instance and factory reference releases the module.

pub mod factory;
pub mod failures;
pub mod generated;
pub mod reflective;

use std::fmt;
use std::sync::Arc;

use conduit_sdk::{CallResult, ObjectRef, Thrown, ThrownKind, Value};

use crate::error::DispatchError;
use crate::invoke::InterfaceShape;
use crate::loader::ModuleHandle;
use crate::reflect::{Class, Instance, Interface};

pub use factory::DelegateFactory;
pub use failures::FailureLedger;
pub use generated::{GeneratedDispatchStrategy, GenerationError};
pub use reflective::ReflectiveDispatchStrategy;

/// Source of the backing instance, consulted on every call
pub trait InstanceSupplier: Send + Sync {
    /// Current backing instance
    fn get(&self) -> CallResult;
}

impl<F> InstanceSupplier for F
where
    F: Fn() -> CallResult + Send + Sync,
{
    fn get(&self) -> CallResult {
        self()
    }
}

/// Share a closure as a supplier
pub fn supplier_fn<F>(f: F) -> Arc<dyn InstanceSupplier>
where
    F: Fn() -> CallResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Which strategy produced a factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Adapter-based dispatch
    Reflective,
    /// Generated forwarder module
    Generated,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Reflective => f.write_str("reflective"),
            StrategyKind::Generated => f.write_str("generated"),
        }
    }
}

/// A way of synthesizing forwarding classes
#[derive(Debug)]
pub enum DispatchStrategy {
    /// Always available
    Reflective(ReflectiveDispatchStrategy),
    /// Requires code generation and a loading primitive
    Generated(GeneratedDispatchStrategy),
}

impl DispatchStrategy {
    /// Strategy kind
    pub fn kind(&self) -> StrategyKind {
        match self {
            DispatchStrategy::Reflective(_) => StrategyKind::Reflective,
            DispatchStrategy::Generated(_) => StrategyKind::Generated,
        }
    }

    /// Whether the strategy can run on this host right now
    pub fn is_available(&self) -> bool {
        match self {
            DispatchStrategy::Reflective(_) => true,
            DispatchStrategy::Generated(g) => g.is_available(),
        }
    }

    /// Build a factory for `interface`
    pub fn synthesize(
        &self,
        interface: &Arc<Interface>,
        shape: &InterfaceShape,
    ) -> Result<Arc<SynthesizedFactory>, DispatchError> {
        match self {
            DispatchStrategy::Reflective(r) => r.synthesize(interface, shape),
            DispatchStrategy::Generated(g) => Ok(g.synthesize(interface, shape)?),
        }
    }
}

/// Produces forwarding instances for one interface shape
pub struct SynthesizedFactory {
    kind: StrategyKind,
    shape: InterfaceShape,
    class: Arc<Class>,
    module: Option<Arc<ModuleHandle>>,
}

impl SynthesizedFactory {
    pub(crate) fn new(
        kind: StrategyKind,
        shape: InterfaceShape,
        class: Arc<Class>,
        module: Option<Arc<ModuleHandle>>,
    ) -> Self {
        Self {
            kind,
            shape,
            class,
            module,
        }
    }

    /// Strategy that built the factory
    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    /// Interface shape
    pub fn shape(&self) -> &InterfaceShape {
        &self.shape
    }

    /// Forwarding class
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Loaded module, for generated factories
    pub fn module(&self) -> Option<&Arc<ModuleHandle>> {
        self.module.as_ref()
    }

    /// Create a forwarding instance. The supplier is not called.
    pub fn instantiate(self: &Arc<Self>, supplier: Arc<dyn InstanceSupplier>) -> Value {
        let state = DelegateState {
            supplier,
            factory: self.clone(),
        };
        Value::Object(ObjectRef::new(self.class.alloc(Some(Box::new(state)))))
    }
}

impl fmt::Debug for SynthesizedFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesizedFactory")
            .field("kind", &self.kind)
            .field("shape", &self.shape.name())
            .field("class", &self.class.name())
            .finish()
    }
}

/// Per-instance state of a forwarding object
pub struct DelegateState {
    supplier: Arc<dyn InstanceSupplier>,
    factory: Arc<SynthesizedFactory>,
}

impl DelegateState {
    /// The instance supplier
    pub fn supplier(&self) -> &Arc<dyn InstanceSupplier> {
        &self.supplier
    }

    /// The factory that created the instance
    pub fn factory(&self) -> &Arc<SynthesizedFactory> {
        &self.factory
    }
}

/// Delegate state of a forwarding instance
pub(crate) fn delegate_state(this: &Instance) -> Result<&DelegateState, Thrown> {
    this.native::<DelegateState>().ok_or_else(|| {
        Thrown::new(
            ThrownKind::WrongReceiver,
            format!("{} is not a forwarding object", this.class().name()),
        )
    })
}

/// Strategy behind a forwarding object, or `None` for any other value
pub fn strategy_of(wrapper: &Value) -> Option<StrategyKind> {
    let instance = wrapper.as_object()?.downcast_ref::<Instance>()?;
    instance
        .native::<DelegateState>()
        .map(|state| state.factory.kind())
}

/// Factory behind a forwarding object
pub fn factory_of(wrapper: &Value) -> Option<Arc<SynthesizedFactory>> {
    let instance = wrapper.as_object()?.downcast_ref::<Instance>()?;
    instance
        .native::<DelegateState>()
        .map(|state| state.factory.clone())
}
