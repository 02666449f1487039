//! Forwarder module loading
//!
//! `ModuleLoader::load` decodes, verifies and links one code unit into a
//! `ModuleHandle`. Loading prefers a fresh `LoadingContext` per unit so each
//! module can be reclaimed on its own; hosts without one fall back to direct
//! definition. Handles are reclaimed by `Drop` alone: the loader keeps a live
//! counter, never a reference.

pub mod verify;

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use conduit_sdk::{CallResult, Thrown, ThrownKind, Value};
use tracing::{debug, trace};

use crate::codegen::format::ForwarderModule;
use crate::probe::{Backend, CapabilityProbe};
use crate::reflect::{receiver_instance, Interface};

pub use verify::{verify_module, ForwardStub, VerifyError};

/// Errors while loading a unit
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// The unit failed decoding, verification or linking
    #[error("Load of {unit} rejected: {reason}")]
    LoadRejected {
        /// Unit name
        unit: String,
        /// Why
        reason: String,
    },

    /// The host has no loading primitive
    #[error("Capability unavailable: {backend}")]
    CapabilityUnavailable {
        /// Missing backend id(s)
        backend: String,
    },
}

/// How a unit is brought into the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPrimitive {
    /// A fresh loading context per unit
    IsolatedContext,
    /// No auxiliary context
    DirectDefine,
}

/// Interface the unit must implement
#[derive(Debug, Clone)]
pub struct LoadContext {
    interface: Arc<Interface>,
}

impl LoadContext {
    /// Context for a forwarder of `interface`
    pub fn new(interface: &Arc<Interface>) -> Self {
        Self {
            interface: interface.clone(),
        }
    }

    /// The interface
    pub fn interface(&self) -> &Arc<Interface> {
        &self.interface
    }
}

static CONTEXT_IDS: AtomicU64 = AtomicU64::new(1);

/// A single-use loading context, owned by the handle it produced
#[derive(Debug)]
pub struct LoadingContext {
    id: u64,
    unit: String,
}

impl LoadingContext {
    fn new(unit: &str) -> Self {
        Self {
            id: CONTEXT_IDS.fetch_add(1, Ordering::Relaxed),
            unit: unit.to_string(),
        }
    }

    /// Context id; unique per process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unit defined in this context
    pub fn unit(&self) -> &str {
        &self.unit
    }
}

/// One loaded, linked code unit
pub struct ModuleHandle {
    id: u64,
    name: String,
    fingerprint: String,
    primitive: LoadPrimitive,
    context: Option<LoadingContext>,
    interface: Arc<Interface>,
    stubs: Vec<ForwardStub>,
    live: Arc<AtomicUsize>,
}

impl ModuleHandle {
    /// Load id, unique within the loader
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unit name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hex SHA-256 of the unit payload
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Primitive used to load the unit
    pub fn primitive(&self) -> LoadPrimitive {
        self.primitive
    }

    /// Loading context, when loaded in isolation
    pub fn context(&self) -> Option<&LoadingContext> {
        self.context.as_ref()
    }

    /// Implemented interface
    pub fn interface(&self) -> &Arc<Interface> {
        &self.interface
    }

    /// Linked stub for a method index
    pub fn stub(&self, index: usize) -> Option<&ForwardStub> {
        self.stubs.get(index)
    }

    /// Run forwarding body `index`: fetch the backing, check it, and call its
    /// itable slot with the permuted arguments.
    pub fn forward<F>(&self, index: usize, fetch: F, args: &[Value]) -> CallResult
    where
        F: FnOnce() -> CallResult,
    {
        let stub = self.stubs.get(index).ok_or_else(|| {
            Thrown::new(
                ThrownKind::NoSuchMethod,
                format!("{} has no forwarding body {}", self.name, index),
            )
        })?;
        let backing = fetch()?;
        let what = self.interface.name();
        let instance = receiver_instance(&backing, what)?;
        let itable = instance.class().itable(&self.interface).ok_or_else(|| {
            Thrown::new(
                ThrownKind::WrongReceiver,
                format!("{} does not implement {}", instance.class().name(), what),
            )
        })?;
        let method = itable.slot(stub.slot as usize).ok_or_else(|| {
            Thrown::new(
                ThrownKind::AbstractMethod,
                format!(
                    "{} leaves {}#{} abstract",
                    instance.class().name(),
                    what,
                    stub.slot
                ),
            )
        })?;
        let mapped: Vec<Value> = stub
            .arg_map
            .iter()
            .map(|&i| args.get(i as usize).cloned().unwrap_or_default())
            .collect();
        let result = method.call(Some(instance), &mapped)?;
        if stub.returns_value {
            Ok(result)
        } else {
            Ok(Value::Null)
        }
    }
}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        trace!(unit = %self.name, "module reclaimed");
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("primitive", &self.primitive)
            .field("methods", &self.stubs.len())
            .finish()
    }
}

/// Loads forwarder units
pub struct ModuleLoader {
    probe: Arc<CapabilityProbe>,
    live: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl ModuleLoader {
    /// Loader consulting `probe` for loading primitives
    pub fn new(probe: Arc<CapabilityProbe>) -> Self {
        Self {
            probe,
            live: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Best primitive the host offers
    pub fn primitive(&self) -> Option<LoadPrimitive> {
        if self.probe.is_available(Backend::IsolatedLoader) {
            Some(LoadPrimitive::IsolatedContext)
        } else if self.probe.is_available(Backend::DirectDefine) {
            Some(LoadPrimitive::DirectDefine)
        } else {
            None
        }
    }

    /// Decode, verify and link `bytes` as a forwarder of `ctx.interface()`
    pub fn load(&self, bytes: &[u8], ctx: &LoadContext) -> Result<Arc<ModuleHandle>, LoadError> {
        let primitive = self.primitive().ok_or_else(|| LoadError::CapabilityUnavailable {
            backend: format!("{}|{}", Backend::IsolatedLoader, Backend::DirectDefine),
        })?;

        let module = ForwarderModule::decode(bytes).map_err(|e| LoadError::LoadRejected {
            unit: "<undecodable>".to_string(),
            reason: e.to_string(),
        })?;
        let stubs = verify_module(&module, ctx.interface()).map_err(|e| LoadError::LoadRejected {
            unit: module.unit.clone(),
            reason: e.to_string(),
        })?;

        let context = match primitive {
            LoadPrimitive::IsolatedContext => Some(LoadingContext::new(&module.unit)),
            LoadPrimitive::DirectDefine => None,
        };
        let handle = ModuleHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            fingerprint: ForwarderModule::fingerprint(bytes).unwrap_or_default(),
            name: module.unit,
            primitive,
            context,
            interface: ctx.interface().clone(),
            stubs,
            live: self.live.clone(),
        };
        self.live.fetch_add(1, Ordering::AcqRel);
        debug!(unit = %handle.name, ?primitive, "module loaded");
        Ok(Arc::new(handle))
    }

    /// Handles from this loader that are still alive
    pub fn live_modules(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// The capability probe
    pub fn probe(&self) -> &Arc<CapabilityProbe> {
        &self.probe
    }
}

impl fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("live", &self.live_modules())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{CodegenBackend, StubBackend, TemplateBackend};
    use crate::invoke::InterfaceShape;
    use crate::probe::SimulatedHost;
    use crate::reflect::{ClassBuilder, InterfaceBuilder};
    use conduit_sdk::ValueType;

    fn iface() -> Arc<Interface> {
        InterfaceBuilder::new("Sub")
            .method("sub", &[ValueType::I64, ValueType::I64], ValueType::I64)
            .build()
            .unwrap()
    }

    fn loader_on(host: SimulatedHost) -> ModuleLoader {
        ModuleLoader::new(Arc::new(CapabilityProbe::new(Arc::new(host))))
    }

    #[test]
    fn test_isolated_load_and_forward() {
        let iface = iface();
        let class = ClassBuilder::new("Minus")
            .implements(&iface)
            .method("sub", &[ValueType::I64, ValueType::I64], ValueType::I64, |_, a| {
                Ok(Value::I64(a[0].as_i64().unwrap_or(0) - a[1].as_i64().unwrap_or(0)))
            })
            .build()
            .unwrap();
        let backing = class.new_instance(&[]).unwrap();

        let loader = loader_on(SimulatedHost::new());
        let unit = TemplateBackend::default().emit(&InterfaceShape::of(&iface)).unwrap();
        let handle = loader.load(&unit.bytes, &LoadContext::new(&iface)).unwrap();
        assert_eq!(handle.primitive(), LoadPrimitive::IsolatedContext);
        assert_eq!(handle.context().unwrap().unit(), unit.name);
        assert_eq!(loader.live_modules(), 1);

        let stub = handle.stub(0).unwrap();
        assert_eq!(stub.slot, 0);
        assert_eq!(stub.arg_map, vec![0, 1]);
        assert!(stub.returns_value);
        assert!(handle.stub(1).is_none());

        let out = handle
            .forward(0, || Ok(backing.clone()), &[Value::I64(10), Value::I32(3)])
            .unwrap();
        assert_eq!(out, Value::I64(7));

        drop(handle);
        assert_eq!(loader.live_modules(), 0);
    }

    #[test]
    fn test_contexts_never_reused() {
        let iface = iface();
        let loader = loader_on(SimulatedHost::new());
        let backend = TemplateBackend::default();
        let shape = InterfaceShape::of(&iface);
        let a = loader.load(&backend.emit(&shape).unwrap().bytes, &LoadContext::new(&iface)).unwrap();
        let b = loader.load(&backend.emit(&shape).unwrap().bytes, &LoadContext::new(&iface)).unwrap();
        assert_ne!(a.context().unwrap().id(), b.context().unwrap().id());
        assert_eq!(loader.live_modules(), 2);
    }

    #[test]
    fn test_direct_define_fallback() {
        let iface = iface();
        let loader = loader_on(SimulatedHost::without(Backend::IsolatedLoader));
        let unit = TemplateBackend::default().emit(&InterfaceShape::of(&iface)).unwrap();
        let handle = loader.load(&unit.bytes, &LoadContext::new(&iface)).unwrap();
        assert_eq!(handle.primitive(), LoadPrimitive::DirectDefine);
        assert!(handle.context().is_none());
    }

    #[test]
    fn test_no_primitive() {
        let host = SimulatedHost::without(Backend::IsolatedLoader);
        host.set(Backend::DirectDefine, false);
        let loader = loader_on(host);
        let iface = iface();
        let unit = TemplateBackend::default().emit(&InterfaceShape::of(&iface)).unwrap();
        let err = loader.load(&unit.bytes, &LoadContext::new(&iface)).unwrap_err();
        assert!(matches!(err, LoadError::CapabilityUnavailable { .. }));
    }

    #[test]
    fn test_rejections() {
        let iface = iface();
        let loader = loader_on(SimulatedHost::new());
        let unit = StubBackend.emit(&InterfaceShape::of(&iface)).unwrap();
        let err = loader.load(&unit.bytes, &LoadContext::new(&iface)).unwrap_err();
        assert!(matches!(err, LoadError::LoadRejected { .. }));

        let err = loader.load(b"garbage", &LoadContext::new(&iface)).unwrap_err();
        assert!(matches!(err, LoadError::LoadRejected { .. }));
        assert_eq!(loader.live_modules(), 0);
    }

    #[test]
    fn test_forward_null_backing() {
        let iface = iface();
        let loader = loader_on(SimulatedHost::new());
        let unit = TemplateBackend::default().emit(&InterfaceShape::of(&iface)).unwrap();
        let handle = loader.load(&unit.bytes, &LoadContext::new(&iface)).unwrap();
        let err = handle
            .forward(0, || Ok(Value::Null), &[Value::I64(1), Value::I64(2)])
            .unwrap_err();
        assert_eq!(err.kind(), ThrownKind::NullReceiver);
    }
}
