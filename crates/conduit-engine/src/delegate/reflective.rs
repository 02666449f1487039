//! Reflective dispatch
//!
//! For each interface method an unbound adapter is built once per shape.
//! Calls fetch the backing instance, prepend it as the receiver and invoke
//! the adapter, which resolves the override on the backing class.

use std::sync::Arc;

use conduit_sdk::ValueType;
use tracing::debug;

use super::{delegate_state, StrategyKind, SynthesizedFactory};
use crate::error::DispatchError;
use crate::invoke::{AdapterRequest, InterfaceShape, MemberAdapterBuilder, MemberDescriptor};
use crate::reflect::{ClassBuilder, Interface, Lookup};

/// Adapter-based forwarding; available on every host
#[derive(Debug, Clone, Default)]
pub struct ReflectiveDispatchStrategy {
    adapters: MemberAdapterBuilder,
}

impl ReflectiveDispatchStrategy {
    /// Strategy building adapters with `adapters`
    pub fn new(adapters: MemberAdapterBuilder) -> Self {
        Self { adapters }
    }

    /// Build the forwarding class for `interface`
    pub fn synthesize(
        &self,
        interface: &Arc<Interface>,
        shape: &InterfaceShape,
    ) -> Result<Arc<SynthesizedFactory>, DispatchError> {
        let receiver = ValueType::object(interface.name());
        let mut builder = ClassBuilder::new(&format!("{}$Reflective", interface.name()))
            .module(interface.module())
            .implements(interface);

        for (method, method_shape) in interface.methods().iter().zip(shape.methods()) {
            let request = AdapterRequest::new(
                method_shape.with_receiver(receiver.clone()),
                MemberDescriptor::interface_method(interface, method),
            )
            .lookup(Lookup::trusted());
            let adapter = self.adapters.build(&request)?;
            builder = builder.method(
                method.name(),
                method.params(),
                method.ret().clone(),
                move |this, args| {
                    let state = delegate_state(this)?;
                    let backing = state.supplier().get()?;
                    let mut call_args = Vec::with_capacity(args.len() + 1);
                    call_args.push(backing);
                    call_args.extend_from_slice(args);
                    adapter.call(&call_args)
                },
            );
        }

        let class = builder
            .build()
            .map_err(|e| DispatchError::MalformedInterface {
                interface: interface.name().to_string(),
                reason: e.to_string(),
            })?;
        debug!(interface = interface.name(), methods = shape.len(), "reflective forwarder synthesized");
        Ok(Arc::new(SynthesizedFactory::new(
            StrategyKind::Reflective,
            shape.clone(),
            class,
            None,
        )))
    }
}
