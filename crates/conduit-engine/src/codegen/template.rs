//! Template backend
//!
//! Emits one fixed body per interface method:
//! `LOAD_SUPPLIER; CALL_SUPPLIER; CHECK_BACKING; LOAD_ARG 0..n; INVOKE_ITABLE slot n; RETURN`
//! (`RETURN_VOID` for void methods).

use tracing::debug;

use super::format::{ForwarderModule, MethodDef, ModuleWriter};
use super::opcode::Opcode;
use super::traits::{unit_name, CodegenBackend, CodegenError, CompiledUnit};
use crate::invoke::{FunctionalShape, InterfaceShape};
use conduit_sdk::ValueType;

/// Template-based forwarder emitter
#[derive(Debug, Clone)]
pub struct TemplateBackend {
    max_arity: usize,
}

impl TemplateBackend {
    /// Backend emitting methods with at most `max_arity` parameters
    pub fn new(max_arity: usize) -> Self {
        Self {
            max_arity: max_arity.min(u8::MAX as usize),
        }
    }

    /// Largest supported arity
    pub fn max_arity(&self) -> usize {
        self.max_arity
    }

    fn emit_body(slot: usize, method: &FunctionalShape) -> Vec<u8> {
        let mut w = ModuleWriter::new();
        w.emit_op(Opcode::LoadSupplier);
        w.emit_op(Opcode::CallSupplier);
        w.emit_op(Opcode::CheckBacking);
        for i in 0..method.arity() {
            w.emit_op(Opcode::LoadArg);
            w.emit_u8(i as u8);
        }
        w.emit_op(Opcode::InvokeItable);
        w.emit_u16(slot as u16);
        w.emit_u8(method.arity() as u8);
        if *method.ret() == ValueType::Void {
            w.emit_op(Opcode::ReturnVoid);
        } else {
            w.emit_op(Opcode::Return);
        }
        w.into_bytes()
    }
}

impl Default for TemplateBackend {
    fn default() -> Self {
        Self::new(8)
    }
}

impl CodegenBackend for TemplateBackend {
    fn name(&self) -> &str {
        "template"
    }

    fn emit(&self, shape: &InterfaceShape) -> Result<CompiledUnit, CodegenError> {
        if shape.max_arity() > self.max_arity {
            return Err(CodegenError::UnsupportedShape {
                shape: shape.to_string(),
                reason: format!(
                    "arity {} exceeds template limit {}",
                    shape.max_arity(),
                    self.max_arity
                ),
            });
        }
        if shape.len() > u16::MAX as usize {
            return Err(CodegenError::UnsupportedShape {
                shape: shape.name().to_string(),
                reason: format!("{} methods exceed the slot range", shape.len()),
            });
        }

        let name = unit_name(shape.name());
        let mut module = ForwarderModule::new(&name, shape.name());
        for (slot, method) in shape.methods().iter().enumerate() {
            module.methods.push(MethodDef {
                name: method.name().to_string(),
                params: method.params().to_vec(),
                ret: method.ret().clone(),
                code: Self::emit_body(slot, method),
            });
        }
        let bytes = module.encode();
        debug!(unit = %name, interface = shape.name(), size = bytes.len(), "emitted forwarder");
        Ok(CompiledUnit { name, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::InterfaceBuilder;

    #[test]
    fn test_emits_one_body_per_method() {
        let iface = InterfaceBuilder::new("Pair")
            .method("left", &[], ValueType::I32)
            .method("swap", &[ValueType::I32, ValueType::I32], ValueType::Void)
            .build()
            .unwrap();
        let unit = TemplateBackend::default().emit(&InterfaceShape::of(&iface)).unwrap();
        let module = ForwarderModule::decode(&unit.bytes).unwrap();
        assert_eq!(module.interface, "Pair");
        assert_eq!(module.unit, unit.name);
        assert_eq!(module.methods.len(), 2);

        let swap = &module.methods[1].code;
        assert_eq!(swap[0], Opcode::LoadSupplier.to_u8());
        assert_eq!(*swap.last().unwrap(), Opcode::ReturnVoid.to_u8());
        // INVOKE_ITABLE slot 1, argc 2
        let invoke = swap.len() - 5;
        assert_eq!(&swap[invoke..invoke + 4], &[0x20, 1, 0, 2]);
    }

    #[test]
    fn test_rejects_large_arity() {
        let iface = InterfaceBuilder::new("Wide")
            .method("f", &[ValueType::I32, ValueType::I32, ValueType::I32], ValueType::I32)
            .build()
            .unwrap();
        let err = TemplateBackend::new(2).emit(&InterfaceShape::of(&iface)).unwrap_err();
        assert!(matches!(err, CodegenError::UnsupportedShape { .. }));
    }

    #[test]
    fn test_unit_names_unique() {
        let iface = InterfaceBuilder::new("U")
            .method("f", &[], ValueType::I32)
            .build()
            .unwrap();
        let backend = TemplateBackend::default();
        let shape = InterfaceShape::of(&iface);
        let a = backend.emit(&shape).unwrap();
        let b = backend.emit(&shape).unwrap();
        assert_ne!(a.name, b.name);
    }
}
