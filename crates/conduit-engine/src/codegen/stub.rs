//! Stub backend for testing fallback paths
//!
//! Produces well-formed modules whose bodies are a single TRAP. The loader
//! rejects them, which exercises the reflective fallback end to end.

use super::format::{flags, ForwarderModule, MethodDef};
use super::opcode::Opcode;
use super::traits::{unit_name, CodegenBackend, CodegenError, CompiledUnit};
use crate::invoke::InterfaceShape;

/// A backend that emits trap bodies
#[derive(Debug, Clone, Copy, Default)]
pub struct StubBackend;

impl CodegenBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    fn emit(&self, shape: &InterfaceShape) -> Result<CompiledUnit, CodegenError> {
        let name = unit_name(shape.name());
        let mut module = ForwarderModule::new(&name, shape.name());
        module.flags |= flags::HAS_TRAPS;
        for method in shape.methods() {
            module.methods.push(MethodDef {
                name: method.name().to_string(),
                params: method.params().to_vec(),
                ret: method.ret().clone(),
                code: vec![Opcode::Trap.to_u8()],
            });
        }
        Ok(CompiledUnit {
            name,
            bytes: module.encode(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::InterfaceBuilder;
    use conduit_sdk::ValueType;

    #[test]
    fn test_stub_emits_traps() {
        let iface = InterfaceBuilder::new("T")
            .method("f", &[], ValueType::I32)
            .build()
            .unwrap();
        let unit = StubBackend.emit(&InterfaceShape::of(&iface)).unwrap();
        let module = ForwarderModule::decode(&unit.bytes).unwrap();
        assert_eq!(module.flags & flags::HAS_TRAPS, flags::HAS_TRAPS);
        assert_eq!(module.methods[0].code, vec![0xFF]);
    }
}
