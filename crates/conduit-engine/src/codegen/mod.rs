//! Forwarder code generation
//!
//! Backends emit encoded forwarder modules; `loader` verifies and links them.

pub mod format;
pub mod opcode;
pub mod stub;
pub mod template;
pub mod traits;

pub use format::{FormatError, ForwarderModule, MethodDef, ModuleReader, ModuleWriter};
pub use opcode::Opcode;
pub use stub::StubBackend;
pub use template::TemplateBackend;
pub use traits::{CodegenBackend, CodegenError, CompiledUnit};
