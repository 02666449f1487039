//! Forwarder verification and linking
//!
//! Each body is checked by simulating the operand stack with typed entries.
//! A body that verifies is reduced to a `ForwardStub`: the itable slot it
//! calls, the argument permutation, and whether it returns the result.

use conduit_sdk::ValueType;

use crate::codegen::format::{ForwarderModule, MethodDef, ModuleReader};
use crate::codegen::Opcode;
use crate::reflect::Interface;

/// Verification errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum VerifyError {
    /// Unknown opcode byte
    #[error("Invalid opcode {opcode:#x} at offset {offset}")]
    InvalidOpcode {
        /// The byte
        opcode: u8,
        /// Offset in the body
        offset: usize,
    },

    /// Operands cut off
    #[error("Truncated instruction at offset {0}")]
    Truncated(usize),

    /// Pop from an empty stack
    #[error("Stack underflow at offset {0}")]
    StackUnderflow(usize),

    /// Operand of the wrong kind
    #[error("At offset {offset}: expected {expected}, found {found}")]
    OperandMismatch {
        /// Offset in the body
        offset: usize,
        /// Expected entry
        expected: &'static str,
        /// Actual entry
        found: &'static str,
    },

    /// Argument index beyond the method's parameters
    #[error("Argument {index} out of range (arity {arity}) at offset {offset}")]
    ArgOutOfRange {
        /// Argument index
        index: u8,
        /// Method arity
        arity: usize,
        /// Offset in the body
        offset: usize,
    },

    /// Itable slot beyond the interface
    #[error("Itable slot {slot} out of range at offset {offset}")]
    SlotOutOfRange {
        /// Slot index
        slot: u16,
        /// Offset in the body
        offset: usize,
    },

    /// Argument passed where the target slot expects another type
    #[error("Slot {slot} parameter {position}: {found} passed where {expected} is expected")]
    ArgumentType {
        /// Target slot
        slot: u16,
        /// Parameter position
        position: usize,
        /// Slot parameter type
        expected: ValueType,
        /// Argument type
        found: ValueType,
    },

    /// Call site argc disagrees with the slot's arity
    #[error("Slot {slot} takes {expected} argument(s), call passes {found}")]
    ArgcMismatch {
        /// Target slot
        slot: u16,
        /// Slot arity
        expected: usize,
        /// Passed count
        found: usize,
    },

    /// Return kind disagrees with the declared return type
    #[error("Return at offset {0} does not match the declared return type")]
    ReturnMismatch(usize),

    /// Stack not balanced at return
    #[error("Unbalanced stack at return (offset {0})")]
    Unbalanced(usize),

    /// Instructions after a terminator
    #[error("Unreachable code at offset {0}")]
    Unreachable(usize),

    /// Body has no terminator
    #[error("Execution falls off end of body at offset {0}")]
    FallOffEnd(usize),

    /// Body is a trap
    #[error("Trap at offset {0}")]
    Trap(usize),

    /// Body does not call exactly one slot
    #[error("Body must forward exactly once, found {0} call(s)")]
    CallCount(usize),

    /// Module does not describe the context interface
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
}

/// A linked forwarding body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardStub {
    /// Itable slot called on the backing instance
    pub slot: u16,
    /// For each call position, the index of the incoming argument
    pub arg_map: Vec<u8>,
    /// Whether the call result is returned
    pub returns_value: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Supplier,
    Backing,
    Checked,
    Arg(u8),
    Result,
}

impl Entry {
    fn describe(self) -> &'static str {
        match self {
            Entry::Supplier => "supplier",
            Entry::Backing => "unchecked backing",
            Entry::Checked => "checked backing",
            Entry::Arg(_) => "argument",
            Entry::Result => "call result",
        }
    }
}

/// Verify that `module` implements `interface` and link every body
pub fn verify_module(
    module: &ForwarderModule,
    interface: &Interface,
) -> Result<Vec<ForwardStub>, VerifyError> {
    if module.interface != interface.name() {
        return Err(VerifyError::ShapeMismatch(format!(
            "module implements {}, context expects {}",
            module.interface,
            interface.name()
        )));
    }
    if module.methods.len() != interface.methods().len() {
        return Err(VerifyError::ShapeMismatch(format!(
            "module has {} method(s), {} declares {}",
            module.methods.len(),
            interface.name(),
            interface.methods().len()
        )));
    }
    for (def, method) in module.methods.iter().zip(interface.methods()) {
        if def.name != method.name() || def.params != method.params() || &def.ret != method.ret() {
            return Err(VerifyError::ShapeMismatch(format!(
                "{} does not match {}",
                def.name, method
            )));
        }
    }
    module
        .methods
        .iter()
        .map(|def| verify_body(def, interface))
        .collect()
}

fn verify_body(def: &MethodDef, interface: &Interface) -> Result<ForwardStub, VerifyError> {
    let mut reader = ModuleReader::new(&def.code);
    let mut stack: Vec<Entry> = Vec::new();
    let mut calls: Vec<(u16, Vec<u8>)> = Vec::new();
    let mut returns_value = None;

    while reader.has_more() {
        let offset = reader.position();
        if returns_value.is_some() {
            return Err(VerifyError::Unreachable(offset));
        }
        let byte = reader.read_u8().map_err(|_| VerifyError::Truncated(offset))?;
        let op = Opcode::from_u8(byte).ok_or(VerifyError::InvalidOpcode {
            opcode: byte,
            offset,
        })?;

        match op {
            Opcode::LoadSupplier => stack.push(Entry::Supplier),
            Opcode::CallSupplier => {
                expect(&mut stack, Entry::Supplier, offset)?;
                stack.push(Entry::Backing);
            }
            Opcode::CheckBacking => {
                expect(&mut stack, Entry::Backing, offset)?;
                stack.push(Entry::Checked);
            }
            Opcode::LoadArg => {
                let index = reader.read_u8().map_err(|_| VerifyError::Truncated(offset))?;
                if index as usize >= def.params.len() {
                    return Err(VerifyError::ArgOutOfRange {
                        index,
                        arity: def.params.len(),
                        offset,
                    });
                }
                stack.push(Entry::Arg(index));
            }
            Opcode::InvokeItable => {
                let slot = reader.read_u16().map_err(|_| VerifyError::Truncated(offset))?;
                let argc = reader.read_u8().map_err(|_| VerifyError::Truncated(offset))? as usize;
                let target = interface
                    .methods()
                    .get(slot as usize)
                    .ok_or(VerifyError::SlotOutOfRange { slot, offset })?;
                if target.arity() != argc {
                    return Err(VerifyError::ArgcMismatch {
                        slot,
                        expected: target.arity(),
                        found: argc,
                    });
                }
                let mut arg_map = vec![0u8; argc];
                for position in (0..argc).rev() {
                    match stack.pop() {
                        Some(Entry::Arg(index)) => {
                            let found = &def.params[index as usize];
                            let expected = &target.params()[position];
                            if found != expected && !found.widens_to(expected) {
                                return Err(VerifyError::ArgumentType {
                                    slot,
                                    position,
                                    expected: expected.clone(),
                                    found: found.clone(),
                                });
                            }
                            arg_map[position] = index;
                        }
                        Some(other) => {
                            return Err(VerifyError::OperandMismatch {
                                offset,
                                expected: "argument",
                                found: other.describe(),
                            })
                        }
                        None => return Err(VerifyError::StackUnderflow(offset)),
                    }
                }
                expect(&mut stack, Entry::Checked, offset)?;
                stack.push(Entry::Result);
                calls.push((slot, arg_map));
            }
            Opcode::Return | Opcode::ReturnVoid => {
                expect(&mut stack, Entry::Result, offset)?;
                if !stack.is_empty() {
                    return Err(VerifyError::Unbalanced(offset));
                }
                let returns = op == Opcode::Return;
                if returns == (def.ret == ValueType::Void) {
                    return Err(VerifyError::ReturnMismatch(offset));
                }
                returns_value = Some(returns);
            }
            Opcode::Trap => return Err(VerifyError::Trap(offset)),
        }
    }

    let returns_value = returns_value.ok_or(VerifyError::FallOffEnd(reader.position()))?;
    if calls.len() != 1 {
        return Err(VerifyError::CallCount(calls.len()));
    }
    let (slot, arg_map) = calls.remove(0);
    Ok(ForwardStub {
        slot,
        arg_map,
        returns_value,
    })
}

fn expect(stack: &mut Vec<Entry>, wanted: Entry, offset: usize) -> Result<(), VerifyError> {
    match stack.pop() {
        Some(found) if found == wanted => Ok(()),
        Some(found) => Err(VerifyError::OperandMismatch {
            offset,
            expected: wanted.describe(),
            found: found.describe(),
        }),
        None => Err(VerifyError::StackUnderflow(offset)),
    }
}
