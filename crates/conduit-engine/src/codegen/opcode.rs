//! Forwarder instruction set
//!
//! Forwarder bodies run on a tiny operand stack. Every opcode is one byte,
//! followed by its operands (little-endian):
//! - 0x00-0x0F: supplier and backing
//! - 0x10-0x1F: arguments
//! - 0x20-0x2F: calls
//! - 0x30-0x3F: returns
//! - 0xFF: trap

/// Forwarder opcode
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Push the instance supplier
    LoadSupplier = 0x01,
    /// Pop the supplier, call it, push the backing instance
    CallSupplier = 0x02,
    /// Check the backing instance is a non-null implementor
    CheckBacking = 0x03,
    /// Push argument `index` (u8 operand)
    LoadArg = 0x10,
    /// Pop `argc` arguments and the backing, call itable `slot`, push the result
    /// (u16 slot, u8 argc)
    InvokeItable = 0x20,
    /// Return the top of stack
    Return = 0x30,
    /// Discard the top of stack and return nothing
    ReturnVoid = 0x31,
    /// Unconditional failure
    Trap = 0xFF,
}

impl Opcode {
    /// Decode an opcode byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::LoadSupplier),
            0x02 => Some(Self::CallSupplier),
            0x03 => Some(Self::CheckBacking),
            0x10 => Some(Self::LoadArg),
            0x20 => Some(Self::InvokeItable),
            0x30 => Some(Self::Return),
            0x31 => Some(Self::ReturnVoid),
            0xFF => Some(Self::Trap),
            _ => None,
        }
    }

    /// Encoded byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Mnemonic
    pub fn name(self) -> &'static str {
        match self {
            Self::LoadSupplier => "LOAD_SUPPLIER",
            Self::CallSupplier => "CALL_SUPPLIER",
            Self::CheckBacking => "CHECK_BACKING",
            Self::LoadArg => "LOAD_ARG",
            Self::InvokeItable => "INVOKE_ITABLE",
            Self::Return => "RETURN",
            Self::ReturnVoid => "RETURN_VOID",
            Self::Trap => "TRAP",
        }
    }

    /// Size of the operands following the opcode byte
    pub fn operand_size(self) -> usize {
        match self {
            Self::LoadArg => 1,
            Self::InvokeItable => 3,
            _ => 0,
        }
    }

    /// Whether control never continues past this instruction
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Return | Self::ReturnVoid | Self::Trap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for op in [
            Opcode::LoadSupplier,
            Opcode::CallSupplier,
            Opcode::CheckBacking,
            Opcode::LoadArg,
            Opcode::InvokeItable,
            Opcode::Return,
            Opcode::ReturnVoid,
            Opcode::Trap,
        ] {
            assert_eq!(Opcode::from_u8(op.to_u8()), Some(op));
        }
        assert_eq!(Opcode::from_u8(0x42), None);
    }

    #[test]
    fn test_terminators() {
        assert!(Opcode::Return.is_terminator());
        assert!(Opcode::Trap.is_terminator());
        assert!(!Opcode::InvokeItable.is_terminator());
    }
}
