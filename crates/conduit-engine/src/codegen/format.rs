//! Forwarder module binary format
//!
//! Layout:
//! - Header: magic (4 bytes) + version (u32) + flags (u32) + crc32 (u32) + SHA-256 (32 bytes)
//! - Payload: interface name, method count, then per method: name, param
//!   types, return type, code length and code bytes
//!
//! Strings are u32-length-prefixed UTF-8. Checksums cover the payload only.

use conduit_sdk::ValueType;
use sha2::{Digest, Sha256};

use super::opcode::Opcode;

/// Magic number
pub const MAGIC: [u8; 4] = *b"CNDT";

/// Current format version
pub const VERSION: u32 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 48;

/// Module flags
pub mod flags {
    /// At least one method body contains a trap
    pub const HAS_TRAPS: u32 = 0x0001;
}

/// Errors decoding a module
#[derive(Debug, Clone, thiserror::Error)]
pub enum FormatError {
    /// Input ended early
    #[error("Unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    /// Wrong magic number
    #[error("Invalid magic number: expected CNDT, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unknown version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// CRC32 mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Stored checksum
        expected: u32,
        /// Computed checksum
        actual: u32,
    },

    /// SHA-256 mismatch
    #[error("Payload hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Stored hash (hex)
        expected: String,
        /// Computed hash (hex)
        actual: String,
    },

    /// String is not UTF-8
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Unknown value type tag
    #[error("Invalid type tag {tag} at offset {offset}")]
    InvalidTypeTag {
        /// Tag byte
        tag: u8,
        /// Offset in input
        offset: usize,
    },

    /// Bytes after the last method
    #[error("{0} trailing byte(s) after module payload")]
    TrailingBytes(usize),
}

/// Little-endian byte writer
#[derive(Debug, Default)]
pub struct ModuleWriter {
    buffer: Vec<u8>,
}

impl ModuleWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Current offset
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Emit one byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a u16
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a u32
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit a length-prefixed string
    pub fn emit_str(&mut self, s: &str) {
        self.emit_u32(s.len() as u32);
        self.buffer.extend_from_slice(s.as_bytes());
    }

    /// Emit a value type
    pub fn emit_type(&mut self, ty: &ValueType) {
        match ty {
            ValueType::Void => self.emit_u8(0),
            ValueType::Bool => self.emit_u8(1),
            ValueType::I32 => self.emit_u8(2),
            ValueType::I64 => self.emit_u8(3),
            ValueType::F64 => self.emit_u8(4),
            ValueType::Str => self.emit_u8(5),
            ValueType::Object(name) => {
                self.emit_u8(6);
                self.emit_str(name);
            }
            ValueType::Any => self.emit_u8(7),
        }
    }

    /// Emit an opcode
    pub fn emit_op(&mut self, op: Opcode) {
        self.emit_u8(op.to_u8());
    }

    /// Overwrite a u32 at `offset`
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Finish and return the bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Little-endian byte reader
#[derive(Debug)]
pub struct ModuleReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ModuleReader<'a> {
    /// Read from `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether any bytes remain
    pub fn has_more(&self) -> bool {
        self.pos < self.data.len()
    }

    /// Read raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(FormatError::UnexpectedEof(self.pos))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Read a fixed-size array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Read one byte
    pub fn read_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read a u16
    pub fn read_u16(&mut self) -> Result<u16, FormatError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    /// Read a u32
    pub fn read_u32(&mut self) -> Result<u32, FormatError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Read a length-prefixed string
    pub fn read_str(&mut self) -> Result<String, FormatError> {
        let len = self.read_u32()? as usize;
        let start = self.pos;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| FormatError::InvalidUtf8(start))
    }

    /// Read a value type
    pub fn read_type(&mut self) -> Result<ValueType, FormatError> {
        let offset = self.pos;
        match self.read_u8()? {
            0 => Ok(ValueType::Void),
            1 => Ok(ValueType::Bool),
            2 => Ok(ValueType::I32),
            3 => Ok(ValueType::I64),
            4 => Ok(ValueType::F64),
            5 => Ok(ValueType::Str),
            6 => Ok(ValueType::object(&self.read_str()?)),
            7 => Ok(ValueType::Any),
            tag => Err(FormatError::InvalidTypeTag { tag, offset }),
        }
    }
}

/// One forwarding method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Parameter types
    pub params: Vec<ValueType>,
    /// Return type
    pub ret: ValueType,
    /// Body
    pub code: Vec<u8>,
}

/// A forwarder module: one method body per interface slot
#[derive(Debug, Clone, PartialEq)]
pub struct ForwarderModule {
    /// Module flags
    pub flags: u32,
    /// Unit name
    pub unit: String,
    /// Implemented interface
    pub interface: String,
    /// Bodies in slot order
    pub methods: Vec<MethodDef>,
}

impl ForwarderModule {
    /// Empty module for `interface`
    pub fn new(unit: &str, interface: &str) -> Self {
        Self {
            flags: 0,
            unit: unit.to_string(),
            interface: interface.to_string(),
            methods: Vec::new(),
        }
    }

    /// Encode to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ModuleWriter::new();
        writer.emit_bytes(&MAGIC);
        writer.emit_u32(VERSION);
        writer.emit_u32(self.flags);
        let crc32_offset = writer.offset();
        writer.emit_u32(0);
        let sha256_offset = writer.offset();
        writer.emit_bytes(&[0u8; 32]);

        writer.emit_str(&self.unit);
        writer.emit_str(&self.interface);
        writer.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            writer.emit_str(&method.name);
            writer.emit_u32(method.params.len() as u32);
            for p in &method.params {
                writer.emit_type(p);
            }
            writer.emit_type(&method.ret);
            writer.emit_u32(method.code.len() as u32);
            writer.emit_bytes(&method.code);
        }

        let payload = &writer.buffer[HEADER_SIZE..];
        let crc32 = crc32fast::hash(payload);
        let hash: [u8; 32] = Sha256::digest(payload).into();
        writer.patch_u32(crc32_offset, crc32);
        writer.buffer[sha256_offset..sha256_offset + 32].copy_from_slice(&hash);
        writer.into_bytes()
    }

    /// Decode and check integrity
    pub fn decode(data: &[u8]) -> Result<Self, FormatError> {
        let mut reader = ModuleReader::new(data);

        let magic: [u8; 4] = reader.read_array()?;
        if magic != MAGIC {
            return Err(FormatError::InvalidMagic(magic));
        }
        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let flags = reader.read_u32()?;
        let stored_crc32 = reader.read_u32()?;
        let stored_sha256: [u8; 32] = reader.read_array()?;

        let payload = &data[HEADER_SIZE..];
        let crc32 = crc32fast::hash(payload);
        if crc32 != stored_crc32 {
            return Err(FormatError::ChecksumMismatch {
                expected: stored_crc32,
                actual: crc32,
            });
        }
        let hash: [u8; 32] = Sha256::digest(payload).into();
        if hash != stored_sha256 {
            return Err(FormatError::HashMismatch {
                expected: hex::encode(stored_sha256),
                actual: hex::encode(hash),
            });
        }

        let unit = reader.read_str()?;
        let interface = reader.read_str()?;
        let count = reader.read_u32()? as usize;
        let mut methods = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            let name = reader.read_str()?;
            let param_count = reader.read_u32()? as usize;
            let mut params = Vec::with_capacity(param_count.min(64));
            for _ in 0..param_count {
                params.push(reader.read_type()?);
            }
            let ret = reader.read_type()?;
            let code_len = reader.read_u32()? as usize;
            let code = reader.read_bytes(code_len)?.to_vec();
            methods.push(MethodDef {
                name,
                params,
                ret,
                code,
            });
        }
        if reader.has_more() {
            return Err(FormatError::TrailingBytes(reader.remaining()));
        }

        Ok(Self {
            flags,
            unit,
            interface,
            methods,
        })
    }

    /// Hex SHA-256 of the encoded payload, used as the unit fingerprint
    pub fn fingerprint(bytes: &[u8]) -> Option<String> {
        bytes
            .get(16..HEADER_SIZE)
            .map(hex::encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ForwarderModule {
        let mut module = ForwarderModule::new("Fwd$Sample$1", "Sample");
        module.methods.push(MethodDef {
            name: "get".to_string(),
            params: vec![ValueType::I32, ValueType::object("Node")],
            ret: ValueType::Str,
            code: vec![Opcode::Trap.to_u8()],
        });
        module
    }

    #[test]
    fn test_encode_decode() {
        let module = sample();
        let bytes = module.encode();
        assert_eq!(&bytes[..4], b"CNDT");
        assert_eq!(ForwarderModule::decode(&bytes).unwrap(), module);
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = sample().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            ForwarderModule::decode(&bytes),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_magic_and_truncation() {
        let mut bytes = sample().encode();
        bytes[0] = b'X';
        assert!(matches!(
            ForwarderModule::decode(&bytes),
            Err(FormatError::InvalidMagic(_))
        ));
        assert!(matches!(
            ForwarderModule::decode(&[0u8; 3]),
            Err(FormatError::UnexpectedEof(0))
        ));
    }

    #[test]
    fn test_fingerprint_is_header_hash() {
        let bytes = sample().encode();
        let fp = ForwarderModule::fingerprint(&bytes).unwrap();
        assert_eq!(fp.len(), 64);
    }
}
