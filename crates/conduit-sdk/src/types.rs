//! Static value types used by functional shapes and member signatures

use std::fmt;
use std::sync::Arc;

/// The static type of a parameter, return value, or field.
///
/// `Object` carries the class or interface name; subtype checks between
/// object types are answered by the engine's class registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// No value (only valid as a return type)
    Void,
    /// Boolean
    Bool,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 64-bit float
    F64,
    /// Immutable string
    Str,
    /// Instance of the named class or interface
    Object(Arc<str>),
    /// Any value, including null
    Any,
}

impl ValueType {
    /// Object type for the given class or interface name
    pub fn object(name: &str) -> Self {
        ValueType::Object(Arc::from(name))
    }

    /// Whether null is a legal value of this type
    pub fn is_nullable(&self) -> bool {
        matches!(self, ValueType::Str | ValueType::Object(_) | ValueType::Any)
    }

    /// Whether this is a primitive numeric or boolean type
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            ValueType::Bool | ValueType::I32 | ValueType::I64 | ValueType::F64
        )
    }

    /// Class name for object types
    pub fn class_name(&self) -> Option<&str> {
        match self {
            ValueType::Object(name) => Some(name),
            _ => None,
        }
    }

    /// Whether a value of `self` converts to `target` by primitive widening.
    ///
    /// Widening is lossless for the pairs accepted here:
    /// i32 -> i64, i32 -> f64, i64 -> f64.
    pub fn widens_to(&self, target: &ValueType) -> bool {
        matches!(
            (self, target),
            (ValueType::I32, ValueType::I64)
                | (ValueType::I32, ValueType::F64)
                | (ValueType::I64, ValueType::F64)
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Void => write!(f, "void"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::I32 => write!(f, "i32"),
            ValueType::I64 => write!(f, "i64"),
            ValueType::F64 => write!(f, "f64"),
            ValueType::Str => write!(f, "string"),
            ValueType::Object(name) => write!(f, "{}", name),
            ValueType::Any => write!(f, "any"),
        }
    }
}
