//! Dynamic values and shared host objects
//!
//! Primitive values are stored inline; strings and objects are reference
//! counted. Object equality is identity (`ObjectRef::ptr_eq`), never structure.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::types::ValueType;

/// An object that can be referenced from a `Value`.
///
/// The engine's instances implement this; the trait exists so the value
/// model does not depend on the engine's class layout.
pub trait HostObject: Any + Send + Sync {
    /// Runtime type name (the class name for engine instances)
    fn type_name(&self) -> &str;

    /// Upcast used for downcasting to the concrete object type
    fn as_any(&self) -> &dyn Any;

    /// Whether this object is an instance of the named class or interface
    fn is_instance_of(&self, type_name: &str) -> bool {
        self.type_name() == type_name
    }
}

/// Shared handle to a host object.
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn HostObject>);

impl ObjectRef {
    /// Wrap a new host object
    pub fn new<T: HostObject>(object: T) -> Self {
        ObjectRef(Arc::new(object))
    }

    /// Wrap an already shared host object
    pub fn from_arc(object: Arc<dyn HostObject>) -> Self {
        ObjectRef(object)
    }

    /// Runtime type name of the referenced object
    pub fn type_name(&self) -> &str {
        self.0.type_name()
    }

    /// Whether the referenced object is an instance of the named type
    pub fn is_instance_of(&self, type_name: &str) -> bool {
        self.0.is_instance_of(type_name)
    }

    /// Downcast to the concrete object type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }

    /// Number of strong handles to the referenced object
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:p}", self.type_name(), Arc::as_ptr(&self.0) as *const u8)
    }
}

/// A dynamic value.
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value; also the result of void calls
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit signed integer
    I32(i32),
    /// 64-bit signed integer
    I64(i64),
    /// 64-bit float
    F64(f64),
    /// Immutable shared string
    Str(Arc<str>),
    /// Shared host object
    Object(ObjectRef),
}

impl Value {
    /// Create a string value
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i32
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get as object reference
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Get the type name for error messages
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F64(_) => "f64",
            Value::Str(_) => "string",
            Value::Object(o) => o.type_name(),
        }
    }

    /// Whether this value is a legal inhabitant of `ty` without conversion
    pub fn conforms_to(&self, ty: &ValueType) -> bool {
        match (ty, self) {
            (ValueType::Any, _) => true,
            (ValueType::Void, Value::Null) => true,
            (ValueType::Bool, Value::Bool(_)) => true,
            (ValueType::I32, Value::I32(_)) => true,
            (ValueType::I64, Value::I64(_)) => true,
            (ValueType::F64, Value::F64(_)) => true,
            (ValueType::Str, Value::Str(_) | Value::Null) => true,
            (ValueType::Object(_), Value::Null) => true,
            (ValueType::Object(name), Value::Object(o)) => o.is_instance_of(name),
            _ => false,
        }
    }

    /// Convert to `ty`, applying primitive widening where needed.
    ///
    /// Returns `None` when the value neither conforms nor widens.
    pub fn coerce(&self, ty: &ValueType) -> Option<Value> {
        if self.conforms_to(ty) {
            return Some(self.clone());
        }
        match (self, ty) {
            (Value::I32(i), ValueType::I64) => Some(Value::I64(*i as i64)),
            (Value::I32(i), ValueType::F64) => Some(Value::F64(*i as f64)),
            (Value::I64(i), ValueType::F64) => Some(Value::F64(*i as f64)),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Value::Null"),
            Value::Bool(b) => write!(f, "Value::Bool({})", b),
            Value::I32(i) => write!(f, "Value::I32({})", i),
            Value::I64(i) => write!(f, "Value::I64({})", i),
            Value::F64(x) => write!(f, "Value::F64({})", x),
            Value::Str(s) => write!(f, "Value::Str({:?})", s),
            Value::Object(o) => write!(f, "Value::Object({:?})", o),
        }
    }
}
