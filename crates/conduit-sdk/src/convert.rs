//! Conversions between Rust scalars and `Value`.
//!
//! ```ignore
//! use conduit_sdk::{FromValue, ToValue};
//!
//! let v = "hello".to_value();
//! let s = String::from_value(&v)?;
//! ```

use std::sync::Arc;

use crate::error::{Thrown, ThrownKind};
use crate::types::ValueType;
use crate::value::{ObjectRef, Value};

/// Failed conversion from a `Value`
#[derive(Debug, Clone, thiserror::Error)]
#[error("Type mismatch: expected {expected}, got {got}")]
pub struct ConversionError {
    /// Expected type name
    pub expected: String,
    /// Actual type name
    pub got: String,
}

impl From<ConversionError> for Thrown {
    fn from(e: ConversionError) -> Self {
        Thrown::new(ThrownKind::IllegalArgument, e.to_string())
    }
}

/// Convert a Rust value into a `Value`
pub trait ToValue {
    /// Static type of the produced value
    fn value_type() -> ValueType
    where
        Self: Sized;

    /// Perform the conversion
    fn to_value(&self) -> Value;
}

/// Convert a `Value` into a Rust value
pub trait FromValue: Sized {
    /// Perform the conversion
    fn from_value(value: &Value) -> Result<Self, ConversionError>;
}

fn mismatch(expected: &str, value: &Value) -> ConversionError {
    ConversionError {
        expected: expected.to_string(),
        got: value.type_name().to_string(),
    }
}

macro_rules! scalar_conversions {
    ($($ty:ty => $variant:ident, $vt:expr, $name:literal;)*) => {
        $(
            impl ToValue for $ty {
                fn value_type() -> ValueType {
                    $vt
                }
                fn to_value(&self) -> Value {
                    Value::$variant(*self)
                }
            }

            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self, ConversionError> {
                    match value {
                        Value::$variant(v) => Ok(*v),
                        other => Err(mismatch($name, other)),
                    }
                }
            }
        )*
    };
}

scalar_conversions! {
    bool => Bool, ValueType::Bool, "bool";
    i32 => I32, ValueType::I32, "i32";
    i64 => I64, ValueType::I64, "i64";
    f64 => F64, ValueType::F64, "f64";
}

impl ToValue for () {
    fn value_type() -> ValueType {
        ValueType::Void
    }
    fn to_value(&self) -> Value {
        Value::Null
    }
}

impl FromValue for () {
    fn from_value(_value: &Value) -> Result<Self, ConversionError> {
        Ok(())
    }
}

impl ToValue for String {
    fn value_type() -> ValueType {
        ValueType::Str
    }
    fn to_value(&self) -> Value {
        Value::Str(Arc::from(self.as_str()))
    }
}

impl ToValue for &str {
    fn value_type() -> ValueType {
        ValueType::Str
    }
    fn to_value(&self) -> Value {
        Value::str(self)
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(mismatch("string", other)),
        }
    }
}

impl FromValue for ObjectRef {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Object(o) => Ok(o.clone()),
            other => Err(mismatch("object", other)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip() {
        assert_eq!(i32::from_value(&42.to_value()).unwrap(), 42);
        assert_eq!(i64::from_value(&7i64.to_value()).unwrap(), 7);
        assert!(bool::from_value(&true.to_value()).unwrap());
        assert_eq!(String::from_value(&"hi".to_value()).unwrap(), "hi");
    }

    #[test]
    fn test_mismatch() {
        let err = i32::from_value(&Value::str("x")).unwrap_err();
        assert_eq!(err.expected, "i32");
        assert_eq!(err.got, "string");
        let thrown: Thrown = err.into();
        assert_eq!(thrown.kind(), ThrownKind::IllegalArgument);
    }

    #[test]
    fn test_option() {
        assert_eq!(Option::<i32>::from_value(&Value::Null).unwrap(), None);
        assert_eq!(Option::<i32>::from_value(&Value::I32(1)).unwrap(), Some(1));
    }

    #[test]
    fn test_value_types() {
        assert_eq!(<i32 as ToValue>::value_type(), ValueType::I32);
        assert_eq!(<String as ToValue>::value_type(), ValueType::Str);
        assert_eq!(<() as ToValue>::value_type(), ValueType::Void);
    }
}
