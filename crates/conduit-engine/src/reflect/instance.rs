//! Class instances and by-name invocation

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use conduit_sdk::{CallResult, HostObject, Thrown, ThrownKind, Value};
use parking_lot::RwLock;

use super::class::Class;

/// An instance of a `Class`
pub struct Instance {
    class: Arc<Class>,
    fields: RwLock<Vec<Value>>,
    native: Option<Box<dyn Any + Send + Sync>>,
}

impl Instance {
    pub(crate) fn new(
        class: Arc<Class>,
        fields: Vec<Value>,
        native: Option<Box<dyn Any + Send + Sync>>,
    ) -> Self {
        Self {
            class,
            fields: RwLock::new(fields),
            native,
        }
    }

    /// The instance's class
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Read a field slot
    pub fn get_field(&self, slot: usize) -> Option<Value> {
        self.fields.read().get(slot).cloned()
    }

    /// Write a field slot; returns false if the slot does not exist
    pub fn set_field(&self, slot: usize, value: Value) -> bool {
        match self.fields.write().get_mut(slot) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    /// Read an instance field by name
    pub fn field_by_name(&self, name: &str) -> Option<Value> {
        let field = self.class.find_field(name)?;
        field.get(Some(self)).ok()
    }

    /// Write an instance field by name, bypassing finality
    pub fn set_field_by_name(&self, name: &str, value: Value) -> bool {
        match self.class.find_field(name) {
            Some(field) => field.set(Some(self), &value).is_ok(),
            None => false,
        }
    }

    /// Native state attached at allocation
    pub fn native<T: Any>(&self) -> Option<&T> {
        self.native.as_ref().and_then(|n| n.downcast_ref::<T>())
    }

    /// Invoke an instance method by name with virtual dispatch
    pub fn invoke(&self, name: &str, args: &[Value]) -> CallResult {
        let method = self.class.select_virtual(name, args).ok_or_else(|| {
            Thrown::new(
                ThrownKind::NoSuchMethod,
                format!(
                    "{} has no method {}/{} accepting the given arguments",
                    self.class.name(),
                    name,
                    args.len()
                ),
            )
        })?;
        method.call(Some(self), args)
    }
}

impl HostObject for Instance {
    fn type_name(&self) -> &str {
        self.class.name()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_instance_of(&self, type_name: &str) -> bool {
        self.class.is_subtype_of(type_name)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.name())
            .field("fields", &*self.fields.read())
            .finish()
    }
}

/// Resolve the receiver of a call to an engine instance.
///
/// Null receivers raise `NullReceiver`; non-instances raise `WrongReceiver`.
pub fn receiver_instance<'a>(target: &'a Value, what: &str) -> Result<&'a Instance, Thrown> {
    match target {
        Value::Null => Err(Thrown::new(
            ThrownKind::NullReceiver,
            format!("null receiver for {}", what),
        )),
        Value::Object(obj) => obj.downcast_ref::<Instance>().ok_or_else(|| {
            Thrown::new(
                ThrownKind::WrongReceiver,
                format!("{} is not an engine instance ({})", obj.type_name(), what),
            )
        }),
        other => Err(Thrown::new(
            ThrownKind::WrongReceiver,
            format!("{} value cannot receive {}", other.type_name(), what),
        )),
    }
}

/// Invoke a method by name on any value holding an instance
pub fn invoke(target: &Value, name: &str, args: &[Value]) -> CallResult {
    receiver_instance(target, name)?.invoke(name, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::ClassBuilder;
    use conduit_sdk::ValueType;

    #[test]
    fn test_invoke_by_name() {
        let class = ClassBuilder::new("Echo")
            .method("echo", &[ValueType::Str], ValueType::Str, |_, args| Ok(args[0].clone()))
            .build()
            .unwrap();
        let obj = class.new_instance(&[]).unwrap();
        let out = invoke(&obj, "echo", &[Value::str("hi")]).unwrap();
        assert_eq!(out, Value::str("hi"));
    }

    #[test]
    fn test_invoke_missing() {
        let class = ClassBuilder::new("Empty").build().unwrap();
        let obj = class.new_instance(&[]).unwrap();
        let err = invoke(&obj, "nope", &[]).unwrap_err();
        assert_eq!(err.kind(), ThrownKind::NoSuchMethod);
    }

    #[test]
    fn test_invoke_null_receiver() {
        let err = invoke(&Value::Null, "f", &[]).unwrap_err();
        assert_eq!(err.kind(), ThrownKind::NullReceiver);
        let err = invoke(&Value::I32(1), "f", &[]).unwrap_err();
        assert_eq!(err.kind(), ThrownKind::WrongReceiver);
    }
}
