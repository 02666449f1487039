//! Class members: methods, fields, and constructors
//!
//! Members are immutable once their class is built. Bodies are plain Rust
//! closures; instance bodies receive the receiver as `&Instance`.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use conduit_sdk::{CallResult, Thrown, ThrownKind, Value, ValueType};
use parking_lot::RwLock;

use super::instance::Instance;

/// Body of an instance method
pub type InstanceFn = Arc<dyn Fn(&Instance, &[Value]) -> CallResult + Send + Sync>;

/// Body of a static method
pub type StaticFn = Arc<dyn Fn(&[Value]) -> CallResult + Send + Sync>;

/// Body of a constructor; runs after fields are default-initialized
pub type ConstructorFn = Arc<dyn Fn(&Instance, &[Value]) -> Result<(), Thrown> + Send + Sync>;

/// Member visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Visibility {
    /// Accessible from anywhere
    #[default]
    Public,
    /// Accessible from the declaring module only
    Module,
    /// Accessible from the declaring type only
    Private,
}

/// Implementation of a method
#[derive(Clone)]
pub enum MethodBody {
    /// Receives the receiver instance
    Instance(InstanceFn),
    /// No receiver
    Static(StaticFn),
    /// Declared without an implementation (interface methods)
    Abstract,
}

/// Name plus parameter types; identifies an override slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    /// Method name
    pub name: Arc<str>,
    /// Parameter types
    pub params: Vec<ValueType>,
}

/// A method declared by a class or interface
pub struct Method {
    pub(crate) name: Arc<str>,
    pub(crate) params: Vec<ValueType>,
    pub(crate) ret: ValueType,
    pub(crate) visibility: Visibility,
    pub(crate) is_final: bool,
    pub(crate) declaring: Arc<str>,
    pub(crate) body: MethodBody,
}

impl Method {
    /// Method name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter types
    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    /// Return type
    pub fn ret(&self) -> &ValueType {
        &self.ret
    }

    /// Number of parameters
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Visibility
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Name of the declaring class or interface
    pub fn declaring(&self) -> &str {
        &self.declaring
    }

    /// Whether this method has no receiver
    pub fn is_static(&self) -> bool {
        matches!(self.body, MethodBody::Static(_))
    }

    /// Whether this method has no implementation
    pub fn is_abstract(&self) -> bool {
        matches!(self.body, MethodBody::Abstract)
    }

    /// Whether subclasses may not override this method
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Override slot key
    pub fn key(&self) -> MethodKey {
        MethodKey {
            name: self.name.clone(),
            params: self.params.clone(),
        }
    }

    /// Invoke after validating and widening the arguments.
    ///
    /// No virtual resolution happens here: `self` is the body that runs.
    pub fn call(&self, this: Option<&Instance>, args: &[Value]) -> CallResult {
        let args = coerce_args(&self.params, args, &self.name)?;
        self.call_unchecked(this, &args)
    }

    /// Invoke with arguments already known to match the parameter types
    pub(crate) fn call_unchecked(&self, this: Option<&Instance>, args: &[Value]) -> CallResult {
        match &self.body {
            MethodBody::Static(f) => f(args),
            MethodBody::Instance(f) => match this {
                Some(receiver) => f(receiver, args),
                None => Err(Thrown::new(
                    ThrownKind::NullReceiver,
                    format!("{} requires a receiver", self),
                )),
            },
            MethodBody::Abstract => Err(Thrown::new(
                ThrownKind::AbstractMethod,
                format!("{} has no implementation", self),
            )),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.declaring, self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({})", self)
    }
}

/// Where a field's value lives
pub(crate) enum FieldStorage {
    /// Slot in each instance
    Instance(usize),
    /// One cell shared by the class
    Static(RwLock<Value>),
}

/// A field declared by a class
pub struct Field {
    pub(crate) name: Arc<str>,
    pub(crate) ty: ValueType,
    pub(crate) is_final: bool,
    pub(crate) visibility: Visibility,
    pub(crate) declaring: Arc<str>,
    pub(crate) storage: FieldStorage,
}

impl Field {
    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type
    pub fn ty(&self) -> &ValueType {
        &self.ty
    }

    /// Whether the field belongs to the class rather than to instances
    pub fn is_static(&self) -> bool {
        matches!(self.storage, FieldStorage::Static(_))
    }

    /// Whether the field may not be written after construction
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Visibility
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Name of the declaring class
    pub fn declaring(&self) -> &str {
        &self.declaring
    }

    /// Read the field. Instance fields require a receiver.
    pub fn get(&self, this: Option<&Instance>) -> CallResult {
        match &self.storage {
            FieldStorage::Static(cell) => Ok(cell.read().clone()),
            FieldStorage::Instance(slot) => {
                let receiver = this.ok_or_else(|| self.missing_receiver())?;
                receiver.get_field(*slot).ok_or_else(|| self.bad_slot(*slot))
            }
        }
    }

    /// Write the field after checking the value against the declared type.
    ///
    /// Finality is not enforced here; adapters refuse setters on final fields.
    pub fn set(&self, this: Option<&Instance>, value: &Value) -> Result<(), Thrown> {
        let value = value.coerce(&self.ty).ok_or_else(|| {
            Thrown::new(
                ThrownKind::IllegalArgument,
                format!(
                    "cannot store {} in field {}.{}: {}",
                    value.type_name(),
                    self.declaring,
                    self.name,
                    self.ty
                ),
            )
        })?;
        match &self.storage {
            FieldStorage::Static(cell) => {
                *cell.write() = value;
                Ok(())
            }
            FieldStorage::Instance(slot) => {
                let receiver = this.ok_or_else(|| self.missing_receiver())?;
                if receiver.set_field(*slot, value) {
                    Ok(())
                } else {
                    Err(self.bad_slot(*slot))
                }
            }
        }
    }

    fn missing_receiver(&self) -> Thrown {
        Thrown::new(
            ThrownKind::NullReceiver,
            format!("field {}.{} requires a receiver", self.declaring, self.name),
        )
    }

    fn bad_slot(&self, slot: usize) -> Thrown {
        Thrown::new(
            ThrownKind::WrongReceiver,
            format!(
                "receiver has no slot {} for field {}.{}",
                slot, self.declaring, self.name
            ),
        )
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({}.{}: {})", self.declaring, self.name, self.ty)
    }
}

/// A constructor declared by a class
pub struct Constructor {
    pub(crate) params: Vec<ValueType>,
    pub(crate) visibility: Visibility,
    pub(crate) declaring: Arc<str>,
    pub(crate) body: Option<ConstructorFn>,
}

impl Constructor {
    /// Parameter types
    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    /// Visibility
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Name of the declaring class
    pub fn declaring(&self) -> &str {
        &self.declaring
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constructor({}/{})", self.declaring, self.params.len())
    }
}

/// Validate the argument count and widen arguments to the parameter types.
///
/// Borrows the input when every argument already conforms.
pub(crate) fn coerce_args<'a>(
    params: &[ValueType],
    args: &'a [Value],
    what: &str,
) -> Result<Cow<'a, [Value]>, Thrown> {
    if params.len() != args.len() {
        return Err(Thrown::new(
            ThrownKind::IllegalArgument,
            format!(
                "{} expects {} argument(s), got {}",
                what,
                params.len(),
                args.len()
            ),
        ));
    }
    if params.iter().zip(args).all(|(p, a)| a.conforms_to(p)) {
        return Ok(Cow::Borrowed(args));
    }
    let mut out = Vec::with_capacity(args.len());
    for (i, (p, a)) in params.iter().zip(args).enumerate() {
        let v = a.coerce(p).ok_or_else(|| {
            Thrown::new(
                ThrownKind::IllegalArgument,
                format!(
                    "{}: argument {} has type {}, expected {}",
                    what,
                    i,
                    a.type_name(),
                    p
                ),
            )
        })?;
        out.push(v);
    }
    Ok(Cow::Owned(out))
}

/// Default value for a freshly allocated field slot
pub(crate) fn default_value(ty: &ValueType) -> Value {
    match ty {
        ValueType::Bool => Value::Bool(false),
        ValueType::I32 => Value::I32(0),
        ValueType::I64 => Value::I64(0),
        ValueType::F64 => Value::F64(0.0),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_args_borrows_when_conforming() {
        let params = [ValueType::I32, ValueType::Str];
        let args = [Value::I32(1), Value::str("a")];
        let out = coerce_args(&params, &args, "f").unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn test_coerce_args_widens() {
        let params = [ValueType::I64];
        let args = [Value::I32(5)];
        let out = coerce_args(&params, &args, "f").unwrap();
        assert_eq!(out[0], Value::I64(5));
    }

    #[test]
    fn test_coerce_args_arity() {
        let err = coerce_args(&[ValueType::I32], &[], "f").unwrap_err();
        assert_eq!(err.kind(), ThrownKind::IllegalArgument);
        assert!(err.message().contains("expects 1"));
    }

    #[test]
    fn test_defaults() {
        assert_eq!(default_value(&ValueType::I32), Value::I32(0));
        assert_eq!(default_value(&ValueType::Str), Value::Null);
    }
}
