//! Member adapters
//!
//! `MemberAdapterBuilder` turns a reflective member plus a target shape into
//! an `Adapter`: a closure with the member, the receiver checks and the
//! argument conversions resolved up front. Calling an adapter performs no
//! name lookup; instance methods dispatch through the receiver's vtable with
//! a precomputed key.
//!
//! The builder does not cache. Callers that want reuse keep the `Adapter`.

use std::fmt;
use std::sync::Arc;

use conduit_sdk::{CallResult, Thrown, ThrownKind, Value, ValueType};

use crate::reflect::member::coerce_args;
use crate::reflect::{
    receiver_instance, Class, ClassRegistry, Constructor, Field, Instance, Interface, Lookup,
    Method, MethodKey,
};

use super::shape::FunctionalShape;

/// Errors while building an adapter
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    /// Target shape cannot be satisfied by the member
    #[error("Incompatible shape {shape} for {member}: {reason}")]
    IncompatibleShape {
        /// Requested shape
        shape: String,
        /// Member description
        member: String,
        /// What did not match
        reason: String,
    },

    /// Member is not accessible from the lookup, or a final field was asked for a setter
    #[error("Access denied to {member} from {from}")]
    Access {
        /// Member description
        member: String,
        /// Lookup description
        from: String,
    },

    /// Member kind has no adapter form
    #[error("Unsupported member kind: {0}")]
    UnsupportedMemberKind(String),
}

/// Type declaring a member
#[derive(Debug, Clone)]
pub enum Owner {
    /// A class
    Class(Arc<Class>),
    /// An interface (abstract methods only)
    Interface(Arc<Interface>),
}

impl Owner {
    fn name(&self) -> &str {
        match self {
            Owner::Class(c) => c.name(),
            Owner::Interface(i) => i.name(),
        }
    }

    fn module(&self) -> &str {
        match self {
            Owner::Class(c) => c.module(),
            Owner::Interface(i) => i.module(),
        }
    }
}

/// A reflective member
#[derive(Debug, Clone)]
pub enum Member {
    /// Method (static, instance, or abstract)
    Method(Arc<Method>),
    /// Field (static or instance)
    Field(Arc<Field>),
    /// Constructor
    Constructor(Arc<Constructor>),
    /// Static initializer
    Initializer,
}

/// A member together with the type it was obtained from
#[derive(Debug, Clone)]
pub struct MemberDescriptor {
    /// Declaring (or inheriting) type
    pub owner: Owner,
    /// The member
    pub member: Member,
}

impl MemberDescriptor {
    /// Method of a class
    pub fn method(class: &Arc<Class>, method: &Arc<Method>) -> Self {
        Self {
            owner: Owner::Class(class.clone()),
            member: Member::Method(method.clone()),
        }
    }

    /// Abstract method of an interface
    pub fn interface_method(interface: &Arc<Interface>, method: &Arc<Method>) -> Self {
        Self {
            owner: Owner::Interface(interface.clone()),
            member: Member::Method(method.clone()),
        }
    }

    /// Field of a class
    pub fn field(class: &Arc<Class>, field: &Arc<Field>) -> Self {
        Self {
            owner: Owner::Class(class.clone()),
            member: Member::Field(field.clone()),
        }
    }

    /// Constructor of a class
    pub fn constructor(class: &Arc<Class>, ctor: &Arc<Constructor>) -> Self {
        Self {
            owner: Owner::Class(class.clone()),
            member: Member::Constructor(ctor.clone()),
        }
    }

    /// Static initializer of a class
    pub fn initializer(class: &Arc<Class>) -> Self {
        Self {
            owner: Owner::Class(class.clone()),
            member: Member::Initializer,
        }
    }

    fn describe(&self) -> String {
        match &self.member {
            Member::Method(m) => format!("method {}", m),
            Member::Field(f) => format!("field {}.{}", self.owner.name(), f.name()),
            Member::Constructor(c) => {
                format!("constructor {}/{}", self.owner.name(), c.params().len())
            }
            Member::Initializer => format!("initializer of {}", self.owner.name()),
        }
    }
}

/// Which accessor a field adapter provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldAccess {
    /// Read the field
    #[default]
    Get,
    /// Write the field
    Set,
}

/// Everything needed to build one adapter
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    /// Shape the adapter must have
    pub target: FunctionalShape,
    /// Member to adapt
    pub source: MemberDescriptor,
    /// Receiver to bind; `None` means static or unbound
    pub receiver: Option<Value>,
    /// Getter or setter, for fields
    pub field_access: FieldAccess,
    /// Caller access context
    pub lookup: Lookup,
}

impl AdapterRequest {
    /// Request with no receiver, getter access and a public lookup
    pub fn new(target: FunctionalShape, source: MemberDescriptor) -> Self {
        Self {
            target,
            source,
            receiver: None,
            field_access: FieldAccess::Get,
            lookup: Lookup::public(),
        }
    }

    /// Bind a receiver
    pub fn bind(mut self, receiver: Value) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Select getter or setter
    pub fn access(mut self, access: FieldAccess) -> Self {
        self.field_access = access;
        self
    }

    /// Set the caller's lookup
    pub fn lookup(mut self, lookup: Lookup) -> Self {
        self.lookup = lookup;
        self
    }
}

/// How an adapter reaches its member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterFlavor {
    /// Static method
    StaticMethod,
    /// Instance method with a captured receiver
    BoundMethod,
    /// Instance method; receiver is the first shape parameter
    UnboundMethod,
    /// Field read
    Getter,
    /// Field write
    Setter,
    /// Instance creation
    Constructor,
}

type Invoker = Arc<dyn Fn(&[Value]) -> CallResult + Send + Sync>;

/// A resolved, directly invocable member
#[derive(Clone)]
pub struct Adapter {
    shape: FunctionalShape,
    flavor: AdapterFlavor,
    invoker: Invoker,
}

impl Adapter {
    /// Shape of the adapter
    pub fn shape(&self) -> &FunctionalShape {
        &self.shape
    }

    /// How the member is reached
    pub fn flavor(&self) -> AdapterFlavor {
        self.flavor
    }

    /// Invoke with arguments matching the shape
    pub fn call(&self, args: &[Value]) -> CallResult {
        if args.len() != self.shape.arity() {
            return Err(Thrown::new(
                ThrownKind::IllegalArgument,
                format!(
                    "adapter {} expects {} argument(s), got {}",
                    self.shape,
                    self.shape.arity(),
                    args.len()
                ),
            ));
        }
        (self.invoker)(args)
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("shape", &self.shape)
            .field("flavor", &self.flavor)
            .finish()
    }
}

/// Builds adapters for reflective members
#[derive(Debug, Clone, Default)]
pub struct MemberAdapterBuilder {
    registry: Arc<ClassRegistry>,
}

impl MemberAdapterBuilder {
    /// Builder that checks object assignability against `registry`
    pub fn new(registry: Arc<ClassRegistry>) -> Self {
        Self { registry }
    }

    /// Type registry used for assignability checks
    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    /// Build an adapter for `request`
    pub fn build(&self, request: &AdapterRequest) -> Result<Adapter, AdapterError> {
        let source = &request.source;
        let visibility = match &source.member {
            Member::Method(m) => m.visibility(),
            Member::Field(f) => f.visibility(),
            Member::Constructor(c) => c.visibility(),
            Member::Initializer => {
                return Err(AdapterError::UnsupportedMemberKind(source.describe()))
            }
        };
        let declaring = match &source.member {
            Member::Method(m) => m.declaring(),
            Member::Field(f) => f.declaring(),
            Member::Constructor(c) => c.declaring(),
            Member::Initializer => source.owner.name(),
        };
        if !request
            .lookup
            .can_access(declaring, source.owner.module(), visibility)
        {
            return Err(AdapterError::Access {
                member: source.describe(),
                from: request.lookup.describe(),
            });
        }

        let check = Check {
            registry: &self.registry,
            shape: &request.target,
            member: source.describe(),
        };
        match &source.member {
            Member::Method(m) => self.build_method(request, &check, m),
            Member::Field(f) => match request.field_access {
                FieldAccess::Get => self.build_getter(request, &check, f),
                FieldAccess::Set => self.build_setter(request, &check, f),
            },
            Member::Constructor(c) => self.build_constructor(request, &check, c),
            Member::Initializer => Err(AdapterError::UnsupportedMemberKind(source.describe())),
        }
    }

    /// Adapter for a static or unbound instance method with the method's own
    /// signature (receiver first for instance methods)
    pub fn unreflect(
        &self,
        class: &Arc<Class>,
        method: &Arc<Method>,
        lookup: &Lookup,
    ) -> Result<Adapter, AdapterError> {
        let mut shape = FunctionalShape::of_method(method);
        if !method.is_static() {
            shape = shape.with_receiver(ValueType::object(class.name()));
        }
        let request = AdapterRequest::new(shape, MemberDescriptor::method(class, method))
            .lookup(lookup.clone());
        self.build(&request)
    }

    /// Getter adapter; instance fields take the receiver as the only parameter
    pub fn unreflect_getter(
        &self,
        class: &Arc<Class>,
        field: &Arc<Field>,
        lookup: &Lookup,
    ) -> Result<Adapter, AdapterError> {
        let params = if field.is_static() {
            vec![]
        } else {
            vec![ValueType::object(class.name())]
        };
        let shape = FunctionalShape::new(field.name(), &params, field.ty().clone());
        let request = AdapterRequest::new(shape, MemberDescriptor::field(class, field))
            .lookup(lookup.clone());
        self.build(&request)
    }

    /// Setter adapter; instance fields take the receiver then the value
    pub fn unreflect_setter(
        &self,
        class: &Arc<Class>,
        field: &Arc<Field>,
        lookup: &Lookup,
    ) -> Result<Adapter, AdapterError> {
        let mut params = Vec::with_capacity(2);
        if !field.is_static() {
            params.push(ValueType::object(class.name()));
        }
        params.push(field.ty().clone());
        let shape = FunctionalShape::new(field.name(), &params, ValueType::Void);
        let request = AdapterRequest::new(shape, MemberDescriptor::field(class, field))
            .access(FieldAccess::Set)
            .lookup(lookup.clone());
        self.build(&request)
    }

    /// Constructor adapter returning the new instance
    pub fn unreflect_constructor(
        &self,
        class: &Arc<Class>,
        ctor: &Arc<Constructor>,
        lookup: &Lookup,
    ) -> Result<Adapter, AdapterError> {
        let shape = FunctionalShape::new("<init>", ctor.params(), ValueType::object(class.name()));
        let request = AdapterRequest::new(shape, MemberDescriptor::constructor(class, ctor))
            .lookup(lookup.clone());
        self.build(&request)
    }

    fn build_method(
        &self,
        request: &AdapterRequest,
        check: &Check<'_>,
        method: &Arc<Method>,
    ) -> Result<Adapter, AdapterError> {
        let shape = &request.target;
        let owner = request.source.owner.name();

        if method.is_static() {
            if request.receiver.is_some() {
                return Err(check.fail("static method cannot be bound to a receiver"));
            }
            check.params(shape.params(), method.params())?;
            check.ret(method.ret())?;
            let method = method.clone();
            let ret = shape.ret().clone();
            let name = method.name().to_string();
            let invoker: Invoker = Arc::new(move |args: &[Value]| {
                let args = coerce_args(method.params(), args, &name)?;
                adapt_return(method.call_unchecked(None, &args), &ret)
            });
            return Ok(self.adapter(shape, AdapterFlavor::StaticMethod, invoker));
        }

        let (flavor, bound) = match &request.receiver {
            Some(receiver) => {
                check.receiver_value(receiver, owner)?;
                check.params(shape.params(), method.params())?;
                (AdapterFlavor::BoundMethod, Some(receiver.clone()))
            }
            None => {
                let (first, rest) = shape
                    .params()
                    .split_first()
                    .ok_or_else(|| check.fail("unbound method needs a receiver parameter"))?;
                check.receiver_type(first, owner)?;
                check.params(rest, method.params())?;
                (AdapterFlavor::UnboundMethod, None)
            }
        };
        check.ret(method.ret())?;

        let target = VirtualTarget {
            method: method.clone(),
            key: method.key(),
            owner: Arc::from(owner),
            devirtualized: method.is_final() && !method.is_abstract(),
        };
        let ret = shape.ret().clone();
        let invoker: Invoker = match bound {
            Some(receiver) => Arc::new(move |args: &[Value]| {
                let this = receiver_instance(&receiver, target.method.name())?;
                adapt_return(target.invoke(this, args), &ret)
            }),
            None => Arc::new(move |args: &[Value]| {
                let this = receiver_instance(&args[0], target.method.name())?;
                adapt_return(target.invoke(this, &args[1..]), &ret)
            }),
        };
        Ok(self.adapter(shape, flavor, invoker))
    }

    fn build_getter(
        &self,
        request: &AdapterRequest,
        check: &Check<'_>,
        field: &Arc<Field>,
    ) -> Result<Adapter, AdapterError> {
        let shape = &request.target;
        let owner: Arc<str> = Arc::from(request.source.owner.name());
        check.ret(field.ty())?;
        let ret = shape.ret().clone();
        let field = field.clone();

        if field.is_static() {
            if request.receiver.is_some() || !shape.params().is_empty() {
                return Err(check.fail("static field getter takes no receiver"));
            }
            let invoker: Invoker = Arc::new(move |_: &[Value]| adapt_return(field.get(None), &ret));
            return Ok(self.adapter(shape, AdapterFlavor::Getter, invoker));
        }

        let invoker: Invoker = match &request.receiver {
            Some(receiver) => {
                check.receiver_value(receiver, &owner)?;
                check.params(shape.params(), &[])?;
                let receiver = receiver.clone();
                Arc::new(move |_: &[Value]| {
                    let this = checked_receiver(&receiver, &owner, field.name())?;
                    adapt_return(field.get(Some(this)), &ret)
                })
            }
            None => {
                match shape.params() {
                    [first] => check.receiver_type(first, &owner)?,
                    _ => return Err(check.fail("instance field getter takes one receiver")),
                }
                Arc::new(move |args: &[Value]| {
                    let this = checked_receiver(&args[0], &owner, field.name())?;
                    adapt_return(field.get(Some(this)), &ret)
                })
            }
        };
        Ok(self.adapter(shape, AdapterFlavor::Getter, invoker))
    }

    fn build_setter(
        &self,
        request: &AdapterRequest,
        check: &Check<'_>,
        field: &Arc<Field>,
    ) -> Result<Adapter, AdapterError> {
        if field.is_final() {
            return Err(AdapterError::Access {
                member: request.source.describe(),
                from: format!("{} (field is final)", request.lookup.describe()),
            });
        }
        let shape = &request.target;
        let owner: Arc<str> = Arc::from(request.source.owner.name());
        check.ret(&ValueType::Void)?;
        let field = field.clone();

        if field.is_static() {
            if request.receiver.is_some() {
                return Err(check.fail("static field setter takes no receiver"));
            }
            check.params(shape.params(), std::slice::from_ref(field.ty()))?;
            let invoker: Invoker = Arc::new(move |args: &[Value]| {
                field.set(None, &args[0])?;
                Ok(Value::Null)
            });
            return Ok(self.adapter(shape, AdapterFlavor::Setter, invoker));
        }

        let invoker: Invoker = match &request.receiver {
            Some(receiver) => {
                check.receiver_value(receiver, &owner)?;
                check.params(shape.params(), std::slice::from_ref(field.ty()))?;
                let receiver = receiver.clone();
                Arc::new(move |args: &[Value]| {
                    let this = checked_receiver(&receiver, &owner, field.name())?;
                    field.set(Some(this), &args[0])?;
                    Ok(Value::Null)
                })
            }
            None => {
                let (first, rest) = shape
                    .params()
                    .split_first()
                    .ok_or_else(|| check.fail("instance field setter needs a receiver parameter"))?;
                check.receiver_type(first, &owner)?;
                check.params(rest, std::slice::from_ref(field.ty()))?;
                Arc::new(move |args: &[Value]| {
                    let this = checked_receiver(&args[0], &owner, field.name())?;
                    field.set(Some(this), &args[1])?;
                    Ok(Value::Null)
                })
            }
        };
        Ok(self.adapter(shape, AdapterFlavor::Setter, invoker))
    }

    fn build_constructor(
        &self,
        request: &AdapterRequest,
        check: &Check<'_>,
        ctor: &Arc<Constructor>,
    ) -> Result<Adapter, AdapterError> {
        let class = match &request.source.owner {
            Owner::Class(c) => c.clone(),
            Owner::Interface(_) => return Err(check.fail("interfaces have no constructors")),
        };
        if request.receiver.is_some() {
            return Err(check.fail("constructor cannot be bound to a receiver"));
        }
        let shape = &request.target;
        check.params(shape.params(), ctor.params())?;
        check.ret(&ValueType::object(class.name()))?;
        let ctor = ctor.clone();
        let ret = shape.ret().clone();
        let invoker: Invoker =
            Arc::new(move |args: &[Value]| adapt_return(class.construct(&ctor, args), &ret));
        Ok(self.adapter(shape, AdapterFlavor::Constructor, invoker))
    }

    fn adapter(&self, shape: &FunctionalShape, flavor: AdapterFlavor, invoker: Invoker) -> Adapter {
        Adapter {
            shape: shape.clone(),
            flavor,
            invoker,
        }
    }
}

/// Build-time shape checks
struct Check<'a> {
    registry: &'a ClassRegistry,
    shape: &'a FunctionalShape,
    member: String,
}

impl Check<'_> {
    fn fail(&self, reason: impl Into<String>) -> AdapterError {
        AdapterError::IncompatibleShape {
            shape: self.shape.to_string(),
            member: self.member.clone(),
            reason: reason.into(),
        }
    }

    /// Each shape parameter must be assignable to the member parameter
    fn params(&self, shape: &[ValueType], member: &[ValueType]) -> Result<(), AdapterError> {
        if shape.len() != member.len() {
            return Err(self.fail(format!(
                "arity {} does not match member arity {}",
                shape.len(),
                member.len()
            )));
        }
        for (i, (from, to)) in shape.iter().zip(member).enumerate() {
            if !self.registry.is_assignable(from, to) && *from != ValueType::Any {
                return Err(self.fail(format!("parameter {}: {} is not assignable to {}", i, from, to)));
            }
        }
        Ok(())
    }

    /// The member's result must be assignable to the shape's return, unless
    /// the shape discards it
    fn ret(&self, member_ret: &ValueType) -> Result<(), AdapterError> {
        let target = self.shape.ret();
        if *target == ValueType::Void || self.registry.is_assignable(member_ret, target) {
            return Ok(());
        }
        if *member_ret == ValueType::Void {
            return Err(self.fail(format!("member returns void, shape expects {}", target)));
        }
        Err(self.fail(format!("return {} is not assignable to {}", member_ret, target)))
    }

    fn receiver_type(&self, ty: &ValueType, owner: &str) -> Result<(), AdapterError> {
        match ty {
            ValueType::Any => Ok(()),
            ValueType::Object(name)
                if self.registry.is_subtype(name, owner) || self.registry.is_subtype(owner, name) =>
            {
                Ok(())
            }
            other => Err(self.fail(format!("receiver type {} is not {}", other, owner))),
        }
    }

    fn receiver_value(&self, receiver: &Value, owner: &str) -> Result<(), AdapterError> {
        match receiver {
            Value::Object(obj) if obj.downcast_ref::<Instance>().is_some() => {
                if obj.is_instance_of(owner) {
                    Ok(())
                } else {
                    Err(self.fail(format!("receiver {} is not a {}", obj.type_name(), owner)))
                }
            }
            Value::Null => Err(self.fail("bound receiver is null")),
            other => Err(self.fail(format!("{} value cannot be a receiver", other.type_name()))),
        }
    }
}

/// An instance method resolved once, dispatched per receiver
struct VirtualTarget {
    method: Arc<Method>,
    key: MethodKey,
    owner: Arc<str>,
    devirtualized: bool,
}

impl VirtualTarget {
    fn invoke(&self, this: &Instance, args: &[Value]) -> CallResult {
        let class = this.class();
        if !class.is_subtype_of(&self.owner) {
            return Err(wrong_receiver(class.name(), &self.owner, self.method.name()));
        }
        let args = coerce_args(self.method.params(), args, self.method.name())?;
        if self.devirtualized {
            return self.method.call_unchecked(Some(this), &args);
        }
        let body = class.resolve_virtual(&self.key).unwrap_or(&self.method);
        body.call_unchecked(Some(this), &args)
    }
}

fn checked_receiver<'a>(value: &'a Value, owner: &str, what: &str) -> Result<&'a Instance, Thrown> {
    let this = receiver_instance(value, what)?;
    if this.class().is_subtype_of(owner) {
        Ok(this)
    } else {
        Err(wrong_receiver(this.class().name(), owner, what))
    }
}

fn wrong_receiver(actual: &str, expected: &str, what: &str) -> Thrown {
    Thrown::new(
        ThrownKind::WrongReceiver,
        format!("{}: receiver {} is not a {}", what, actual, expected),
    )
}

fn adapt_return(result: CallResult, ret: &ValueType) -> CallResult {
    let value = result?;
    if *ret == ValueType::Void {
        return Ok(Value::Null);
    }
    value.coerce(ret).ok_or_else(|| {
        Thrown::new(
            ThrownKind::IllegalArgument,
            format!("result {} does not conform to {}", value.type_name(), ret),
        )
    })
}
