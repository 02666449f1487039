//! Classes and the class builder
//!
//! A class is immutable after `ClassBuilder::build`. Building computes:
//! - the vtable (override slots, inherited entries included)
//! - one itable per implemented interface (slot order = interface order)
//! - instance field slots (superclass slots first)

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use conduit_sdk::{CallResult, Thrown, ThrownKind, Value, ValueType};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use super::instance::Instance;
use super::interface::Interface;
use super::member::{
    coerce_args, default_value, Constructor, ConstructorFn, Field, FieldStorage, InstanceFn,
    Method, MethodBody, MethodKey, StaticFn, Visibility,
};

/// Errors while building a class or interface
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassBuildError {
    /// Type name is empty
    #[error("Type name must not be empty")]
    EmptyName,

    /// Two methods share name and parameter types
    #[error("Duplicate method {method} in {owner}")]
    DuplicateMethod {
        /// Declaring type
        owner: String,
        /// Method name
        method: String,
    },

    /// Two fields share a name
    #[error("Duplicate field {field} in {owner}")]
    DuplicateField {
        /// Declaring type
        owner: String,
        /// Field name
        field: String,
    },

    /// Field declared with type void
    #[error("Field {owner}.{field} cannot have type void")]
    InvalidFieldType {
        /// Declaring type
        owner: String,
        /// Field name
        field: String,
    },

    /// Parameter declared with type void
    #[error("Member {owner}.{member} has a void parameter")]
    InvalidParameterType {
        /// Declaring type
        owner: String,
        /// Member name
        member: String,
    },

    /// Override of a final method
    #[error("{owner} overrides final method {method}")]
    OverridesFinal {
        /// Declaring type
        owner: String,
        /// Method name
        method: String,
    },

    /// Static initializer raised an error
    #[error("Static initializer of {owner} failed: {reason}")]
    InitializerFailed {
        /// Declaring type
        owner: String,
        /// Error message
        reason: String,
    },
}

/// Static initializer body
pub type InitializerFn = Box<dyn FnOnce(&Class) -> Result<(), Thrown> + Send>;

/// Interface method table of a class
pub struct Itable {
    interface: Arc<Interface>,
    slots: Vec<Option<Arc<Method>>>,
}

impl Itable {
    /// The implemented interface
    pub fn interface(&self) -> &Arc<Interface> {
        &self.interface
    }

    /// Implementation for a slot; `None` when the class leaves it abstract
    pub fn slot(&self, index: usize) -> Option<&Arc<Method>> {
        self.slots.get(index).and_then(|m| m.as_ref())
    }
}

/// A built class
pub struct Class {
    name: Arc<str>,
    module: Arc<str>,
    superclass: Option<Arc<Class>>,
    interfaces: Vec<Arc<Interface>>,
    methods: Vec<Arc<Method>>,
    fields: Vec<Arc<Field>>,
    constructors: Vec<Arc<Constructor>>,
    has_initializer: bool,
    vtable: FxHashMap<MethodKey, Arc<Method>>,
    by_name: FxHashMap<Arc<str>, Vec<Arc<Method>>>,
    itables: Vec<Itable>,
    slot_types: Vec<ValueType>,
}

impl Class {
    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared class name
    pub fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    /// Declaring module
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Direct superclass
    pub fn superclass(&self) -> Option<&Arc<Class>> {
        self.superclass.as_ref()
    }

    /// Implemented interfaces, inherited ones included
    pub fn interfaces(&self) -> &[Arc<Interface>] {
        &self.interfaces
    }

    /// Methods declared by this class
    pub fn methods(&self) -> &[Arc<Method>] {
        &self.methods
    }

    /// Fields declared by this class
    pub fn fields(&self) -> &[Arc<Field>] {
        &self.fields
    }

    /// Constructors declared by this class
    pub fn constructors(&self) -> &[Arc<Constructor>] {
        &self.constructors
    }

    /// Whether the class declares a static initializer
    pub fn has_initializer(&self) -> bool {
        self.has_initializer
    }

    /// Number of instance field slots, inherited ones included
    pub fn instance_slot_count(&self) -> usize {
        self.slot_types.len()
    }

    /// Whether this class is, extends, or implements `name`
    pub fn is_subtype_of(&self, name: &str) -> bool {
        if &*self.name == name {
            return true;
        }
        if self.interfaces.iter().any(|i| i.name() == name) {
            return true;
        }
        self.superclass
            .as_ref()
            .map(|s| s.is_subtype_of(name))
            .unwrap_or(false)
    }

    /// Find a method by name, searching superclasses
    pub fn find_method(&self, name: &str) -> Option<&Arc<Method>> {
        self.methods
            .iter()
            .find(|m| &*m.name == name)
            .or_else(|| self.superclass.as_ref().and_then(|s| s.find_method(name)))
    }

    /// Find a field by name, searching superclasses
    pub fn find_field(&self, name: &str) -> Option<&Arc<Field>> {
        self.fields
            .iter()
            .find(|f| &*f.name == name)
            .or_else(|| self.superclass.as_ref().and_then(|s| s.find_field(name)))
    }

    /// Find a declared constructor by arity
    pub fn find_constructor(&self, arity: usize) -> Option<&Arc<Constructor>> {
        self.constructors.iter().find(|c| c.params.len() == arity)
    }

    /// Most specific override for an instance method slot
    pub fn resolve_virtual(&self, key: &MethodKey) -> Option<&Arc<Method>> {
        self.vtable.get(key)
    }

    /// Itable for an interface.
    ///
    /// Pointer identity is checked first; name equality covers interfaces
    /// rebuilt with the same declaration.
    pub fn itable(&self, interface: &Arc<Interface>) -> Option<&Itable> {
        self.itables
            .iter()
            .find(|t| Arc::ptr_eq(&t.interface, interface))
            .or_else(|| {
                self.itables
                    .iter()
                    .find(|t| t.interface.name() == interface.name())
            })
    }

    /// Instance method by name whose parameters accept `args`.
    ///
    /// Exact conformance wins over widening.
    pub fn select_virtual(&self, name: &str, args: &[Value]) -> Option<&Arc<Method>> {
        let candidates = self.by_name.get(name)?;
        let arity_ok = |m: &&Arc<Method>| m.params.len() == args.len();
        candidates
            .iter()
            .filter(arity_ok)
            .find(|m| m.params.iter().zip(args).all(|(p, a)| a.conforms_to(p)))
            .or_else(|| {
                candidates
                    .iter()
                    .filter(arity_ok)
                    .find(|m| m.params.iter().zip(args).all(|(p, a)| a.coerce(p).is_some()))
            })
    }

    /// Construct an instance with the constructor matching `args`.
    ///
    /// A class without constructors accepts an empty argument list.
    pub fn new_instance(self: &Arc<Self>, args: &[Value]) -> CallResult {
        match self.find_constructor(args.len()) {
            Some(ctor) => {
                let ctor = ctor.clone();
                self.construct(&ctor, args)
            }
            None if args.is_empty() && self.constructors.is_empty() => {
                Ok(Value::Object(conduit_sdk::ObjectRef::new(self.alloc(None))))
            }
            None => Err(Thrown::new(
                ThrownKind::NoSuchMethod,
                format!("no constructor {}/{}", self.name, args.len()),
            )),
        }
    }

    /// Run a specific constructor
    pub fn construct(self: &Arc<Self>, ctor: &Constructor, args: &[Value]) -> CallResult {
        let args = coerce_args(&ctor.params, args, &self.name)?;
        let instance = self.alloc(None);
        if let Some(body) = &ctor.body {
            body(&instance, &args)?;
        }
        Ok(Value::Object(conduit_sdk::ObjectRef::new(instance)))
    }

    /// Allocate an instance with default field values
    pub(crate) fn alloc(self: &Arc<Self>, native: Option<Box<dyn Any + Send + Sync>>) -> Instance {
        let fields = self.slot_types.iter().map(default_value).collect();
        Instance::new(self.clone(), fields, native)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("methods", &self.methods.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}

struct PendingField {
    name: Arc<str>,
    ty: ValueType,
    is_static: bool,
    is_final: bool,
    visibility: Visibility,
}

enum LastMember {
    Method(usize),
    Field(usize),
    Constructor(usize),
}

/// Builder for `Class`
pub struct ClassBuilder {
    name: Arc<str>,
    module: Arc<str>,
    superclass: Option<Arc<Class>>,
    interfaces: Vec<Arc<Interface>>,
    methods: Vec<Method>,
    fields: Vec<PendingField>,
    constructors: Vec<Constructor>,
    initializer: Option<InitializerFn>,
    last: Option<LastMember>,
}

impl ClassBuilder {
    /// Start a class in the default module
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            module: Arc::from(""),
            superclass: None,
            interfaces: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            constructors: Vec::new(),
            initializer: None,
            last: None,
        }
    }

    /// Set the declaring module
    pub fn module(mut self, module: &str) -> Self {
        self.module = Arc::from(module);
        self
    }

    /// Set the superclass
    pub fn extends(mut self, superclass: &Arc<Class>) -> Self {
        self.superclass = Some(superclass.clone());
        self
    }

    /// Implement an interface
    pub fn implements(mut self, interface: &Arc<Interface>) -> Self {
        self.interfaces.push(interface.clone());
        self
    }

    /// Declare a public instance method
    pub fn method<F>(self, name: &str, params: &[ValueType], ret: ValueType, body: F) -> Self
    where
        F: Fn(&Instance, &[Value]) -> CallResult + Send + Sync + 'static,
    {
        let body: InstanceFn = Arc::new(body);
        self.push_method(name, params, ret, MethodBody::Instance(body))
    }

    /// Declare a public static method
    pub fn static_method<F>(self, name: &str, params: &[ValueType], ret: ValueType, body: F) -> Self
    where
        F: Fn(&[Value]) -> CallResult + Send + Sync + 'static,
    {
        let body: StaticFn = Arc::new(body);
        self.push_method(name, params, ret, MethodBody::Static(body))
    }

    /// Declare an abstract instance method
    pub fn abstract_method(self, name: &str, params: &[ValueType], ret: ValueType) -> Self {
        self.push_method(name, params, ret, MethodBody::Abstract)
    }

    fn push_method(
        mut self,
        name: &str,
        params: &[ValueType],
        ret: ValueType,
        body: MethodBody,
    ) -> Self {
        self.methods.push(Method {
            name: Arc::from(name),
            params: params.to_vec(),
            ret,
            visibility: Visibility::Public,
            is_final: false,
            declaring: self.name.clone(),
            body,
        });
        self.last = Some(LastMember::Method(self.methods.len() - 1));
        self
    }

    /// Declare a public instance field
    pub fn field(self, name: &str, ty: ValueType) -> Self {
        self.push_field(name, ty, false)
    }

    /// Declare a public static field
    pub fn static_field(self, name: &str, ty: ValueType) -> Self {
        self.push_field(name, ty, true)
    }

    fn push_field(mut self, name: &str, ty: ValueType, is_static: bool) -> Self {
        self.fields.push(PendingField {
            name: Arc::from(name),
            ty,
            is_static,
            is_final: false,
            visibility: Visibility::Public,
        });
        self.last = Some(LastMember::Field(self.fields.len() - 1));
        self
    }

    /// Declare a public constructor
    pub fn constructor<F>(mut self, params: &[ValueType], body: F) -> Self
    where
        F: Fn(&Instance, &[Value]) -> Result<(), Thrown> + Send + Sync + 'static,
    {
        let body: ConstructorFn = Arc::new(body);
        self.constructors.push(Constructor {
            params: params.to_vec(),
            visibility: Visibility::Public,
            declaring: self.name.clone(),
            body: Some(body),
        });
        self.last = Some(LastMember::Constructor(self.constructors.len() - 1));
        self
    }

    /// Declare a static initializer; it runs once inside `build`
    pub fn initializer<F>(mut self, body: F) -> Self
    where
        F: FnOnce(&Class) -> Result<(), Thrown> + Send + 'static,
    {
        self.initializer = Some(Box::new(body));
        self
    }

    /// Set the visibility of the most recently declared member
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        match self.last {
            Some(LastMember::Method(i)) => self.methods[i].visibility = visibility,
            Some(LastMember::Field(i)) => self.fields[i].visibility = visibility,
            Some(LastMember::Constructor(i)) => self.constructors[i].visibility = visibility,
            None => {}
        }
        self
    }

    /// Mark the most recently declared method or field final
    pub fn final_member(mut self) -> Self {
        match self.last {
            Some(LastMember::Method(i)) => self.methods[i].is_final = true,
            Some(LastMember::Field(i)) => self.fields[i].is_final = true,
            _ => {}
        }
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<Arc<Class>, ClassBuildError> {
        let owner = self.name.to_string();
        if self.name.is_empty() {
            return Err(ClassBuildError::EmptyName);
        }

        // Methods
        let mut seen = FxHashSet::default();
        for m in &self.methods {
            if m.params.contains(&ValueType::Void) {
                return Err(ClassBuildError::InvalidParameterType {
                    owner,
                    member: m.name.to_string(),
                });
            }
            if !seen.insert(m.key()) {
                return Err(ClassBuildError::DuplicateMethod {
                    owner,
                    method: m.name.to_string(),
                });
            }
        }
        let methods: Vec<Arc<Method>> = self.methods.into_iter().map(Arc::new).collect();

        let mut vtable = self
            .superclass
            .as_ref()
            .map(|s| s.vtable.clone())
            .unwrap_or_default();
        for m in methods.iter().filter(|m| !m.is_static()) {
            let key = m.key();
            if let Some(existing) = vtable.get(&key) {
                if existing.is_final {
                    return Err(ClassBuildError::OverridesFinal {
                        owner,
                        method: m.name.to_string(),
                    });
                }
            }
            vtable.insert(key, m.clone());
        }
        let mut by_name: FxHashMap<Arc<str>, Vec<Arc<Method>>> = FxHashMap::default();
        for m in vtable.values() {
            by_name.entry(m.name.clone()).or_default().push(m.clone());
        }

        // Fields
        let mut slot_types = self
            .superclass
            .as_ref()
            .map(|s| s.slot_types.clone())
            .unwrap_or_default();
        let mut field_names = FxHashSet::default();
        let mut fields = Vec::with_capacity(self.fields.len());
        for f in self.fields {
            if f.ty == ValueType::Void {
                return Err(ClassBuildError::InvalidFieldType {
                    owner,
                    field: f.name.to_string(),
                });
            }
            if !field_names.insert(f.name.clone()) {
                return Err(ClassBuildError::DuplicateField {
                    owner,
                    field: f.name.to_string(),
                });
            }
            let storage = if f.is_static {
                FieldStorage::Static(RwLock::new(default_value(&f.ty)))
            } else {
                slot_types.push(f.ty.clone());
                FieldStorage::Instance(slot_types.len() - 1)
            };
            fields.push(Arc::new(Field {
                name: f.name,
                ty: f.ty,
                is_final: f.is_final,
                visibility: f.visibility,
                declaring: self.name.clone(),
                storage,
            }));
        }

        for c in &self.constructors {
            if c.params.contains(&ValueType::Void) {
                return Err(ClassBuildError::InvalidParameterType {
                    owner,
                    member: "<init>".to_string(),
                });
            }
        }

        // Interfaces: declared first, then inherited ones not already present
        let mut interfaces = self.interfaces;
        if let Some(sup) = &self.superclass {
            for iface in &sup.interfaces {
                if !interfaces.iter().any(|i| i.name() == iface.name()) {
                    interfaces.push(iface.clone());
                }
            }
        }
        let itables = interfaces
            .iter()
            .map(|iface| Itable {
                interface: iface.clone(),
                slots: iface
                    .methods()
                    .iter()
                    .map(|m| vtable.get(&m.key()).filter(|m| !m.is_abstract()).cloned())
                    .collect(),
            })
            .collect();

        let class = Arc::new(Class {
            name: self.name,
            module: self.module,
            superclass: self.superclass,
            interfaces,
            methods,
            fields,
            constructors: self.constructors.into_iter().map(Arc::new).collect(),
            has_initializer: self.initializer.is_some(),
            vtable,
            by_name,
            itables,
            slot_types,
        });

        if let Some(init) = self.initializer {
            init(&class).map_err(|e| ClassBuildError::InitializerFailed {
                owner: class.name.to_string(),
                reason: e.to_string(),
            })?;
        }

        Ok(class)
    }
}
