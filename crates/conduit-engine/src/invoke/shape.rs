//! Functional and interface shapes
//!
//! Shapes are structural: two interfaces with the same name and the same
//! ordered signatures produce equal `InterfaceShape`s, which is what the
//! shape cache keys on.

use std::fmt;
use std::sync::Arc;

use conduit_sdk::ValueType;

use crate::reflect::{Interface, Method};

/// A callable signature: name, parameter types, return type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionalShape {
    name: Arc<str>,
    params: Vec<ValueType>,
    ret: ValueType,
}

impl FunctionalShape {
    /// Create a shape
    pub fn new(name: &str, params: &[ValueType], ret: ValueType) -> Self {
        Self {
            name: Arc::from(name),
            params: params.to_vec(),
            ret,
        }
    }

    /// Shape with the same signature as `method`
    pub fn of_method(method: &Method) -> Self {
        Self {
            name: Arc::from(method.name()),
            params: method.params().to_vec(),
            ret: method.ret().clone(),
        }
    }

    /// Same shape with `receiver` prepended to the parameters
    pub fn with_receiver(&self, receiver: ValueType) -> Self {
        let mut params = Vec::with_capacity(self.params.len() + 1);
        params.push(receiver);
        params.extend(self.params.iter().cloned());
        Self {
            name: self.name.clone(),
            params,
            ret: self.ret.clone(),
        }
    }

    /// Name
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
}

impl fmt::Display for FunctionalShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// The ordered method shapes of an interface, qualified by its module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterfaceShape {
    module: Arc<str>,
    name: Arc<str>,
    methods: Arc<[FunctionalShape]>,
}

impl InterfaceShape {
    /// Shape of an interface
    pub fn of(interface: &Interface) -> Self {
        Self {
            module: Arc::from(interface.module()),
            name: interface.name_arc().clone(),
            methods: interface
                .methods()
                .iter()
                .map(|m| FunctionalShape::of_method(m))
                .collect(),
        }
    }

    /// Interface name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declaring module of the interface
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Method shapes in slot order
    pub fn methods(&self) -> &[FunctionalShape] {
        &self.methods
    }

    /// Number of methods
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the interface declares no methods
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Largest parameter count across methods
    pub fn max_arity(&self) -> usize {
        self.methods.iter().map(|m| m.arity()).max().unwrap_or(0)
    }
}

impl fmt::Display for InterfaceShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.name)?;
        for (i, m) in self.methods.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, " {}", m)?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::InterfaceBuilder;
    use rustc_hash::FxHashSet;

    #[test]
    fn test_structural_equality() {
        let a = InterfaceBuilder::new("Source")
            .method("next", &[ValueType::I32], ValueType::Str)
            .build()
            .unwrap();
        let b = InterfaceBuilder::new("Source")
            .method("next", &[ValueType::I32], ValueType::Str)
            .build()
            .unwrap();
        let mut set = FxHashSet::default();
        set.insert(InterfaceShape::of(&a));
        assert!(set.contains(&InterfaceShape::of(&b)));
    }

    #[test]
    fn test_module_distinguishes_shapes() {
        let build = |module: &str| {
            InterfaceBuilder::new("Source")
                .module(module)
                .method("next", &[ValueType::I32], ValueType::Str)
                .build()
                .unwrap()
        };
        let a = InterfaceShape::of(&build("a"));
        let b = InterfaceShape::of(&build("b"));
        assert_eq!(a.module(), "a");
        assert_eq!(a.name(), b.name());
        assert_ne!(a, b);
    }

    #[test]
    fn test_max_arity_and_display() {
        let iface = InterfaceBuilder::new("Math")
            .method("neg", &[ValueType::I64], ValueType::I64)
            .method("add", &[ValueType::I64, ValueType::I64], ValueType::I64)
            .build()
            .unwrap();
        let shape = InterfaceShape::of(&iface);
        assert_eq!(shape.max_arity(), 2);
        assert_eq!(shape.methods()[1].to_string(), "add(i64, i64) -> i64");
    }

    #[test]
    fn test_with_receiver() {
        let shape = FunctionalShape::new("get", &[], ValueType::I32);
        let unbound = shape.with_receiver(ValueType::object("Box"));
        assert_eq!(unbound.arity(), 1);
        assert_eq!(unbound.params()[0], ValueType::object("Box"));
    }
}
