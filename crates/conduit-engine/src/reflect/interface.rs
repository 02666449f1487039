//! Abstract interfaces
//!
//! An interface is an ordered list of abstract methods. The order defines
//! itable slots, which generated forwarders call by index.

use std::sync::Arc;

use conduit_sdk::ValueType;
use rustc_hash::FxHashSet;

use super::class::ClassBuildError;
use super::member::{Method, MethodBody, MethodKey, Visibility};

/// An abstract interface
#[derive(Debug)]
pub struct Interface {
    name: Arc<str>,
    module: Arc<str>,
    methods: Vec<Arc<Method>>,
}

impl Interface {
    /// Interface name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared interface name
    pub fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    /// Declaring module
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Abstract methods in slot order
    pub fn methods(&self) -> &[Arc<Method>] {
        &self.methods
    }

    /// Find a method by name, returning its slot
    pub fn find(&self, name: &str) -> Option<(usize, &Arc<Method>)> {
        self.methods
            .iter()
            .enumerate()
            .find(|(_, m)| &*m.name == name)
    }

    /// Slot of the method with the given key
    pub fn slot_of(&self, key: &MethodKey) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m.name == key.name && m.params == key.params)
    }
}

/// Builder for `Interface`
pub struct InterfaceBuilder {
    name: Arc<str>,
    module: Arc<str>,
    methods: Vec<(Arc<str>, Vec<ValueType>, ValueType)>,
}

impl InterfaceBuilder {
    /// Start an interface in the default module
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            module: Arc::from(""),
            methods: Vec::new(),
        }
    }

    /// Set the declaring module
    pub fn module(mut self, module: &str) -> Self {
        self.module = Arc::from(module);
        self
    }

    /// Declare an abstract method
    pub fn method(mut self, name: &str, params: &[ValueType], ret: ValueType) -> Self {
        self.methods.push((Arc::from(name), params.to_vec(), ret));
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<Arc<Interface>, ClassBuildError> {
        if self.name.is_empty() {
            return Err(ClassBuildError::EmptyName);
        }
        let mut seen = FxHashSet::default();
        let mut methods = Vec::with_capacity(self.methods.len());
        for (name, params, ret) in self.methods {
            if params.contains(&ValueType::Void) {
                return Err(ClassBuildError::InvalidParameterType {
                    owner: self.name.to_string(),
                    member: name.to_string(),
                });
            }
            let key = MethodKey {
                name: name.clone(),
                params: params.clone(),
            };
            if !seen.insert(key) {
                return Err(ClassBuildError::DuplicateMethod {
                    owner: self.name.to_string(),
                    method: name.to_string(),
                });
            }
            methods.push(Arc::new(Method {
                name,
                params,
                ret,
                visibility: Visibility::Public,
                is_final: false,
                declaring: self.name.clone(),
                body: MethodBody::Abstract,
            }));
        }
        Ok(Arc::new(Interface {
            name: self.name,
            module: self.module,
            methods,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_find() {
        let iface = InterfaceBuilder::new("Source")
            .method("getInt", &[], ValueType::I32)
            .method("toString", &[ValueType::I32], ValueType::Str)
            .build()
            .unwrap();
        assert_eq!(iface.methods().len(), 2);
        let (slot, m) = iface.find("toString").unwrap();
        assert_eq!(slot, 1);
        assert!(m.is_abstract());
        assert_eq!(m.declaring(), "Source");
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = InterfaceBuilder::new("Dup")
            .method("f", &[], ValueType::I32)
            .method("f", &[], ValueType::I64)
            .build()
            .unwrap_err();
        assert!(matches!(err, ClassBuildError::DuplicateMethod { .. }));
    }

    #[test]
    fn test_overloads_allowed() {
        let iface = InterfaceBuilder::new("Over")
            .method("f", &[], ValueType::I32)
            .method("f", &[ValueType::I32], ValueType::I32)
            .build()
            .unwrap();
        assert_eq!(iface.methods().len(), 2);
    }

    #[test]
    fn test_void_param_rejected() {
        let err = InterfaceBuilder::new("Bad")
            .method("f", &[ValueType::Void], ValueType::I32)
            .build()
            .unwrap_err();
        assert!(matches!(err, ClassBuildError::InvalidParameterType { .. }));
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(
            InterfaceBuilder::new("").build(),
            Err(ClassBuildError::EmptyName)
        ));
    }
}
