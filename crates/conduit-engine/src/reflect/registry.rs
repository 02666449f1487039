//! Name-based type registry for static assignability checks

use std::sync::Arc;

use conduit_sdk::ValueType;
use dashmap::DashMap;
use rustc_hash::FxBuildHasher;

use super::class::Class;
use super::interface::Interface;

/// A registered class or interface
#[derive(Debug, Clone)]
pub enum RegisteredType {
    /// A class
    Class(Arc<Class>),
    /// An interface
    Interface(Arc<Interface>),
}

/// Thread-safe registry of named types.
///
/// Only caller-declared types belong here; synthesized forwarding classes are
/// never registered so the registry cannot pin generated modules.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    types: DashMap<Arc<str>, RegisteredType, FxBuildHasher>,
}

impl ClassRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class, replacing any type of the same name
    pub fn register_class(&self, class: &Arc<Class>) {
        self.types
            .insert(class.name_arc().clone(), RegisteredType::Class(class.clone()));
    }

    /// Register an interface, replacing any type of the same name
    pub fn register_interface(&self, interface: &Arc<Interface>) {
        self.types.insert(
            interface.name_arc().clone(),
            RegisteredType::Interface(interface.clone()),
        );
    }

    /// Look up a class by name
    pub fn class(&self, name: &str) -> Option<Arc<Class>> {
        match self.types.get(name)?.value() {
            RegisteredType::Class(c) => Some(c.clone()),
            RegisteredType::Interface(_) => None,
        }
    }

    /// Look up an interface by name
    pub fn interface(&self, name: &str) -> Option<Arc<Interface>> {
        match self.types.get(name)?.value() {
            RegisteredType::Interface(i) => Some(i.clone()),
            RegisteredType::Class(_) => None,
        }
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if no types are registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Whether type `sub` is `sup` or one of its subtypes.
    ///
    /// Unregistered names are only related to themselves.
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        if sub == sup {
            return true;
        }
        match self.class(sub) {
            Some(class) => class.is_subtype_of(sup),
            None => false,
        }
    }

    /// Whether a value of static type `from` can be passed where `to` is expected
    pub fn is_assignable(&self, from: &ValueType, to: &ValueType) -> bool {
        if from == to || *to == ValueType::Any || from.widens_to(to) {
            return true;
        }
        match (from, to) {
            (ValueType::Object(a), ValueType::Object(b)) => self.is_subtype(a, b),
            _ => false,
        }
    }
}
