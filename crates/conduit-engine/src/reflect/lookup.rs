//! Caller access contexts

use std::sync::Arc;

use super::class::Class;
use super::member::Visibility;

/// The context a member is requested from.
///
/// Public members are always reachable; module members only from the same
/// module; private members only from the declaring type. A trusted lookup
/// reaches everything.
#[derive(Debug, Clone, Default)]
pub struct Lookup {
    caller: Option<Arc<str>>,
    module: Option<Arc<str>>,
    trusted: bool,
}

impl Lookup {
    /// Lookup with public access only
    pub fn public() -> Self {
        Self::default()
    }

    /// Lookup from inside a class
    pub fn in_class(class: &Class) -> Self {
        Self {
            caller: Some(class.name_arc().clone()),
            module: Some(Arc::from(class.module())),
            trusted: false,
        }
    }

    /// Lookup from inside a module
    pub fn in_module(module: &str) -> Self {
        Self {
            caller: None,
            module: Some(Arc::from(module)),
            trusted: false,
        }
    }

    /// Lookup that bypasses visibility
    pub fn trusted() -> Self {
        Self {
            caller: None,
            module: None,
            trusted: true,
        }
    }

    /// Whether a member with `visibility` declared by `owner` in `owner_module`
    /// is reachable from this context
    pub fn can_access(&self, owner: &str, owner_module: &str, visibility: Visibility) -> bool {
        if self.trusted {
            return true;
        }
        match visibility {
            Visibility::Public => true,
            Visibility::Module => self.module.as_deref() == Some(owner_module),
            Visibility::Private => self.caller.as_deref() == Some(owner),
        }
    }

    /// Description for error messages
    pub fn describe(&self) -> String {
        if self.trusted {
            return "trusted lookup".to_string();
        }
        match (&self.caller, &self.module) {
            (Some(c), _) => format!("class {}", c),
            (None, Some(m)) => format!("module {}", m),
            (None, None) => "public lookup".to_string(),
        }
    }
}
