//! Errors raised by member bodies and by dispatch
//!
//! A `Thrown` is shared: cloning it keeps the same identity, so a caller can
//! tell with `Thrown::ptr_eq` that the error it catches from a forwarding
//! object is exactly the one the backing member raised.

use std::fmt;
use std::sync::Arc;

use crate::value::Value;

/// Result of calling a member or a forwarding object
pub type CallResult = Result<Value, Thrown>;

/// Category of a thrown error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrownKind {
    /// Raised by user code inside a member body
    User,
    /// The receiver (or the instance a supplier produced) is null
    NullReceiver,
    /// The receiver is not an instance of the expected type
    WrongReceiver,
    /// An argument has the wrong type or the argument count is wrong
    IllegalArgument,
    /// The called method has no implementation on the receiver
    AbstractMethod,
    /// No method with the given name and arity exists
    NoSuchMethod,
}

struct ThrownInner {
    kind: ThrownKind,
    message: String,
    payload: Option<Value>,
}

/// A shared, identity-preserving error value.
#[derive(Clone)]
pub struct Thrown(Arc<ThrownInner>);

impl Thrown {
    /// Create an error of the given kind
    pub fn new(kind: ThrownKind, message: impl Into<String>) -> Self {
        Thrown(Arc::new(ThrownInner {
            kind,
            message: message.into(),
            payload: None,
        }))
    }

    /// Create a user error
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ThrownKind::User, message)
    }

    /// Create a user error carrying a value
    pub fn with_payload(message: impl Into<String>, payload: Value) -> Self {
        Thrown(Arc::new(ThrownInner {
            kind: ThrownKind::User,
            message: message.into(),
            payload: Some(payload),
        }))
    }

    /// Error category
    pub fn kind(&self) -> ThrownKind {
        self.0.kind
    }

    /// Human-readable message
    pub fn message(&self) -> &str {
        &self.0.message
    }

    /// Value attached by the thrower, if any
    pub fn payload(&self) -> Option<&Value> {
        self.0.payload.as_ref()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Thrown) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Thrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thrown")
            .field("kind", &self.0.kind)
            .field("message", &self.0.message)
            .finish()
    }
}

impl fmt::Display for Thrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.0.kind, self.0.message)
    }
}

impl std::error::Error for Thrown {}
