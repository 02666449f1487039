//! Conduit SDK - value model shared by adapters and forwarding objects
//!
//! This crate holds the small set of types that cross every Conduit boundary:
//! - `Value` / `ObjectRef`: dynamic values and shared host objects
//! - `ValueType`: the static type vocabulary used by functional shapes
//! - `Thrown`: errors raised by member bodies, with preserved identity
//! - `ToValue` / `FromValue`: conversions between Rust scalars and `Value`
//!
//! # Example
//!
//! ```ignore
//! use conduit_sdk::{FromValue, ToValue, Value};
//!
//! let v = 0xCAFE_i32.to_value();
//! assert_eq!(i32::from_value(&v)?, 0xCAFE);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod convert;
pub mod error;
pub mod types;
pub mod value;

pub use convert::{ConversionError, FromValue, ToValue};
pub use error::{CallResult, Thrown, ThrownKind};
pub use types::ValueType;
pub use value::{HostObject, ObjectRef, Value};
