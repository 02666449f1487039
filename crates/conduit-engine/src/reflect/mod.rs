//! Host Reflection Model
//!
//! The object model adapters and forwarding objects operate on:
//! - `Class` / `ClassBuilder`: classes with single inheritance, vtables, itables
//! - `Interface` / `InterfaceBuilder`: ordered abstract method lists
//! - `Method`, `Field`, `Constructor`: members with visibility and bodies
//! - `Instance`: an allocated object (`conduit_sdk::HostObject`)
//! - `Lookup`: the caller's access context
//! - `ClassRegistry`: name-based subtype checks

pub mod class;
pub mod instance;
pub mod interface;
pub mod lookup;
pub mod member;
pub mod registry;

pub use class::{Class, ClassBuildError, ClassBuilder, Itable};
pub use instance::{invoke, receiver_instance, Instance};
pub use interface::{Interface, InterfaceBuilder};
pub use lookup::Lookup;
pub use member::{Constructor, Field, Method, MethodBody, MethodKey, Visibility};
pub use registry::{ClassRegistry, RegisteredType};
