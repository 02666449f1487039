//! Member adapters and shapes

pub mod adapter;
pub mod shape;

pub use adapter::{
    Adapter, AdapterError, AdapterFlavor, AdapterRequest, FieldAccess, Member, MemberAdapterBuilder,
    MemberDescriptor, Owner,
};
pub use shape::{FunctionalShape, InterfaceShape};
