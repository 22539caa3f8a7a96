//! This module contains the symbolic memory model: object identities,
//! copy-on-write object contents, the per-state address space, and the
//! deterministic allocator.

pub mod address_space;
pub mod allocator;
pub mod object;

pub use address_space::{AddressSpace, Binding, ResolutionList};
pub use allocator::Allocator;
pub use object::{MemoryObject, MemoryObjectRef, ObjectState};
