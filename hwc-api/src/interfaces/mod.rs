//! Collaborator interfaces
//!
//! The HAL never touches device nodes or heaps directly. Everything it needs
//! from the kernel driver and from the platform allocator is expressed by
//! the traits in this module, with request structs carrying the exact
//! contents of each call.

pub mod device;
pub mod memory;

pub use device::*;
pub use memory::*;
