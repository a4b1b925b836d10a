//! Core types for the composition HAL
//!
//! This module contains the value types every layer works with.

pub mod flags;
pub mod format;
pub mod transform;
pub mod types;

pub use flags::*;
pub use format::*;
pub use transform::*;
pub use types::*;
