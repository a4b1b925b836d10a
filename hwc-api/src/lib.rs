//! HWC API - Core types, device interfaces and geometry for the display composition HAL
//!
//! This crate provides the vocabulary shared by every layer of the composition
//! HAL: the value types describing buffers and rectangles, the pixel and stereo
//! format codes understood by the display hardware, the error taxonomy, the
//! collaborator traits behind which the display device, the rotator and the
//! platform memory allocator live, and the pure geometry engine.
//!
//! # Architecture
//!
//! - **Core**: rectangles, identifiers, formats, the D4 transform group and flag sets
//! - **Error**: the error enum and `Result` alias used across the HAL
//! - **Interfaces**: device, rotator and memory allocator contracts
//! - **Geometry**: crop normalization, tile alignment, downscale selection,
//!   secondary display placement and stereo half extraction
//!
//! # Usage
//!
//! ```rust
//! use hwc_api::core::{Rect, Size, Transform};
//!
//! let buffer = Size::new(640, 480);
//! let crop = Rect::new(0, 0, 640, 480);
//! let (rotated, frame) = Transform::ROT_90.map_rect(crop, buffer).unwrap();
//! assert_eq!(frame, Size::new(480, 640));
//! assert_eq!(Transform::ROT_270.map_rect(rotated, frame).unwrap().0, crop);
//! ```

#![no_std]

extern crate alloc;

pub mod core;
pub mod error;
pub mod geometry;
pub mod interfaces;

// Re-export commonly used types
pub use crate::core::*;
pub use crate::error::{Error, Result};
pub use crate::interfaces::*;
