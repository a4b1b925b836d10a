//! HWC Framebuffer
//!
//! This crate maps the primary display's framebuffer as a ring of scan-out
//! buffers and shows them in order from a dedicated post thread. A second
//! thread mirrors the posted UI onto a secondary display while no video owns
//! it.
//!
//! # Architecture
//!
//! - **Device**: ring sizing, page flipping, density and refresh rate
//! - **Slots**: per-buffer ownership between the producer and the post thread
//! - **Post**: the post queue, its drop-frame policy and the consumer loop
//! - **Mirror**: the UI mirror inputs and worker
//! - **Framebuffer**: the threads and the producer API tied together
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use hwc_framebuffer::{Framebuffer, PostOutcome};
//! use hwc_overlay::{HalConfig, HalContext, sim::SimProvider};
//!
//! let sim = SimProvider::new();
//! let ctx = Arc::new(HalContext::new(HalConfig::default(), Arc::new(sim.clone()), Arc::new(sim.allocator())));
//!
//! let fb = Framebuffer::open(Arc::clone(&ctx)).unwrap();
//! assert_eq!(fb.buffer_count(), 3);
//! fb.lock_buffer(0).unwrap();
//! let buffer = fb.buffer(0).unwrap();
//! assert_eq!(fb.post(buffer).unwrap(), PostOutcome::Queued(0));
//! ```

pub mod device;
pub mod framebuffer;
pub mod mirror;
pub mod post;
pub mod slots;

// Re-export commonly used items
pub use device::{FramebufferInfo, configure};
pub use framebuffer::Framebuffer;
pub use mirror::{MirrorInputs, MirrorSignal, VideoPlayback};
pub use post::PostOutcome;
pub use slots::SlotState;
