//! HWC Overlay
//!
//! This crate drives the overlay pipes of the display hardware. It owns the
//! scarce pipe resources, configures pipes and rotator sessions from source
//! buffer geometry, and runs the composition state machine that spreads a
//! video source over the primary panel and a secondary display.
//!
//! # Architecture
//!
//! - **Config**: platform tunables loaded from JSON
//! - **Context**: the process-wide `HalContext` with the pipe allocator and display attributes
//! - **Pipe**: first-fit pipe banks and scoped pipe leases
//! - **Session**: scoped display, rotator and rotator-memory resources
//! - **Control**: per-pipe configuration and geometry
//! - **Data**: per-frame buffer submission through the rotator ring
//! - **State** / **Overlay**: the composition state table and the orchestrator
//! - **Sim**: an in-memory device backend for host runs and tests
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use hwc_api::{BufferInfo, OverlayFlags, PixelFormat, Transform};
//! use hwc_overlay::{HalConfig, HalContext, Overlay, OverlayState, sim::SimProvider};
//!
//! let sim = SimProvider::new();
//! let ctx = Arc::new(HalContext::new(HalConfig::default(), Arc::new(sim.clone()), Arc::new(sim.allocator())));
//!
//! let mut overlay = Overlay::new(Arc::clone(&ctx));
//! let info = BufferInfo::new(1280, 720, PixelFormat::YCbCr420Sp.code(), 1280 * 720 * 3 / 2);
//! assert!(overlay.set_source(&info, Transform::IDENTITY, None, OverlayFlags::empty(), 2));
//! assert_eq!(overlay.state(), Some(OverlayState::Video2dPanel));
//! ```

pub mod config;
pub mod context;
pub mod control;
pub mod data;
pub mod overlay;
pub mod pipe;
pub mod session;
pub mod sim;
pub mod state;

// Re-export commonly used items
pub use config::{HalConfig, PipeConfig};
pub use context::{CompositionMode, DisplayState, HalContext};
pub use control::{ChannelParams, ControlChannel, VisualParam};
pub use data::DataChannel;
pub use overlay::{EXTERNAL_CHANNEL, ExternalLink, Overlay, PRIMARY_CHANNEL};
pub use pipe::{PipeAllocator, PipeLease};
pub use state::{OverlayState, Route};
