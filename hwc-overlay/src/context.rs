//! Shared HAL context
//!
//! One `HalContext` exists per process. It is built at startup and handed to
//! every channel, overlay and framebuffer as an `Arc`.

use std::sync::Arc;

use hashbrown::HashMap;
use hwc_api::{DeviceProvider, DisplayId, MemoryAllocator, Result, Size};
use log::{debug, info, warn};
use spin::RwLock;
use static_assertions::assert_impl_all;

use crate::config::HalConfig;
use crate::pipe::PipeAllocator;
use crate::state::OverlayState;

/// What a display is currently showing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositionMode {
    /// Framebuffer only
    #[default]
    Framebuffer,
    /// At least one overlay pipe carries video
    Overlay,
    /// The framebuffer is mirrored from the primary panel
    Mirror,
}

/// Per-display attributes
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DisplayState {
    pub connected: bool,
    pub stereo_capable: bool,
    pub mode: CompositionMode,
    pub overlay_state: Option<OverlayState>,
    pub size: Size,
    pub xdpi: f32,
    pub ydpi: f32,
    pub vsync_period_ns: u64,
}

/// Process-wide state shared by every component
pub struct HalContext {
    config: HalConfig,
    pipes: Arc<PipeAllocator>,
    displays: RwLock<HashMap<DisplayId, DisplayState>>,
    devices: Arc<dyn DeviceProvider>,
    memory: Arc<dyn MemoryAllocator>,
}

assert_impl_all!(HalContext: Send, Sync);

impl HalContext {
    /// Create a context; the primary display starts connected
    pub fn new(config: HalConfig, devices: Arc<dyn DeviceProvider>, memory: Arc<dyn MemoryAllocator>) -> Self {
        let mut displays = HashMap::new();
        displays.insert(DisplayId::Primary, DisplayState { connected: true, ..DisplayState::default() });
        Self {
            pipes: Arc::new(PipeAllocator::new(&config.pipes)),
            config,
            displays: RwLock::new(displays),
            devices,
            memory,
        }
    }

    pub fn config(&self) -> &HalConfig {
        &self.config
    }

    pub fn pipes(&self) -> &Arc<PipeAllocator> {
        &self.pipes
    }

    pub fn devices(&self) -> &dyn DeviceProvider {
        self.devices.as_ref()
    }

    pub fn memory(&self) -> &Arc<dyn MemoryAllocator> {
        &self.memory
    }

    /// Snapshot of a display's attributes
    pub fn display(&self, id: DisplayId) -> DisplayState {
        self.displays.read().get(&id).copied().unwrap_or_default()
    }

    /// Modify a display's attributes in place
    pub fn update_display(&self, id: DisplayId, f: impl FnOnce(&mut DisplayState)) {
        let mut displays = self.displays.write();
        f(displays.entry(id).or_default());
    }

    /// Record a hotplug event
    pub fn set_connected(&self, id: DisplayId, connected: bool, stereo_capable: bool) {
        info!("{:?} display {}", id, if connected { "connected" } else { "disconnected" });
        self.update_display(id, |d| {
            d.connected = connected;
            d.stereo_capable = connected && stereo_capable;
            if !connected {
                d.mode = CompositionMode::Framebuffer;
                d.overlay_state = None;
            }
        });
    }

    /// First connected secondary display
    pub fn external_display(&self) -> Option<DisplayId> {
        let displays = self.displays.read();
        [DisplayId::External, DisplayId::Virtual]
            .into_iter()
            .find(|id| displays.get(id).is_some_and(|d| d.connected))
    }

    pub fn is_external_connected(&self) -> bool {
        self.external_display().is_some()
    }

    /// Clear pipes a previous process left attached to any mixer
    ///
    /// The base layer has no z-order and is left alone. Returns how many pipes
    /// were cleared.
    pub fn init_overlay(&self) -> Result<usize> {
        let mut cleared = 0;
        for display in DisplayId::ALL {
            let mut device = match self.devices.open_display(display) {
                Ok(device) => device,
                Err(e) => {
                    warn!("cannot open {:?} display: {}", display, e);
                    continue;
                }
            };
            for pipe in device.mixer_info(display.index() as u32)? {
                if pipe.z_order.is_some() {
                    debug!("unset stale pipe {:?} on {:?}", pipe.id, display);
                    device.unset_overlay(pipe.id)?;
                    cleared += 1;
                }
            }
        }
        Ok(cleared)
    }
}
