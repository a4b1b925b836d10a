//! UI mirroring to the secondary display
//!
//! A worker thread copies every posted framebuffer to the secondary display
//! through its own overlay in `UiMirror`. Hotplug, video, orientation and
//! secure session events only update the inputs below and wake the worker,
//! which decides what to show.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use hwc_api::geometry::align_up;
use hwc_api::{BufferHandle, BufferInfo, DisplayId, Error, MemoryId, OverlayFlags, Result, Transform};
use hwc_overlay::{ExternalLink, Overlay, OverlayState, PRIMARY_CHANNEL};
use log::{debug, info, trace, warn};
use static_assertions::assert_impl_all;

use crate::device::FramebufferInfo;

/// Width alignment of the mirrored UI buffer
const UI_WIDTH_ALIGN: u32 = 32;

/// Video currently shown through the overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoPlayback {
    #[default]
    None,
    TwoD,
    ThreeD,
}

/// Everything the worker looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MirrorInputs {
    pub external: Option<DisplayId>,
    pub video: VideoPlayback,
    /// A secure session is open
    pub secure: bool,
    /// Between the start and the end of a secure session change
    pub suspended: bool,
    /// Orientation of the frame last posted
    pub orientation: Transform,
    /// Orientation applied with the next post
    pub pending_orientation: Transform,
    /// Scan-out offset of the frame last posted
    pub offset: Option<u32>,
}

impl MirrorInputs {
    /// The display to mirror onto, if the UI should be mirrored at all
    pub fn target(&self, true_mirroring: bool) -> Option<DisplayId> {
        let display = self.external?;
        if self.secure || self.suspended {
            return None;
        }
        match self.video {
            VideoPlayback::None => Some(display),
            VideoPlayback::TwoD if true_mirroring => Some(display),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Shared {
    inputs: MirrorInputs,
    changed: bool,
    exit: bool,
}

/// Event surface of the mirror worker
#[derive(Default)]
pub struct MirrorSignal {
    shared: Mutex<Shared>,
    wake: Condvar,
}

assert_impl_all!(MirrorSignal: Send, Sync);

impl MirrorSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut MirrorInputs)) {
        let mut shared = self.lock();
        f(&mut shared.inputs);
        shared.changed = true;
        self.wake.notify_one();
    }

    pub fn inputs(&self) -> MirrorInputs {
        self.lock().inputs
    }

    /// A secondary display came up, or went away with `None`
    pub fn set_external(&self, display: Option<DisplayId>) {
        debug!("mirror: external display {:?}", display);
        self.update(|inputs| inputs.external = display);
    }

    pub fn set_video(&self, video: VideoPlayback) {
        debug!("mirror: video {:?}", video);
        self.update(|inputs| inputs.video = video);
    }

    /// New UI orientation, applied together with the next posted frame
    pub fn set_orientation(&self, orientation: Transform) {
        self.update(|inputs| inputs.pending_orientation = orientation);
    }

    /// A secure session is about to open (`secure`) or close
    pub fn begin_secure_change(&self, secure: bool) {
        debug!("mirror: secure session {}", if secure { "opening" } else { "closing" });
        self.update(|inputs| {
            inputs.secure = secure;
            inputs.suspended = true;
        });
    }

    pub fn end_secure_change(&self) {
        self.update(|inputs| inputs.suspended = false);
    }

    /// The consumer thread scanned out the buffer at `offset`
    pub fn posted(&self, offset: u32) {
        self.update(|inputs| {
            inputs.orientation = inputs.pending_orientation;
            inputs.offset = Some(offset);
        });
    }

    pub fn shutdown(&self) {
        let mut shared = self.lock();
        shared.exit = true;
        shared.changed = true;
        self.wake.notify_all();
    }

    /// Block until something changed; `None` once the worker must exit
    pub fn wait(&self) -> Option<MirrorInputs> {
        let shared = self.lock();
        let mut shared = self.wake.wait_while(shared, |s| !s.changed).unwrap_or_else(PoisonError::into_inner);
        shared.changed = false;
        if shared.exit {
            return None;
        }
        Some(shared.inputs)
    }
}

/// Transform of the mirrored UI for a panel held in `orientation`
///
/// The UI is drawn already rotated, so quarter turns go the other way.
pub fn ui_transform(orientation: Transform) -> Transform {
    if orientation == Transform::ROT_90 {
        Transform::ROT_270
    } else if orientation == Transform::ROT_270 {
        Transform::ROT_90
    } else {
        orientation
    }
}

/// The framebuffer as a source for the mirror channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorSource {
    pub memory: MemoryId,
    pub width: u32,
    pub height: u32,
    pub buffer: BufferInfo,
}

impl MirrorSource {
    pub fn new(info: &FramebufferInfo, memory: MemoryId) -> Self {
        let size = info.size();
        Self {
            memory,
            width: size.width,
            height: size.height,
            buffer: BufferInfo::new(
                align_up(size.width, UI_WIDTH_ALIGN),
                size.height,
                info.format.code(),
                info.buffer_size,
            ),
        }
    }
}

/// Owner of the mirror overlay, driven by the worker thread
pub struct MirrorWorker {
    overlay: Overlay,
    source: MirrorSource,
    true_mirroring: bool,
    buffers: usize,
}

assert_impl_all!(MirrorWorker: Send);

impl MirrorWorker {
    pub fn new(overlay: Overlay, source: MirrorSource, true_mirroring: bool, buffers: usize) -> Self {
        Self { overlay, source, true_mirroring, buffers }
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn is_mirroring(&self) -> bool {
        self.overlay.state() == Some(OverlayState::UiMirror)
    }

    /// Bring the mirror channel in line with `inputs`
    pub fn apply(&mut self, inputs: &MirrorInputs) {
        match inputs.target(self.true_mirroring) {
            Some(display) => {
                if let Err(e) = self.mirror(display, inputs) {
                    warn!("UI mirror on {:?} failed: {}", display, e);
                }
            }
            None if self.is_mirroring() => {
                info!("UI mirror stopped");
                self.overlay.close_channel();
            }
            None => {}
        }
    }

    fn mirror(&mut self, display: DisplayId, inputs: &MirrorInputs) -> Result<()> {
        if !self.is_mirroring() || self.overlay.external() != ExternalLink::Display(display) {
            info!("UI mirror on {:?}", display);
            if !self.overlay.start_ui_mirror(&self.source.buffer, display, OverlayFlags::empty(), self.buffers) {
                return Err(Error::DeviceRejected("mirror channel did not start".into()));
            }
        }

        let (w, h) = (self.source.width, self.source.height);
        let transform = ui_transform(inputs.orientation);
        let (content_w, content_h) = if inputs.orientation.is_rotated_90() { (h, w) } else { (w, h) };
        let dst = self
            .overlay
            .aspect_ratio_position(content_w, content_h, PRIMARY_CHANNEL)
            .ok_or_else(|| Error::InvalidState("mirror channel is closed".into()))?;
        let placed = self.overlay.set_transform(transform.bits())
            && self.overlay.set_crop(0, 0, w, h)
            && self.overlay.set_position(dst.x as i32, dst.y as i32, dst.w, dst.h);
        if !placed {
            return Err(Error::InvalidGeometry(format!("mirror of {}x{} at {:?}", w, h, dst)));
        }

        if let Some(offset) = inputs.offset {
            trace!("mirror frame at {:#x}", offset);
            if !self.overlay.queue_buffer(BufferHandle::new(self.source.memory, offset)) {
                return Err(Error::DeviceRejected(format!("mirror frame at {:#x}", offset)));
            }
        }
        Ok(())
    }

    /// Worker loop, returns once `signal` is shut down
    pub fn run(mut self, signal: Arc<MirrorSignal>) {
        while let Some(inputs) = signal.wait() {
            self.apply(&inputs);
        }
        if self.is_mirroring() {
            self.overlay.close_channel();
        }
        debug!("UI mirror worker exiting");
    }
}
