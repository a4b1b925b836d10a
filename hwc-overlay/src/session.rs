//! Scoped device sessions
//!
//! Each type here owns one device-side resource and gives it back when it is
//! dropped, so an early return on any failure path cannot leak a pipe, a
//! rotator session or rotator memory.

use std::sync::Arc;

use hwc_api::{
    Allocation, DeviceProvider, DisplayDevice, DisplayId, Error, MemoryAllocator, MemoryId, OverlayId,
    OverlayRequest, Result, RotatorDevice, RotatorRequest, RotatorSessionId, ScreenInfo, Size, Stereo3dRequest,
    UsageFlags,
};
use log::{debug, trace, warn};

/// An open display device plus the overlay pipe configured on it
pub struct OverlaySession {
    display: DisplayId,
    device: Box<dyn DisplayDevice>,
    id: Option<OverlayId>,
    virtual_3d: bool,
}

impl OverlaySession {
    /// Open the display device; no pipe is configured yet
    pub fn open(devices: &dyn DeviceProvider, display: DisplayId) -> Result<Self> {
        let device = devices.open_display(display)?;
        Ok(Self { display, device, id: None, virtual_3d: false })
    }

    pub fn display(&self) -> DisplayId {
        self.display
    }

    pub fn id(&self) -> Option<OverlayId> {
        self.id
    }

    pub fn screen_info(&self) -> Result<ScreenInfo> {
        self.device.screen_info()
    }

    /// Configure the pipe; the first call creates it
    pub fn set(&mut self, req: &OverlayRequest) -> Result<OverlayId> {
        let req = OverlayRequest { id: self.id, ..*req };
        let id = self.device.set_overlay(&req)?;
        if self.id.is_none() {
            debug!("overlay {:?} created on {:?}", id, self.display);
        }
        self.id = Some(id);
        Ok(id)
    }

    /// Read back the live pipe configuration
    pub fn get(&self) -> Result<OverlayRequest> {
        let id = self.id.ok_or_else(|| Error::InvalidState("overlay pipe not configured".into()))?;
        self.device.overlay(id)
    }

    pub fn device_mut(&mut self) -> &mut dyn DisplayDevice {
        self.device.as_mut()
    }

    /// Switch the display into its stereo virtual framebuffer
    pub fn enable_virtual_3d(&mut self, size: Size) -> Result<()> {
        self.device.set_3d(&Stereo3dRequest { enabled: true, width: size.width, height: size.height })?;
        self.virtual_3d = true;
        Ok(())
    }

    pub fn is_virtual_3d(&self) -> bool {
        self.virtual_3d
    }
}

impl Drop for OverlaySession {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if let Err(e) = self.device.unset_overlay(id) {
                warn!("unset of overlay {:?} on {:?} failed: {}", id, self.display, e);
            }
        }
        if self.virtual_3d {
            let off = Stereo3dRequest { enabled: false, width: 0, height: 0 };
            if let Err(e) = self.device.set_3d(&off) {
                warn!("leaving stereo mode on {:?} failed: {}", self.display, e);
            }
        }
    }
}

/// An open rotator and the session started on it
pub struct RotatorSession {
    device: Box<dyn RotatorDevice>,
    id: Option<RotatorSessionId>,
}

impl RotatorSession {
    pub fn open(devices: &dyn DeviceProvider) -> Result<Self> {
        Ok(Self { device: devices.open_rotator()?, id: None })
    }

    pub fn id(&self) -> Option<RotatorSessionId> {
        self.id
    }

    /// Start or reconfigure the session
    pub fn start(&mut self, req: &RotatorRequest) -> Result<RotatorSessionId> {
        let req = RotatorRequest { session: self.id, ..*req };
        let id = self.device.start(&req)?;
        self.id = Some(id);
        Ok(id)
    }
}

impl Drop for RotatorSession {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if let Err(e) = self.device.finish(id) {
                warn!("finish of rotator session {:?} failed: {}", id, e);
            }
        }
    }
}

/// Rotator output buffers carved out of one allocation
pub struct RotatorMemory {
    allocator: Arc<dyn MemoryAllocator>,
    allocation: Allocation,
    stride: usize,
    count: usize,
}

impl RotatorMemory {
    /// Allocate `count` buffers of `stride` bytes
    ///
    /// A heap the platform does not support makes the allocator fall back to
    /// the legacy heaps once.
    pub fn allocate(
        allocator: &Arc<dyn MemoryAllocator>,
        stride: usize,
        count: usize,
        usage: UsageFlags,
    ) -> Result<Self> {
        let size = stride.checked_mul(count).ok_or(Error::OutOfMemory)?;
        if u32::try_from(size).is_err() {
            return Err(Error::InvalidArgument(format!("rotator ring of {} x {} bytes exceeds 4 GiB", count, stride)));
        }
        let allocation = match allocator.allocate(size, usage) {
            Err(Error::NotSupported(reason)) => {
                let fallback = usage | UsageFlags::MM_HEAP | UsageFlags::WRITEBACK_HEAP;
                debug!("heap {:?} not supported ({}), retrying with {:?}", usage, reason, fallback);
                allocator.allocate(size, fallback)?
            }
            other => other?,
        };
        trace!("rotator memory {:?}: {} x {} bytes", allocation.memory, count, stride);
        Ok(Self { allocator: Arc::clone(allocator), allocation, stride, count })
    }

    pub fn memory(&self) -> MemoryId {
        self.allocation.memory
    }

    pub fn usage(&self) -> UsageFlags {
        self.allocation.usage
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Byte offset of ring slot `index`
    pub fn offset(&self, index: usize) -> Result<u32> {
        if index >= self.count {
            return Err(Error::InvalidArgument(format!("rotator slot {} of {}", index, self.count)));
        }
        index
            .checked_mul(self.stride)
            .and_then(|offset| u32::try_from(offset).ok())
            .ok_or_else(|| Error::InvalidArgument(format!("rotator slot {} past 4 GiB", index)))
    }
}

impl Drop for RotatorMemory {
    fn drop(&mut self) {
        if let Err(e) = self.allocator.free(&self.allocation) {
            warn!("free of rotator memory {:?} failed: {}", self.allocation.memory, e);
        }
    }
}
