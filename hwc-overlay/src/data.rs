//! Data channel
//!
//! The per-frame half of a pipe. A data channel pushes source buffers to the
//! pipe its control channel configured, routing them through a ring of
//! rotator buffers when the pipe has a rotator.

use std::mem;
use std::sync::Arc;

use hwc_api::{
    BufferHandle, DisplayDevice, DisplayId, Error, MemoryId, OverlayId, PlayRequest, Result, RotateRequest,
    RotatorBuffer, RotatorDevice, RotatorSessionId, UsageFlags,
};
use log::{debug, error, info, trace, warn};

use crate::config::MAX_ROTATOR_BUFFERS;
use crate::context::HalContext;
use crate::control::ControlChannel;
use crate::session::RotatorMemory;

/// Heaps for rotator memory
pub fn rotator_usage(secure: bool, external_connected: bool) -> UsageFlags {
    if secure {
        UsageFlags::PROTECTED | UsageFlags::MM_HEAP
    } else if external_connected {
        // The MM heap is kept free for secure playback on the external display
        UsageFlags::IOMMU_HEAP
    } else {
        UsageFlags::IOMMU_HEAP | UsageFlags::MM_HEAP
    }
}

struct RotatorRing {
    device: Box<dyn RotatorDevice>,
    session: RotatorSessionId,
    memory: RotatorMemory,
    /// Previous generation, kept until a frame from the current one is queued
    retired: Option<RotatorMemory>,
    /// Buffer size of a reconfiguration not yet applied
    pending: Option<usize>,
    next: usize,
    secure: bool,
    from_framebuffer: bool,
}

impl RotatorRing {
    fn remap(&mut self, ctx: &HalContext) -> Result<()> {
        let Some(stride) = self.pending else {
            return Ok(());
        };
        let usage = rotator_usage(self.secure, ctx.is_external_connected());
        let memory = RotatorMemory::allocate(ctx.memory(), stride, self.memory.count(), usage)
            .inspect_err(|e| error!("rotator memory remap to {} bytes failed: {}", stride, e))?;
        let old = mem::replace(&mut self.memory, memory);
        // A generation that never reached the screen can go at once
        if self.retired.is_none() {
            self.retired = Some(old);
        }
        self.pending = None;
        self.next = 0;
        debug!("rotator ring remapped to {} x {} bytes", self.memory.count(), stride);
        Ok(())
    }

    fn rotate(&mut self, overlay: OverlayId, memory: MemoryId, offset: u32) -> Result<PlayRequest> {
        let dst = RotatorBuffer {
            memory: self.memory.memory(),
            offset: self.memory.offset(self.next)?,
            from_framebuffer: false,
        };
        self.next = (self.next + 1) % self.memory.count();
        let req = RotateRequest {
            session: self.session,
            src: RotatorBuffer { memory, offset, from_framebuffer: self.from_framebuffer },
            dst,
        };
        self.device.rotate(&req)?;
        Ok(PlayRequest { id: overlay, memory: dst.memory, offset: dst.offset })
    }
}

struct OpenData {
    display: DisplayId,
    device: Box<dyn DisplayDevice>,
    overlay: OverlayId,
    ring: Option<RotatorRing>,
    source: Option<MemoryId>,
    last: Option<PlayRequest>,
}

/// Per-frame buffer path of one pipe
pub struct DataChannel {
    ctx: Arc<HalContext>,
    open: Option<OpenData>,
}

impl DataChannel {
    pub fn new(ctx: Arc<HalContext>) -> Self {
        Self { ctx, open: None }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Attach to the pipe `control` configured
    ///
    /// A pipe with a rotator gets a ring of `buffers` rotator buffers, each
    /// the size of one source buffer.
    pub fn start(&mut self, control: &ControlChannel, buffers: usize) -> Result<()> {
        if self.open.is_some() {
            return Err(Error::InvalidState("data channel is already open".into()));
        }
        let closed = || Error::InvalidState("control channel is not configured".into());
        let display = control.display().ok_or_else(closed)?;
        let overlay = control.overlay_id().ok_or_else(closed)?;
        let device = self.ctx.devices().open_display(display)?;

        let ring = if control.has_rotator() {
            let session = control.rotator_session().ok_or_else(closed)?;
            let stride = control.size().ok_or_else(closed)? as usize;
            let count = buffers.clamp(1, MAX_ROTATOR_BUFFERS as usize);
            let secure = control.is_secure();
            let usage = rotator_usage(secure, self.ctx.is_external_connected());
            let rotator = self.ctx.devices().open_rotator()?;
            let memory = RotatorMemory::allocate(self.ctx.memory(), stride, count, usage)
                .inspect_err(|e| error!("rotator memory of {} x {} bytes failed: {}", count, stride, e))?;
            Some(RotatorRing {
                device: rotator,
                session,
                memory,
                retired: None,
                pending: None,
                next: 0,
                secure,
                from_framebuffer: control.is_ui(),
            })
        } else {
            None
        };

        info!(
            "data channel up on {:?} for {:?}, {} rotator buffers",
            display,
            overlay,
            ring.as_ref().map_or(0, |r| r.memory.count())
        );
        self.open = Some(OpenData { display, device, overlay, ring, source: None, last: None });
        Ok(())
    }

    /// Release the rotator ring and the device
    pub fn close(&mut self) {
        if let Some(data) = self.open.take() {
            debug!("data channel on {:?} closed", data.display);
        }
    }

    /// Resize the rotator ring for source buffers of `size` bytes
    ///
    /// Takes effect on the next queued buffer.
    pub fn update(&mut self, size: u32) {
        if let Some(ring) = self.open.as_mut().and_then(|d| d.ring.as_mut()) {
            ring.pending = Some(size as usize);
        }
    }

    /// Memory the next queued offsets refer to
    pub fn set_buffer(&mut self, memory: MemoryId) -> Result<()> {
        let data = self.open.as_mut().ok_or_else(|| Error::InvalidState("data channel is closed".into()))?;
        data.source = Some(memory);
        Ok(())
    }

    /// Show the buffer at `offset` of the current source memory
    ///
    /// The rotated copy is played when the rotator accepts the buffer and the
    /// original otherwise.
    pub fn queue_buffer(&mut self, offset: u32) -> Result<()> {
        let data = self.open.as_mut().ok_or_else(|| Error::InvalidState("data channel is closed".into()))?;
        let memory = data.source.ok_or_else(|| Error::InvalidState("no source buffer set".into()))?;
        let source = PlayRequest { id: data.overlay, memory, offset };

        let mut play = source;
        if let Some(ring) = data.ring.as_mut() {
            ring.remap(&self.ctx)?;
            match ring.rotate(data.overlay, memory, offset) {
                Ok(rotated) => play = rotated,
                Err(e) => warn!("rotate of {:?}+{:#x} failed, playing the source: {}", memory, offset, e),
            }
        }
        data.device
            .play(&play)
            .inspect_err(|e| {
                error!("play of {:?}+{:#x} on {:?} failed: {}", play.memory, play.offset, data.display, e)
            })?;
        trace!("queued {:?}+{:#x} on {:?}", play.memory, play.offset, data.display);
        data.last = Some(source);
        if let Some(ring) = data.ring.as_mut() {
            ring.retired = None;
        }
        Ok(())
    }

    /// Set the source memory and queue in one step
    pub fn queue(&mut self, handle: BufferHandle) -> Result<()> {
        self.set_buffer(handle.memory)?;
        self.queue_buffer(handle.offset)
    }

    /// Block until the last queued buffer is on screen
    pub fn wait_for_vsync(&mut self) -> Result<()> {
        let data = self.open.as_mut().ok_or_else(|| Error::InvalidState("data channel is closed".into()))?;
        let last = data.last.ok_or_else(|| Error::InvalidState("nothing queued".into()))?;
        data.device.play_wait(&last)
    }

    pub fn display(&self) -> Option<DisplayId> {
        self.open.as_ref().map(|d| d.display)
    }

    pub fn rotator_buffers(&self) -> usize {
        self.ring().map_or(0, |r| r.memory.count())
    }

    /// Memory backing the rotator ring
    pub fn rotator_memory(&self) -> Option<MemoryId> {
        self.ring().map(|r| r.memory.memory())
    }

    pub fn rotator_usage(&self) -> Option<UsageFlags> {
        self.ring().map(|r| r.memory.usage())
    }

    pub fn remap_pending(&self) -> bool {
        self.ring().is_some_and(|r| r.pending.is_some())
    }

    fn ring(&self) -> Option<&RotatorRing> {
        self.open.as_ref().and_then(|d| d.ring.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotator_usage() {
        // Test heap selection for rotator memory
        assert_eq!(rotator_usage(true, true), UsageFlags::PROTECTED | UsageFlags::MM_HEAP);
        assert_eq!(rotator_usage(false, true), UsageFlags::IOMMU_HEAP);
        assert_eq!(rotator_usage(false, false), UsageFlags::IOMMU_HEAP | UsageFlags::MM_HEAP);
    }
}
