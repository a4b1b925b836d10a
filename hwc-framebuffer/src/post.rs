//! Framebuffer post queue
//!
//! Producers push finished buffers; one consumer thread pans the display to
//! each of them in order and hands the previous buffer back once the new one
//! is on screen.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crossbeam_channel::{Receiver, Sender};
use hwc_api::interfaces::{DisplayDevice, ScreenInfo};
use hwc_api::{BufferHandle, Error, Result};
use log::{debug, error, trace, warn};

use crate::mirror::MirrorSignal;
use crate::slots::BufferSlots;

/// One buffer ready to be shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub slot: usize,
    /// Offset of the buffer in the framebuffer mapping
    pub offset: u32,
}

/// What `post` did with a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// Queued for scan-out in this slot
    Queued(usize),
    /// The ring was full and the frame was dropped
    Dropped,
}

/// Producer side of the queue
pub struct PostQueue {
    slots: Arc<BufferSlots>,
    tx: Option<Sender<Frame>>,
    swap_interval: Arc<AtomicU32>,
    current: Option<usize>,
    front: Option<BufferHandle>,
}

impl PostQueue {
    pub fn new(slots: Arc<BufferSlots>, tx: Sender<Frame>, swap_interval: Arc<AtomicU32>) -> Self {
        Self { slots, tx: Some(tx), swap_interval, current: None, front: None }
    }

    /// Buffer most recently handed to the consumer
    pub fn front(&self) -> Option<BufferHandle> {
        self.front
    }

    /// Queue `buffer`, found at `offset` in the mapping
    ///
    /// With a swap interval of 0 a frame whose slot is still busy is dropped
    /// and the buffer on screen stays there. Otherwise the call waits until
    /// the consumer hands the slot back.
    pub fn post(&mut self, buffer: BufferHandle, offset: u32) -> Result<PostOutcome> {
        let tx = self.tx.as_ref().ok_or_else(|| Error::InvalidState("framebuffer is closed".into()))?;
        let next = self.current.map_or(0, |current| (current + 1) % self.slots.len());

        if self.swap_interval.load(Ordering::Acquire) == 0 {
            if !self.slots.is_free(next) {
                trace!("slot {} busy, frame at {:#x} dropped", next, offset);
                return Ok(PostOutcome::Dropped);
            }
        } else {
            self.slots.wait_available(next)?;
        }

        self.slots.submit(next)?;
        if tx.send(Frame { slot: next, offset }).is_err() {
            self.slots.release(next)?;
            return Err(Error::InvalidState("post consumer has exited".into()));
        }
        trace!("frame at {:#x} posted in slot {}", offset, next);
        self.current = Some(next);
        self.front = Some(buffer);
        Ok(PostOutcome::Queued(next))
    }

    /// Disconnect the consumer; later posts fail
    pub fn close(&mut self) {
        self.tx = None;
    }
}

/// Consumer side of the queue
pub struct Consumer {
    device: Box<dyn DisplayDevice>,
    screen: ScreenInfo,
    slots: Arc<BufferSlots>,
    mirror: Option<Arc<MirrorSignal>>,
    current: Option<usize>,
}

impl Consumer {
    pub fn new(
        device: Box<dyn DisplayDevice>,
        screen: ScreenInfo,
        slots: Arc<BufferSlots>,
        mirror: Option<Arc<MirrorSignal>>,
    ) -> Self {
        Self { device, screen, slots, mirror, current: None }
    }

    /// Pan the display to `frame` and retire the frame it replaces
    pub fn show(&mut self, frame: Frame) {
        self.screen.yoffset = frame.offset / self.screen.line_length;
        if let Some(mirror) = &self.mirror {
            mirror.posted(frame.offset);
        }
        if let Err(e) = self.device.set_screen_info(&self.screen) {
            error!("pan to yoffset {} (slot {}) failed: {}", self.screen.yoffset, frame.slot, e);
        }

        if let Err(e) = self.slots.reference(frame.slot) {
            warn!("frame {:?}: {}", frame, e);
        }
        match self.current.replace(frame.slot) {
            Some(previous) if previous != frame.slot => {
                if let Err(e) = self.slots.release(previous) {
                    warn!("releasing slot {}: {}", previous, e);
                }
            }
            _ => {}
        }
        // Without page flipping the only buffer is drawn while it is on screen
        if self.slots.len() < 2 {
            if let Err(e) = self.slots.release(frame.slot) {
                warn!("releasing slot {}: {}", frame.slot, e);
            }
        }
    }

    /// Serve the queue until it disconnects or `exit` is raised
    pub fn run(mut self, rx: Receiver<Frame>, exit: Arc<AtomicBool>) {
        while let Ok(frame) = rx.recv() {
            if exit.load(Ordering::Acquire) {
                break;
            }
            self.show(frame);
        }
        debug!("post consumer exiting");
    }
}
