//! The primary display framebuffer
//!
//! Owns the scan-out ring, the post consumer thread and the UI mirror worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::bounded;
use hwc_api::{BufferHandle, DisplayId, Error, MemoryId, Result};
use hwc_overlay::{HalContext, Overlay};
use log::{debug, info, warn};
use spin::Mutex;
use static_assertions::assert_impl_all;

use crate::device::{self, FramebufferInfo};
use crate::mirror::{MirrorSignal, MirrorSource, MirrorWorker};
use crate::post::{Consumer, PostOutcome, PostQueue};
use crate::slots::{BufferSlots, SlotState};

const POST_THREAD: &str = "hwc-post";
const MIRROR_THREAD: &str = "hwc-ui-mirror";

/// Mapped framebuffer of the primary display
pub struct Framebuffer {
    ctx: Arc<HalContext>,
    info: FramebufferInfo,
    memory: MemoryId,
    base: usize,
    slots: Arc<BufferSlots>,
    queue: Mutex<PostQueue>,
    swap_interval: Arc<AtomicU32>,
    mirror: Arc<MirrorSignal>,
    exit: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

assert_impl_all!(Framebuffer: Send, Sync);

fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .map_err(|e| Error::InvalidState(format!("cannot start {} thread: {}", name, e)))
}

impl Framebuffer {
    /// Map the primary display and start the post and mirror threads
    pub fn open(ctx: Arc<HalContext>) -> Result<Self> {
        let display = DisplayId::Primary;
        let config = ctx.config().clone();
        let mut device = ctx.devices().open_display(display)?;
        let info = device::configure(device.as_mut(), config.framebuffer_count)?;
        let (memory, base) = device.map_framebuffer(info.mapped_len())?;
        info!("framebuffer mapped as {:?} at {:#x}, {} bytes", memory, base, info.mapped_len());

        ctx.update_display(display, |d| {
            d.size = info.size();
            d.xdpi = info.xdpi;
            d.ydpi = info.ydpi;
            d.vsync_period_ns = info.vsync_period_ns;
        });

        let slots = Arc::new(BufferSlots::new(info.buffers as usize));
        let swap_interval = Arc::new(AtomicU32::new(config.swap_interval_override.unwrap_or(config.swap_interval)));
        // Every queued frame holds a submitted slot, so sends never block
        let (tx, rx) = bounded(slots.len());
        let exit = Arc::new(AtomicBool::new(false));
        let mirror = Arc::new(MirrorSignal::new());

        let mut fb = Self {
            queue: Mutex::new(PostQueue::new(Arc::clone(&slots), tx, Arc::clone(&swap_interval))),
            ctx: Arc::clone(&ctx),
            info,
            memory,
            base,
            slots: Arc::clone(&slots),
            swap_interval,
            mirror: Arc::clone(&mirror),
            exit: Arc::clone(&exit),
            threads: Vec::new(),
        };

        let consumer = Consumer::new(device, info.screen, slots, Some(Arc::clone(&mirror)));
        fb.threads.push(spawn(POST_THREAD, move || consumer.run(rx, exit))?);

        let source = MirrorSource::new(&info, memory);
        let buffers = config.rotator_buffers as usize;
        let worker = MirrorWorker::new(Overlay::new(ctx), source, config.true_mirroring, buffers);
        fb.threads.push(spawn(MIRROR_THREAD, move || worker.run(mirror))?);
        Ok(fb)
    }

    pub fn info(&self) -> &FramebufferInfo {
        &self.info
    }

    pub fn memory(&self) -> MemoryId {
        self.memory
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn buffer_count(&self) -> usize {
        self.slots.len()
    }

    /// Handle of ring buffer `index`
    pub fn buffer(&self, index: usize) -> Option<BufferHandle> {
        let offset = self.info.offset_of(u32::try_from(index).ok()?)?;
        Some(BufferHandle::new(self.memory, offset))
    }

    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.slots.state(index)
    }

    /// Buffer most recently queued for scan-out
    pub fn front_buffer(&self) -> Option<BufferHandle> {
        self.queue.lock().front()
    }

    /// Queue a framebuffer buffer for scan-out
    ///
    /// With a swap interval of 1 this waits until the next ring slot is
    /// released by the post thread.
    pub fn post(&self, buffer: BufferHandle) -> Result<PostOutcome> {
        if buffer.memory != self.memory || buffer.offset as usize >= self.info.mapped_len() {
            return Err(Error::InvalidArgument(format!(
                "{:?}+{:#x} is not a framebuffer buffer",
                buffer.memory, buffer.offset
            )));
        }
        self.queue.lock().post(buffer, buffer.offset)
    }

    /// Wait until buffer `index` may be drawn into
    ///
    /// Returns at once with a swap interval of 0, and on a ring without page
    /// flipping where the only buffer is always on screen.
    pub fn lock_buffer(&self, index: usize) -> Result<()> {
        if index >= self.slots.len() {
            return Err(Error::InvalidArgument(format!("buffer {} of {}", index, self.slots.len())));
        }
        if self.swap_interval() == 0 || self.slots.len() < 2 {
            return Ok(());
        }
        self.slots.wait_available(index)
    }

    pub fn swap_interval(&self) -> u32 {
        self.swap_interval.load(Ordering::Acquire)
    }

    /// Set the swap interval; a configured override wins
    pub fn set_swap_interval(&self, interval: u32) -> Result<()> {
        if interval > 1 {
            return Err(Error::InvalidArgument(format!("swap interval {}", interval)));
        }
        let effective = self.ctx.config().swap_interval_override.unwrap_or(interval);
        if effective != interval {
            debug!("swap interval {} overridden to {}", interval, effective);
        }
        self.swap_interval.store(effective, Ordering::Release);
        Ok(())
    }

    /// Event surface of the UI mirror worker
    pub fn mirror(&self) -> &MirrorSignal {
        &self.mirror
    }

    /// Stop both threads and release the device
    pub fn close(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.exit.store(true, Ordering::Release);
        self.slots.shutdown();
        self.queue.lock().close();
        self.mirror.shutdown();
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_owned();
            if handle.join().is_err() {
                warn!("{} thread panicked", name);
            }
        }
        info!("framebuffer closed");
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.close();
    }
}
