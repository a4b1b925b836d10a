//! Data channel tests against the simulated devices

use std::sync::Arc;

use hwc_api::{
    BufferHandle, BufferInfo, DisplayId, Error, Format3d, MemoryId, OverlayFlags, PixelFormat, PlayRequest,
    UsageFlags,
};
use hwc_overlay::sim::{Faults, SimOp, SimProvider};
use hwc_overlay::{ChannelParams, ControlChannel, DataChannel, HalConfig, HalContext};

const SOURCE: MemoryId = MemoryId(500);
const FRAME: u32 = 640 * 480 * 3 / 2;

struct Pipe {
    sim: SimProvider,
    ctx: Arc<HalContext>,
    control: ControlChannel,
    data: DataChannel,
}

fn pipe(flags: OverlayFlags, rotation_disabled: bool) -> Pipe {
    let sim = SimProvider::new();
    let ctx = Arc::new(HalContext::new(HalConfig::default(), Arc::new(sim.clone()), Arc::new(sim.allocator())));
    let mut control = ControlChannel::new(Arc::clone(&ctx));
    control
        .start(&ChannelParams {
            buffer: BufferInfo::new(640, 480, PixelFormat::YCbCr420Sp.code(), FRAME),
            display: DisplayId::Primary,
            rotation_disabled,
            ui: false,
            stereo: Format3d::NONE,
            flags,
        })
        .unwrap();
    let data = DataChannel::new(Arc::clone(&ctx));
    Pipe { sim, ctx, control, data }
}

fn plays(sim: &SimProvider) -> Vec<PlayRequest> {
    sim.ops()
        .into_iter()
        .filter_map(|op| match op {
            SimOp::Play { request, .. } => Some(request),
            _ => None,
        })
        .collect()
}

fn is_live(sim: &SimProvider, memory: MemoryId) -> bool {
    sim.live_memory().iter().any(|a| a.memory == memory)
}

#[test]
fn test_ring_rotates_through_buffers() {
    // Test that rotator outputs cycle through the ring slots in order
    let mut p = pipe(OverlayFlags::empty(), false);
    p.data.start(&p.control, 3).unwrap();
    assert_eq!(p.data.rotator_buffers(), 3);
    let ring = p.data.rotator_memory().unwrap();

    for i in 0..4 {
        p.data.queue(BufferHandle::new(SOURCE, i * FRAME)).unwrap();
    }
    let offsets: Vec<u32> = plays(&p.sim).iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![0, FRAME, 2 * FRAME, 0]);
    assert!(plays(&p.sim).iter().all(|r| r.memory == ring));

    let sources: Vec<u32> = p
        .sim
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            SimOp::Rotate(req) => Some(req.src.offset),
            _ => None,
        })
        .collect();
    assert_eq!(sources, vec![0, FRAME, 2 * FRAME, 3 * FRAME]);
}

#[test]
fn test_ring_size_is_clamped() {
    // Test the ring bounds
    let mut p = pipe(OverlayFlags::empty(), false);
    p.data.start(&p.control, 9).unwrap();
    assert_eq!(p.data.rotator_buffers(), 4);
    p.data.close();

    p.data.start(&p.control, 0).unwrap();
    assert_eq!(p.data.rotator_buffers(), 1);
}

#[test]
fn test_start_requires_configured_control() {
    // Test that a data channel needs an open control channel
    let sim = SimProvider::new();
    let ctx = Arc::new(HalContext::new(HalConfig::default(), Arc::new(sim.clone()), Arc::new(sim.allocator())));
    let control = ControlChannel::new(Arc::clone(&ctx));
    let mut data = DataChannel::new(ctx);
    assert!(matches!(data.start(&control, 2), Err(Error::InvalidState(_))));
    assert!(!data.is_open());
}

#[test]
fn test_start_twice_is_rejected() {
    // Test that an open data channel refuses a second start
    let mut p = pipe(OverlayFlags::empty(), false);
    p.data.start(&p.control, 2).unwrap();
    assert!(matches!(p.data.start(&p.control, 2), Err(Error::InvalidState(_))));
    assert_eq!(p.sim.live_memory().len(), 1);
}

#[test]
fn test_heap_selection() {
    // Test rotator heaps for plain, secure and external playback
    let mut p = pipe(OverlayFlags::empty(), false);
    p.data.start(&p.control, 2).unwrap();
    assert_eq!(p.data.rotator_usage(), Some(UsageFlags::IOMMU_HEAP | UsageFlags::MM_HEAP));

    let mut p = pipe(OverlayFlags::SECURE_OVERLAY_SESSION, false);
    p.data.start(&p.control, 2).unwrap();
    assert_eq!(p.data.rotator_usage(), Some(UsageFlags::PROTECTED | UsageFlags::MM_HEAP));

    let mut p = pipe(OverlayFlags::empty(), false);
    p.ctx.set_connected(DisplayId::External, true, false);
    p.data.start(&p.control, 2).unwrap();
    assert_eq!(p.data.rotator_usage(), Some(UsageFlags::IOMMU_HEAP));
}

#[test]
fn test_unsupported_heap_falls_back() {
    // Test the single retry with the legacy heaps
    let mut p = pipe(OverlayFlags::empty(), false);
    p.sim.inject(Faults::NO_IOMMU_HEAP);
    p.data.start(&p.control, 2).unwrap();

    let usage = p.data.rotator_usage().unwrap();
    assert!(usage.contains(UsageFlags::MM_HEAP | UsageFlags::WRITEBACK_HEAP));
    let attempts = p.sim.ops().iter().filter(|op| matches!(op, SimOp::Allocate { .. })).count();
    assert_eq!(attempts, 2);
}

#[test]
fn test_allocation_failure_fails_start() {
    // Test that a ring that cannot be allocated leaves the channel closed
    let mut p = pipe(OverlayFlags::empty(), false);
    p.sim.inject(Faults::ALLOCATE);
    assert!(matches!(p.data.start(&p.control, 2), Err(Error::OutOfMemory)));
    assert!(!p.data.is_open());
}

#[test]
fn test_old_ring_freed_after_successful_queue() {
    // Test that the previous ring stays mapped until a frame from the new one is shown
    let mut p = pipe(OverlayFlags::empty(), false);
    p.data.start(&p.control, 2).unwrap();
    p.data.queue(BufferHandle::new(SOURCE, 0)).unwrap();
    let first = p.data.rotator_memory().unwrap();

    p.data.update(FRAME * 2);
    assert!(p.data.remap_pending());
    p.sim.inject(Faults::PLAY);
    assert!(p.data.queue(BufferHandle::new(SOURCE, 0)).is_err());
    let second = p.data.rotator_memory().unwrap();
    assert_ne!(second, first);
    assert!(!p.data.remap_pending());
    assert!(is_live(&p.sim, first));
    assert!(is_live(&p.sim, second));

    // A generation that never reached the screen is released at once
    p.data.update(FRAME * 3);
    assert!(p.data.queue(BufferHandle::new(SOURCE, 0)).is_err());
    let third = p.data.rotator_memory().unwrap();
    assert!(is_live(&p.sim, first));
    assert!(!is_live(&p.sim, second));

    p.sim.clear_faults();
    p.data.queue(BufferHandle::new(SOURCE, 0)).unwrap();
    assert!(!is_live(&p.sim, first));
    assert!(is_live(&p.sim, third));
    assert_eq!(p.sim.live_memory().len(), 1);
}

#[test]
fn test_remap_failure_keeps_old_ring() {
    // Test that a failed reallocation keeps the old ring and retries later
    let mut p = pipe(OverlayFlags::empty(), false);
    p.data.start(&p.control, 2).unwrap();
    let ring = p.data.rotator_memory().unwrap();

    p.data.update(FRAME * 2);
    p.sim.inject(Faults::ALLOCATE);
    assert!(matches!(p.data.queue(BufferHandle::new(SOURCE, 0)), Err(Error::OutOfMemory)));
    assert!(p.data.remap_pending());
    assert_eq!(p.data.rotator_memory(), Some(ring));
    assert!(is_live(&p.sim, ring));

    p.sim.clear_faults();
    p.data.queue(BufferHandle::new(SOURCE, 0)).unwrap();
    assert!(!p.data.remap_pending());
    assert_ne!(p.data.rotator_memory(), Some(ring));
    assert!(!is_live(&p.sim, ring));
}

#[test]
fn test_rotate_failure_plays_source() {
    // Test that a rejected rotation shows the original buffer
    let mut p = pipe(OverlayFlags::empty(), false);
    p.data.start(&p.control, 2).unwrap();
    p.sim.inject(Faults::ROTATE);
    p.data.queue(BufferHandle::new(SOURCE, 4096)).unwrap();

    let played = plays(&p.sim);
    assert_eq!(played.len(), 1);
    assert_eq!((played[0].memory, played[0].offset), (SOURCE, 4096));
}

#[test]
fn test_direct_pipe_plays_source() {
    // Test that a pipe without a rotator has no ring
    let mut p = pipe(OverlayFlags::empty(), true);
    p.data.start(&p.control, 2).unwrap();
    assert_eq!(p.data.rotator_buffers(), 0);
    assert!(p.sim.live_memory().is_empty());

    p.data.queue(BufferHandle::new(SOURCE, 8192)).unwrap();
    let played = plays(&p.sim);
    assert_eq!(played.len(), 1);
    assert_eq!(played[0].id, p.control.overlay_id().unwrap());
    assert_eq!((played[0].memory, played[0].offset), (SOURCE, 8192));
}

#[test]
fn test_queue_needs_open_channel_and_buffer() {
    // Test the queue preconditions
    let mut p = pipe(OverlayFlags::empty(), false);
    assert!(matches!(p.data.queue_buffer(0), Err(Error::InvalidState(_))));
    p.data.start(&p.control, 2).unwrap();
    assert!(matches!(p.data.queue_buffer(0), Err(Error::InvalidState(_))));
    p.data.set_buffer(SOURCE).unwrap();
    p.data.queue_buffer(0).unwrap();
}

#[test]
fn test_wait_for_vsync_waits_on_last_source() {
    // Test that the vsync wait targets the last queued source buffer
    let mut p = pipe(OverlayFlags::empty(), false);
    p.data.start(&p.control, 2).unwrap();
    assert!(matches!(p.data.wait_for_vsync(), Err(Error::InvalidState(_))));

    p.data.queue(BufferHandle::new(SOURCE, FRAME)).unwrap();
    p.data.wait_for_vsync().unwrap();
    let waited = p.sim.ops().into_iter().find_map(|op| match op {
        SimOp::PlayWait { request, .. } => Some(request),
        _ => None,
    });
    assert_eq!(waited.map(|r| (r.memory, r.offset)), Some((SOURCE, FRAME)));
}

#[test]
fn test_close_frees_ring() {
    // Test that closing the data channel releases the rotator memory
    let mut p = pipe(OverlayFlags::empty(), false);
    p.data.start(&p.control, 2).unwrap();
    assert_eq!(p.sim.live_memory().len(), 1);
    p.data.close();
    assert!(!p.data.is_open());
    assert!(p.sim.live_memory().is_empty());
    assert_eq!(p.data.display(), None);
}
