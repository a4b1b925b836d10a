//! Simulated display hardware
//!
//! An in-memory implementation of the device, rotator and allocator
//! contracts. Every call is recorded in an operation log shared by all the
//! handles a [`SimProvider`] hands out, and any class of call can be made to
//! fail on demand.

use std::sync::Arc;

use bitflags::bitflags;
use hashbrown::HashMap;
use hwc_api::{
    Allocation, Barrier, DeviceProvider, DisplayDevice, DisplayId, Error, HsicConfig, MemoryAllocator, MemoryId,
    MixerPipe, OverlayId, OverlayRequest, PlayRequest, Result, RotateRequest, RotatorDevice, RotatorRequest,
    RotatorSessionId, ScreenInfo, Stereo3dRequest, StereoOutput, UsageFlags,
};
use log::trace;
use spin::Mutex;

const SIM_PAGE_BASE: usize = 0x4000_0000;

bitflags! {
    /// Calls the simulator rejects
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Faults: u32 {
        const OPEN_DISPLAY = 1 << 0;
        const OPEN_ROTATOR = 1 << 1;
        const SET_OVERLAY = 1 << 2;
        const ROTATOR_START = 1 << 3;
        const ROTATE = 1 << 4;
        const PLAY = 1 << 5;
        const PLAY_WAIT = 1 << 6;
        const ALLOCATE = 1 << 7;
        /// The IOMMU heap is reported as unsupported
        const NO_IOMMU_HEAP = 1 << 8;
        const SET_3D = 1 << 9;
        const SET_SCREEN_INFO = 1 << 10;
        /// Virtual heights beyond the visible one are refused
        const NO_PAGE_FLIP = 1 << 11;
    }
}

/// One recorded device call
#[derive(Debug, Clone, PartialEq)]
pub enum SimOp {
    SetOverlay { display: DisplayId, request: OverlayRequest },
    UnsetOverlay { display: DisplayId, id: OverlayId },
    Play { display: DisplayId, request: PlayRequest },
    PlayWait { display: DisplayId, request: PlayRequest },
    Set3d { display: DisplayId, request: Stereo3dRequest },
    SetHsic { display: DisplayId, id: OverlayId, config: HsicConfig },
    SetScreenInfo { display: DisplayId, info: ScreenInfo },
    RotatorStart(RotatorRequest),
    RotatorFinish(RotatorSessionId),
    Rotate(RotateRequest),
    Allocate { size: usize, usage: UsageFlags },
    Free(MemoryId),
    InfoPacket(StereoOutput),
    Barrier(Barrier),
}

#[derive(Default)]
struct SimState {
    ops: Vec<SimOp>,
    faults: Faults,
    screens: HashMap<DisplayId, ScreenInfo>,
    overlays: HashMap<OverlayId, (DisplayId, OverlayRequest)>,
    sessions: HashMap<RotatorSessionId, RotatorRequest>,
    memory: HashMap<MemoryId, Allocation>,
    next_id: u32,
}

impl SimState {
    fn fail(&self, fault: Faults, what: &str) -> Result<()> {
        if self.faults.intersects(fault) {
            return Err(Error::DeviceRejected(format!("{} (simulated)", what)));
        }
        Ok(())
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&mut self, op: SimOp) {
        trace!("sim: {:?}", op);
        self.ops.push(op);
    }
}

/// Screen information of a 32 bpp display with `width` x `height` pixels
pub fn screen(width: u32, height: u32) -> ScreenInfo {
    ScreenInfo {
        xres: width,
        yres: height,
        xres_virtual: width,
        yres_virtual: height,
        line_length: width * 4,
        width_mm: width * 254 / 1600,
        height_mm: height * 254 / 1600,
        refresh_hz: 60,
        ..ScreenInfo::default()
    }
}

/// Entry point of the simulator
#[derive(Clone)]
pub struct SimProvider {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimProvider {
    /// A 1920x1080 primary panel and a 1920x1080 external display
    pub fn new() -> Self {
        let mut state = SimState::default();
        state.screens.insert(DisplayId::Primary, screen(1920, 1080));
        state.screens.insert(DisplayId::External, screen(1920, 1080));
        state.screens.insert(DisplayId::Virtual, screen(1280, 720));
        Self { state: Arc::new(Mutex::new(state)) }
    }

    pub fn with_screen(self, display: DisplayId, info: ScreenInfo) -> Self {
        self.set_screen(display, info);
        self
    }

    pub fn set_screen(&self, display: DisplayId, info: ScreenInfo) {
        self.state.lock().screens.insert(display, info);
    }

    pub fn screen_info(&self, display: DisplayId) -> Option<ScreenInfo> {
        self.state.lock().screens.get(&display).copied()
    }

    pub fn inject(&self, faults: Faults) {
        self.state.lock().faults.insert(faults);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults = Faults::empty();
    }

    pub fn ops(&self) -> Vec<SimOp> {
        self.state.lock().ops.clone()
    }

    /// Drain the operation log
    pub fn take_ops(&self) -> Vec<SimOp> {
        std::mem::take(&mut self.state.lock().ops)
    }

    /// Pipes configured on `display`
    pub fn overlays(&self, display: DisplayId) -> Vec<OverlayRequest> {
        let state = self.state.lock();
        let mut pipes: Vec<_> = state.overlays.values().filter(|(d, _)| *d == display).map(|(_, r)| *r).collect();
        pipes.sort_by_key(|r| r.z_order);
        pipes
    }

    pub fn overlay(&self, id: OverlayId) -> Option<OverlayRequest> {
        self.state.lock().overlays.get(&id).map(|(_, r)| *r)
    }

    pub fn rotator_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Allocations not yet freed
    pub fn live_memory(&self) -> Vec<Allocation> {
        self.state.lock().memory.values().copied().collect()
    }

    /// Attach a pipe to a mixer behind the HAL's back, as a crashed process would
    pub fn leave_stale_pipe(&self, display: DisplayId, request: OverlayRequest) -> OverlayId {
        let mut state = self.state.lock();
        let id = OverlayId(state.next_id());
        state.overlays.insert(id, (display, OverlayRequest { id: Some(id), ..request }));
        id
    }

    pub fn allocator(&self) -> SimAllocator {
        SimAllocator { state: Arc::clone(&self.state) }
    }
}

impl DeviceProvider for SimProvider {
    fn open_display(&self, display: DisplayId) -> Result<Box<dyn DisplayDevice>> {
        let state = self.state.lock();
        state.fail(Faults::OPEN_DISPLAY, "open display")?;
        if !state.screens.contains_key(&display) {
            return Err(Error::NotSupported(format!("no {:?} display", display)));
        }
        Ok(Box::new(SimDisplay { display, state: Arc::clone(&self.state) }))
    }

    fn open_rotator(&self) -> Result<Box<dyn RotatorDevice>> {
        self.state.lock().fail(Faults::OPEN_ROTATOR, "open rotator")?;
        Ok(Box::new(SimRotator { state: Arc::clone(&self.state) }))
    }

    fn send_3d_info_packet(&self, output: StereoOutput) -> Result<()> {
        self.state.lock().record(SimOp::InfoPacket(output));
        Ok(())
    }

    fn enable_barrier(&self, barrier: Barrier) -> Result<()> {
        self.state.lock().record(SimOp::Barrier(barrier));
        Ok(())
    }
}

/// Simulated display device node
pub struct SimDisplay {
    display: DisplayId,
    state: Arc<Mutex<SimState>>,
}

impl DisplayDevice for SimDisplay {
    fn screen_info(&self) -> Result<ScreenInfo> {
        let state = self.state.lock();
        state.screens.get(&self.display).copied().ok_or(Error::DeviceRejected("no screen".into()))
    }

    fn set_screen_info(&mut self, info: &ScreenInfo) -> Result<()> {
        let mut state = self.state.lock();
        state.fail(Faults::SET_SCREEN_INFO, "put screen info")?;
        if state.faults.contains(Faults::NO_PAGE_FLIP) && info.yres_virtual > info.yres {
            return Err(Error::DeviceRejected("page flipping not supported".into()));
        }
        state.screens.insert(self.display, *info);
        state.record(SimOp::SetScreenInfo { display: self.display, info: *info });
        Ok(())
    }

    fn map_framebuffer(&mut self, len: usize) -> Result<(MemoryId, usize)> {
        let mut state = self.state.lock();
        let memory = MemoryId(state.next_id() as i32);
        Ok((memory, SIM_PAGE_BASE + len * self.display.index()))
    }

    fn set_overlay(&mut self, req: &OverlayRequest) -> Result<OverlayId> {
        let mut state = self.state.lock();
        state.fail(Faults::SET_OVERLAY, "overlay set")?;
        let id = match req.id {
            Some(id) if state.overlays.contains_key(&id) => id,
            Some(id) => return Err(Error::DeviceRejected(format!("unknown overlay {:?}", id))),
            None => OverlayId(state.next_id()),
        };
        state.overlays.insert(id, (self.display, OverlayRequest { id: Some(id), ..*req }));
        state.record(SimOp::SetOverlay { display: self.display, request: *req });
        Ok(id)
    }

    fn overlay(&self, id: OverlayId) -> Result<OverlayRequest> {
        let state = self.state.lock();
        state
            .overlays
            .get(&id)
            .map(|(_, r)| *r)
            .ok_or_else(|| Error::DeviceRejected(format!("unknown overlay {:?}", id)))
    }

    fn unset_overlay(&mut self, id: OverlayId) -> Result<()> {
        let mut state = self.state.lock();
        if state.overlays.remove(&id).is_none() {
            return Err(Error::DeviceRejected(format!("unknown overlay {:?}", id)));
        }
        state.record(SimOp::UnsetOverlay { display: self.display, id });
        Ok(())
    }

    fn play(&mut self, req: &PlayRequest) -> Result<()> {
        let mut state = self.state.lock();
        state.fail(Faults::PLAY, "play")?;
        if !state.overlays.contains_key(&req.id) {
            return Err(Error::DeviceRejected(format!("play on unknown overlay {:?}", req.id)));
        }
        state.record(SimOp::Play { display: self.display, request: *req });
        Ok(())
    }

    fn play_wait(&mut self, req: &PlayRequest) -> Result<()> {
        let mut state = self.state.lock();
        state.fail(Faults::PLAY_WAIT, "play wait")?;
        state.record(SimOp::PlayWait { display: self.display, request: *req });
        Ok(())
    }

    fn set_3d(&mut self, req: &Stereo3dRequest) -> Result<()> {
        let mut state = self.state.lock();
        state.fail(Faults::SET_3D, "3d mode")?;
        state.record(SimOp::Set3d { display: self.display, request: *req });
        Ok(())
    }

    fn set_hsic(&mut self, id: OverlayId, cfg: &HsicConfig) -> Result<()> {
        self.state.lock().record(SimOp::SetHsic { display: self.display, id, config: *cfg });
        Ok(())
    }

    fn mixer_info(&self, mixer: u32) -> Result<Vec<MixerPipe>> {
        let state = self.state.lock();
        Ok(state
            .overlays
            .iter()
            .filter(|(_, (display, _))| display.index() as u32 == mixer)
            .map(|(id, (_, req))| MixerPipe { id: *id, z_order: Some(req.z_order) })
            .collect())
    }
}

/// Simulated rotator device node
pub struct SimRotator {
    state: Arc<Mutex<SimState>>,
}

impl RotatorDevice for SimRotator {
    fn start(&mut self, req: &RotatorRequest) -> Result<RotatorSessionId> {
        let mut state = self.state.lock();
        state.fail(Faults::ROTATOR_START, "rotator start")?;
        let session = match req.session {
            Some(session) => session,
            None => RotatorSessionId(state.next_id()),
        };
        state.sessions.insert(session, RotatorRequest { session: Some(session), ..*req });
        state.record(SimOp::RotatorStart(*req));
        Ok(session)
    }

    fn finish(&mut self, session: RotatorSessionId) -> Result<()> {
        let mut state = self.state.lock();
        if state.sessions.remove(&session).is_none() {
            return Err(Error::DeviceRejected(format!("unknown rotator session {:?}", session)));
        }
        state.record(SimOp::RotatorFinish(session));
        Ok(())
    }

    fn rotate(&mut self, req: &RotateRequest) -> Result<()> {
        let mut state = self.state.lock();
        state.fail(Faults::ROTATE, "rotate")?;
        if !state.sessions.contains_key(&req.session) {
            return Err(Error::DeviceRejected(format!("unknown rotator session {:?}", req.session)));
        }
        state.record(SimOp::Rotate(*req));
        Ok(())
    }
}

/// Simulated platform allocator
pub struct SimAllocator {
    state: Arc<Mutex<SimState>>,
}

impl MemoryAllocator for SimAllocator {
    fn allocate(&self, size: usize, usage: UsageFlags) -> Result<Allocation> {
        let mut state = self.state.lock();
        state.record(SimOp::Allocate { size, usage });
        if state.faults.contains(Faults::ALLOCATE) {
            return Err(Error::OutOfMemory);
        }
        if state.faults.contains(Faults::NO_IOMMU_HEAP) && usage.contains(UsageFlags::IOMMU_HEAP)
            && !usage.contains(UsageFlags::WRITEBACK_HEAP)
        {
            return Err(Error::NotSupported("IOMMU heap".into()));
        }
        let memory = MemoryId(state.next_id() as i32);
        let allocation = Allocation { memory, base: SIM_PAGE_BASE + memory.0 as usize * 0x100_0000, size, usage };
        state.memory.insert(memory, allocation);
        Ok(allocation)
    }

    fn free(&self, allocation: &Allocation) -> Result<()> {
        let mut state = self.state.lock();
        if state.memory.remove(&allocation.memory).is_none() {
            return Err(Error::InvalidArgument(format!("double free of {:?}", allocation.memory)));
        }
        state.record(SimOp::Free(allocation.memory));
        Ok(())
    }
}
