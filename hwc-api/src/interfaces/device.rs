//! Display and rotator device contracts

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::core::{
    DisplayId, HardwareFormat, MemoryId, OverlayId, PipeFlags, PipeIndex, PixelFormat, Rect,
    RotatorSessionId, Size, StereoOutput,
};
use crate::error::Result;
use crate::geometry::DownscaleFactor;

/// Screen information read from and written to a display device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenInfo {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
    /// Bytes per scan line
    pub line_length: u32,
    /// Physical size in millimetres, 0 when the panel does not report it
    pub width_mm: u32,
    pub height_mm: u32,
    /// Refresh rate in Hz, 0 when unknown
    pub refresh_hz: u32,
    /// Length of the scan-out memory
    pub smem_len: u32,
    /// Panel has a parallax barrier
    pub stereo_capable: bool,
}

impl ScreenInfo {
    pub const fn size(&self) -> Size {
        Size::new(self.xres, self.yres)
    }

    /// Color format of the scan-out buffer
    pub const fn pixel_format(&self, opaque: bool) -> PixelFormat {
        match self.bits_per_pixel {
            32 if opaque => PixelFormat::Rgbx8888,
            32 => PixelFormat::Rgba8888,
            _ => PixelFormat::Rgb565,
        }
    }
}

impl Default for ScreenInfo {
    fn default() -> Self {
        Self {
            xres: 0,
            yres: 0,
            xres_virtual: 0,
            yres_virtual: 0,
            xoffset: 0,
            yoffset: 0,
            bits_per_pixel: 32,
            line_length: 0,
            width_mm: 0,
            height_mm: 0,
            refresh_hz: 0,
            smem_len: 0,
            stereo_capable: false,
        }
    }
}

/// Source image as seen by a pipe or by the rotator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceImage {
    pub width: u32,
    pub height: u32,
    pub format: HardwareFormat,
}

impl SourceImage {
    pub const fn new(size: Size, format: HardwareFormat) -> Self {
        Self { width: size.width, height: size.height, format }
    }

    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Full configuration of one overlay pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayRequest {
    /// `None` asks the device for a new pipe
    pub id: Option<OverlayId>,
    pub src: SourceImage,
    pub src_rect: Rect,
    pub dst_rect: Rect,
    pub z_order: PipeIndex,
    pub is_fg: bool,
    pub alpha: u8,
    pub transp_mask: u32,
    pub flags: PipeFlags,
    /// Hardware rotation code
    pub rotation: u32,
}

/// Rotator session configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotatorRequest {
    /// `None` opens a new session
    pub session: Option<RotatorSessionId>,
    pub src: SourceImage,
    pub src_rect: Rect,
    pub dst: Size,
    pub dst_format: HardwareFormat,
    /// Hardware rotation code
    pub rotation: u32,
    pub enable: bool,
    pub downscale: DownscaleFactor,
    pub secure: bool,
}

/// Buffer submission to a configured pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayRequest {
    pub id: OverlayId,
    pub memory: MemoryId,
    pub offset: u32,
}

/// One side of a rotate call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotatorBuffer {
    pub memory: MemoryId,
    pub offset: u32,
    /// Memory is the framebuffer rather than an allocated buffer
    pub from_framebuffer: bool,
}

/// Rotate one buffer into a rotator output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotateRequest {
    pub session: RotatorSessionId,
    pub src: RotatorBuffer,
    pub dst: RotatorBuffer,
}

/// Switch a display in or out of the interleaved stereo framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stereo3dRequest {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
}

/// Hue/saturation/intensity/contrast color conversion of a pipe
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HsicConfig {
    pub hue: i32,
    pub intensity: i32,
    pub saturation: f32,
    pub contrast: f32,
}

/// Pipe attached to a mixer as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixerPipe {
    pub id: OverlayId,
    /// `None` for the base RGB layer
    pub z_order: Option<PipeIndex>,
}

/// Parallax barrier setting of a stereo panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    Off,
    Portrait,
    Landscape,
}

/// Display device node
pub trait DisplayDevice: Send {
    /// Read the current screen information
    fn screen_info(&self) -> Result<ScreenInfo>;

    /// Write screen information; changing `yoffset` flips the scan-out buffer
    fn set_screen_info(&mut self, info: &ScreenInfo) -> Result<()>;

    /// Map `len` bytes of scan-out memory, returning its base address
    fn map_framebuffer(&mut self, len: usize) -> Result<(MemoryId, usize)>;

    /// Configure a pipe; returns the id of the configured pipe
    fn set_overlay(&mut self, req: &OverlayRequest) -> Result<OverlayId>;

    /// Read back the configuration of a pipe
    fn overlay(&self, id: OverlayId) -> Result<OverlayRequest>;

    /// Release a pipe
    fn unset_overlay(&mut self, id: OverlayId) -> Result<()>;

    /// Queue a buffer on a pipe
    fn play(&mut self, req: &PlayRequest) -> Result<()>;

    /// Block until the last buffer queued on a pipe is on screen
    fn play_wait(&mut self, req: &PlayRequest) -> Result<()>;

    fn set_3d(&mut self, req: &Stereo3dRequest) -> Result<()>;

    fn set_hsic(&mut self, id: OverlayId, cfg: &HsicConfig) -> Result<()>;

    /// Pipes currently attached to a mixer
    fn mixer_info(&self, mixer: u32) -> Result<Vec<MixerPipe>>;
}

/// Rotator device node
pub trait RotatorDevice: Send {
    /// Open or reconfigure a session
    fn start(&mut self, req: &RotatorRequest) -> Result<RotatorSessionId>;

    fn finish(&mut self, session: RotatorSessionId) -> Result<()>;

    fn rotate(&mut self, req: &RotateRequest) -> Result<()>;
}

/// Opens device nodes and reaches the display sysfs controls
pub trait DeviceProvider: Send + Sync {
    fn open_display(&self, display: DisplayId) -> Result<Box<dyn DisplayDevice>>;

    fn open_rotator(&self) -> Result<Box<dyn RotatorDevice>>;

    /// Tell the secondary display which stereo layout is coming
    fn send_3d_info_packet(&self, output: StereoOutput) -> Result<()>;

    /// Set the parallax barrier of the primary panel
    fn enable_barrier(&self, barrier: Barrier) -> Result<()>;
}
