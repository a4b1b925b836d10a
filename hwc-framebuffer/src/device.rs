//! Framebuffer mapping
//!
//! Sizes the scan-out ring on the display device and derives the display
//! attributes published to the rest of the HAL.

use hwc_api::geometry::align_up;
use hwc_api::interfaces::{DisplayDevice, ScreenInfo};
use hwc_api::{Error, PixelFormat, Result, Size};
use log::{debug, info, warn};

/// Granularity of one scan-out buffer
pub const PAGE_SIZE: u32 = 4096;
/// Density assumed when the panel does not report its physical size
pub const DEFAULT_DPI: f32 = 160.0;
/// Refresh rate assumed when the panel does not report one
pub const DEFAULT_FPS: u32 = 60;

const MM_PER_INCH: f32 = 25.4;
const NS_PER_SECOND: u64 = 1_000_000_000;

/// Geometry and timing of the mapped framebuffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramebufferInfo {
    /// Screen information as the device accepted it
    pub screen: ScreenInfo,
    pub format: PixelFormat,
    /// Bytes of one buffer, rounded up to a page
    pub buffer_size: u32,
    pub buffers: u32,
    pub page_flip: bool,
    pub xdpi: f32,
    pub ydpi: f32,
    pub fps: u32,
    pub vsync_period_ns: u64,
}

impl FramebufferInfo {
    pub const fn size(&self) -> Size {
        self.screen.size()
    }

    /// Bytes mapped for the whole ring
    pub const fn mapped_len(&self) -> usize {
        self.buffer_size as usize * self.buffers as usize
    }

    /// Offset of buffer `index` in the mapping
    pub fn offset_of(&self, index: u32) -> Option<u32> {
        (index < self.buffers).then(|| index * self.buffer_size)
    }

    /// Scan line at which a buffer starting at `offset` begins
    pub const fn yoffset_of(&self, offset: u32) -> u32 {
        offset / self.screen.line_length
    }
}

fn dpi(pixels: u32, mm: u32) -> f32 {
    if mm == 0 { DEFAULT_DPI } else { pixels as f32 * MM_PER_INCH / mm as f32 }
}

/// Size the scan-out ring for `requested` buffers
///
/// Page flipping is turned off when the device refuses the larger virtual
/// screen, and the buffer count is whatever the device kept.
pub fn configure(device: &mut dyn DisplayDevice, requested: u32) -> Result<FramebufferInfo> {
    let mut screen = device.screen_info()?;
    if screen.xres == 0 || screen.yres == 0 {
        return Err(Error::InvalidState(format!("display reports {}x{}", screen.xres, screen.yres)));
    }
    screen.xoffset = 0;
    screen.yoffset = 0;
    if screen.bits_per_pixel != 32 {
        screen.bits_per_pixel = 16;
    }
    let line_length = match screen.line_length {
        0 => screen.xres * screen.bits_per_pixel / 8,
        len => len,
    };
    screen.line_length = line_length;

    let buffer_size = align_up(line_length * screen.yres, PAGE_SIZE);
    screen.yres_virtual = buffer_size * requested / line_length;

    let mut page_flip = true;
    if let Err(e) = device.set_screen_info(&screen) {
        warn!("{} buffers refused, page flipping disabled: {}", requested, e);
        page_flip = false;
        screen.yres_virtual = buffer_size / line_length;
    }
    if screen.yres_virtual < buffer_size * 2 / line_length {
        page_flip = false;
        warn!("page flipping not supported (yres_virtual={}, needs {})", screen.yres_virtual, screen.yres * 2);
    }

    let accepted = device.screen_info()?;
    let buffers = accepted.yres_virtual / screen.yres;
    if buffers == 0 {
        return Err(Error::InvalidState(format!(
            "virtual height {} below one {} line screen",
            accepted.yres_virtual, screen.yres
        )));
    }
    screen.yres_virtual = accepted.yres_virtual;

    let fps = match screen.refresh_hz {
        0 => DEFAULT_FPS,
        hz => hz,
    };
    let info = FramebufferInfo {
        screen,
        format: screen.pixel_format(false),
        buffer_size,
        buffers,
        page_flip,
        xdpi: dpi(screen.xres, screen.width_mm),
        ydpi: dpi(screen.yres, screen.height_mm),
        fps,
        vsync_period_ns: NS_PER_SECOND / fps as u64,
    };
    info!(
        "framebuffer {}x{} {:?}, {} buffers of {} bytes, {:.1}x{:.1} dpi, {} fps",
        screen.xres, screen.yres, info.format, buffers, buffer_size, info.xdpi, info.ydpi, fps
    );
    debug!("line length {}, yres_virtual {}, page flip {}", line_length, screen.yres_virtual, page_flip);
    Ok(info)
}
