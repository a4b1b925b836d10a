//! Geometry engine
//!
//! Pure functions computing pipe rectangles. Nothing in here touches a
//! device; the control channel feeds the results into its requests.

pub mod downscale;
pub mod placement;
pub mod stereo;

pub use downscale::DownscaleFactor;
pub use placement::{ActionSafe, aspect_ratio_position, mirror_position};
pub use stereo::{stereo_crop, stereo_position};

use crate::core::{Bounds, HardwareFormat, Rect, Size, Transform};
use crate::error::{Result, invalid_geometry};

/// Largest upscale an overlay pipe can perform
pub const MAX_MAGNIFICATION: u32 = 8;
/// Block width of tiled YUV layouts
pub const TILE_WIDTH: u32 = 64;
/// Block height of tiled YUV layouts
pub const TILE_HEIGHT: u32 = 32;

/// Round `value` up to a multiple of `align`
pub const fn align_up(value: u32, align: u32) -> u32 {
    if value == 0 { 0 } else { ((value - 1) / align + 1) * align }
}

/// Clear the lowest bit
pub const fn even_out(value: u32) -> u32 {
    value & !1
}

/// Normalize one axis of a crop to even origin and extent
///
/// An odd origin moves up by one. The extent then shrinks so the crop never
/// grows past its original far edge.
pub const fn normalize_span(origin: u32, extent: u32) -> (u32, u32) {
    if origin & 1 != 0 {
        let extent = if extent & 1 != 0 { even_out(extent) } else { extent.saturating_sub(2) };
        (origin + 1, extent)
    } else {
        (origin, even_out(extent))
    }
}

/// Normalize both axes of a crop
pub const fn normalize_crop(crop: Rect) -> Rect {
    let (x, w) = normalize_span(crop.x, crop.w);
    let (y, h) = normalize_span(crop.y, crop.h);
    Rect::new(x, y, w, h)
}

/// Buffer size and initial crop of a freshly configured pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLayout {
    pub buffer: Size,
    pub crop: Rect,
}

/// Lay out a source buffer for a pipe
///
/// Tiled layouts are padded to whole tiles. When the rotator reads the
/// buffer the padding becomes a crop offset; a pipe reading the buffer
/// directly drops the padding from the crop instead.
pub fn source_layout(size: Size, format: HardwareFormat, rotator: bool) -> SourceLayout {
    if !format.is_tiled() {
        return SourceLayout { buffer: size, crop: Rect::from_size(size) };
    }
    let aligned = Size::new(align_up(size.width, TILE_WIDTH), align_up(size.height, TILE_HEIGHT));
    let pad_w = aligned.width - size.width;
    let pad_h = aligned.height - size.height;
    if rotator {
        SourceLayout { buffer: aligned, crop: Rect::new(pad_w, pad_h, size.width, size.height) }
    } else {
        let crop = Rect::new(0, 0, size.width.saturating_sub(pad_w), size.height.saturating_sub(pad_h));
        SourceLayout { buffer: size, crop }
    }
}

/// Content size without tile padding
pub fn tile_corrected(size: Size, format: HardwareFormat) -> Size {
    if format.is_tiled() {
        let pad_w = align_up(size.width, TILE_WIDTH) - size.width;
        let pad_h = align_up(size.height, TILE_HEIGHT) - size.height;
        Size::new(size.width.saturating_sub(pad_w), size.height.saturating_sub(pad_h))
    } else {
        size
    }
}

/// Initial destination of a new pipe: the source size shrunk to fit the display
pub fn initial_destination(src: Size, display: Size) -> Rect {
    let mut w = src.width as u64;
    let mut h = src.height as u64;
    let fb_w = display.width as u64;
    let fb_h = display.height as u64;
    if w > fb_w {
        h = h * fb_w / w;
        w = fb_w;
    }
    if h > fb_h && h > 0 {
        w = w * fb_h / h;
        h = fb_h;
    }
    Rect::new(0, 0, w as u32, h as u32)
}

/// Validate a requested destination against the display bounds
pub fn check_destination(x: i32, y: i32, w: u32, h: u32, display: Size) -> Result<Rect> {
    if x < 0 || y < 0 {
        return Err(invalid_geometry("destination origin is negative"));
    }
    let rect = Rect::new(x as u32, y as u32, w, h);
    if !rect.fits_within(display) {
        return Err(invalid_geometry("destination extends past the display"));
    }
    Ok(rect)
}

/// Clamp a destination to the magnification limit, recentering each clamped axis
pub fn clamp_magnification(dst: Rect, src: Size, display: Size) -> Rect {
    let mut out = dst;
    let max_w = src.width.saturating_mul(MAX_MAGNIFICATION);
    let max_h = src.height.saturating_mul(MAX_MAGNIFICATION);
    if out.w > max_w {
        out.w = max_w;
        out.x = display.width.saturating_sub(out.w) / 2;
    }
    if out.h > max_h {
        out.h = max_h;
        out.y = display.height.saturating_sub(out.h) / 2;
    }
    out
}

/// Clamp a destination size to the magnification limit, keeping its origin
pub fn cap_magnification(dst: Rect, src: Size) -> Rect {
    Rect {
        w: dst.w.min(src.width.saturating_mul(MAX_MAGNIFICATION)),
        h: dst.h.min(src.height.saturating_mul(MAX_MAGNIFICATION)),
        ..dst
    }
}

/// Clip a layer whose destination extends past the display
///
/// The crop is cut by the same fraction the destination loses on each edge.
/// The cut fractions follow the layer transform, so a destination cut on its
/// left edge under a quarter turn trims the crop's top edge. Returns the new
/// crop and destination, or `None` when nothing remains on screen.
pub fn clip_to_display(crop: Rect, dst: Bounds, display: Size, transform: Transform) -> Option<(Rect, Rect)> {
    let dst_w = dst.width().unsigned_abs() as f32;
    let dst_h = dst.height().unsigned_abs() as f32;
    if dst_w == 0.0 || dst_h == 0.0 {
        return None;
    }
    let fb_w = display.width as i32;
    let fb_h = display.height as i32;
    let mut out = dst;
    let (mut left, mut top, mut right, mut bottom) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);

    if out.left < 0 {
        left = (-out.left) as f32 / dst_w;
        out.left = 0;
    }
    if out.right > fb_w {
        right = (out.right - fb_w) as f32 / dst_w;
        out.right = fb_w;
    }
    if out.top < 0 {
        top = (-out.top) as f32 / dst_h;
        out.top = 0;
    }
    if out.bottom > fb_h {
        bottom = (out.bottom - fb_h) as f32 / dst_h;
        out.bottom = fb_h;
    }

    if transform.contains(Transform::FLIP_H) {
        ::core::mem::swap(&mut left, &mut right);
    }
    if transform.contains(Transform::FLIP_V) {
        ::core::mem::swap(&mut top, &mut bottom);
    }
    if transform.contains(Transform::ROT_90) {
        // Anti-clockwise, undoing the quarter turn
        let tmp = left;
        left = top;
        top = right;
        right = bottom;
        bottom = tmp;
    }

    let crop_w = crop.w as f32;
    let crop_h = crop.h as f32;
    let cut = Bounds::new(
        (crop.x as f32 + crop_w * left) as i32,
        (crop.y as f32 + crop_h * top) as i32,
        ((crop.x + crop.w) as f32 - crop_w * right) as i32,
        ((crop.y + crop.h) as f32 - crop_h * bottom) as i32,
    );
    let crop = cut.to_rect()?;
    let dst = out.to_rect()?;
    if crop.is_empty() || dst.is_empty() {
        return None;
    }
    Some((crop, dst))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_span() {
        // Test even and odd origins and extents
        assert_eq!(normalize_span(0, 101), (0, 100));
        assert_eq!(normalize_span(1, 101), (2, 100));
        assert_eq!(normalize_span(1, 100), (2, 98));
        assert_eq!(normalize_span(4, 8), (4, 8));
        assert_eq!(normalize_span(1, 0), (2, 0));
    }

    #[test]
    fn test_tiled_layout_with_rotator() {
        // Test that tile padding becomes a crop offset
        let layout = source_layout(Size::new(1280, 720), HardwareFormat::YCbCrH2V2Tile, true);
        assert_eq!(layout.buffer, Size::new(1280, 736));
        assert_eq!(layout.crop, Rect::new(0, 16, 1280, 720));

        let layout = source_layout(Size::new(1000, 720), HardwareFormat::YCbCrH2V2Tile, true);
        assert_eq!(layout.buffer, Size::new(1024, 736));
        assert_eq!(layout.crop, Rect::new(24, 16, 1000, 720));
    }

    #[test]
    fn test_tiled_layout_direct() {
        // Test that a pipe reading tiles directly drops the padding
        let layout = source_layout(Size::new(1000, 720), HardwareFormat::YCbCrH2V2Tile, false);
        assert_eq!(layout.buffer, Size::new(1000, 720));
        assert_eq!(layout.crop, Rect::new(0, 0, 976, 704));
        let linear = source_layout(Size::new(1000, 720), HardwareFormat::YCbCrH2V2, true);
        assert_eq!(linear.crop, Rect::new(0, 0, 1000, 720));
    }

    #[test]
    fn test_initial_destination() {
        // Test that oversized sources are scaled to fit, keeping the aspect ratio
        assert_eq!(initial_destination(Size::new(640, 480), Size::new(1280, 720)), Rect::new(0, 0, 640, 480));
        assert_eq!(initial_destination(Size::new(1920, 1080), Size::new(1280, 720)), Rect::new(0, 0, 1280, 720));
        assert_eq!(initial_destination(Size::new(720, 1280), Size::new(1280, 720)), Rect::new(0, 0, 405, 720));
    }

    #[test]
    fn test_check_destination() {
        // Test display bounds validation
        let display = Size::new(1280, 720);
        assert!(check_destination(0, 0, 1280, 720, display).is_ok());
        assert!(check_destination(-1, 0, 10, 10, display).is_err());
        assert!(check_destination(1, 0, 1280, 720, display).is_err());
    }

    #[test]
    fn test_clamp_magnification() {
        // Test that an over-magnified destination is clamped and recentered
        let display = Size::new(20000, 20000);
        let clamped = clamp_magnification(Rect::new(0, 0, 20000, 20000), Size::new(1920, 1080), display);
        assert_eq!(clamped, Rect::new(2320, 5680, 15360, 8640));

        let within = Rect::new(0, 0, 3840, 2160);
        assert_eq!(clamp_magnification(within, Size::new(1920, 1080), display), within);
    }

    #[test]
    fn test_clip_to_display() {
        // Test cutting a crop for a destination hanging off the left edge
        let crop = Rect::new(0, 0, 100, 100);
        let (c, d) = clip_to_display(crop, Bounds::new(-50, 0, 150, 200), Size::new(1000, 1000), Transform::IDENTITY)
            .unwrap();
        assert_eq!(d, Rect::new(0, 0, 150, 200));
        assert_eq!(c, Rect::new(25, 0, 75, 100));

        // Under a quarter turn the left cut lands on the crop's bottom edge
        let (c, _) = clip_to_display(crop, Bounds::new(-50, 0, 150, 200), Size::new(1000, 1000), Transform::ROT_90)
            .unwrap();
        assert_eq!(c, Rect::new(0, 0, 100, 75));

        let off_screen = Bounds::new(-10, -10, -5, -5);
        assert!(clip_to_display(crop, off_screen, Size::new(100, 100), Transform::IDENTITY).is_none());
    }
}
