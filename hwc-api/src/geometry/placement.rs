//! Aspect-preserving and mirrored placement

use super::{MAX_MAGNIFICATION, even_out};
use crate::core::{Rect, Size, Transform};

/// Action-safe margins as a percentage of each axis
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActionSafe {
    pub width_percent: f32,
    pub height_percent: f32,
}

impl ActionSafe {
    pub const fn new(width_percent: f32, height_percent: f32) -> Self {
        Self { width_percent, height_percent }
    }

    fn shrink(value: u32, percent: f32) -> u32 {
        if percent <= 0.0 {
            return value;
        }
        (value as f64 * (100.0 - percent as f64) / 100.0) as u32
    }
}

/// Centered, aspect-preserving destination for `content` on `display`
///
/// `reference` is the source size the magnification limit applies to,
/// normally the content size without tile padding.
pub fn aspect_ratio_position(content: Size, reference: Size, display: Size, action_safe: ActionSafe) -> Rect {
    let w = content.width as u64;
    let h = content.height as u64;
    let fb_w = display.width as u64;
    let fb_h = display.height as u64;

    let (mut width, mut height) = if w * fb_h > fb_w * h {
        (display.width, even_out((fb_w * h / w) as u32))
    } else if w * fb_h < fb_w * h {
        (even_out((fb_h * w / h) as u32), display.height)
    } else {
        (display.width, display.height)
    };

    width = width.min(reference.width.saturating_mul(MAX_MAGNIFICATION)).min(display.width);
    height = height.min(reference.height.saturating_mul(MAX_MAGNIFICATION)).min(display.height);

    width = ActionSafe::shrink(width, action_safe.width_percent);
    height = ActionSafe::shrink(height, action_safe.height_percent);

    Rect::new((display.width - width) / 2, (display.height - height) / 2, width, height)
}

/// Place a primary-display rectangle on an external display
///
/// The rectangle is first expressed in the primary display's upright frame
/// using the device orientation, then scaled into the aspect-ratio area of
/// the external display.
pub fn mirror_position(
    primary: Size,
    primary_rect: Rect,
    orientation: Transform,
    display: Size,
    action_safe: ActionSafe,
) -> Rect {
    let mut frame = primary;
    let mut input = primary_rect;

    if orientation == Transform::ROT_90 {
        input = Rect::new(input.y, primary.width.saturating_sub(input.x + input.w), input.h, input.w);
        frame = primary.swapped();
    } else if orientation == Transform::ROT_270 {
        input = Rect::new(primary.height.saturating_sub(input.y + input.h), input.x, input.h, input.w);
        frame = primary.swapped();
    } else if orientation == Transform::ROT_180 {
        input.x = primary.width.saturating_sub(input.x + input.w);
        input.y = primary.height.saturating_sub(input.y + input.h);
    }

    let area = aspect_ratio_position(frame, frame, display, action_safe);
    if frame.is_empty() {
        return area;
    }

    let x_ratio = input.x as f32 / frame.width as f32;
    let y_ratio = input.y as f32 / frame.height as f32;
    let w_ratio = input.w as f32 / frame.width as f32;
    let h_ratio = input.h as f32 / frame.height as f32;

    Rect::new(
        (x_ratio * area.w as f32) as u32 + area.x,
        (y_ratio * area.h as f32) as u32 + area.y,
        (w_ratio * area.w as f32) as u32,
        (h_ratio * area.h as f32) as u32,
    )
}
