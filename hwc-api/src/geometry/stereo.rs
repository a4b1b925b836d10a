//! Per-eye placement for stereoscopic content

use crate::core::{Rect, Size, StereoInput, StereoOutput};

/// Destination of one stereo channel on a display
///
/// Channel 0 carries the left (or top) view. `None` means the output mode
/// has no fixed placement for the channel and the requested position stands.
pub fn stereo_position(channel: usize, output: StereoOutput, display: Size) -> Option<Rect> {
    let (w, h) = (display.width, display.height);
    match output {
        StereoOutput::SideBySide => Some(match channel {
            0 => Rect::new(0, 0, w / 2, h),
            _ => Rect::new(w / 2, 0, w / 2, h),
        }),
        StereoOutput::TopBottom => Some(match channel {
            0 => Rect::new(0, 0, w, h / 2),
            _ => Rect::new(0, h / 2, w, h / 2),
        }),
        StereoOutput::Monoscopic if channel != 0 => Some(Rect::from_size(display)),
        _ => None,
    }
}

/// Source crop of one stereo channel
pub fn stereo_crop(crop: Rect, channel: usize, input: StereoInput) -> Rect {
    let half_w = crop.w / 2;
    let half_h = crop.h / 2;
    let left = Rect::new(crop.x, crop.y, half_w, crop.h);
    let right = Rect::new(crop.x + half_w, crop.y, half_w, crop.h);
    match input {
        StereoInput::SideBySideLeftRight => if channel == 0 { left } else { right },
        StereoInput::SideBySideRightLeft => if channel == 0 { right } else { left },
        StereoInput::TopBottom => match channel {
            0 => Rect::new(crop.x, crop.y, crop.w, half_h),
            _ => Rect::new(crop.x, crop.y + half_h, crop.w, half_h),
        },
        StereoInput::Interleave | StereoInput::None => crop,
    }
}
