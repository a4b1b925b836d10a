//! Rotator downscale selection

use crate::core::Size;
use static_assertions::const_assert_eq;

/// Power-of-two decimation applied by the rotator before the pipe scales
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum DownscaleFactor {
    #[default]
    None = 0,
    Half = 1,
    Quarter = 2,
    Eighth = 3,
}

const_assert_eq!(DownscaleFactor::Eighth as u32, 3);

impl DownscaleFactor {
    /// Right shift the factor applies to source dimensions
    pub const fn shift(self) -> u32 {
        self as u32
    }

    pub const fn divisor(self) -> u32 {
        1 << self.shift()
    }

    /// Factor for an integer source-to-destination ratio
    pub const fn from_ratio(ratio: u32) -> Self {
        match ratio {
            0..=1 => DownscaleFactor::None,
            2..=3 => DownscaleFactor::Half,
            4..=7 => DownscaleFactor::Quarter,
            _ => DownscaleFactor::Eighth,
        }
    }

    /// Pick the factor for a crop scaled onto a destination
    ///
    /// The ratio is the larger of the two integer axis ratios.
    pub fn select(src: Size, dst: Size) -> Self {
        if dst.width == 0 || dst.height == 0 {
            return DownscaleFactor::None;
        }
        let ratio = (src.width / dst.width).max(src.height / dst.height);
        Self::from_ratio(ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_table() {
        // Test the ratio boundaries
        assert_eq!(DownscaleFactor::from_ratio(1), DownscaleFactor::None);
        assert_eq!(DownscaleFactor::from_ratio(2), DownscaleFactor::Half);
        assert_eq!(DownscaleFactor::from_ratio(3), DownscaleFactor::Half);
        assert_eq!(DownscaleFactor::from_ratio(4), DownscaleFactor::Quarter);
        assert_eq!(DownscaleFactor::from_ratio(6), DownscaleFactor::Quarter);
        assert_eq!(DownscaleFactor::from_ratio(8), DownscaleFactor::Eighth);
        assert_eq!(DownscaleFactor::from_ratio(10), DownscaleFactor::Eighth);
    }

    #[test]
    fn test_select_uses_larger_axis() {
        // Test that the worse axis decides
        let f = DownscaleFactor::select(Size::new(1920, 1080), Size::new(960, 100));
        assert_eq!(f, DownscaleFactor::Eighth);
        let f = DownscaleFactor::select(Size::new(1920, 1080), Size::new(1920, 1080));
        assert_eq!(f, DownscaleFactor::None);
        assert_eq!(DownscaleFactor::select(Size::new(10, 10), Size::new(0, 0)), DownscaleFactor::None);
    }
}
