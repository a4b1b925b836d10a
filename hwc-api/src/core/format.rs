//! Pixel and stereo format codes
//!
//! The composition layer describes buffers with a HAL format word: a color
//! code in the low bits, an optional interlace marker and two stereo nibbles
//! describing how a 3D frame is packed (input) and how it should be shown
//! (output). The display hardware speaks its own set of format codes; this
//! module translates between the two.

use crate::error::{Error, Result};

/// Interlaced-content marker inside the color code
pub const INTERLACE_MASK: u32 = 0x80;
/// Color code bits of a HAL format word
pub const COLOR_FORMAT_MASK: u32 = 0xFFF;
/// Stereo input nibble
pub const FORMAT_3D_INPUT_MASK: u32 = 0xF_0000;
/// Stereo output nibble
pub const FORMAT_3D_OUTPUT_MASK: u32 = 0xF000;
/// Distance between the input and output nibbles
pub const SHIFT_3D: u32 = 4;

/// Color formats the composition layer can hand to the HAL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8888,
    Rgbx8888,
    Rgb888,
    Rgb565,
    Bgra8888,
    YCbCr422Sp,
    YCrCb420Sp,
    YCbCr420SpTiled,
    YCbCr420Sp,
    YCrCb422Sp,
    YCbCr444Sp,
    YCrCb444Sp,
    Yv12,
}

impl PixelFormat {
    /// Every supported format
    pub const ALL: [PixelFormat; 13] = [
        PixelFormat::Rgba8888,
        PixelFormat::Rgbx8888,
        PixelFormat::Rgb888,
        PixelFormat::Rgb565,
        PixelFormat::Bgra8888,
        PixelFormat::YCbCr422Sp,
        PixelFormat::YCrCb420Sp,
        PixelFormat::YCbCr420SpTiled,
        PixelFormat::YCbCr420Sp,
        PixelFormat::YCrCb422Sp,
        PixelFormat::YCbCr444Sp,
        PixelFormat::YCrCb444Sp,
        PixelFormat::Yv12,
    ];

    /// HAL color code
    pub const fn code(self) -> u32 {
        match self {
            PixelFormat::Rgba8888 => 0x1,
            PixelFormat::Rgbx8888 => 0x2,
            PixelFormat::Rgb888 => 0x3,
            PixelFormat::Rgb565 => 0x4,
            PixelFormat::Bgra8888 => 0x5,
            PixelFormat::YCbCr422Sp => 0x10,
            PixelFormat::YCrCb420Sp => 0x11,
            PixelFormat::YCbCr420SpTiled => 0x108,
            PixelFormat::YCbCr420Sp => 0x109,
            PixelFormat::YCrCb422Sp => 0x10B,
            PixelFormat::YCbCr444Sp => 0x10F,
            PixelFormat::YCrCb444Sp => 0x110,
            PixelFormat::Yv12 => 0x3231_5659,
        }
    }

    /// Look up a HAL color code
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.code() == code)
    }

    /// Hardware format used to scan this color format out
    pub const fn hardware(self) -> HardwareFormat {
        match self {
            PixelFormat::Rgba8888 => HardwareFormat::Rgba8888,
            PixelFormat::Rgbx8888 => HardwareFormat::Rgbx8888,
            PixelFormat::Rgb888 => HardwareFormat::Rgb888,
            PixelFormat::Rgb565 => HardwareFormat::Rgb565,
            PixelFormat::Bgra8888 => HardwareFormat::Bgra8888,
            PixelFormat::YCbCr422Sp => HardwareFormat::YCbCrH2V1,
            PixelFormat::YCrCb422Sp => HardwareFormat::YCrCbH2V1,
            PixelFormat::YCbCr420Sp => HardwareFormat::YCbCrH2V2,
            PixelFormat::YCrCb420Sp => HardwareFormat::YCrCbH2V2,
            PixelFormat::YCbCr420SpTiled => HardwareFormat::YCbCrH2V2Tile,
            PixelFormat::Yv12 => HardwareFormat::YCrCbGH2V2,
            PixelFormat::YCbCr444Sp => HardwareFormat::YCbCrH1V1,
            PixelFormat::YCrCb444Sp => HardwareFormat::YCrCbH1V1,
        }
    }

    /// Bytes per pixel of the packed RGB formats, `None` for YUV
    pub const fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgba8888 | PixelFormat::Rgbx8888 | PixelFormat::Bgra8888 => Some(4),
            PixelFormat::Rgb888 => Some(3),
            PixelFormat::Rgb565 => Some(2),
            _ => None,
        }
    }
}

/// Display hardware format codes
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareFormat {
    Rgb565 = 0,
    Xrgb8888 = 1,
    YCbCrH2V2 = 2,
    Argb8888 = 3,
    Rgb888 = 4,
    YCrCbH2V2 = 5,
    YCrYCbH2V1 = 6,
    YCrCbH2V1 = 7,
    YCbCrH2V1 = 8,
    Rgba8888 = 9,
    Bgra8888 = 10,
    Rgbx8888 = 11,
    YCrCbH2V2Tile = 12,
    YCbCrH2V2Tile = 13,
    YCrCbPlanarH2V2 = 14,
    YCrCbGH2V2 = 15,
    YCbCrPlanarH2V2 = 16,
    YCrCbH1V1 = 17,
    YCbCrH1V1 = 18,
}

impl HardwareFormat {
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Tiled layouts need 64x32 block aligned buffers
    pub const fn is_tiled(self) -> bool {
        matches!(self, HardwareFormat::YCrCbH2V2Tile | HardwareFormat::YCbCrH2V2Tile)
    }

    /// Format the rotator writes when it reads this one
    pub const fn rotator_output(self) -> HardwareFormat {
        match self {
            HardwareFormat::YCbCrH2V2Tile => HardwareFormat::YCbCrH2V2,
            HardwareFormat::YCrCbH2V2Tile => HardwareFormat::YCrCbH2V2,
            other => other,
        }
    }
}

/// How the two views of a stereo frame are packed in the source buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StereoInput {
    #[default]
    None,
    SideBySideLeftRight,
    SideBySideRightLeft,
    TopBottom,
    Interleave,
}

impl StereoInput {
    const fn bits(self) -> u32 {
        match self {
            StereoInput::None => 0,
            StereoInput::SideBySideLeftRight => 0x1_0000,
            StereoInput::TopBottom => 0x2_0000,
            StereoInput::Interleave => 0x4_0000,
            StereoInput::SideBySideRightLeft => 0x8_0000,
        }
    }

    const fn from_bits(bits: u32) -> Self {
        match bits {
            0x1_0000 => StereoInput::SideBySideLeftRight,
            0x2_0000 => StereoInput::TopBottom,
            0x4_0000 => StereoInput::Interleave,
            0x8_0000 => StereoInput::SideBySideRightLeft,
            _ => StereoInput::None,
        }
    }
}

/// How a stereo frame should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StereoOutput {
    #[default]
    None,
    SideBySide,
    TopBottom,
    Interleave,
    Monoscopic,
}

impl StereoOutput {
    const fn bits(self) -> u32 {
        match self {
            StereoOutput::None => 0,
            StereoOutput::SideBySide => 0x1000,
            StereoOutput::TopBottom => 0x2000,
            StereoOutput::Interleave => 0x4000,
            StereoOutput::Monoscopic => 0x8000,
        }
    }

    const fn from_bits(bits: u32) -> Self {
        match bits {
            0x1000 => StereoOutput::SideBySide,
            0x2000 => StereoOutput::TopBottom,
            0x4000 => StereoOutput::Interleave,
            0x8000 => StereoOutput::Monoscopic,
            _ => StereoOutput::None,
        }
    }
}

/// Stereo description of a source buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Format3d {
    pub input: StereoInput,
    pub output: StereoOutput,
}

impl Format3d {
    pub const NONE: Format3d = Format3d { input: StereoInput::None, output: StereoOutput::None };

    pub const fn new(input: StereoInput, output: StereoOutput) -> Self {
        Self { input, output }
    }

    /// Extract the stereo nibbles from a HAL format word
    ///
    /// When only one nibble is present the other is derived from it by the
    /// nibble shift. YV12 carries no stereo information.
    pub fn from_format(format: u32) -> Self {
        if format == PixelFormat::Yv12.code() {
            return Self::NONE;
        }
        let input = format & FORMAT_3D_INPUT_MASK;
        let output = format & FORMAT_3D_OUTPUT_MASK;
        let mut bits = input | output;
        if input == 0 {
            bits |= output << SHIFT_3D;
        }
        if output == 0 {
            bits |= input >> SHIFT_3D;
        }
        Self {
            input: StereoInput::from_bits(bits & FORMAT_3D_INPUT_MASK),
            output: StereoOutput::from_bits(bits & FORMAT_3D_OUTPUT_MASK),
        }
    }

    /// Encode as HAL format word nibbles
    pub const fn bits(self) -> u32 {
        self.input.bits() | self.output.bits()
    }

    pub fn is_3d(self) -> bool {
        self != Self::NONE
    }

    /// Same input packing, shown on a single view
    pub const fn monoscopic(self) -> Self {
        Self { input: self.input, output: StereoOutput::Monoscopic }
    }
}

/// Fully decoded HAL format word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    pub color: PixelFormat,
    pub interlaced: bool,
    pub stereo: Format3d,
}

impl SourceFormat {
    /// Split a HAL format word into color, interlace marker and stereo packing
    pub fn decode(format: u32) -> Result<Self> {
        if format == PixelFormat::Yv12.code() {
            return Ok(Self { color: PixelFormat::Yv12, interlaced: false, stereo: Format3d::NONE });
        }
        let mut code = format & COLOR_FORMAT_MASK;
        let interlaced = code & INTERLACE_MASK != 0;
        code &= !INTERLACE_MASK;
        let color = PixelFormat::from_code(code).ok_or(Error::UnsupportedFormat(format))?;
        Ok(Self { color, interlaced, stereo: Format3d::from_format(format) })
    }

    pub const fn hardware(&self) -> HardwareFormat {
        self.color.hardware()
    }
}
