//! Rotation and flip transforms
//!
//! The eight HAL transform values form the dihedral group D4. A transform is
//! applied to a source buffer as: horizontal flip, then vertical flip, then a
//! clockwise quarter turn. Mapping a crop rectangle through a transform
//! yields the rectangle the overlay pipe reads from the rotator output.

use bitflags::bitflags;

use super::types::{Rect, Size};

bitflags! {
    /// HAL transform value
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Transform: u32 {
        /// Mirror left to right
        const FLIP_H = 0x01;
        /// Mirror top to bottom
        const FLIP_V = 0x02;
        /// Quarter turn clockwise
        const ROT_90 = 0x04;
        const ROT_180 = Self::FLIP_H.bits() | Self::FLIP_V.bits();
        const ROT_270 = Self::ROT_180.bits() | Self::ROT_90.bits();
    }
}

/// Hardware rotation codes
pub mod hw_rotation {
    pub const NOP: u32 = 0;
    pub const FLIP_LR: u32 = 0x1;
    pub const FLIP_UD: u32 = 0x2;
    pub const ROT_90: u32 = 0x4;
    pub const ROT_180: u32 = FLIP_UD | FLIP_LR;
    pub const ROT_270: u32 = ROT_90 | FLIP_UD | FLIP_LR;
}

type Matrix = [[i8; 2]; 2];

const IDENTITY_MATRIX: Matrix = [[1, 0], [0, 1]];

fn multiply(a: Matrix, b: Matrix) -> Matrix {
    let mut out = [[0i8; 2]; 2];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = a[i][0] * b[0][j] + a[i][1] * b[1][j];
        }
    }
    out
}

impl Transform {
    pub const IDENTITY: Transform = Transform::empty();

    /// The eight group elements in HAL value order
    pub const ALL: [Transform; 8] = [
        Transform::IDENTITY,
        Transform::FLIP_H,
        Transform::FLIP_V,
        Transform::ROT_180,
        Transform::ROT_90,
        Transform::ROT_90.union(Transform::FLIP_H),
        Transform::ROT_90.union(Transform::FLIP_V),
        Transform::ROT_270,
    ];

    /// Decode a HAL transform value, `None` for anything outside 0..=7
    pub fn from_hal(value: u32) -> Option<Self> {
        Self::from_bits(value)
    }

    /// Whether the transform swaps width and height
    pub const fn is_rotated_90(self) -> bool {
        self.contains(Transform::ROT_90)
    }

    /// Hardware rotation code
    ///
    /// The rotation+flip composites are encoded with the flip direction
    /// swapped, because the hardware flips after rotating.
    pub fn hw_rotation(self) -> u32 {
        use hw_rotation::*;
        if self == Transform::ROT_90 | Transform::FLIP_V {
            ROT_90 | FLIP_LR
        } else if self == Transform::ROT_90 | Transform::FLIP_H {
            ROT_90 | FLIP_UD
        } else {
            // The remaining values share their bit layout with the hardware code
            self.bits()
        }
    }

    fn matrix(self) -> Matrix {
        let mut m = IDENTITY_MATRIX;
        if self.contains(Transform::FLIP_H) {
            m = multiply([[-1, 0], [0, 1]], m);
        }
        if self.contains(Transform::FLIP_V) {
            m = multiply([[1, 0], [0, -1]], m);
        }
        if self.contains(Transform::ROT_90) {
            m = multiply([[0, -1], [1, 0]], m);
        }
        m
    }

    fn from_matrix(m: Matrix) -> Self {
        Self::ALL.iter().copied().find(|t| t.matrix() == m).unwrap_or(Transform::IDENTITY)
    }

    /// Transform equivalent to applying `self` and then `next`
    pub fn then(self, next: Transform) -> Transform {
        Self::from_matrix(multiply(next.matrix(), self.matrix()))
    }

    /// The transform undoing `self`
    pub fn inverse(self) -> Transform {
        let m = self.matrix();
        Self::from_matrix([[m[0][0], m[1][0]], [m[0][1], m[1][1]]])
    }

    /// Size of the output frame for a source frame of `frame`
    pub const fn output_size(self, frame: Size) -> Size {
        if self.is_rotated_90() { frame.swapped() } else { frame }
    }

    /// Map a rectangle of a `frame` sized buffer into the transformed frame
    ///
    /// Returns the mapped rectangle and the size of the output frame, or
    /// `None` when the rectangle does not lie inside the frame.
    pub fn map_rect(self, rect: Rect, frame: Size) -> Option<(Rect, Size)> {
        if !rect.fits_within(frame) {
            return None;
        }
        let mut r = rect;
        if self.contains(Transform::FLIP_H) {
            r.x = frame.width - (r.x + r.w);
        }
        if self.contains(Transform::FLIP_V) {
            r.y = frame.height - (r.y + r.h);
        }
        if self.contains(Transform::ROT_90) {
            r = Rect::new(frame.height - (r.y + r.h), r.x, r.h, r.w);
        }
        Some((r, self.output_size(frame)))
    }

    /// Map a rectangle of the transformed frame back into the source frame
    ///
    /// `output` is the size of the transformed frame. Exact inverse of
    /// [`Transform::map_rect`].
    pub fn unmap_rect(self, rect: Rect, output: Size) -> Option<(Rect, Size)> {
        if !rect.fits_within(output) {
            return None;
        }
        let source = self.output_size(output);
        let mut r = rect;
        if self.contains(Transform::ROT_90) {
            r = Rect::new(r.y, source.height - (r.x + r.w), r.h, r.w);
        }
        if self.contains(Transform::FLIP_V) {
            r.y = source.height - (r.y + r.h);
        }
        if self.contains(Transform::FLIP_H) {
            r.x = source.width - (r.x + r.w);
        }
        Some((r, source))
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform::IDENTITY
    }
}
