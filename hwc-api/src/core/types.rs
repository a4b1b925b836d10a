//! Core value types

/// Physical display served by the HAL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DisplayId {
    /// Built-in panel
    Primary,
    /// HDMI or other wired secondary display
    External,
    /// Wireless/writeback secondary display
    Virtual,
}

impl DisplayId {
    /// Every display, in device node order
    pub const ALL: [DisplayId; 3] = [DisplayId::Primary, DisplayId::External, DisplayId::Virtual];

    /// Device node / mixer number of this display
    pub const fn index(self) -> usize {
        match self {
            DisplayId::Primary => 0,
            DisplayId::External => 1,
            DisplayId::Virtual => 2,
        }
    }

    /// Whether this is a secondary display
    pub const fn is_secondary(self) -> bool {
        !matches!(self, DisplayId::Primary)
    }
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The same size with width and height exchanged
    pub const fn swapped(self) -> Self {
        Self { width: self.height, height: self.width }
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Axis-aligned rectangle with an unsigned origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Rectangle covering a whole frame
    pub const fn from_size(size: Size) -> Self {
        Self { x: 0, y: 0, w: size.width, h: size.height }
    }

    pub const fn size(&self) -> Size {
        Size::new(self.w, self.h)
    }

    /// Right edge, `None` on overflow
    pub fn right(&self) -> Option<u32> {
        self.x.checked_add(self.w)
    }

    /// Bottom edge, `None` on overflow
    pub fn bottom(&self) -> Option<u32> {
        self.y.checked_add(self.h)
    }

    /// Check that the rectangle lies inside a frame of the given size
    pub fn fits_within(&self, frame: Size) -> bool {
        matches!(self.right(), Some(r) if r <= frame.width)
            && matches!(self.bottom(), Some(b) if b <= frame.height)
    }

    pub const fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// Shift every component right by `shift` bits
    pub const fn scaled_down(self, shift: u32) -> Self {
        Self { x: self.x >> shift, y: self.y >> shift, w: self.w >> shift, h: self.h >> shift }
    }
}

/// Edge-based rectangle that may extend past the display on any side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    pub const fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Convert to a [`Rect`], `None` if any edge is negative or inverted
    pub fn to_rect(&self) -> Option<Rect> {
        let x = u32::try_from(self.left).ok()?;
        let y = u32::try_from(self.top).ok()?;
        let w = u32::try_from(self.width()).ok()?;
        let h = u32::try_from(self.height()).ok()?;
        Some(Rect::new(x, y, w, h))
    }
}

/// Clamp an unsigned edge into the signed range of `Bounds`
fn saturating_edge(edge: Option<u32>) -> i32 {
    edge.and_then(|e| i32::try_from(e).ok()).unwrap_or(i32::MAX)
}

impl From<Rect> for Bounds {
    fn from(r: Rect) -> Self {
        Bounds::new(
            saturating_edge(Some(r.x)),
            saturating_edge(Some(r.y)),
            saturating_edge(r.right()),
            saturating_edge(r.bottom()),
        )
    }
}

/// Hardware pipe slot within a display bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeIndex(pub u32);

/// Identifier the display device assigns to a configured overlay pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlayId(pub u32);

/// Identifier the rotator assigns to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RotatorSessionId(pub u32);

/// Handle of a shared memory region (a file descriptor on the device side)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryId(pub i32);

/// Source buffer description passed to `setSource`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    pub width: u32,
    pub height: u32,
    /// HAL format word: color code plus the stereo nibbles
    pub format: u32,
    /// Size of one buffer in bytes
    pub size: u32,
}

impl BufferInfo {
    pub const fn new(width: u32, height: u32, format: u32, size: u32) -> Self {
        Self { width, height, format, size }
    }

    /// Same buffer with a different size in bytes
    pub const fn with_size(self, size: u32) -> Self {
        Self { size, ..self }
    }
}

/// Buffer reference handed to `queueBuffer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHandle {
    pub memory: MemoryId,
    pub offset: u32,
}

impl BufferHandle {
    pub const fn new(memory: MemoryId, offset: u32) -> Self {
        Self { memory, offset }
    }
}
