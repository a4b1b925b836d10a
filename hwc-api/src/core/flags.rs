//! Flag sets exchanged with the composition layer and the display hardware

use bitflags::bitflags;

bitflags! {
    /// Flags the composition layer passes with `setSource`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OverlayFlags: u32 {
        /// Block in play until the frame is on screen
        const WAIT_FOR_VSYNC = 1 << 0;
        /// Pipe is the foreground layer; the framebuffer is not fetched
        const DISABLE_FRAMEBUFFER_FETCH = 1 << 1;
        /// Content is protected
        const SECURE_OVERLAY_SESSION = 1 << 2;
        /// Content is interlaced
        const INTERLACED_CONTENT = 1 << 3;
        /// Pipe may be shared with another mixer
        const PIPE_SHARE = 1 << 4;
        /// Source alpha is premultiplied
        const BLENDING_PREMULT = 1 << 5;
    }
}

bitflags! {
    /// Flags programmed into a hardware overlay pipe
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipeFlags: u32 {
        const SECURE_SESSION = 0x0000_8000;
        const BLEND_FG_PREMULT = 0x0002_0000;
        const SOURCE_ROTATED_90 = 0x0010_0000;
        const PLAY_NOWAIT = 0x0020_0000;
        const PIPE_SHARE = 0x0080_0000;
        const SHARPENING = 0x4000_0000;
        const DEINTERLACE = 0x8000_0000;
    }
}

impl PipeFlags {
    /// Hardware flags derived from caller flags
    pub fn from_overlay_flags(flags: OverlayFlags) -> Self {
        let mut out = PipeFlags::empty();
        out.set(PipeFlags::DEINTERLACE, flags.contains(OverlayFlags::INTERLACED_CONTENT));
        out.set(PipeFlags::PLAY_NOWAIT, !flags.contains(OverlayFlags::WAIT_FOR_VSYNC));
        out.set(PipeFlags::SECURE_SESSION, flags.contains(OverlayFlags::SECURE_OVERLAY_SESSION));
        out.set(PipeFlags::PIPE_SHARE, flags.contains(OverlayFlags::PIPE_SHARE));
        out.set(PipeFlags::BLEND_FG_PREMULT, flags.contains(OverlayFlags::BLENDING_PREMULT));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_flags_from_overlay_flags() {
        // Test that a missing vsync wait turns into a non-blocking play
        let flags = PipeFlags::from_overlay_flags(OverlayFlags::empty());
        assert_eq!(flags, PipeFlags::PLAY_NOWAIT);

        let flags = PipeFlags::from_overlay_flags(
            OverlayFlags::WAIT_FOR_VSYNC | OverlayFlags::INTERLACED_CONTENT | OverlayFlags::SECURE_OVERLAY_SESSION,
        );
        assert!(flags.contains(PipeFlags::DEINTERLACE | PipeFlags::SECURE_SESSION));
        assert!(!flags.contains(PipeFlags::PLAY_NOWAIT));
    }
}
