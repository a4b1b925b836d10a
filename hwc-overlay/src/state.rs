//! Orchestrator states
//!
//! Each state names one way of distributing a video source over the primary
//! panel and the secondary display. What an operation does in a state is read
//! from the state's [`Route`], so adding a state means adding a table row.

/// Composition state of an [`Overlay`](crate::overlay::Overlay)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayState {
    /// No video; the UI is mirrored to the secondary display
    UiMirror,
    Video2dPanel,
    /// Stereo content shown monoscopically on the panel
    Video3d2dPanel,
    /// 2D video on the panel and the secondary display
    Video2dTv,
    /// Stereo content on a stereoscopic panel, one channel per eye
    Video3d3dPanel,
    /// Stereo content shown monoscopically on both displays
    Video3d2dTv,
    /// Stereo content sent to a stereo capable secondary display
    Video3d3dTv,
}

/// How a crop reaches the channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropRoute {
    /// Channel 0 takes the crop as is
    Single,
    /// Channel 0 takes the left view of the crop
    MonoLeft,
    /// Every channel takes the crop as is
    Both,
    /// Every channel takes the left view
    LeftOnBoth,
    /// Each channel takes its own eye
    PerEye,
}

/// How a destination reaches the channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionRoute {
    Single,
    /// Channel 0 takes the rectangle, channel 1 a placement mirroring it
    Mirror,
    /// Each channel takes one half of the panel's virtual framebuffer
    StereoPanel,
    /// Each channel takes its half of the output layout, or the rectangle itself
    StereoTv,
}

/// How a transform reaches the channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformRoute {
    Single,
    /// Channel 1 follows the source orientation instead of the final transform
    SourceOnExternal,
    All,
    /// Every channel, after pointing the parallax barrier at the new orientation
    Barrier,
}

/// Routing of every public operation in one state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub channels: usize,
    pub crop: CropRoute,
    pub position: PositionRoute,
    pub transform: TransformRoute,
    /// Queueing waits for the secondary display to show the frame
    pub paced: bool,
}

const fn route(
    channels: usize,
    crop: CropRoute,
    position: PositionRoute,
    transform: TransformRoute,
    paced: bool,
) -> Route {
    Route { channels, crop, position, transform, paced }
}

static ROUTES: [Route; 7] = [
    route(1, CropRoute::Single, PositionRoute::Single, TransformRoute::Single, false),
    route(1, CropRoute::Single, PositionRoute::Single, TransformRoute::Single, false),
    route(1, CropRoute::MonoLeft, PositionRoute::Single, TransformRoute::Single, false),
    route(2, CropRoute::Both, PositionRoute::Mirror, TransformRoute::SourceOnExternal, true),
    route(2, CropRoute::PerEye, PositionRoute::StereoPanel, TransformRoute::Barrier, true),
    route(2, CropRoute::LeftOnBoth, PositionRoute::StereoTv, TransformRoute::SourceOnExternal, true),
    route(2, CropRoute::PerEye, PositionRoute::StereoTv, TransformRoute::All, true),
];

impl OverlayState {
    pub const ALL: [OverlayState; 7] = [
        OverlayState::UiMirror,
        OverlayState::Video2dPanel,
        OverlayState::Video3d2dPanel,
        OverlayState::Video2dTv,
        OverlayState::Video3d3dPanel,
        OverlayState::Video3d2dTv,
        OverlayState::Video3d3dTv,
    ];

    /// Pick the state for a video source
    ///
    /// `panel_3d` is whether the primary panel may show stereo content: it is
    /// stereo capable and the platform enables it.
    pub fn select(stereo: bool, external_connected: bool, external_3d: bool, panel_3d: bool) -> Self {
        match (external_connected, stereo) {
            (true, true) if external_3d => OverlayState::Video3d3dTv,
            (true, true) => OverlayState::Video3d2dTv,
            (true, false) => OverlayState::Video2dTv,
            (false, true) if panel_3d => OverlayState::Video3d3dPanel,
            (false, true) => OverlayState::Video3d2dPanel,
            (false, false) => OverlayState::Video2dPanel,
        }
    }

    pub fn route(self) -> &'static Route {
        &ROUTES[self as usize]
    }

    /// Both eyes are shown; entering or leaving such a state reopens every channel
    pub const fn is_full_stereo(self) -> bool {
        matches!(self, OverlayState::Video3d3dPanel | OverlayState::Video3d3dTv)
    }

    /// The state drives the secondary display
    pub const fn is_tv(self) -> bool {
        matches!(self, OverlayState::Video2dTv | OverlayState::Video3d2dTv | OverlayState::Video3d3dTv)
    }

    pub const fn is_panel(self) -> bool {
        matches!(self, OverlayState::Video2dPanel | OverlayState::Video3d2dPanel)
    }
}
