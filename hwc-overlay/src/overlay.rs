//! Overlay orchestrator
//!
//! An [`Overlay`] shows one video source on up to two pipes. `set_source`
//! picks an [`OverlayState`] from the source's stereo layout and the
//! secondary display, opening, updating or closing channels to match. Every
//! other operation is routed to the channels by the state's
//! [`Route`](crate::state::Route).

use std::sync::Arc;

use hwc_api::geometry::{self, stereo_crop};
use hwc_api::{
    Barrier, Bounds, BufferHandle, BufferInfo, DisplayId, Error, Format3d, OverlayFlags, Rect, Result, Size,
    StereoOutput, Transform,
};
use log::{debug, error, info, trace, warn};

use crate::context::{CompositionMode, HalContext};
use crate::control::{ChannelParams, ControlChannel, VisualParam};
use crate::data::DataChannel;
use crate::state::{CropRoute, OverlayState, PositionRoute, TransformRoute};

/// Channel carrying the primary panel, or the left eye
pub const PRIMARY_CHANNEL: usize = 0;
/// Channel carrying the secondary display, or the right eye
pub const EXTERNAL_CHANNEL: usize = 1;
const NUM_CHANNELS: usize = 2;

const FINAL_TRANSFORM_MASK: u32 = 0xF;
const SOURCE_TRANSFORM_SHIFT: u32 = 4;

/// What the orchestrator last saw of the secondary display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExternalLink {
    #[default]
    None,
    Display(DisplayId),
    /// The external channel was closed underneath the current state
    Invalidated,
}

struct Channel {
    control: ControlChannel,
    data: DataChannel,
}

impl Channel {
    fn new(ctx: &Arc<HalContext>) -> Self {
        Self { control: ControlChannel::new(Arc::clone(ctx)), data: DataChannel::new(Arc::clone(ctx)) }
    }

    fn is_open(&self) -> bool {
        self.control.is_open()
    }

    fn start(&mut self, params: &ChannelParams, buffers: usize) -> Result<()> {
        self.control.start(params)?;
        if let Err(e) = self.data.start(&self.control, buffers) {
            self.control.close();
            return Err(e);
        }
        Ok(())
    }

    fn update_source(&mut self, info: &BufferInfo, flags: OverlayFlags) -> Result<()> {
        if let Err(e) = self.control.update_source(info, flags) {
            self.data.close();
            return Err(e);
        }
        self.data.update(info.size);
        Ok(())
    }

    fn close(&mut self) {
        self.data.close();
        self.control.close();
    }
}

fn barrier_for(orientation: Transform) -> Barrier {
    if orientation == Transform::ROT_90 || orientation == Transform::ROT_270 {
        Barrier::Landscape
    } else {
        Barrier::Portrait
    }
}

/// Composition state machine over a primary and an external channel
pub struct Overlay {
    ctx: Arc<HalContext>,
    channels: [Channel; NUM_CHANNELS],
    state: Option<OverlayState>,
    external: ExternalLink,
    format_3d: Format3d,
    buffer: BufferInfo,
    cropped: Size,
    src_orientation: Transform,
    device_orientation: Transform,
}

impl Overlay {
    pub fn new(ctx: Arc<HalContext>) -> Self {
        let channels = [Channel::new(&ctx), Channel::new(&ctx)];
        Self {
            ctx,
            channels,
            state: None,
            external: ExternalLink::None,
            format_3d: Format3d::NONE,
            buffer: BufferInfo::default(),
            cropped: Size::default(),
            src_orientation: Transform::IDENTITY,
            device_orientation: Transform::IDENTITY,
        }
    }

    /// Show `info` on the pipes the current displays call for
    ///
    /// `orientation` is the orientation of the source content, and `external`
    /// the connected secondary display if any. Rotator rings get `buffers`
    /// buffers.
    pub fn set_source(
        &mut self,
        info: &BufferInfo,
        orientation: Transform,
        external: Option<DisplayId>,
        flags: OverlayFlags,
        buffers: usize,
    ) -> bool {
        self.try_set_source(info, orientation, external, flags, buffers)
            .inspect_err(|e| {
                error!(
                    "set_source {}x{} format {:#x} external {:?} flags {:?} failed: {}",
                    info.width, info.height, info.format, external, flags, e
                )
            })
            .is_ok()
    }

    fn try_set_source(
        &mut self,
        info: &BufferInfo,
        orientation: Transform,
        external: Option<DisplayId>,
        flags: OverlayFlags,
        buffers: usize,
    ) -> Result<()> {
        let format_3d = Format3d::from_format(info.format);
        let link = external.map_or(ExternalLink::None, ExternalLink::Display);
        self.src_orientation = orientation;

        let current = self.state;
        let mut hdmi_change = current.is_some() && self.external != link;
        let stereo_change = current.is_some() && self.format_3d.input != format_3d.input;
        let target = self.select_state(format_3d, external);
        let transition = match current {
            None => true,
            Some(state) if hdmi_change || stereo_change => {
                let external_open = self.channels[EXTERNAL_CHANNEL].is_open();
                let moved = matches!(
                    (self.external, link),
                    (ExternalLink::Display(old), ExternalLink::Display(new)) if old != new
                );
                let reopen_external = target.is_tv() && (!external_open || moved);
                state != target || stereo_change || reopen_external
            }
            Some(_) => false,
        };
        if !transition {
            self.external = link;
            return self.update_overlay_source(info, flags);
        }

        if current.is_some_and(|s| s.is_full_stereo()) || (current.is_some() && target.is_full_stereo()) {
            info!("stereo transition {:?} -> {:?}: closing the channels", current, target);
            self.close_channel();
            hdmi_change = false;
        }
        let stereo_change = stereo_change && self.state.is_some();

        info!("overlay state {:?} -> {:?}", current, target);
        self.external = link;
        self.state = Some(target);
        self.format_3d = if format_3d.is_3d() && !target.is_full_stereo() { format_3d.monoscopic() } else { format_3d };
        self.buffer = *info;
        self.cropped = Size::new(info.width, info.height);

        let result = self.enter_state(target, info, external, flags, buffers, hdmi_change, stereo_change);
        if result.is_err() {
            warn!("entering {:?} failed, closing every channel", target);
            self.close_channel();
        } else {
            self.publish(false);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn enter_state(
        &mut self,
        target: OverlayState,
        info: &BufferInfo,
        external: Option<DisplayId>,
        flags: OverlayFlags,
        buffers: usize,
        hdmi_change: bool,
        stereo_change: bool,
    ) -> Result<()> {
        let stereo = self.format_3d;
        let params = |display, flags, rotation_disabled| ChannelParams {
            buffer: *info,
            display,
            rotation_disabled,
            ui: false,
            stereo,
            flags,
        };
        match target {
            OverlayState::Video2dPanel | OverlayState::Video3d2dPanel => {
                if hdmi_change {
                    self.channels[EXTERNAL_CHANNEL].close();
                } else if stereo_change && self.channels[PRIMARY_CHANNEL].is_open() {
                    self.update_channels(info, flags)?;
                } else {
                    let p = params(DisplayId::Primary, flags, false);
                    self.channels[PRIMARY_CHANNEL].start(&p, buffers)?;
                }
            }
            OverlayState::Video3d3dPanel => {
                let barrier = barrier_for(self.device_orientation);
                if let Err(e) = self.ctx.devices().enable_barrier(barrier) {
                    warn!("parallax barrier {:?} failed: {}", barrier, e);
                }
                let p = params(DisplayId::Primary, flags, false);
                for channel in self.channels.iter_mut() {
                    channel.start(&p, buffers)?;
                }
            }
            OverlayState::Video2dTv | OverlayState::Video3d2dTv => {
                let ext = external.ok_or_else(|| Error::InvalidState("TV state without a display".into()))?;
                let ext_flags = flags - OverlayFlags::WAIT_FOR_VSYNC;
                if hdmi_change {
                    let p = params(ext, ext_flags, false);
                    let channel = &mut self.channels[EXTERNAL_CHANNEL];
                    if channel.is_open() {
                        debug!("secondary display is now {:?}, moving the external channel", ext);
                        channel.close();
                    }
                    channel.start(&p, buffers)?;
                } else {
                    let plan = [(DisplayId::Primary, flags), (ext, ext_flags)];
                    for (channel, (display, flags)) in self.channels.iter_mut().zip(plan) {
                        if stereo_change && channel.is_open() {
                            channel.update_source(info, flags)?;
                        } else if !channel.is_open() {
                            channel.start(&params(display, flags, false), buffers)?;
                        }
                    }
                }
                let primary = self.channels[PRIMARY_CHANNEL].control.position();
                let rect = self.external_placement(primary)?;
                self.set_channel_position(EXTERNAL_CHANNEL, rect)?;
            }
            OverlayState::Video3d3dTv => {
                let ext = external.ok_or_else(|| Error::InvalidState("TV state without a display".into()))?;
                let p = params(ext, flags, true);
                for channel in self.channels.iter_mut() {
                    channel.start(&p, buffers)?;
                }
                self.ctx.devices().send_3d_info_packet(self.format_3d.output)?;
            }
            OverlayState::UiMirror => {
                return Err(Error::InvalidState("UI mirroring is started with start_ui_mirror".into()));
            }
        }
        Ok(())
    }

    fn select_state(&self, format_3d: Format3d, external: Option<DisplayId>) -> OverlayState {
        let external_3d = external.is_some_and(|d| self.ctx.display(d).stereo_capable);
        let panel_3d = self.ctx.display(DisplayId::Primary).stereo_capable && self.ctx.config().use_panel_3d;
        OverlayState::select(format_3d.is_3d(), external.is_some(), external_3d, panel_3d)
    }

    /// Record the state in the attributes of the display it drives
    fn publish(&self, closing: bool) {
        let Some(state) = self.state else {
            return;
        };
        let display = match (state, self.external) {
            (OverlayState::UiMirror, ExternalLink::Display(display)) => display,
            (OverlayState::UiMirror, _) => return,
            _ => DisplayId::Primary,
        };
        let published = (!closing).then_some(state);
        self.ctx.update_display(display, |d| {
            d.overlay_state = published;
            d.mode = match published {
                None => CompositionMode::Framebuffer,
                Some(OverlayState::UiMirror) => CompositionMode::Mirror,
                Some(_) => CompositionMode::Overlay,
            };
        });
    }

    /// Apply a new buffer geometry or new flags to the open channels
    fn update_overlay_source(&mut self, info: &BufferInfo, flags: OverlayFlags) -> Result<()> {
        let primary_open = self.channels[PRIMARY_CHANNEL].is_open();
        let flags_changed = primary_open && self.channels[PRIMARY_CHANNEL].control.flags_need_update(flags);
        let geometry_changed = (info.width, info.height, info.format)
            != (self.buffer.width, self.buffer.height, self.buffer.format);
        if !flags_changed && !geometry_changed {
            return Ok(());
        }

        let per_channel = [flags, flags & OverlayFlags::DISABLE_FRAMEBUFFER_FETCH];
        if !geometry_changed && primary_open {
            debug!("updating overlay flags to {:?}", flags);
            let external = &mut self.channels[EXTERNAL_CHANNEL];
            if external.is_open() {
                external.control.update_flags(per_channel[EXTERNAL_CHANNEL])?;
            }
            return self.channels[PRIMARY_CHANNEL].control.update_flags(flags);
        }
        self.update_channels(info, flags)
    }

    fn update_channels(&mut self, info: &BufferInfo, flags: OverlayFlags) -> Result<()> {
        let per_channel = [flags, flags & OverlayFlags::DISABLE_FRAMEBUFFER_FETCH];
        for (channel, flags) in self.channels.iter_mut().zip(per_channel) {
            if channel.is_open() {
                channel.update_source(info, flags)?;
            }
        }
        debug!("overlay source now {}x{} format {:#x}", info.width, info.height, info.format);
        self.buffer = *info;
        self.cropped = Size::new(info.width, info.height);
        Ok(())
    }

    /// Destination of the external channel for the given primary destination
    fn external_placement(&self, primary_rect: Option<Rect>) -> Result<Rect> {
        let external = &self.channels[EXTERNAL_CHANNEL].control;
        if self.ctx.config().true_mirroring {
            let mut primary = self.ctx.display(DisplayId::Primary).size;
            if primary.is_empty() {
                primary = self.channels[PRIMARY_CHANNEL].control.fb_size().unwrap_or_default();
            }
            let rect = primary_rect.unwrap_or(Rect::from_size(primary));
            external.mirror_position(primary, rect, self.device_orientation)
        } else {
            let content = if self.src_orientation.is_rotated_90() { self.cropped.swapped() } else { self.cropped };
            external.aspect_ratio_position(content.width, content.height)
        }
    }

    fn set_channel_position(&mut self, channel: usize, rect: Rect) -> Result<()> {
        self.channels[channel].control.set_position(rect.x as i32, rect.y as i32, rect.w, rect.h)
    }

    fn current_state(&self) -> Result<OverlayState> {
        self.state.ok_or_else(|| Error::InvalidState("no overlay channel is up".into()))
    }

    /// Close every channel and leave the stereo modes entered for them
    pub fn close_channel(&mut self) -> bool {
        match self.state {
            Some(OverlayState::Video3d3dTv) => {
                if let Err(e) = self.ctx.devices().send_3d_info_packet(StereoOutput::None) {
                    warn!("clearing the 3D info packet failed: {}", e);
                }
            }
            Some(OverlayState::Video3d3dPanel) => {
                if let Err(e) = self.ctx.devices().enable_barrier(Barrier::Off) {
                    warn!("disabling the parallax barrier failed: {}", e);
                }
            }
            _ => {}
        }
        for channel in self.channels.iter_mut() {
            channel.close();
        }
        if self.state.is_some() {
            debug!("overlay {:?} closed", self.state);
            self.publish(true);
        }
        self.state = None;
        self.format_3d = Format3d::NONE;
        self.buffer = BufferInfo::default();
        self.src_orientation = Transform::IDENTITY;
        true
    }

    /// Close the secondary display's channel only
    ///
    /// The next `set_source` sees the secondary display as changed and
    /// re-evaluates the state.
    pub fn close_external_channel(&mut self) {
        let channel = &mut self.channels[EXTERNAL_CHANNEL];
        if channel.is_open() {
            channel.close();
            self.external = ExternalLink::Invalidated;
            info!("external channel closed");
        }
    }

    /// Set the source crop on the channels of the current state
    pub fn set_crop(&mut self, x: u32, y: u32, w: u32, h: u32) -> bool {
        self.try_set_crop(Rect::new(x, y, w, h))
            .inspect_err(|e| error!("set_crop ({}, {}) {}x{} failed: {}", x, y, w, h, e))
            .is_ok()
    }

    fn try_set_crop(&mut self, crop: Rect) -> Result<()> {
        let state = self.current_state()?;
        self.cropped = crop.size();
        let input = self.format_3d.input;
        match state.route().crop {
            CropRoute::Single => self.channels[PRIMARY_CHANNEL].control.set_crop(crop),
            CropRoute::MonoLeft => self.channels[PRIMARY_CHANNEL].control.set_crop(stereo_crop(crop, 0, input)),
            CropRoute::Both => self.for_each_open(|_, control| control.set_crop(crop)),
            CropRoute::LeftOnBoth => {
                let left = stereo_crop(crop, 0, input);
                self.for_each_open(|_, control| control.set_crop(left))
            }
            CropRoute::PerEye => self.for_each_open(|i, control| control.set_crop(stereo_crop(crop, i, input))),
        }
    }

    fn for_each_open(&mut self, mut f: impl FnMut(usize, &mut ControlChannel) -> Result<()>) -> Result<()> {
        for (i, channel) in self.channels.iter_mut().enumerate() {
            if channel.is_open() {
                f(i, &mut channel.control).inspect_err(|e| warn!("channel {} failed: {}", i, e))?;
            }
        }
        Ok(())
    }

    /// Set the destination on the channels of the current state
    pub fn set_position(&mut self, x: i32, y: i32, w: u32, h: u32) -> bool {
        self.try_set_position(x, y, w, h)
            .inspect_err(|e| error!("set_position ({}, {}) {}x{} failed: {}", x, y, w, h, e))
            .is_ok()
    }

    fn try_set_position(&mut self, x: i32, y: i32, w: u32, h: u32) -> Result<()> {
        let state = self.current_state()?;
        let requested = (x >= 0 && y >= 0).then(|| Rect::new(x as u32, y as u32, w, h));
        if requested.is_some() && self.channels[PRIMARY_CHANNEL].control.position() == requested {
            return Ok(());
        }
        match state.route().position {
            PositionRoute::Single => self.channels[PRIMARY_CHANNEL].control.set_position(x, y, w, h),
            PositionRoute::Mirror => {
                if self.channels[EXTERNAL_CHANNEL].is_open() {
                    let rect = self.external_placement(requested)?;
                    if let Err(e) = self.set_channel_position(EXTERNAL_CHANNEL, rect) {
                        warn!("external position {:?} failed: {}", rect, e);
                    }
                }
                self.channels[PRIMARY_CHANNEL].control.set_position(x, y, w, h)
            }
            PositionRoute::StereoPanel => self.for_each_open(|i, control| {
                control.use_virtual_framebuffer()?;
                let rect = control
                    .stereo_position(i, StereoOutput::SideBySide)?
                    .ok_or_else(|| Error::InvalidState("no side-by-side placement".into()))?;
                control.set_position(rect.x as i32, rect.y as i32, rect.w, rect.h)
            }),
            PositionRoute::StereoTv => {
                let output = self.format_3d.output;
                self.for_each_open(|i, control| match control.stereo_position(i, output)? {
                    Some(rect) => control.set_position(rect.x as i32, rect.y as i32, rect.w, rect.h),
                    None => control.set_position(x, y, w, h),
                })
            }
        }
    }

    /// Clip a layer that may hang off the panel and apply its crop and destination
    pub fn set_layer_geometry(&mut self, crop: Rect, frame: Bounds) -> bool {
        let control = &self.channels[PRIMARY_CHANNEL].control;
        let (Some(display), Some(transform)) = (control.fb_size(), control.orientation()) else {
            error!("set_layer_geometry without an open channel");
            return false;
        };
        let Some((crop, dst)) = geometry::clip_to_display(crop, frame, display, transform) else {
            debug!("layer {:?} is off screen", frame);
            return false;
        };
        self.set_crop(crop.x, crop.y, crop.w, crop.h) && self.set_position(dst.x as i32, dst.y as i32, dst.w, dst.h)
    }

    /// Apply a transform word
    ///
    /// The low nibble is the final transform of the content. The next nibble
    /// is the orientation of the source, which drives the secondary display.
    pub fn set_transform(&mut self, value: u32) -> bool {
        self.try_set_transform(value).inspect_err(|e| error!("set_transform {:#x} failed: {}", value, e)).is_ok()
    }

    fn try_set_transform(&mut self, value: u32) -> Result<()> {
        let invalid = || Error::InvalidArgument(format!("transform {:#x}", value));
        let transform = Transform::from_hal(value & FINAL_TRANSFORM_MASK).ok_or_else(invalid)?;
        let source = Transform::from_hal((value >> SOURCE_TRANSFORM_SHIFT) & FINAL_TRANSFORM_MASK).ok_or_else(invalid)?;
        self.src_orientation = source;
        let state = self.current_state()?;
        match state.route().transform {
            TransformRoute::Single => self.channels[PRIMARY_CHANNEL].control.set_transform(transform),
            TransformRoute::SourceOnExternal => {
                self.for_each_open(|i, control| control.set_transform(if i == 0 { transform } else { source }))
            }
            TransformRoute::All => self.for_each_open(|_, control| control.set_transform(transform)),
            TransformRoute::Barrier => {
                let barrier = barrier_for(transform);
                if let Err(e) = self.ctx.devices().enable_barrier(barrier) {
                    warn!("parallax barrier {:?} failed: {}", barrier, e);
                }
                self.for_each_open(|_, control| control.set_transform(transform))
            }
        }
    }

    /// Queue one frame on the channels of the current state
    ///
    /// Multi-channel states wait for the external channel to show the frame.
    pub fn queue_buffer(&mut self, buffer: BufferHandle) -> bool {
        self.try_queue_buffer(buffer)
            .inspect_err(|e| error!("queue_buffer {:?}+{:#x} failed: {}", buffer.memory, buffer.offset, e))
            .is_ok()
    }

    fn try_queue_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        let state = self.current_state()?;
        if !state.route().paced {
            return self.channels[PRIMARY_CHANNEL].data.queue(buffer);
        }
        for (i, channel) in self.channels.iter_mut().enumerate().rev() {
            if channel.is_open() {
                channel.data.queue(buffer).inspect_err(|e| warn!("queue on channel {} failed: {}", i, e))?;
            }
        }
        let external = &mut self.channels[EXTERNAL_CHANNEL];
        if external.is_open() {
            external.data.wait_for_vsync()?;
        }
        trace!("frame {:?}+{:#x} queued in {:?}", buffer.memory, buffer.offset, state);
        Ok(())
    }

    /// Block until the last frame queued on `channel` is on screen
    pub fn wait_for_vsync(&mut self, channel: usize) -> bool {
        let Some(c) = self.channels.get_mut(channel) else {
            return false;
        };
        c.data.wait_for_vsync().inspect_err(|e| error!("vsync wait on channel {} failed: {}", channel, e)).is_ok()
    }

    /// Adjust a post-processing parameter on the channels showing the video
    pub fn set_visual_param(&mut self, param: VisualParam, value: f32) -> bool {
        let result = match self.state.map(|s| s.route().channels) {
            Some(1) => self.channels[PRIMARY_CHANNEL].control.set_visual_param(param, value),
            Some(_) => self.for_each_open(|_, control| control.set_visual_param(param, value)),
            None => Err(Error::InvalidState("no overlay channel is up".into())),
        };
        result.inspect_err(|e| error!("set_visual_param {:?} {} failed: {}", param, value, e)).is_ok()
    }

    /// Mirror the UI from `info` onto `display` on a single rotating channel
    pub fn start_ui_mirror(
        &mut self,
        info: &BufferInfo,
        display: DisplayId,
        flags: OverlayFlags,
        buffers: usize,
    ) -> bool {
        self.close_channel();
        let params = ChannelParams {
            buffer: *info,
            display,
            rotation_disabled: false,
            ui: true,
            stereo: Format3d::NONE,
            flags,
        };
        if let Err(e) = self.channels[PRIMARY_CHANNEL].start(&params, buffers) {
            error!("UI mirror of {}x{} on {:?} failed: {}", info.width, info.height, display, e);
            return false;
        }
        self.state = Some(OverlayState::UiMirror);
        self.external = ExternalLink::Display(display);
        self.buffer = *info;
        self.cropped = Size::new(info.width, info.height);
        self.publish(false);
        true
    }

    /// Orientation of the device, used to mirror the panel
    pub fn set_device_orientation(&mut self, orientation: Transform) {
        self.device_orientation = orientation;
    }

    pub fn position(&self, channel: usize) -> Option<Rect> {
        self.channels.get(channel).and_then(|c| c.control.position())
    }

    pub fn orientation(&self, channel: usize) -> Option<Transform> {
        self.channels.get(channel).and_then(|c| c.control.orientation())
    }

    pub fn aspect_ratio_position(&self, w: u32, h: u32, channel: usize) -> Option<Rect> {
        self.channels.get(channel).and_then(|c| c.control.aspect_ratio_position(w, h).ok())
    }

    pub fn fb_size(&self, channel: usize) -> Option<Size> {
        self.channels.get(channel).and_then(|c| c.control.fb_size())
    }

    pub fn state(&self) -> Option<OverlayState> {
        self.state
    }

    pub fn external(&self) -> ExternalLink {
        self.external
    }

    pub fn is_channel_open(&self, channel: usize) -> bool {
        self.channels.get(channel).is_some_and(Channel::is_open)
    }

    /// Number of open channels
    pub fn active_channels(&self) -> usize {
        self.channels.iter().filter(|c| c.is_open()).count()
    }

    pub fn control(&self, channel: usize) -> Option<&ControlChannel> {
        self.channels.get(channel).map(|c| &c.control)
    }

    pub fn data(&self, channel: usize) -> Option<&DataChannel> {
        self.channels.get(channel).map(|c| &c.data)
    }
}

impl Drop for Overlay {
    fn drop(&mut self) {
        self.close_channel();
    }
}
