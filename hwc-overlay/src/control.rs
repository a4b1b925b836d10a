//! Control channel
//!
//! A control channel owns the configuration of one overlay pipe and of the
//! rotator session feeding it. Every geometry mutation is staged on a copy of
//! the configuration, pushed to the device, and committed only once the device
//! accepts it, so a rejected request leaves the channel exactly as it was.
//!
//! The stored crop is always the full-resolution crop in the pipe's frame.
//! The rotator downscale factor is kept next to it and only applied when a
//! device request is built, which makes resetting and reapplying the shift
//! part of every single mutation.

use std::sync::Arc;

use hwc_api::geometry::{self, DownscaleFactor};
use hwc_api::{
    BufferInfo, DisplayId, Error, Format3d, HardwareFormat, HsicConfig, OverlayFlags, OverlayId, OverlayRequest,
    PipeFlags, PipeIndex, Rect, Result, RotatorRequest, RotatorSessionId, Size, SourceFormat, SourceImage,
    StereoOutput, Transform,
};
use log::{debug, error, info, trace, warn};

use crate::context::HalContext;
use crate::pipe::PipeLease;
use crate::session::{OverlaySession, RotatorSession};

const HUE_RANGE: f32 = 180.0;
const BRIGHTNESS_RANGE: f32 = 255.0;
const CONTRAST_SATURATION_RANGE: f32 = 1.0;
const SHARPNESS_RANGE: f32 = 1.0;

/// Arguments of [`ControlChannel::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelParams {
    pub buffer: BufferInfo,
    pub display: DisplayId,
    pub rotation_disabled: bool,
    /// The channel mirrors the framebuffer rather than carrying video
    pub ui: bool,
    pub stereo: Format3d,
    pub flags: OverlayFlags,
}

/// Post-processing parameter of a pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualParam {
    None,
    Hue,
    Brightness,
    Saturation,
    Contrast,
    Sharpness,
    ResetAll,
}

#[derive(Debug, Clone, PartialEq)]
struct Geometry {
    overlay: OverlayRequest,
    rotator: RotatorRequest,
    transform: Transform,
    downscale: DownscaleFactor,
}

impl Geometry {
    fn new(
        size: Size,
        format: HardwareFormat,
        fb: Size,
        z_order: PipeIndex,
        flags: OverlayFlags,
        rotator: bool,
    ) -> Self {
        let layout = geometry::source_layout(size, format, rotator);
        let source = SourceImage::new(layout.buffer, format);
        Self {
            overlay: OverlayRequest {
                id: None,
                src: source,
                src_rect: layout.crop,
                dst_rect: geometry::initial_destination(size, fb),
                z_order,
                is_fg: flags.contains(OverlayFlags::DISABLE_FRAMEBUFFER_FETCH),
                alpha: 0xff,
                transp_mask: 0xffff_ffff,
                flags: PipeFlags::from_overlay_flags(flags),
                rotation: 0,
            },
            rotator: RotatorRequest {
                session: None,
                src: source,
                src_rect: Rect::from_size(layout.buffer),
                dst: layout.buffer,
                dst_format: format.rotator_output(),
                rotation: 0,
                enable: false,
                downscale: DownscaleFactor::None,
                secure: flags.contains(OverlayFlags::SECURE_OVERLAY_SESSION),
            },
            transform: Transform::IDENTITY,
            downscale: DownscaleFactor::None,
        }
    }

    /// Decide whether the rotator runs and how much it decimates
    fn select_downscale(&mut self, ui: bool) {
        self.downscale = if ui {
            DownscaleFactor::None
        } else {
            DownscaleFactor::select(self.overlay.src_rect.size(), self.overlay.dst_rect.size())
        };
        self.rotator.downscale = self.downscale;
        self.rotator.enable = self.transform != Transform::IDENTITY || ui || self.downscale != DownscaleFactor::None;
        self.sync_source_format();
    }

    fn sync_source_format(&mut self) {
        self.overlay.src.format = if self.rotator.enable { self.rotator.dst_format } else { self.rotator.src.format };
    }

    fn overlay_request(&self) -> OverlayRequest {
        let mut req = self.overlay;
        if self.downscale != DownscaleFactor::None {
            req.src_rect = geometry::normalize_crop(req.src_rect.scaled_down(self.downscale.shift()));
        }
        req.rotation = self.transform.hw_rotation();
        req.flags.set(PipeFlags::SOURCE_ROTATED_90, self.transform.is_rotated_90());
        req
    }

    fn rotator_request(&self) -> RotatorRequest {
        let mut req = self.rotator;
        if self.downscale == DownscaleFactor::Eighth {
            req.src_rect.h &= !0xF;
        }
        req
    }
}

struct OpenChannel {
    session: OverlaySession,
    rotator: Option<RotatorSession>,
    lease: PipeLease,
    fb: Size,
    stereo: Format3d,
    ui: bool,
    geometry: Geometry,
    size: u32,
    updated: bool,
    hsic: HsicConfig,
}

impl OpenChannel {
    /// Push a staged configuration to the devices and commit it
    fn apply(&mut self, next: Geometry) -> Result<()> {
        if let Some(rotator) = self.rotator.as_mut() {
            let req = next.rotator_request();
            if rotator.id().is_none() || req != self.geometry.rotator_request() {
                rotator.start(&req).inspect_err(|e| error!("rotator start failed: {} ({:?})", e, req))?;
            }
        }
        let req = next.overlay_request();
        self.session
            .set(&req)
            .inspect_err(|e| error!("overlay set on {:?} failed: {} ({:?})", self.session.display(), e, req))?;
        self.geometry = next;
        Ok(())
    }

    fn set_pipe(&mut self) -> Result<OverlayId> {
        let req = self.geometry.overlay_request();
        self.session.set(&req)
    }
}

fn pipe_share(flags: OverlayFlags, stereo: Format3d, ui: bool, true_mirroring: bool) -> OverlayFlags {
    let mut flags = flags;
    if !stereo.is_3d() || stereo.output == StereoOutput::Monoscopic {
        flags |= OverlayFlags::PIPE_SHARE;
    }
    if ui && true_mirroring {
        flags.remove(OverlayFlags::PIPE_SHARE);
    }
    flags
}

/// Owner of one overlay pipe's configuration
pub struct ControlChannel {
    ctx: Arc<HalContext>,
    open: Option<OpenChannel>,
}

impl ControlChannel {
    /// Create a closed channel
    pub fn new(ctx: Arc<HalContext>) -> Self {
        Self { ctx, open: None }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    fn channel(&self) -> Result<&OpenChannel> {
        self.open.as_ref().ok_or_else(|| Error::InvalidState("control channel is closed".into()))
    }

    fn channel_mut(&mut self) -> Result<&mut OpenChannel> {
        self.open.as_mut().ok_or_else(|| Error::InvalidState("control channel is closed".into()))
    }

    /// Open the devices, take a pipe and configure it for `params.buffer`
    ///
    /// Any failure leaves the channel closed with every resource released.
    pub fn start(&mut self, params: &ChannelParams) -> Result<()> {
        if self.open.is_some() {
            return Err(Error::InvalidState("control channel is already open".into()));
        }
        let format = SourceFormat::decode(params.buffer.format)
            .inspect_err(|_| error!("unsupported format {:#x}", params.buffer.format))?;
        let mut flags = params.flags;
        if format.interlaced {
            flags |= OverlayFlags::INTERLACED_CONTENT;
        }
        flags = pipe_share(flags, params.stereo, params.ui, self.ctx.config().true_mirroring);

        let devices = self.ctx.devices();
        let session = OverlaySession::open(devices, params.display)?;
        let fb = session.screen_info()?.size();
        let rotator = if params.rotation_disabled { None } else { Some(RotatorSession::open(devices)?) };
        let lease = self.ctx.pipes().lease(params.display).inspect_err(|e| warn!("{}", e))?;

        let size = Size::new(params.buffer.width, params.buffer.height);
        let mut geometry = Geometry::new(size, format.hardware(), fb, lease.index(), flags, rotator.is_some());
        geometry.rotator.enable = params.ui && rotator.is_some();
        geometry.sync_source_format();

        let mut channel = OpenChannel {
            session,
            rotator,
            lease,
            fb,
            stereo: params.stereo,
            ui: params.ui,
            geometry: geometry.clone(),
            size: params.buffer.size,
            updated: true,
            hsic: HsicConfig::default(),
        };
        if let Some(rotator) = channel.rotator.as_mut() {
            rotator
                .start(&geometry.rotator_request())
                .inspect_err(|e| error!("rotator start for {}x{} failed: {}", size.width, size.height, e))?;
        }
        channel
            .set_pipe()
            .inspect_err(|e| error!("overlay set for {}x{} failed: {}", size.width, size.height, e))?;

        info!(
            "control channel up on {:?}: pipe {}, {}x{} {:?}, rotator {}",
            params.display,
            channel.lease.index().0,
            size.width,
            size.height,
            format.color,
            if channel.rotator.is_some() { "on" } else { "off" }
        );
        self.open = Some(channel);
        Ok(())
    }

    /// Release the pipe, the rotator session and the devices
    pub fn close(&mut self) {
        if let Some(channel) = self.open.take() {
            debug!("control channel on {:?} closed", channel.session.display());
        }
    }

    /// Reconfigure the open pipe for a new source buffer
    ///
    /// Position, crop and transform return to their initial values. A device
    /// rejection closes the channel.
    pub fn update_source(&mut self, buffer: &BufferInfo, flags: OverlayFlags) -> Result<()> {
        let true_mirroring = self.ctx.config().true_mirroring;
        let channel = self.channel_mut()?;
        let format = SourceFormat::decode(buffer.format)?;
        let mut flags = flags;
        if format.interlaced {
            flags |= OverlayFlags::INTERLACED_CONTENT;
        }
        flags = pipe_share(flags, channel.stereo, channel.ui, true_mirroring);

        let size = Size::new(buffer.width, buffer.height);
        let z_order = channel.lease.index();
        let mut next = Geometry::new(size, format.hardware(), channel.fb, z_order, flags, channel.rotator.is_some());
        next.rotator.enable = channel.rotator.is_some();
        next.sync_source_format();

        if let Err(e) = channel.apply(next) {
            self.close();
            return Err(e);
        }
        channel.updated = true;
        channel.size = buffer.size;
        Ok(())
    }

    /// Whether `flags` differ from the pipe in vsync wait or foreground fetch
    pub fn flags_need_update(&self, flags: OverlayFlags) -> bool {
        let Some(channel) = self.open.as_ref() else {
            return false;
        };
        let overlay = &channel.geometry.overlay;
        let nowait = !flags.contains(OverlayFlags::WAIT_FOR_VSYNC);
        let fg = flags.contains(OverlayFlags::DISABLE_FRAMEBUFFER_FETCH);
        overlay.flags.contains(PipeFlags::PLAY_NOWAIT) != nowait || overlay.is_fg != fg
    }

    /// Update vsync wait, foreground fetch and blending in place
    pub fn update_flags(&mut self, flags: OverlayFlags) -> Result<()> {
        let channel = self.channel_mut()?;
        let mut next = channel.geometry.clone();
        let overlay = &mut next.overlay;
        overlay.flags.set(PipeFlags::PLAY_NOWAIT, !flags.contains(OverlayFlags::WAIT_FOR_VSYNC));
        overlay.flags.set(PipeFlags::BLEND_FG_PREMULT, flags.contains(OverlayFlags::BLENDING_PREMULT));
        overlay.is_fg = flags.contains(OverlayFlags::DISABLE_FRAMEBUFFER_FETCH);
        channel.apply(next)
    }

    /// Move the pipe's destination
    ///
    /// The rectangle must lie on the display. A destination beyond the
    /// magnification limit is clamped and recentered.
    pub fn set_position(&mut self, x: i32, y: i32, w: u32, h: u32) -> Result<()> {
        let channel = self.channel_mut()?;
        let dst = geometry::check_destination(x, y, w, h, channel.fb).inspect_err(|_| {
            warn!("position ({}, {}) {}x{} outside the {}x{} display", x, y, w, h, channel.fb.width, channel.fb.height)
        })?;
        let current = &channel.geometry;
        if dst == current.overlay.dst_rect {
            return Ok(());
        }
        let dst = geometry::clamp_magnification(dst, current.overlay.src_rect.size(), channel.fb);
        if dst == current.overlay.dst_rect {
            return Ok(());
        }
        let mut next = current.clone();
        next.overlay.dst_rect = dst;
        if channel.rotator.is_some() {
            next.select_downscale(channel.ui);
        }
        trace!("position {:?} on {:?}", dst, channel.session.display());
        channel.apply(next)
    }

    /// Set the source crop, given in the coordinates of the unrotated buffer
    pub fn set_crop(&mut self, crop: Rect) -> Result<()> {
        let channel = self.channel_mut()?;
        let current = &channel.geometry;
        let buffer = current.transform.output_size(current.overlay.src.size());
        let (mapped, _) = current.transform.map_rect(crop, buffer).ok_or_else(|| {
            warn!("crop {:?} outside the {}x{} buffer", crop, buffer.width, buffer.height);
            Error::InvalidGeometry(format!("crop {:?} outside the source", crop))
        })?;
        let crop = geometry::normalize_crop(mapped);
        if crop.is_empty() {
            return Err(Error::InvalidGeometry(format!("crop {:?} is empty after alignment", mapped)));
        }
        if crop == current.overlay.src_rect {
            return Ok(());
        }
        let mut next = current.clone();
        next.overlay.src_rect = crop;
        next.overlay.dst_rect = geometry::cap_magnification(next.overlay.dst_rect, crop.size());
        if channel.rotator.is_some() {
            next.select_downscale(channel.ui);
        }
        trace!("crop {:?} on {:?}", crop, channel.session.display());
        channel.apply(next)
    }

    /// Rotate or flip the source
    ///
    /// The crop is taken back to buffer space through the current transform and
    /// mapped forward through the new one. Channels without a rotator ignore
    /// transforms.
    pub fn set_transform(&mut self, transform: Transform) -> Result<()> {
        let channel = self.channel_mut()?;
        if !channel.updated && transform == channel.geometry.transform {
            return Ok(());
        }
        channel.updated = false;
        if channel.rotator.is_none() {
            debug!("transform {:?} ignored without a rotator", transform);
            return Ok(());
        }

        let current = &channel.geometry;
        let pipe_frame = current.overlay.src.size();
        let (crop, frame) = current
            .transform
            .unmap_rect(current.overlay.src_rect, pipe_frame)
            .and_then(|(crop, buffer)| transform.map_rect(crop, buffer))
            .ok_or_else(|| Error::InvalidGeometry(format!("crop {:?} outside the source", current.overlay.src_rect)))?;

        let mut next = current.clone();
        next.transform = transform;
        next.overlay.src.width = frame.width;
        next.overlay.src.height = frame.height;
        next.overlay.src_rect = crop;
        next.rotator.dst = frame;
        next.rotator.rotation = transform.hw_rotation();
        next.select_downscale(channel.ui);
        debug!("transform {:?} on {:?}, crop {:?}", transform, channel.session.display(), crop);
        channel.apply(next)
    }

    /// Adjust a post-processing parameter of the pipe
    pub fn set_visual_param(&mut self, param: VisualParam, value: f32) -> Result<()> {
        let channel = self.channel_mut()?;
        let id = channel.session.id().ok_or_else(|| Error::InvalidState("overlay pipe not configured".into()))?;
        let mut hsic = channel.hsic;
        match param {
            VisualParam::None => return Ok(()),
            VisualParam::Hue => hsic.hue = value.clamp(-HUE_RANGE, HUE_RANGE) as i32,
            VisualParam::Brightness => hsic.intensity = value.clamp(-BRIGHTNESS_RANGE, BRIGHTNESS_RANGE) as i32,
            VisualParam::Saturation => {
                hsic.saturation = value.clamp(-CONTRAST_SATURATION_RANGE, CONTRAST_SATURATION_RANGE)
            }
            VisualParam::Contrast => hsic.contrast = value.clamp(-CONTRAST_SATURATION_RANGE, CONTRAST_SATURATION_RANGE),
            VisualParam::Sharpness => {
                trace!("sharpness {}", value.clamp(-SHARPNESS_RANGE, SHARPNESS_RANGE));
                channel.session.get()?;
                return Ok(());
            }
            VisualParam::ResetAll => {
                let mut next = channel.geometry.clone();
                next.overlay.flags |= PipeFlags::SHARPENING;
                return channel.apply(next);
            }
        }
        channel.session.device_mut().set_hsic(id, &hsic)?;
        channel.hsic = hsic;
        Ok(())
    }

    /// Switch a stereo panel into its double-width, half-height virtual framebuffer
    pub fn use_virtual_framebuffer(&mut self) -> Result<()> {
        let channel = self.channel_mut()?;
        if channel.session.is_virtual_3d() {
            return Ok(());
        }
        let fb = Size::new(channel.fb.width * 2, channel.fb.height / 2);
        channel.session.enable_virtual_3d(fb)?;
        channel.fb = fb;
        Ok(())
    }

    /// Aspect-preserving destination for a `w`x`h` source on this display
    pub fn aspect_ratio_position(&self, w: u32, h: u32) -> Result<Rect> {
        let channel = self.channel()?;
        let content = Size::new(w, h);
        let reference = geometry::tile_corrected(content, channel.geometry.rotator.src.format);
        Ok(geometry::aspect_ratio_position(content, reference, channel.fb, self.ctx.config().action_safe()))
    }

    /// Destination mirroring `rect` of a `primary` sized panel held in `orientation`
    pub fn mirror_position(&self, primary: Size, rect: Rect, orientation: Transform) -> Result<Rect> {
        let channel = self.channel()?;
        Ok(geometry::mirror_position(primary, rect, orientation, channel.fb, self.ctx.config().action_safe()))
    }

    /// Destination of one stereo view on this display
    pub fn stereo_position(&self, channel_index: usize, output: StereoOutput) -> Result<Option<Rect>> {
        Ok(geometry::stereo_position(channel_index, output, self.channel()?.fb))
    }

    pub fn position(&self) -> Option<Rect> {
        self.open.as_ref().map(|c| c.geometry.overlay.dst_rect)
    }

    /// Crop in the pipe's frame, without any rotator decimation
    pub fn crop(&self) -> Option<Rect> {
        self.open.as_ref().map(|c| c.geometry.overlay.src_rect)
    }

    pub fn orientation(&self) -> Option<Transform> {
        self.open.as_ref().map(|c| c.geometry.transform)
    }

    pub fn downscale(&self) -> Option<DownscaleFactor> {
        self.open.as_ref().map(|c| c.geometry.downscale)
    }

    pub fn rotator_enabled(&self) -> bool {
        self.open.as_ref().is_some_and(|c| c.rotator.is_some() && c.geometry.rotator.enable)
    }

    pub fn has_rotator(&self) -> bool {
        self.open.as_ref().is_some_and(|c| c.rotator.is_some())
    }

    pub fn is_ui(&self) -> bool {
        self.open.as_ref().is_some_and(|c| c.ui)
    }

    pub fn display(&self) -> Option<DisplayId> {
        self.open.as_ref().map(|c| c.session.display())
    }

    pub fn fb_size(&self) -> Option<Size> {
        self.open.as_ref().map(|c| c.fb)
    }

    pub fn z_order(&self) -> Option<PipeIndex> {
        self.open.as_ref().map(|c| c.lease.index())
    }

    pub fn overlay_id(&self) -> Option<OverlayId> {
        self.open.as_ref().and_then(|c| c.session.id())
    }

    pub fn rotator_session(&self) -> Option<RotatorSessionId> {
        self.open.as_ref().and_then(|c| c.rotator.as_ref()).and_then(|r| r.id())
    }

    pub fn is_secure(&self) -> bool {
        self.open.as_ref().is_some_and(|c| c.geometry.rotator.secure)
    }

    /// Bytes per source buffer, sizing the rotator ring
    pub fn size(&self) -> Option<u32> {
        self.open.as_ref().map(|c| c.size)
    }

    pub fn hsic(&self) -> Option<HsicConfig> {
        self.open.as_ref().map(|c| c.hsic)
    }
}
