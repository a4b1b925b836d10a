//! Control channel tests against the simulated and mocked devices

use std::sync::Arc;

use hwc_api::geometry::{self, DownscaleFactor};
use hwc_api::{
    Barrier, BufferInfo, DeviceProvider, DisplayDevice, DisplayId, Error, Format3d, HsicConfig, MemoryId, MixerPipe,
    OverlayFlags, OverlayId, OverlayRequest, PipeFlags, PixelFormat, PlayRequest, Rect, Result, RotatorDevice,
    ScreenInfo, Size, Stereo3dRequest, StereoOutput, Transform,
};
use hwc_overlay::sim::{self, Faults, SimOp, SimProvider};
use hwc_overlay::{ChannelParams, ControlChannel, HalConfig, HalContext, PipeConfig, VisualParam};
use mockall::mock;
use proptest::prelude::*;

fn context(sim: &SimProvider) -> Arc<HalContext> {
    Arc::new(HalContext::new(HalConfig::default(), Arc::new(sim.clone()), Arc::new(sim.allocator())))
}

fn params(width: u32, height: u32, format: PixelFormat, rotation_disabled: bool) -> ChannelParams {
    ChannelParams {
        buffer: BufferInfo::new(width, height, format.code(), width * height * 4),
        display: DisplayId::Primary,
        rotation_disabled,
        ui: false,
        stereo: Format3d::NONE,
        flags: OverlayFlags::empty(),
    }
}

fn set_overlay_count(sim: &SimProvider) -> usize {
    sim.ops().iter().filter(|op| matches!(op, SimOp::SetOverlay { .. })).count()
}

#[test]
fn test_start_and_close_release_everything() {
    // Test that a started channel holds a pipe and a rotator session until closed
    let sim = SimProvider::new();
    let ctx = context(&sim);
    let mut control = ControlChannel::new(Arc::clone(&ctx));

    control.start(&params(1280, 720, PixelFormat::YCbCr420Sp, false)).unwrap();
    assert!(control.is_open());
    assert_eq!(ctx.pipes().total_in_use(), 1);
    assert_eq!(sim.rotator_sessions(), 1);
    assert_eq!(sim.overlays(DisplayId::Primary).len(), 1);
    assert_eq!(control.position(), Some(Rect::new(0, 0, 1280, 720)));

    control.close();
    assert!(!control.is_open());
    assert_eq!(ctx.pipes().total_in_use(), 0);
    assert_eq!(sim.rotator_sessions(), 0);
    assert!(sim.overlays(DisplayId::Primary).is_empty());
}

#[test]
fn test_start_twice_is_rejected() {
    // Test that an open channel refuses a second start
    let sim = SimProvider::new();
    let mut control = ControlChannel::new(context(&sim));
    control.start(&params(640, 480, PixelFormat::Rgba8888, true)).unwrap();
    let err = control.start(&params(640, 480, PixelFormat::Rgba8888, true)).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert!(control.is_open());
}

#[test]
fn test_unsupported_format() {
    // Test that an unknown color code fails before any device is touched
    let sim = SimProvider::new();
    let ctx = context(&sim);
    let mut control = ControlChannel::new(Arc::clone(&ctx));
    let mut p = params(640, 480, PixelFormat::Rgba8888, true);
    p.buffer.format = 0x7ff;
    assert!(matches!(control.start(&p), Err(Error::UnsupportedFormat(0x7ff))));
    assert!(sim.ops().is_empty());
    assert_eq!(ctx.pipes().total_in_use(), 0);
}

#[test]
fn test_pipe_bank_exhausted() {
    // Test that a full bank fails the start and releases the devices
    let sim = SimProvider::new();
    let config = HalConfig { pipes: PipeConfig { primary: 1, external: 1, max_total: 2 }, ..HalConfig::default() };
    let ctx = Arc::new(HalContext::new(config, Arc::new(sim.clone()), Arc::new(sim.allocator())));
    let mut first = ControlChannel::new(Arc::clone(&ctx));
    let mut second = ControlChannel::new(Arc::clone(&ctx));

    first.start(&params(640, 480, PixelFormat::Rgba8888, false)).unwrap();
    assert!(matches!(second.start(&params(640, 480, PixelFormat::Rgba8888, false)), Err(Error::ResourceExhausted(_))));
    assert!(!second.is_open());
    assert_eq!(ctx.pipes().total_in_use(), 1);
    assert_eq!(sim.rotator_sessions(), 1);
}

#[test]
fn test_set_failure_rolls_back_start() {
    // Test that a rejected overlay set leaves no pipe, session or overlay behind
    let sim = SimProvider::new();
    sim.inject(Faults::SET_OVERLAY);
    let ctx = context(&sim);
    let mut control = ControlChannel::new(Arc::clone(&ctx));

    let err = control.start(&params(1280, 720, PixelFormat::YCbCr420Sp, false)).unwrap_err();
    assert!(matches!(err, Error::DeviceRejected(_)));
    assert!(!control.is_open());
    assert_eq!(ctx.pipes().total_in_use(), 0);
    assert_eq!(sim.rotator_sessions(), 0);
    assert!(sim.overlays(DisplayId::Primary).is_empty());
}

#[test]
fn test_rotator_failure_rolls_back_start() {
    // Test that a rejected rotator start never configures a pipe
    let sim = SimProvider::new();
    sim.inject(Faults::ROTATOR_START);
    let ctx = context(&sim);
    let mut control = ControlChannel::new(Arc::clone(&ctx));

    assert!(control.start(&params(1280, 720, PixelFormat::YCbCr420Sp, false)).is_err());
    assert_eq!(set_overlay_count(&sim), 0);
    assert_eq!(ctx.pipes().total_in_use(), 0);
}

#[test]
fn test_magnified_position_is_clamped_and_centered() {
    // Test the magnification limit on a display large enough to exceed it
    let sim = SimProvider::new().with_screen(DisplayId::Primary, sim::screen(20000, 20000));
    let mut control = ControlChannel::new(context(&sim));
    control.start(&params(1920, 1080, PixelFormat::Rgba8888, false)).unwrap();

    control.set_position(0, 0, 3840, 2160).unwrap();
    assert_eq!(control.position(), Some(Rect::new(0, 0, 3840, 2160)));

    control.set_position(0, 0, 20000, 20000).unwrap();
    assert_eq!(control.position(), Some(Rect::new(2320, 5680, 15360, 8640)));
}

#[test]
fn test_invalid_position_keeps_configuration() {
    // Test that destinations off the display are refused without a device call
    let sim = SimProvider::new();
    let mut control = ControlChannel::new(context(&sim));
    control.start(&params(640, 480, PixelFormat::Rgba8888, true)).unwrap();
    sim.take_ops();

    assert!(matches!(control.set_position(-1, 0, 100, 100), Err(Error::InvalidGeometry(_))));
    assert!(matches!(control.set_position(1900, 0, 100, 100), Err(Error::InvalidGeometry(_))));
    assert_eq!(control.position(), Some(Rect::new(0, 0, 640, 480)));
    assert!(sim.ops().is_empty());
}

#[test]
fn test_rejected_position_keeps_committed_state() {
    // Test that a device rejection leaves the committed destination in place
    let sim = SimProvider::new();
    let mut control = ControlChannel::new(context(&sim));
    control.start(&params(640, 480, PixelFormat::Rgba8888, true)).unwrap();
    let id = control.overlay_id().unwrap();

    sim.inject(Faults::SET_OVERLAY);
    assert!(control.set_position(100, 100, 320, 240).is_err());
    assert!(control.is_open());
    assert_eq!(control.position(), Some(Rect::new(0, 0, 640, 480)));
    assert_eq!(sim.overlay(id).unwrap().dst_rect, Rect::new(0, 0, 640, 480));

    sim.clear_faults();
    control.set_position(100, 100, 320, 240).unwrap();
    assert_eq!(sim.overlay(id).unwrap().dst_rect, Rect::new(100, 100, 320, 240));
}

#[test]
fn test_downscale_follows_destination() {
    // Test that the device crop is decimated from the full crop every time
    let sim = SimProvider::new();
    let mut control = ControlChannel::new(context(&sim));
    control.start(&params(1920, 1080, PixelFormat::YCbCr420Sp, false)).unwrap();
    let id = control.overlay_id().unwrap();

    control.set_position(0, 0, 480, 270).unwrap();
    assert_eq!(control.downscale(), Some(DownscaleFactor::Quarter));
    assert!(control.rotator_enabled());
    assert_eq!(control.crop(), Some(Rect::new(0, 0, 1920, 1080)));
    assert_eq!(sim.overlay(id).unwrap().src_rect, Rect::new(0, 0, 480, 270));

    control.set_position(0, 0, 960, 540).unwrap();
    assert_eq!(control.downscale(), Some(DownscaleFactor::Half));
    assert_eq!(sim.overlay(id).unwrap().src_rect, Rect::new(0, 0, 960, 540));

    control.set_position(0, 0, 1920, 1080).unwrap();
    assert_eq!(control.downscale(), Some(DownscaleFactor::None));
    assert!(!control.rotator_enabled());
    assert_eq!(sim.overlay(id).unwrap().src_rect, Rect::new(0, 0, 1920, 1080));
}

#[test]
fn test_tiled_source_layout() {
    // Test the tile padding as crop offset with a rotator and as a shorter crop without
    let sim = SimProvider::new();
    let ctx = context(&sim);
    let mut rotated = ControlChannel::new(Arc::clone(&ctx));
    rotated.start(&params(1280, 720, PixelFormat::YCbCr420SpTiled, false)).unwrap();
    assert_eq!(rotated.crop(), Some(Rect::new(0, 16, 1280, 720)));
    let req = sim.overlay(rotated.overlay_id().unwrap()).unwrap();
    assert_eq!(req.src.size(), Size::new(1280, 736));

    let mut direct = ControlChannel::new(ctx);
    direct.start(&params(1280, 720, PixelFormat::YCbCr420SpTiled, true)).unwrap();
    assert_eq!(direct.crop(), Some(Rect::new(0, 0, 1280, 704)));
}

#[test]
fn test_crop_outside_source() {
    // Test that a crop past the buffer edge is refused
    let sim = SimProvider::new();
    let mut control = ControlChannel::new(context(&sim));
    control.start(&params(640, 480, PixelFormat::Rgba8888, false)).unwrap();
    assert!(matches!(control.set_crop(Rect::new(600, 0, 100, 100)), Err(Error::InvalidGeometry(_))));
    assert!(matches!(control.set_crop(Rect::new(10, 10, 1, 1)), Err(Error::InvalidGeometry(_))));
    assert_eq!(control.crop(), Some(Rect::new(0, 0, 640, 480)));
}

#[test]
fn test_crop_is_normalized() {
    // Test that odd crop edges are evened out before reaching the device
    let sim = SimProvider::new();
    let mut control = ControlChannel::new(context(&sim));
    control.start(&params(640, 480, PixelFormat::Rgba8888, false)).unwrap();
    control.set_crop(Rect::new(11, 21, 301, 201)).unwrap();
    let crop = control.crop().unwrap();
    assert_eq!(crop, geometry::normalize_crop(Rect::new(11, 21, 301, 201)));
    assert_eq!(crop.x % 2, 0);
    assert_eq!(crop.w % 2, 0);
}

#[test]
fn test_transform_round_trip_restores_crop() {
    // Test that any transform followed by the identity gives back the crop
    let transforms = [
        Transform::ROT_90,
        Transform::ROT_180,
        Transform::ROT_270,
        Transform::FLIP_H,
        Transform::FLIP_V,
        Transform::ROT_90 | Transform::FLIP_H,
        Transform::ROT_90 | Transform::FLIP_V,
    ];
    for transform in transforms {
        let sim = SimProvider::new();
        let mut control = ControlChannel::new(context(&sim));
        control.start(&params(640, 480, PixelFormat::YCbCr420Sp, false)).unwrap();
        control.set_crop(Rect::new(10, 20, 300, 200)).unwrap();

        control.set_transform(transform).unwrap();
        assert_eq!(control.orientation(), Some(transform));
        control.set_transform(Transform::IDENTITY).unwrap();
        assert_eq!(control.crop(), Some(Rect::new(10, 20, 300, 200)), "{:?}", transform);
    }
}

#[test]
fn test_quarter_turn_swaps_pipe_frame() {
    // Test the device request of a rotated pipe
    let sim = SimProvider::new();
    let mut control = ControlChannel::new(context(&sim));
    control.start(&params(640, 480, PixelFormat::YCbCr420Sp, false)).unwrap();
    control.set_transform(Transform::ROT_90).unwrap();

    let req = sim.overlay(control.overlay_id().unwrap()).unwrap();
    assert_eq!(req.src.size(), Size::new(480, 640));
    assert_eq!(req.src_rect, Rect::new(0, 0, 480, 640));
    assert!(req.flags.contains(PipeFlags::SOURCE_ROTATED_90));
    assert!(control.rotator_enabled());
}

#[test]
fn test_transform_ignored_without_rotator() {
    // Test that a pipe without a rotator keeps its identity orientation
    let sim = SimProvider::new();
    let mut control = ControlChannel::new(context(&sim));
    control.start(&params(640, 480, PixelFormat::Rgba8888, true)).unwrap();
    sim.take_ops();
    control.set_transform(Transform::ROT_90).unwrap();
    assert_eq!(control.orientation(), Some(Transform::IDENTITY));
    assert!(sim.ops().is_empty());
}

#[test]
fn test_update_source_keeps_pipe() {
    // Test that a new source reuses the pipe and resets the geometry
    let sim = SimProvider::new();
    let ctx = context(&sim);
    let mut control = ControlChannel::new(Arc::clone(&ctx));
    control.start(&params(640, 480, PixelFormat::YCbCr420Sp, false)).unwrap();
    let z_order = control.z_order();
    let id = control.overlay_id();
    control.set_position(10, 10, 320, 240).unwrap();

    let next = BufferInfo::new(1280, 720, PixelFormat::YCbCr420Sp.code(), 1280 * 720 * 3 / 2);
    control.update_source(&next, OverlayFlags::empty()).unwrap();
    assert_eq!(control.z_order(), z_order);
    assert_eq!(control.overlay_id(), id);
    assert_eq!(control.size(), Some(1280 * 720 * 3 / 2));
    assert_eq!(control.position(), Some(Rect::new(0, 0, 1280, 720)));
    assert_eq!(ctx.pipes().total_in_use(), 1);
}

#[test]
fn test_update_source_failure_closes() {
    // Test that a rejected reconfiguration closes the channel
    let sim = SimProvider::new();
    let ctx = context(&sim);
    let mut control = ControlChannel::new(Arc::clone(&ctx));
    control.start(&params(640, 480, PixelFormat::YCbCr420Sp, false)).unwrap();

    sim.inject(Faults::SET_OVERLAY);
    let next = BufferInfo::new(1280, 720, PixelFormat::YCbCr420Sp.code(), 1280 * 720 * 3 / 2);
    assert!(control.update_source(&next, OverlayFlags::empty()).is_err());
    assert!(!control.is_open());
    assert_eq!(ctx.pipes().total_in_use(), 0);
    assert_eq!(sim.rotator_sessions(), 0);
}

#[test]
fn test_flags_update_in_place() {
    // Test that vsync and foreground flags change without reopening the pipe
    let sim = SimProvider::new();
    let mut control = ControlChannel::new(context(&sim));
    control.start(&params(640, 480, PixelFormat::Rgba8888, true)).unwrap();
    let id = control.overlay_id().unwrap();

    let flags = OverlayFlags::DISABLE_FRAMEBUFFER_FETCH;
    assert!(control.flags_need_update(flags));
    control.update_flags(flags).unwrap();
    assert!(!control.flags_need_update(flags));
    let req = sim.overlay(id).unwrap();
    assert!(req.is_fg);
    assert!(req.flags.contains(PipeFlags::PLAY_NOWAIT));
    assert_eq!(control.overlay_id(), Some(id));
}

#[test]
fn test_visual_params() {
    // Test that hue is clamped to its range and reaches the device
    let sim = SimProvider::new();
    let mut control = ControlChannel::new(context(&sim));
    control.start(&params(640, 480, PixelFormat::YCbCr420Sp, true)).unwrap();
    let id = control.overlay_id().unwrap();

    control.set_visual_param(VisualParam::Hue, 500.0).unwrap();
    control.set_visual_param(VisualParam::Saturation, -3.0).unwrap();
    assert_eq!(control.hsic().map(|h| (h.hue, h.saturation)), Some((180, -1.0)));
    let last = sim.ops().into_iter().rev().find_map(|op| match op {
        SimOp::SetHsic { id: hsic_id, config, .. } if hsic_id == id => Some(config),
        _ => None,
    });
    assert_eq!(last.map(|c| c.hue), Some(180));

    control.set_visual_param(VisualParam::ResetAll, 0.0).unwrap();
    assert!(sim.overlay(id).unwrap().flags.contains(PipeFlags::SHARPENING));
}

#[test]
fn test_virtual_framebuffer() {
    // Test the stereo virtual framebuffer and its release on close
    let sim = SimProvider::new();
    let mut control = ControlChannel::new(context(&sim));
    control.start(&params(1920, 1080, PixelFormat::YCbCr420Sp, false)).unwrap();
    control.use_virtual_framebuffer().unwrap();
    control.use_virtual_framebuffer().unwrap();
    assert_eq!(control.fb_size(), Some(Size::new(3840, 540)));

    control.close();
    let stereo: Vec<bool> = sim
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            SimOp::Set3d { request, .. } => Some(request.enabled),
            _ => None,
        })
        .collect();
    assert_eq!(stereo, vec![true, false]);
}

#[test]
fn test_placement_helpers() {
    // Test placement on the channel's display
    let sim = SimProvider::new();
    let mut control = ControlChannel::new(context(&sim));
    control.start(&params(1280, 720, PixelFormat::YCbCr420Sp, false)).unwrap();
    assert_eq!(control.aspect_ratio_position(1280, 720).unwrap(), Rect::new(0, 0, 1920, 1080));
    assert_eq!(
        control.stereo_position(1, StereoOutput::SideBySide).unwrap(),
        Some(Rect::new(960, 0, 960, 1080))
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_position_round_trip(x in 0u32..4000, y in 0u32..4000, w in 2u32..16000, h in 2u32..16000) {
        // Test that a valid position reads back as its magnification-clamped self
        let display = Size::new(20000, 20000);
        let sim = SimProvider::new().with_screen(DisplayId::Primary, sim::screen(display.width, display.height));
        let mut control = ControlChannel::new(context(&sim));
        control.start(&params(1280, 720, PixelFormat::Rgba8888, true)).unwrap();

        control.set_position(x as i32, y as i32, w, h).unwrap();
        let expected = geometry::clamp_magnification(Rect::new(x, y, w, h), Size::new(1280, 720), display);
        prop_assert_eq!(control.position(), Some(expected));
    }
}

mock! {
    pub Display {}

    impl DisplayDevice for Display {
        fn screen_info(&self) -> Result<ScreenInfo>;
        fn set_screen_info(&mut self, info: &ScreenInfo) -> Result<()>;
        fn map_framebuffer(&mut self, len: usize) -> Result<(MemoryId, usize)>;
        fn set_overlay(&mut self, req: &OverlayRequest) -> Result<OverlayId>;
        fn overlay(&self, id: OverlayId) -> Result<OverlayRequest>;
        fn unset_overlay(&mut self, id: OverlayId) -> Result<()>;
        fn play(&mut self, req: &PlayRequest) -> Result<()>;
        fn play_wait(&mut self, req: &PlayRequest) -> Result<()>;
        fn set_3d(&mut self, req: &Stereo3dRequest) -> Result<()>;
        fn set_hsic(&mut self, id: OverlayId, cfg: &HsicConfig) -> Result<()>;
        fn mixer_info(&self, mixer: u32) -> Result<Vec<MixerPipe>>;
    }
}

mock! {
    pub Provider {}

    impl DeviceProvider for Provider {
        fn open_display(&self, display: DisplayId) -> Result<Box<dyn DisplayDevice>>;
        fn open_rotator(&self) -> Result<Box<dyn RotatorDevice>>;
        fn send_3d_info_packet(&self, output: StereoOutput) -> Result<()>;
        fn enable_barrier(&self, barrier: Barrier) -> Result<()>;
    }
}

#[test]
fn test_unchanged_position_skips_device() {
    // Test that repeating the committed destination issues no overlay set
    let mut provider = MockProvider::new();
    provider.expect_open_display().times(1).returning(|_| {
        let mut display = MockDisplay::new();
        display.expect_screen_info().returning(|| Ok(sim::screen(1920, 1080)));
        // One set for the start and one for the real move
        display.expect_set_overlay().times(2).returning(|_| Ok(OverlayId(7)));
        display.expect_unset_overlay().times(1).returning(|_| Ok(()));
        Ok(Box::new(display))
    });
    let sim = SimProvider::new();
    let ctx = Arc::new(HalContext::new(HalConfig::default(), Arc::new(provider), Arc::new(sim.allocator())));

    let mut control = ControlChannel::new(ctx);
    control.start(&params(1280, 720, PixelFormat::Rgba8888, true)).unwrap();
    control.set_position(0, 0, 1280, 720).unwrap();
    control.set_position(10, 10, 640, 360).unwrap();
    control.set_position(10, 10, 640, 360).unwrap();
    control.close();
}
