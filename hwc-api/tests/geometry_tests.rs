//! Geometry property tests

use hwc_api::core::{Rect, Size, Transform};
use hwc_api::geometry::{self, DownscaleFactor, MAX_MAGNIFICATION};
use proptest::prelude::*;

fn frame_and_rect() -> impl Strategy<Value = (Size, Rect)> {
    (1u32..4096, 1u32..4096).prop_flat_map(|(fw, fh)| {
        (0..fw, 0..fh).prop_flat_map(move |(x, y)| {
            (1..=fw - x, 1..=fh - y).prop_map(move |(w, h)| (Size::new(fw, fh), Rect::new(x, y, w, h)))
        })
    })
}

fn transform() -> impl Strategy<Value = Transform> {
    (0usize..8).prop_map(|i| Transform::ALL[i])
}

proptest! {
    #[test]
    fn test_map_then_unmap_is_identity((frame, rect) in frame_and_rect(), t in transform()) {
        // Test that unmapping restores the original rectangle
        let (mapped, out) = t.map_rect(rect, frame).unwrap();
        prop_assert!(mapped.fits_within(out));
        let (back, original) = t.unmap_rect(mapped, out).unwrap();
        prop_assert_eq!(back, rect);
        prop_assert_eq!(original, frame);
    }

    #[test]
    fn test_map_matches_composition((frame, rect) in frame_and_rect(), a in transform(), b in transform()) {
        // Test that mapping twice equals mapping by the composed transform
        let (step, mid) = a.map_rect(rect, frame).unwrap();
        let (twice, _) = b.map_rect(step, mid).unwrap();
        let (once, _) = a.then(b).map_rect(rect, frame).unwrap();
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn test_normalized_crop_stays_inside((_, rect) in frame_and_rect()) {
        // Test that normalization never grows a crop
        let n = geometry::normalize_crop(rect);
        prop_assert_eq!(n.x % 2, 0);
        prop_assert_eq!(n.y % 2, 0);
        prop_assert_eq!(n.w % 2, 0);
        prop_assert_eq!(n.h % 2, 0);
        prop_assert!(n.x + n.w <= rect.x + rect.w + 1);
        prop_assert!(n.y + n.h <= rect.y + rect.h + 1);
    }

    #[test]
    fn test_downscale_never_exceeds_ratio(sw in 1u32..8192, sh in 1u32..8192, dw in 1u32..4096, dh in 1u32..4096) {
        // Test that the selected factor never decimates past the real ratio
        let factor = DownscaleFactor::select(Size::new(sw, sh), Size::new(dw, dh));
        let ratio = (sw / dw).max(sh / dh);
        prop_assert!(factor.divisor() <= ratio.max(1));
        if ratio >= 8 {
            prop_assert_eq!(factor, DownscaleFactor::Eighth);
        }
    }

    #[test]
    fn test_clamped_destination_respects_limit(w in 1u32..20000, h in 1u32..20000, sw in 1u32..4096, sh in 1u32..4096) {
        // Test that a clamped destination stays within magnification and display
        let display = Size::new(20000, 20000);
        let dst = geometry::clamp_magnification(Rect::new(0, 0, w, h), Size::new(sw, sh), display);
        prop_assert!(dst.w <= sw * MAX_MAGNIFICATION);
        prop_assert!(dst.h <= sh * MAX_MAGNIFICATION);
        prop_assert!(dst.fits_within(display));
    }
}

#[test]
fn test_large_display_scenario() {
    // Test the 1920x1080 source on a 20000x20000 display
    let display = Size::new(20000, 20000);
    let src = Size::new(1920, 1080);
    let ok = geometry::check_destination(0, 0, 3840, 2160, display).unwrap();
    assert_eq!(geometry::clamp_magnification(ok, src, display), Rect::new(0, 0, 3840, 2160));

    let big = geometry::check_destination(0, 0, 20000, 20000, display).unwrap();
    let clamped = geometry::clamp_magnification(big, src, display);
    assert_eq!(clamped.w, 15360);
    assert_eq!(clamped.h, 8640);
}
