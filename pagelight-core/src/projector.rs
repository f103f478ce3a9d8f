//! Bidirectional conversion between document space and screen space.
//!
//! Document space has its origin at the bottom-left of the unrotated page and
//! y growing upward. Screen space has its origin at the top-left of the
//! rendered page box and y growing downward. Rotation is always resolved in
//! document space first; the y-flip and scale are applied last and always go
//! through `vp.height()`.

use crate::geometry::{DocumentRect, Rotation, ScreenRect, Viewport};

/// Side of the validation crosshair squares, in document units.
pub const DEFAULT_CROSSHAIR_SIZE: f64 = 10.0;

/// Round-trip tolerance guaranteed over the supported zoom range.
pub const ROUND_TRIP_TOLERANCE: f64 = 0.5;

pub fn to_screen(rect: &DocumentRect, vp: &Viewport) -> ScreenRect {
    let rotated = rotate_rect(rect, vp);
    let scale = vp.scale();
    ScreenRect {
        left: rotated.x * scale,
        top: vp.height() - (rotated.y * scale + rotated.h * scale),
        width: rotated.w * scale,
        height: rotated.h * scale,
    }
}

pub fn to_document(rect: &ScreenRect, vp: &Viewport) -> DocumentRect {
    let scale = vp.scale();
    let rotated = DocumentRect {
        x: rect.left / scale,
        y: (vp.height() - (rect.top + rect.height)) / scale,
        w: rect.width / scale,
        h: rect.height / scale,
    };
    unrotate_rect(&rotated, vp)
}

/// One square per page corner, projected to the screen. At every zoom and
/// rotation the four squares must sit flush against the rendered page edges.
pub fn validation_crosshairs(vp: &Viewport) -> [ScreenRect; 4] {
    validation_crosshairs_sized(vp, DEFAULT_CROSSHAIR_SIZE)
}

pub fn validation_crosshairs_sized(vp: &Viewport, size: f64) -> [ScreenRect; 4] {
    crosshair_corners(vp, size).map(|corner| to_screen(&corner, vp))
}

/// Largest edge offset, in document units, between each corner crosshair and
/// its screen round trip at `vp`.
pub fn crosshair_drift(vp: &Viewport, size: f64) -> f64 {
    crosshair_corners(vp, size)
        .iter()
        .map(|corner| {
            let back = to_document(&to_screen(corner, vp), vp);
            (back.x - corner.x)
                .abs()
                .max((back.y - corner.y).abs())
                .max((back.w - corner.w).abs())
                .max((back.h - corner.h).abs())
        })
        .fold(0.0, f64::max)
}

fn crosshair_corners(vp: &Viewport, size: f64) -> [DocumentRect; 4] {
    let (page_w, page_h) = vp.page_size();
    let size = size.min(page_w).min(page_h).max(f64::MIN_POSITIVE);
    [
        DocumentRect::new(0.0, 0.0, size, size),
        DocumentRect::new(page_w - size, 0.0, size, size),
        DocumentRect::new(page_w - size, page_h - size, size, size),
        DocumentRect::new(0.0, page_h - size, size, size),
    ]
}

// Clockwise quarter turns of the page box onto the rotated page box. This is
// the rotation about the page centre, re-anchored so the rotated page starts
// at the origin again.
fn rotate_point(rotation: Rotation, (page_w, page_h): (f64, f64), (x, y): (f64, f64)) -> (f64, f64) {
    match rotation {
        Rotation::Deg0 => (x, y),
        Rotation::Deg90 => (y, page_w - x),
        Rotation::Deg180 => (page_w - x, page_h - y),
        Rotation::Deg270 => (page_h - y, x),
    }
}

fn unrotate_point(rotation: Rotation, (page_w, page_h): (f64, f64), (x, y): (f64, f64)) -> (f64, f64) {
    match rotation {
        Rotation::Deg0 => (x, y),
        Rotation::Deg90 => (page_w - y, x),
        Rotation::Deg180 => (page_w - x, page_h - y),
        Rotation::Deg270 => (y, page_h - x),
    }
}

fn rotate_rect(rect: &DocumentRect, vp: &Viewport) -> DocumentRect {
    if vp.rotation() == Rotation::Deg0 {
        return *rect;
    }
    let page = vp.page_size();
    let corners = rect.corners().map(|p| rotate_point(vp.rotation(), page, p));
    DocumentRect::from_corners(&corners)
}

fn unrotate_rect(rect: &DocumentRect, vp: &Viewport) -> DocumentRect {
    if vp.rotation() == Rotation::Deg0 {
        return *rect;
    }
    let page = vp.page_size();
    let corners = rect.corners().map(|p| unrotate_point(vp.rotation(), page, p));
    DocumentRect::from_corners(&corners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    fn letter(scale: f64, rotation: Rotation) -> Viewport {
        Viewport::for_page(612.0, 792.0, scale, rotation).unwrap()
    }

    #[test]
    fn bottom_of_page_maps_to_bottom_of_screen() {
        let vp = Viewport::new(612.0, 792.0, 1.0, Rotation::Deg0).unwrap();
        let rect = DocumentRect::new(72.0, 0.0, 100.0, 12.0);
        let screen = to_screen(&rect, &vp);
        assert!((screen.top - (792.0 - 12.0)).abs() < EPS);
        assert!((screen.left - 72.0).abs() < EPS);
        assert!((screen.bottom() - vp.height()).abs() < EPS);
    }

    #[test]
    fn top_of_page_maps_to_top_of_screen() {
        let vp = Viewport::new(1224.0, 1584.0, 2.0, Rotation::Deg0).unwrap();
        let h = 12.0;
        let rect = DocumentRect::new(0.0, vp.height() / vp.scale() - h, 50.0, h);
        let screen = to_screen(&rect, &vp);
        assert!(screen.top.abs() < EPS);
        assert!((screen.height - 24.0).abs() < EPS);
    }

    #[test]
    fn doubling_scale_doubles_every_component() {
        let rect = DocumentRect::new(33.0, 140.5, 81.25, 14.0);
        for rotation in Rotation::all() {
            let base = to_screen(&rect, &letter(1.25, rotation));
            let doubled = to_screen(&rect, &letter(2.5, rotation));
            assert!((doubled.left - 2.0 * base.left).abs() < EPS);
            assert!((doubled.top - 2.0 * base.top).abs() < EPS);
            assert!((doubled.width - 2.0 * base.width).abs() < EPS);
            assert!((doubled.height - 2.0 * base.height).abs() < EPS);
        }
    }

    #[test]
    fn quarter_turn_round_trip() {
        let vp = Viewport::new(600.0, 800.0, 1.0, Rotation::Deg90).unwrap();
        let rect = DocumentRect::new(10.0, 10.0, 100.0, 50.0);
        let screen = to_screen(&rect, &vp);
        assert!(screen.is_valid());
        assert!((screen.width - 50.0).abs() < EPS);
        assert!((screen.height - 100.0).abs() < EPS);
        let back = to_document(&screen, &vp);
        assert!(back.approx_eq(&rect, ROUND_TRIP_TOLERANCE), "{back:?}");
    }

    #[test]
    fn rotation_is_clockwise() {
        // A rect hugging the top-left of an upright page ends up at the
        // top-right once the page is turned 90 degrees clockwise.
        let vp = letter(1.0, Rotation::Deg90);
        let rect = DocumentRect::new(0.0, 792.0 - 20.0, 40.0, 20.0);
        let screen = to_screen(&rect, &vp);
        assert!((screen.right() - vp.width()).abs() < EPS);
        assert!(screen.top.abs() < EPS);
        assert!((screen.width - 20.0).abs() < EPS);
        assert!((screen.height - 40.0).abs() < EPS);
    }

    #[test]
    fn crosshairs_hug_page_corners_at_every_rotation() {
        for scale in [0.25, 1.0, 1.7, 4.0] {
            for rotation in Rotation::all() {
                let vp = letter(scale, rotation);
                let marks = validation_crosshairs(&vp);
                let mut seen = [false; 4];
                for mark in &marks {
                    assert!((mark.width - DEFAULT_CROSSHAIR_SIZE * scale).abs() < 1e-6);
                    let at_left = mark.left.abs() < 1e-6;
                    let at_right = (mark.right() - vp.width()).abs() < 1e-6;
                    let at_top = mark.top.abs() < 1e-6;
                    let at_bottom = (mark.bottom() - vp.height()).abs() < 1e-6;
                    assert!(at_left || at_right, "{mark:?} at {rotation:?}");
                    assert!(at_top || at_bottom, "{mark:?} at {rotation:?}");
                    let slot = usize::from(at_right) + 2 * usize::from(at_bottom);
                    seen[slot] = true;
                }
                assert!(seen.iter().all(|s| *s), "corners missing at {rotation:?}");
            }
        }
    }

    #[test]
    fn crosshair_drift_stays_within_tolerance() {
        for scale in [0.25, 1.0, 1.7, 4.0] {
            for rotation in Rotation::all() {
                let drift = crosshair_drift(&letter(scale, rotation), DEFAULT_CROSSHAIR_SIZE);
                assert!(drift < 1e-6, "{drift} at {rotation:?} x{scale}");
            }
        }
    }

    #[test]
    fn screen_to_document_round_trip() {
        let vp = letter(3.0, Rotation::Deg270);
        let screen = ScreenRect::new(120.0, 48.0, 210.0, 36.0);
        let back = to_screen(&to_document(&screen, &vp), &vp);
        assert!(back.approx_eq(&screen, ROUND_TRIP_TOLERANCE));
    }

    fn rotation_strategy() -> impl Strategy<Value = Rotation> {
        prop::sample::select(Rotation::all().to_vec())
    }

    proptest! {
        #[test]
        fn round_trip_over_supported_range(
            x in 0.0f64..600.0,
            y in 0.0f64..780.0,
            w in 0.1f64..300.0,
            h in 0.1f64..200.0,
            scale in 0.25f64..=4.0,
            rotation in rotation_strategy(),
        ) {
            let vp = letter(scale, rotation);
            let rect = DocumentRect::new(x, y, w, h);
            let back = to_document(&to_screen(&rect, &vp), &vp);
            prop_assert!(back.approx_eq(&rect, ROUND_TRIP_TOLERANCE), "{:?} vs {:?}", back, rect);
        }
    }
}
