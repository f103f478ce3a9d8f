use std::convert::TryFrom;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ViewportError {
    #[error("viewport {field} must be finite and positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },
    #[error("rotation must be a multiple of 90 degrees, got {0}")]
    Rotation(i32),
}

/// Clockwise page rotation, in the PDF `/Rotate` sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> i32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// True for 90 and 270, where the rendered box swaps width and height.
    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }

    pub fn all() -> [Rotation; 4] {
        [
            Rotation::Deg0,
            Rotation::Deg90,
            Rotation::Deg180,
            Rotation::Deg270,
        ]
    }
}

impl TryFrom<i32> for Rotation {
    type Error = ViewportError;

    fn try_from(degrees: i32) -> Result<Self, Self::Error> {
        match degrees.rem_euclid(360) {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            _ => Err(ViewportError::Rotation(degrees)),
        }
    }
}

impl From<Rotation> for i32 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

/// Screen presentation of one page: the rendered page box in pixels, the zoom
/// factor and the rotation. Only constructible through validation, so every
/// `Viewport` has finite, positive dimensions and scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    width: f64,
    height: f64,
    scale: f64,
    rotation: Rotation,
}

impl Viewport {
    pub fn new(width: f64, height: f64, scale: f64, rotation: Rotation) -> Result<Self, ViewportError> {
        check_positive("width", width)?;
        check_positive("height", height)?;
        check_positive("scale", scale)?;
        Ok(Self {
            width,
            height,
            scale,
            rotation,
        })
    }

    /// Viewport for a page whose intrinsic (unrotated) size is
    /// `page_width` x `page_height` document units.
    pub fn for_page(
        page_width: f64,
        page_height: f64,
        scale: f64,
        rotation: Rotation,
    ) -> Result<Self, ViewportError> {
        check_positive("page width", page_width)?;
        check_positive("page height", page_height)?;
        check_positive("scale", scale)?;
        let (width, height) = if rotation.is_quarter_turn() {
            (page_height * scale, page_width * scale)
        } else {
            (page_width * scale, page_height * scale)
        };
        Self::new(width, height, scale, rotation)
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Intrinsic page size in document units, before rotation.
    pub fn page_size(&self) -> (f64, f64) {
        let (w, h) = (self.width / self.scale, self.height / self.scale);
        if self.rotation.is_quarter_turn() {
            (h, w)
        } else {
            (w, h)
        }
    }

    pub fn with_scale(&self, scale: f64) -> Result<Self, ViewportError> {
        let (w, h) = self.page_size();
        Self::for_page(w, h, scale, self.rotation)
    }

    pub fn with_rotation(&self, rotation: Rotation) -> Result<Self, ViewportError> {
        let (w, h) = self.page_size();
        Self::for_page(w, h, self.scale, rotation)
    }

    /// Same scale and rotation, rendered box replaced by the measured one.
    pub fn with_size(&self, width: f64, height: f64) -> Result<Self, ViewportError> {
        Self::new(width, height, self.scale, self.rotation)
    }

    pub fn bounds(&self) -> ScreenRect {
        ScreenRect::new(0.0, 0.0, self.width, self.height)
    }
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ViewportError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ViewportError::NonPositive { field, value })
    }
}

/// Rectangle in document space: origin bottom-left, y grows upward.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl DocumentRect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn corners(&self) -> [(f64, f64); 4] {
        let (x0, y0, x1, y1) = (self.x, self.y, self.x + self.w, self.y + self.h);
        [(x0, y0), (x1, y0), (x1, y1), (x0, y1)]
    }

    /// Axis-aligned bounding box of a set of points.
    pub fn from_corners(points: &[(f64, f64)]) -> Self {
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for &(x, y) in points {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        if points.is_empty() {
            return Self::default();
        }
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.w, self.h].iter().all(|v| v.is_finite()) && self.w > 0.0 && self.h > 0.0
    }

    pub fn approx_eq(&self, other: &DocumentRect, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.w - other.w).abs() <= tolerance
            && (self.h - other.h).abs() <= tolerance
    }
}

/// Rectangle in screen pixels: origin top-left, y grows downward.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl ScreenRect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Finite with strictly positive extent. Anything else never leaves the
    /// measurement stage.
    pub fn is_valid(&self) -> bool {
        [self.left, self.top, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn intersects(&self, other: &ScreenRect) -> bool {
        self.left < other.right()
            && other.left < self.right()
            && self.top < other.bottom()
            && other.top < self.bottom()
    }

    pub fn union(&self, other: &ScreenRect) -> ScreenRect {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        ScreenRect::new(left, top, right - left, bottom - top)
    }

    pub fn approx_eq(&self, other: &ScreenRect, tolerance: f64) -> bool {
        (self.left - other.left).abs() <= tolerance
            && (self.top - other.top).abs() <= tolerance
            && (self.width - other.width).abs() <= tolerance
            && (self.height - other.height).abs() <= tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_accepts_any_multiple_of_ninety() {
        assert_eq!(Rotation::try_from(0).unwrap(), Rotation::Deg0);
        assert_eq!(Rotation::try_from(450).unwrap(), Rotation::Deg90);
        assert_eq!(Rotation::try_from(-90).unwrap(), Rotation::Deg270);
        assert_eq!(
            Rotation::try_from(45),
            Err(ViewportError::Rotation(45))
        );
    }

    #[test]
    fn viewport_rejects_invalid_dimensions() {
        assert!(Viewport::new(0.0, 800.0, 1.0, Rotation::Deg0).is_err());
        assert!(Viewport::new(600.0, -1.0, 1.0, Rotation::Deg0).is_err());
        assert!(Viewport::new(600.0, 800.0, 0.0, Rotation::Deg0).is_err());
        assert!(Viewport::new(600.0, 800.0, f64::NAN, Rotation::Deg0).is_err());
        assert!(Viewport::new(f64::INFINITY, 800.0, 1.0, Rotation::Deg0).is_err());
        assert!(Viewport::new(600.0, 800.0, 1.5, Rotation::Deg180).is_ok());
    }

    #[test]
    fn viewport_for_page_swaps_box_on_quarter_turns() {
        let vp = Viewport::for_page(612.0, 792.0, 2.0, Rotation::Deg90).unwrap();
        assert_eq!(vp.width(), 1584.0);
        assert_eq!(vp.height(), 1224.0);
        assert_eq!(vp.page_size(), (612.0, 792.0));

        let upright = vp.with_rotation(Rotation::Deg0).unwrap();
        assert_eq!(upright.width(), 1224.0);
        assert_eq!(upright.height(), 1584.0);

        let zoomed = upright.with_scale(0.5).unwrap();
        assert_eq!(zoomed.width(), 306.0);
        assert_eq!(zoomed.height(), 396.0);
    }

    #[test]
    fn screen_rect_validity_and_intersection() {
        let a = ScreenRect::new(0.0, 0.0, 10.0, 10.0);
        let b = ScreenRect::new(5.0, 5.0, 10.0, 10.0);
        let c = ScreenRect::new(10.0, 0.0, 5.0, 5.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.is_valid());
        assert!(!ScreenRect::new(0.0, 0.0, 0.0, 4.0).is_valid());
        assert!(!ScreenRect::new(f64::NAN, 0.0, 1.0, 4.0).is_valid());
        assert_eq!(a.union(&b), ScreenRect::new(0.0, 0.0, 15.0, 15.0));
    }

    #[test]
    fn document_rect_bounding_box_of_corners() {
        let rect = DocumentRect::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(DocumentRect::from_corners(&rect.corners()), rect);
    }
}
