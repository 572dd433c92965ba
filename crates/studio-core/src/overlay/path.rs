//! Hole and guide geometry.
//!
//! All coordinates are in the compositor's own pixel space: `(0, 0)` is the
//! top-left corner of the overlay surface.  Mapping from sensor resolution to
//! surface size is the caller's job.

use serde::{Deserialize, Serialize};
use tiny_skia::{Path, PathBuilder, PathSegment, Rect};

use super::OverlayError;

/// Control-point distance for approximating a quarter circle with a cubic.
const KAPPA: f32 = 0.552_284_8;

/// A point in compositor coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

/// A path in compositor coordinates, used both for holes and stroked guides.
///
/// Paths may nest, overlap, or self-intersect.  When used as a hole, every
/// sub-path is treated as closed.
#[derive(Debug, Clone, PartialEq)]
pub struct GuidePath {
    inner: Path,
}

impl GuidePath {
    /// An axis-aligned rectangle.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::InvalidGeometry`] for a non-positive or
    /// non-finite size.
    pub fn rect(x: f32, y: f32, width: f32, height: f32) -> Result<Self, OverlayError> {
        let rect = checked_rect(x, y, width, height)?;
        Ok(Self {
            inner: PathBuilder::from_rect(rect),
        })
    }

    /// A rectangle with circular corners of `radius`.
    ///
    /// The radius is clamped to half the shorter side; a radius of zero
    /// produces a plain rectangle.
    pub fn rounded_rect(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        radius: f32,
    ) -> Result<Self, OverlayError> {
        checked_rect(x, y, width, height)?;
        let r = radius.max(0.0).min(width.min(height) / 2.0);
        if r == 0.0 {
            return Self::rect(x, y, width, height);
        }

        let (l, t, rt, b) = (x, y, x + width, y + height);
        let k = KAPPA * r;
        let mut pb = PathBuilder::new();
        pb.move_to(l + r, t);
        pb.line_to(rt - r, t);
        pb.cubic_to(rt - r + k, t, rt, t + r - k, rt, t + r);
        pb.line_to(rt, b - r);
        pb.cubic_to(rt, b - r + k, rt - r + k, b, rt - r, b);
        pb.line_to(l + r, b);
        pb.cubic_to(l + r - k, b, l, b - r + k, l, b - r);
        pb.line_to(l, t + r);
        pb.cubic_to(l, t + r - k, l + r - k, t, l + r, t);
        pb.close();
        finish(pb, "rounded rectangle")
    }

    /// An axis-aligned ellipse centred on `(cx, cy)`.
    pub fn ellipse(cx: f32, cy: f32, rx: f32, ry: f32) -> Result<Self, OverlayError> {
        let oval = checked_rect(cx - rx, cy - ry, rx * 2.0, ry * 2.0)?;
        PathBuilder::from_oval(oval)
            .map(|inner| Self { inner })
            .ok_or_else(|| OverlayError::InvalidGeometry("degenerate ellipse".to_string()))
    }

    pub fn circle(cx: f32, cy: f32, radius: f32) -> Result<Self, OverlayError> {
        Self::ellipse(cx, cy, radius, radius)
    }

    /// A closed polygon through `points`.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::InvalidGeometry`] for fewer than three points.
    pub fn polygon(points: &[Point]) -> Result<Self, OverlayError> {
        if points.len() < 3 {
            return Err(OverlayError::InvalidGeometry(format!(
                "polygon needs at least 3 points, got {}",
                points.len()
            )));
        }
        let mut pb = PathBuilder::new();
        pb.move_to(points[0].x, points[0].y);
        for p in &points[1..] {
            pb.line_to(p.x, p.y);
        }
        pb.close();
        finish(pb, "polygon")
    }

    /// An open polyline, for stroked guides.
    pub fn polyline(points: &[Point]) -> Result<Self, OverlayError> {
        if points.len() < 2 {
            return Err(OverlayError::InvalidGeometry(format!(
                "polyline needs at least 2 points, got {}",
                points.len()
            )));
        }
        let mut pb = PathBuilder::new();
        pb.move_to(points[0].x, points[0].y);
        for p in &points[1..] {
            pb.line_to(p.x, p.y);
        }
        finish(pb, "polyline")
    }

    /// Returns the bounding box as `(x, y, width, height)`.
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        let b = self.inner.bounds();
        (b.x(), b.y(), b.width(), b.height())
    }

    pub(crate) fn as_skia(&self) -> &Path {
        &self.inner
    }

    /// Appends every segment of this path to `pb`.
    pub(crate) fn append_to(&self, pb: &mut PathBuilder) {
        for segment in self.inner.segments() {
            match segment {
                PathSegment::MoveTo(p) => pb.move_to(p.x, p.y),
                PathSegment::LineTo(p) => pb.line_to(p.x, p.y),
                PathSegment::QuadTo(p1, p) => pb.quad_to(p1.x, p1.y, p.x, p.y),
                PathSegment::CubicTo(p1, p2, p) => pb.cubic_to(p1.x, p1.y, p2.x, p2.y, p.x, p.y),
                PathSegment::Close => pb.close(),
            }
        }
    }
}

/// Incremental builder for arbitrary guide paths.
///
/// ```rust
/// use studio_core::GuidePathBuilder;
///
/// let mut b = GuidePathBuilder::new();
/// b.move_to(10.0, 10.0).line_to(90.0, 10.0).quad_to(90.0, 90.0, 10.0, 90.0).close();
/// let path = b.finish().unwrap();
/// assert_eq!(path.bounds().0, 10.0);
/// ```
pub struct GuidePathBuilder {
    pb: PathBuilder,
}

impl GuidePathBuilder {
    pub fn new() -> Self {
        Self {
            pb: PathBuilder::new(),
        }
    }

    pub fn move_to(&mut self, x: f32, y: f32) -> &mut Self {
        self.pb.move_to(x, y);
        self
    }

    pub fn line_to(&mut self, x: f32, y: f32) -> &mut Self {
        self.pb.line_to(x, y);
        self
    }

    pub fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) -> &mut Self {
        self.pb.quad_to(x1, y1, x, y);
        self
    }

    pub fn cubic_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) -> &mut Self {
        self.pb.cubic_to(x1, y1, x2, y2, x, y);
        self
    }

    pub fn close(&mut self) -> &mut Self {
        self.pb.close();
        self
    }

    /// Finishes the path.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::InvalidGeometry`] if nothing was drawn or a
    /// coordinate is not finite.
    pub fn finish(self) -> Result<GuidePath, OverlayError> {
        finish(self.pb, "custom path")
    }
}

impl Default for GuidePathBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable hole description, as written in configuration files.
///
/// ```toml
/// [[overlay.holes]]
/// id = "face"
/// shape = "ellipse"
/// cx = 540.0
/// cy = 600.0
/// rx = 260.0
/// ry = 340.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum HoleShape {
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    RoundedRect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        radius: f32,
    },
    Ellipse {
        cx: f32,
        cy: f32,
        rx: f32,
        ry: f32,
    },
    Polygon {
        points: Vec<Point>,
    },
}

impl HoleShape {
    /// Builds the path this shape describes.
    pub fn to_path(&self) -> Result<GuidePath, OverlayError> {
        match self {
            HoleShape::Rect { x, y, width, height } => GuidePath::rect(*x, *y, *width, *height),
            HoleShape::RoundedRect {
                x,
                y,
                width,
                height,
                radius,
            } => GuidePath::rounded_rect(*x, *y, *width, *height, *radius),
            HoleShape::Ellipse { cx, cy, rx, ry } => GuidePath::ellipse(*cx, *cy, *rx, *ry),
            HoleShape::Polygon { points } => GuidePath::polygon(points),
        }
    }
}

/// Returns the largest `ratio_w:ratio_h` rectangle centred in a
/// `width` x `height` surface, as `(x, y, w, h)`.
///
/// Fills the full height when the ratio allows it, otherwise the full width.
/// A zero ratio component falls back to the whole surface.
pub fn fit_ratio_rect(width: u32, height: u32, ratio_w: u32, ratio_h: u32) -> (f32, f32, f32, f32) {
    let (w, h) = (width as f32, height as f32);
    if ratio_w == 0 || ratio_h == 0 {
        return (0.0, 0.0, w, h);
    }
    let (rw, rh) = (ratio_w as f32, ratio_h as f32);
    let mut target_h = h;
    let mut target_w = (target_h * rw / rh).floor();
    if target_w > w {
        target_w = w;
        target_h = (target_w * rh / rw).floor();
    }
    (
        ((w - target_w) / 2.0).floor(),
        ((h - target_h) / 2.0).floor(),
        target_w,
        target_h,
    )
}

fn checked_rect(x: f32, y: f32, width: f32, height: f32) -> Result<Rect, OverlayError> {
    if !(width > 0.0 && height > 0.0) {
        return Err(OverlayError::InvalidGeometry(format!(
            "size {width}x{height} must be positive"
        )));
    }
    Rect::from_xywh(x, y, width, height).ok_or_else(|| {
        OverlayError::InvalidGeometry(format!("rectangle ({x}, {y}, {width}, {height}) is not finite"))
    })
}

fn finish(pb: PathBuilder, what: &str) -> Result<GuidePath, OverlayError> {
    pb.finish()
        .map(|inner| GuidePath { inner })
        .ok_or_else(|| OverlayError::InvalidGeometry(format!("{what} is empty or not finite")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
