//! The overlay compositor.
//!
//! [`OverlayCompositor`] keeps a set of named hole paths plus an optional live
//! frame and renders them in a fixed order:
//!
//! 1. clear the surface to transparent
//! 2. draw the live frame, stretched to the surface size
//! 3. fill the compound mask path (surface rectangle + every hole) with the
//!    mask colour using the even-odd rule
//! 4. stroke the ratio guide rectangle, if enabled
//! 5. draw extra guide marks
//! 6. draw the debug cross, if enabled
//!
//! The compositor is owned by the UI thread and is deliberately `!Send`.
//! Frames from the poller thread reach it through a channel.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use tiny_skia::{
    FillRule, FilterQuality, Mask, Paint, PathBuilder, Pixmap, PixmapPaint, Rect, Stroke,
    StrokeDash, Transform,
};
use tracing::{debug, trace};

use super::frame_image::FrameImage;
use super::path::{fit_ratio_rect, GuidePath, Point};
use super::{OverlayError, Rgba};

/// Dash pattern for the ratio guide: 6 px on, 4 px off.
const GUIDE_DASH: [f32; 2] = [6.0, 4.0];

/// Visual settings of the mask and guides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    /// Colour of the opaque sheet around the holes.
    pub mask_color: Rgba,
    /// Colour of the ratio guide rectangle.
    pub guide_color: Rgba,
    /// Stroke width of the ratio guide, in pixels.
    pub guide_width: f32,
    /// Draw the ratio guide at all.
    pub show_guide: bool,
    /// Aspect ratio (`width:height`) of the guide rectangle.
    pub guide_ratio: Option<(u32, u32)>,
    /// Corner radius of the guide rectangle.
    pub corner_radius: f32,
    /// Stroke the guide with a dash pattern instead of a solid line.
    pub dashed_guide: bool,
    /// Draw a thin red cross through the surface centre.
    pub debug_cross: bool,
    /// Anti-alias hole edges and guides.
    pub anti_alias: bool,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            mask_color: Rgba::opaque(238, 238, 238),
            guide_color: Rgba::new(255, 255, 255, 200),
            guide_width: 2.0,
            show_guide: true,
            guide_ratio: Some((3, 4)),
            corner_radius: 0.0,
            dashed_guide: true,
            debug_cross: false,
            anti_alias: true,
        }
    }
}

/// Extra marks drawn above the mask.
#[derive(Debug, Clone, PartialEq)]
pub enum GuideMark {
    /// A stroked path, such as a shoulder line.
    Stroke {
        path: GuidePath,
        color: Rgba,
        width: f32,
        dashed: bool,
    },
    /// Filled dots, such as eye-level markers.
    Points {
        points: Vec<Point>,
        color: Rgba,
        radius: f32,
    },
}

/// Per-pixel mask coverage, independent of any live frame.
///
/// `coverage` is 0 where the live image shows through and 255 where the mask
/// colour is fully opaque; anti-aliased edges fall in between.
#[derive(Clone, PartialEq, Eq)]
pub struct CompositeMask {
    width: u32,
    height: u32,
    coverage: Vec<u8>,
}

impl CompositeMask {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Mask opacity at pixel `(x, y)`, or `None` outside the surface.
    pub fn opacity(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.coverage
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// `true` if the live image is fully visible at `(x, y)`.
    pub fn reveals(&self, x: u32, y: u32) -> bool {
        self.opacity(x, y) == Some(0)
    }

    /// `true` if no pixel shows any of the live image.
    pub fn is_fully_opaque(&self) -> bool {
        self.coverage.iter().all(|&c| c == u8::MAX)
    }

    /// Number of pixels that are fully revealed.
    pub fn revealed_pixels(&self) -> usize {
        self.coverage.iter().filter(|&&c| c == 0).count()
    }
}

impl std::fmt::Debug for CompositeMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeMask")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("revealed_pixels", &self.revealed_pixels())
            .finish()
    }
}

/// The rendered overlay.
pub struct PaintedSurface {
    pixmap: Pixmap,
}

impl PaintedSurface {
    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Straight-alpha colour at `(x, y)`, or `None` outside the surface.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        let c = self.pixmap.pixel(x, y)?.demultiply();
        Some(Rgba::new(c.red(), c.green(), c.blue(), c.alpha()))
    }

    /// Encodes the surface as a PNG image.
    pub fn encode_png(&self) -> Result<Vec<u8>, OverlayError> {
        self.pixmap
            .encode_png()
            .map_err(|e| OverlayError::Encode(e.to_string()))
    }
}

/// Composes the live frame, the hole mask, and the alignment guides.
///
/// # Example
///
/// ```rust
/// use studio_core::{GuidePath, OverlayCompositor};
///
/// let mut overlay = OverlayCompositor::new(200, 200).unwrap();
/// overlay.set_hole("face", GuidePath::circle(100.0, 100.0, 50.0).unwrap());
///
/// let mask = overlay.composite_mask();
/// assert!(mask.reveals(100, 100));
/// assert!(!mask.reveals(5, 5));
/// ```
pub struct OverlayCompositor {
    width: u32,
    height: u32,
    holes: BTreeMap<String, GuidePath>,
    live_frame: Option<FrameImage>,
    guides: Vec<GuideMark>,
    style: OverlayStyle,
    // Confines the compositor to the thread that created it.
    _ui_thread: PhantomData<*const ()>,
}

impl OverlayCompositor {
    /// Creates a compositor for a `width` x `height` surface with no holes.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::EmptySurface`] if either dimension is zero.
    pub fn new(width: u32, height: u32) -> Result<Self, OverlayError> {
        if width == 0 || height == 0 {
            return Err(OverlayError::EmptySurface { width, height });
        }
        Ok(Self {
            width,
            height,
            holes: BTreeMap::new(),
            live_frame: None,
            guides: Vec::new(),
            style: OverlayStyle::default(),
            _ui_thread: PhantomData,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Adds or replaces the hole named `id`.  Returns the previous path.
    pub fn set_hole(&mut self, id: impl Into<String>, path: GuidePath) -> Option<GuidePath> {
        let id = id.into();
        trace!(hole = %id, "hole set");
        self.holes.insert(id, path)
    }

    /// Removes the hole named `id`.  Returns the removed path, if any.
    pub fn clear_hole(&mut self, id: &str) -> Option<GuidePath> {
        self.holes.remove(id)
    }

    /// Removes every hole; the mask becomes fully opaque.
    pub fn clear_all_holes(&mut self) {
        self.holes.clear();
    }

    pub fn hole(&self, id: &str) -> Option<&GuidePath> {
        self.holes.get(id)
    }

    /// Hole ids in sorted order.
    pub fn hole_ids(&self) -> impl Iterator<Item = &str> {
        self.holes.keys().map(String::as_str)
    }

    pub fn hole_count(&self) -> usize {
        self.holes.len()
    }

    /// Replaces the live frame drawn beneath the mask.
    pub fn set_live_frame(&mut self, frame: FrameImage) {
        self.live_frame = Some(frame);
    }

    pub fn clear_live_frame(&mut self) {
        self.live_frame = None;
    }

    pub fn has_live_frame(&self) -> bool {
        self.live_frame.is_some()
    }

    pub fn set_guides(&mut self, guides: Vec<GuideMark>) {
        self.guides = guides;
    }

    pub fn push_guide(&mut self, guide: GuideMark) {
        self.guides.push(guide);
    }

    pub fn clear_guides(&mut self) {
        self.guides.clear();
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    pub fn set_style(&mut self, style: OverlayStyle) {
        self.style = style;
    }

    /// Surface rectangle followed by every hole, as one path.
    fn compound_path(&self) -> Option<tiny_skia::Path> {
        let rect = Rect::from_xywh(0.0, 0.0, self.width as f32, self.height as f32)?;
        let mut pb = PathBuilder::new();
        pb.push_rect(rect);
        for hole in self.holes.values() {
            hole.append_to(&mut pb);
        }
        pb.finish()
    }

    /// Rasterizes the compound path alone.
    ///
    /// Two compositors with the same size and the same set of holes always
    /// produce equal masks, whatever order the holes were added in.
    pub fn composite_mask(&self) -> CompositeMask {
        let mut coverage = vec![u8::MAX; self.width as usize * self.height as usize];
        if let (Some(path), Some(mut mask)) = (self.compound_path(), Mask::new(self.width, self.height)) {
            mask.fill_path(&path, FillRule::EvenOdd, self.style.anti_alias, Transform::identity());
            coverage.copy_from_slice(mask.data());
        }
        CompositeMask {
            width: self.width,
            height: self.height,
            coverage,
        }
    }

    /// Renders the full overlay.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::EmptySurface`] if the surface pixmap cannot be
    /// allocated.
    pub fn paint(&self) -> Result<PaintedSurface, OverlayError> {
        let (w, h) = (self.width, self.height);
        let mut pixmap = Pixmap::new(w, h).ok_or(OverlayError::EmptySurface { width: w, height: h })?;
        pixmap.fill(tiny_skia::Color::TRANSPARENT);

        if let Some(frame) = &self.live_frame {
            let sx = w as f32 / frame.width() as f32;
            let sy = h as f32 / frame.height() as f32;
            let paint = PixmapPaint {
                quality: FilterQuality::Bilinear,
                ..PixmapPaint::default()
            };
            pixmap.draw_pixmap(
                0,
                0,
                frame.pixmap().as_ref(),
                &paint,
                Transform::from_scale(sx, sy),
                None,
            );
        }

        if let Some(path) = self.compound_path() {
            let paint = solid_paint(self.style.mask_color, self.style.anti_alias);
            pixmap.fill_path(&path, &paint, FillRule::EvenOdd, Transform::identity(), None);
        }

        self.draw_ratio_guide(&mut pixmap);

        for guide in &self.guides {
            self.draw_guide(&mut pixmap, guide);
        }

        if self.style.debug_cross {
            self.draw_debug_cross(&mut pixmap);
        }

        debug!(
            width = w,
            height = h,
            holes = self.holes.len(),
            live = self.live_frame.is_some(),
            "overlay painted"
        );
        Ok(PaintedSurface { pixmap })
    }

    fn draw_ratio_guide(&self, pixmap: &mut Pixmap) {
        let style = &self.style;
        let Some((rw, rh)) = style.guide_ratio.filter(|_| style.show_guide) else {
            return;
        };
        let (x, y, gw, gh) = fit_ratio_rect(self.width, self.height, rw, rh);
        // Inset by half the stroke so the whole line stays on the surface.
        let inset = style.guide_width / 2.0;
        let Ok(path) = GuidePath::rounded_rect(
            x + inset,
            y + inset,
            gw - style.guide_width,
            gh - style.guide_width,
            style.corner_radius,
        ) else {
            return;
        };
        stroke(
            pixmap,
            &path,
            style.guide_color,
            style.guide_width,
            style.dashed_guide,
            style.anti_alias,
        );
    }

    fn draw_guide(&self, pixmap: &mut Pixmap, guide: &GuideMark) {
        match guide {
            GuideMark::Stroke {
                path,
                color,
                width,
                dashed,
            } => stroke(pixmap, path, *color, *width, *dashed, self.style.anti_alias),
            GuideMark::Points { points, color, radius } => {
                let paint = solid_paint(*color, self.style.anti_alias);
                for p in points {
                    if let Ok(dot) = GuidePath::circle(p.x, p.y, *radius) {
                        pixmap.fill_path(
                            dot.as_skia(),
                            &paint,
                            FillRule::Winding,
                            Transform::identity(),
                            None,
                        );
                    }
                }
            }
        }
    }

    fn draw_debug_cross(&self, pixmap: &mut Pixmap) {
        let (w, h) = (self.width as f32, self.height as f32);
        let mut pb = PathBuilder::new();
        pb.move_to(w / 2.0, 0.0);
        pb.line_to(w / 2.0, h);
        pb.move_to(0.0, h / 2.0);
        pb.line_to(w, h / 2.0);
        if let Some(path) = pb.finish() {
            let paint = solid_paint(Rgba::opaque(255, 0, 0), false);
            let stroke = Stroke {
                width: 1.0,
                ..Stroke::default()
            };
            pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
        }
    }
}

fn solid_paint(color: Rgba, anti_alias: bool) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(color.to_skia());
    paint.anti_alias = anti_alias;
    paint
}

fn stroke(pixmap: &mut Pixmap, path: &GuidePath, color: Rgba, width: f32, dashed: bool, anti_alias: bool) {
    let paint = solid_paint(color, anti_alias);
    let stroke = Stroke {
        width,
        dash: if dashed {
            StrokeDash::new(GUIDE_DASH.to_vec(), 0.0)
        } else {
            None
        },
        ..Stroke::default()
    };
    pixmap.stroke_path(path.as_skia(), &paint, &stroke, Transform::identity(), None);
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_style() -> OverlayStyle {
        OverlayStyle {
            show_guide: false,
            anti_alias: false,
            ..OverlayStyle::default()
        }
    }

    #[test]
    fn test_new_rejects_empty_surface() {
        assert!(matches!(
            OverlayCompositor::new(0, 10),
            Err(OverlayError::EmptySurface { width: 0, height: 10 })
        ));
    }

    #[test]
    fn test_no_holes_is_fully_opaque() {
        let overlay = OverlayCompositor::new(16, 16).unwrap();
        assert!(overlay.composite_mask().is_fully_opaque());
    }

    #[test]
    fn test_set_hole_replaces_same_id() {
        // Arrange
        let mut overlay = OverlayCompositor::new(100, 100).unwrap();
        overlay.set_hole("a", GuidePath::rect(0.0, 0.0, 10.0, 10.0).unwrap());

        // Act
        let previous = overlay.set_hole("a", GuidePath::rect(50.0, 50.0, 10.0, 10.0).unwrap());

        // Assert
        assert!(previous.is_some());
        assert_eq!(overlay.hole_count(), 1);
        let mask = overlay.composite_mask();
        assert!(!mask.reveals(5, 5));
        assert!(mask.reveals(55, 55));
    }

    #[test]
    fn test_hole_order_does_not_change_mask() {
        let a = GuidePath::rect(10.0, 10.0, 40.0, 40.0).unwrap();
        let b = GuidePath::circle(40.0, 40.0, 20.0).unwrap();

        let mut first = OverlayCompositor::new(80, 80).unwrap();
        first.set_hole("a", a.clone());
        first.set_hole("b", b.clone());

        let mut second = OverlayCompositor::new(80, 80).unwrap();
        second.set_hole("b", b);
        second.set_hole("a", a);

        assert_eq!(first.composite_mask(), second.composite_mask());
    }

    #[test]
    fn test_opacity_outside_surface_is_none() {
        let mask = OverlayCompositor::new(4, 4).unwrap().composite_mask();
        assert_eq!(mask.opacity(4, 0), None);
        assert_eq!(mask.opacity(0, 3), Some(255));
    }

    #[test]
    fn test_paint_without_frame_leaves_holes_transparent() {
        // Arrange
        let mut overlay = OverlayCompositor::new(40, 40).unwrap();
        overlay.set_style(plain_style());
        overlay.set_hole("h", GuidePath::rect(10.0, 10.0, 20.0, 20.0).unwrap());

        // Act
        let surface = overlay.paint().unwrap();

        // Assert
        assert_eq!(surface.pixel(20, 20).map(|c| c.a), Some(0));
        assert_eq!(surface.pixel(2, 2), Some(Rgba::opaque(238, 238, 238)));
    }

    #[test]
    fn test_debug_cross_marks_centre() {
        let mut overlay = OverlayCompositor::new(41, 41).unwrap();
        overlay.set_style(OverlayStyle {
            debug_cross: true,
            ..plain_style()
        });

        let surface = overlay.paint().unwrap();

        let centre = surface.pixel(20, 20).expect("in range");
        assert!(centre.r > centre.g, "centre should be tinted red, got {centre:?}");
    }

    #[test]
    fn test_point_guides_are_drawn_over_mask() {
        // Arrange
        let mut overlay = OverlayCompositor::new(50, 50).unwrap();
        overlay.set_style(plain_style());
        overlay.push_guide(GuideMark::Points {
            points: vec![Point::new(25.0, 25.0)],
            color: Rgba::opaque(0, 0, 255),
            radius: 4.0,
        });

        // Act
        let surface = overlay.paint().unwrap();

        // Assert
        assert_eq!(surface.pixel(25, 25), Some(Rgba::opaque(0, 0, 255)));
        assert_eq!(surface.pixel(5, 5), Some(Rgba::opaque(238, 238, 238)));
    }

    #[test]
    fn test_encode_png_produces_png_signature() {
        let overlay = OverlayCompositor::new(8, 8).unwrap();
        let png = overlay.paint().unwrap().encode_png().unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
