//! Integration tests for the overlay compositor.
//!
//! These tests exercise the public API only: holes are added and removed by
//! id, and the resulting mask and painted surface are inspected pixel by
//! pixel.  Sample points are chosen well away from path edges so the results
//! do not depend on anti-aliasing.

use studio_core::{
    FrameImage, GuidePath, GuidePathBuilder, HoleShape, OverlayCompositor, OverlayStyle, Point,
    Rgba,
};

const MASK: Rgba = Rgba::opaque(238, 238, 238);

fn compositor(width: u32, height: u32) -> OverlayCompositor {
    let mut overlay = OverlayCompositor::new(width, height).expect("non-empty surface");
    overlay.set_style(OverlayStyle {
        show_guide: false,
        ..OverlayStyle::default()
    });
    overlay
}

fn square(x: f32, y: f32, size: f32) -> GuidePath {
    GuidePath::rect(x, y, size, size).expect("valid square")
}

// ── Even-odd parity ───────────────────────────────────────────────────────────

#[test]
fn test_disjoint_holes_are_both_revealed() {
    // Arrange
    let mut overlay = compositor(100, 100);
    overlay.set_hole("left", square(5.0, 5.0, 30.0));
    overlay.set_hole("right", square(60.0, 60.0, 30.0));

    // Act
    let mask = overlay.composite_mask();

    // Assert
    assert!(mask.reveals(20, 20));
    assert!(mask.reveals(75, 75));
    assert!(!mask.reveals(50, 50), "area between holes stays masked");
}

#[test]
fn test_nested_holes_alternate_between_revealed_and_masked() {
    // Arrange – three concentric squares
    let mut overlay = compositor(120, 120);
    overlay.set_hole("outer", square(10.0, 10.0, 100.0));
    overlay.set_hole("middle", square(30.0, 30.0, 60.0));
    overlay.set_hole("inner", square(50.0, 50.0, 20.0));

    // Act
    let mask = overlay.composite_mask();

    // Assert
    assert!(!mask.reveals(2, 2), "outside every hole: masked");
    assert!(mask.reveals(20, 20), "inside one hole: revealed");
    assert!(!mask.reveals(40, 40), "inside two holes: masked");
    assert!(mask.reveals(60, 60), "inside three holes: revealed");
}

#[test]
fn test_overlapping_holes_mask_their_intersection() {
    // Arrange
    let mut overlay = compositor(100, 100);
    overlay.set_hole("a", square(10.0, 10.0, 50.0));
    overlay.set_hole("b", square(40.0, 40.0, 50.0));

    // Act
    let mask = overlay.composite_mask();

    // Assert
    assert!(mask.reveals(20, 20));
    assert!(mask.reveals(80, 80));
    assert!(!mask.reveals(50, 50), "inside both holes: masked");
}

/// Five-pointed star drawn as one self-intersecting outline.  The inner
/// pentagon is enclosed twice.
fn pentagram(cx: f32, cy: f32, radius: f32) -> GuidePath {
    let vertex = |k: usize| {
        let angle = (-90.0 + 144.0 * k as f32).to_radians();
        (cx + radius * angle.cos(), cy + radius * angle.sin())
    };
    let mut b = GuidePathBuilder::new();
    let (x, y) = vertex(0);
    b.move_to(x, y);
    for k in 1..5 {
        let (x, y) = vertex(k);
        b.line_to(x, y);
    }
    b.close();
    b.finish().expect("valid star")
}

#[test]
fn test_self_intersecting_hole_masks_its_doubly_covered_core() {
    // Arrange
    let mut overlay = compositor(200, 200);
    overlay.set_hole("star", pentagram(100.0, 100.0, 90.0));

    // Act
    let mask = overlay.composite_mask();

    // Assert
    assert!(!mask.reveals(100, 100), "centre pentagon is covered twice: masked");
    assert!(!mask.reveals(100, 112), "centre pentagon is covered twice: masked");
    assert!(mask.reveals(100, 45), "top point is covered once: revealed");
    assert!(mask.reveals(155, 82), "right point is covered once: revealed");
    assert!(!mask.reveals(5, 5), "outside the star: masked");
    assert!(!mask.reveals(100, 190), "between the lower points: masked");
}

#[test]
fn test_overlapping_subpaths_in_one_hole_mask_their_intersection() {
    // Arrange – two squares drawn as subpaths of a single hole
    let mut b = GuidePathBuilder::new();
    b.move_to(10.0, 10.0).line_to(60.0, 10.0).line_to(60.0, 60.0).line_to(10.0, 60.0).close();
    b.move_to(40.0, 40.0).line_to(90.0, 40.0).line_to(90.0, 90.0).line_to(40.0, 90.0).close();
    let mut overlay = compositor(100, 100);
    overlay.set_hole("pair", b.finish().expect("valid path"));

    // Act
    let mask = overlay.composite_mask();

    // Assert
    assert!(mask.reveals(20, 20));
    assert!(mask.reveals(80, 80));
    assert!(!mask.reveals(50, 50), "covered by both subpaths: masked");
}

#[test]
fn test_hole_outside_surface_changes_nothing() {
    let mut overlay = compositor(50, 50);
    overlay.set_hole("offscreen", square(200.0, 200.0, 10.0));

    assert!(overlay.composite_mask().is_fully_opaque());
}

// ── Add / remove ──────────────────────────────────────────────────────────────

#[test]
fn test_clear_hole_restores_previous_mask_exactly() {
    // Arrange
    let mut overlay = compositor(80, 80);
    overlay.set_hole("face", GuidePath::ellipse(40.0, 40.0, 20.0, 30.0).unwrap());
    let before = overlay.composite_mask();

    // Act
    overlay.set_hole("extra", square(0.0, 0.0, 25.0));
    assert_ne!(overlay.composite_mask(), before);
    let removed = overlay.clear_hole("extra");

    // Assert
    assert!(removed.is_some());
    assert_eq!(overlay.composite_mask(), before);
}

#[test]
fn test_clear_unknown_hole_is_noop() {
    let mut overlay = compositor(20, 20);
    overlay.set_hole("a", square(5.0, 5.0, 10.0));
    let before = overlay.composite_mask();

    assert!(overlay.clear_hole("missing").is_none());
    assert_eq!(overlay.composite_mask(), before);
}

#[test]
fn test_clear_all_holes_gives_fully_opaque_mask() {
    // Arrange
    let mut overlay = compositor(64, 64);
    overlay.set_hole("a", square(4.0, 4.0, 20.0));
    overlay.set_hole("b", GuidePath::circle(40.0, 40.0, 10.0).unwrap());
    assert!(!overlay.composite_mask().is_fully_opaque());

    // Act
    overlay.clear_all_holes();

    // Assert
    assert!(overlay.composite_mask().is_fully_opaque());
    assert_eq!(overlay.hole_count(), 0);
}

#[test]
fn test_holes_from_config_shapes() {
    // Arrange
    let shapes = [
        (
            "body",
            HoleShape::RoundedRect {
                x: 10.0,
                y: 10.0,
                width: 60.0,
                height: 80.0,
                radius: 12.0,
            },
        ),
        (
            "badge",
            HoleShape::Polygon {
                points: vec![
                    Point::new(80.0, 5.0),
                    Point::new(95.0, 5.0),
                    Point::new(95.0, 20.0),
                ],
            },
        ),
    ];
    let mut overlay = compositor(100, 100);

    // Act
    for (id, shape) in &shapes {
        overlay.set_hole(*id, shape.to_path().expect("valid shape"));
    }

    // Assert
    let mask = overlay.composite_mask();
    assert!(mask.reveals(40, 50));
    assert!(mask.reveals(92, 10));
    assert!(!mask.reveals(12, 12), "rounded corner stays masked");
    assert_eq!(overlay.hole_ids().collect::<Vec<_>>(), vec!["badge", "body"]);
}

// ── Painting ──────────────────────────────────────────────────────────────────

#[test]
fn test_live_frame_shows_only_through_holes() {
    // Arrange – a 10x10 green frame stretched over a 60x60 surface
    let green = Rgba::opaque(0, 200, 0);
    let mut overlay = compositor(60, 60);
    overlay.set_live_frame(FrameImage::solid(10, 10, green).unwrap());
    overlay.set_hole("window", square(20.0, 20.0, 20.0));

    // Act
    let surface = overlay.paint().unwrap();

    // Assert
    assert_eq!(surface.pixel(30, 30), Some(green));
    assert_eq!(surface.pixel(5, 5), Some(MASK));
    assert_eq!(surface.pixel(55, 30), Some(MASK));
}

#[test]
fn test_clear_live_frame_leaves_holes_transparent() {
    let mut overlay = compositor(40, 40);
    overlay.set_live_frame(FrameImage::solid(4, 4, Rgba::opaque(1, 2, 3)).unwrap());
    overlay.set_hole("h", square(10.0, 10.0, 20.0));

    overlay.clear_live_frame();
    let surface = overlay.paint().unwrap();

    assert!(!overlay.has_live_frame());
    assert_eq!(surface.pixel(20, 20).map(|c| c.a), Some(0));
}

#[test]
fn test_decoded_jpeg_frame_is_drawn() {
    // Arrange – encode a small solid JPEG the way a camera would deliver it
    let (w, h) = (16u32, 12u32);
    let rgb: Vec<u8> = std::iter::repeat([200u8, 30, 30])
        .take((w * h) as usize)
        .flatten()
        .collect();
    let mut jpeg = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 95)
        .encode(&rgb, w, h, image::ColorType::Rgb8)
        .expect("jpeg encode");

    // Act
    let frame = FrameImage::decode_jpeg(&jpeg).expect("jpeg decode");
    let mut overlay = compositor(32, 24);
    overlay.set_live_frame(frame);
    overlay.set_hole("all", square(0.0, 0.0, 32.0));
    let px = overlay.paint().unwrap().pixel(16, 12).unwrap();

    // Assert – lossy, so compare loosely
    assert!(px.r > 150 && px.g < 80 && px.b < 80, "unexpected colour {px:?}");
    assert_eq!(px.a, 255);
}

#[test]
fn test_mask_colour_is_configurable() {
    let mut overlay = compositor(10, 10);
    overlay.set_style(OverlayStyle {
        mask_color: Rgba::opaque(10, 20, 30),
        show_guide: false,
        ..OverlayStyle::default()
    });

    let surface = overlay.paint().unwrap();

    assert_eq!(surface.pixel(5, 5), Some(Rgba::opaque(10, 20, 30)));
}
