use console_core::pixels::{
    dither_allows, ColorPalette, FrameBuffer, PixelArray, TRANSPARENT_INDEX,
};
use std::collections::HashSet;

fn drawn_pixels(fb: &FrameBuffer) -> HashSet<(i32, i32)> {
    let mut set = HashSet::new();
    for y in 0..fb.height() {
        for x in 0..fb.width() {
            if fb.pixels().pixel(x, y) != 0 {
                set.insert((x, y));
            }
        }
    }
    set
}

fn set_of(points: &[(i32, i32)]) -> HashSet<(i32, i32)> {
    points.iter().copied().collect()
}

#[test]
fn pset_and_pget_roundtrip() {
    let mut fb = FrameBuffer::new(32, 32);
    fb.pset(3, 4, 9);
    assert_eq!(fb.pget(3, 4), 9);
    assert_eq!(fb.pget(0, 0), 0);
}

#[test]
fn out_of_bounds_writes_are_silently_clipped() {
    let mut fb = FrameBuffer::new(8, 8);
    fb.pset(-1, 0, 5);
    fb.pset(0, -1, 5);
    fb.pset(8, 0, 5);
    fb.pset(0, 8, 5);
    fb.line(-10, -10, 20, 20, 5);
    fb.circ(0, 0, 6, 5);
    assert!(fb.pixels().pixels().iter().all(|&p| p == 0 || p == 5));
}

#[test]
fn horizontal_and_vertical_lines_are_exact() {
    let mut fb = FrameBuffer::new(16, 16);
    fb.line(2, 5, 6, 5, 1);
    assert_eq!(
        drawn_pixels(&fb),
        set_of(&[(2, 5), (3, 5), (4, 5), (5, 5), (6, 5)])
    );

    let mut fb = FrameBuffer::new(16, 16);
    fb.line(3, 1, 3, 4, 1);
    assert_eq!(drawn_pixels(&fb), set_of(&[(3, 1), (3, 2), (3, 3), (3, 4)]));
}

#[test]
fn diagonal_line_is_exact_bresenham() {
    let mut fb = FrameBuffer::new(16, 16);
    fb.line(0, 0, 4, 2, 1);
    // Integer error accumulation for slope 1/2.
    assert_eq!(
        drawn_pixels(&fb),
        set_of(&[(0, 0), (1, 1), (2, 1), (3, 2), (4, 2)])
    );
}

#[test]
fn steep_line_is_exact_bresenham() {
    let mut fb = FrameBuffer::new(16, 16);
    fb.line(1, 1, 3, 7, 1);
    assert_eq!(
        drawn_pixels(&fb),
        set_of(&[(1, 1), (1, 2), (2, 3), (2, 4), (2, 5), (3, 6), (3, 7)])
    );
}

#[test]
fn circle_radius_two_is_exact_midpoint() {
    let mut fb = FrameBuffer::new(16, 16);
    fb.circ(8, 8, 2, 1);
    // Midpoint circle with m = 5 - 4r.
    let expected = set_of(&[
        (8, 6),
        (8, 10),
        (6, 8),
        (10, 8),
        (7, 6),
        (9, 6),
        (7, 10),
        (9, 10),
        (6, 7),
        (6, 9),
        (10, 7),
        (10, 9),
    ]);
    assert_eq!(drawn_pixels(&fb), expected);
}

#[test]
fn circle_radius_zero_is_one_pixel() {
    let mut fb = FrameBuffer::new(8, 8);
    fb.circ(4, 4, 0, 1);
    assert_eq!(drawn_pixels(&fb), set_of(&[(4, 4)]));
}

#[test]
fn filled_circle_covers_outline_and_interior() {
    let mut outline = FrameBuffer::new(16, 16);
    outline.circ(8, 8, 3, 1);
    let mut filled = FrameBuffer::new(16, 16);
    filled.circf(8, 8, 3, 1);
    let outline_set = drawn_pixels(&outline);
    let filled_set = drawn_pixels(&filled);
    assert!(outline_set.is_subset(&filled_set));
    assert!(filled_set.contains(&(8, 8)));
    // Fill is the disc: every row between the extremes is a solid span.
    for y in 5..=11 {
        let row: Vec<i32> = (0..16).filter(|&x| filled_set.contains(&(x, y))).collect();
        assert!(!row.is_empty());
        let (min, max) = (row[0], row[row.len() - 1]);
        assert_eq!(row.len() as i32, max - min + 1, "gap in row {y}");
    }
}

#[test]
fn oval_is_symmetric_and_bounded() {
    let mut fb = FrameBuffer::new(32, 32);
    fb.oval(16, 16, 6, 3, 1);
    let set = drawn_pixels(&fb);
    assert!(set.contains(&(22, 16)));
    assert!(set.contains(&(10, 16)));
    assert!(set.contains(&(16, 13)));
    assert!(set.contains(&(16, 19)));
    for &(x, y) in &set {
        assert!(set.contains(&(32 - x, y)), "x symmetry broken at {x},{y}");
        assert!(set.contains(&(x, 32 - y)), "y symmetry broken at {x},{y}");
        assert!((10..=22).contains(&x));
        assert!((13..=19).contains(&y));
    }
}

#[test]
fn filled_oval_has_solid_rows() {
    let mut fb = FrameBuffer::new(32, 32);
    fb.ovalf(16, 16, 5, 4, 1);
    let set = drawn_pixels(&fb);
    for y in 12..=20 {
        let row: Vec<i32> = (0..32).filter(|&x| set.contains(&(x, y))).collect();
        assert!(!row.is_empty(), "empty row {y}");
        let (min, max) = (row[0], row[row.len() - 1]);
        assert_eq!(row.len() as i32, max - min + 1, "gap in row {y}");
    }
}

#[test]
fn rect_and_rectf_are_exact() {
    let mut fb = FrameBuffer::new(16, 16);
    fb.rect(2, 3, 4, 3, 1);
    let expected = set_of(&[
        (2, 3),
        (3, 3),
        (4, 3),
        (5, 3),
        (2, 4),
        (5, 4),
        (2, 5),
        (3, 5),
        (4, 5),
        (5, 5),
    ]);
    assert_eq!(drawn_pixels(&fb), expected);

    let mut fb = FrameBuffer::new(16, 16);
    fb.rectf(2, 3, 4, 3, 1);
    assert_eq!(drawn_pixels(&fb).len(), 12);
}

#[test]
fn camera_offsets_every_primitive() {
    let mut fb = FrameBuffer::new(16, 16);
    fb.set_camera(4, 2);
    fb.pset(5, 5, 1);
    assert_eq!(fb.pixels().pixel(1, 3), 1);
    // pget looks through the same camera.
    assert_eq!(fb.pget(5, 5), 1);
}

#[test]
fn clip_rectangle_bounds_writes() {
    let mut fb = FrameBuffer::new(16, 16);
    fb.clipper.set(4, 4, 8, 8);
    fb.rectf(0, 0, 16, 16, 1);
    let set = drawn_pixels(&fb);
    assert_eq!(set.len(), 16);
    for &(x, y) in &set {
        assert!((4..8).contains(&x) && (4..8).contains(&y));
    }
}

#[test]
fn dither_formula_truth_table() {
    // Bit x%4 + 4*(y%4): pattern 0x0001 only allows (0,0) in each 4x4 tile.
    assert!(dither_allows(0x0001, 0, 0));
    assert!(!dither_allows(0x0001, 1, 0));
    assert!(!dither_allows(0x0001, 0, 1));
    assert!(dither_allows(0x0001, 4, 4));
    // 0xFFFF allows everything, 0x0000 nothing.
    for y in 0..8 {
        for x in 0..8 {
            assert!(dither_allows(0xFFFF, x, y));
            assert!(!dither_allows(0x0000, x, y));
        }
    }
    // Checkerboard 0x5A5A: bit index parity alternates per row pair.
    assert_eq!(dither_allows(0x5A5A, 0, 0), false);
    assert_eq!(dither_allows(0x5A5A, 1, 0), true);
    assert_eq!(dither_allows(0x5A5A, 0, 1), true);
    assert_eq!(dither_allows(0x5A5A, 1, 1), false);
}

#[test]
fn dither_state_gates_pixel_writes() {
    let mut fb = FrameBuffer::new(8, 8);
    fb.blender.dither(0x0000);
    fb.rectf(0, 0, 8, 8, 1);
    assert!(drawn_pixels(&fb).is_empty());

    fb.blender.dither(0x0001);
    fb.rectf(0, 0, 8, 8, 1);
    assert_eq!(
        drawn_pixels(&fb),
        set_of(&[(0, 0), (4, 0), (0, 4), (4, 4)])
    );
}

#[test]
fn palette_remap_applies_at_write_time() {
    let mut fb = FrameBuffer::new(8, 8);
    fb.blender.pal(1, 9);
    fb.pset(0, 0, 1);
    assert_eq!(fb.pget(0, 0), 9);
    // Remap state persists until explicitly reset.
    fb.pset(1, 0, 1);
    assert_eq!(fb.pget(1, 0), 9);
    fb.blender.pal_reset();
    fb.pset(2, 0, 1);
    assert_eq!(fb.pget(2, 0), 1);
}

#[test]
fn buffer_state_save_restore_roundtrip() {
    let mut fb = FrameBuffer::new(8, 8);
    let clean = fb.save_state();
    fb.blender.pal(1, 2);
    fb.blender.dither(0x00FF);
    fb.set_camera(3, 3);
    fb.clipper.set(1, 1, 7, 7);
    let dirty = fb.save_state();

    fb.restore_state(clean);
    fb.pset(0, 0, 1);
    assert_eq!(fb.pget(0, 0), 1);

    fb.restore_state(dirty);
    assert_eq!(fb.blender.dither_pattern(), 0x00FF);
    assert_eq!(fb.camera, (3, 3));
}

#[test]
fn copy_from_respects_flips_and_transform() {
    let src = PixelArray::from_pixels(2, 2, vec![1, 2, 3, 4]);
    let mut dst = PixelArray::new(4, 4);
    dst.copy_from(&src, 0, 0, 0, 0, 2, 2, false, false, None);
    assert_eq!(dst.pixel(0, 0), 1);
    assert_eq!(dst.pixel(1, 1), 4);

    let mut flipped = PixelArray::new(4, 4);
    flipped.copy_from(&src, 0, 0, 0, 0, 2, 2, true, false, None);
    assert_eq!(flipped.pixel(0, 0), 2);
    assert_eq!(flipped.pixel(1, 0), 1);

    let mut both = PixelArray::new(4, 4);
    both.copy_from(&src, 0, 0, 0, 0, 2, 2, true, true, None);
    assert_eq!(both.pixel(0, 0), 4);

    let recolor = |c: u8| c + 10;
    let mut transformed = PixelArray::new(4, 4);
    transformed.copy_from(&src, 0, 0, 0, 0, 2, 2, false, false, Some(&recolor));
    assert_eq!(transformed.pixel(0, 0), 11);
}

#[test]
fn copy_from_skips_transparent_pixels() {
    let src = PixelArray::from_pixels(2, 1, vec![TRANSPARENT_INDEX, 5]);
    let mut dst = PixelArray::new(2, 1);
    dst.clear(9);
    dst.copy_from(&src, 0, 0, 0, 0, 2, 1, false, false, None);
    assert_eq!(dst.pixel(0, 0), 9);
    assert_eq!(dst.pixel(1, 0), 5);
}

#[test]
fn palette_lookup_and_nearest() {
    let palette = ColorPalette::from_hex(&[
        "#000000".to_string(),
        "#FF0000".to_string(),
        "#00FF00".to_string(),
    ])
    .unwrap();
    assert_eq!(palette.rgba(1), [255, 0, 0, 255]);
    // Indices wrap modulo the palette size.
    assert_eq!(palette.rgba(4), palette.rgba(1));
    assert_eq!(palette.nearest_index([250, 10, 10, 255]), 1);
    assert_eq!(palette.nearest_index([0, 0, 0, 0]), TRANSPARENT_INDEX);

    let table = palette.lookup_table();
    assert_eq!(&table[4..8], &[255, 0, 0, 255]);
    assert_eq!(&table[12..16], &[0, 0, 0, 255]);
}

#[test]
fn palette_too_large_is_rejected() {
    let entries: Vec<String> = (0..257).map(|_| "#123456".to_string()).collect();
    assert!(ColorPalette::from_hex(&entries).is_err());
    assert!(ColorPalette::from_hex(&["#12345".to_string()]).is_err());
    assert!(ColorPalette::from_hex(&["badhex".to_string()]).is_err());
}
