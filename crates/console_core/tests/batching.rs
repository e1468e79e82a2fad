use console_core::batch::{
    BatchManager, BatchState, DrawCommand, DrawingMode, SpriteQuad, MAX_SPRITE_PER_COMMAND,
};
use console_core::pixels::{identity_remap, Clipper, PixelArray};
use console_core::renderer::{build_batch_vertices, scissor_rect};
use console_core::texture_units::{SpriteSheetKey, TextureUnitArena, MAX_TEXTURE_UNITS};

fn state(unit: u8, dither: u16) -> BatchState {
    BatchState {
        texture_unit: unit,
        dither,
        remap: identity_remap(),
        camera: (0, 0),
        clip: Clipper::full(256, 224),
        mode: DrawingMode::Default,
    }
}

fn quad(x: i32, y: i32) -> SpriteQuad {
    SpriteQuad {
        src_x: 0,
        src_y: 0,
        src_w: 8,
        src_h: 8,
        dst_x: x,
        dst_y: y,
        dst_w: 8,
        dst_h: 8,
        flip_x: false,
        flip_y: false,
    }
}

#[test]
fn identical_state_merges_into_one_batch() {
    let mut manager = BatchManager::new();
    for i in 0..100 {
        assert!(!manager.submit_sprite(state(1, 0xFFFF), quad(i, 0)));
    }
    let mut batches = Vec::new();
    manager.consume_all_batches(|c| batches.push(c));
    assert_eq!(batches.len(), 1);
    match &batches[0] {
        DrawCommand::Sprites(batch) => assert_eq!(batch.quads.len(), 100),
        other => panic!("expected sprite batch, got {other:?}"),
    }
}

#[test]
fn capacity_forces_flush_exactly_once() {
    let mut manager = BatchManager::new();
    let mut flush_signals = 0;
    for i in 0..=MAX_SPRITE_PER_COMMAND {
        if manager.submit_sprite(state(1, 0xFFFF), quad(i as i32, 0)) {
            flush_signals += 1;
        }
    }
    assert_eq!(flush_signals, 1, "exactly one call forces the flush");

    let mut batches = Vec::new();
    manager.consume_all_batches(|c| batches.push(c));
    assert_eq!(batches.len(), 2);
    match &batches[0] {
        DrawCommand::Sprites(batch) => {
            // All prior calls grouped into one full batch.
            assert_eq!(batch.quads.len(), MAX_SPRITE_PER_COMMAND);
        }
        other => panic!("expected sprite batch, got {other:?}"),
    }
    match &batches[1] {
        DrawCommand::Sprites(batch) => assert_eq!(batch.quads.len(), 1),
        other => panic!("expected sprite batch, got {other:?}"),
    }
}

#[test]
fn state_change_opens_new_batch_and_signals_flush() {
    let mut manager = BatchManager::new();
    assert!(!manager.submit_sprite(state(1, 0xFFFF), quad(0, 0)));
    // Different dither pattern: incompatible with the in-flight batch.
    assert!(manager.submit_sprite(state(1, 0x5A5A), quad(1, 0)));
    // Different texture unit: same.
    assert!(manager.submit_sprite(state(2, 0x5A5A), quad(2, 0)));
    assert_eq!(manager.pending_commands(), 3);
    assert_eq!(manager.pending_sprites(), 3);
}

#[test]
fn alternating_states_fragment_into_per_call_batches() {
    let mut manager = BatchManager::new();
    for i in 0..6 {
        let dither = if i % 2 == 0 { 0xFFFF } else { 0x00FF };
        manager.submit_sprite(state(1, dither), quad(i, 0));
    }
    assert_eq!(manager.pending_commands(), 6);
}

#[test]
fn camera_and_clip_participate_in_the_key() {
    let mut manager = BatchManager::new();
    let mut moved = state(1, 0xFFFF);
    moved.camera = (10, 0);
    assert!(!manager.submit_sprite(state(1, 0xFFFF), quad(0, 0)));
    assert!(manager.submit_sprite(moved, quad(1, 0)));
    assert_eq!(manager.pending_commands(), 2);
}

#[test]
fn clear_discards_pending_commands() {
    let mut manager = BatchManager::new();
    manager.submit_sprite(state(1, 0xFFFF), quad(0, 0));
    manager.submit_primitive_flush(PixelArray::new(4, 4));
    manager.submit_clear(3);
    let mut commands = Vec::new();
    manager.consume_all_batches(|c| commands.push(c));
    assert_eq!(commands.len(), 1);
    assert!(matches!(commands[0], DrawCommand::Clear(3)));
}

#[test]
fn primitive_flush_preserves_draw_order() {
    let mut manager = BatchManager::new();
    manager.submit_clear(0);
    manager.submit_sprite(state(1, 0xFFFF), quad(0, 0));
    manager.submit_primitive_flush(PixelArray::new(4, 4));
    manager.submit_sprite(state(1, 0xFFFF), quad(8, 0));
    let mut kinds = Vec::new();
    manager.consume_all_batches(|c| {
        kinds.push(match c {
            DrawCommand::Clear(_) => "clear",
            DrawCommand::Sprites(_) => "sprites",
            DrawCommand::Primitives(_) => "primitives",
        })
    });
    assert_eq!(kinds, vec!["clear", "sprites", "primitives", "sprites"]);
}

#[test]
fn submission_captures_state_immutably() {
    let mut manager = BatchManager::new();
    let mut s = state(1, 0xFFFF);
    manager.submit_sprite(s.clone(), quad(0, 0));
    // Later state changes must not affect the queued batch.
    s.dither = 0x0000;
    let mut batches = Vec::new();
    manager.consume_all_batches(|c| batches.push(c));
    match &batches[0] {
        DrawCommand::Sprites(batch) => assert_eq!(batch.state.dither, 0xFFFF),
        other => panic!("expected sprite batch, got {other:?}"),
    }
}

#[test]
fn batch_vertices_apply_camera_and_flips() {
    let mut s = state(1, 0xFFFF);
    s.camera = (5, 3);
    let mut batch_quad = quad(10, 10);
    batch_quad.flip_x = true;
    let batch = console_core::batch::SpriteBatch {
        state: s,
        quads: vec![batch_quad],
    };
    let vertices = build_batch_vertices(&batch);
    assert_eq!(vertices.len(), 4);
    assert_eq!(vertices[0].position, [5.0, 7.0]);
    assert_eq!(vertices[2].position, [13.0, 15.0]);
    // flip_x swaps the u texel range.
    assert_eq!(vertices[0].tex_coords, [8.0, 0.0]);
    assert_eq!(vertices[1].tex_coords, [0.0, 0.0]);
}

#[test]
fn scissor_rect_intersects_with_target() {
    let full = Clipper::full(256, 224);
    assert_eq!(scissor_rect(&full, 256, 224), Some((0, 0, 256, 224)));

    let mut partial = Clipper::full(256, 224);
    partial.set(-10, 20, 300, 100);
    assert_eq!(scissor_rect(&partial, 256, 224), Some((0, 20, 256, 80)));

    let mut empty = Clipper::full(256, 224);
    empty.set(50, 50, 50, 80);
    assert_eq!(scissor_rect(&empty, 256, 224), None);
}

#[test]
fn texture_unit_allocation_is_idempotent() {
    let mut arena = TextureUnitArena::new();
    let key_a = SpriteSheetKey::new(0, "tiles.png");
    let key_b = SpriteSheetKey::new(1, "actors.png");
    let a1 = arena.allocate(&key_a).unwrap();
    let b = arena.allocate(&key_b).unwrap();
    let a2 = arena.allocate(&key_a).unwrap();
    assert_eq!(a1, a2);
    assert_ne!(a1, b);
    // Unit 0 is reserved for the primitive layer.
    assert!(a1 >= 1 && b >= 1);
    assert_eq!(arena.lookup(&key_a), Some(a1));
}

#[test]
fn texture_unit_overflow_is_fatal() {
    let mut arena = TextureUnitArena::new();
    for i in 0..MAX_TEXTURE_UNITS - 1 {
        arena
            .allocate(&SpriteSheetKey::new(i, format!("sheet{i}.png")))
            .unwrap();
    }
    let err = arena
        .allocate(&SpriteSheetKey::new(99, "one-too-many.png"))
        .unwrap_err();
    assert!(err.to_string().contains("17"));
    // Existing keys still resolve after the failed allocation.
    assert_eq!(arena.lookup(&SpriteSheetKey::new(0, "sheet0.png")), Some(1));
}
