use crate::pixels::{Clipper, PixelArray};

/// Sprites per draw call before a flush is forced.
pub const MAX_SPRITE_PER_COMMAND: usize = 1024;

/// Render-pipeline state applied before each batch. Global state set by
/// script calls; the engine never auto-resets it, callers return it to
/// `Default` between independent draw groups. A `StencilWrite` pass only
/// makes sense paired with a later `StencilTest`/`StencilNotTest` pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawingMode {
    #[default]
    Default,
    AlphaBlend,
    StencilWrite,
    StencilTest,
    StencilNotTest,
}

/// GPU state a batch is keyed by. Any change opens a new batch; submissions
/// capture this state so later script calls never retroactively affect
/// queued draws.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchState {
    pub texture_unit: u8,
    pub dither: u16,
    pub remap: [u8; 256],
    pub camera: (i32, i32),
    pub clip: Clipper,
    pub mode: DrawingMode,
}

/// One sprite blit: source rect in sheet texels, destination rect in screen
/// pixels, flip flags.
#[derive(Debug, Clone, Copy)]
pub struct SpriteQuad {
    pub src_x: i32,
    pub src_y: i32,
    pub src_w: i32,
    pub src_h: i32,
    pub dst_x: i32,
    pub dst_y: i32,
    pub dst_w: i32,
    pub dst_h: i32,
    pub flip_x: bool,
    pub flip_y: bool,
}

#[derive(Debug, Clone)]
pub struct SpriteBatch {
    pub state: BatchState,
    pub quads: Vec<SpriteQuad>,
}

/// Ordered draw submissions for one frame. Primitive flushes carry a
/// snapshot of the CPU layer so primitives interleave with sprite batches
/// in z-order.
#[derive(Debug, Clone)]
pub enum DrawCommand {
    Clear(u8),
    Sprites(SpriteBatch),
    Primitives(PixelArray),
}

/// Coalesces per-sprite draw calls into per-state batches so hundreds of
/// sprites per frame become a handful of draw calls.
#[derive(Debug, Default)]
pub struct BatchManager {
    commands: Vec<DrawCommand>,
}

impl BatchManager {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// Append a quad to the in-flight batch, opening a new batch on any
    /// state change or when the active batch is full. Returns `true` when
    /// the caller must flush via [`Self::consume_all_batches`] before
    /// continuing: the active batch just reached capacity, or the
    /// submission was incompatible with the in-flight batch.
    pub fn submit_sprite(&mut self, state: BatchState, quad: SpriteQuad) -> bool {
        // A flush is only forced by the in-flight sprite batch: a state
        // change against it, or filling it to capacity. Clears and primitive
        // flushes open a new batch without forcing one.
        let (needs_new, state_changed, at_capacity) = match self.commands.last() {
            Some(DrawCommand::Sprites(batch)) => {
                let changed = batch.state != state;
                let full = batch.quads.len() >= MAX_SPRITE_PER_COMMAND;
                (changed || full, changed, full)
            }
            Some(_) => (true, false, false),
            None => (true, false, false),
        };
        if needs_new {
            self.commands.push(DrawCommand::Sprites(SpriteBatch {
                state,
                quads: Vec::with_capacity(64),
            }));
        }
        if let Some(DrawCommand::Sprites(batch)) = self.commands.last_mut() {
            batch.quads.push(quad);
            state_changed || (!at_capacity && batch.quads.len() >= MAX_SPRITE_PER_COMMAND)
        } else {
            false
        }
    }

    /// Record a snapshot of the primitive layer at this point in the draw
    /// order.
    pub fn submit_primitive_flush(&mut self, layer: PixelArray) {
        self.commands.push(DrawCommand::Primitives(layer));
    }

    /// Clear discards everything queued before it.
    pub fn submit_clear(&mut self, color: u8) {
        self.commands.clear();
        self.commands.push(DrawCommand::Clear(color));
    }

    /// Drain every pending command in submission order.
    pub fn consume_all_batches(&mut self, mut flush: impl FnMut(DrawCommand)) {
        for command in self.commands.drain(..) {
            flush(command);
        }
    }

    pub fn drain(&mut self) -> Vec<DrawCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    pub fn pending_sprites(&self) -> usize {
        self.commands
            .iter()
            .map(|c| match c {
                DrawCommand::Sprites(b) => b.quads.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
