use crate::error::ConsoleError;

/// Unit 0 is reserved for the primitive/boot layer.
pub const PRIMITIVE_UNIT: u8 = 0;
/// Hardware-reserved maximum: unit 0 plus units 1..=16 for spritesheets.
pub const MAX_TEXTURE_UNITS: usize = 17;

/// Logical identity of a spritesheet, stable across hot-reloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpriteSheetKey {
    pub index: usize,
    pub name: String,
}

impl SpriteSheetKey {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

/// Fixed-size slot arena mapping spritesheet identities to GPU texture
/// units. Allocation is idempotent: the same key always returns the slot it
/// was first assigned. Running out of slots is a fatal configuration error.
#[derive(Debug, Default)]
pub struct TextureUnitArena {
    slots: Vec<SpriteSheetKey>,
}

impl TextureUnitArena {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn lookup(&self, key: &SpriteSheetKey) -> Option<u8> {
        self.slots
            .iter()
            .position(|k| k == key)
            .map(|i| (i + 1) as u8)
    }

    pub fn allocate(&mut self, key: &SpriteSheetKey) -> Result<u8, ConsoleError> {
        if let Some(unit) = self.lookup(key) {
            return Ok(unit);
        }
        if self.slots.len() + 1 >= MAX_TEXTURE_UNITS {
            return Err(ConsoleError::TextureUnitOverflow {
                max: MAX_TEXTURE_UNITS,
            });
        }
        self.slots.push(key.clone());
        let unit = self.slots.len() as u8;
        tracing::debug!("Assigned texture unit {} to spritesheet '{}'", unit, key.name);
        Ok(unit)
    }

    pub fn allocated(&self) -> usize {
        self.slots.len()
    }
}
