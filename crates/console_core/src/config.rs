use serde::{Deserialize, Serialize};

use crate::error::ConsoleError;
use crate::pixels::ColorPalette;
use crate::resources::{ResourceDecl, ResourceKind};

/// Name of the game configuration file at the root of a game directory.
pub const CONFIG_FILENAME: &str = "_tiny.json";

/// Engine-owned scripts that always load before game content.
pub const BOOT_SCRIPT: &str = "_boot.lua";
pub const ENGINE_SCRIPT: &str = "_engine.lua";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// Versioned game configuration. The `version` tag selects the schema so
/// older games keep loading as the format evolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum GameParameters {
    V1(GameParametersV1),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameParametersV1 {
    pub name: String,
    pub resolution: Size,
    pub sprites: Size,
    pub zoom: u32,
    /// Ordered palette, `#RRGGBB` entries, at most 256.
    pub colors: Vec<String>,
    #[serde(default)]
    pub scripts: Vec<String>,
    #[serde(default)]
    pub spritesheets: Vec<String>,
    #[serde(default)]
    pub levels: Vec<String>,
    #[serde(default)]
    pub sounds: Vec<String>,
    #[serde(default)]
    pub libraries: Vec<String>,
    #[serde(default, rename = "hideMouseCursor")]
    pub hide_mouse_cursor: bool,
}

impl GameParameters {
    /// Parse and validate; malformed config fails fast with a descriptive
    /// message rather than being silently clamped.
    pub fn read(json: &str) -> Result<Self, ConsoleError> {
        let params: GameParameters =
            serde_json::from_str(json).map_err(|e| ConsoleError::Config(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn write(&self) -> Result<String, ConsoleError> {
        serde_json::to_string_pretty(self).map_err(|e| ConsoleError::Config(e.to_string()))
    }

    pub fn v1(&self) -> &GameParametersV1 {
        match self {
            GameParameters::V1(p) => p,
        }
    }

    pub fn validate(&self) -> Result<(), ConsoleError> {
        let p = self.v1();
        if p.resolution.width == 0 || p.resolution.height == 0 {
            return Err(ConsoleError::Config(format!(
                "resolution {}x{} must be positive",
                p.resolution.width, p.resolution.height
            )));
        }
        if p.sprites.width == 0 || p.sprites.height == 0 {
            return Err(ConsoleError::Config(format!(
                "sprite size {}x{} must be positive",
                p.sprites.width, p.sprites.height
            )));
        }
        if p.zoom == 0 {
            return Err(ConsoleError::Config("zoom must be at least 1".into()));
        }
        // Palette bounds and hex syntax are checked by the palette builder.
        self.palette()?;
        Ok(())
    }

    pub fn palette(&self) -> Result<ColorPalette, ConsoleError> {
        ColorPalette::from_hex(&self.v1().colors)
    }

    /// The full declared resource list in declaration order: the two
    /// mandatory engine scripts first, then game content.
    pub fn declared_resources(&self) -> Vec<ResourceDecl> {
        let p = self.v1();
        let mut declared = Vec::new();
        let mut declaration = 0usize;
        let mut push = |kind: ResourceKind, index: usize, name: &str| {
            declared.push(ResourceDecl {
                kind,
                index,
                name: name.to_string(),
                declaration,
            });
            declaration += 1;
        };
        push(ResourceKind::BootScript, 0, BOOT_SCRIPT);
        push(ResourceKind::EngineScript, 0, ENGINE_SCRIPT);
        for (i, name) in p.scripts.iter().enumerate() {
            push(ResourceKind::GameScript, i, name);
        }
        for (i, name) in p.spritesheets.iter().enumerate() {
            push(ResourceKind::SpriteSheet, i, name);
        }
        for (i, name) in p.levels.iter().enumerate() {
            push(ResourceKind::GameLevel, i, name);
        }
        for (i, name) in p.sounds.iter().enumerate() {
            push(ResourceKind::Sound, i, name);
        }
        declared
    }
}
