use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::pixels::{ColorPalette, PixelArray};
use crate::platform::Platform;
use crate::score::MusicalBar;
use crate::texture_units::SpriteSheetKey;

/// Upper bound on concurrently fetched resources.
pub const MAX_IN_FLIGHT: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    BootScript,
    EngineScript,
    GameScript,
    SpriteSheet,
    GameLevel,
    Sound,
    PrimitiveSpritesheet,
}

impl ResourceKind {
    /// Mandatory resources gate delivery of everything else.
    pub fn is_mandatory(self) -> bool {
        matches!(self, ResourceKind::BootScript | ResourceKind::EngineScript)
    }

    /// Flush priority: boot first, engine second, the rest by declaration.
    pub fn priority(self) -> u8 {
        match self {
            ResourceKind::BootScript => 0,
            ResourceKind::EngineScript => 1,
            _ => 2,
        }
    }
}

/// A declared resource: what to fetch and where it slots in.
#[derive(Debug, Clone)]
pub struct ResourceDecl {
    pub kind: ResourceKind,
    /// Slot within the resource type; stable for the process lifetime.
    pub index: usize,
    pub name: String,
    /// Global declaration sequence number, used for ordered delivery.
    pub declaration: usize,
}

/// Tile and entity records for one level, pre-digested by the level
/// pipeline (LDTk parsing happens upstream of this engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameLevel {
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub layers: Vec<LevelLayer>,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelLayer {
    pub name: String,
    #[serde(default)]
    pub tiles: Vec<TileRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub x: i32,
    pub y: i32,
    pub sheet_x: i32,
    pub sheet_y: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub fields: serde_json::Value,
}

/// Declarative sound resource: a list of bars played by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundData {
    #[serde(default)]
    pub bars: Vec<MusicalBar>,
}

#[derive(Debug, Clone)]
pub enum ResourcePayload {
    Script(String),
    Sheet(PixelArray),
    Level(GameLevel),
    Sound(SoundData),
}

/// Outcome of one fetch. Failures still flow through the collector so the
/// ordered delivery cursor never stalls on a missing file.
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    Loaded {
        decl: ResourceDecl,
        payload: ResourcePayload,
    },
    Failed {
        decl: ResourceDecl,
        reason: String,
    },
}

impl ResourceEvent {
    pub fn decl(&self) -> &ResourceDecl {
        match self {
            ResourceEvent::Loaded { decl, .. } => decl,
            ResourceEvent::Failed { decl, .. } => decl,
        }
    }
}

/// Resequences arbitrarily-ordered fetch completions into canonical order:
/// boot script, engine script, then everything else in declaration order.
/// Once the initial declared wave has been delivered, later events
/// (hot-reloads) pass straight through.
///
/// The reordering logic is pure; concurrency lives in [`ResourceLoader`].
#[derive(Debug)]
pub struct ResourceCollector {
    canonical: Vec<usize>,
    arrived: HashMap<usize, ResourceEvent>,
    cursor: usize,
}

impl ResourceCollector {
    pub fn new(declared: &[ResourceDecl]) -> Self {
        let mut canonical: Vec<&ResourceDecl> = declared.iter().collect();
        canonical.sort_by_key(|d| (d.kind.priority(), d.declaration));
        Self {
            canonical: canonical.iter().map(|d| d.declaration).collect(),
            arrived: HashMap::new(),
            cursor: 0,
        }
    }

    pub fn initial_wave_done(&self) -> bool {
        self.cursor >= self.canonical.len()
    }

    /// Feed one completion; returns every event now deliverable, in order.
    pub fn push(&mut self, event: ResourceEvent) -> Vec<ResourceEvent> {
        if self.initial_wave_done() {
            return vec![event];
        }
        self.arrived.insert(event.decl().declaration, event);
        let mut released = Vec::new();
        while self.cursor < self.canonical.len() {
            let next = self.canonical[self.cursor];
            match self.arrived.remove(&next) {
                Some(e) => {
                    released.push(e);
                    self.cursor += 1;
                }
                None => break,
            }
        }
        released
    }
}

/// Pure helper over [`ResourceCollector`] for tests and reasoning: run a
/// whole completion sequence through the collector at once.
pub fn resequence(declared: &[ResourceDecl], events: Vec<ResourceEvent>) -> Vec<ResourceEvent> {
    let mut collector = ResourceCollector::new(declared);
    let mut out = Vec::new();
    for event in events {
        out.extend(collector.push(event));
    }
    out
}

/// Fetches declared resources concurrently on a bounded worker pool. Workers
/// push completions into a channel; the single consumer (the engine tick)
/// drains it, so downstream registration stays single-threaded.
pub struct ResourceLoader {
    jobs: Sender<ResourceDecl>,
    events: Receiver<ResourceEvent>,
}

impl ResourceLoader {
    pub fn new(platform: Arc<dyn Platform>, palette: ColorPalette, workers: usize) -> Self {
        let (jobs, job_rx) = unbounded::<ResourceDecl>();
        let (event_tx, events) = unbounded::<ResourceEvent>();
        let workers = workers.clamp(1, MAX_IN_FLIGHT);
        for _ in 0..workers {
            let rx = job_rx.clone();
            let tx = event_tx.clone();
            let platform = platform.clone();
            let palette = palette.clone();
            std::thread::spawn(move || {
                while let Ok(decl) = rx.recv() {
                    let event = fetch_one(platform.as_ref(), &palette, decl);
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            });
        }
        Self { jobs, events }
    }

    /// Queue a fetch; used both for the initial wave and for hot-reloads.
    pub fn request(&self, decl: ResourceDecl) {
        if self.jobs.send(decl).is_err() {
            tracing::error!("resource loader worker pool is gone");
        }
    }

    /// Drain completions without blocking.
    pub fn poll(&self) -> Vec<ResourceEvent> {
        self.events.try_iter().collect()
    }
}

fn fetch_one(platform: &dyn Platform, palette: &ColorPalette, decl: ResourceDecl) -> ResourceEvent {
    match load_payload(platform, palette, &decl) {
        Ok(payload) => {
            tracing::info!("Loaded {:?} '{}'", decl.kind, decl.name);
            ResourceEvent::Loaded { decl, payload }
        }
        Err(e) => {
            tracing::warn!("Failed to load {:?} '{}': {}", decl.kind, decl.name, e);
            ResourceEvent::Failed {
                decl,
                reason: e.to_string(),
            }
        }
    }
}

fn load_payload(
    platform: &dyn Platform,
    palette: &ColorPalette,
    decl: &ResourceDecl,
) -> Result<ResourcePayload> {
    match decl.kind {
        ResourceKind::BootScript | ResourceKind::EngineScript | ResourceKind::GameScript => {
            let bytes = platform.create_byte_stream(&decl.name)?;
            Ok(ResourcePayload::Script(String::from_utf8(bytes)?))
        }
        ResourceKind::SpriteSheet | ResourceKind::PrimitiveSpritesheet => {
            let image = platform.create_image_stream(&decl.name)?;
            Ok(ResourcePayload::Sheet(index_image(&image, palette)))
        }
        ResourceKind::GameLevel => {
            let bytes = platform.create_byte_stream(&decl.name)?;
            Ok(ResourcePayload::Level(serde_json::from_slice(&bytes)?))
        }
        ResourceKind::Sound => {
            let bytes = platform.create_sound_stream(&decl.name)?;
            Ok(ResourcePayload::Sound(serde_json::from_slice(&bytes)?))
        }
    }
}

/// Quantize an RGBA image to palette indices.
pub fn index_image(image: &image::RgbaImage, palette: &ColorPalette) -> PixelArray {
    let (width, height) = image.dimensions();
    let mut pixels = Vec::with_capacity((width * height) as usize);
    for pixel in image.pixels() {
        pixels.push(palette.nearest_index(pixel.0));
    }
    PixelArray::from_pixels(width, height, pixels)
}

/// A loaded spritesheet: indexed pixels plus the identity used for texture
/// unit assignment. `dirty` flags a pending GPU re-upload.
#[derive(Debug, Clone)]
pub struct SpriteSheet {
    pub key: SpriteSheetKey,
    pub pixels: PixelArray,
    pub version: u32,
    pub dirty: bool,
}

#[derive(Debug, Clone)]
pub struct ScriptResource {
    pub index: usize,
    pub name: String,
    pub version: u32,
    pub reload: bool,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct SoundResource {
    pub index: usize,
    pub name: String,
    pub version: u32,
    pub data: SoundData,
}

#[derive(Debug, Clone)]
pub struct LevelResource {
    pub index: usize,
    pub name: String,
    pub version: u32,
    pub level: GameLevel,
}

/// Indexed storage for loaded resources. Mutated only from the engine tick
/// (the collector's single consumer), so no locking is required. Failed
/// loads leave their slot empty; consumers null-check and degrade.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    pub boot_script: Option<ScriptResource>,
    pub engine_script: Option<ScriptResource>,
    pub game_scripts: Vec<Option<ScriptResource>>,
    pub spritesheets: Vec<Option<SpriteSheet>>,
    pub levels: Vec<Option<LevelResource>>,
    pub sounds: Vec<Option<SoundResource>>,
    pub primitive_sheet: Option<SpriteSheet>,
    versions: HashMap<(ResourceKind, String), u32>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next version for a (kind, name) pair; the second and later stamps of
    /// the same pair mark a reload.
    fn stamp(&mut self, kind: ResourceKind, name: &str) -> (u32, bool) {
        let version = self
            .versions
            .entry((kind, name.to_string()))
            .and_modify(|v| *v += 1)
            .or_insert(1);
        (*version, *version > 1)
    }

    /// Register a loaded resource into its slot and return whether it was a
    /// reload. Failures are not registered; callers log them.
    pub fn register(&mut self, decl: &ResourceDecl, payload: ResourcePayload) -> bool {
        let (version, reload) = self.stamp(decl.kind, &decl.name);
        match (decl.kind, payload) {
            (ResourceKind::BootScript, ResourcePayload::Script(source)) => {
                self.boot_script = Some(ScriptResource {
                    index: decl.index,
                    name: decl.name.clone(),
                    version,
                    reload,
                    source,
                });
            }
            (ResourceKind::EngineScript, ResourcePayload::Script(source)) => {
                self.engine_script = Some(ScriptResource {
                    index: decl.index,
                    name: decl.name.clone(),
                    version,
                    reload,
                    source,
                });
            }
            (ResourceKind::GameScript, ResourcePayload::Script(source)) => {
                grow(&mut self.game_scripts, decl.index);
                self.game_scripts[decl.index] = Some(ScriptResource {
                    index: decl.index,
                    name: decl.name.clone(),
                    version,
                    reload,
                    source,
                });
            }
            (ResourceKind::SpriteSheet, ResourcePayload::Sheet(pixels)) => {
                grow(&mut self.spritesheets, decl.index);
                self.spritesheets[decl.index] = Some(SpriteSheet {
                    key: SpriteSheetKey::new(decl.index, decl.name.clone()),
                    pixels,
                    version,
                    dirty: true,
                });
            }
            (ResourceKind::PrimitiveSpritesheet, ResourcePayload::Sheet(pixels)) => {
                self.primitive_sheet = Some(SpriteSheet {
                    key: SpriteSheetKey::new(decl.index, decl.name.clone()),
                    pixels,
                    version,
                    dirty: true,
                });
            }
            (ResourceKind::GameLevel, ResourcePayload::Level(level)) => {
                grow(&mut self.levels, decl.index);
                self.levels[decl.index] = Some(LevelResource {
                    index: decl.index,
                    name: decl.name.clone(),
                    version,
                    level,
                });
            }
            (ResourceKind::Sound, ResourcePayload::Sound(data)) => {
                grow(&mut self.sounds, decl.index);
                self.sounds[decl.index] = Some(SoundResource {
                    index: decl.index,
                    name: decl.name.clone(),
                    version,
                    data,
                });
            }
            (kind, _) => {
                tracing::error!("payload type mismatch for {:?} '{}'", kind, decl.name);
            }
        }
        reload
    }

    pub fn spritesheet(&self, index: usize) -> Option<&SpriteSheet> {
        self.spritesheets.get(index).and_then(|s| s.as_ref())
    }

    pub fn sound(&self, index: usize) -> Option<&SoundResource> {
        self.sounds.get(index).and_then(|s| s.as_ref())
    }

    pub fn level(&self, index: usize) -> Option<&LevelResource> {
        self.levels.get(index).and_then(|l| l.as_ref())
    }

    pub fn game_script(&self, index: usize) -> Option<&ScriptResource> {
        self.game_scripts.get(index).and_then(|s| s.as_ref())
    }
}

fn grow<T>(slots: &mut Vec<Option<T>>, index: usize) {
    if slots.len() <= index {
        slots.resize_with(index + 1, || None);
    }
}
