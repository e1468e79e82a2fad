use anyhow::Result;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use winit::keyboard::KeyCode;

use crate::audio::VirtualSoundBoard;
use crate::batch::{BatchManager, BatchState, DrawingMode, SpriteQuad};
use crate::config::GameParameters;
use crate::error::ConsoleError;
use crate::font;
use crate::input::{InputState, Shortcut};
use crate::metrics::MetricsCollector;
use crate::pixels::{BufferState, ColorPalette, FrameBuffer, TRANSPARENT_INDEX};
use crate::platform::Platform;
use crate::renderer::VirtualRenderer;
use crate::resources::{
    ResourceCollector, ResourceDecl, ResourceEvent, ResourceKind, ResourceLoader, ResourcePayload,
    ResourceRegistry, MAX_IN_FLIGHT,
};
use crate::texture_units::TextureUnitArena;
use crate::time::FixedTimeStep;

/// Serializable key/value snapshot of script state, captured before a
/// reload and restored after re-evaluation.
pub type ScriptSnapshot = HashMap<String, serde_json::Value>;

/// Seam between the engine and the scripting runtime. The host keeps one
/// "current" game script; engine-owned scripts (names starting with `_`)
/// evaluate into the shared base environment instead.
///
/// `eval` must leave the previous good environment current when evaluation
/// fails, so the loop keeps running last-good state.
pub trait ScriptHost {
    fn eval(&mut self, name: &str, source: &str) -> Result<(), ConsoleError>;
    /// Make the named game script the one receiving lifecycle callbacks.
    fn set_current(&mut self, name: &str);
    fn call_init(&mut self) -> Result<(), ConsoleError>;
    fn call_update(&mut self, dt: f64) -> Result<(), ConsoleError>;
    fn call_draw(&mut self) -> Result<(), ConsoleError>;
    fn snapshot(&mut self) -> ScriptSnapshot;
    fn restore(&mut self, snapshot: &ScriptSnapshot);
    /// Drains the exit sentinel: `Some(index)` requests a switch to the
    /// game script at `index`.
    fn exited(&mut self) -> Option<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Idle,
    Loading,
    Running,
    ScriptSwitch(usize),
    ScriptReload,
    Ended,
}

/// Queued sound request from scripts, drained once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundCommand {
    pub sound: usize,
    pub bar: usize,
}

const POPUP_TTL_STEPS: u32 = 240;
const POPUP_FG: u8 = 7;
const POPUP_BG: u8 = 0;

#[derive(Debug, Clone)]
pub struct Popup {
    pub message: String,
    pub ttl: u32,
}

/// The draw/sound surface scripts talk to, shared between the engine and
/// the script bindings on the single game thread.
///
/// Blend state (palette remap, dither) deliberately persists across frames;
/// only explicit `reset`/`restore` calls change it.
pub struct VirtualConsole {
    pub fb: FrameBuffer,
    pub batches: BatchManager,
    pub arena: TextureUnitArena,
    pub registry: ResourceRegistry,
    pub mode: DrawingMode,
    primitive_dirty: bool,
    uploads: Vec<(u8, usize)>,
    state_stack: Vec<(BufferState, DrawingMode)>,
    sound_queue: Vec<SoundCommand>,
    sprite_size: (i32, i32),
    time: f64,
    rng: u64,
    fatal: Option<ConsoleError>,
}

impl VirtualConsole {
    pub fn new(width: u32, height: u32, sprite_size: (u32, u32), seed: u64) -> Self {
        let mut fb = FrameBuffer::new(width, height);
        fb.clear_raw(TRANSPARENT_INDEX);
        Self {
            fb,
            batches: BatchManager::new(),
            arena: TextureUnitArena::new(),
            registry: ResourceRegistry::new(),
            mode: DrawingMode::Default,
            primitive_dirty: false,
            uploads: Vec::new(),
            state_stack: Vec::new(),
            sound_queue: Vec::new(),
            sprite_size: (sprite_size.0 as i32, sprite_size.1 as i32),
            time: 0.0,
            rng: seed,
            fatal: None,
        }
    }

    pub fn sprite_size(&self) -> (i32, i32) {
        self.sprite_size
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn advance_time(&mut self, dt: f64) {
        self.time += dt;
    }

    /// Deterministic engine RNG in [0, 1).
    pub fn random(&mut self) -> f64 {
        self.rng = self
            .rng
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.rng >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn take_fatal(&mut self) -> Option<ConsoleError> {
        self.fatal.take()
    }

    // --- primitive path ---------------------------------------------------

    pub fn cls(&mut self, color: u8) {
        let mapped = self.fb.blender.apply(color);
        self.batches.submit_clear(mapped);
        self.fb.clear_raw(TRANSPARENT_INDEX);
        self.primitive_dirty = false;
    }

    pub fn pset(&mut self, x: i32, y: i32, color: u8) {
        self.fb.pset(x, y, color);
        self.primitive_dirty = true;
    }

    pub fn pget(&self, x: i32, y: i32) -> u8 {
        self.fb.pget(x, y)
    }

    pub fn line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: u8) {
        self.fb.line(x0, y0, x1, y1, color);
        self.primitive_dirty = true;
    }

    pub fn rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: u8) {
        self.fb.rect(x, y, w, h, color);
        self.primitive_dirty = true;
    }

    pub fn rectf(&mut self, x: i32, y: i32, w: i32, h: i32, color: u8) {
        self.fb.rectf(x, y, w, h, color);
        self.primitive_dirty = true;
    }

    pub fn circ(&mut self, cx: i32, cy: i32, r: i32, color: u8) {
        self.fb.circ(cx, cy, r, color);
        self.primitive_dirty = true;
    }

    pub fn circf(&mut self, cx: i32, cy: i32, r: i32, color: u8) {
        self.fb.circf(cx, cy, r, color);
        self.primitive_dirty = true;
    }

    pub fn oval(&mut self, cx: i32, cy: i32, rx: i32, ry: i32, color: u8) {
        self.fb.oval(cx, cy, rx, ry, color);
        self.primitive_dirty = true;
    }

    pub fn ovalf(&mut self, cx: i32, cy: i32, rx: i32, ry: i32, color: u8) {
        self.fb.ovalf(cx, cy, rx, ry, color);
        self.primitive_dirty = true;
    }

    pub fn print(&mut self, text: &str, x: i32, y: i32, color: u8) {
        font::draw_text(&mut self.fb, text, x, y, color);
        self.primitive_dirty = true;
    }

    // --- blend state ------------------------------------------------------

    pub fn pal(&mut self, from: u8, to: u8) {
        self.fb.blender.pal(from, to);
    }

    pub fn pal_reset(&mut self) {
        self.fb.blender.pal_reset();
    }

    pub fn dither(&mut self, pattern: u16) {
        self.fb.blender.dither(pattern);
    }

    pub fn camera(&mut self, x: i32, y: i32) {
        self.fb.set_camera(x, y);
    }

    pub fn clip(&mut self, left: i32, top: i32, right: i32, bottom: i32) {
        self.fb.clipper.set(left, top, right, bottom);
    }

    pub fn clip_reset(&mut self) {
        let (w, h) = (self.fb.width(), self.fb.height());
        self.fb.clipper.set(0, 0, w, h);
    }

    pub fn save_state(&mut self) {
        self.state_stack.push((self.fb.save_state(), self.mode));
    }

    pub fn restore_state(&mut self) {
        if let Some((state, mode)) = self.state_stack.pop() {
            self.fb.restore_state(state);
            self.mode = mode;
        }
    }

    pub fn reset_state(&mut self) {
        self.fb.reset_state();
        self.mode = DrawingMode::Default;
    }

    pub fn set_mode(&mut self, mode: DrawingMode) {
        self.mode = mode;
    }

    // --- sprite path ------------------------------------------------------

    /// Queue a sprite blit. The current blend state is captured into the
    /// batch key at this point. A missing spritesheet degrades to a no-op.
    pub fn draw_sprite(&mut self, sheet: usize, quad: SpriteQuad) {
        let Some(sheet_res) = self.registry.spritesheets.get(sheet).and_then(|s| s.as_ref())
        else {
            return;
        };
        let key = sheet_res.key.clone();
        let dirty = sheet_res.dirty;
        let unit = match self.arena.allocate(&key) {
            Ok(unit) => unit,
            Err(e) => {
                // Texture unit exhaustion is a fatal configuration error.
                self.fatal = Some(e);
                return;
            }
        };
        if dirty && !self.uploads.contains(&(unit, sheet)) {
            self.uploads.push((unit, sheet));
        }
        self.flush_primitives();
        let state = BatchState {
            texture_unit: unit,
            dither: self.fb.blender.dither_pattern(),
            remap: self.fb.blender.remap_table(),
            camera: self.fb.camera,
            clip: self.fb.clipper,
            mode: self.mode,
        };
        // The flush signal is handled at frame granularity: commands stay
        // ordered in the manager and the engine consumes them all in draw().
        let _ = self.batches.submit_sprite(state, quad);
    }

    /// Draw sprite number `index` from a sheet laid out on the configured
    /// sprite grid.
    #[allow(clippy::too_many_arguments)]
    pub fn spr(&mut self, sheet: usize, index: i32, x: i32, y: i32, flip_x: bool, flip_y: bool) {
        let Some(sheet_res) = self.registry.spritesheets.get(sheet).and_then(|s| s.as_ref())
        else {
            return;
        };
        let (sw, sh) = self.sprite_size;
        let per_row = (sheet_res.pixels.width() / sw).max(1);
        let src_x = (index % per_row) * sw;
        let src_y = (index / per_row) * sh;
        self.draw_sprite(
            sheet,
            SpriteQuad {
                src_x,
                src_y,
                src_w: sw,
                src_h: sh,
                dst_x: x,
                dst_y: y,
                dst_w: sw,
                dst_h: sh,
                flip_x,
                flip_y,
            },
        );
    }

    /// Draw a loaded level's tile layers using the given spritesheet.
    pub fn draw_level(&mut self, level: usize, sheet: usize, offset_x: i32, offset_y: i32) {
        let Some(level_res) = self.registry.levels.get(level).and_then(|l| l.as_ref()) else {
            return;
        };
        let (sw, sh) = self.sprite_size;
        let tiles: Vec<SpriteQuad> = level_res
            .level
            .layers
            .iter()
            .flat_map(|layer| layer.tiles.iter())
            .map(|tile| SpriteQuad {
                src_x: tile.sheet_x,
                src_y: tile.sheet_y,
                src_w: sw,
                src_h: sh,
                dst_x: offset_x + tile.x,
                dst_y: offset_y + tile.y,
                dst_w: sw,
                dst_h: sh,
                flip_x: false,
                flip_y: false,
            })
            .collect();
        for quad in tiles {
            self.draw_sprite(sheet, quad);
        }
    }

    /// Snapshot the dirty primitive layer into the draw order and wipe it.
    pub fn flush_primitives(&mut self) {
        if self.primitive_dirty {
            self.batches
                .submit_primitive_flush(self.fb.pixels().clone());
            self.fb.clear_raw(TRANSPARENT_INDEX);
            self.primitive_dirty = false;
        }
    }

    pub fn take_uploads(&mut self) -> Vec<(u8, usize)> {
        std::mem::take(&mut self.uploads)
    }

    // --- sound ------------------------------------------------------------

    pub fn sfx(&mut self, sound: usize, bar: usize) {
        self.sound_queue.push(SoundCommand { sound, bar });
    }

    pub fn take_sound_commands(&mut self) -> Vec<SoundCommand> {
        std::mem::take(&mut self.sound_queue)
    }
}

/// Fixed-timestep driver: drains resource events, advances scripts, renders
/// once per host frame, and reports performance.
pub struct GameEngine {
    params: GameParameters,
    palette: ColorPalette,
    mode: EngineMode,
    declared: Vec<ResourceDecl>,
    collector: ResourceCollector,
    loader: ResourceLoader,
    console: Rc<RefCell<VirtualConsole>>,
    input: Rc<RefCell<InputState>>,
    host: Box<dyn ScriptHost>,
    sound: Box<dyn VirtualSoundBoard>,
    platform: Arc<dyn Platform>,
    timestep: FixedTimeStep,
    metrics: MetricsCollector,
    popups: Vec<Popup>,
    current_script: usize,
    script_paused: bool,
    screenshot_requested: bool,
    profiler_enabled: bool,
    frame_count: u64,
}

impl GameEngine {
    /// Build the engine. The script host is constructed through a callback
    /// because it binds against the shared console and input handles the
    /// engine owns.
    pub fn new(
        params: GameParameters,
        platform: Arc<dyn Platform>,
        host_builder: impl FnOnce(
            Rc<RefCell<VirtualConsole>>,
            Rc<RefCell<InputState>>,
        ) -> Result<Box<dyn ScriptHost>>,
        sound: Box<dyn VirtualSoundBoard>,
    ) -> Result<Self> {
        params.validate()?;
        let palette = params.palette()?;
        let p = params.v1();
        let console = Rc::new(RefCell::new(VirtualConsole::new(
            p.resolution.width,
            p.resolution.height,
            (p.sprites.width, p.sprites.height),
            0x9E3779B97F4A7C15,
        )));
        let input = Rc::new(RefCell::new(InputState::new()));
        let host = host_builder(console.clone(), input.clone())?;
        let declared = params.declared_resources();
        let collector = ResourceCollector::new(&declared);
        let workers = declared.len().clamp(1, MAX_IN_FLIGHT);
        let loader = ResourceLoader::new(platform.clone(), palette.clone(), workers);
        Ok(Self {
            params,
            palette,
            mode: EngineMode::Idle,
            declared,
            collector,
            loader,
            console,
            input,
            host,
            sound,
            platform,
            timestep: FixedTimeStep::new(),
            metrics: MetricsCollector::new(),
            popups: Vec::new(),
            current_script: 0,
            script_paused: false,
            screenshot_requested: false,
            profiler_enabled: false,
            frame_count: 0,
        })
    }

    pub fn params(&self) -> &GameParameters {
        &self.params
    }

    pub fn declared(&self) -> &[ResourceDecl] {
        &self.declared
    }

    pub fn palette(&self) -> &ColorPalette {
        &self.palette
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn console(&self) -> Rc<RefCell<VirtualConsole>> {
        self.console.clone()
    }

    pub fn input(&self) -> Rc<RefCell<InputState>> {
        self.input.clone()
    }

    pub fn popups(&self) -> &[Popup] {
        &self.popups
    }

    /// Kick off the initial resource wave.
    pub fn start(&mut self) {
        for decl in self.declared.clone() {
            self.loader.request(decl);
        }
        self.mode = EngineMode::Loading;
        tracing::info!(
            "loading {} declared resources for '{}'",
            self.declared.len(),
            self.params.v1().name
        );
    }

    /// Request a hot-reload of a resource by name (file watcher, debug
    /// protocol). In-flight loads are never cancelled; last writer wins by
    /// version.
    pub fn request_reload(&mut self, name: &str) {
        if let Some(decl) = self.declared.iter().find(|d| d.name == name).cloned() {
            self.loader.request(decl);
        } else {
            tracing::warn!("reload requested for undeclared resource '{}'", name);
        }
    }

    pub fn end(&mut self) {
        self.mode = EngineMode::Ended;
    }

    /// One engine tick: drain resource events, then run as many fixed logic
    /// steps as the accumulator allows. Rendering happens separately in
    /// [`Self::draw`], exactly once per host frame.
    pub fn advance(&mut self) -> Result<()> {
        if matches!(self.mode, EngineMode::Idle | EngineMode::Ended) {
            return Ok(());
        }

        for raw in self.loader.poll() {
            for event in self.collector.push(raw) {
                self.apply_event(event);
            }
        }

        if self.mode == EngineMode::Loading {
            let console = self.console.borrow();
            let booted =
                console.registry.boot_script.is_some() && console.registry.engine_script.is_some();
            drop(console);
            if self.collector.initial_wave_done() && booted {
                if let Err(e) = self.host.call_init() {
                    self.report_script_error(e);
                }
                self.mode = EngineMode::Running;
                tracing::info!("boot complete, entering Running");
            } else {
                return Ok(());
            }
        }

        if let Some(target) = self.host.exited() {
            self.switch_script(target);
        }

        let steps = self.timestep.begin_frame();
        self.metrics.record_logic_steps(steps);
        for _ in 0..steps {
            self.poll_shortcuts();
            if !self.script_paused {
                if let Err(e) = self.host.call_update(self.timestep.fixed_dt()) {
                    self.report_script_error(e);
                    self.script_paused = true;
                }
            }
            self.console.borrow_mut().advance_time(self.timestep.fixed_dt());
            self.input.borrow_mut().end_step();
            for popup in &mut self.popups {
                popup.ttl = popup.ttl.saturating_sub(1);
            }
            self.popups.retain(|p| p.ttl > 0);
        }

        // Sound requests issued by scripts this tick.
        let commands = self.console.borrow_mut().take_sound_commands();
        for command in commands {
            let bar = {
                let console = self.console.borrow();
                console
                    .registry
                    .sound(command.sound)
                    .and_then(|s| s.data.bars.get(command.bar))
                    .cloned()
            };
            match bar {
                Some(bar) => self.sound.play_bar(&bar),
                None => tracing::warn!(
                    "sfx request for missing sound {} bar {}",
                    command.sound,
                    command.bar
                ),
            }
        }

        if let Some(fatal) = self.console.borrow_mut().take_fatal() {
            return Err(fatal.into());
        }
        Ok(())
    }

    /// Render once per host frame: run the script draw callback, flush the
    /// batch queue into the GPU stages, and overlay popups.
    pub fn draw(&mut self, renderer: &mut VirtualRenderer) -> Result<()> {
        self.metrics.begin_frame();
        self.frame_count += 1;

        if self.mode == EngineMode::Running && !self.script_paused {
            if let Err(e) = self.host.call_draw() {
                self.report_script_error(e);
                self.script_paused = true;
            }
        }

        let (commands, uploads, sprites) = {
            let mut console = self.console.borrow_mut();
            console.flush_primitives();
            if !self.popups.is_empty() {
                Self::render_popups(&mut console, &self.popups);
            }
            let uploads = console.take_uploads();
            let sprites = console.batches.pending_sprites() as u32;
            (console.batches.drain(), uploads, sprites)
        };

        {
            let mut console = self.console.borrow_mut();
            for (unit, index) in uploads {
                if let Some(sheet) = console
                    .registry
                    .spritesheets
                    .get_mut(index)
                    .and_then(|s| s.as_mut())
                {
                    renderer.upload_sheet(unit, &sheet.pixels);
                    sheet.dirty = false;
                }
            }
        }

        renderer.set_palette(&self.palette);
        renderer.render_commands(&commands, &self.palette);

        if self.screenshot_requested {
            self.screenshot_requested = false;
            let (w, h) = renderer.logical_size();
            match renderer.read_rgba() {
                Ok(rgba) => {
                    if let Err(e) = self.platform.screenshot(&rgba, w, h) {
                        tracing::warn!("screenshot failed: {e}");
                    }
                }
                Err(e) => tracing::warn!("screenshot readback failed: {e}"),
            }
        }

        self.metrics.record_draw(renderer.last_draw_calls(), sprites);
        self.metrics.end_frame();
        if self.profiler_enabled && self.frame_count % 300 == 0 {
            let stats = self.metrics.performance_stats();
            tracing::info!(
                "frame stats: mean={:.2}ms p99={:.2}ms draw_calls_max={:.0}",
                stats.get("cpu_frame_mean_ms").unwrap_or(&0.0),
                stats.get("cpu_frame_p99_ms").unwrap_or(&0.0),
                stats.get("draw_calls_max").unwrap_or(&0.0),
            );
        }
        Ok(())
    }

    fn apply_event(&mut self, event: ResourceEvent) {
        match event {
            ResourceEvent::Failed { decl, reason } => {
                tracing::warn!("{:?} '{}' failed to load: {}", decl.kind, decl.name, reason);
                if decl.kind.is_mandatory() {
                    self.push_popup(format!("BOOT FAILED: {}", decl.name));
                }
            }
            ResourceEvent::Loaded { decl, payload } => {
                let script_source = match &payload {
                    ResourcePayload::Script(source) => Some(source.clone()),
                    _ => None,
                };
                let reload = self
                    .console
                    .borrow_mut()
                    .registry
                    .register(&decl, payload);
                if let Some(source) = script_source {
                    self.apply_script(&decl, &source, reload);
                }
            }
        }
    }

    fn apply_script(&mut self, decl: &ResourceDecl, source: &str, reload: bool) {
        let is_current_game_script =
            decl.kind == ResourceKind::GameScript && decl.index == self.current_script;
        if reload && is_current_game_script {
            // Snapshot script state, re-evaluate, restore. The host keeps
            // the old environment current if evaluation fails.
            let was = self.mode;
            self.mode = EngineMode::ScriptReload;
            let snapshot = self.host.snapshot();
            match self.host.eval(&decl.name, source) {
                Ok(()) => {
                    self.host.restore(&snapshot);
                    self.script_paused = false;
                    self.push_popup(format!("RELOADED {}", decl.name));
                }
                Err(e) => self.report_script_error(e),
            }
            self.mode = if was == EngineMode::Loading {
                EngineMode::Loading
            } else {
                EngineMode::Running
            };
        } else if let Err(e) = self.host.eval(&decl.name, source) {
            self.report_script_error(e);
            if is_current_game_script {
                self.script_paused = true;
            }
        } else if is_current_game_script {
            self.script_paused = false;
        }
    }

    fn switch_script(&mut self, target: usize) {
        self.mode = EngineMode::ScriptSwitch(target);
        let script = self
            .console
            .borrow()
            .registry
            .game_script(target)
            .cloned();
        match script {
            Some(script) => {
                self.host.set_current(&script.name);
                match self
                    .host
                    .eval(&script.name, &script.source)
                    .and_then(|_| self.host.call_init())
                {
                    Ok(()) => {
                        self.current_script = target;
                        self.script_paused = false;
                        tracing::info!("switched to script {} ('{}')", target, script.name);
                    }
                    Err(e) => self.report_script_error(e),
                }
            }
            None => self.push_popup(format!("NO SCRIPT {}", target)),
        }
        self.mode = EngineMode::Running;
    }

    fn poll_shortcuts(&mut self) {
        let input = self.input.borrow();
        let mut triggered = Vec::new();
        if input.key_pressed(KeyCode::F2 as u32) {
            triggered.push(Shortcut::Screenshot);
        }
        if input.key_pressed(KeyCode::F3 as u32) {
            triggered.push(Shortcut::Record);
        }
        if input.key_pressed(KeyCode::F7 as u32) {
            triggered.push(Shortcut::ProfilerToggle);
        }
        drop(input);
        for shortcut in triggered {
            match shortcut {
                Shortcut::Screenshot => self.screenshot_requested = true,
                Shortcut::Record => self.platform.record(),
                Shortcut::ProfilerToggle => {
                    self.profiler_enabled = !self.profiler_enabled;
                    tracing::info!("profiler {}", self.profiler_enabled);
                }
            }
        }
    }

    fn report_script_error(&mut self, error: ConsoleError) {
        tracing::error!("{error}");
        let message = match &error {
            ConsoleError::Script {
                script,
                line,
                message,
                ..
            } => format!("{script}:{line} {message}"),
            other => other.to_string(),
        };
        self.push_popup(message);
    }

    fn push_popup(&mut self, message: String) {
        self.popups.push(Popup {
            message,
            ttl: POPUP_TTL_STEPS,
        });
        if self.popups.len() > 4 {
            self.popups.remove(0);
        }
    }

    /// Popups draw over everything through the primitive layer, with the
    /// script's blend state saved around them.
    fn render_popups(console: &mut VirtualConsole, popups: &[Popup]) {
        console.save_state();
        console.reset_state();
        let width = console.fb.width();
        for (i, popup) in popups.iter().enumerate() {
            let y = 2 + i as i32 * font::LINE_ADVANCE;
            let max_chars = ((width - 4) / font::CHAR_ADVANCE) as usize;
            let message: String = popup.message.chars().take(max_chars).collect();
            console.rectf(1, y - 1, font::text_width(&message) + 2, font::LINE_ADVANCE, POPUP_BG);
            console.print(&message, 2, y, POPUP_FG);
        }
        console.restore_state();
        console.flush_primitives();
    }
}
