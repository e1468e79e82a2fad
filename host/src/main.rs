use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{error, info, Level};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::PhysicalKey,
    window::{Window, WindowAttributes, WindowId},
};

use console_core::audio::SoundOutput;
use console_core::config::{GameParameters, BOOT_SCRIPT, CONFIG_FILENAME, ENGINE_SCRIPT};
use console_core::engine::GameEngine;
use console_core::platform::Platform;
use console_core::present_math;
use console_core::protocol::{DebugMessage, DebugServer};
use console_core::renderer::{PresentStage, RenderContext, VirtualRenderer};
use console_scripting::host::LuaHost;

/// Filesystem-backed platform rooted at the game directory. The two
/// engine-owned boot scripts fall back to the built-in copies when the game
/// doesn't override them.
struct DesktopPlatform {
    root: PathBuf,
    recording: AtomicBool,
}

impl DesktopPlatform {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            recording: AtomicBool::new(false),
        }
    }
}

impl Platform for DesktopPlatform {
    fn create_byte_stream(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.root.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(_) if name == BOOT_SCRIPT => {
                Ok(include_str!("../builtin/_boot.lua").as_bytes().to_vec())
            }
            Err(_) if name == ENGINE_SCRIPT => {
                Ok(include_str!("../builtin/_engine.lua").as_bytes().to_vec())
            }
            Err(e) => Err(anyhow::anyhow!("read '{}' failed: {e}", path.display())),
        }
    }

    fn create_local_file(&self, name: &str, dir: Option<&str>) -> Result<PathBuf> {
        let mut path = self.root.clone();
        if let Some(dir) = dir {
            path.push(dir);
            std::fs::create_dir_all(&path)?;
        }
        path.push(name);
        Ok(path)
    }

    fn record(&self) {
        let now = !self.recording.fetch_xor(true, Ordering::Relaxed);
        info!("frame recording {}", if now { "started" } else { "stopped" });
    }

    fn screenshot(&self, rgba: &[u8], width: u32, height: u32) -> Result<()> {
        let image = image::RgbaImage::from_raw(width, height, rgba.to_vec())
            .ok_or_else(|| anyhow::anyhow!("screenshot buffer size mismatch"))?;
        let stamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = self.root.join(format!("screenshot-{stamp}.png"));
        image.save(&path)?;
        info!("screenshot saved to {}", path.display());
        Ok(())
    }
}

/// Polls declared resource files for modification and requests hot-reloads.
struct FileWatcher {
    root: PathBuf,
    mtimes: HashMap<String, SystemTime>,
}

impl FileWatcher {
    fn new(root: PathBuf, names: &[String]) -> Self {
        let mut mtimes = HashMap::new();
        for name in names {
            if let Ok(meta) = std::fs::metadata(root.join(name)) {
                if let Ok(modified) = meta.modified() {
                    mtimes.insert(name.clone(), modified);
                }
            }
        }
        Self { root, mtimes }
    }

    fn changed(&mut self) -> Vec<String> {
        let mut changed = Vec::new();
        for (name, last) in self.mtimes.iter_mut() {
            if let Ok(meta) = std::fs::metadata(self.root.join(name.as_str())) {
                if let Ok(modified) = meta.modified() {
                    if modified != *last {
                        *last = modified;
                        changed.push(name.clone());
                    }
                }
            }
        }
        changed
    }
}

struct Gpu {
    renderer: VirtualRenderer,
    present: PresentStage,
}

struct ConsoleApp {
    engine: GameEngine,
    name: String,
    resolution: (u32, u32),
    zoom: u32,
    hide_cursor: bool,
    window: Option<Arc<Window>>,
    gpu: Option<Gpu>,
    window_size: (u32, u32),
    watcher: FileWatcher,
    debug: Option<DebugServer>,
    frame: u64,
}

impl ConsoleApp {
    fn tick(&mut self) {
        self.frame += 1;

        // Hot-reload: watched files and debugger notifications.
        if self.frame % 30 == 0 {
            for name in self.watcher.changed() {
                info!("file changed: {name}");
                self.engine.request_reload(&name);
            }
        }
        if let Some(debug) = &self.debug {
            for message in debug.poll() {
                match message {
                    DebugMessage::Reload { script } => self.engine.request_reload(&script),
                    other => tracing::debug!("debug message: {other:?}"),
                }
            }
        }

        if let Err(e) = self.engine.advance() {
            error!("engine advance failed: {e}");
            self.engine.end();
            return;
        }
        if let Some(gpu) = self.gpu.as_mut() {
            if let Err(e) = self.engine.draw(&mut gpu.renderer) {
                error!("engine draw failed: {e}");
                return;
            }
            let logical = gpu.renderer.logical_size();
            let view = gpu.renderer.offscreen_view().clone();
            if let Err(e) = gpu.present.present(&view, logical) {
                tracing::warn!("present failed: {e}");
            }
        }
    }

    /// Window coordinates to canvas coordinates through the present rect.
    fn map_mouse(&self, x: f64, y: f64) -> (f64, f64) {
        let zoom = present_math::effective_zoom(
            self.window_size.0,
            self.window_size.1,
            self.resolution.0,
            self.resolution.1,
            self.zoom,
        );
        let rect = present_math::present_rect(
            self.window_size.0,
            self.window_size.1,
            self.resolution.0,
            self.resolution.1,
            zoom,
        );
        (
            (x - rect.x as f64) / zoom as f64,
            (y - rect.y as f64) / zoom as f64,
        )
    }
}

impl ApplicationHandler for ConsoleApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let width = self.resolution.0 * self.zoom;
        let height = self.resolution.1 * self.zoom;
        let attributes = WindowAttributes::default()
            .with_title(self.name.clone())
            .with_inner_size(PhysicalSize::new(width, height));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                error!("failed to create window: {e}");
                event_loop.exit();
                return;
            }
        };
        window.set_cursor_visible(!self.hide_cursor);
        self.window_size = (width, height);

        let gpu = pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
            let surface = instance.create_surface(window.clone())?;
            let ctx = RenderContext::new_for_surface(instance, &surface).await?;
            let renderer =
                VirtualRenderer::new(&ctx, self.resolution.0, self.resolution.1)?;
            let present = PresentStage::new(&ctx, surface, width, height, self.zoom)?;
            Ok::<Gpu, anyhow::Error>(Gpu { renderer, present })
        });
        match gpu {
            Ok(gpu) => {
                self.gpu = Some(gpu);
                self.window = Some(window);
                self.engine.start();
            }
            Err(e) => {
                // GPU init failures are fatal at startup.
                error!("GPU initialization failed: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                info!("window close requested");
                self.engine.end();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                self.window_size = (size.width, size.height);
                if let Some(gpu) = self.gpu.as_mut() {
                    gpu.present.resize(size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    self.engine
                        .input()
                        .borrow_mut()
                        .set_key(code as u32, event.state == ElementState::Pressed);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                let (x, y) = self.map_mouse(position.x, position.y);
                self.engine.input().borrow_mut().set_mouse_pos(x, y);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let index = match button {
                    MouseButton::Left => 0,
                    MouseButton::Right => 1,
                    MouseButton::Middle => 2,
                    _ => return,
                };
                self.engine
                    .input()
                    .borrow_mut()
                    .set_mouse_button(index, state == ElementState::Pressed);
            }
            WindowEvent::RedrawRequested => {
                self.tick();
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let mut game_dir = PathBuf::from(".");
    let mut debug_port: Option<u16> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--debug-port" => debug_port = args.next().and_then(|p| p.parse().ok()),
            other => game_dir = PathBuf::from(other),
        }
    }

    let config_path = game_dir.join(CONFIG_FILENAME);
    let config = std::fs::read_to_string(&config_path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", config_path.display()))?;
    let params = GameParameters::read(&config)?;
    let p = params.v1().clone();
    info!("starting '{}' ({}x{})", p.name, p.resolution.width, p.resolution.height);

    let platform = Arc::new(DesktopPlatform::new(game_dir.clone()));
    let engine = GameEngine::new(
        params,
        platform,
        |console, input| Ok(Box::new(LuaHost::new(console, input)?)),
        Box::new(SoundOutput::new()),
    )?;

    let watcher = FileWatcher::new(
        game_dir,
        &engine
            .declared()
            .iter()
            .map(|d| d.name.clone())
            .collect::<Vec<_>>(),
    );
    let debug = match debug_port {
        Some(port) => Some(DebugServer::bind(&format!("127.0.0.1:{port}"))?),
        None => None,
    };

    let mut app = ConsoleApp {
        engine,
        name: p.name,
        resolution: (p.resolution.width, p.resolution.height),
        zoom: p.zoom,
        hide_cursor: p.hide_mouse_cursor,
        window: None,
        gpu: None,
        window_size: (0, 0),
        watcher,
        debug,
        frame: 0,
    };

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    event_loop.run_app(&mut app)?;
    Ok(())
}
