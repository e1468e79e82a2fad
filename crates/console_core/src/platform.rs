use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Contract each backend (desktop, web, ...) satisfies. Resource fetches run
/// on loader worker threads, so implementations must be thread-safe. The
/// recording hooks are best-effort; a backend may leave them as no-ops.
pub trait Platform: Send + Sync {
    /// Fetch a raw resource by name (script source, level data, ...).
    fn create_byte_stream(&self, name: &str) -> Result<Vec<u8>>;

    /// Fetch and decode an image resource. The default implementation
    /// decodes the byte stream with `image`.
    fn create_image_stream(&self, name: &str) -> Result<image::RgbaImage> {
        let bytes = self.create_byte_stream(name)?;
        Ok(image::load_from_memory(&bytes)?.to_rgba8())
    }

    /// Fetch a declarative sound resource.
    fn create_sound_stream(&self, name: &str) -> Result<Vec<u8>> {
        self.create_byte_stream(name)
    }

    /// Resolve a path for persistent game data (instrument edits, saves).
    fn create_local_file(&self, name: &str, dir: Option<&str>) -> Result<PathBuf>;

    /// Toggle frame recording. Best-effort.
    fn record(&self) {}

    /// Write a screenshot of the composited frame. Best-effort.
    fn screenshot(&self, _rgba: &[u8], _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }
}

/// In-memory platform for tests: a name → bytes map.
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        self.files
            .lock()
            .expect("memory platform poisoned")
            .insert(name.to_string(), bytes);
    }

    pub fn insert_text(&self, name: &str, text: &str) {
        self.insert(name, text.as_bytes().to_vec());
    }
}

impl Platform for MemoryPlatform {
    fn create_byte_stream(&self, name: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .expect("memory platform poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such resource '{name}'"))
    }

    fn create_local_file(&self, name: &str, dir: Option<&str>) -> Result<PathBuf> {
        let mut path = std::env::temp_dir();
        if let Some(dir) = dir {
            path.push(dir);
            std::fs::create_dir_all(&path)?;
        }
        path.push(name);
        Ok(path)
    }
}
