use crate::error::ConsoleError;

/// Color index reserved as "no draw" on sprite/blit paths.
pub const TRANSPARENT_INDEX: u8 = 255;

/// Ordered list of up to 256 RGBA colors. Built once from game options and
/// shared read-only by every rendering stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorPalette {
    colors: Vec<[u8; 4]>,
}

impl ColorPalette {
    pub fn from_hex(entries: &[String]) -> Result<Self, ConsoleError> {
        if entries.len() > 256 {
            return Err(ConsoleError::Config(format!(
                "palette has {} entries, maximum is 256",
                entries.len()
            )));
        }
        let mut colors = Vec::with_capacity(entries.len());
        for entry in entries {
            colors.push(parse_hex_color(entry)?);
        }
        Ok(Self { colors })
    }

    pub fn from_rgba(colors: Vec<[u8; 4]>) -> Result<Self, ConsoleError> {
        if colors.len() > 256 {
            return Err(ConsoleError::Config(format!(
                "palette has {} entries, maximum is 256",
                colors.len()
            )));
        }
        Ok(Self { colors })
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Index to RGBA; indices wrap modulo the palette size.
    pub fn rgba(&self, index: u8) -> [u8; 4] {
        if self.colors.is_empty() {
            return [0, 0, 0, 255];
        }
        self.colors[index as usize % self.colors.len()]
    }

    /// Nearest palette index for an RGBA color; pixels below the alpha
    /// threshold map to the transparent sentinel. Used when quantizing
    /// loaded spritesheet images.
    pub fn nearest_index(&self, c: [u8; 4]) -> u8 {
        if c[3] < 128 {
            return TRANSPARENT_INDEX;
        }
        let mut best = 0usize;
        let mut best_dist = i64::MAX;
        for (i, p) in self.colors.iter().enumerate() {
            let dr = c[0] as i64 - p[0] as i64;
            let dg = c[1] as i64 - p[1] as i64;
            let db = c[2] as i64 - p[2] as i64;
            let dist = dr * dr + dg * dg + db * db;
            if dist < best_dist {
                best_dist = dist;
                best = i;
            }
        }
        best as u8
    }

    pub fn to_hex(&self) -> Vec<String> {
        self.colors
            .iter()
            .map(|c| format!("#{:02X}{:02X}{:02X}", c[0], c[1], c[2]))
            .collect()
    }

    /// Full 256-entry RGBA table for the GPU lookup texture. Entries past the
    /// palette length repeat modulo, matching the CPU lookup.
    pub fn lookup_table(&self) -> [u8; 256 * 4] {
        let mut table = [0u8; 256 * 4];
        for i in 0..256 {
            let c = self.rgba(i as u8);
            table[i * 4..i * 4 + 4].copy_from_slice(&c);
        }
        table
    }
}

fn parse_hex_color(s: &str) -> Result<[u8; 4], ConsoleError> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() != 6 {
        return Err(ConsoleError::Config(format!("invalid palette color '{s}'")));
    }
    let byte = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16)
            .map_err(|_| ConsoleError::Config(format!("invalid palette color '{s}'")))
    };
    Ok([byte(0..2)?, byte(2..4)?, byte(4..6)?, 255])
}

/// A width x height grid of 8-bit color indices. Out-of-bounds writes are
/// silently dropped so primitive algorithms can overrun edges freely.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelArray {
    width: i32,
    height: i32,
    pixels: Vec<u8>,
}

impl PixelArray {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width as i32,
            height: height as i32,
            pixels: vec![0; (width * height) as usize],
        }
    }

    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), (width * height) as usize);
        Self {
            width: width as i32,
            height: height as i32,
            pixels,
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return 0;
        }
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, color: u8) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        self.pixels[(y * self.width + x) as usize] = color;
    }

    pub fn clear(&mut self, color: u8) {
        self.pixels.fill(color);
    }

    /// Copy a region of `source`, honoring horizontal/vertical flips and an
    /// optional per-pixel transform (used for recolored text and masked
    /// blits). Source pixels equal to [`TRANSPARENT_INDEX`] are skipped.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_from(
        &mut self,
        source: &PixelArray,
        dst_x: i32,
        dst_y: i32,
        src_x: i32,
        src_y: i32,
        width: i32,
        height: i32,
        flip_x: bool,
        flip_y: bool,
        transform: Option<&dyn Fn(u8) -> u8>,
    ) {
        for row in 0..height {
            for col in 0..width {
                let sx = if flip_x { width - 1 - col } else { col };
                let sy = if flip_y { height - 1 - row } else { row };
                let color = source.pixel(src_x + sx, src_y + sy);
                if color == TRANSPARENT_INDEX {
                    continue;
                }
                let color = match transform {
                    Some(f) => f(color),
                    None => color,
                };
                if color == TRANSPARENT_INDEX {
                    continue;
                }
                self.set_pixel(dst_x + col, dst_y + row, color);
            }
        }
    }

    /// Resolve indices through `palette` into an RGBA byte buffer.
    pub fn to_rgba(&self, palette: &ColorPalette) -> Vec<u8> {
        let mut rgba = Vec::with_capacity(self.pixels.len() * 4);
        for &idx in &self.pixels {
            rgba.extend_from_slice(&palette.rgba(idx));
        }
        rgba
    }
}

/// Clip rectangle maintained as mutable state on the frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Clipper {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Clipper {
    pub fn full(width: i32, height: i32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width,
            bottom: height,
        }
    }

    pub fn set(&mut self, left: i32, top: i32, right: i32, bottom: i32) {
        self.left = left;
        self.top = top;
        self.right = right;
        self.bottom = bottom;
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

/// Palette remap + dither mask. This state persists across frames and is
/// only reset by explicit calls; scripts rely on the persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct Blender {
    remap: [u8; 256],
    dither: u16,
}

impl Default for Blender {
    fn default() -> Self {
        Self::new()
    }
}

impl Blender {
    pub fn new() -> Self {
        Self {
            remap: identity_remap(),
            dither: 0xFFFF,
        }
    }

    pub fn pal(&mut self, from: u8, to: u8) {
        self.remap[from as usize] = to;
    }

    pub fn pal_reset(&mut self) {
        self.remap = identity_remap();
    }

    pub fn dither(&mut self, pattern: u16) {
        self.dither = pattern;
    }

    pub fn remap_table(&self) -> [u8; 256] {
        self.remap
    }

    pub fn dither_pattern(&self) -> u16 {
        self.dither
    }

    pub fn apply(&self, color: u8) -> u8 {
        self.remap[color as usize]
    }
}

pub fn identity_remap() -> [u8; 256] {
    let mut t = [0u8; 256];
    for (i, v) in t.iter_mut().enumerate() {
        *v = i as u8;
    }
    t
}

/// A 16-bit pattern read as a 4x4 grid: bit `x%4 + 4*(y%4)` decides whether
/// the pixel at (x, y) is written.
pub fn dither_allows(pattern: u16, x: i32, y: i32) -> bool {
    let bit = x.rem_euclid(4) + 4 * y.rem_euclid(4);
    (pattern >> bit) & 1 == 1
}

/// Snapshot of the frame buffer's mutable draw state, for deterministic
/// save/restore from scripts and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferState {
    pub blender: Blender,
    pub clipper: Clipper,
    pub camera: (i32, i32),
}

/// The console's primitive canvas: an indexed [`PixelArray`] plus camera
/// offset, clip rectangle and blend state, with the integer draw primitives.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pixels: PixelArray,
    pub blender: Blender,
    pub clipper: Clipper,
    pub camera: (i32, i32),
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: PixelArray::new(width, height),
            blender: Blender::new(),
            clipper: Clipper::full(width as i32, height as i32),
            camera: (0, 0),
        }
    }

    pub fn width(&self) -> i32 {
        self.pixels.width()
    }

    pub fn height(&self) -> i32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &PixelArray {
        &self.pixels
    }

    pub fn save_state(&self) -> BufferState {
        BufferState {
            blender: self.blender.clone(),
            clipper: self.clipper,
            camera: self.camera,
        }
    }

    pub fn restore_state(&mut self, state: BufferState) {
        self.blender = state.blender;
        self.clipper = state.clipper;
        self.camera = state.camera;
    }

    pub fn reset_state(&mut self) {
        self.blender = Blender::new();
        self.clipper = Clipper::full(self.pixels.width(), self.pixels.height());
        self.camera = (0, 0);
    }

    pub fn set_camera(&mut self, x: i32, y: i32) {
        self.camera = (x, y);
    }

    pub fn clear(&mut self, color: u8) {
        self.pixels.clear(self.blender.apply(color));
    }

    /// Clear without the palette remap; used to wipe the primitive layer to
    /// the transparent sentinel between flushes.
    pub fn clear_raw(&mut self, color: u8) {
        self.pixels.clear(color);
    }

    /// Write one pixel in world coordinates: camera offset, then clip, then
    /// dither test, then palette remap. Out-of-bounds writes are dropped.
    pub fn pset(&mut self, x: i32, y: i32, color: u8) {
        let sx = x - self.camera.0;
        let sy = y - self.camera.1;
        if !self.clipper.contains(sx, sy) {
            return;
        }
        if !dither_allows(self.blender.dither_pattern(), sx, sy) {
            return;
        }
        self.pixels.set_pixel(sx, sy, self.blender.apply(color));
    }

    pub fn pget(&self, x: i32, y: i32) -> u8 {
        self.pixels.pixel(x - self.camera.0, y - self.camera.1)
    }

    /// Blit from a source pixel array (sprite sheet, glyph sheet) through the
    /// full pset pipeline so camera, clip, dither and remap all apply.
    #[allow(clippy::too_many_arguments)]
    pub fn blit(
        &mut self,
        source: &PixelArray,
        dst_x: i32,
        dst_y: i32,
        src_x: i32,
        src_y: i32,
        width: i32,
        height: i32,
        flip_x: bool,
        flip_y: bool,
        transform: Option<&dyn Fn(u8) -> u8>,
    ) {
        for row in 0..height {
            for col in 0..width {
                let sx = if flip_x { width - 1 - col } else { col };
                let sy = if flip_y { height - 1 - row } else { row };
                let color = source.pixel(src_x + sx, src_y + sy);
                if color == TRANSPARENT_INDEX {
                    continue;
                }
                let color = match transform {
                    Some(f) => f(color),
                    None => color,
                };
                if color == TRANSPARENT_INDEX {
                    continue;
                }
                self.pset(dst_x + col, dst_y + row, color);
            }
        }
    }

    pub fn line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: u8) {
        // Bresenham, integer error accumulation.
        let dx = (x1 - x0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let dy = -(y1 - y0).abs();
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x0, y0);
        loop {
            self.pset(x, y, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    pub fn hline(&mut self, x0: i32, x1: i32, y: i32, color: u8) {
        let (a, b) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
        for x in a..=b {
            self.pset(x, y, color);
        }
    }

    pub fn rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: u8) {
        if width <= 0 || height <= 0 {
            return;
        }
        self.hline(x, x + width - 1, y, color);
        self.hline(x, x + width - 1, y + height - 1, color);
        for yy in y + 1..y + height - 1 {
            self.pset(x, yy, color);
            self.pset(x + width - 1, yy, color);
        }
    }

    pub fn rectf(&mut self, x: i32, y: i32, width: i32, height: i32, color: u8) {
        for yy in y..y + height {
            self.hline(x, x + width - 1, yy, color);
        }
    }

    pub fn circ(&mut self, cx: i32, cy: i32, radius: i32, color: u8) {
        if radius < 0 {
            return;
        }
        let mut x = 0;
        let mut y = radius;
        let mut m = 5 - 4 * radius;
        while x <= y {
            self.pset(cx + x, cy + y, color);
            self.pset(cx + y, cy + x, color);
            self.pset(cx - x, cy + y, color);
            self.pset(cx - y, cy + x, color);
            self.pset(cx + x, cy - y, color);
            self.pset(cx + y, cy - x, color);
            self.pset(cx - x, cy - y, color);
            self.pset(cx - y, cy - x, color);
            if m > 0 {
                y -= 1;
                m -= 8 * y;
            }
            x += 1;
            m += 8 * x + 4;
        }
    }

    pub fn circf(&mut self, cx: i32, cy: i32, radius: i32, color: u8) {
        if radius < 0 {
            return;
        }
        let mut x = 0;
        let mut y = radius;
        let mut m = 5 - 4 * radius;
        while x <= y {
            self.hline(cx - x, cx + x, cy + y, color);
            self.hline(cx - x, cx + x, cy - y, color);
            self.hline(cx - y, cx + y, cy + x, color);
            self.hline(cx - y, cx + y, cy - x, color);
            if m > 0 {
                y -= 1;
                m -= 8 * y;
            }
            x += 1;
            m += 8 * x + 4;
        }
    }

    pub fn oval(&mut self, cx: i32, cy: i32, rx: i32, ry: i32, color: u8) {
        self.midpoint_ellipse(cx, cy, rx, ry, color, false);
    }

    pub fn ovalf(&mut self, cx: i32, cy: i32, rx: i32, ry: i32, color: u8) {
        self.midpoint_ellipse(cx, cy, rx, ry, color, true);
    }

    // Midpoint ellipse in two arcs. Decision variables are kept scaled by 4
    // so the half-pixel seeds stay in integers.
    fn midpoint_ellipse(&mut self, cx: i32, cy: i32, rx: i32, ry: i32, color: u8, fill: bool) {
        if rx < 0 || ry < 0 {
            return;
        }
        let rx2 = rx as i64 * rx as i64;
        let ry2 = ry as i64 * ry as i64;
        let mut x = 0i64;
        let mut y = ry as i64;
        let mut dx = 0i64;
        let mut dy = 8 * rx2 * y;

        // Region 1: slope > -1.
        let mut d1 = 4 * ry2 - 4 * rx2 * ry as i64 + rx2;
        while dx < dy {
            self.ellipse_points(cx, cy, x as i32, y as i32, color, fill);
            if d1 < 0 {
                x += 1;
                dx += 8 * ry2;
                d1 += dx + 4 * ry2;
            } else {
                x += 1;
                y -= 1;
                dx += 8 * ry2;
                dy -= 8 * rx2;
                d1 += dx - dy + 4 * ry2;
            }
        }

        // Region 2: slope <= -1.
        let mut d2 =
            ry2 * (2 * x + 1) * (2 * x + 1) + 4 * rx2 * (y - 1) * (y - 1) - 4 * rx2 * ry2;
        while y >= 0 {
            self.ellipse_points(cx, cy, x as i32, y as i32, color, fill);
            if d2 > 0 {
                y -= 1;
                dy -= 8 * rx2;
                d2 += 4 * rx2 - dy;
            } else {
                y -= 1;
                x += 1;
                dx += 8 * ry2;
                dy -= 8 * rx2;
                d2 += dx - dy + 4 * rx2;
            }
        }
    }

    fn ellipse_points(&mut self, cx: i32, cy: i32, x: i32, y: i32, color: u8, fill: bool) {
        if fill {
            self.hline(cx - x, cx + x, cy + y, color);
            self.hline(cx - x, cx + x, cy - y, color);
        } else {
            self.pset(cx + x, cy + y, color);
            self.pset(cx - x, cy + y, color);
            self.pset(cx + x, cy - y, color);
            self.pset(cx - x, cy - y, color);
        }
    }
}
