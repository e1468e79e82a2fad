//! Pure math for the present pass: the composited offscreen target is drawn
//! onto the window scaled by an integer zoom and offset by a centering
//! gutter. Nearest-neighbor only; fractional scales would smear pixels.

/// Largest integer zoom that fits the logical canvas into the window,
/// capped at the configured zoom and never below 1.
pub fn effective_zoom(
    window_width: u32,
    window_height: u32,
    logical_width: u32,
    logical_height: u32,
    configured_zoom: u32,
) -> u32 {
    let fit_x = window_width / logical_width.max(1);
    let fit_y = window_height / logical_height.max(1);
    fit_x.min(fit_y).min(configured_zoom.max(1)).max(1)
}

/// Screen-pixel rectangle of the scaled canvas, centered in the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresentRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

pub fn present_rect(
    window_width: u32,
    window_height: u32,
    logical_width: u32,
    logical_height: u32,
    zoom: u32,
) -> PresentRect {
    let width = (logical_width * zoom) as f32;
    let height = (logical_height * zoom) as f32;
    let gutter_x = (window_width as f32 - width) * 0.5;
    let gutter_y = (window_height as f32 - height) * 0.5;
    PresentRect {
        x: gutter_x,
        y: gutter_y,
        width,
        height,
    }
}

/// Converts a pixel coordinate to normalized device coordinates (-1..1).
pub fn pixel_to_ndc(pixel: f32, dimension: f32) -> f32 {
    (pixel / dimension) * 2.0 - 1.0
}

/// Two-triangle quad (position NDC, uv) covering `rect` in a window of the
/// given size. Y flips because NDC grows upward while pixels grow downward.
pub fn present_quad(rect: PresentRect, window_width: u32, window_height: u32) -> [[f32; 4]; 6] {
    let w = window_width as f32;
    let h = window_height as f32;
    let x0 = pixel_to_ndc(rect.x, w);
    let x1 = pixel_to_ndc(rect.x + rect.width, w);
    let y0 = -pixel_to_ndc(rect.y, h);
    let y1 = -pixel_to_ndc(rect.y + rect.height, h);
    [
        [x0, y0, 0.0, 0.0],
        [x0, y1, 0.0, 1.0],
        [x1, y1, 1.0, 1.0],
        [x0, y0, 0.0, 0.0],
        [x1, y1, 1.0, 1.0],
        [x1, y0, 1.0, 0.0],
    ]
}
