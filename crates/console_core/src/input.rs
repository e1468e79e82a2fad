use std::collections::HashSet;

/// User shortcuts polled once per logic step, not per render frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    Screenshot,
    Record,
    ProfilerToggle,
}

/// Raw input state fed by the host window loop and read by the engine and
/// scripts. Edge detection compares against the previous logic step's
/// snapshot.
#[derive(Debug, Clone, Default)]
pub struct InputState {
    keys: HashSet<u32>,
    prev_keys: HashSet<u32>,
    mouse_buttons: HashSet<u8>,
    prev_mouse_buttons: HashSet<u8>,
    pub mouse_x: f64,
    pub mouse_y: f64,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key(&mut self, code: u32, down: bool) {
        if down {
            self.keys.insert(code);
        } else {
            self.keys.remove(&code);
        }
    }

    pub fn set_mouse_button(&mut self, button: u8, down: bool) {
        if down {
            self.mouse_buttons.insert(button);
        } else {
            self.mouse_buttons.remove(&button);
        }
    }

    pub fn set_mouse_pos(&mut self, x: f64, y: f64) {
        self.mouse_x = x;
        self.mouse_y = y;
    }

    pub fn key_down(&self, code: u32) -> bool {
        self.keys.contains(&code)
    }

    pub fn key_pressed(&self, code: u32) -> bool {
        self.keys.contains(&code) && !self.prev_keys.contains(&code)
    }

    pub fn key_released(&self, code: u32) -> bool {
        !self.keys.contains(&code) && self.prev_keys.contains(&code)
    }

    pub fn mouse_down(&self, button: u8) -> bool {
        self.mouse_buttons.contains(&button)
    }

    pub fn mouse_pressed(&self, button: u8) -> bool {
        self.mouse_buttons.contains(&button) && !self.prev_mouse_buttons.contains(&button)
    }

    /// Advance the edge-detection snapshot. Called once per logic step.
    pub fn end_step(&mut self) {
        self.prev_keys = self.keys.clone();
        self.prev_mouse_buttons = self.mouse_buttons.clone();
    }
}
