use std::sync::Arc;

use kira::manager::{backend::DefaultBackend, AudioManager, AudioManagerSettings};
use kira::sound::static_sound::{StaticSoundData, StaticSoundSettings};
use kira::Frame;

use crate::score::{MusicalBar, SoundConverter, SAMPLE_RATE};

/// Capability surface the script host plays sound through. The engine owns
/// one implementation; tests substitute a recording fake.
pub trait VirtualSoundBoard {
    /// Synthesize and play a bar immediately.
    fn play_bar(&mut self, bar: &MusicalBar);

    /// Play raw PCM mono samples at the engine sample rate.
    fn play_pcm(&mut self, samples: Vec<f32>);
}

/// Kira-backed sound output. `None` when audio hardware is unavailable
/// (headless, CI, no device); every call degrades to silence, never a
/// crash.
pub struct SoundOutput {
    manager: Option<AudioManager>,
    converter: SoundConverter,
}

impl SoundOutput {
    pub fn new() -> Self {
        let manager = match AudioManager::<DefaultBackend>::new(AudioManagerSettings::default()) {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!("audio manager unavailable, running silent: {e}");
                None
            }
        };
        Self {
            manager,
            converter: SoundConverter::default(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.manager.is_some()
    }

    pub fn converter(&self) -> &SoundConverter {
        &self.converter
    }
}

impl Default for SoundOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualSoundBoard for SoundOutput {
    fn play_bar(&mut self, bar: &MusicalBar) {
        let samples = self.converter.convert(bar);
        self.play_pcm(samples);
    }

    fn play_pcm(&mut self, samples: Vec<f32>) {
        let Some(manager) = self.manager.as_mut() else {
            return;
        };
        let frames: Arc<[Frame]> = samples.iter().map(|&s| Frame::from_mono(s)).collect();
        let data = StaticSoundData {
            sample_rate: SAMPLE_RATE,
            frames,
            settings: StaticSoundSettings::new(),
            slice: None,
        };
        if let Err(e) = manager.play(data) {
            tracing::warn!("failed to play synthesized buffer: {e}");
        }
    }
}

/// Records play calls instead of touching a device. For tests.
#[derive(Debug, Default)]
pub struct RecordingSoundBoard {
    pub bars: Vec<MusicalBar>,
    pub pcm_lengths: Vec<usize>,
}

impl VirtualSoundBoard for RecordingSoundBoard {
    fn play_bar(&mut self, bar: &MusicalBar) {
        self.bars.push(bar.clone());
    }

    fn play_pcm(&mut self, samples: Vec<f32>) {
        self.pcm_lengths.push(samples.len());
    }
}
