use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::platform::Platform;
use crate::synth::{Envelope, Harmonizer, Oscillator, WaveType};

pub const SAMPLE_RATE: u32 = 44100;
pub const MASTER_VOLUME: f32 = 0.8;
/// Harmonic weights beyond this are ignored.
pub const MAX_HARMONICS: usize = 7;

/// MIDI note number; A4 = 69 = 440 Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pitch(pub u8);

impl Pitch {
    pub const C4: Pitch = Pitch(60);
    pub const A4: Pitch = Pitch(69);

    pub fn frequency(self) -> f32 {
        440.0 * 2f32.powf((self.0 as f32 - 69.0) / 12.0)
    }
}

/// Declarative instrument definition. Pure value type: scripts edit copies
/// and persist them through the platform local file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub wave: WaveType,
    /// Attack/decay/release in seconds; sustain as a 0..1 fraction.
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
    pub harmonics: Vec<f32>,
}

impl Instrument {
    pub fn new(wave: WaveType) -> Self {
        Self {
            wave,
            attack: 0.01,
            decay: 0.05,
            sustain: 0.7,
            release: 0.1,
            harmonics: vec![1.0],
        }
    }

    pub fn envelope(&self, sample_rate: f32) -> Envelope {
        Envelope::from_seconds(self.attack, self.decay, self.sustain, self.release, sample_rate)
    }

    /// Harmonic weights truncated to the supported count.
    pub fn effective_harmonics(&self) -> &[f32] {
        &self.harmonics[..self.harmonics.len().min(MAX_HARMONICS)]
    }
}

impl Default for Instrument {
    fn default() -> Self {
        Self::new(WaveType::Sine)
    }
}

/// One entry on a bar: a pitch or silence, positioned and sized in beats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicalNote {
    /// `None` is an explicit rest.
    pub pitch: Option<Pitch>,
    pub start_beat: f32,
    pub duration_beats: f32,
    pub volume: f32,
    /// Overrides the bar instrument when set.
    pub instrument: Option<Instrument>,
}

/// An ordered list of notes plus tempo and a default instrument. Notes only
/// overlap by explicit design: putting a note over an existing one of the
/// same pitch replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicalBar {
    pub tempo: f32,
    pub instrument: Instrument,
    pub notes: Vec<MusicalNote>,
}

impl MusicalBar {
    pub fn new(tempo: f32, instrument: Instrument) -> Self {
        Self {
            tempo,
            instrument,
            notes: Vec::new(),
        }
    }

    pub fn seconds_per_beat(&self) -> f32 {
        60.0 / self.tempo
    }

    /// Add a note, replacing any same-pitch note whose beat interval
    /// overlaps the new one.
    pub fn put(&mut self, note: MusicalNote) {
        let start = note.start_beat;
        let end = note.start_beat + note.duration_beats;
        self.notes.retain(|existing| {
            if existing.pitch != note.pitch {
                return true;
            }
            let e_start = existing.start_beat;
            let e_end = existing.start_beat + existing.duration_beats;
            e_end <= start || e_start >= end
        });
        self.notes.push(note);
    }
}

/// Converts declarative bars into PCM float buffers.
///
/// Mixing policy: RMS-aware additive mixing. Per-sample voice sums are
/// scaled by `1/sqrt(overlapping voices)` before the final clamp, so
/// simultaneous full-volume voices keep bounded energy instead of hard
/// clipping.
#[derive(Debug, Clone)]
pub struct SoundConverter {
    sample_rate: f32,
}

impl Default for SoundConverter {
    fn default() -> Self {
        Self::new(SAMPLE_RATE as f32)
    }
}

impl SoundConverter {
    pub fn new(sample_rate: f32) -> Self {
        Self { sample_rate }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Render every note of the bar into one mixed buffer. The buffer grows
    /// to cover the furthest note tail (hold plus release).
    pub fn convert(&self, bar: &MusicalBar) -> Vec<f32> {
        let spb = bar.seconds_per_beat();
        let mut sums: Vec<f32> = Vec::new();
        let mut voices: Vec<u32> = Vec::new();

        for note in &bar.notes {
            let Some(pitch) = note.pitch else {
                continue;
            };
            let instrument = note.instrument.as_ref().unwrap_or(&bar.instrument);
            let envelope = instrument.envelope(self.sample_rate);
            let harmonizer = Harmonizer::new(instrument.effective_harmonics());
            let hold_samples = (note.duration_beats * spb * self.sample_rate).round();
            let total_samples = ((note.duration_beats * spb + instrument.release)
                * self.sample_rate)
                .round() as usize;
            let offset = (note.start_beat * spb * self.sample_rate).round() as usize;

            if sums.len() < offset + total_samples {
                sums.resize(offset + total_samples, 0.0);
                voices.resize(offset + total_samples, 0);
            }

            let normalize = 1.0
                / instrument
                    .effective_harmonics()
                    .iter()
                    .sum::<f32>()
                    .max(1.0);
            let mut oscillator = Oscillator::new(instrument.wave, self.sample_rate);
            let frequency = pitch.frequency();

            for i in 0..total_samples {
                let raw = harmonizer.generate(frequency, i as u64, |f, s| oscillator.emit(f, s));
                let gain = if (i as f32) < hold_samples {
                    envelope.note_on(i as f32)
                } else {
                    envelope.note_off(i as f32 - hold_samples)
                };
                let sample = raw * gain * normalize * note.volume * MASTER_VOLUME;
                sums[offset + i] += sample;
                voices[offset + i] += 1;
            }
        }

        sums.iter()
            .zip(voices.iter())
            .map(|(&sum, &count)| {
                let scaled = sum / (count.max(1) as f32).sqrt();
                scaled.clamp(-1.0, 1.0)
            })
            .collect()
    }
}

/// Persist script-edited instruments through the platform's local file.
pub fn save_instruments(
    platform: &dyn Platform,
    name: &str,
    instruments: &[Instrument],
) -> Result<()> {
    let path = platform.create_local_file(name, None)?;
    let json = serde_json::to_string_pretty(instruments)?;
    std::fs::write(&path, json)?;
    tracing::debug!("saved {} instruments to {}", instruments.len(), path.display());
    Ok(())
}

pub fn load_instruments(platform: &dyn Platform, name: &str) -> Result<Vec<Instrument>> {
    let path = platform.create_local_file(name, None)?;
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Mix already-rendered tracks with the same RMS-aware policy used inside
/// [`SoundConverter::convert`].
pub fn mix_tracks(tracks: &[Vec<f32>]) -> Vec<f32> {
    let len = tracks.iter().map(|t| t.len()).max().unwrap_or(0);
    let mut out = vec![0.0f32; len];
    for (i, slot) in out.iter_mut().enumerate() {
        let mut sum = 0.0f32;
        let mut active = 0u32;
        for track in tracks {
            if let Some(&s) = track.get(i) {
                sum += s;
                if s != 0.0 {
                    active += 1;
                }
            }
        }
        *slot = (sum / (active.max(1) as f32).sqrt()).clamp(-1.0, 1.0);
    }
    out
}
