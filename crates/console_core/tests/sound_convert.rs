use console_core::score::{
    mix_tracks, Instrument, MusicalBar, MusicalNote, Pitch, SoundConverter,
};
use console_core::synth::WaveType;

fn flat_sine() -> Instrument {
    Instrument {
        wave: WaveType::Sine,
        attack: 0.0,
        decay: 0.0,
        sustain: 1.0,
        release: 0.0,
        harmonics: vec![1.0],
    }
}

fn note(pitch: Pitch, start_beat: f32, duration_beats: f32, volume: f32) -> MusicalNote {
    MusicalNote {
        pitch: Some(pitch),
        start_beat,
        duration_beats,
        volume,
        instrument: None,
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

#[test]
fn single_note_end_to_end() {
    // C4, one beat at 120 BPM, flat envelope: exactly half a second.
    let mut bar = MusicalBar::new(120.0, flat_sine());
    bar.put(note(Pitch::C4, 0.0, 1.0, 1.0));
    let samples = SoundConverter::default().convert(&bar);
    assert_eq!(samples.len(), (0.5f32 * 44_100.0).round() as usize);
    assert_eq!(samples[0], 0.0);
    assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    assert!(rms(&samples) > 0.1, "note should be audible");
}

#[test]
fn release_extends_the_buffer() {
    let mut instrument = flat_sine();
    instrument.release = 0.25;
    let mut bar = MusicalBar::new(120.0, instrument);
    bar.put(note(Pitch::C4, 0.0, 1.0, 1.0));
    let samples = SoundConverter::default().convert(&bar);
    assert_eq!(samples.len(), ((0.5 + 0.25) * 44_100.0f32).round() as usize);
    // The tail decays to silence.
    assert!(samples[samples.len() - 1].abs() < 0.01);
}

#[test]
fn converted_samples_never_exceed_unity() {
    let loud = Instrument {
        wave: WaveType::Square,
        attack: 0.0,
        decay: 0.0,
        sustain: 1.0,
        release: 0.0,
        harmonics: vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
    };
    let mut bar = MusicalBar::new(240.0, loud);
    for midi in [57u8, 60, 64, 67] {
        bar.notes.push(note(Pitch(midi), 0.0, 1.0, 1.0));
    }
    let samples = SoundConverter::default().convert(&bar);
    assert!(samples.iter().all(|s| s.abs() <= 1.0));
}

#[test]
fn two_voices_keep_bounded_energy() {
    let mut solo = MusicalBar::new(120.0, flat_sine());
    solo.put(note(Pitch::C4, 0.0, 1.0, 1.0));
    let solo_rms = rms(&SoundConverter::default().convert(&solo));

    let mut duet = MusicalBar::new(120.0, flat_sine());
    duet.put(note(Pitch::C4, 0.0, 1.0, 1.0));
    duet.put(note(Pitch(64), 0.0, 1.0, 1.0));
    let duet_samples = SoundConverter::default().convert(&duet);
    let duet_rms = rms(&duet_samples);

    // RMS-aware mixing: no silent cancellation, no runaway energy.
    let ratio = duet_rms / solo_rms;
    assert!(
        (0.5..=2.0).contains(&ratio),
        "duet/solo RMS ratio {ratio} out of bounds"
    );
    assert!(duet_samples.iter().all(|s| s.abs() <= 1.0));
}

#[test]
fn silence_notes_contribute_nothing() {
    let mut bar = MusicalBar::new(120.0, flat_sine());
    bar.notes.push(MusicalNote {
        pitch: None,
        start_beat: 0.0,
        duration_beats: 4.0,
        volume: 1.0,
        instrument: None,
    });
    assert!(SoundConverter::default().convert(&bar).is_empty());
}

#[test]
fn beat_offset_positions_note_in_buffer() {
    let mut bar = MusicalBar::new(120.0, flat_sine());
    bar.put(note(Pitch::C4, 1.0, 1.0, 1.0));
    let samples = SoundConverter::default().convert(&bar);
    assert_eq!(samples.len(), 44_100);
    let first_half = &samples[..22_050];
    assert!(first_half.iter().all(|&s| s == 0.0));
    assert!(rms(&samples[22_050..]) > 0.1);
}

#[test]
fn put_replaces_overlapping_same_pitch_note() {
    let mut bar = MusicalBar::new(120.0, flat_sine());
    bar.put(note(Pitch::C4, 0.0, 2.0, 1.0));
    bar.put(note(Pitch::C4, 1.0, 1.0, 0.5));
    assert_eq!(bar.notes.len(), 1);
    assert_eq!(bar.notes[0].volume, 0.5);

    // A different pitch on the same beats coexists by design.
    bar.put(note(Pitch(64), 1.0, 1.0, 1.0));
    assert_eq!(bar.notes.len(), 2);

    // Non-overlapping same-pitch notes coexist too.
    bar.put(note(Pitch::C4, 2.5, 1.0, 1.0));
    assert_eq!(bar.notes.len(), 3);
}

#[test]
fn note_volume_scales_output() {
    let mut quiet = MusicalBar::new(120.0, flat_sine());
    quiet.put(note(Pitch::C4, 0.0, 1.0, 0.25));
    let mut loud = MusicalBar::new(120.0, flat_sine());
    loud.put(note(Pitch::C4, 0.0, 1.0, 1.0));
    let converter = SoundConverter::default();
    let q = rms(&converter.convert(&quiet));
    let l = rms(&converter.convert(&loud));
    assert!((q * 4.0 - l).abs() < 0.01);
}

#[test]
fn instrument_override_takes_precedence() {
    let mut bar = MusicalBar::new(120.0, flat_sine());
    let mut override_inst = flat_sine();
    override_inst.release = 0.5;
    bar.notes.push(MusicalNote {
        pitch: Some(Pitch::C4),
        start_beat: 0.0,
        duration_beats: 1.0,
        volume: 1.0,
        instrument: Some(override_inst),
    });
    let samples = SoundConverter::default().convert(&bar);
    // The override's release tail shows up in the length.
    assert_eq!(samples.len(), (44_100.0f32).round() as usize);
}

#[test]
fn mix_tracks_is_bounded_and_lossless_for_single_track() {
    let track = vec![0.5f32, -0.5, 0.25];
    let mixed = mix_tracks(&[track.clone()]);
    assert_eq!(mixed, track);

    let a = vec![1.0f32; 64];
    let b = vec![1.0f32; 64];
    let mixed = mix_tracks(&[a, b]);
    assert!(mixed.iter().all(|s| s.abs() <= 1.0));
    // Two coherent unit tracks mix to sqrt(2), clamped to 1.
    assert!(mixed.iter().all(|&s| s == 1.0));
}

#[test]
fn instruments_round_trip_through_the_platform() {
    use console_core::platform::MemoryPlatform;
    use console_core::score::{load_instruments, save_instruments};

    let platform = MemoryPlatform::new();
    let mut lead = flat_sine();
    lead.wave = WaveType::Pulse;
    lead.harmonics = vec![1.0, 0.5, 0.25];
    let kit = vec![lead, Instrument::default()];
    save_instruments(&platform, "instruments-test.json", &kit).unwrap();
    let back = load_instruments(&platform, "instruments-test.json").unwrap();
    assert_eq!(back, kit);
}

#[test]
fn pitch_frequencies_are_tempered() {
    assert!((Pitch::A4.frequency() - 440.0).abs() < 1e-3);
    assert!((Pitch::C4.frequency() - 261.6256).abs() < 0.01);
    assert!((Pitch(81).frequency() - 880.0).abs() < 1e-2);
}
