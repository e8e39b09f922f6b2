use std::{f32::consts::TAU, path::Path};

use anyhow::Result;

use crate::{
    buffer::{AudioBuffer, seconds_to_frames},
    effects::{EffectMap, EffectParams},
    export::{self, MidiNote},
    timeline::NoteEvent,
};

pub const DEMO_BPM: f64 = 120.0;
pub const DEMO_PPQ: u16 = 480;
/// C4, so rendered notes land on their written pitch.
pub const DEMO_SAMPLE_HZ: f32 = 261.63;

#[must_use]
pub fn sine_sample(frequency_hz: f32, seconds: f64, sample_rate: u32) -> AudioBuffer {
    let frames = seconds_to_frames(seconds, sample_rate);
    let step = TAU * frequency_hz / sample_rate.max(1) as f32;
    let samples = (0..frames)
        .map(|index| 0.5 * (step * index as f32).sin())
        .collect();
    AudioBuffer::new(sample_rate, samples)
}

pub fn write_sine_wav(path: &Path, frequency_hz: f32, seconds: f64, sample_rate: u32) -> Result<()> {
    export::write_wav(&sine_sample(frequency_hz, seconds, sample_rate), path)
}

/// A two-bar phrase with a held chord, a repeated pitch and a gap.
#[must_use]
pub fn demo_notes() -> Vec<MidiNote> {
    let mut notes = vec![
        MidiNote::new(60, 0, 480),
        MidiNote::new(64, 480, 480),
        MidiNote::new(67, 960, 480),
        MidiNote::new(72, 1_440, 960),
        MidiNote::new(76, 1_440, 960),
        MidiNote::new(60, 2_880, 240),
        MidiNote::new(60, 3_120, 240),
    ];
    notes[3].velocity = 90;
    notes[4].velocity = 80;
    notes
}

pub fn demo_midi_bytes() -> Result<Vec<u8>> {
    export::midi_bytes(&demo_notes(), DEMO_BPM, DEMO_PPQ)
}

#[must_use]
pub fn demo_effects() -> EffectMap {
    EffectMap::from([
        (64, EffectParams::default().with_vibrato(5.0, 0.5)),
        (67, EffectParams::default().with_glide(67.0, 72.0)),
    ])
}

/// A note with hand-picked timing, ticks left at zero.
#[must_use]
pub fn note_at(ordinal: usize, pitch: u8, start_sec: f64, end_sec: f64) -> NoteEvent {
    NoteEvent {
        ordinal,
        pitch,
        channel: 0,
        velocity: 100,
        start_tick: 0,
        end_tick: 0,
        start_sec,
        end_sec,
        duration_sec: end_sec - start_sec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{ExtractOptions, extract_timeline};

    #[test]
    fn demo_midi_extracts_every_note() {
        let bytes = demo_midi_bytes().expect("demo midi should encode");
        let timeline =
            extract_timeline(&bytes, &ExtractOptions::default()).expect("demo midi should parse");
        assert_eq!(timeline.len(), demo_notes().len());
        assert_eq!(timeline.notes_for_pitch(60).len(), 3);
        assert!((timeline.end_seconds() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn sine_sample_has_requested_length() {
        let sample = sine_sample(DEMO_SAMPLE_HZ, 0.5, 8_000);
        assert_eq!(sample.len(), 4_000);
        assert!(sample.peak() <= 0.5);
    }
}
