use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, trace, warn};

use crate::{
    buffer::{AudioBuffer, DEFAULT_SAMPLE_RATE, seconds_to_frames},
    effects::{self, EffectParams},
    outcome::{Recovered, Stage, Substitution},
    pitch::PitchShifter,
    timeline::NoteEvent,
};

/// Key number every instrument sample is assumed to be recorded at (C4).
pub const REFERENCE_PITCH: u8 = 60;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RenderError {
    #[error("sample is at {sample} Hz but the render runs at {expected} Hz")]
    SampleRateMismatch { sample: u32, expected: u32 },
    #[error("note #{ordinal} has an invalid duration of {duration} s")]
    InvalidDuration { ordinal: usize, duration: f64 },
    #[error("note #{ordinal} has an invalid start time of {start} s")]
    InvalidStart { ordinal: usize, start: f64 },
    #[error("track would run {seconds} s, past the {limit} s limit")]
    TrackTooLong { seconds: f64, limit: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderOptions {
    pub sample_rate: u32,
    pub reference_pitch: u8,
    /// Render notes on the rayon pool before compositing.
    pub parallel: bool,
    /// Length of the stand-in sample for notes without one.
    pub missing_sample_seconds: f64,
    /// Length of the silent track returned when composition fails outright.
    pub failure_silence_seconds: f64,
    pub max_track_seconds: f64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            reference_pitch: REFERENCE_PITCH,
            parallel: true,
            missing_sample_seconds: 0.1,
            failure_silence_seconds: 5.0,
            max_track_seconds: 3_600.0,
        }
    }
}

/// Turns one note plus one sample into a clip of exactly the note's length.
#[derive(Debug)]
pub struct NoteRenderer {
    shifter: PitchShifter,
    sample_rate: u32,
    reference_pitch: u8,
}

impl NoteRenderer {
    #[must_use]
    pub fn new(sample_rate: u32, reference_pitch: u8) -> Self {
        Self {
            shifter: PitchShifter::new(),
            sample_rate,
            reference_pitch,
        }
    }

    #[must_use]
    pub fn from_options(options: &RenderOptions) -> Self {
        Self::new(options.sample_rate, options.reference_pitch)
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Renders the note, or silence of the note's length if that fails.
    #[instrument(skip_all, fields(ordinal = note.ordinal, pitch = note.pitch))]
    pub fn render(
        &self,
        note: &NoteEvent,
        sample: &AudioBuffer,
        effects: Option<&EffectParams>,
    ) -> Recovered<AudioBuffer> {
        match self.try_render(note, sample, effects) {
            Ok(clip) => clip,
            Err(error) => {
                warn!(%error, "note render failed, substituting silence");
                Recovered::substituted(
                    AudioBuffer::silence(note.duration_sec, self.sample_rate),
                    Substitution::new(Stage::NoteRender, note_subject(note), error),
                )
            }
        }
    }

    /// Shifts the sample to the note's pitch, applies vibrato then glide, and
    /// truncates or pads the result to the note's duration.
    pub fn try_render(
        &self,
        note: &NoteEvent,
        sample: &AudioBuffer,
        effects: Option<&EffectParams>,
    ) -> Result<Recovered<AudioBuffer>, RenderError> {
        if !note.duration_sec.is_finite() || note.duration_sec < 0.0 {
            return Err(RenderError::InvalidDuration {
                ordinal: note.ordinal,
                duration: note.duration_sec,
            });
        }
        if sample.sample_rate != self.sample_rate {
            return Err(RenderError::SampleRateMismatch {
                sample: sample.sample_rate,
                expected: self.sample_rate,
            });
        }

        let frames = seconds_to_frames(note.duration_sec, self.sample_rate);
        let mut substitutions = Vec::new();
        let semitones = f32::from(note.pitch) - f32::from(self.reference_pitch);
        let mut clip = self
            .shifter
            .shift(sample, semitones)
            .absorb_into(&mut substitutions);

        if let Some(params) = effects {
            if let Some(vibrato) = params.active_vibrato() {
                clip = effects::vibrato(&clip, vibrato).absorb_into(&mut substitutions);
            }
            if let Some(glide) = params.active_glide() {
                clip = effects::glide(&self.shifter, &clip, glide, self.reference_pitch)
                    .absorb_into(&mut substitutions);
            }
        }

        trace!(frames, source_frames = clip.len(), "fitting clip to note length");
        Ok(Recovered {
            value: clip.fit_to_frames(frames),
            substitutions,
        })
    }
}

pub(crate) fn note_subject(note: &NoteEvent) -> String {
    format!("note #{} (pitch {})", note.ordinal, note.pitch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(pitch: u8, duration_sec: f64) -> NoteEvent {
        NoteEvent {
            ordinal: 0,
            pitch,
            channel: 0,
            velocity: 100,
            start_tick: 0,
            end_tick: 480,
            start_sec: 0.0,
            end_sec: duration_sec,
            duration_sec,
        }
    }

    #[test]
    fn reference_pitch_clip_is_the_sample_padded() {
        let renderer = NoteRenderer::new(8_000, REFERENCE_PITCH);
        let sample = AudioBuffer::new(8_000, vec![0.25; 400]);
        let clip = renderer.render(&note(60, 0.1), &sample, None);
        assert!(clip.is_clean());
        assert_eq!(clip.value.len(), 800);
        assert_eq!(&clip.value.samples[..400], &sample.samples[..]);
        assert!(clip.value.samples[400..].iter().all(|value| *value == 0.0));
    }

    #[test]
    fn long_samples_are_truncated() {
        let renderer = NoteRenderer::new(8_000, REFERENCE_PITCH);
        let sample = AudioBuffer::new(8_000, vec![0.25; 8_000]);
        let clip = renderer.render(&note(60, 0.25), &sample, None);
        assert_eq!(clip.value.len(), 2_000);
    }

    #[test]
    fn rate_mismatch_renders_silence_of_note_length() {
        let renderer = NoteRenderer::new(44_100, REFERENCE_PITCH);
        let sample = AudioBuffer::new(22_050, vec![0.5; 2_205]);
        let clip = renderer.render(&note(64, 0.5), &sample, None);
        assert_eq!(clip.value.len(), 22_050);
        assert_eq!(clip.value.peak(), 0.0);
        assert!(clip.has_stage(Stage::NoteRender));
    }

    #[test]
    fn inactive_effects_are_skipped() {
        let renderer = NoteRenderer::new(8_000, REFERENCE_PITCH);
        let sample = AudioBuffer::new(8_000, (0..800).map(|i| (i as f32 * 0.01).sin()).collect());
        let effects = EffectParams::default()
            .with_vibrato(5.0, 0.0)
            .with_glide(70.0, 70.0);
        let dry = renderer.render(&note(60, 0.1), &sample, None);
        let wet = renderer.render(&note(60, 0.1), &sample, Some(&effects));
        assert_eq!(dry.value, wet.value);
    }

    #[test]
    fn extreme_pitches_are_shifted_cleanly() {
        let renderer = NoteRenderer::new(8_000, REFERENCE_PITCH);
        let sample = AudioBuffer::new(8_000, (0..800).map(|i| (i as f32 * 0.35).sin() * 0.5).collect());
        for pitch in [0, 11, 109, 127] {
            let clip = renderer.render(&note(pitch, 0.1), &sample, None);
            assert!(clip.is_clean(), "pitch {pitch}: {:?}", clip.substitutions);
            assert_eq!(clip.value.len(), 800);
            assert_ne!(clip.value, sample);
        }
    }
}
