use std::{collections::BTreeMap, f64::consts::PI};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, trace, warn};

use crate::{
    buffer::AudioBuffer,
    outcome::{Recovered, Stage, Substitution},
    pitch::{PitchShifter, ShiftError},
};

pub const GLIDE_BLOCK_SIZE: usize = 1_024;
pub const GLIDE_MAX_FADE: usize = 256;

/// Fraction of a second that one unit of vibrato depth displaces the read head.
const VIBRATO_DEPTH_SECONDS: f32 = 0.01;

/// Per-pitch effect settings, keyed by MIDI key number.
pub type EffectMap = BTreeMap<u8, EffectParams>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EffectError {
    #[error("effect parameter `{name}` is not finite")]
    NonFiniteParameter { name: &'static str },
    #[error("buffer sample rate must be greater than zero")]
    ZeroSampleRate,
    #[error("glide block {block} could not be shifted: {source}")]
    BlockShift {
        block: usize,
        #[source]
        source: ShiftError,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Vibrato {
    pub rate_hz: f32,
    pub depth: f32,
}

impl Default for Vibrato {
    fn default() -> Self {
        Self {
            rate_hz: 5.0,
            depth: 0.5,
        }
    }
}

impl Vibrato {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.depth != 0.0 && self.rate_hz != 0.0
    }
}

/// Linear pitch sweep, in key numbers, across the whole buffer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Glide {
    pub start_pitch: f32,
    pub end_pitch: f32,
}

impl Glide {
    #[must_use]
    pub fn is_active(&self) -> bool {
        (self.start_pitch - self.end_pitch).abs() > f32::EPSILON
    }

    /// Value of `linspace(start_pitch, end_pitch, frames)` at `position`.
    fn pitch_at(&self, position: f64, frames: usize) -> f64 {
        let span = frames.saturating_sub(1).max(1) as f64;
        let start = f64::from(self.start_pitch);
        let end = f64::from(self.end_pitch);
        start + (end - start) * (position / span)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct EffectParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<Vibrato>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glide: Option<Glide>,
}

impl EffectParams {
    #[must_use]
    pub fn with_vibrato(mut self, rate_hz: f32, depth: f32) -> Self {
        self.vibrato = Some(Vibrato { rate_hz, depth });
        self
    }

    #[must_use]
    pub fn with_glide(mut self, start_pitch: f32, end_pitch: f32) -> Self {
        self.glide = Some(Glide {
            start_pitch,
            end_pitch,
        });
        self
    }

    #[must_use]
    pub fn active_vibrato(&self) -> Option<Vibrato> {
        self.vibrato.filter(Vibrato::is_active)
    }

    #[must_use]
    pub fn active_glide(&self) -> Option<Glide> {
        self.glide.filter(Glide::is_active)
    }
}

#[instrument(skip(buffer), fields(frames = buffer.len()))]
pub fn vibrato(buffer: &AudioBuffer, params: Vibrato) -> Recovered<AudioBuffer> {
    match try_vibrato(buffer, params) {
        Ok(output) => Recovered::clean(output),
        Err(error) => {
            warn!(%error, "vibrato failed, keeping dry audio");
            Recovered::substituted(
                buffer.clone(),
                Substitution::new(
                    Stage::Vibrato,
                    format!("rate {} Hz depth {}", params.rate_hz, params.depth),
                    error,
                ),
            )
        }
    }
}

/// Warps the read position by `depth * sin(2π·rate·t) * sample_rate * 0.01`
/// samples, clamped to the buffer, producing a periodic pitch wobble.
pub fn try_vibrato(buffer: &AudioBuffer, params: Vibrato) -> Result<AudioBuffer, EffectError> {
    if !params.rate_hz.is_finite() {
        return Err(EffectError::NonFiniteParameter { name: "rate_hz" });
    }
    if !params.depth.is_finite() {
        return Err(EffectError::NonFiniteParameter { name: "depth" });
    }
    if buffer.sample_rate == 0 {
        return Err(EffectError::ZeroSampleRate);
    }
    if buffer.is_empty() {
        return Ok(buffer.clone());
    }

    let sample_rate = f64::from(buffer.sample_rate);
    let rate_hz = f64::from(params.rate_hz);
    let depth = f64::from(params.depth);
    let samples = (0..buffer.len())
        .map(|index| {
            let seconds = index as f64 / sample_rate;
            let modulation = depth * (2.0 * PI * rate_hz * seconds).sin();
            let offset = modulation * sample_rate * f64::from(VIBRATO_DEPTH_SECONDS);
            buffer.samples[warped_index(index, offset, buffer.len())]
        })
        .collect();

    Ok(AudioBuffer::new(buffer.sample_rate, samples))
}

/// Read position for output frame `index`, always inside `0..len`.
fn warped_index(index: usize, offset: f64, len: usize) -> usize {
    let last = len.saturating_sub(1);
    let position = (index as f64 + offset).clamp(0.0, last as f64);
    (position as usize).min(last)
}

#[instrument(skip(shifter, buffer), fields(frames = buffer.len()))]
pub fn glide(
    shifter: &PitchShifter,
    buffer: &AudioBuffer,
    params: Glide,
    reference_pitch: u8,
) -> Recovered<AudioBuffer> {
    match try_glide(shifter, buffer, params, reference_pitch) {
        Ok(output) => Recovered::clean(output),
        Err(error) => {
            warn!(%error, "glide failed, keeping dry audio");
            Recovered::substituted(
                buffer.clone(),
                Substitution::new(
                    Stage::Glide,
                    format!("{} -> {}", params.start_pitch, params.end_pitch),
                    error,
                ),
            )
        }
    }
}

/// Sweeps pitch block by block.
///
/// Each block of [`GLIDE_BLOCK_SIZE`] frames is shifted by its mean pitch
/// relative to `reference_pitch`. A block is rendered a little past its end
/// so the next block can cross-fade over it; the fade weights at every
/// boundary sum to one.
pub fn try_glide(
    shifter: &PitchShifter,
    buffer: &AudioBuffer,
    params: Glide,
    reference_pitch: u8,
) -> Result<AudioBuffer, EffectError> {
    if !params.start_pitch.is_finite() {
        return Err(EffectError::NonFiniteParameter {
            name: "start_pitch",
        });
    }
    if !params.end_pitch.is_finite() {
        return Err(EffectError::NonFiniteParameter { name: "end_pitch" });
    }
    if buffer.sample_rate == 0 {
        return Err(EffectError::ZeroSampleRate);
    }

    let frames = buffer.len();
    let mut output = vec![0.0_f32; frames];
    let block_count = frames.div_ceil(GLIDE_BLOCK_SIZE);

    for block in 0..block_count {
        let start = block * GLIDE_BLOCK_SIZE;
        let end = (start + GLIDE_BLOCK_SIZE).min(frames);
        let block_len = end - start;

        let fade_in = if block == 0 {
            0
        } else {
            crossfade_len(block_len)
        };
        let fade_out = if end < frames {
            crossfade_len((end + GLIDE_BLOCK_SIZE).min(frames) - end)
        } else {
            0
        };

        let mean_position = (start + end - 1) as f64 / 2.0;
        let block_pitch = params.pitch_at(mean_position, frames);
        let semitones = (block_pitch - f64::from(reference_pitch)) as f32;

        let segment = AudioBuffer::new(
            buffer.sample_rate,
            buffer.samples[start..end + fade_out].to_vec(),
        );
        let shifted = shifter
            .try_shift(&segment, semitones)
            .map_err(|source| EffectError::BlockShift { block, source })?;

        for (offset, sample) in shifted.samples.iter().enumerate() {
            let gain = if offset < fade_in {
                (offset as f32 + 0.5) / fade_in as f32
            } else if offset >= block_len {
                1.0 - ((offset - block_len) as f32 + 0.5) / fade_out as f32
            } else {
                1.0
            };
            output[start + offset] += sample * gain;
        }
        trace!(block, semitones, fade_in, fade_out, "glide block rendered");
    }

    for sample in &mut output {
        *sample = sample.clamp(-1.0, 1.0);
    }
    Ok(AudioBuffer::new(buffer.sample_rate, output))
}

fn crossfade_len(block_len: usize) -> usize {
    GLIDE_MAX_FADE.min(block_len / 2)
}
