use std::{f32::consts::PI, sync::Arc};

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use thiserror::Error;
use tracing::{instrument, trace, warn};

use crate::{
    buffer::AudioBuffer,
    outcome::{Recovered, Stage, Substitution},
};

pub const FFT_SIZE: usize = 2_048;
pub const HOP_SIZE: usize = FFT_SIZE / 4;
/// Widest offset between two MIDI pitches.
pub const MAX_SEMITONES: f32 = 127.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ShiftError {
    #[error("semitone offset {0} is outside the MIDI range of +/-127")]
    OffsetOutOfRange(f32),
    #[error("buffer sample rate must be greater than zero")]
    ZeroSampleRate,
    #[error("input contains non-finite samples")]
    NonFiniteInput,
    #[error("phase vocoder produced non-finite output")]
    NonFiniteOutput,
}

/// Duration-preserving pitch shifter.
///
/// The signal is time-stretched by the pitch ratio with an STFT phase
/// vocoder, then read back at that ratio so the result has the input length
/// with every partial scaled by `2^(semitones / 12)`.
pub struct PitchShifter {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl Default for PitchShifter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PitchShifter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PitchShifter")
            .field("fft_size", &FFT_SIZE)
            .field("hop_size", &HOP_SIZE)
            .finish()
    }
}

impl PitchShifter {
    #[must_use]
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let window = (0..FFT_SIZE)
            .map(|index| 0.5 - 0.5 * (2.0 * PI * index as f32 / FFT_SIZE as f32).cos())
            .collect();
        Self {
            forward: planner.plan_fft_forward(FFT_SIZE),
            inverse: planner.plan_fft_inverse(FFT_SIZE),
            window,
        }
    }

    /// Shifts `buffer` by `semitones`, keeping the original on failure.
    #[instrument(skip(self, buffer), fields(frames = buffer.len()))]
    pub fn shift(&self, buffer: &AudioBuffer, semitones: f32) -> Recovered<AudioBuffer> {
        match self.try_shift(buffer, semitones) {
            Ok(shifted) => Recovered::clean(shifted),
            Err(error) => {
                warn!(%error, semitones, "pitch shift failed, keeping unshifted audio");
                Recovered::substituted(
                    buffer.clone(),
                    Substitution::new(Stage::PitchShift, format!("{semitones:+} semitones"), error),
                )
            }
        }
    }

    pub fn try_shift(&self, buffer: &AudioBuffer, semitones: f32) -> Result<AudioBuffer, ShiftError> {
        if buffer.sample_rate == 0 {
            return Err(ShiftError::ZeroSampleRate);
        }
        if !semitones.is_finite() || semitones.abs() > MAX_SEMITONES {
            return Err(ShiftError::OffsetOutOfRange(semitones));
        }
        if buffer.samples.iter().any(|sample| !sample.is_finite()) {
            return Err(ShiftError::NonFiniteInput);
        }
        if buffer.is_empty() || semitones.abs() < 1e-4 {
            return Ok(buffer.clone());
        }

        let ratio = 2_f64.powf(f64::from(semitones) / 12.0);
        let stretched = self.time_stretch(&buffer.samples, ratio);
        let mut shifted = read_at_ratio(&stretched, ratio, buffer.len());

        if shifted.iter().any(|sample| !sample.is_finite()) {
            return Err(ShiftError::NonFiniteOutput);
        }
        for sample in &mut shifted {
            *sample = sample.clamp(-1.0, 1.0);
        }

        trace!(ratio, stretched_frames = stretched.len(), "pitch shift complete");
        Ok(AudioBuffer::new(buffer.sample_rate, shifted))
    }

    /// Phase-vocoder time stretch; the output is `round(len * stretch)` long.
    fn time_stretch(&self, samples: &[f32], stretch: f64) -> Vec<f32> {
        let pad = FFT_SIZE / 2;
        let bins = FFT_SIZE / 2 + 1;
        let target_len = (samples.len() as f64 * stretch).round() as usize;

        let mut padded = vec![0.0_f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);
        let frame_count = 1 + (padded.len() - FFT_SIZE) / HOP_SIZE;

        let spectra: Vec<Vec<Complex<f32>>> = (0..frame_count)
            .map(|frame| {
                let start = frame * HOP_SIZE;
                let mut scratch: Vec<Complex<f32>> = padded[start..start + FFT_SIZE]
                    .iter()
                    .zip(&self.window)
                    .map(|(sample, weight)| Complex::new(sample * weight, 0.0))
                    .collect();
                self.forward.process(&mut scratch);
                scratch.truncate(bins);
                scratch
            })
            .collect();

        let expected_advance: Vec<f32> = (0..bins)
            .map(|bin| 2.0 * PI * bin as f32 * HOP_SIZE as f32 / FFT_SIZE as f32)
            .collect();
        let silent_column = vec![Complex::new(0.0_f32, 0.0); bins];
        let mut phase: Vec<f32> = spectra[0].iter().map(|value| value.arg()).collect();

        let step = 1.0 / stretch;
        let steps = (frame_count as f64 / step).ceil() as usize;
        let output_len = (steps.saturating_sub(1)) * HOP_SIZE + FFT_SIZE;
        let mut output = vec![0.0_f32; output_len];
        let mut window_energy = vec![0.0_f32; output_len];
        let mut full = vec![Complex::new(0.0_f32, 0.0); FFT_SIZE];

        for synthesis_frame in 0..steps {
            let position = synthesis_frame as f64 * step;
            let base = position.floor() as usize;
            if base >= frame_count {
                break;
            }
            let alpha = (position - base as f64) as f32;
            let current = &spectra[base];
            let next = spectra.get(base + 1).unwrap_or(&silent_column);

            for bin in 0..bins {
                let magnitude = (1.0 - alpha) * current[bin].norm() + alpha * next[bin].norm();
                full[bin] = Complex::from_polar(magnitude, phase[bin]);
            }
            for bin in 1..FFT_SIZE / 2 {
                full[FFT_SIZE - bin] = full[bin].conj();
            }
            self.inverse.process(&mut full);

            let offset = synthesis_frame * HOP_SIZE;
            for (index, weight) in self.window.iter().enumerate() {
                output[offset + index] += full[index].re / FFT_SIZE as f32 * weight;
                window_energy[offset + index] += weight * weight;
            }

            for bin in 0..bins {
                let mut delta = next[bin].arg() - current[bin].arg() - expected_advance[bin];
                delta -= 2.0 * PI * (delta / (2.0 * PI)).round();
                phase[bin] += expected_advance[bin] + delta;
            }
        }

        for (sample, energy) in output.iter_mut().zip(&window_energy) {
            if *energy > 1e-6 {
                *sample /= energy;
            }
        }

        let mut stretched: Vec<f32> = output.into_iter().skip(pad).take(target_len).collect();
        stretched.resize(target_len, 0.0);
        stretched
    }
}

/// Reads `source` at `ratio` samples per output sample with linear
/// interpolation, producing exactly `frames` samples.
fn read_at_ratio(source: &[f32], ratio: f64, frames: usize) -> Vec<f32> {
    (0..frames)
        .map(|index| {
            let position = index as f64 * ratio;
            let base = position.floor() as usize;
            let frac = (position - base as f64) as f32;
            let left = source.get(base).copied().unwrap_or(0.0);
            let right = source.get(base + 1).copied().unwrap_or(0.0);
            left + (right - left) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f32, seconds: f32, sample_rate: u32) -> AudioBuffer {
        let frames = (seconds * sample_rate as f32) as usize;
        AudioBuffer::new(
            sample_rate,
            (0..frames)
                .map(|index| {
                    (2.0 * PI * frequency * index as f32 / sample_rate as f32).sin() * 0.5
                })
                .collect(),
        )
    }

    fn crossing_frequency(samples: &[f32], sample_rate: u32) -> f64 {
        let crossings = samples
            .windows(2)
            .filter(|pair| (pair[0] < 0.0) != (pair[1] < 0.0))
            .count();
        crossings as f64 / 2.0 / (samples.len() as f64 / f64::from(sample_rate))
    }

    #[test]
    fn zero_offset_is_identity() {
        let shifter = PitchShifter::new();
        let input = sine(440.0, 0.25, 44_100);
        let output = shifter.try_shift(&input, 0.0).expect("zero shift should succeed");
        assert_eq!(output, input);
    }

    #[test]
    fn shift_preserves_duration() {
        let shifter = PitchShifter::new();
        let input = sine(330.0, 0.3, 44_100);
        for semitones in [-7.0, -1.0, 3.0, 12.0] {
            let output = shifter
                .try_shift(&input, semitones)
                .expect("shift should succeed");
            assert_eq!(output.len(), input.len());
            assert_eq!(output.sample_rate, input.sample_rate);
            assert!(output.peak() <= 1.0);
        }
    }

    #[test]
    fn octave_up_doubles_frequency() {
        let shifter = PitchShifter::new();
        let input = sine(440.0, 1.0, 44_100);
        let output = shifter.try_shift(&input, 12.0).expect("shift should succeed");
        let middle = &output.samples[11_025..33_075];
        let frequency = crossing_frequency(middle, 44_100);
        assert!(
            (frequency - 880.0).abs() < 60.0,
            "expected roughly 880 Hz, measured {frequency}"
        );
    }

    #[test]
    fn out_of_range_offset_keeps_original() {
        let shifter = PitchShifter::new();
        let input = sine(440.0, 0.1, 44_100);
        assert_eq!(
            shifter.try_shift(&input, 200.0),
            Err(ShiftError::OffsetOutOfRange(200.0))
        );

        let recovered = shifter.shift(&input, 200.0);
        assert_eq!(recovered.value, input);
        assert!(recovered.has_stage(Stage::PitchShift));
    }

    #[test]
    fn full_midi_span_offsets_are_shifted() {
        let shifter = PitchShifter::new();
        let input = sine(440.0, 0.1, 44_100);
        for semitones in [-127.0, -60.0, 67.0, 127.0] {
            let output = shifter
                .try_shift(&input, semitones)
                .expect("offsets within the MIDI span should shift");
            assert_eq!(output.len(), input.len());
            assert_ne!(output, input);
        }
    }

    #[test]
    fn short_buffers_are_shifted_without_panicking() {
        let shifter = PitchShifter::new();
        let input = AudioBuffer::new(44_100, vec![0.3; 17]);
        let output = shifter.try_shift(&input, 5.0).expect("shift should succeed");
        assert_eq!(output.len(), 17);
    }
}
