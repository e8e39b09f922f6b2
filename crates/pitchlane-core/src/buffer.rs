use serde::{Deserialize, Serialize};

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Scale between normalised `f32` samples and signed 16-bit PCM.
pub const PCM_FULL_SCALE: f32 = 32_768.0;

/// Mono audio at a fixed sample rate, normalised to `[-1, 1]`.
///
/// Every transform in the pipeline consumes a buffer by reference and hands
/// back a new one; nothing mutates a buffer it does not own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioBuffer {
    #[must_use]
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }

    #[must_use]
    pub fn silence(seconds: f64, sample_rate: u32) -> Self {
        Self::silence_frames(seconds_to_frames(seconds, sample_rate), sample_rate)
    }

    #[must_use]
    pub fn silence_frames(frames: usize, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples: vec![0.0; frames],
        }
    }

    #[must_use]
    pub fn from_pcm_i16(pcm: &[i16], sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples: pcm
                .iter()
                .map(|sample| f32::from(*sample) / PCM_FULL_SCALE)
                .collect(),
        }
    }

    #[must_use]
    pub fn to_pcm_i16(&self) -> Vec<i16> {
        self.samples.iter().copied().map(quantize_i16).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    #[must_use]
    pub fn seconds_to_frames(&self, seconds: f64) -> usize {
        seconds_to_frames(seconds, self.sample_rate)
    }

    /// Truncates or pads with trailing silence to exactly `frames` samples.
    #[must_use]
    pub fn fit_to_frames(mut self, frames: usize) -> Self {
        self.samples.resize(frames, 0.0);
        self
    }

    /// Adds `other` into this buffer starting at `offset`, growing the buffer
    /// when `other` runs past its end.
    pub fn overlay_at(&mut self, other: &AudioBuffer, offset: usize) {
        let required = offset.saturating_add(other.samples.len());
        if required > self.samples.len() {
            self.samples.resize(required, 0.0);
        }
        for (target, source) in self.samples[offset..required]
            .iter_mut()
            .zip(other.samples.iter())
        {
            *target += *source;
        }
    }

    /// Sample-wise sum of all buffers; the result is as long as the longest.
    #[must_use]
    pub fn mix(buffers: &[AudioBuffer], sample_rate: u32) -> Self {
        let frames = buffers.iter().map(AudioBuffer::len).max().unwrap_or(0);
        let mut mixed = Self::silence_frames(frames, sample_rate);
        for buffer in buffers {
            mixed.overlay_at(buffer, 0);
        }
        mixed
    }

    #[must_use]
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .copied()
            .map(f32::abs)
            .fold(0.0_f32, f32::max)
    }

    #[must_use]
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .samples
            .iter()
            .map(|sample| f64::from(*sample) * f64::from(*sample))
            .sum();
        (sum / self.samples.len() as f64).sqrt() as f32
    }

    /// Peak-normalises to `target_dbfs`. Silent buffers come back untouched.
    #[must_use]
    pub fn normalized(mut self, target_dbfs: f32) -> Self {
        let peak = self.peak();
        if peak <= f32::EPSILON {
            return self;
        }
        let gain = 10_f32.powf(target_dbfs / 20.0) / peak;
        for sample in &mut self.samples {
            *sample *= gain;
        }
        self
    }

    /// Linear fade in and out, each capped at half the buffer.
    #[must_use]
    pub fn with_fades(mut self, fade_seconds: f64) -> Self {
        let fade = self
            .seconds_to_frames(fade_seconds)
            .min(self.samples.len() / 2);
        if fade == 0 {
            return self;
        }
        let last = self.samples.len() - 1;
        for index in 0..fade {
            let gain = index as f32 / fade as f32;
            self.samples[index] *= gain;
            self.samples[last - index] *= gain;
        }
        self
    }

    #[must_use]
    pub fn waveform_peaks(&self, bucket_size: usize) -> Vec<f32> {
        if bucket_size == 0 {
            return Vec::new();
        }
        self.samples
            .chunks(bucket_size)
            .map(|chunk| chunk.iter().copied().map(f32::abs).fold(0.0_f32, f32::max))
            .collect()
    }
}

#[must_use]
pub fn seconds_to_frames(seconds: f64, sample_rate: u32) -> usize {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * f64::from(sample_rate)).round() as usize
}

#[must_use]
pub fn quantize_i16(sample: f32) -> i16 {
    let scaled = (sample * PCM_FULL_SCALE).round();
    scaled.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}
