use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::{
    buffer::AudioBuffer,
    outcome::{Recovered, Stage, Substitution},
};

/// Length of the silence handed out when a sample file cannot be loaded.
pub const LOAD_FAILURE_SECONDS: f64 = 1.0;

const RESAMPLE_CHUNK: usize = 1_024;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("failed to open audio file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode audio file {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: SymphoniaError,
    },
    #[error("no default audio track found in {0}")]
    NoAudioTrack(PathBuf),
    #[error("decoded zero samples from {0}")]
    Empty(PathBuf),
    #[error("failed to resample from {from} Hz to {to} Hz: {message}")]
    Resample { from: u32, to: u32, message: String },
    #[error("sample directory is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("invalid sample key `{0}`")]
    InvalidKey(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

/// Decodes any container symphonia understands and downmixes it to mono.
#[instrument(fields(path = %path.display()))]
pub fn decode_audio_file_mono(path: &Path) -> Result<DecodedAudio, SampleError> {
    let decode_error = |source: SymphoniaError| SampleError::Decode {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(|source| SampleError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|value| value.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(decode_error)?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| SampleError::NoAudioTrack(path.to_path_buf()))?;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(decode_error)?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(48_000);
    let mut channels = track
        .codec_params
        .channels
        .map(|value| value.count() as u16)
        .unwrap_or(2);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(error)) if error.kind() == ErrorKind::UnexpectedEof => {
                break;
            }
            Err(error) => return Err(decode_error(error)),
        };

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(message)) => {
                debug!(message, "skipping undecodable packet");
                continue;
            }
            Err(error) => return Err(decode_error(error)),
        };

        sample_rate = decoded.spec().rate;
        channels = decoded.spec().channels.count() as u16;
        push_mono_samples(decoded, &mut samples);
    }

    if samples.is_empty() {
        return Err(SampleError::Empty(path.to_path_buf()));
    }

    debug!(
        sample_rate,
        channels,
        total_frames = samples.len(),
        "audio decode complete"
    );

    Ok(DecodedAudio {
        sample_rate,
        channels,
        samples,
    })
}

fn push_mono_samples(decoded: symphonia::core::audio::AudioBufferRef<'_>, samples: &mut Vec<f32>) {
    let spec = *decoded.spec();
    let channel_count = spec.channels.count().max(1);
    let mut sample_buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
    sample_buffer.copy_interleaved_ref(decoded);

    for frame in sample_buffer.samples().chunks(channel_count) {
        let sum: f32 = frame.iter().copied().sum();
        samples.push(sum / channel_count as f32);
    }
}

/// Sinc resampling to `target_rate`; the result is exactly
/// `round(len * target_rate / source_rate)` frames long.
pub fn resample(buffer: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer, SampleError> {
    if buffer.sample_rate == target_rate || buffer.is_empty() {
        return Ok(AudioBuffer::new(target_rate, buffer.samples.clone()));
    }
    let resample_error = |message: String| SampleError::Resample {
        from: buffer.sample_rate,
        to: target_rate,
        message,
    };
    if buffer.sample_rate == 0 || target_rate == 0 {
        return Err(resample_error("sample rate must be greater than zero".to_string()));
    }

    let ratio = f64::from(target_rate) / f64::from(buffer.sample_rate);
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|error| resample_error(error.to_string()))?;

    let expected = (buffer.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut output: Vec<f32> = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut position = 0;

    while position + resampler.input_frames_next() <= buffer.len() {
        let needed = resampler.input_frames_next();
        let chunk = [&buffer.samples[position..position + needed]];
        let produced = resampler
            .process(&chunk[..], None)
            .map_err(|error| resample_error(error.to_string()))?;
        output.extend_from_slice(&produced[0]);
        position += needed;
    }

    if position < buffer.len() {
        let tail = [&buffer.samples[position..]];
        let produced = resampler
            .process_partial(Some(&tail[..]), None)
            .map_err(|error| resample_error(error.to_string()))?;
        output.extend_from_slice(&produced[0]);
    }

    while output.len() < expected + delay {
        let produced = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|error| resample_error(error.to_string()))?;
        if produced[0].is_empty() {
            break;
        }
        output.extend_from_slice(&produced[0]);
    }

    let mut samples: Vec<f32> = output.into_iter().skip(delay).take(expected).collect();
    samples.resize(expected, 0.0);
    Ok(AudioBuffer::new(target_rate, samples))
}

/// Decodes, downmixes and resamples one sample file.
#[instrument(fields(path = %path.display()))]
pub fn try_load_sample(path: &Path, target_rate: u32) -> Result<AudioBuffer, SampleError> {
    let decoded = decode_audio_file_mono(path)?;
    let buffer = AudioBuffer::new(decoded.sample_rate, decoded.samples);
    let buffer = resample(&buffer, target_rate)?;
    debug!(
        source_rate = decoded.sample_rate,
        source_channels = decoded.channels,
        frames = buffer.len(),
        "sample loaded"
    );
    Ok(buffer)
}

/// Like [`try_load_sample`], but hands back a second of silence on failure.
pub fn load_sample(path: &Path, target_rate: u32) -> Recovered<AudioBuffer> {
    match try_load_sample(path, target_rate) {
        Ok(buffer) => Recovered::clean(buffer),
        Err(error) => {
            warn!(path = %path.display(), %error, "sample load failed, substituting silence");
            Recovered::substituted(
                AudioBuffer::silence(LOAD_FAILURE_SECONDS, target_rate),
                Substitution::new(Stage::SampleLoad, path.display().to_string(), error),
            )
        }
    }
}

/// Which notes a sample is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SampleKey {
    Pitch(u8),
    Default,
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pitch(pitch) => write!(f, "{pitch}"),
            Self::Default => f.write_str("default"),
        }
    }
}

impl FromStr for SampleKey {
    type Err = SampleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("default") {
            return Ok(Self::Default);
        }
        if let Ok(pitch) = trimmed.parse::<u8>() {
            if pitch <= 127 {
                return Ok(Self::Pitch(pitch));
            }
        }
        parse_note_name(trimmed)
            .map(Self::Pitch)
            .ok_or_else(|| SampleError::InvalidKey(value.to_string()))
    }
}

impl Serialize for SampleKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SampleKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parses scientific pitch notation (`C4` = 60, `A4` = 69, `C-1` = 0).
#[must_use]
pub fn parse_note_name(name: &str) -> Option<u8> {
    let mut chars = name.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let base: i32 = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let rest = chars.as_str();
    let (accidental, octave) = if let Some(octave) = rest.strip_prefix('#') {
        (1, octave)
    } else if let Some(octave) = rest.strip_prefix('b') {
        (-1, octave)
    } else {
        (0, rest)
    };

    let octave: i32 = octave.parse().ok()?;
    let pitch = (octave + 1) * 12 + base + accidental;
    u8::try_from(pitch).ok().filter(|pitch| *pitch <= 127)
}

#[must_use]
pub fn supported_audio_extensions() -> &'static [&'static str] {
    &["wav", "flac", "mp3", "ogg", "aiff", "aif", "m4a"]
}

/// Sample file assignments, before any audio is decoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SampleLibrary {
    pitched: BTreeMap<u8, PathBuf>,
    default: Option<PathBuf>,
}

impl SampleLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The first sample added becomes the default unless one is already set.
    pub fn add_sample(&mut self, key: SampleKey, path: impl Into<PathBuf>) {
        let path = path.into();
        match key {
            SampleKey::Pitch(pitch) => {
                if self.default.is_none() {
                    self.default = Some(path.clone());
                }
                self.pitched.insert(pitch, path);
            }
            SampleKey::Default => self.default = Some(path),
        }
    }

    /// Removing the sample that also serves as default promotes the next
    /// remaining one. Removing the default key clears the default.
    pub fn remove_sample(&mut self, key: SampleKey) -> Option<PathBuf> {
        match key {
            SampleKey::Pitch(pitch) => {
                let removed = self.pitched.remove(&pitch)?;
                if self.default.as_ref() == Some(&removed) {
                    self.default = self.pitched.values().next().cloned();
                }
                Some(removed)
            }
            SampleKey::Default => self.default.take(),
        }
    }

    #[must_use]
    pub fn sample_path(&self, pitch: u8) -> Option<&Path> {
        self.pitched
            .get(&pitch)
            .or(self.default.as_ref())
            .map(PathBuf::as_path)
    }

    #[must_use]
    pub fn default_path(&self) -> Option<&Path> {
        self.default.as_deref()
    }

    pub fn entries(&self) -> impl Iterator<Item = (SampleKey, &Path)> {
        self.pitched
            .iter()
            .map(|(pitch, path)| (SampleKey::Pitch(*pitch), path.as_path()))
            .chain(
                self.default
                    .iter()
                    .map(|path| (SampleKey::Default, path.as_path())),
            )
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pitched.is_empty() && self.default.is_none()
    }

    /// Builds a library from audio files named after their key, e.g.
    /// `60.wav`, `C#4.flac` or `default.wav`. Other files are skipped.
    #[instrument(fields(directory = %directory.display()))]
    pub fn scan_directory(directory: &Path) -> Result<Self, SampleError> {
        if !directory.is_dir() {
            return Err(SampleError::NotADirectory(directory.to_path_buf()));
        }

        let extensions = supported_audio_extensions();
        let mut files = Vec::new();
        for entry in WalkDir::new(directory).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(?error, "ignoring unreadable entry while scanning samples");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let extension = entry
                .path()
                .extension()
                .and_then(|value| value.to_str())
                .map(str::to_ascii_lowercase);
            let Some(extension) = extension else {
                continue;
            };
            if extensions.contains(&extension.as_str()) {
                files.push(entry.into_path());
            }
        }
        files.sort();

        let mut library = Self::new();
        let mut explicit_default = None;
        for path in files {
            let Some(stem) = path.file_stem().and_then(|value| value.to_str()) else {
                continue;
            };
            match stem.parse::<SampleKey>() {
                Ok(SampleKey::Default) => explicit_default = Some(path),
                Ok(key) => library.add_sample(key, path),
                Err(_) => debug!(path = %path.display(), "file name is not a sample key, skipping"),
            }
        }
        if let Some(path) = explicit_default {
            library.add_sample(SampleKey::Default, path);
        }

        info!(
            pitched = library.pitched.len(),
            has_default = library.default.is_some(),
            "sample directory scanned"
        );
        Ok(library)
    }

    /// Decodes every referenced file once; failures become silence.
    #[instrument(skip(self))]
    pub fn load(&self, target_rate: u32) -> Recovered<SampleMap> {
        let mut cache: BTreeMap<&Path, AudioBuffer> = BTreeMap::new();
        let mut substitutions = Vec::new();
        let mut map = SampleMap::new(target_rate);

        for (key, path) in self.entries() {
            let buffer = match cache.get(path) {
                Some(buffer) => buffer.clone(),
                None => {
                    let buffer = load_sample(path, target_rate).absorb_into(&mut substitutions);
                    cache.insert(path, buffer.clone());
                    buffer
                }
            };
            map.insert(key, buffer);
        }

        Recovered {
            value: map,
            substitutions,
        }
    }
}

/// Decoded samples, read-only for the duration of a render.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleMap {
    sample_rate: u32,
    pitched: BTreeMap<u8, AudioBuffer>,
    default: Option<AudioBuffer>,
}

impl SampleMap {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            pitched: BTreeMap::new(),
            default: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, buffer: AudioBuffer) -> Self {
        self.default = Some(buffer);
        self
    }

    pub fn insert(&mut self, key: SampleKey, buffer: AudioBuffer) {
        match key {
            SampleKey::Pitch(pitch) => {
                self.pitched.insert(pitch, buffer);
            }
            SampleKey::Default => self.default = Some(buffer),
        }
    }

    /// The sample for `pitch`, else the default one.
    #[must_use]
    pub fn resolve(&self, pitch: u8) -> Option<&AudioBuffer> {
        self.pitched.get(&pitch).or(self.default.as_ref())
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pitched.is_empty() && self.default.is_none()
    }
}
