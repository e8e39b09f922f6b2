use std::{
    fs,
    io::BufWriter,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{buffer::AudioBuffer, tempo::bpm_to_micros_per_quarter, timeline::NoteEvent};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportOptions {
    /// Peak-normalise the track before writing.
    pub normalize: bool,
    pub normalize_target_dbfs: f32,
    /// Linear fade in and out, in milliseconds. Zero disables fading.
    pub fade_ms: u32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            normalize: false,
            normalize_target_dbfs: -0.1,
            fade_ms: 0,
        }
    }
}

/// A note as authored into a Standard MIDI File.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MidiNote {
    pub pitch: u8,
    pub velocity: u8,
    pub channel: u8,
    pub start_tick: u64,
    pub length_ticks: u64,
}

impl MidiNote {
    #[must_use]
    pub fn new(pitch: u8, start_tick: u64, length_ticks: u64) -> Self {
        Self {
            pitch,
            velocity: 100,
            channel: 0,
            start_tick,
            length_ticks,
        }
    }

    #[must_use]
    pub fn end_tick(&self) -> u64 {
        self.start_tick.saturating_add(self.length_ticks)
    }
}

impl From<&NoteEvent> for MidiNote {
    fn from(note: &NoteEvent) -> Self {
        Self {
            pitch: note.pitch,
            velocity: note.velocity,
            channel: note.channel,
            start_tick: note.start_tick,
            length_ticks: note.end_tick.saturating_sub(note.start_tick),
        }
    }
}

#[derive(Debug, Clone)]
struct AbsoluteMidiEvent {
    tick: u64,
    order: u8,
    kind: TrackEventKind<'static>,
}

fn ensure_parent(path: &Path, what: &str) -> Result<PathBuf> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create {what} output directory: {}", parent.display()))?;
    Ok(parent)
}

/// Writes the buffer as mono 16-bit PCM, replacing `path` only once the file
/// is complete.
#[instrument(skip(buffer), fields(path = %path.display(), frames = buffer.len(), sample_rate = buffer.sample_rate))]
pub fn write_wav(buffer: &AudioBuffer, path: &Path) -> Result<()> {
    let parent = ensure_parent(path, "wav")?;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut temp_file = tempfile::NamedTempFile::new_in(&parent)
        .context("failed to create temporary wav file")?;
    {
        let mut writer = hound::WavWriter::new(BufWriter::new(temp_file.as_file_mut()), spec)
            .context("failed to start wav stream")?;
        for sample in buffer.to_pcm_i16() {
            writer
                .write_sample(sample)
                .context("failed to write wav sample")?;
        }
        writer.finalize().context("failed to finalize wav file")?;
    }

    temp_file
        .persist(path)
        .map_err(|error| anyhow::anyhow!(error.error))
        .with_context(|| format!("failed to persist wav file: {}", path.display()))?;

    info!("wav export completed");
    Ok(())
}

/// Applies the export options to a rendered track and writes it. Returns the
/// buffer exactly as written.
#[instrument(skip(track, options), fields(path = %path.display(), normalize = options.normalize, fade_ms = options.fade_ms))]
pub fn export_track(track: &AudioBuffer, path: &Path, options: &ExportOptions) -> Result<AudioBuffer> {
    let mut processed = track.clone();
    if options.normalize {
        processed = processed.normalized(options.normalize_target_dbfs);
    }
    if options.fade_ms > 0 {
        processed = processed.with_fades(f64::from(options.fade_ms) / 1_000.0);
    }
    debug!(peak = processed.peak(), rms = processed.rms(), "track processed for export");
    write_wav(&processed, path)?;
    Ok(processed)
}

#[instrument(skip(notes), fields(notes = notes.len(), path = %path.display()))]
pub fn export_midi(notes: &[MidiNote], bpm: f64, ppq: u16, path: &Path) -> Result<()> {
    ensure_parent(path, "midi")?;
    let bytes = midi_bytes(notes, bpm, ppq)?;
    fs::write(path, bytes)
        .with_context(|| format!("failed to write midi file: {}", path.display()))?;
    info!("midi export completed");
    Ok(())
}

/// Authors a format-1 file: a tempo track followed by one track of notes.
pub fn midi_bytes(notes: &[MidiNote], bpm: f64, ppq: u16) -> Result<Vec<u8>> {
    midi_bytes_multi(&[notes], bpm, ppq)
}

/// Like [`midi_bytes`], with each slice written as its own track in order.
#[instrument(skip(tracks), fields(tracks = tracks.len()))]
pub fn midi_bytes_multi(tracks: &[&[MidiNote]], bpm: f64, ppq: u16) -> Result<Vec<u8>> {
    let mut smf_tracks = Vec::with_capacity(tracks.len() + 1);
    smf_tracks.push(build_tempo_track(bpm));

    for notes in tracks {
        let mut absolute_events: Vec<AbsoluteMidiEvent> =
            notes.iter().flat_map(note_to_midi_events).collect();
        absolute_events.sort_by_key(|event| (event.tick, event.order));

        let mut track_events = Vec::with_capacity(absolute_events.len() + 1);
        let mut previous_tick = 0_u64;
        for event in absolute_events {
            let delta = event
                .tick
                .saturating_sub(previous_tick)
                .min(u64::from(u32::MAX)) as u32;
            track_events.push(TrackEvent {
                delta: u28::from(delta),
                kind: event.kind,
            });
            previous_tick = event.tick;
        }
        track_events.push(TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        smf_tracks.push(track_events);
    }

    let header = Header {
        format: Format::Parallel,
        timing: Timing::Metrical(u15::from(ppq.clamp(1, 0x7fff))),
    };

    let mut bytes = Vec::new();
    Smf {
        header,
        tracks: smf_tracks,
    }
    .write_std(&mut bytes)
    .context("failed to encode midi bytes")?;
    Ok(bytes)
}

fn build_tempo_track(bpm: f64) -> Vec<TrackEvent<'static>> {
    let micros_per_quarter = bpm_to_micros_per_quarter(bpm.max(10.0));

    vec![
        TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(micros_per_quarter))),
        },
        TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8)),
        },
        TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]
}

fn note_to_midi_events(note: &MidiNote) -> [AbsoluteMidiEvent; 2] {
    let channel = note.channel.min(15);
    let pitch = note.pitch.min(127);
    let velocity = note.velocity.clamp(1, 127);

    [
        AbsoluteMidiEvent {
            tick: note.start_tick,
            order: 1,
            kind: TrackEventKind::Midi {
                channel: u4::from(channel),
                message: MidiMessage::NoteOn {
                    key: u7::from(pitch),
                    vel: u7::from(velocity),
                },
            },
        },
        AbsoluteMidiEvent {
            tick: note.end_tick(),
            order: 0,
            kind: TrackEventKind::Midi {
                channel: u4::from(channel),
                message: MidiMessage::NoteOff {
                    key: u7::from(pitch),
                    vel: u7::from(0),
                },
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{ExtractOptions, extract_timeline};

    #[test]
    fn authored_notes_extract_back_with_ticks() {
        let notes = [MidiNote::new(60, 0, 480), MidiNote::new(67, 480, 960)];
        let bytes = midi_bytes(&notes, 120.0, 480).expect("midi should encode");
        let timeline =
            extract_timeline(&bytes, &ExtractOptions::default()).expect("midi should parse");
        let extracted: Vec<MidiNote> = timeline.notes().iter().map(MidiNote::from).collect();
        assert_eq!(extracted, notes);
    }

    #[test]
    fn wav_is_mono_sixteen_bit() {
        let temp = tempfile::tempdir().expect("tempdir should work");
        let path = temp.path().join("out/track.wav");
        let buffer = AudioBuffer::new(22_050, vec![0.0, 0.5, -0.5, 1.0]);
        write_wav(&buffer, &path).expect("wav should write");

        let mut reader = hound::WavReader::open(&path).expect("wav should open");
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_rate, 22_050);
        let samples: Vec<i16> = reader
            .samples::<i16>()
            .collect::<Result<_, _>>()
            .expect("samples should decode");
        assert_eq!(samples, buffer.to_pcm_i16());
    }

    #[test]
    fn export_track_normalizes_when_asked() {
        let temp = tempfile::tempdir().expect("tempdir should work");
        let path = temp.path().join("normalized.wav");
        let track = AudioBuffer::new(8_000, vec![0.1, -0.25, 0.2]);
        let options = ExportOptions {
            normalize: true,
            normalize_target_dbfs: 0.0,
            fade_ms: 0,
        };
        let written = export_track(&track, &path, &options).expect("export should work");
        assert!((written.peak() - 1.0).abs() < 1e-6);
    }
}
