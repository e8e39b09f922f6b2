use std::{collections::BTreeMap, fs, path::Path};

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, trace};

use crate::tempo::{TempoLog, TempoPolicy, TickBase};

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("failed to read midi file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed midi data: {0}")]
    Parse(String),
    #[error("midi header declares zero ticks per beat")]
    ZeroResolution,
}

/// How the running tick counter behaves at track boundaries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackClock {
    /// One counter runs through every track in file order.
    #[default]
    Continuous,
    /// The counter restarts at zero for each track.
    PerTrack,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExtractOptions {
    pub tempo_policy: TempoPolicy,
    pub track_clock: TrackClock,
}

/// A finalized note with absolute times.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoteEvent {
    /// Position among all note-ons in scan order; breaks start-time ties.
    pub ordinal: usize,
    pub pitch: u8,
    pub channel: u8,
    pub velocity: u8,
    pub start_tick: u64,
    pub end_tick: u64,
    pub start_sec: f64,
    pub end_sec: f64,
    pub duration_sec: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteState {
    Open,
    Closed { end_tick: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNote {
    pub ordinal: usize,
    pub pitch: u8,
    pub channel: u8,
    pub velocity: u8,
    pub start_tick: u64,
    pub state: NoteState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedNote {
    pub ordinal: usize,
    pub pitch: u8,
    pub channel: u8,
    pub velocity: u8,
    pub start_tick: u64,
    pub end_tick: u64,
}

/// Note-on/note-off matching, one ordered queue per `(pitch, channel)`.
///
/// A note-off closes the oldest still-open entry of its queue that started at
/// or before the current tick. Overlapping notes of the same pitch and channel
/// therefore pair first-in first-out.
#[derive(Debug, Default)]
pub struct NotePairing {
    queues: BTreeMap<(u8, u8), Vec<PendingNote>>,
    next_ordinal: usize,
}

impl NotePairing {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, pitch: u8, channel: u8, velocity: u8, tick: u64) -> usize {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.queues
            .entry((pitch, channel))
            .or_default()
            .push(PendingNote {
                ordinal,
                pitch,
                channel,
                velocity,
                start_tick: tick,
                state: NoteState::Open,
            });
        ordinal
    }

    /// Returns the ordinal of the note that was closed, if any matched.
    pub fn close(&mut self, pitch: u8, channel: u8, tick: u64) -> Option<usize> {
        let queue = self.queues.get_mut(&(pitch, channel))?;
        let pending = queue
            .iter_mut()
            .find(|pending| pending.state == NoteState::Open && pending.start_tick <= tick)?;
        pending.state = NoteState::Closed { end_tick: tick };
        Some(pending.ordinal)
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.queues
            .values()
            .flatten()
            .filter(|pending| pending.state == NoteState::Open)
            .count()
    }

    /// Closes every note still open at `max_tick` and returns all notes in
    /// ordinal order.
    #[must_use]
    pub fn finish(self, max_tick: u64) -> Vec<ClosedNote> {
        let mut closed: Vec<ClosedNote> = self
            .queues
            .into_values()
            .flatten()
            .map(|pending| {
                let end_tick = match pending.state {
                    NoteState::Closed { end_tick } => end_tick,
                    NoteState::Open => max_tick.max(pending.start_tick),
                };
                ClosedNote {
                    ordinal: pending.ordinal,
                    pitch: pending.pitch,
                    channel: pending.channel,
                    velocity: pending.velocity,
                    start_tick: pending.start_tick,
                    end_tick,
                }
            })
            .collect();
        closed.sort_by_key(|note| note.ordinal);
        closed
    }
}

/// Notes grouped by pitch, plus the tempo information they were timed with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Timeline {
    by_pitch: BTreeMap<u8, Vec<NoteEvent>>,
    tempo: TempoLog,
    max_tick: u64,
}

impl Timeline {
    #[must_use]
    pub fn empty(base: TickBase) -> Self {
        Self {
            by_pitch: BTreeMap::new(),
            tempo: TempoLog::new(base),
            max_tick: 0,
        }
    }

    /// All notes ordered by `start_sec`, ties in scan order.
    #[must_use]
    pub fn notes(&self) -> Vec<NoteEvent> {
        let mut notes: Vec<NoteEvent> = self.by_pitch.values().flatten().cloned().collect();
        notes.sort_by_key(|note| note.ordinal);
        notes.sort_by(|left, right| left.start_sec.total_cmp(&right.start_sec));
        notes
    }

    #[must_use]
    pub fn notes_for_pitch(&self, pitch: u8) -> &[NoteEvent] {
        self.by_pitch.get(&pitch).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn pitches(&self) -> impl Iterator<Item = u8> + '_ {
        self.by_pitch.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_pitch.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn end_seconds(&self) -> f64 {
        self.by_pitch
            .values()
            .flatten()
            .map(|note| note.end_sec)
            .fold(0.0, f64::max)
    }

    #[must_use]
    pub fn max_tick(&self) -> u64 {
        self.max_tick
    }

    #[must_use]
    pub fn tempo(&self) -> &TempoLog {
        &self.tempo
    }

    #[must_use]
    pub fn ticks_per_beat(&self) -> Option<u16> {
        match self.tempo.base {
            TickBase::Metrical { ticks_per_beat } => Some(ticks_per_beat),
            TickBase::Timecode { .. } => None,
        }
    }
}

#[instrument(fields(path = %path.display()))]
pub fn load_midi(path: &Path, options: &ExtractOptions) -> Result<Timeline, TimelineError> {
    let bytes = fs::read(path).map_err(|source| TimelineError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let timeline = extract_timeline(&bytes, options)?;
    info!(notes = timeline.len(), "midi file loaded");
    Ok(timeline)
}

/// Scans every track once, pairs note-ons with note-offs, then times the
/// notes with the configured tempo policy.
#[instrument(skip(bytes), fields(bytes = bytes.len()))]
pub fn extract_timeline(bytes: &[u8], options: &ExtractOptions) -> Result<Timeline, TimelineError> {
    let smf = Smf::parse(bytes).map_err(|error| TimelineError::Parse(error.to_string()))?;
    let base = match smf.header.timing {
        Timing::Metrical(ticks_per_beat) => {
            let ticks_per_beat = ticks_per_beat.as_int();
            if ticks_per_beat == 0 {
                return Err(TimelineError::ZeroResolution);
            }
            TickBase::Metrical { ticks_per_beat }
        }
        Timing::Timecode(fps, subframes) => TickBase::Timecode {
            ticks_per_second: f64::from(fps.as_f32()) * f64::from(subframes),
        },
    };

    let mut tempo = TempoLog::new(base);
    let mut pairing = NotePairing::new();
    let mut tick = 0_u64;
    let mut max_tick = 0_u64;
    let mut unmatched_offs = 0_usize;

    for track in &smf.tracks {
        if options.track_clock == TrackClock::PerTrack {
            tick = 0;
        }
        for event in track {
            tick = tick.saturating_add(u64::from(event.delta.as_int()));
            max_tick = max_tick.max(tick);

            match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(micros_per_quarter)) => {
                    tempo.record(tick, micros_per_quarter.as_int());
                }
                TrackEventKind::Midi { channel, message } => match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        pairing.open(key.as_int(), channel.as_int(), vel.as_int(), tick);
                    }
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                        if pairing.close(key.as_int(), channel.as_int(), tick).is_none() {
                            unmatched_offs += 1;
                            trace!(pitch = key.as_int(), tick, "note-off without open note");
                        }
                    }
                    _ => {}
                },
                _ => {}
            }
        }
    }

    let unterminated = pairing.open_count();
    if unterminated > 0 {
        debug!(
            unterminated,
            max_tick, "closing unterminated notes at final event tick"
        );
    }

    let converter = options.tempo_policy.converter();
    let mut by_pitch: BTreeMap<u8, Vec<NoteEvent>> = BTreeMap::new();
    for note in pairing.finish(max_tick) {
        let start_sec = converter.seconds(note.start_tick, &tempo);
        let end_sec = converter.seconds(note.end_tick, &tempo).max(start_sec);
        by_pitch.entry(note.pitch).or_default().push(NoteEvent {
            ordinal: note.ordinal,
            pitch: note.pitch,
            channel: note.channel,
            velocity: note.velocity,
            start_tick: note.start_tick,
            end_tick: note.end_tick,
            start_sec,
            end_sec,
            duration_sec: end_sec - start_sec,
        });
    }

    let timeline = Timeline {
        by_pitch,
        tempo,
        max_tick,
    };
    debug!(
        notes = timeline.len(),
        max_tick,
        unmatched_offs,
        tempo_changes = timeline.tempo.changes.len(),
        "timeline extracted"
    );
    Ok(timeline)
}
