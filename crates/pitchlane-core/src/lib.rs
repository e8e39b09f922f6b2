pub mod buffer;
pub mod compose;
pub mod config;
pub mod diagnostics;
pub mod effects;
pub mod engine;
pub mod export;
pub mod fixtures;
pub mod outcome;
pub mod pitch;
pub mod render;
pub mod report;
pub mod samples;
pub mod tempo;
pub mod timeline;

pub use buffer::{AudioBuffer, DEFAULT_SAMPLE_RATE};
pub use compose::{compose, try_compose};
pub use config::PitchlaneConfig;
pub use diagnostics::{TelemetryGuard, init_tracing, init_tracing_with_options};
pub use effects::{EffectMap, EffectParams, Glide, Vibrato};
pub use engine::{Engine, EngineError};
pub use export::{ExportOptions, MidiNote, export_track, midi_bytes, write_wav};
pub use outcome::{Recovered, Stage, Substitution};
pub use pitch::PitchShifter;
pub use render::{NoteRenderer, REFERENCE_PITCH, RenderError, RenderOptions};
pub use report::RenderReport;
pub use samples::{SampleKey, SampleLibrary, SampleMap, load_sample};
pub use tempo::TempoPolicy;
pub use timeline::{ExtractOptions, NoteEvent, Timeline, TrackClock, extract_timeline, load_midi};
