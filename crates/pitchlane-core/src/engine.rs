use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, instrument};

use crate::{
    buffer::AudioBuffer,
    compose,
    config::PitchlaneConfig,
    effects::{EffectMap, EffectParams},
    export::{self, ExportOptions},
    outcome::Recovered,
    render::RenderOptions,
    report::RenderReport,
    samples::{self, SampleKey, SampleLibrary},
    timeline::{self, ExtractOptions, NoteEvent, Timeline, TimelineError},
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(format!("{value:#}"))
    }
}

/// Session state between calls: the loaded timeline, sample assignments and
/// per-pitch effects. Rendering works on immutable snapshots of all three.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    timeline: Option<Timeline>,
    library: SampleLibrary,
    effects: EffectMap,
    render_options: RenderOptions,
    extract_options: ExtractOptions,
    export_options: ExportOptions,
}

impl Engine {
    #[must_use]
    pub fn new(render_options: RenderOptions, extract_options: ExtractOptions) -> Self {
        Self {
            render_options,
            extract_options,
            ..Self::default()
        }
    }

    pub fn from_config(config: &PitchlaneConfig) -> Result<Self, EngineError> {
        let library = config
            .sample_library()
            .map_err(|error| EngineError::Config(format!("{error:#}")))?;
        let effects = config
            .effect_map()
            .map_err(|error| EngineError::Config(format!("{error:#}")))?;
        Ok(Self {
            timeline: None,
            library,
            effects,
            render_options: config.render.render_options(),
            extract_options: config.render.extract_options(),
            export_options: config.export.clone(),
        })
    }

    #[must_use]
    pub fn render_options(&self) -> &RenderOptions {
        &self.render_options
    }

    #[must_use]
    pub fn timeline(&self) -> Option<&Timeline> {
        self.timeline.as_ref()
    }

    #[must_use]
    pub fn library(&self) -> &SampleLibrary {
        &self.library
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn load_midi(&mut self, path: &Path) -> Result<&Timeline, EngineError> {
        let loaded = timeline::load_midi(path, &self.extract_options)?;
        info!(notes = loaded.len(), "timeline replaced");
        Ok(&*self.timeline.insert(loaded))
    }

    pub fn load_midi_bytes(&mut self, bytes: &[u8]) -> Result<&Timeline, EngineError> {
        let loaded = timeline::extract_timeline(bytes, &self.extract_options)?;
        Ok(&*self.timeline.insert(loaded))
    }

    /// Decodes a sample at the render rate; unreadable files come back as
    /// one second of silence.
    #[must_use]
    pub fn load_sample(&self, path: &Path) -> AudioBuffer {
        samples::load_sample(path, self.render_options.sample_rate).value
    }

    #[instrument(skip(self, path))]
    pub fn add_sample(&mut self, key: SampleKey, path: impl Into<PathBuf>) {
        self.library.add_sample(key, path);
        info!(default = ?self.library.default_path(), "sample assigned");
    }

    #[instrument(skip(self))]
    pub fn remove_sample(&mut self, key: SampleKey) -> Option<PathBuf> {
        let removed = self.library.remove_sample(key);
        info!(removed = removed.is_some(), default = ?self.library.default_path(), "sample removed");
        removed
    }

    #[instrument(skip(self, params))]
    pub fn set_effect(&mut self, pitch: u8, params: EffectParams) {
        self.effects.insert(pitch, params);
        info!(
            vibrato = params.vibrato.is_some(),
            glide = params.glide.is_some(),
            "effect set"
        );
    }

    pub fn clear_effect(&mut self, pitch: u8) -> Option<EffectParams> {
        self.effects.remove(&pitch)
    }

    #[must_use]
    pub fn effects_for(&self, pitch: u8) -> Option<&EffectParams> {
        self.effects.get(&pitch)
    }

    /// All loaded notes in playback order; empty before any MIDI is loaded.
    #[must_use]
    pub fn notes(&self) -> Vec<NoteEvent> {
        self.timeline.as_ref().map(Timeline::notes).unwrap_or_default()
    }

    #[instrument(skip(self), fields(sample_rate = self.render_options.sample_rate))]
    pub fn render_track(&self) -> Recovered<AudioBuffer> {
        let notes = self.notes();
        let mut substitutions = Vec::new();
        let samples = self
            .library
            .load(self.render_options.sample_rate)
            .absorb_into(&mut substitutions);
        let track = compose::compose(&notes, &samples, &self.effects, &self.render_options)
            .absorb_into(&mut substitutions);
        Recovered {
            value: track,
            substitutions,
        }
    }

    /// Renders, writes the WAV and reports on what was written.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn export_wav(&self, path: &Path) -> Result<RenderReport, EngineError> {
        let note_count = self.notes().len();
        let track = self.render_track();
        let written = export::export_track(&track.value, path, &self.export_options)?;
        let report = RenderReport::new(note_count, &written, track.substitutions);
        info!(
            frames = report.frames,
            substitutions = report.substitutions.len(),
            "track exported"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{demo_midi_bytes, demo_notes};

    #[test]
    fn notes_are_empty_before_midi_is_loaded() {
        let engine = Engine::default();
        assert!(engine.notes().is_empty());
        assert!(engine.render_track().value.is_empty());
    }

    #[test]
    fn effects_can_be_set_and_cleared() {
        let mut engine = Engine::default();
        let params = EffectParams::default().with_vibrato(6.0, 0.2);
        engine.set_effect(64, params);
        assert_eq!(engine.effects_for(64), Some(&params));
        assert_eq!(engine.clear_effect(64), Some(params));
        assert_eq!(engine.effects_for(64), None);
    }

    #[test]
    fn loaded_bytes_replace_the_timeline() {
        let mut engine = Engine::default();
        let bytes = demo_midi_bytes().expect("demo midi should encode");
        let count = engine.load_midi_bytes(&bytes).expect("demo midi should parse").len();
        assert_eq!(count, demo_notes().len());
        assert_eq!(engine.notes().len(), count);
    }

    #[test]
    fn missing_midi_file_is_a_timeline_error() {
        let mut engine = Engine::default();
        let result = engine.load_midi(Path::new("/definitely/not/here.mid"));
        assert!(matches!(
            result,
            Err(EngineError::Timeline(TimelineError::Io { .. }))
        ));
    }
}
