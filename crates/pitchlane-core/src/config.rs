use std::{
    collections::BTreeMap,
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    buffer::DEFAULT_SAMPLE_RATE,
    effects::{EffectMap, EffectParams},
    export::ExportOptions,
    render::{REFERENCE_PITCH, RenderOptions},
    samples::{SampleKey, SampleLibrary},
    tempo::TempoPolicy,
    timeline::{ExtractOptions, TrackClock},
};

pub const CONFIG_FILE_NAME: &str = "pitchlane.config.toml";
pub const CONFIG_PATH_ENV: &str = "PITCHLANE_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PitchlaneConfig {
    pub render: RenderConfig,
    pub samples: SamplesConfig,
    /// Keyed by MIDI number or note name, e.g. `"64"` or `"E4"`.
    pub effects: BTreeMap<String, EffectParams>,
    pub export: ExportOptions,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub sample_rate: u32,
    pub reference_pitch: u8,
    pub parallel: bool,
    pub missing_sample_seconds: f64,
    pub failure_silence_seconds: f64,
    pub max_track_seconds: f64,
    pub tempo_policy: TempoPolicy,
    pub track_clock: TrackClock,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplesConfig {
    pub directory: Option<PathBuf>,
    pub default: Option<PathBuf>,
    pub map: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub log_dir: PathBuf,
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        let options = RenderOptions::default();
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            reference_pitch: REFERENCE_PITCH,
            parallel: options.parallel,
            missing_sample_seconds: options.missing_sample_seconds,
            failure_silence_seconds: options.failure_silence_seconds,
            max_track_seconds: options.max_track_seconds,
            tempo_policy: TempoPolicy::default(),
            track_clock: TrackClock::default(),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            rust_log_filter: crate::diagnostics::DEFAULT_LOG_FILTER.to_string(),
            trace_file_prefix: "pitchlane".to_string(),
        }
    }
}

impl RenderConfig {
    #[must_use]
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            sample_rate: self.sample_rate,
            reference_pitch: self.reference_pitch,
            parallel: self.parallel,
            missing_sample_seconds: self.missing_sample_seconds,
            failure_silence_seconds: self.failure_silence_seconds,
            max_track_seconds: self.max_track_seconds,
        }
    }

    #[must_use]
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            tempo_policy: self.tempo_policy,
            track_clock: self.track_clock,
        }
    }
}

impl PitchlaneConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse pitchlane config TOML")
    }

    #[instrument(fields(path = %path.display()))]
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config TOML from {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.samples.resolve_relative_to(base);
        }
        info!("config loaded");
        Ok(config)
    }

    /// Loads the first config found by [`discover_config_path`], or the
    /// built-in defaults when there is none.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let cwd = env::current_dir().context("failed to resolve current directory")?;
        match discover_config_path(explicit, env::var_os(CONFIG_PATH_ENV), &cwd) {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn effect_map(&self) -> Result<EffectMap> {
        let mut effects = EffectMap::new();
        for (key, params) in &self.effects {
            let pitch = match key.parse::<SampleKey>() {
                Ok(SampleKey::Pitch(pitch)) => pitch,
                Ok(SampleKey::Default) => {
                    anyhow::bail!("effects must name a pitch, not `{key}`")
                }
                Err(error) => {
                    return Err(error).with_context(|| format!("invalid effect key `{key}`"));
                }
            };
            effects.insert(pitch, *params);
        }
        Ok(effects)
    }

    /// Scans the sample directory, then layers the explicit map and default
    /// on top of it.
    pub fn sample_library(&self) -> Result<SampleLibrary> {
        let mut library = match &self.samples.directory {
            Some(directory) => SampleLibrary::scan_directory(directory)
                .with_context(|| format!("failed to scan samples in {}", directory.display()))?,
            None => SampleLibrary::new(),
        };
        for (key, path) in &self.samples.map {
            let key: SampleKey = key
                .parse()
                .with_context(|| format!("invalid sample key `{key}`"))?;
            library.add_sample(key, path.clone());
        }
        if let Some(path) = &self.samples.default {
            library.add_sample(SampleKey::Default, path.clone());
        }
        Ok(library)
    }
}

impl SamplesConfig {
    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        if let Some(directory) = &mut self.directory {
            resolve(directory);
        }
        if let Some(default) = &mut self.default {
            resolve(default);
        }
        self.map.values_mut().for_each(resolve);
    }
}

/// Explicit path first, then the `PITCHLANE_CONFIG_PATH` value, then
/// `pitchlane.config.toml` in `cwd`.
#[must_use]
pub fn discover_config_path(
    explicit: Option<&Path>,
    env_value: Option<OsString>,
    cwd: &Path,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env_value.map(PathBuf::from) {
        if path.is_file() {
            return Some(path);
        }
    }
    Some(cwd.join(CONFIG_FILE_NAME)).filter(|path| path.is_file())
}
