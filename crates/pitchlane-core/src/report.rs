use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::{buffer::AudioBuffer, outcome::Substitution};

const REPORT_SCHEMA_VERSION: u32 = 1;

/// Summary of one render, stable enough to diff between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderReport {
    pub schema_version: u32,
    pub note_count: usize,
    pub frames: usize,
    pub track_seconds: f64,
    pub sample_rate: u32,
    pub substitutions: Vec<Substitution>,
    /// SHA-256 of the little-endian 16-bit PCM that was written.
    pub pcm_sha256: String,
}

impl RenderReport {
    #[must_use]
    pub fn new(note_count: usize, track: &AudioBuffer, substitutions: Vec<Substitution>) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            note_count,
            frames: track.len(),
            track_seconds: track.duration_seconds(),
            sample_rate: track.sample_rate,
            substitutions,
            pcm_sha256: pcm_fingerprint(track),
        }
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.substitutions.is_empty()
    }
}

#[must_use]
pub fn pcm_fingerprint(track: &AudioBuffer) -> String {
    let mut hasher = Sha256::new();
    for sample in track.to_pcm_i16() {
        hasher.update(sample.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[instrument(fields(path = %path.display()))]
pub fn read_report(path: &Path) -> Result<RenderReport> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read render report: {}", path.display()))?;
    let report: RenderReport =
        serde_json::from_slice(&bytes).context("failed to parse render report json")?;
    Ok(report)
}

#[instrument(skip(report), fields(path = %path.display()))]
pub fn write_report(path: &Path, report: &RenderReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create report directory: {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(report).context("failed to encode render report json")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write render report: {}", path.display()))?;
    Ok(())
}
