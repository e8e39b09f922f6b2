use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline stage at which a failure was replaced by a fallback value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SampleLoad,
    SampleLookup,
    PitchShift,
    Vibrato,
    Glide,
    NoteRender,
    Composition,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SampleLoad => "sample_load",
            Self::SampleLookup => "sample_lookup",
            Self::PitchShift => "pitch_shift",
            Self::Vibrato => "vibrato",
            Self::Glide => "glide",
            Self::NoteRender => "note_render",
            Self::Composition => "composition",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Substitution {
    pub stage: Stage,
    /// The note, sample or track the fallback stands in for.
    pub subject: String,
    pub reason: String,
}

impl Substitution {
    #[must_use]
    pub fn new(stage: Stage, subject: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            stage,
            subject: subject.into(),
            reason: reason.to_string(),
        }
    }
}

/// A value that is always present, plus every fallback taken to produce it.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered<T> {
    pub value: T,
    pub substitutions: Vec<Substitution>,
}

impl<T> Recovered<T> {
    #[must_use]
    pub fn clean(value: T) -> Self {
        Self {
            value,
            substitutions: Vec::new(),
        }
    }

    #[must_use]
    pub fn substituted(value: T, substitution: Substitution) -> Self {
        Self {
            value,
            substitutions: vec![substitution],
        }
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.substitutions.is_empty()
    }

    #[must_use]
    pub fn has_stage(&self, stage: Stage) -> bool {
        self.substitutions.iter().any(|entry| entry.stage == stage)
    }

    /// Moves this value's substitutions into `log` and returns the value.
    pub fn absorb_into(self, log: &mut Vec<Substitution>) -> T {
        log.extend(self.substitutions);
        self.value
    }

    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Recovered<U> {
        Recovered {
            value: f(self.value),
            substitutions: self.substitutions,
        }
    }
}
