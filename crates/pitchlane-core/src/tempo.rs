use serde::{Deserialize, Serialize};

/// 120 BPM, the MIDI default until a tempo event says otherwise.
pub const DEFAULT_MICROS_PER_QUARTER: u32 = 500_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TickBase {
    Metrical { ticks_per_beat: u16 },
    Timecode { ticks_per_second: f64 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TempoChange {
    pub tick: u64,
    pub micros_per_quarter: u32,
}

/// Tempo events in the order the scan met them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TempoLog {
    pub base: TickBase,
    pub changes: Vec<TempoChange>,
}

impl TempoLog {
    #[must_use]
    pub fn new(base: TickBase) -> Self {
        Self {
            base,
            changes: Vec::new(),
        }
    }

    pub fn record(&mut self, tick: u64, micros_per_quarter: u32) {
        self.changes.push(TempoChange {
            tick,
            micros_per_quarter,
        });
    }

    /// The tempo left standing once the scan is over.
    #[must_use]
    pub fn final_micros_per_quarter(&self) -> u32 {
        self.changes
            .last()
            .map_or(DEFAULT_MICROS_PER_QUARTER, |change| change.micros_per_quarter)
    }
}

/// Strategy for turning event-clock ticks into seconds.
pub trait TickConversion: Send + Sync {
    fn seconds(&self, tick: u64, tempo: &TempoLog) -> f64;
}

/// Applies the final tempo uniformly to the whole file.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformFinalTempo;

impl TickConversion for UniformFinalTempo {
    fn seconds(&self, tick: u64, tempo: &TempoLog) -> f64 {
        match tempo.base {
            TickBase::Timecode { ticks_per_second } => timecode_seconds(tick, ticks_per_second),
            TickBase::Metrical { ticks_per_beat } => {
                if ticks_per_beat == 0 {
                    return 0.0;
                }
                let micros_per_tick =
                    f64::from(tempo.final_micros_per_quarter()) / f64::from(ticks_per_beat);
                tick as f64 * micros_per_tick / 1_000_000.0
            }
        }
    }
}

/// Integrates tick durations segment by segment between tempo changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PiecewiseTempo;

impl TickConversion for PiecewiseTempo {
    fn seconds(&self, tick: u64, tempo: &TempoLog) -> f64 {
        let ticks_per_beat = match tempo.base {
            TickBase::Timecode { ticks_per_second } => {
                return timecode_seconds(tick, ticks_per_second);
            }
            TickBase::Metrical { ticks_per_beat } => ticks_per_beat,
        };
        if ticks_per_beat == 0 {
            return 0.0;
        }

        let mut changes = tempo.changes.clone();
        changes.sort_by_key(|change| change.tick);

        let mut micros = 0.0_f64;
        let mut segment_start = 0_u64;
        let mut current = DEFAULT_MICROS_PER_QUARTER;
        for change in changes.iter().take_while(|change| change.tick <= tick) {
            micros += (change.tick - segment_start) as f64 * f64::from(current);
            segment_start = change.tick;
            current = change.micros_per_quarter;
        }
        micros += (tick - segment_start) as f64 * f64::from(current);
        micros / f64::from(ticks_per_beat) / 1_000_000.0
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TempoPolicy {
    #[default]
    UniformFinal,
    Piecewise,
}

impl TempoPolicy {
    #[must_use]
    pub fn converter(self) -> &'static dyn TickConversion {
        match self {
            Self::UniformFinal => &UniformFinalTempo,
            Self::Piecewise => &PiecewiseTempo,
        }
    }
}

fn timecode_seconds(tick: u64, ticks_per_second: f64) -> f64 {
    if ticks_per_second <= 0.0 {
        return 0.0;
    }
    tick as f64 / ticks_per_second
}

#[must_use]
pub fn bpm_to_micros_per_quarter(bpm: f64) -> u32 {
    if bpm <= 0.0 {
        return DEFAULT_MICROS_PER_QUARTER;
    }
    (60_000_000.0 / bpm).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrical(ticks_per_beat: u16) -> TempoLog {
        TempoLog::new(TickBase::Metrical { ticks_per_beat })
    }

    #[test]
    fn uniform_policy_uses_default_tempo_without_events() {
        let tempo = metrical(480);
        let seconds = UniformFinalTempo.seconds(960, &tempo);
        assert!((seconds - 1.0).abs() < 1e-12);
    }

    #[test]
    fn uniform_policy_applies_final_tempo_everywhere() {
        let mut tempo = metrical(480);
        tempo.record(0, 500_000);
        tempo.record(960, 1_000_000);
        // Both beats are timed at 60 BPM, including the one before the change.
        let seconds = UniformFinalTempo.seconds(1_920, &tempo);
        assert!((seconds - 4.0).abs() < 1e-12);
    }

    #[test]
    fn piecewise_policy_integrates_segments() {
        let mut tempo = metrical(480);
        tempo.record(960, 1_000_000);
        let before = PiecewiseTempo.seconds(960, &tempo);
        let after = PiecewiseTempo.seconds(1_920, &tempo);
        assert!((before - 1.0).abs() < 1e-12);
        assert!((after - 3.0).abs() < 1e-12);
    }

    #[test]
    fn timecode_ignores_tempo() {
        let mut tempo = TempoLog::new(TickBase::Timecode {
            ticks_per_second: 1_000.0,
        });
        tempo.record(0, 250_000);
        assert!((UniformFinalTempo.seconds(2_500, &tempo) - 2.5).abs() < 1e-12);
        assert!((PiecewiseTempo.seconds(2_500, &tempo) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn bpm_conversion_matches_midi_default() {
        assert_eq!(bpm_to_micros_per_quarter(120.0), DEFAULT_MICROS_PER_QUARTER);
        assert_eq!(bpm_to_micros_per_quarter(0.0), DEFAULT_MICROS_PER_QUARTER);
    }
}
