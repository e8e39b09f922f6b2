use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::{
    buffer::{AudioBuffer, seconds_to_frames},
    effects::EffectMap,
    outcome::{Recovered, Stage, Substitution},
    render::{NoteRenderer, RenderError, RenderOptions, note_subject},
    samples::SampleMap,
    timeline::NoteEvent,
};

/// Renders every note and lays the clips out on one track.
///
/// Never fails: a note without a sample plays a short silence, a note that
/// cannot be rendered becomes silence of its own length, and if composition
/// itself fails the whole track is replaced by
/// [`RenderOptions::failure_silence_seconds`] of silence.
#[instrument(skip_all, fields(notes = notes.len(), sample_rate = options.sample_rate))]
pub fn compose(
    notes: &[NoteEvent],
    samples: &SampleMap,
    effects: &EffectMap,
    options: &RenderOptions,
) -> Recovered<AudioBuffer> {
    match try_compose(notes, samples, effects, options) {
        Ok(track) => track,
        Err(error) => {
            warn!(%error, "track composition failed, substituting silence");
            Recovered::substituted(
                AudioBuffer::silence(options.failure_silence_seconds, options.sample_rate),
                Substitution::new(Stage::Composition, "track", error),
            )
        }
    }
}

pub fn try_compose(
    notes: &[NoteEvent],
    samples: &SampleMap,
    effects: &EffectMap,
    options: &RenderOptions,
) -> Result<Recovered<AudioBuffer>, RenderError> {
    validate_timing(notes, options)?;

    let renderer = NoteRenderer::from_options(options);
    let placeholder = AudioBuffer::silence(options.missing_sample_seconds, options.sample_rate);
    let render_one = |note: &NoteEvent| -> (usize, Recovered<AudioBuffer>) {
        let start = seconds_to_frames(note.start_sec, options.sample_rate);
        let note_effects = effects.get(&note.pitch);
        let clip = match samples.resolve(note.pitch) {
            Some(sample) => renderer.render(note, sample, note_effects),
            None => {
                warn!(
                    ordinal = note.ordinal,
                    pitch = note.pitch,
                    "no sample for note and no default sample, using silence"
                );
                let mut clip = renderer.render(note, &placeholder, note_effects);
                clip.substitutions.insert(
                    0,
                    Substitution::new(
                        Stage::SampleLookup,
                        note_subject(note),
                        "no sample for pitch and no default sample",
                    ),
                );
                clip
            }
        };
        (start, clip)
    };

    let rendered: Vec<(usize, Recovered<AudioBuffer>)> = if options.parallel {
        notes.par_iter().map(render_one).collect()
    } else {
        notes.iter().map(render_one).collect()
    };

    let mut substitutions = Vec::new();
    let mut buckets: BTreeMap<usize, Vec<AudioBuffer>> = BTreeMap::new();
    for (start, clip) in rendered {
        let clip = clip.absorb_into(&mut substitutions);
        buckets.entry(start).or_default().push(clip);
    }

    let mut track = AudioBuffer::silence_frames(0, options.sample_rate);
    let mut track_end = 0_usize;
    for (start, clips) in &buckets {
        if *start > track.len() {
            track = track.fit_to_frames(*start);
        }
        let mixed = AudioBuffer::mix(clips, options.sample_rate);
        track.overlay_at(&mixed, *start);
        track_end = track_end.max(start + mixed.len());
        debug!(
            start_frame = start,
            simultaneous = clips.len(),
            track_end,
            "bucket placed"
        );
    }

    let last_note_end = notes
        .iter()
        .map(|note| seconds_to_frames(note.end_sec, options.sample_rate))
        .max()
        .unwrap_or(0);
    if track.len() < last_note_end {
        track = track.fit_to_frames(last_note_end);
    }

    info!(
        frames = track.len(),
        buckets = buckets.len(),
        substitutions = substitutions.len(),
        "track composed"
    );
    Ok(Recovered {
        value: track,
        substitutions,
    })
}

fn validate_timing(notes: &[NoteEvent], options: &RenderOptions) -> Result<(), RenderError> {
    let mut latest_end = 0.0_f64;
    for note in notes {
        if !note.start_sec.is_finite() || note.start_sec < 0.0 {
            return Err(RenderError::InvalidStart {
                ordinal: note.ordinal,
                start: note.start_sec,
            });
        }
        if !note.end_sec.is_finite() || note.end_sec < note.start_sec {
            return Err(RenderError::InvalidDuration {
                ordinal: note.ordinal,
                duration: note.end_sec - note.start_sec,
            });
        }
        latest_end = latest_end.max(note.end_sec);
    }
    if latest_end > options.max_track_seconds {
        return Err(RenderError::TrackTooLong {
            seconds: latest_end,
            limit: options.max_track_seconds,
        });
    }
    Ok(())
}
