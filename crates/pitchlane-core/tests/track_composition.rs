use pitchlane_core::{
    AudioBuffer, EffectMap, EffectParams, NoteRenderer, RenderOptions, SampleKey, SampleMap,
    Stage, compose,
    fixtures::{note_at, sine_sample},
};

const RATE: u32 = 8_000;

fn options() -> RenderOptions {
    RenderOptions {
        sample_rate: RATE,
        parallel: false,
        ..RenderOptions::default()
    }
}

fn sample_map() -> SampleMap {
    SampleMap::new(RATE).with_default(sine_sample(261.63, 0.6, RATE))
}

#[test]
fn simultaneous_notes_sum_their_clips() {
    let samples = sample_map();
    let notes = vec![note_at(0, 60, 0.0, 0.5), note_at(1, 64, 0.0, 0.5)];
    let track = compose(&notes, &samples, &EffectMap::new(), &options());

    assert!(track.is_clean());
    assert!(track.value.len() >= 4_000);

    let renderer = NoteRenderer::from_options(&options());
    let sample = samples.resolve(60).expect("default sample should resolve");
    let first = renderer.render(&notes[0], sample, None).value;
    let second = renderer.render(&notes[1], sample, None).value;
    for index in 0..4_000 {
        let expected = first.samples[index] + second.samples[index];
        assert!(
            (track.value.samples[index] - expected).abs() < 1e-6,
            "frame {index} is not the sum of both clips"
        );
    }
}

#[test]
fn overlapping_notes_with_different_starts_mix_additively() {
    let samples = sample_map();
    let notes = vec![note_at(0, 60, 0.0, 0.4), note_at(1, 67, 0.25, 0.6)];
    let track = compose(&notes, &samples, &EffectMap::new(), &options());

    let renderer = NoteRenderer::from_options(&options());
    let sample = samples.resolve(60).expect("default sample should resolve");
    let first = renderer.render(&notes[0], sample, None).value;
    let second = renderer.render(&notes[1], sample, None).value;

    let mut expected = AudioBuffer::new(RATE, Vec::new());
    expected.overlay_at(&first, 0);
    expected.overlay_at(&second, 2_000);
    assert_eq!(track.value.len(), 4_800);
    for (index, (actual, wanted)) in track.value.samples.iter().zip(&expected.samples).enumerate() {
        assert!((actual - wanted).abs() < 1e-6, "frame {index} differs");
    }
}

#[test]
fn track_is_at_least_as_long_as_the_last_note() {
    let samples = SampleMap::new(RATE).with_default(sine_sample(261.63, 0.05, RATE));
    let notes = vec![
        note_at(0, 62, 0.3, 1.7),
        note_at(1, 60, 0.0, 0.1),
        note_at(2, 65, 1.0, 1.2),
    ];
    let track = compose(&notes, &samples, &EffectMap::new(), &options());
    assert!(track.value.len() >= 13_600);
    assert!(track.value.duration_seconds() >= 1.7);
}

#[test]
fn missing_sample_without_default_renders_silence() {
    let mut samples = SampleMap::new(RATE);
    samples.insert(SampleKey::Pitch(60), sine_sample(261.63, 0.5, RATE));
    let notes = vec![note_at(0, 60, 0.0, 0.5), note_at(1, 61, 0.5, 1.0)];
    let track = compose(&notes, &samples, &EffectMap::new(), &options());

    assert_eq!(track.value.len(), 8_000);
    assert!(track.value.samples[..4_000].iter().any(|value| *value != 0.0));
    assert!(track.value.samples[4_000..].iter().all(|value| *value == 0.0));
    assert!(track.has_stage(Stage::SampleLookup));
    let lookup = track
        .substitutions
        .iter()
        .find(|substitution| substitution.stage == Stage::SampleLookup)
        .expect("lookup substitution should be reported");
    assert!(lookup.subject.contains("pitch 61"));
}

#[test]
fn effects_are_looked_up_by_pitch() {
    let samples = sample_map();
    let notes = vec![note_at(0, 60, 0.0, 0.5)];
    let dry = compose(&notes, &samples, &EffectMap::new(), &options());

    let mut effects = EffectMap::new();
    effects.insert(61, EffectParams::default().with_vibrato(5.0, 0.5));
    let other_pitch = compose(&notes, &samples, &effects, &options());
    assert_eq!(dry.value, other_pitch.value);

    effects.insert(60, EffectParams::default().with_vibrato(5.0, 0.5));
    let wet = compose(&notes, &samples, &effects, &options());
    assert_eq!(wet.value.len(), dry.value.len());
    assert_ne!(wet.value, dry.value);
}

#[test]
fn unsorted_input_composes_like_sorted_input() {
    let samples = sample_map();
    let sorted = vec![
        note_at(0, 60, 0.0, 0.2),
        note_at(1, 62, 0.2, 0.4),
        note_at(2, 64, 0.4, 0.6),
    ];
    let mut shuffled = sorted.clone();
    shuffled.reverse();
    let left = compose(&sorted, &samples, &EffectMap::new(), &options());
    let right = compose(&shuffled, &samples, &EffectMap::new(), &options());
    assert_eq!(left.value, right.value);
}
