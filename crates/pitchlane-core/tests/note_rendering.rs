use pitchlane_core::{
    AudioBuffer, EffectParams, NoteRenderer, REFERENCE_PITCH, Stage,
    fixtures::{note_at, sine_sample},
};

const RATE: u32 = 44_100;

fn crossing_frequency(samples: &[f32], sample_rate: u32) -> f64 {
    let crossings = samples
        .windows(2)
        .filter(|pair| (pair[0] < 0.0) != (pair[1] < 0.0))
        .count();
    crossings as f64 / 2.0 / (samples.len() as f64 / f64::from(sample_rate))
}

#[test]
fn reference_pitch_note_returns_the_sample_unchanged() {
    let renderer = NoteRenderer::new(RATE, REFERENCE_PITCH);
    let sample = sine_sample(440.0, 1.0, RATE);
    let clip = renderer.render(&note_at(0, 60, 0.0, 1.0), &sample, None);

    assert!(clip.is_clean());
    assert_eq!(clip.value.len(), 44_100);
    assert_eq!(clip.value, sample);
}

#[test]
fn octave_above_reference_sounds_an_octave_higher() {
    let renderer = NoteRenderer::new(RATE, REFERENCE_PITCH);
    let sample = sine_sample(440.0, 1.0, RATE);
    let clip = renderer.render(&note_at(0, 72, 0.0, 1.0), &sample, None);

    assert_eq!(clip.value.len(), 44_100);
    let frequency = crossing_frequency(&clip.value.samples[11_025..33_075], RATE);
    assert!(
        (frequency - 880.0).abs() < 60.0,
        "expected roughly 880 Hz, measured {frequency}"
    );
}

#[test]
fn clip_length_matches_note_duration_with_any_effects() {
    let renderer = NoteRenderer::new(RATE, REFERENCE_PITCH);
    let sample = sine_sample(440.0, 0.4, RATE);
    let effects = [
        None,
        Some(EffectParams::default().with_vibrato(5.0, 0.5)),
        Some(EffectParams::default().with_glide(60.0, 67.0)),
        Some(
            EffectParams::default()
                .with_vibrato(7.0, 0.2)
                .with_glide(64.0, 55.0),
        ),
    ];

    for (index, duration) in [0.05, 0.3, 0.75, 1.3].into_iter().enumerate() {
        for params in &effects {
            let note = note_at(index, 57 + index as u8 * 5, 2.0, 2.0 + duration);
            let clip = renderer.render(&note, &sample, params.as_ref());
            let expected = (note.duration_sec * f64::from(RATE)).round() as usize;
            assert_eq!(clip.value.len(), expected, "duration {duration}, effects {params:?}");
            assert!(clip.value.peak() <= 1.0);
        }
    }
}

#[test]
fn failing_note_renders_silence_of_its_duration() {
    let renderer = NoteRenderer::new(RATE, REFERENCE_PITCH);
    let wrong_rate = AudioBuffer::new(48_000, vec![0.5; 4_800]);
    let clip = renderer.render(&note_at(3, 65, 1.0, 1.5), &wrong_rate, None);

    assert_eq!(clip.value.len(), 22_050);
    assert_eq!(clip.value.peak(), 0.0);
    assert_eq!(clip.substitutions.len(), 1);
    assert_eq!(clip.substitutions[0].stage, Stage::NoteRender);
    assert!(clip.substitutions[0].subject.contains("#3"));
}

#[test]
fn empty_sample_pads_to_silence() {
    let renderer = NoteRenderer::new(RATE, REFERENCE_PITCH);
    let empty = AudioBuffer::new(RATE, Vec::new());
    let clip = renderer.render(&note_at(0, 70, 0.0, 0.2), &empty, None);
    assert_eq!(clip.value.len(), 8_820);
    assert_eq!(clip.value.peak(), 0.0);
}
