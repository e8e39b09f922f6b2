use std::path::{Path, PathBuf};

use pitchlane_core::{
    SampleKey, SampleLibrary, Stage,
    fixtures::sine_sample,
    load_sample,
    samples::{LOAD_FAILURE_SECONDS, resample, try_load_sample},
};

fn write_stereo_wav(path: &Path, sample_rate: u32, frames: usize, left: i16, right: i16) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("wav should be creatable");
    for _ in 0..frames {
        writer.write_sample(left).expect("left sample should write");
        writer.write_sample(right).expect("right sample should write");
    }
    writer.finalize().expect("wav should finalize");
}

fn write_mono_sine(path: &Path, sample_rate: u32, seconds: f64) {
    pitchlane_core::write_wav(&sine_sample(440.0, seconds, sample_rate), path)
        .expect("sine wav should write");
}

#[test]
fn stereo_files_are_averaged_to_mono() {
    let temp = tempfile::tempdir().expect("tempdir should work");
    let path = temp.path().join("stereo.wav");
    write_stereo_wav(&path, 44_100, 4_410, 16_384, 0);

    let buffer = try_load_sample(&path, 44_100).expect("wav should load");
    assert_eq!(buffer.sample_rate, 44_100);
    assert_eq!(buffer.len(), 4_410);
    for sample in &buffer.samples {
        assert!((sample - 0.25).abs() < 1e-3, "expected 0.25, got {sample}");
    }
}

#[test]
fn samples_are_resampled_to_the_render_rate() {
    let temp = tempfile::tempdir().expect("tempdir should work");
    let path = temp.path().join("hi-rate.wav");
    write_mono_sine(&path, 48_000, 0.5);

    let buffer = try_load_sample(&path, 44_100).expect("wav should load");
    assert_eq!(buffer.sample_rate, 44_100);
    assert_eq!(buffer.len(), 22_050);
    assert!(buffer.peak() > 0.3);
}

#[test]
fn resampling_keeps_exact_length_ratio() {
    let input = sine_sample(440.0, 1.0, 22_050);
    let output = resample(&input, 44_100).expect("resample should work");
    assert_eq!(output.len(), 44_100);
    assert_eq!(output.sample_rate, 44_100);
}

#[test]
fn unreadable_sample_becomes_one_second_of_silence() {
    let temp = tempfile::tempdir().expect("tempdir should work");
    let path = temp.path().join("broken.wav");
    std::fs::write(&path, b"definitely not audio").expect("junk should write");

    for candidate in [path.as_path(), Path::new("/no/such/sample.wav")] {
        let loaded = load_sample(candidate, 44_100);
        assert_eq!(loaded.value.duration_seconds(), LOAD_FAILURE_SECONDS);
        assert_eq!(loaded.value.peak(), 0.0);
        assert!(loaded.has_stage(Stage::SampleLoad));
    }
}

#[test]
fn directory_scan_keys_samples_by_file_name() {
    let temp = tempfile::tempdir().expect("tempdir should work");
    write_mono_sine(&temp.path().join("60.wav"), 44_100, 0.1);
    write_mono_sine(&temp.path().join("E4.wav"), 44_100, 0.1);
    write_mono_sine(&temp.path().join("nested/default.wav"), 44_100, 0.1);
    write_mono_sine(&temp.path().join("kick.wav"), 44_100, 0.1);
    std::fs::write(temp.path().join("notes.txt"), "ignored").expect("text file should write");

    let library = SampleLibrary::scan_directory(temp.path()).expect("scan should work");
    assert_eq!(library.sample_path(60), Some(temp.path().join("60.wav").as_path()));
    assert_eq!(library.sample_path(64), Some(temp.path().join("E4.wav").as_path()));
    assert_eq!(
        library.default_path(),
        Some(temp.path().join("nested/default.wav").as_path())
    );
    assert_eq!(library.entries().count(), 3);

    let loaded = library.load(44_100);
    assert!(loaded.is_clean());
    assert!(loaded.value.resolve(64).is_some());
    assert!(loaded.value.resolve(100).is_some());
}

#[test]
fn first_sample_becomes_default_and_removal_promotes_the_next() {
    let mut library = SampleLibrary::new();
    library.add_sample(SampleKey::Pitch(62), "d4.wav");
    library.add_sample(SampleKey::Pitch(60), "c4.wav");
    assert_eq!(library.default_path(), Some(Path::new("d4.wav")));
    assert_eq!(library.sample_path(71), Some(Path::new("d4.wav")));

    assert_eq!(
        library.remove_sample(SampleKey::Pitch(62)),
        Some(PathBuf::from("d4.wav"))
    );
    assert_eq!(library.default_path(), Some(Path::new("c4.wav")));

    library.remove_sample(SampleKey::Pitch(60));
    assert!(library.is_empty());
    assert_eq!(library.sample_path(60), None);
}

#[test]
fn scanning_a_file_is_an_error() {
    let temp = tempfile::tempdir().expect("tempdir should work");
    let path = temp.path().join("60.wav");
    write_mono_sine(&path, 44_100, 0.1);
    assert!(SampleLibrary::scan_directory(&path).is_err());
}
