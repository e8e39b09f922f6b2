use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pitchlane_core::{
    Engine, PitchlaneConfig, SampleKey,
    diagnostics::init_tracing_from_config,
    export::export_midi,
    fixtures::{DEMO_BPM, DEMO_PPQ, DEMO_SAMPLE_HZ, demo_effects, demo_notes, write_sine_wav},
    report::write_report,
};

#[derive(Debug, Parser)]
#[command(name = "pitchlane-cli")]
#[command(about = "Render MIDI files into audio tracks from pitched samples")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Overrides the log directory from the config file.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render a MIDI file to a mono WAV track.
    Render {
        #[arg(long)]
        midi: PathBuf,

        /// Directory of samples named by key (`60.wav`, `C#4.flac`, `default.wav`).
        #[arg(long)]
        samples: Option<PathBuf>,

        #[arg(long)]
        default_sample: Option<PathBuf>,

        #[arg(long)]
        output: PathBuf,

        /// Also write a JSON render report here.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Print the extracted note list as JSON.
    Inspect {
        #[arg(long)]
        midi: PathBuf,
    },
    /// Write a demo sample, MIDI file, rendered track and report.
    Demo {
        #[arg(long, default_value = "data/demo")]
        output_dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = PitchlaneConfig::load(cli.config.as_deref())?;
    let mut diagnostics = config.diagnostics.clone();
    if let Some(log_dir) = cli.log_dir.clone() {
        diagnostics.log_dir = log_dir;
    }
    let _telemetry = init_tracing_from_config(&diagnostics)?;

    match cli.command {
        Commands::Render {
            midi,
            samples,
            default_sample,
            output,
            report,
        } => {
            let mut config = config;
            if samples.is_some() {
                config.samples.directory = samples;
            }
            let mut engine = Engine::from_config(&config)?;
            if let Some(path) = default_sample {
                engine.add_sample(SampleKey::Default, path);
            }
            engine.load_midi(&midi)?;
            let render_report = engine.export_wav(&output)?;
            for substitution in &render_report.substitutions {
                tracing::warn!(
                    stage = %substitution.stage,
                    subject = %substitution.subject,
                    reason = %substitution.reason,
                    "rendered with substitution"
                );
            }
            if let Some(path) = report {
                write_report(&path, &render_report)?;
            }
            tracing::info!(path = %output.display(), frames = render_report.frames, "render complete");
        }
        Commands::Inspect { midi } => {
            let mut engine = Engine::from_config(&config)?;
            engine.load_midi(&midi)?;
            let json = serde_json::to_string_pretty(&engine.notes())
                .context("failed to encode note list")?;
            println!("{json}");
        }
        Commands::Demo { output_dir } => {
            std::fs::create_dir_all(&output_dir).with_context(|| {
                format!("failed to create demo directory: {}", output_dir.display())
            })?;
            let sample_path = output_dir.join("C4.wav");
            let midi_path = output_dir.join("demo.mid");
            let sample_rate = config.render.sample_rate;
            write_sine_wav(&sample_path, DEMO_SAMPLE_HZ, 1.0, sample_rate)?;
            export_midi(&demo_notes(), DEMO_BPM, DEMO_PPQ, &midi_path)?;

            let mut engine = Engine::from_config(&config)?;
            engine.add_sample(SampleKey::Default, &sample_path);
            for (pitch, params) in demo_effects() {
                engine.set_effect(pitch, params);
            }
            engine.load_midi(&midi_path)?;
            let render_report = engine.export_wav(&output_dir.join("demo.wav"))?;
            write_report(&output_dir.join("demo.report.json"), &render_report)?;
            tracing::info!(path = %output_dir.display(), "demo written");
        }
    }

    Ok(())
}
