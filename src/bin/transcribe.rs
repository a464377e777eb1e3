//! Notes CLI: raw f32le PCM in, note-events JSON out.
//!
//! Exit codes: 0 success, 2 no notes detected, 1 any other failure.

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Parser;

use audio2score::config::{validate_preset, BalancedPreset};
use audio2score::transcribe::NoteTranscriber;
use audio2score::{audio, diag, output, ScoreError};

/// Transcribe mono audio into note events
#[derive(Parser)]
#[command(name = "transcribe")]
#[command(about = "Transcribe a mono 22,050 Hz f32le PCM file into note events")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Input audio as raw little-endian float32 PCM, mono, 22,050 Hz
    #[arg(long = "input-f32le")]
    input_f32le: PathBuf,

    /// Destination of the events JSON document
    #[arg(long = "output-json")]
    output_json: PathBuf,

    /// Directory with features_model.onnx and the four CNN JSON files
    #[arg(long = "model-dir")]
    model_dir: PathBuf,

    /// Parameter preset; only "balanced" is supported
    #[arg(long)]
    preset: Option<String>,

    /// Override: note sensitivity in [0,1]
    #[arg(long = "note-sensitivity")]
    note_sensitivity: Option<f32>,

    /// Override: split sensitivity in [0,1]
    #[arg(long = "split-sensitivity")]
    split_sensitivity: Option<f32>,

    /// Override: minimum note duration in milliseconds
    #[arg(long = "min-note-ms")]
    min_note_ms: Option<f32>,

    /// Override: enable the Melodia-style recall pass
    #[arg(long = "melodia-trick", value_parser = parse_bool_value)]
    melodia_trick: Option<bool>,

    /// Override: lowest pitch in Hz (0 disables the bound)
    #[arg(long = "min-pitch-hz")]
    min_pitch_hz: Option<f32>,

    /// Override: highest pitch in Hz (0 disables the bound)
    #[arg(long = "max-pitch-hz")]
    max_pitch_hz: Option<f32>,

    /// Override: consecutive sub-threshold frames tolerated inside a note
    #[arg(long = "energy-tolerance")]
    energy_tolerance: Option<i32>,
}

fn parse_bool_value(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!(
            "invalid boolean value '{}' (expected 0/1/true/false)",
            other
        )),
    }
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    diag::emit("cli", "start", "", None);

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            return 0;
        }
        Err(err) => {
            eprintln!("{}", err);
            return 1;
        }
    };
    diag::emit("cli", "args_parsed", "", None);

    if let Some(preset) = cli.preset.as_deref() {
        if preset != "balanced" {
            eprintln!("Only preset 'balanced' is supported");
            return 1;
        }
    }

    let mut preset = BalancedPreset::default();
    if let Some(value) = cli.note_sensitivity {
        preset.note_sensitivity = value;
    }
    if let Some(value) = cli.split_sensitivity {
        preset.split_sensitivity = value;
    }
    if let Some(value) = cli.min_note_ms {
        preset.min_note_duration_ms = value;
    }
    if let Some(value) = cli.melodia_trick {
        preset.melodia_trick = value;
    }
    if let Some(value) = cli.min_pitch_hz {
        preset.min_pitch_hz = value;
    }
    if let Some(value) = cli.max_pitch_hz {
        preset.max_pitch_hz = value;
    }
    if let Some(value) = cli.energy_tolerance {
        preset.energy_tolerance = value;
    }

    if let Err(err) = validate_preset(&preset) {
        eprintln!("{}", err);
        return 1;
    }

    diag::emit(
        "cli",
        "preset_values",
        &format!(
            "noteSensitivity={} splitSensitivity={} minNoteMs={} melodiaTrick={} minPitchHz={} maxPitchHz={} energyTolerance={}",
            preset.note_sensitivity,
            preset.split_sensitivity,
            preset.min_note_duration_ms,
            preset.melodia_trick as u8,
            preset.min_pitch_hz,
            preset.max_pitch_hz,
            preset.energy_tolerance
        ),
        Some(0.2),
    );

    match transcribe(&cli, &preset) {
        Ok(()) => 0,
        Err(ScoreError::NoEventsDetected) => {
            eprintln!("{}", ScoreError::NoEventsDetected);
            2
        }
        Err(err) => {
            diag::emit("cli", "error", &err.to_string(), None);
            eprintln!("{}", err);
            1
        }
    }
}

fn transcribe(cli: &Cli, preset: &BalancedPreset) -> Result<(), ScoreError> {
    diag::progress("Loading audio features...", 0.12);
    diag::emit(
        "cli",
        "read_input_start",
        &cli.input_f32le.display().to_string(),
        None,
    );
    let samples = audio::read_f32le(&cli.input_f32le)?;
    diag::emit(
        "cli",
        "read_input_done",
        &format!("samples={}", samples.len()),
        Some(0.12),
    );

    diag::progress("Running note transcription model...", 0.45);
    let mut transcriber = NoteTranscriber::new(&cli.model_dir)?;
    let events = transcriber.transcribe(&samples, preset, false)?;
    diag::emit("cli", "transcribe_done", &format!("events={}", events.len()), Some(0.9));

    if events.is_empty() {
        return Err(ScoreError::NoEventsDetected);
    }

    diag::progress("Building note events...", 0.92);
    output::write_file(&cli.output_json, &output::events_json(&events))?;
    diag::emit(
        "cli",
        "write_output_done",
        &cli.output_json.display().to_string(),
        Some(1.0),
    );

    diag::progress("Conversion complete.", 1.0);
    Ok(())
}
