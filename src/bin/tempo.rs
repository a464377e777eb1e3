//! Tempo CLI: raw f32le PCM in, a single JSON line with the estimate out.

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Parser;

use audio2score::tempo::TempoEstimator;
use audio2score::{audio, output, ScoreError, TempoOptions};

/// Estimate the tempo of mono audio
#[derive(Parser)]
#[command(name = "tempo")]
#[command(about = "Estimate the tempo of a mono 11,025 Hz f32le PCM file")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Input audio as raw little-endian float32 PCM, mono, 11,025 Hz
    #[arg(long = "input-f32le")]
    input_f32le: PathBuf,

    /// Tempo classifier model file
    #[arg(long = "model-onnx")]
    model_onnx: PathBuf,

    /// Refine the global tempo by parabolic interpolation
    #[arg(long, value_parser = parse_bool_value)]
    interpolate: Option<bool>,

    /// Also emit a local tempo map
    #[arg(long = "local-tempo", value_parser = parse_bool_value)]
    local_tempo: Option<bool>,
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

    let options = TempoOptions {
        interpolate: cli.interpolate.unwrap_or(false),
        local_tempo: cli.local_tempo.unwrap_or(false),
    };

    match estimate(&cli, options) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}", err);
            1
        }
    }
}

fn estimate(cli: &Cli, options: TempoOptions) -> Result<(), ScoreError> {
    let samples = audio::read_f32le(&cli.input_f32le)?;

    let mut estimator = TempoEstimator::new(&cli.model_onnx)?;
    let estimate = estimator.estimate(&samples, options)?;

    println!(
        "{}",
        output::tempo_json_line(&estimate, options.interpolate, options.local_tempo)
    );
    Ok(())
}
