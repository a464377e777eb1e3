//! Note and tempo transcription for mono audio
//!
//! Two offline pipelines over pre-resampled raw PCM:
//!
//! - **notes**: harmonic-CQT features (ONNX) streamed through four CNN
//!   sub-networks with fixed lookahead, then decoded into note events;
//! - **tempo**: mel spectrogram, sliding windows, a 256-class tempo
//!   classifier (ONNX), and an optional smoothed/compressed tempo map.
//!
//! Everything is synchronous and single-threaded; one [`AudioToScore`] call
//! owns all of its intermediate tensors and the result is deterministic for
//! identical inputs, models, and parameters.

pub mod audio;
pub mod cnn;
pub mod config;
pub mod diag;
pub mod error;
pub mod features;
pub mod mel;
pub mod notes;
pub mod onnx;
pub mod output;
pub mod stream;
pub mod tempo;
pub mod transcribe;

pub use config::{BalancedPreset, TempoOptions};
pub use error::{Result, ScoreError};
pub use notes::NoteEvent;
pub use tempo::{TempoEstimate, TempoPoint};

use std::path::PathBuf;

use tempo::TempoEstimator;
use transcribe::NoteTranscriber;

/// File inputs for one combined transcription request.
#[derive(Debug, Clone)]
pub struct CombinedRequest {
    /// Mono f32le PCM at 22,050 Hz for the notes pipeline
    pub notes_pcm: PathBuf,
    /// Mono f32le PCM at 11,025 Hz for the tempo pipeline
    pub tempo_pcm: PathBuf,
    /// Directory holding `features_model.onnx` and the four CNN JSON files
    pub model_dir: PathBuf,
    /// Tempo classifier `.onnx` file
    pub tempo_model: PathBuf,
    /// Destination of the combined JSON document
    pub output_json: PathBuf,
}

/// Combined orchestrator: runs both pipelines over their PCM inputs and
/// writes a single `{events, tempoBpm, tempoMap}` document.
pub struct AudioToScore {
    preset: BalancedPreset,
    tempo_options: TempoOptions,
}

impl AudioToScore {
    pub fn new(preset: BalancedPreset, tempo_options: TempoOptions) -> Self {
        Self {
            preset,
            tempo_options,
        }
    }

    pub fn process(&self, request: &CombinedRequest) -> Result<()> {
        let notes_samples = audio::read_f32le(&request.notes_pcm)?;
        let tempo_samples = audio::read_f32le(&request.tempo_pcm)?;

        let mut transcriber = NoteTranscriber::new(&request.model_dir)?;
        let events = transcriber.transcribe(&notes_samples, &self.preset, true)?;

        let mut estimator = TempoEstimator::new(&request.tempo_model)?;
        let estimate = estimator.estimate(&tempo_samples, self.tempo_options)?;

        let document = output::combined_json(&events, &estimate);
        output::write_file(&request.output_json, &document)
    }
}
