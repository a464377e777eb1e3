//! Notes pipeline wiring
//!
//! Binds the feature extractor and the streaming driver to one model
//! directory and runs audio through CQT extraction, streaming inference, and
//! the note-event converter.

use std::path::Path;

use crate::cnn::CnnModel;
use crate::config::BalancedPreset;
use crate::diag;
use crate::error::{Result, ScoreError};
use crate::features::FeatureExtractor;
use crate::notes::{self, ConvertParams, NoteEvent};
use crate::stream::StreamingDriver;

/// Name of the ONNX features model inside the model directory.
const FEATURES_MODEL_FILE: &str = "features_model.onnx";

pub struct NoteTranscriber {
    features: FeatureExtractor,
    driver: StreamingDriver<CnnModel>,
}

impl NoteTranscriber {
    /// Bind to a model directory holding `features_model.onnx` and the four
    /// CNN JSON files.
    pub fn new<P: AsRef<Path>>(model_dir: P) -> Result<Self> {
        let dir = model_dir.as_ref();
        let features = FeatureExtractor::new(dir.join(FEATURES_MODEL_FILE))?;
        let driver = StreamingDriver::from_model_dir(dir)?;
        diag::emit(
            "transcriber",
            "constructed",
            &dir.display().to_string(),
            None,
        );
        Ok(Self { features, driver })
    }

    /// Transcribe a 22,050 Hz mono buffer into note events.
    pub fn transcribe(
        &mut self,
        audio: &[f32],
        preset: &BalancedPreset,
        include_pitch_bends: bool,
    ) -> Result<Vec<NoteEvent>> {
        if audio.is_empty() {
            return Err(ScoreError::EmptyInput);
        }

        diag::emit(
            "transcriber",
            "transcribe_start",
            &format!("samples={}", audio.len()),
            Some(0.46),
        );

        let cqt = self.features.compute(audio)?;
        diag::emit(
            "transcriber",
            "features_done",
            &format!("frames={}", cqt.shape()[0]),
            Some(0.64),
        );

        let posteriorgrams = self.driver.run(cqt.view())?;

        diag::emit("transcriber", "notes_convert_start", "", Some(0.87));
        let params = ConvertParams::from_preset(preset);
        let events = notes::convert(&posteriorgrams, &params, include_pitch_bends);
        diag::emit(
            "transcriber",
            "notes_convert_done",
            &format!("events={}", events.len()),
            Some(0.9),
        );

        Ok(events)
    }
}
