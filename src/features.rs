//! Harmonic CQT feature extraction
//!
//! Feeds the 22,050 Hz buffer through the features model and returns the
//! harmonic-stacked CQT as a `[frames, 264, 8]` tensor. The model's signature
//! is fixed: input `input_1` of shape `[1, N, 1]`, output `harmonic_stacking`
//! of shape `[1, T, 264, 8]`; `T` is discovered from the returned shape.

use std::path::Path;

use ndarray::Array3;

use crate::diag;
use crate::error::{Result, ScoreError};
use crate::onnx::OnnxModel;
use crate::stream::{NUM_FREQ_IN, NUM_HARMONICS};

/// Sample rate the notes pipeline expects its input at.
pub const NOTES_SAMPLE_RATE: usize = 22_050;
/// Hop between successive CQT frames, in samples.
pub const FFT_HOP: usize = 256;

pub struct FeatureExtractor {
    model: OnnxModel,
}

impl FeatureExtractor {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Ok(Self {
            model: OnnxModel::load(model_path)?,
        })
    }

    /// Compute the stacked CQT for a mono buffer.
    pub fn compute(&mut self, audio: &[f32]) -> Result<Array3<f32>> {
        diag::emit(
            "features",
            "compute_start",
            &format!("samples={}", audio.len()),
            Some(0.48),
        );

        diag::emit("features", "session_run_start", "", Some(0.5));
        let (shape, data) = self.model.run(audio.to_vec(), &[1, audio.len(), 1])?;
        diag::emit("features", "session_run_done", "", Some(0.62));

        if !(shape.len() == 4
            && shape[0] == 1
            && shape[2] == NUM_FREQ_IN
            && shape[3] == NUM_HARMONICS)
        {
            return Err(ScoreError::Shape(format!(
                "unexpected features output shape {:?}, expected [1, T, {}, {}]",
                shape, NUM_FREQ_IN, NUM_HARMONICS
            )));
        }

        let num_frames = shape[1];
        diag::emit(
            "features",
            "shape_validated",
            &format!("frames={}", num_frames),
            Some(0.64),
        );

        Array3::from_shape_vec((num_frames, NUM_FREQ_IN, NUM_HARMONICS), data)
            .map_err(|e| ScoreError::Shape(format!("features tensor: {}", e)))
    }
}
