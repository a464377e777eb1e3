//! ONNX inference runtime adapter
//!
//! Thin wrapper around an `ort` session holding exactly one intra-op and one
//! inter-op thread, so repeated runs over identical inputs are numerically
//! reproducible. The adapter exposes a single operation: flat float buffer
//! plus shape in, flat float buffer plus shape out.

use std::path::Path;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{Result, ScoreError};

/// A loaded single-input, single-output ONNX model.
pub struct OnnxModel {
    session: Session,
}

impl OnnxModel {
    /// Load a model file into a single-threaded session.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let session = (|| -> ort::Result<Session> {
            Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(1)?
                .with_inter_threads(1)?
                .commit_from_file(path)
        })()
        .map_err(|e| ScoreError::ModelLoad(format!("cannot load {}: {}", path.display(), e)))?;
        Ok(Self { session })
    }

    /// Run one forward pass. Returns the first output tensor's shape and data.
    pub fn run(&mut self, input: Vec<f32>, shape: &[usize]) -> Result<(Vec<usize>, Vec<f32>)> {
        let expected: usize = shape.iter().product();
        if input.len() != expected {
            return Err(ScoreError::Shape(format!(
                "input buffer has {} values but shape {:?} needs {}",
                input.len(),
                shape,
                expected
            )));
        }

        let shape_i64: Vec<i64> = shape.iter().map(|&dim| dim as i64).collect();
        let tensor = Tensor::from_array((shape_i64, input))
            .map_err(|e| ScoreError::Shape(format!("cannot build input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| ScoreError::ModelLoad(format!("inference failed: {}", e)))?;

        let (_, first_output) = outputs
            .iter()
            .next()
            .ok_or_else(|| ScoreError::Shape("model returned no outputs".to_string()))?;
        let (out_shape, out_data) = first_output
            .try_extract_tensor::<f32>()
            .map_err(|e| ScoreError::Shape(format!("cannot read output tensor: {}", e)))?;

        let out_shape: Vec<usize> = out_shape.iter().map(|&dim| dim as usize).collect();
        Ok((out_shape, out_data.to_vec()))
    }
}
