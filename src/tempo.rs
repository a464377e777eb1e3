//! Tempo estimation pipeline
//!
//! Slices the mel tensor into overlapping `[40 x 256]` windows, classifies
//! each window over 256 tempo classes, and reduces the posteriors to a global
//! BPM (averaged class profile, optional parabolic refinement) and, on
//! request, a compressed local tempo map.

use std::path::Path;

use ndarray::{Array2, Array4};

use crate::diag;
use crate::error::{Result, ScoreError};
use crate::mel::{self, MEL_BANDS, STFT_HOP, TEMPO_SAMPLE_RATE};
use crate::onnx::OnnxModel;

pub const WINDOW_FRAMES: usize = 256;
pub const GLOBAL_HOP_FRAMES: usize = 128;
pub const LOCAL_HOP_FRAMES: usize = 32;
pub const TEMPO_CLASSES: usize = 256;

const LOCAL_SMOOTHING_WINDOW: usize = 5;
const TEMPO_MIN_BPM: f64 = 20.0;
const TEMPO_MAX_BPM: f64 = 300.0;
const LOCAL_MIN_TIME_DELTA: f64 = 0.7;
const LOCAL_MIN_BPM_DELTA: f64 = 0.75;

/// Seconds per mel feature frame.
pub const FEATURE_FRAME_SECONDS: f64 = STFT_HOP as f64 / TEMPO_SAMPLE_RATE as f64;

/// One point of the local tempo map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoPoint {
    pub time_seconds: f64,
    pub bpm: f64,
}

/// Result of one tempo estimation call.
#[derive(Debug, Clone, Default)]
pub struct TempoEstimate {
    pub bpm: f64,
    pub tempo_map: Vec<TempoPoint>,
}

/// Options for one estimation call.
pub use crate::config::TempoOptions;

/// Cut a `[bands x T]` mel tensor into a dense `[N x bands x W x 1]` block.
///
/// With `zero_pad`, half a window of zero frames is prepended and appended
/// first; a working length shorter than one window is right-padded to exactly
/// one window.
pub fn sliding_windows(
    mel: &Array2<f32>,
    window_frames: usize,
    hop_frames: usize,
    zero_pad: bool,
) -> Array4<f32> {
    let bands = mel.nrows();
    let total_frames = mel.ncols();
    if total_frames == 0 {
        return Array4::zeros((0, bands, window_frames, 1));
    }

    let zeros_before = if zero_pad { window_frames / 2 } else { 0 };
    let padded_frames = if zero_pad {
        total_frames + window_frames
    } else {
        total_frames
    };
    let working_frames = padded_frames.max(window_frames);

    let mut working = Array2::<f32>::zeros((bands, working_frames));
    working
        .slice_mut(ndarray::s![.., zeros_before..zeros_before + total_frames])
        .assign(mel);

    let safe_hop = hop_frames.max(1);
    let num_windows = (working_frames - window_frames) / safe_hop + 1;

    let mut output = Array4::<f32>::zeros((num_windows, bands, window_frames, 1));
    for window_idx in 0..num_windows {
        let offset = window_idx * safe_hop;
        for band in 0..bands {
            for frame in 0..window_frames {
                output[[window_idx, band, frame, 0]] = working[[band, offset + frame]];
            }
        }
    }
    output
}

/// Divide the whole tensor by its global maximum, if positive.
pub fn normalize_by_max(tensor: &mut Array4<f32>) {
    let max = tensor.iter().copied().fold(f32::MIN, f32::max);
    if tensor.is_empty() || max <= 0.0 {
        return;
    }
    tensor.mapv_inplace(|v| v / max);
}

/// Element-wise mean of the per-window class rows.
pub fn average_predictions(predictions: &Array2<f32>) -> Vec<f64> {
    let mut averaged = vec![0.0f64; TEMPO_CLASSES];
    let num_windows = predictions.nrows();
    if num_windows == 0 {
        return averaged;
    }

    for row in predictions.rows() {
        for (acc, &value) in averaged.iter_mut().zip(row.iter()) {
            *acc += f64::from(value);
        }
    }
    for value in &mut averaged {
        *value /= num_windows as f64;
    }
    averaged
}

pub fn argmax(values: &[f64]) -> usize {
    let mut best_index = 0;
    let mut best_value = match values.first() {
        Some(&first) => first,
        None => return 0,
    };
    for (index, &value) in values.iter().enumerate().skip(1) {
        if value > best_value {
            best_value = value;
            best_index = index;
        }
    }
    best_index
}

/// Refine an argmax by fitting a parabola through the peak and its neighbors.
/// Falls back to the integer index at the boundaries or when the curvature
/// vanishes; the refinement never moves more than one class away.
pub fn interpolate_argmax(values: &[f64], index: usize) -> f64 {
    if index == 0 || index + 1 >= values.len() {
        return index as f64;
    }

    let left = values[index - 1];
    let center = values[index];
    let right = values[index + 1];

    let denominator = left - 2.0 * center + right;
    if denominator.abs() < 1e-12 {
        return index as f64;
    }

    let delta = (0.5 * (left - right) / denominator).clamp(-1.0, 1.0);
    index as f64 + delta
}

/// Tempo class index to BPM: `clip(index + 30, 20, 300)`.
pub fn class_index_to_bpm(index: f64) -> f64 {
    (index + 30.0).clamp(TEMPO_MIN_BPM, TEMPO_MAX_BPM)
}

/// Per-window argmax (no averaging, no interpolation) to a BPM series.
pub fn prediction_rows_to_bpm(predictions: &Array2<f32>) -> Vec<f64> {
    predictions
        .rows()
        .into_iter()
        .map(|row| {
            let mut best_index = 0;
            let mut best_value = f32::MIN;
            for (index, &value) in row.iter().enumerate() {
                if value > best_value {
                    best_value = value;
                    best_index = index;
                }
            }
            class_index_to_bpm(best_index as f64)
        })
        .collect()
}

/// Centered moving average that keeps the series length. The divisor is the
/// nominal window width even at the boundaries, attenuating edge values to
/// match the reference model's training assumptions.
pub fn moving_average_same(values: &[f64], window_size: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    let mut safe_window = window_size.max(1);
    if safe_window % 2 == 0 {
        safe_window += 1;
    }
    let half = (safe_window / 2) as isize;

    (0..values.len() as isize)
        .map(|index| {
            let mut sum = 0.0;
            for offset in -half..=half {
                let sample = index + offset;
                if sample >= 0 && (sample as usize) < values.len() {
                    sum += values[sample as usize];
                }
            }
            sum / safe_window as f64
        })
        .collect()
}

pub fn round_decimals(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals.clamp(0, 9));
    (value * scale).round() / scale
}

/// Downsample a dense BPM series into a tempo map: starting from the first
/// point, the next point is kept only when it moved at least 0.7 s or
/// 0.75 BPM away from the last kept point. Times and BPMs are rounded to six
/// decimals before comparison.
pub fn compress_tempo_points(bpm_series: &[f64], hop_seconds: f64) -> Vec<TempoPoint> {
    let raw: Vec<TempoPoint> = bpm_series
        .iter()
        .enumerate()
        .map(|(index, &bpm)| TempoPoint {
            time_seconds: round_decimals(index as f64 * hop_seconds, 6),
            bpm: round_decimals(bpm.clamp(TEMPO_MIN_BPM, TEMPO_MAX_BPM), 6),
        })
        .collect();

    let mut compressed: Vec<TempoPoint> = Vec::with_capacity(raw.len());
    for point in raw {
        match compressed.last() {
            None => compressed.push(point),
            Some(last) => {
                let time_delta = point.time_seconds - last.time_seconds;
                let bpm_delta = (point.bpm - last.bpm).abs();
                if time_delta >= LOCAL_MIN_TIME_DELTA || bpm_delta >= LOCAL_MIN_BPM_DELTA {
                    compressed.push(point);
                }
            }
        }
    }
    compressed
}

/// Driver around the tempo classifier model.
pub struct TempoEstimator {
    model: OnnxModel,
}

impl TempoEstimator {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Ok(Self {
            model: OnnxModel::load(model_path)?,
        })
    }

    /// Estimate the global BPM of an 11,025 Hz buffer and, when requested,
    /// its local tempo map.
    pub fn estimate(&mut self, samples: &[f32], options: TempoOptions) -> Result<TempoEstimate> {
        if samples.is_empty() {
            return Err(ScoreError::EmptyInput);
        }

        diag::emit(
            "tempo",
            "mel_start",
            &format!("samples={}", samples.len()),
            None,
        );
        let mel = mel::mel_spectrogram(samples);
        if mel.ncols() == 0 {
            return Err(ScoreError::EmptyInput);
        }
        diag::emit("tempo", "mel_done", &format!("frames={}", mel.ncols()), None);

        let mut global_windows = sliding_windows(&mel, WINDOW_FRAMES, GLOBAL_HOP_FRAMES, false);
        normalize_by_max(&mut global_windows);
        let global_prediction = self.run_model(global_windows)?;

        let averaged = average_predictions(&global_prediction);
        let coarse_index = argmax(&averaged);
        let final_index = if options.interpolate {
            interpolate_argmax(&averaged, coarse_index)
        } else {
            coarse_index as f64
        };

        let mut result = TempoEstimate {
            bpm: class_index_to_bpm(final_index),
            tempo_map: Vec::new(),
        };
        diag::emit("tempo", "global_done", &format!("bpm={}", result.bpm), None);

        if options.local_tempo {
            let mut local_windows = sliding_windows(&mel, WINDOW_FRAMES, LOCAL_HOP_FRAMES, true);
            if local_windows.shape()[0] > 0 {
                normalize_by_max(&mut local_windows);
                let local_prediction = self.run_model(local_windows)?;

                let local_tempi = prediction_rows_to_bpm(&local_prediction);
                let mut smoothed = moving_average_same(&local_tempi, LOCAL_SMOOTHING_WINDOW);
                for bpm in &mut smoothed {
                    *bpm = bpm.clamp(TEMPO_MIN_BPM, TEMPO_MAX_BPM);
                }

                let hop_seconds = LOCAL_HOP_FRAMES as f64 * FEATURE_FRAME_SECONDS;
                result.tempo_map = compress_tempo_points(&smoothed, hop_seconds);
                diag::emit(
                    "tempo",
                    "local_done",
                    &format!("points={}", result.tempo_map.len()),
                    None,
                );
            }
        }

        Ok(result)
    }

    /// Run the classifier over a `[N x 40 x 256 x 1]` block; the output must
    /// come back as `[N x 256]`.
    fn run_model(&mut self, windows: Array4<f32>) -> Result<Array2<f32>> {
        let num_windows = windows.shape()[0];
        if num_windows == 0 {
            return Err(ScoreError::Shape(
                "tempo input tensor is empty".to_string(),
            ));
        }

        let shape = [num_windows, MEL_BANDS, WINDOW_FRAMES, 1];
        let (out_shape, out_data) = self.model.run(windows.into_raw_vec(), &shape)?;

        if out_shape != [num_windows, TEMPO_CLASSES] {
            return Err(ScoreError::Shape(format!(
                "tempo classifier output shape {:?}, expected [{}, {}]",
                out_shape, num_windows, TEMPO_CLASSES
            )));
        }

        Array2::from_shape_vec((num_windows, TEMPO_CLASSES), out_data)
            .map_err(|e| ScoreError::Shape(format!("tempo posterior: {}", e)))
    }
}
