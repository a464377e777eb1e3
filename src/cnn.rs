//! Frame-wise CNN sub-networks
//!
//! The four note-model sub-networks ship as JSON files describing sequential
//! stacks of 2-D convolutions (time kernel with dilation, feature kernel with
//! stride) plus batch normalization and pointwise activations. They are
//! evaluated one frame at a time: each convolution keeps a ring of its past
//! input frames so a forward call only ever sees the taps it needs.
//!
//! Frames are laid out feature-major: `frame[feature * channels + channel]`.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, ScoreError};

/// Common forward interface shared by the four sub-networks.
///
/// A forward call consumes exactly one frame and produces exactly one frame;
/// `outputs` exposes the frame produced by the most recent call.
pub trait FrameModel {
    fn forward(&mut self, input: &[f32]);
    fn outputs(&self) -> &[f32];
    fn reset(&mut self);
}

#[derive(Debug, Deserialize)]
struct ModelJson {
    in_shape: Vec<usize>,
    layers: Vec<LayerJson>,
}

#[derive(Debug, Deserialize)]
struct LayerJson {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    activation: String,
    #[serde(default)]
    weights: Value,
    #[serde(default)]
    kernel_size_time: usize,
    #[serde(default)]
    kernel_size_feature: usize,
    #[serde(default = "one")]
    dilation_rate: usize,
    #[serde(default = "one")]
    strides: usize,
    #[serde(default)]
    num_filters_in: usize,
    #[serde(default)]
    num_features_in: usize,
    #[serde(default)]
    num_filters_out: usize,
    #[serde(default)]
    valid_pad: bool,
    #[serde(default = "default_epsilon")]
    epsilon: f32,
}

fn one() -> usize {
    1
}

fn default_epsilon() -> f32 {
    1e-3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activation {
    Linear,
    ReLu,
    Sigmoid,
    Tanh,
}

impl Activation {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "" | "linear" => Ok(Activation::Linear),
            "relu" => Ok(Activation::ReLu),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            other => Err(ScoreError::ModelLoad(format!(
                "unsupported activation '{}'",
                other
            ))),
        }
    }

    fn apply(self, values: &mut [f32]) {
        match self {
            Activation::Linear => {}
            Activation::ReLu => values.iter_mut().for_each(|v| *v = v.max(0.0)),
            Activation::Sigmoid => values
                .iter_mut()
                .for_each(|v| *v = 1.0 / (1.0 + (-*v).exp())),
            Activation::Tanh => values.iter_mut().for_each(|v| *v = v.tanh()),
        }
    }
}

/// One 2-D convolution evaluated frame-by-frame. Time taps are served from an
/// internal ring of past input frames; tap `t` (0 = oldest) reads the frame
/// delayed by `(kernel_time - 1 - t) * dilation`.
struct Conv2d {
    kernel_time: usize,
    kernel_feature: usize,
    dilation: usize,
    stride: usize,
    channels_in: usize,
    features_in: usize,
    channels_out: usize,
    features_out: usize,
    pad_left: usize,
    /// `[time][feature][channel_in][channel_out]`, flattened
    kernel: Vec<f32>,
    bias: Vec<f32>,
    activation: Activation,
    history: Vec<Vec<f32>>,
    head: usize,
}

impl Conv2d {
    fn from_json(layer: &LayerJson) -> Result<Self> {
        let kernel_time = layer.kernel_size_time.max(1);
        let kernel_feature = layer.kernel_size_feature.max(1);
        let dilation = layer.dilation_rate.max(1);
        let stride = layer.strides.max(1);
        let channels_in = layer.num_filters_in;
        let features_in = layer.num_features_in;
        let channels_out = layer.num_filters_out;

        if channels_in == 0 || features_in == 0 || channels_out == 0 {
            return Err(ScoreError::ModelLoad(
                "conv2d layer with zero-sized dimensions".to_string(),
            ));
        }
        if layer.valid_pad && features_in < kernel_feature {
            return Err(ScoreError::ModelLoad(
                "conv2d feature kernel wider than its input".to_string(),
            ));
        }

        let (features_out, pad_left) = if layer.valid_pad {
            ((features_in - kernel_feature) / stride + 1, 0)
        } else {
            let features_out = (features_in + stride - 1) / stride;
            let needed = (features_out - 1) * stride + kernel_feature;
            let pad_total = needed.saturating_sub(features_in);
            (features_out, pad_total / 2)
        };

        let parts = weight_groups(&layer.weights)?;
        if parts.len() != 2 {
            return Err(ScoreError::ModelLoad(format!(
                "conv2d expects [kernel, bias] weight groups, found {}",
                parts.len()
            )));
        }
        let kernel = parts[0].clone();
        let bias = parts[1].clone();

        let expected = kernel_time * kernel_feature * channels_in * channels_out;
        if kernel.len() != expected {
            return Err(ScoreError::ModelLoad(format!(
                "conv2d kernel has {} weights, expected {}",
                kernel.len(),
                expected
            )));
        }
        if bias.len() != channels_out {
            return Err(ScoreError::ModelLoad(format!(
                "conv2d bias has {} values, expected {}",
                bias.len(),
                channels_out
            )));
        }

        let depth = (kernel_time - 1) * dilation + 1;
        Ok(Self {
            kernel_time,
            kernel_feature,
            dilation,
            stride,
            channels_in,
            features_in,
            channels_out,
            features_out,
            pad_left,
            kernel,
            bias,
            activation: Activation::parse(&layer.activation)?,
            history: vec![vec![0.0; features_in * channels_in]; depth],
            head: 0,
        })
    }

    fn out_len(&self) -> usize {
        self.features_out * self.channels_out
    }

    fn reset(&mut self) {
        for slot in &mut self.history {
            slot.fill(0.0);
        }
        self.head = 0;
    }

    fn forward(&mut self, input: &[f32], output: &mut [f32]) {
        let depth = self.history.len();
        self.history[self.head].copy_from_slice(input);

        for f_out in 0..self.features_out {
            let out_base = f_out * self.channels_out;
            output[out_base..out_base + self.channels_out].copy_from_slice(&self.bias);

            for tap in 0..self.kernel_time {
                let delay = (self.kernel_time - 1 - tap) * self.dilation;
                let slot = (self.head + depth - delay) % depth;
                let frame = &self.history[slot];

                for k in 0..self.kernel_feature {
                    let f_signed = (f_out * self.stride + k) as isize - self.pad_left as isize;
                    if f_signed < 0 || f_signed as usize >= self.features_in {
                        continue;
                    }
                    let in_base = f_signed as usize * self.channels_in;
                    let w_base = (tap * self.kernel_feature + k) * self.channels_in;

                    for c_in in 0..self.channels_in {
                        let sample = frame[in_base + c_in];
                        let w_row = (w_base + c_in) * self.channels_out;
                        for c_out in 0..self.channels_out {
                            output[out_base + c_out] += sample * self.kernel[w_row + c_out];
                        }
                    }
                }
            }
        }

        self.activation.apply(output);
        self.head = (self.head + 1) % depth;
    }
}

/// Per-channel batch normalization folded into a scale and an offset.
struct BatchNorm {
    channels: usize,
    len: usize,
    scale: Vec<f32>,
    offset: Vec<f32>,
    activation: Activation,
}

impl BatchNorm {
    fn from_json(layer: &LayerJson, len: usize, channels: usize) -> Result<Self> {
        let parts = weight_groups(&layer.weights)?;
        if parts.len() != 4 {
            return Err(ScoreError::ModelLoad(format!(
                "batchnorm2d expects [gamma, beta, mean, variance], found {} groups",
                parts.len()
            )));
        }
        for part in &parts {
            if part.len() != channels {
                return Err(ScoreError::ModelLoad(format!(
                    "batchnorm2d group has {} values, expected {}",
                    part.len(),
                    channels
                )));
            }
        }

        let mut scale = vec![0.0; channels];
        let mut offset = vec![0.0; channels];
        for c in 0..channels {
            let gamma = parts[0][c];
            let beta = parts[1][c];
            let mean = parts[2][c];
            let variance = parts[3][c];
            let denom = (variance + layer.epsilon).sqrt();
            scale[c] = gamma / denom;
            offset[c] = beta - gamma * mean / denom;
        }

        Ok(Self {
            channels,
            len,
            scale,
            offset,
            activation: Activation::parse(&layer.activation)?,
        })
    }

    fn forward(&self, input: &[f32], output: &mut [f32]) {
        for (i, &value) in input.iter().enumerate() {
            let c = i % self.channels;
            output[i] = value * self.scale[c] + self.offset[c];
        }
        self.activation.apply(output);
    }
}

enum Layer {
    Conv2d(Conv2d),
    BatchNorm(BatchNorm),
    Activation { len: usize, activation: Activation },
}

impl Layer {
    fn out_len(&self) -> usize {
        match self {
            Layer::Conv2d(conv) => conv.out_len(),
            Layer::BatchNorm(norm) => norm.len,
            Layer::Activation { len, .. } => *len,
        }
    }
}

/// A sub-network loaded from one JSON model file.
pub struct CnnModel {
    layers: Vec<Layer>,
    scratch: Vec<Vec<f32>>,
    input_len: usize,
}

impl CnnModel {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| ScoreError::ModelLoad(format!("cannot open {}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let model: ModelJson = serde_json::from_str(text)?;
        if model.in_shape.len() != 2 {
            return Err(ScoreError::ModelLoad(format!(
                "in_shape must be [features, channels], found {:?}",
                model.in_shape
            )));
        }

        let input_len = model.in_shape[0] * model.in_shape[1];
        let mut features = model.in_shape[0];
        let mut channels = model.in_shape[1];
        let mut layers = Vec::with_capacity(model.layers.len());

        for layer in &model.layers {
            let built = match layer.kind.as_str() {
                "conv2d" => {
                    let conv = Conv2d::from_json(layer)?;
                    if conv.channels_in != channels || conv.features_in != features {
                        return Err(ScoreError::ModelLoad(format!(
                            "conv2d expects {}x{} input, previous layer produces {}x{}",
                            conv.features_in, conv.channels_in, features, channels
                        )));
                    }
                    features = conv.features_out;
                    channels = conv.channels_out;
                    Layer::Conv2d(conv)
                }
                "batchnorm2d" => {
                    Layer::BatchNorm(BatchNorm::from_json(layer, features * channels, channels)?)
                }
                "activation" => Layer::Activation {
                    len: features * channels,
                    activation: Activation::parse(&layer.activation)?,
                },
                other => {
                    return Err(ScoreError::ModelLoad(format!(
                        "unsupported layer type '{}'",
                        other
                    )))
                }
            };
            layers.push(built);
        }

        if layers.is_empty() {
            return Err(ScoreError::ModelLoad("model has no layers".to_string()));
        }

        let scratch = layers
            .iter()
            .map(|layer| vec![0.0; layer.out_len()])
            .collect();

        Ok(Self {
            layers,
            scratch,
            input_len,
        })
    }

    pub fn input_len(&self) -> usize {
        self.input_len
    }

    pub fn output_len(&self) -> usize {
        self.layers.last().map(Layer::out_len).unwrap_or(0)
    }
}

impl FrameModel for CnnModel {
    fn forward(&mut self, input: &[f32]) {
        debug_assert_eq!(input.len(), self.input_len);

        for (i, layer) in self.layers.iter_mut().enumerate() {
            // split_at_mut keeps the previous layer's output immutably borrowable
            let (before, rest) = self.scratch.split_at_mut(i);
            let current = &mut rest[0];
            let source: &[f32] = if i == 0 { input } else { &before[i - 1] };

            match layer {
                Layer::Conv2d(conv) => conv.forward(source, current),
                Layer::BatchNorm(norm) => norm.forward(source, current),
                Layer::Activation { activation, .. } => {
                    current.copy_from_slice(source);
                    activation.apply(current);
                }
            }
        }
    }

    fn outputs(&self) -> &[f32] {
        self.scratch.last().map(Vec::as_slice).unwrap_or(&[])
    }

    fn reset(&mut self) {
        for layer in &mut self.layers {
            if let Layer::Conv2d(conv) = layer {
                conv.reset();
            }
        }
        for buffer in &mut self.scratch {
            buffer.fill(0.0);
        }
    }
}

fn weight_groups(value: &Value) -> Result<Vec<Vec<f32>>> {
    let groups = value.as_array().ok_or_else(|| {
        ScoreError::ModelLoad("layer weights must be an array of groups".to_string())
    })?;
    groups
        .iter()
        .map(|group| {
            let mut flat = Vec::new();
            flatten_floats(group, &mut flat)?;
            Ok(flat)
        })
        .collect()
}

fn flatten_floats(value: &Value, out: &mut Vec<f32>) -> Result<()> {
    match value {
        Value::Number(number) => {
            let parsed = number
                .as_f64()
                .ok_or_else(|| ScoreError::ModelLoad("non-finite weight".to_string()))?;
            out.push(parsed as f32);
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                flatten_floats(item, out)?;
            }
            Ok(())
        }
        other => Err(ScoreError::ModelLoad(format!(
            "unexpected weight entry: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1x1 conv with identity kernel: output equals input plus bias.
    #[test]
    fn pointwise_conv_identity() {
        let json = r#"{
            "in_shape": [4, 1],
            "layers": [{
                "type": "conv2d",
                "kernel_size_time": 1, "kernel_size_feature": 1,
                "dilation_rate": 1, "strides": 1,
                "num_filters_in": 1, "num_features_in": 4, "num_filters_out": 1,
                "valid_pad": false,
                "weights": [[[[[1.0]]]], [0.5]],
                "activation": ""
            }]
        }"#;
        let mut net = CnnModel::from_json_str(json).unwrap();
        assert_eq!(net.input_len(), 4);
        assert_eq!(net.output_len(), 4);

        net.forward(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(net.outputs(), &[1.5, 2.5, 3.5, 4.5]);
    }

    /// A two-tap time kernel weighting only the delayed frame acts as a
    /// one-frame delay line.
    #[test]
    fn time_taps_see_past_frames() {
        let json = r#"{
            "in_shape": [1, 1],
            "layers": [{
                "type": "conv2d",
                "kernel_size_time": 2, "kernel_size_feature": 1,
                "dilation_rate": 1, "strides": 1,
                "num_filters_in": 1, "num_features_in": 1, "num_filters_out": 1,
                "valid_pad": false,
                "weights": [[[[[1.0]]], [[[0.0]]]], [0.0]],
                "activation": ""
            }]
        }"#;
        let mut net = CnnModel::from_json_str(json).unwrap();

        let mut seen = Vec::new();
        for frame in 1..=4 {
            net.forward(&[frame as f32]);
            seen.push(net.outputs()[0]);
        }
        // first frame sees the zeroed history
        assert_eq!(seen, vec![0.0, 1.0, 2.0, 3.0]);

        net.reset();
        net.forward(&[7.0]);
        assert_eq!(net.outputs()[0], 0.0);
    }

    #[test]
    fn batchnorm_folds_to_scale_and_offset() {
        let json = r#"{
            "in_shape": [2, 1],
            "layers": [{
                "type": "batchnorm2d",
                "epsilon": 0.0,
                "weights": [[2.0], [1.0], [3.0], [4.0]],
                "activation": ""
            }]
        }"#;
        let mut net = CnnModel::from_json_str(json).unwrap();
        net.forward(&[3.0, 5.0]);
        // gamma (x - mean) / sqrt(var) + beta with mean 3, var 4
        assert!((net.outputs()[0] - 1.0).abs() < 1e-6);
        assert!((net.outputs()[1] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn unknown_layer_type_is_rejected() {
        let json = r#"{"in_shape": [1, 1], "layers": [{"type": "lstm", "weights": []}]}"#;
        assert!(CnnModel::from_json_str(json).is_err());
    }

    #[test]
    fn sigmoid_activation_is_applied() {
        let json = r#"{
            "in_shape": [1, 1],
            "layers": [{"type": "activation", "activation": "sigmoid", "weights": []}]
        }"#;
        let mut net = CnnModel::from_json_str(json).unwrap();
        net.forward(&[0.0]);
        assert!((net.outputs()[0] - 0.5).abs() < 1e-6);
    }
}
