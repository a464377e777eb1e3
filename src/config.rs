//! Preset parameters for the notes pipeline and options for the tempo pipeline

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoreError};

/// Tunable parameters recognized by the notes pipeline ("balanced" preset).
///
/// Sensitivities are inverted into thresholds by the converter:
/// `frame_threshold = 1 - note_sensitivity`,
/// `onset_threshold = 1 - split_sensitivity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancedPreset {
    pub note_sensitivity: f32,
    pub split_sensitivity: f32,
    pub min_note_duration_ms: f32,
    pub melodia_trick: bool,
    /// Lower pitch bound in Hz; 0 means unset
    pub min_pitch_hz: f32,
    /// Upper pitch bound in Hz; 0 means unset
    pub max_pitch_hz: f32,
    /// Number of consecutive sub-threshold frames tolerated inside a note
    pub energy_tolerance: i32,
}

impl Default for BalancedPreset {
    fn default() -> Self {
        Self {
            note_sensitivity: 0.645,
            split_sensitivity: 0.69,
            min_note_duration_ms: 24.0,
            melodia_trick: false,
            min_pitch_hz: 1.0,
            max_pitch_hz: 3000.0,
            energy_tolerance: 11,
        }
    }
}

/// Validate a preset, phrasing failures in terms of the CLI flags that set
/// the offending fields.
pub fn validate_preset(preset: &BalancedPreset) -> Result<()> {
    if !(0.0..=1.0).contains(&preset.note_sensitivity) {
        return Err(ScoreError::Arg(
            "--note-sensitivity must be in [0,1]".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&preset.split_sensitivity) {
        return Err(ScoreError::Arg(
            "--split-sensitivity must be in [0,1]".to_string(),
        ));
    }
    if !(preset.min_note_duration_ms > 0.0) {
        return Err(ScoreError::Arg("--min-note-ms must be > 0".to_string()));
    }
    if !preset.min_pitch_hz.is_finite() || preset.min_pitch_hz < 0.0 {
        return Err(ScoreError::Arg("--min-pitch-hz must be >= 0".to_string()));
    }
    if !preset.max_pitch_hz.is_finite() || preset.max_pitch_hz < 0.0 {
        return Err(ScoreError::Arg("--max-pitch-hz must be >= 0".to_string()));
    }
    if preset.max_pitch_hz > 0.0
        && preset.min_pitch_hz > 0.0
        && preset.max_pitch_hz < preset.min_pitch_hz
    {
        return Err(ScoreError::Arg(
            "--max-pitch-hz must be >= --min-pitch-hz".to_string(),
        ));
    }
    if preset.energy_tolerance < 1 {
        return Err(ScoreError::Arg(
            "--energy-tolerance must be >= 1".to_string(),
        ));
    }
    Ok(())
}

/// Options for the tempo pipeline.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoOptions {
    /// Refine the global class index by parabolic interpolation
    pub interpolate: bool,
    /// Also produce a local tempo map
    pub local_tempo: bool,
}
