//! Posteriorgram-to-note-event conversion
//!
//! Walks the onset and note posteriorgrams in time order, seeds candidate
//! notes at onset peaks, extends them while the note activation stays above
//! threshold (tolerating short energy dips), then filters by length and pitch
//! range. An optional Melodia-style pass recovers additional notes from the
//! residual energy, and pitch bends can be traced from the contour
//! posteriorgram.

use ndarray::Array2;

use crate::config::BalancedPreset;
use crate::features::{FFT_HOP, NOTES_SAMPLE_RATE};
use crate::stream::Posteriorgrams;

/// MIDI pitch of the lowest note bin (A0).
pub const MIDI_OFFSET: usize = 21;
/// Highest note bin index.
pub const MAX_FREQ_IDX: usize = 87;
/// Contour bins per semitone.
pub const CONTOURS_BINS_PER_SEMITONE: f32 = 3.0;
/// Frequency of the lowest contour bin (A0), in Hz.
pub const ANNOTATIONS_BASE_FREQUENCY: f32 = 27.5;
/// Total contour bins.
pub const N_FREQ_BINS_CONTOURS: usize = 264;

/// Contour-bin tolerance used when tracing pitch bends.
const PITCH_BEND_BINS_TOLERANCE: usize = 25;
/// Temporal difference orders considered when inferring extra onsets.
const ONSET_INFER_DIFFS: usize = 2;
/// Neighbourhood half-width for onset peak picking.
const ONSET_PEAK_ORDER: usize = 2;

/// Seconds per posteriorgram frame.
pub fn frame_to_time(frame: usize) -> f64 {
    frame as f64 * FFT_HOP as f64 / NOTES_SAMPLE_RATE as f64
}

/// One transcribed note.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent {
    pub start_time_seconds: f64,
    pub end_time_seconds: f64,
    pub pitch_midi: i32,
    pub amplitude: f32,
    pub pitch_bends: Option<Vec<i32>>,
}

/// Converter parameters, derived from the balanced preset.
#[derive(Debug, Clone)]
pub struct ConvertParams {
    pub frame_threshold: f32,
    pub onset_threshold: f32,
    pub min_note_length: usize,
    pub infer_onsets: bool,
    pub melodia_trick: bool,
    pub min_frequency: Option<f32>,
    pub max_frequency: Option<f32>,
    pub energy_tolerance: usize,
}

impl ConvertParams {
    pub fn from_preset(preset: &BalancedPreset) -> Self {
        let hop_seconds = FFT_HOP as f32 / NOTES_SAMPLE_RATE as f32;
        Self {
            frame_threshold: 1.0 - preset.note_sensitivity,
            onset_threshold: 1.0 - preset.split_sensitivity,
            min_note_length: (preset.min_note_duration_ms / 1000.0 / hop_seconds).round() as usize,
            infer_onsets: true,
            melodia_trick: preset.melodia_trick,
            min_frequency: (preset.min_pitch_hz > 0.0).then_some(preset.min_pitch_hz),
            max_frequency: (preset.max_pitch_hz > 0.0).then_some(preset.max_pitch_hz),
            energy_tolerance: preset.energy_tolerance.max(1) as usize,
        }
    }
}

pub fn hz_to_midi(hz: f32) -> f32 {
    12.0 * (hz / 440.0).log2() + 69.0
}

pub fn midi_to_hz(midi: f32) -> f32 {
    440.0 * 2.0f32.powf((midi - 69.0) / 12.0)
}

fn hz_to_freq_idx(hz: f32) -> usize {
    let midi = hz_to_midi(hz).round() as i64;
    (midi - MIDI_OFFSET as i64).clamp(0, MAX_FREQ_IDX as i64) as usize
}

fn midi_pitch_to_contour_bin(pitch_midi: f32) -> f32 {
    12.0 * CONTOURS_BINS_PER_SEMITONE * (midi_to_hz(pitch_midi) / ANNOTATIONS_BASE_FREQUENCY).log2()
}

/// Zero both posteriorgrams outside the configured frequency bounds.
fn constrain_frequency(
    onsets: &mut Array2<f32>,
    notes: &mut Array2<f32>,
    min_frequency: Option<f32>,
    max_frequency: Option<f32>,
) {
    if let Some(max_hz) = max_frequency {
        let cutoff = hz_to_freq_idx(max_hz);
        onsets.slice_mut(ndarray::s![.., cutoff..]).fill(0.0);
        notes.slice_mut(ndarray::s![.., cutoff..]).fill(0.0);
    }
    if let Some(min_hz) = min_frequency {
        let cutoff = hz_to_freq_idx(min_hz);
        onsets.slice_mut(ndarray::s![.., ..cutoff]).fill(0.0);
        notes.slice_mut(ndarray::s![.., ..cutoff]).fill(0.0);
    }
}

/// Augment onsets with large positive frame-to-frame jumps of the note
/// posteriorgram, rescaled to the onset maximum.
fn get_inferred_onsets(onsets: &Array2<f32>, notes: &Array2<f32>, n_diff: usize) -> Array2<f32> {
    let (n_frames, n_bins) = notes.dim();
    let mut frame_diff = Array2::<f32>::from_elem((n_frames, n_bins), f32::MAX);

    for n in 1..=n_diff {
        for frame in 0..n_frames {
            for bin in 0..n_bins {
                let previous = if frame >= n { notes[[frame - n, bin]] } else { 0.0 };
                let diff = notes[[frame, bin]] - previous;
                if diff < frame_diff[[frame, bin]] {
                    frame_diff[[frame, bin]] = diff;
                }
            }
        }
    }

    frame_diff.mapv_inplace(|v| v.max(0.0));
    frame_diff.slice_mut(ndarray::s![..n_diff.min(n_frames), ..]).fill(0.0);

    let onset_max = onsets.iter().copied().fold(0.0f32, f32::max);
    let diff_max = frame_diff.iter().copied().fold(0.0f32, f32::max);
    if diff_max > 0.0 {
        frame_diff.mapv_inplace(|v| onset_max * v / diff_max);
    }

    let mut inferred = onsets.clone();
    inferred.zip_mut_with(&frame_diff, |onset, &diff| *onset = onset.max(diff));
    inferred
}

/// Keep only relative maxima along the time axis (clipped edges, comparison
/// window of `order` frames on each side); everything else becomes zero.
fn onset_peaks(onsets: &Array2<f32>, order: usize) -> Array2<f32> {
    let (n_frames, n_bins) = onsets.dim();
    let mut peaks = Array2::<f32>::zeros((n_frames, n_bins));

    for bin in 0..n_bins {
        for frame in 0..n_frames {
            let lo = frame.saturating_sub(order);
            let hi = (frame + order).min(n_frames.saturating_sub(1));
            let value = onsets[[frame, bin]];
            let is_peak = (lo..=hi)
                .filter(|&other| other != frame)
                .all(|other| value > onsets[[other, bin]]);
            if is_peak {
                peaks[[frame, bin]] = value;
            }
        }
    }
    peaks
}

/// Note candidate in frame coordinates.
#[derive(Debug, Clone)]
struct FrameEvent {
    start_frame: usize,
    end_frame: usize,
    freq_idx: usize,
    amplitude: f32,
}

fn zero_band(remaining: &mut Array2<f32>, frame: usize, freq_idx: usize) {
    remaining[[frame, freq_idx]] = 0.0;
    if freq_idx < MAX_FREQ_IDX {
        remaining[[frame, freq_idx + 1]] = 0.0;
    }
    if freq_idx > 0 {
        remaining[[frame, freq_idx - 1]] = 0.0;
    }
}

fn mean_amplitude(notes: &Array2<f32>, start: usize, end: usize, freq_idx: usize) -> f32 {
    let sum: f32 = (start..end).map(|frame| notes[[frame, freq_idx]]).sum();
    sum / (end - start) as f32
}

/// Convert the three posteriorgrams into discrete note events, sorted by
/// (start time, pitch).
pub fn convert(
    posteriorgrams: &Posteriorgrams,
    params: &ConvertParams,
    include_pitch_bends: bool,
) -> Vec<NoteEvent> {
    let mut notes = posteriorgrams.notes.clone();
    let mut onsets = posteriorgrams.onsets.clone();
    let n_frames = notes.nrows();
    if n_frames == 0 {
        return Vec::new();
    }

    constrain_frequency(
        &mut onsets,
        &mut notes,
        params.min_frequency,
        params.max_frequency,
    );

    let inferred_onsets = if params.infer_onsets {
        get_inferred_onsets(&onsets, &notes, ONSET_INFER_DIFFS)
    } else {
        onsets.clone()
    };

    let peaks = onset_peaks(&inferred_onsets, ONSET_PEAK_ORDER);

    let mut seeds: Vec<(usize, usize)> = Vec::new();
    for frame in 0..n_frames {
        for bin in 0..notes.ncols() {
            if peaks[[frame, bin]] > params.onset_threshold {
                seeds.push((frame, bin));
            }
        }
    }

    let mut remaining_energy = notes.clone();
    let mut frame_events: Vec<FrameEvent> = Vec::new();

    // seeds are consumed last-to-first
    for &(start_frame, freq_idx) in seeds.iter().rev() {
        if start_frame + 1 >= n_frames {
            continue;
        }

        // walk forward until the activation stays below threshold for more
        // than energy_tolerance consecutive frames
        let mut i = start_frame + 1;
        let mut gap = 0;
        while i + 1 < n_frames && gap < params.energy_tolerance {
            if remaining_energy[[i, freq_idx]] < params.frame_threshold {
                gap += 1;
            } else {
                gap = 0;
            }
            i += 1;
        }
        i -= gap;

        if i - start_frame <= params.min_note_length {
            continue;
        }

        for frame in start_frame..i {
            zero_band(&mut remaining_energy, frame, freq_idx);
        }

        frame_events.push(FrameEvent {
            start_frame,
            end_frame: i,
            freq_idx,
            amplitude: mean_amplitude(&notes, start_frame, i, freq_idx),
        });
    }

    if params.melodia_trick {
        melodia_pass(
            &notes,
            &mut remaining_energy,
            params,
            n_frames,
            &mut frame_events,
        );
    }

    frame_events.sort_by(|a, b| {
        a.start_frame
            .cmp(&b.start_frame)
            .then(a.freq_idx.cmp(&b.freq_idx))
    });

    frame_events
        .into_iter()
        .map(|event| {
            let pitch_bends = include_pitch_bends.then(|| {
                trace_pitch_bends(
                    &posteriorgrams.contours,
                    event.start_frame,
                    event.end_frame,
                    event.freq_idx + MIDI_OFFSET,
                )
            });
            NoteEvent {
                start_time_seconds: frame_to_time(event.start_frame),
                end_time_seconds: frame_to_time(event.end_frame),
                pitch_midi: (event.freq_idx + MIDI_OFFSET) as i32,
                amplitude: event.amplitude,
                pitch_bends,
            }
        })
        .collect()
}

/// Supplemental recall pass: repeatedly seed at the residual-energy maximum
/// and trace in both directions. Only ever adds events.
fn melodia_pass(
    notes: &Array2<f32>,
    remaining_energy: &mut Array2<f32>,
    params: &ConvertParams,
    n_frames: usize,
    frame_events: &mut Vec<FrameEvent>,
) {
    loop {
        let mut peak = 0.0f32;
        let mut peak_pos = (0usize, 0usize);
        for ((frame, bin), &value) in remaining_energy.indexed_iter() {
            if value > peak {
                peak = value;
                peak_pos = (frame, bin);
            }
        }
        if peak <= params.frame_threshold {
            break;
        }

        let (mid_frame, freq_idx) = peak_pos;
        remaining_energy[[mid_frame, freq_idx]] = 0.0;

        // forward trace
        let mut i = mid_frame as isize + 1;
        let mut gap = 0;
        while (i as usize) < n_frames.saturating_sub(1) && gap < params.energy_tolerance {
            if remaining_energy[[i as usize, freq_idx]] < params.frame_threshold {
                gap += 1;
            } else {
                gap = 0;
            }
            zero_band(remaining_energy, i as usize, freq_idx);
            i += 1;
        }
        let end_frame = (i - 1 - gap as isize).max(0) as usize;

        // backward trace
        let mut i = mid_frame as isize - 1;
        let mut gap = 0;
        while i > 0 && gap < params.energy_tolerance {
            if remaining_energy[[i as usize, freq_idx]] < params.frame_threshold {
                gap += 1;
            } else {
                gap = 0;
            }
            zero_band(remaining_energy, i as usize, freq_idx);
            i -= 1;
        }
        let start_frame = (i + 1 + gap as isize).max(0) as usize;

        if end_frame <= start_frame || end_frame - start_frame <= params.min_note_length {
            continue;
        }

        frame_events.push(FrameEvent {
            start_frame,
            end_frame,
            freq_idx,
            amplitude: mean_amplitude(notes, start_frame, end_frame, freq_idx),
        });
    }
}

/// Per-frame pitch-bend offsets (in contour bins) around the note's center
/// bin, weighted by a Gaussian over the tolerance window.
fn trace_pitch_bends(
    contours: &Array2<f32>,
    start_frame: usize,
    end_frame: usize,
    pitch_midi: usize,
) -> Vec<i32> {
    let tolerance = PITCH_BEND_BINS_TOLERANCE;
    let window_length = tolerance * 2 + 1;
    let gaussian = gaussian_window(window_length, 5.0);

    let freq_idx = midi_pitch_to_contour_bin(pitch_midi as f32).round() as usize;
    let freq_start = freq_idx.saturating_sub(tolerance);
    let freq_end = (freq_idx + tolerance + 1).min(N_FREQ_BINS_CONTOURS);

    let gauss_start = tolerance.saturating_sub(freq_idx);
    let gauss_end =
        window_length - freq_idx.saturating_sub(N_FREQ_BINS_CONTOURS - tolerance - 1);
    let gaussian = &gaussian[gauss_start..gauss_end];

    let shift = (tolerance - tolerance.saturating_sub(freq_idx)) as i32;

    (start_frame..end_frame)
        .map(|frame| {
            let mut best = f32::MIN;
            let mut best_offset = 0i32;
            for (offset, bin) in (freq_start..freq_end).enumerate() {
                let weighted = contours[[frame, bin]] * gaussian[offset];
                if weighted > best {
                    best = weighted;
                    best_offset = offset as i32;
                }
            }
            best_offset - shift
        })
        .collect()
}

/// Symmetric Gaussian window with peak value 1.
fn gaussian_window(m: usize, std: f32) -> Vec<f32> {
    if m == 0 {
        return Vec::new();
    }
    let midpoint = (m - 1) as f32 / 2.0;
    (0..m)
        .map(|n| (-(n as f32 - midpoint).powi(2) / (2.0 * std * std)).exp())
        .collect()
}
