//! Validation tests for the tempo pipeline's window builder, posterior
//! reduction, smoothing, and run compression

use ndarray::{Array2, Array4};

use audio2score::mel::MEL_BANDS;
use audio2score::tempo::{
    argmax, average_predictions, class_index_to_bpm, compress_tempo_points, interpolate_argmax,
    moving_average_same, normalize_by_max, prediction_rows_to_bpm, round_decimals,
    sliding_windows, FEATURE_FRAME_SECONDS, GLOBAL_HOP_FRAMES, LOCAL_HOP_FRAMES, TEMPO_CLASSES,
    WINDOW_FRAMES,
};

/// Mel tensor whose value encodes its (band, frame) position
fn indexed_mel(frames: usize) -> Array2<f32> {
    Array2::from_shape_fn((MEL_BANDS, frames), |(band, frame)| {
        (band * 10_000 + frame) as f32
    })
}

#[test]
fn global_window_count_follows_hop_formula() {
    let mel = indexed_mel(300);
    let windows = sliding_windows(&mel, WINDOW_FRAMES, GLOBAL_HOP_FRAMES, false);
    // (300 - 256) / 128 + 1
    assert_eq!(windows.shape(), &[1, MEL_BANDS, WINDOW_FRAMES, 1]);

    let mel = indexed_mel(600);
    let windows = sliding_windows(&mel, WINDOW_FRAMES, GLOBAL_HOP_FRAMES, false);
    assert_eq!(windows.shape()[0], (600 - 256) / 128 + 1);

    // window n starts at frame n * hop
    assert_eq!(windows[[1, 3, 0, 0]], mel[[3, 128]]);
    assert_eq!(windows[[2, 0, 255, 0]], mel[[0, 256 + 255]]);
}

#[test]
fn zero_padding_prepends_half_a_window() {
    let mel = indexed_mel(300);
    let windows = sliding_windows(&mel, WINDOW_FRAMES, LOCAL_HOP_FRAMES, true);
    // padded length 556: (556 - 256) / 32 + 1
    assert_eq!(windows.shape()[0], 10);

    // the first window starts inside the leading zeros
    assert_eq!(windows[[0, 5, 127, 0]], 0.0);
    assert_eq!(windows[[0, 5, 128, 0]], mel[[5, 0]]);
}

#[test]
fn short_input_yields_exactly_one_right_padded_window() {
    let mel = indexed_mel(100);
    let windows = sliding_windows(&mel, WINDOW_FRAMES, GLOBAL_HOP_FRAMES, false);
    assert_eq!(windows.shape(), &[1, MEL_BANDS, WINDOW_FRAMES, 1]);
    assert_eq!(windows[[0, 2, 99, 0]], mel[[2, 99]]);
    assert_eq!(windows[[0, 2, 100, 0]], 0.0);
}

#[test]
fn empty_mel_yields_no_windows() {
    let mel = Array2::<f32>::zeros((MEL_BANDS, 0));
    let windows = sliding_windows(&mel, WINDOW_FRAMES, GLOBAL_HOP_FRAMES, false);
    assert_eq!(windows.shape()[0], 0);
}

#[test]
fn max_normalization_scales_to_unit_peak() {
    let mut tensor = Array4::from_shape_fn((2, 2, 2, 1), |(n, b, f, _)| (n + b + f) as f32);
    normalize_by_max(&mut tensor);
    let max = tensor.iter().copied().fold(f32::MIN, f32::max);
    assert_eq!(max, 1.0);

    // an all-zero tensor is left untouched
    let mut zeros = Array4::<f32>::zeros((1, 2, 2, 1));
    normalize_by_max(&mut zeros);
    assert!(zeros.iter().all(|&v| v == 0.0));
}

#[test]
fn averaged_posterior_argmax_selects_the_dominant_class() {
    let mut predictions = Array2::<f32>::zeros((3, TEMPO_CLASSES));
    for row in 0..3 {
        predictions[[row, 90]] = 0.9;
        predictions[[row, 40]] = 0.3;
    }
    let averaged = average_predictions(&predictions);
    assert!((averaged[90] - 0.9).abs() < 1e-6);
    assert_eq!(argmax(&averaged), 90);
    // class 90 maps to 120 BPM
    assert_eq!(class_index_to_bpm(90.0), 120.0);
}

#[test]
fn parabolic_interpolation_laws() {
    // symmetric peak: refined index is exactly the center
    let refined = interpolate_argmax(&[0.1, 1.0, 0.1], 1);
    assert_eq!(refined, 1.0);

    // vanishing curvature falls back to the integer index
    let refined = interpolate_argmax(&[0.1, 0.5, 0.9], 1);
    assert_eq!(refined, 1.0);

    // asymmetric peak leans toward the larger neighbor, never more than one
    let refined = interpolate_argmax(&[0.1, 0.9, 0.5], 1);
    assert!(refined > 1.0 && refined < 2.0);

    // boundary peaks cannot be refined
    assert_eq!(interpolate_argmax(&[0.9, 0.1], 0), 0.0);
    assert_eq!(interpolate_argmax(&[0.1, 0.9], 1), 1.0);
}

#[test]
fn class_to_bpm_clips_to_valid_range() {
    assert_eq!(class_index_to_bpm(0.0), 30.0);
    assert_eq!(class_index_to_bpm(100.0), 130.0);
    assert_eq!(class_index_to_bpm(255.0), 285.0);
    assert_eq!(class_index_to_bpm(280.0), 300.0);
    assert_eq!(class_index_to_bpm(-20.0), 20.0);
}

#[test]
fn per_window_argmax_has_no_averaging() {
    let mut predictions = Array2::<f32>::zeros((2, TEMPO_CLASSES));
    predictions[[0, 60]] = 1.0;
    predictions[[1, 120]] = 1.0;
    let series = prediction_rows_to_bpm(&predictions);
    assert_eq!(series, vec![90.0, 150.0]);
}

#[test]
fn moving_average_keeps_the_nominal_divisor_at_edges() {
    let smoothed = moving_average_same(&[1.0; 7], 5);
    assert_eq!(smoothed.len(), 7);

    // interior values see the full window
    assert!((smoothed[3] - 1.0).abs() < 1e-12);
    // the first value only has three in-range samples but is still divided
    // by five
    assert!((smoothed[0] - 0.6).abs() < 1e-12);
    assert!((smoothed[1] - 0.8).abs() < 1e-12);
    assert!((smoothed[6] - 0.6).abs() < 1e-12);
}

#[test]
fn moving_average_handles_even_and_degenerate_windows() {
    // an even width is promoted to the next odd width
    let smoothed = moving_average_same(&[2.0; 5], 4);
    assert!((smoothed[2] - 2.0).abs() < 1e-12);

    assert!(moving_average_same(&[], 5).is_empty());

    let identity = moving_average_same(&[3.0, 4.0], 1);
    assert_eq!(identity, vec![3.0, 4.0]);
}

#[test]
fn rounding_is_to_six_decimals() {
    assert_eq!(round_decimals(1.23456789, 6), 1.234568);
    assert_eq!(round_decimals(-1.23456749, 6), -1.234567);
}

#[test]
fn compression_drops_points_below_both_deltas() {
    // constant BPM sampled every 0.1 s: only every seventh point moves far
    // enough in time
    let series = vec![120.0; 30];
    let compressed = compress_tempo_points(&series, 0.1);
    assert!(!compressed.is_empty());
    assert_eq!(compressed[0].time_seconds, 0.0);

    for pair in compressed.windows(2) {
        let dt = pair[1].time_seconds - pair[0].time_seconds;
        let db = (pair[1].bpm - pair[0].bpm).abs();
        assert!(dt >= 0.7 || db >= 0.75, "dt={} db={}", dt, db);
        assert!(pair[1].time_seconds > pair[0].time_seconds);
    }
    // 30 points over 2.9 s compress to one point per 0.7 s
    assert_eq!(compressed.len(), 5);
}

#[test]
fn compression_keeps_fast_bpm_changes() {
    // alternating BPM: every point moves at least 0.75 BPM
    let series: Vec<f64> = (0..10)
        .map(|i| if i % 2 == 0 { 120.0 } else { 121.0 })
        .collect();
    let compressed = compress_tempo_points(&series, 0.1);
    assert_eq!(compressed.len(), 10);
}

#[test]
fn compression_clamps_and_rounds() {
    let series = vec![10.0, 400.0];
    let compressed = compress_tempo_points(&series, 1.0);
    assert_eq!(compressed.len(), 2);
    assert_eq!(compressed[0].bpm, 20.0);
    assert_eq!(compressed[1].bpm, 300.0);

    let series = vec![123.456789123];
    let compressed = compress_tempo_points(&series, 1.0);
    assert_eq!(compressed[0].bpm, 123.456789);
}

#[test]
fn local_hop_exceeds_the_time_threshold() {
    // every local window is ~1.49 s apart, so a smooth tempo map keeps all
    // points purely on the time rule
    let hop_seconds = LOCAL_HOP_FRAMES as f64 * FEATURE_FRAME_SECONDS;
    assert!(hop_seconds > 0.7);

    let compressed = compress_tempo_points(&[120.0; 4], hop_seconds);
    assert_eq!(compressed.len(), 4);
}
