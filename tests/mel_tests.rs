//! Validation tests for the mel spectrogram front end

use std::f32::consts::PI;

use audio2score::mel::{
    hz_to_mel, mel_filter_bank, mel_spectrogram, mel_to_hz, MEL_BANDS, N_FFT, STFT_HOP,
    TEMPO_SAMPLE_RATE,
};

/// Generate a pure sine tone at the tempo pipeline's sample rate
fn generate_tone(freq_hz: f32, seconds: f32) -> Vec<f32> {
    let n_samples = (seconds * TEMPO_SAMPLE_RATE as f32) as usize;
    (0..n_samples)
        .map(|i| (2.0 * PI * freq_hz * i as f32 / TEMPO_SAMPLE_RATE as f32).sin())
        .collect()
}

#[test]
fn slaney_scale_is_linear_below_one_khz() {
    // below the knee the scale is hz / (200/3)
    assert!((hz_to_mel(0.0) - 0.0).abs() < 1e-12);
    assert!((hz_to_mel(200.0 / 3.0) - 1.0).abs() < 1e-12);
    assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-12);
}

#[test]
fn slaney_scale_round_trips() {
    for hz in [20.0, 440.0, 999.9, 1000.0, 2500.0, 5000.0] {
        let round_trip = mel_to_hz(hz_to_mel(hz));
        assert!(
            (round_trip - hz).abs() < 1e-6 * hz.max(1.0),
            "{} -> {}",
            hz,
            round_trip
        );
    }
}

#[test]
fn filter_bank_shape_and_positivity() {
    let bank = mel_filter_bank();
    assert_eq!(bank.dim(), (MEL_BANDS, N_FFT / 2 + 1));

    for band in 0..MEL_BANDS {
        let row = bank.row(band);
        assert!(row.iter().all(|&w| w >= 0.0));
        assert!(
            row.iter().sum::<f64>() > 0.0,
            "band {} has no support",
            band
        );
    }
}

#[test]
fn filter_centers_increase_with_band_index() {
    let bank = mel_filter_bank();
    let mut last_center = 0usize;
    for band in 0..MEL_BANDS {
        let row = bank.row(band);
        let center = row
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert!(
            center >= last_center,
            "band {} peaks at bin {} before bin {}",
            band,
            center,
            last_center
        );
        last_center = center;
    }
}

#[test]
fn empty_input_yields_empty_tensor() {
    let mel = mel_spectrogram(&[]);
    assert_eq!(mel.dim(), (MEL_BANDS, 0));
}

#[test]
fn frame_count_follows_hop_formula() {
    // center padding adds one FFT of zeros, so T = 1 + len / hop
    for len in [500usize, 1024, 11025, 20000] {
        let mel = mel_spectrogram(&vec![0.25; len]);
        assert_eq!(mel.ncols(), 1 + len / STFT_HOP, "len={}", len);
        assert_eq!(mel.nrows(), MEL_BANDS);
    }
}

#[test]
fn tone_energy_lands_in_the_expected_band() {
    let tone = generate_tone(440.0, 2.0);
    let mel = mel_spectrogram(&tone);

    // average energy per band over the interior frames
    let interior = 2..mel.ncols() - 2;
    let mut best_band = 0;
    let mut best_energy = f32::MIN;
    for band in 0..MEL_BANDS {
        let energy: f32 = interior.clone().map(|f| mel[[band, f]]).sum();
        if energy > best_energy {
            best_energy = energy;
            best_band = band;
        }
    }

    // 440 Hz sits near mel 6.6 of the 20..5000 Hz range; with 40 bands that
    // is around band 5-6
    assert!(
        (4..=8).contains(&best_band),
        "tone peaked in band {}",
        best_band
    );
    assert!(best_energy > 0.0);
}

#[test]
fn zero_padding_does_not_move_the_signal_support() {
    let tone = generate_tone(440.0, 1.0);
    let mel_plain = mel_spectrogram(&tone);

    let mut padded = vec![0.0f32; N_FFT];
    padded.extend_from_slice(&tone);
    padded.extend(std::iter::repeat(0.0).take(N_FFT));
    let mel_padded = mel_spectrogram(&padded);

    // one FFT of leading zeros shifts the support by exactly two hops
    let shift = N_FFT / STFT_HOP;
    assert_eq!(mel_padded.ncols(), mel_plain.ncols() + 2 * shift);

    for frame in 0..mel_plain.ncols() {
        for band in 0..MEL_BANDS {
            let difference = (mel_plain[[band, frame]] - mel_padded[[band, frame + shift]]).abs();
            assert!(
                difference < 1e-6,
                "band {} frame {} differs by {}",
                band,
                frame,
                difference
            );
        }
    }
}
