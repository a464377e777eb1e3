//! Mel spectrogram front end for the tempo pipeline
//!
//! Center-pads the 11,025 Hz buffer, windows it with a Hann window, runs a
//! 1024-point FFT per hop, and projects the magnitude spectrum through a
//! Slaney-style mel filterbank (40 triangular filters between 20 Hz and
//! 5 kHz). The result is band-major: `mel[[band, frame]]`.

use ndarray::Array2;
use rustfft::{num_complex::Complex, FftPlanner};

/// Sample rate the tempo pipeline expects its input at.
pub const TEMPO_SAMPLE_RATE: usize = 11_025;
pub const N_FFT: usize = 1024;
pub const STFT_HOP: usize = 512;
pub const MEL_BANDS: usize = 40;

const MEL_MIN_HZ: f64 = 20.0;
const MEL_MAX_HZ: f64 = 5000.0;
const FFT_BINS: usize = N_FFT / 2 + 1;

/// Hz to mel, Slaney variant: linear below 1 kHz, logarithmic above.
pub fn hz_to_mel(hz: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let log_step = 6.4f64.ln() / 27.0;

    if hz < min_log_hz {
        hz / f_sp
    } else {
        min_log_mel + (hz / min_log_hz).ln() / log_step
    }
}

/// Mel to Hz, inverse of [`hz_to_mel`].
pub fn mel_to_hz(mel: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let log_step = 6.4f64.ln() / 27.0;

    if mel < min_log_mel {
        mel * f_sp
    } else {
        min_log_hz * (log_step * (mel - min_log_mel)).exp()
    }
}

fn mel_frequencies(count: usize, min_hz: f64, max_hz: f64) -> Vec<f64> {
    let mel_min = hz_to_mel(min_hz);
    let mel_max = hz_to_mel(max_hz);
    (0..count)
        .map(|i| {
            let ratio = if count <= 1 {
                0.0
            } else {
                i as f64 / (count - 1) as f64
            };
            mel_to_hz(mel_min + (mel_max - mel_min) * ratio)
        })
        .collect()
}

/// Build the `[40 x 513]` triangular filter matrix with Slaney normalization
/// (each filter scaled by 2 / bandwidth).
pub fn mel_filter_bank() -> Array2<f64> {
    let mel_freqs = mel_frequencies(MEL_BANDS + 2, MEL_MIN_HZ, MEL_MAX_HZ);
    let fft_freqs: Vec<f64> = (0..FFT_BINS)
        .map(|i| i as f64 * TEMPO_SAMPLE_RATE as f64 / N_FFT as f64)
        .collect();
    let fdiff: Vec<f64> = (0..MEL_BANDS + 1)
        .map(|i| mel_freqs[i + 1] - mel_freqs[i])
        .collect();

    let mut weights = Array2::<f64>::zeros((MEL_BANDS, FFT_BINS));
    for mel in 0..MEL_BANDS {
        let enorm = 2.0 / (mel_freqs[mel + 2] - mel_freqs[mel]);
        for bin in 0..FFT_BINS {
            let lower = (fft_freqs[bin] - mel_freqs[mel]) / fdiff[mel];
            let upper = (mel_freqs[mel + 2] - fft_freqs[bin]) / fdiff[mel + 1];
            weights[[mel, bin]] = lower.min(upper).max(0.0) * enorm;
        }
    }
    weights
}

fn hann_window() -> Vec<f64> {
    (0..N_FFT)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / N_FFT as f64).cos())
        .collect()
}

/// Compute the `[40 x T]` mel tensor for a mono buffer. Empty input yields an
/// empty tensor, not an error.
pub fn mel_spectrogram(samples: &[f32]) -> Array2<f32> {
    if samples.is_empty() {
        return Array2::zeros((MEL_BANDS, 0));
    }

    let pad = N_FFT / 2;
    let mut padded = vec![0.0f64; samples.len() + 2 * pad];
    for (dst, &src) in padded[pad..pad + samples.len()].iter_mut().zip(samples) {
        *dst = f64::from(src);
    }

    if padded.len() < N_FFT {
        return Array2::zeros((MEL_BANDS, 0));
    }

    let frame_count = 1 + (padded.len() - N_FFT) / STFT_HOP;
    let filter_bank = mel_filter_bank();
    let window = hann_window();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(N_FFT);

    let mut mel = Array2::<f32>::zeros((MEL_BANDS, frame_count));
    let mut buffer = vec![Complex::new(0.0f64, 0.0); N_FFT];
    let mut magnitudes = vec![0.0f64; FFT_BINS];

    for frame_idx in 0..frame_count {
        let offset = frame_idx * STFT_HOP;
        for i in 0..N_FFT {
            buffer[i] = Complex::new(padded[offset + i] * window[i], 0.0);
        }

        fft.process(&mut buffer);

        for (bin, magnitude) in magnitudes.iter_mut().enumerate() {
            *magnitude = buffer[bin].norm();
        }

        for band in 0..MEL_BANDS {
            let mut energy = 0.0;
            for bin in 0..FFT_BINS {
                energy += filter_bank[[band, bin]] * magnitudes[bin];
            }
            mel[[band, frame_idx]] = energy as f32;
        }
    }

    mel
}
