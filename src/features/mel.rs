//! Mel filterbank and cepstral coefficients
//!
//! Slaney-style mel scale with area-normalized triangular filters, matching
//! the librosa defaults the deployed models were trained against.

use std::f64::consts::PI;

use super::stft::power_to_db;
use super::FeatureMatrix;

/// Top dB used when converting the mel power spectrum for MFCCs
const MFCC_TOP_DB: f32 = 80.0;

/// Precomputed mel filterbank (`n_mels x n_bins`)
#[derive(Debug, Clone)]
pub struct MelFilterbank {
    weights: Vec<Vec<f32>>,
}

impl MelFilterbank {
    /// Filters spanning `[fmin, fmax]` over an `n_fft` point spectrum
    pub fn new(sample_rate: u32, n_fft: usize, n_mels: usize, fmin: f32, fmax: Option<f32>) -> Self {
        let sr = sample_rate as f64;
        let fmax = fmax.map(f64::from).unwrap_or(sr / 2.0);
        let n_bins = n_fft / 2 + 1;

        let fft_freqs: Vec<f64> = (0..n_bins).map(|k| k as f64 * sr / n_fft as f64).collect();

        let mel_min = hz_to_mel(fmin as f64);
        let mel_max = hz_to_mel(fmax);
        let mel_f: Vec<f64> = (0..n_mels + 2)
            .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
            .collect();

        let weights = (0..n_mels)
            .map(|i| {
                let lower_width = mel_f[i + 1] - mel_f[i];
                let upper_width = mel_f[i + 2] - mel_f[i + 1];
                let enorm = 2.0 / (mel_f[i + 2] - mel_f[i]);
                fft_freqs
                    .iter()
                    .map(|&f| {
                        let lower = (f - mel_f[i]) / lower_width;
                        let upper = (mel_f[i + 2] - f) / upper_width;
                        (lower.min(upper).max(0.0) * enorm) as f32
                    })
                    .collect()
            })
            .collect();

        Self { weights }
    }

    pub fn n_mels(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[Vec<f32>] {
        &self.weights
    }

    /// Project a `bins x frames` power spectrogram to `n_mels x frames`
    pub fn apply(&self, power: &FeatureMatrix) -> FeatureMatrix {
        FeatureMatrix::project(&self.weights, power)
    }
}

/// Slaney mel scale: linear below 1 kHz, logarithmic above
pub fn hz_to_mel(hz: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        f_sp * mel
    }
}

/// Orthonormal DCT-II basis, `n_out x n_in`
fn dct_basis(n_out: usize, n_in: usize) -> Vec<Vec<f32>> {
    let n = n_in as f64;
    (0..n_out)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..n_in)
                .map(|i| (scale * (PI * k as f64 * (2 * i + 1) as f64 / (2.0 * n)).cos()) as f32)
                .collect()
        })
        .collect()
}

/// MFCCs from a mel power spectrogram: dB scaling then DCT over bands
pub fn mfcc(mel_power: &FeatureMatrix, n_mfcc: usize) -> FeatureMatrix {
    let log_mel = power_to_db(mel_power, Some(MFCC_TOP_DB));
    let basis = dct_basis(n_mfcc, mel_power.rows());
    FeatureMatrix::project(&basis, &log_mel)
}
