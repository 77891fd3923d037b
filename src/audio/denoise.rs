//! Stationary spectral-gate noise suppression
//!
//! Estimates a per-bin noise floor from the clip itself and zeroes
//! time-frequency cells that do not rise above it.

use crate::features::stft::{Stft, AMIN};

/// Spectral gate over a short-hop STFT
#[derive(Debug, Clone)]
pub struct SpectralGate {
    n_fft: usize,
    hop_length: usize,
    /// Standard deviations above the per-bin mean a cell must reach
    n_std: f32,
    /// Frames on each side averaged into the mask
    smoothing: usize,
}

impl Default for SpectralGate {
    fn default() -> Self {
        Self {
            n_fft: 1024,
            hop_length: 256,
            n_std: 1.5,
            smoothing: 1,
        }
    }
}

impl SpectralGate {
    /// Gate `samples`; the output has the same length as the input
    pub fn apply(&self, samples: &[f32]) -> Vec<f32> {
        if samples.is_empty() {
            return Vec::new();
        }
        let stft = Stft::new(self.n_fft, self.hop_length);
        let mut spectrum = stft.forward(samples);
        let n_frames = spectrum.n_frames();
        let n_bins = spectrum.n_bins;

        let db: Vec<Vec<f32>> = spectrum
            .frames
            .iter()
            .map(|f| f.iter().map(|c| 20.0 * c.norm().max(AMIN).log10()).collect())
            .collect();

        // Per-bin noise threshold from the statistics of the whole clip
        let thresholds: Vec<f32> = (0..n_bins)
            .map(|b| {
                let mean = db.iter().map(|f| f[b]).sum::<f32>() / n_frames as f32;
                let var = db.iter().map(|f| (f[b] - mean).powi(2)).sum::<f32>() / n_frames as f32;
                mean + self.n_std * var.sqrt()
            })
            .collect();

        let raw_mask: Vec<Vec<f32>> = db
            .iter()
            .map(|f| {
                f.iter()
                    .zip(&thresholds)
                    .map(|(v, t)| if v > t { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect();

        for (t, frame) in spectrum.frames.iter_mut().enumerate() {
            let lo = t.saturating_sub(self.smoothing);
            let hi = (t + self.smoothing).min(n_frames - 1);
            let span = (hi - lo + 1) as f32;
            for (b, c) in frame.iter_mut().enumerate() {
                let gain = (lo..=hi).map(|s| raw_mask[s][b]).sum::<f32>() / span;
                *c *= gain;
            }
        }

        let out = stft.inverse(&spectrum, samples.len());
        tracing::debug!(
            "Spectral gate: {} frames x {} bins, {} samples",
            n_frames,
            n_bins,
            out.len()
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserves_length() {
        let gate = SpectralGate::default();
        for len in [1, 100, 1024, 5000] {
            let samples: Vec<f32> = (0..len).map(|i| (i as f32 * 0.3).sin()).collect();
            assert_eq!(gate.apply(&samples).len(), len);
        }
        assert!(gate.apply(&[]).is_empty());
    }

    #[test]
    fn test_silence_stays_silent() {
        let out = SpectralGate::default().apply(&vec![0.0; 4096]);
        assert!(out.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_attenuates_steady_hiss_between_bursts() {
        // Deterministic low-level hiss with a loud tone burst in the middle
        let mut state = 12345u32;
        let mut samples: Vec<f32> = (0..16384)
            .map(|_| {
                state = state.wrapping_mul(1103515245).wrapping_add(12345);
                ((state >> 16) as f32 / 32768.0 - 1.0) * 0.01
            })
            .collect();
        for (i, s) in samples.iter_mut().enumerate().skip(6000).take(4000) {
            *s += (i as f32 * 0.2).sin() * 0.5;
        }

        let out = SpectralGate::default().apply(&samples);
        let energy = |x: &[f32]| x.iter().map(|v| v * v).sum::<f32>();
        assert!(energy(&out[..4000]) < energy(&samples[..4000]));
        assert!(energy(&out[6500..9500]) > 0.5 * energy(&samples[6500..9500]));
    }
}
