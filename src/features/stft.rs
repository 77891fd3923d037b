//! Centered short-time Fourier transform shared by all spectral descriptors

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

use super::FeatureMatrix;

/// Smallest power used before taking logarithms
pub const AMIN: f32 = 1e-10;

/// Complex spectrogram stored frame-major: `frames[t][bin]`
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub frames: Vec<Vec<Complex32>>,
    pub n_bins: usize,
}

impl Spectrum {
    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    /// |X| as a `bins x frames` matrix
    pub fn magnitude(&self) -> FeatureMatrix {
        let mags: Vec<Vec<f32>> = self
            .frames
            .iter()
            .map(|f| f.iter().map(|c| c.norm()).collect())
            .collect();
        FeatureMatrix::from_frames(&mags, self.n_bins)
    }

    /// |X|^2 as a `bins x frames` matrix
    pub fn power(&self) -> FeatureMatrix {
        let pows: Vec<Vec<f32>> = self
            .frames
            .iter()
            .map(|f| f.iter().map(|c| c.norm_sqr()).collect())
            .collect();
        FeatureMatrix::from_frames(&pows, self.n_bins)
    }
}

/// STFT with a periodic Hann window, `n_fft/2` zero padding on both sides
pub struct Stft {
    n_fft: usize,
    hop_length: usize,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl Stft {
    pub fn new(n_fft: usize, hop_length: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            n_fft,
            hop_length,
            window: hann_window(n_fft),
            forward: planner.plan_fft_forward(n_fft),
            inverse: planner.plan_fft_inverse(n_fft),
        }
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Number of frames produced for `n_samples` input samples
    pub fn frame_count(&self, n_samples: usize) -> usize {
        1 + n_samples / self.hop_length
    }

    /// Center frequency in Hz of every positive-frequency bin
    pub fn bin_frequencies(&self, sample_rate: u32) -> Vec<f32> {
        (0..self.n_bins())
            .map(|k| k as f32 * sample_rate as f32 / self.n_fft as f32)
            .collect()
    }

    pub fn forward(&self, samples: &[f32]) -> Spectrum {
        let pad = self.n_fft / 2;
        let mut padded = vec![0.0f32; pad];
        padded.extend_from_slice(samples);
        padded.extend(std::iter::repeat(0.0f32).take(pad));

        let n_frames = self.frame_count(samples.len());
        let n_bins = self.n_bins();
        let mut scratch = vec![Complex32::new(0.0, 0.0); self.forward.get_inplace_scratch_len()];
        let mut frames = Vec::with_capacity(n_frames);

        for i in 0..n_frames {
            let start = i * self.hop_length;
            let mut buffer: Vec<Complex32> = (0..self.n_fft)
                .map(|j| {
                    let s = padded.get(start + j).copied().unwrap_or(0.0);
                    Complex32::new(s * self.window[j], 0.0)
                })
                .collect();
            self.forward.process_with_scratch(&mut buffer, &mut scratch);
            buffer.truncate(n_bins);
            frames.push(buffer);
        }

        Spectrum { frames, n_bins }
    }

    /// Weighted overlap-add inverse of [`Stft::forward`], trimmed to `length`
    pub fn inverse(&self, spectrum: &Spectrum, length: usize) -> Vec<f32> {
        let n = self.n_fft;
        let pad = n / 2;
        let total = n + self.hop_length * spectrum.n_frames().saturating_sub(1);
        let mut output = vec![0.0f32; total];
        let mut norm = vec![0.0f32; total];
        let mut scratch = vec![Complex32::new(0.0, 0.0); self.inverse.get_inplace_scratch_len()];

        for (i, frame) in spectrum.frames.iter().enumerate() {
            let mut buffer = vec![Complex32::new(0.0, 0.0); n];
            for (k, c) in frame.iter().enumerate().take(n / 2 + 1) {
                buffer[k] = *c;
                if k > 0 && k < n - k {
                    buffer[n - k] = c.conj();
                }
            }
            self.inverse.process_with_scratch(&mut buffer, &mut scratch);

            let start = i * self.hop_length;
            for j in 0..n {
                let w = self.window[j];
                output[start + j] += buffer[j].re / n as f32 * w;
                norm[start + j] += w * w;
            }
        }

        for (o, w) in output.iter_mut().zip(&norm) {
            if *w > 1e-8 {
                *o /= *w;
            }
        }

        let mut result: Vec<f32> = output.into_iter().skip(pad).take(length).collect();
        result.resize(length, 0.0);
        result
    }
}

/// Periodic Hann window
pub fn hann_window(length: usize) -> Vec<f32> {
    (0..length)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / length as f32).cos()))
        .collect()
}

/// `10 * log10(max(S, amin))` relative to a reference of 1.0, optionally
/// clipped to `max - top_db`.
pub fn power_to_db(power: &FeatureMatrix, top_db: Option<f32>) -> FeatureMatrix {
    let db = power.map(|v| 10.0 * v.max(AMIN).log10());
    match top_db {
        Some(top) => {
            let floor = db.max() - top;
            db.map(|v| v.max(floor))
        }
        None => db,
    }
}

/// Slice `samples` into centered frames of `frame_length` every `hop_length`.
///
/// With `edge_padding` the borders repeat the first/last sample, otherwise
/// they are zero.
pub fn centered_frames(
    samples: &[f32],
    frame_length: usize,
    hop_length: usize,
    edge_padding: bool,
) -> Vec<Vec<f32>> {
    let pad = frame_length / 2;
    let (head, tail) = if edge_padding && !samples.is_empty() {
        (samples[0], samples[samples.len() - 1])
    } else {
        (0.0, 0.0)
    };
    let mut padded = vec![head; pad];
    padded.extend_from_slice(samples);
    padded.extend(std::iter::repeat(tail).take(pad));

    let n_frames = 1 + (padded.len().saturating_sub(frame_length)) / hop_length;
    (0..n_frames)
        .map(|i| {
            let start = i * hop_length;
            let end = (start + frame_length).min(padded.len());
            let mut frame = padded[start..end].to_vec();
            frame.resize(frame_length, tail);
            frame
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hann_window() {
        let window = hann_window(4);
        assert_eq!(window.len(), 4);
        assert!((window[0] - 0.0).abs() < 1e-6);
        assert!((window[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_frame_count_matches_six_second_clip() {
        let stft = Stft::new(2048, 512);
        assert_eq!(stft.frame_count(22050 * 6), 259);
        let spec = stft.forward(&vec![0.0; 22050 * 6]);
        assert_eq!(spec.n_frames(), 259);
        assert_eq!(spec.n_bins, 1025);
    }

    #[test]
    fn test_sine_peaks_at_expected_bin() {
        let sr = 22050;
        let stft = Stft::new(2048, 512);
        let samples: Vec<f32> = (0..sr)
            .map(|i| (2.0 * PI * 1000.0 * i as f32 / sr as f32).sin())
            .collect();
        let mag = stft.forward(&samples).magnitude();
        let frame = mag.column(10);
        let peak = frame
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc })
            .0;
        let expected = (1000.0 * 2048.0 / sr as f32).round() as usize;
        assert!((peak as i64 - expected as i64).abs() <= 1);
    }

    #[test]
    fn test_inverse_reconstructs_signal() {
        let stft = Stft::new(1024, 256);
        let samples: Vec<f32> = (0..8000).map(|i| (i as f32 * 0.013).sin() * 0.3).collect();
        let spec = stft.forward(&samples);
        let rebuilt = stft.inverse(&spec, samples.len());
        assert_eq!(rebuilt.len(), samples.len());
        for i in (600..7400).step_by(97) {
            assert!((rebuilt[i] - samples[i]).abs() < 1e-3, "sample {}", i);
        }
    }

    #[test]
    fn test_power_to_db_clips_to_top_db() {
        let m = FeatureMatrix::new(1, 3, vec![1.0, 1e-4, 0.0]).unwrap();
        let db = power_to_db(&m, Some(30.0));
        assert!((db.get(0, 0) - 0.0).abs() < 1e-4);
        assert!((db.get(0, 1) + 30.0).abs() < 1e-4);
        assert!((db.get(0, 2) + 30.0).abs() < 1e-4);

        let raw = power_to_db(&m, None);
        assert!((raw.get(0, 2) + 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_centered_frames() {
        let frames = centered_frames(&[1.0, 2.0, 3.0, 4.0], 4, 2, false);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], vec![0.0, 0.0, 1.0, 2.0]);
        let edge = centered_frames(&[1.0, 2.0, 3.0, 4.0], 4, 2, true);
        assert_eq!(edge[0], vec![1.0, 1.0, 1.0, 2.0]);
        assert_eq!(edge[2], vec![3.0, 4.0, 4.0, 4.0]);
    }
}
