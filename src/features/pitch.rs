//! YIN fundamental-frequency estimation

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use super::stft::centered_frames;
use super::FeatureMatrix;
use crate::error::{Result, ShieldError};

/// Autocorrelation and energy terms below this are treated as exact zeros
const ROUNDING_FLOOR: f32 = 1e-6;

/// Frame-wise YIN pitch tracker
///
/// Each centered frame is compared with lagged copies of itself over an
/// integration window of `frame_length / 2` samples; the first dip of the
/// cumulative-mean-normalized difference below `threshold` gives the period.
pub struct Yin {
    sample_rate: u32,
    frame_length: usize,
    win_length: usize,
    hop_length: usize,
    min_period: usize,
    max_period: usize,
    threshold: f32,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl Yin {
    pub fn new(
        sample_rate: u32,
        fmin: f32,
        fmax: f32,
        frame_length: usize,
        hop_length: usize,
        threshold: f32,
    ) -> Result<Self> {
        if fmin <= 0.0 || fmax <= fmin {
            return Err(ShieldError::Config(format!(
                "invalid pitch range {} - {} Hz",
                fmin, fmax
            )));
        }
        let win_length = frame_length / 2;
        let sr = sample_rate as f32;
        let min_period = (sr / fmax).floor() as usize;
        let max_period = ((sr / fmin).ceil() as usize).min(frame_length - win_length - 1);
        if min_period < 1 || max_period < min_period + 2 {
            return Err(ShieldError::Config(format!(
                "pitch range {} - {} Hz does not fit a {}-sample frame at {} Hz",
                fmin, fmax, frame_length, sample_rate
            )));
        }

        let n = 2 * frame_length;
        let mut planner = FftPlanner::new();
        Ok(Self {
            sample_rate,
            frame_length,
            win_length,
            hop_length,
            min_period,
            max_period,
            threshold,
            forward: planner.plan_fft_forward(n),
            inverse: planner.plan_fft_inverse(n),
        })
    }

    /// f0 in Hz for every frame, shape (1, T)
    pub fn estimate(&self, samples: &[f32]) -> FeatureMatrix {
        let f0: Vec<f32> = centered_frames(samples, self.frame_length, self.hop_length, false)
            .iter()
            .map(|frame| {
                let cmnd = self.normalized_difference(frame);
                self.sample_rate as f32 / self.period(&cmnd)
            })
            .collect();
        FeatureMatrix::from_row(&f0)
    }

    /// Lag-`tau` autocorrelation over `frame[1..=win]` for every `tau <= max_period`
    fn autocorrelation(&self, frame: &[f32]) -> Vec<f32> {
        let n = 2 * self.frame_length;
        let win = self.win_length;

        let mut a: Vec<Complex32> = frame.iter().map(|&v| Complex32::new(v, 0.0)).collect();
        a.resize(n, Complex32::new(0.0, 0.0));
        let mut b: Vec<Complex32> = (0..win)
            .map(|m| Complex32::new(frame[win - m], 0.0))
            .collect();
        b.resize(n, Complex32::new(0.0, 0.0));

        self.forward.process(&mut a);
        self.forward.process(&mut b);
        let mut product: Vec<Complex32> = a.iter().zip(&b).map(|(x, y)| x * y).collect();
        self.inverse.process(&mut product);

        (0..=self.max_period)
            .map(|tau| {
                let v = product[win + tau].re / n as f32;
                if v.abs() < ROUNDING_FLOOR {
                    0.0
                } else {
                    v
                }
            })
            .collect()
    }

    /// Cumulative-mean-normalized difference for lags `min_period..=max_period`
    fn normalized_difference(&self, frame: &[f32]) -> Vec<f32> {
        let win = self.win_length;
        let acf = self.autocorrelation(frame);

        let mut cumulative = Vec::with_capacity(frame.len() + 1);
        cumulative.push(0.0f32);
        for &v in frame {
            let last = cumulative[cumulative.len() - 1];
            cumulative.push(last + v * v);
        }
        // energy[tau] = sum of frame[tau+1 ..= tau+win]^2
        let energy: Vec<f32> = (0..=self.max_period)
            .map(|tau| {
                let e = cumulative[tau + win + 1] - cumulative[tau + 1];
                if e.abs() < ROUNDING_FLOOR {
                    0.0
                } else {
                    e
                }
            })
            .collect();

        let diff: Vec<f32> = (0..=self.max_period)
            .map(|tau| energy[0] + energy[tau] - 2.0 * acf[tau])
            .collect();

        let mut running = 0.0f32;
        let mut cmnd = Vec::with_capacity(self.max_period - self.min_period + 1);
        for (tau, &d) in diff.iter().enumerate().skip(1) {
            running += d;
            if tau >= self.min_period {
                let mean = running / tau as f32;
                cmnd.push(d / (mean + f32::MIN_POSITIVE));
            }
        }
        cmnd
    }

    /// Fractional period in samples from the normalized difference curve
    fn period(&self, cmnd: &[f32]) -> f32 {
        let n = cmnd.len();
        let is_trough = |i: usize| -> bool {
            if i == 0 {
                cmnd[0] < cmnd[1]
            } else if i == n - 1 {
                cmnd[i] < cmnd[i - 1]
            } else {
                cmnd[i] < cmnd[i - 1] && cmnd[i] <= cmnd[i + 1]
            }
        };

        let index = (0..n)
            .find(|&i| is_trough(i) && cmnd[i] < self.threshold)
            .unwrap_or_else(|| {
                (0..n)
                    .min_by(|&a, &b| cmnd[a].total_cmp(&cmnd[b]))
                    .unwrap_or(0)
            });

        self.min_period as f32 + index as f32 + parabolic_shift(cmnd, index)
    }
}

/// Vertex offset of the parabola through `x[i-1], x[i], x[i+1]`
fn parabolic_shift(x: &[f32], i: usize) -> f32 {
    if i == 0 || i + 1 >= x.len() {
        return 0.0;
    }
    let a = x[i + 1] + x[i - 1] - 2.0 * x[i];
    let b = (x[i + 1] - x[i - 1]) / 2.0;
    if b.abs() >= a.abs() {
        0.0
    } else {
        -b / a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yin() -> Yin {
        Yin::new(22050, 50.0, 300.0, 2048, 512, 0.1).unwrap()
    }

    #[test]
    fn test_period_bounds() {
        let y = yin();
        assert_eq!(y.min_period, 73);
        assert_eq!(y.max_period, 441);
    }

    #[test]
    fn test_sine_pitch() {
        let sr = 22050;
        let samples: Vec<f32> = (0..sr)
            .map(|i| (2.0 * std::f32::consts::PI * 200.0 * i as f32 / sr as f32).sin())
            .collect();
        let f0 = yin().estimate(&samples);
        assert_eq!(f0.cols(), 1 + sr as usize / 512);
        for t in 5..35 {
            assert!((f0.get(0, t) - 200.0).abs() < 2.0, "frame {}: {}", t, f0.get(0, t));
        }
    }

    #[test]
    fn test_silence_is_finite_and_constant() {
        let f0 = yin().estimate(&vec![0.0; 22050 * 3]);
        let first = f0.get(0, 0);
        assert!(first.is_finite());
        assert!((first - 22050.0 / 73.0).abs() < 1e-3);
        assert!(f0.data().iter().all(|&v| v == first));
    }

    #[test]
    fn test_rejects_unusable_range() {
        assert!(Yin::new(22050, 300.0, 50.0, 2048, 512, 0.1).is_err());
        assert!(Yin::new(22050, 5.0, 30000.0, 2048, 512, 0.1).is_err());
    }

    #[test]
    fn test_parabolic_shift() {
        // Vertex of (x - 1.25)^2 sampled at 0, 1, 2
        let x = [1.5625, 0.0625, 0.5625];
        assert!((parabolic_shift(&x, 1) - 0.25).abs() < 1e-6);
        assert_eq!(parabolic_shift(&x, 0), 0.0);
    }
}
