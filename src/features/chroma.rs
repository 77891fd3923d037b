//! Pitch-class descriptors: chroma, harmonic/percussive separation, tonnetz

use std::f64::consts::PI;

use super::stft::Spectrum;
use super::FeatureMatrix;

/// Centre octave of the chroma octave weighting
const CENTER_OCTAVE: f64 = 5.0;
/// Width (in octaves) of the chroma octave weighting
const OCTAVE_WIDTH: f64 = 2.0;
/// Exponent of the HPSS soft mask
const HPSS_MASK_POWER: i32 = 2;

/// Chroma filterbank (`n_chroma x n_bins`), rolled so row 0 is C
#[derive(Debug, Clone)]
pub struct ChromaFilterbank {
    weights: Vec<Vec<f32>>,
}

impl ChromaFilterbank {
    pub fn new(sample_rate: u32, n_fft: usize, n_chroma: usize) -> Self {
        let sr = sample_rate as f64;
        let nc = n_chroma as f64;
        let n_bins = n_fft / 2 + 1;

        // Fractional chroma bin of every FFT bin above DC; DC borrows an
        // octave-and-a-half below the first bin.
        let mut frqbins: Vec<f64> = (1..n_fft)
            .map(|k| nc * hz_to_octs(k as f64 * sr / n_fft as f64))
            .collect();
        frqbins.insert(0, frqbins[0] - 1.5 * nc);

        let mut widths: Vec<f64> = frqbins.windows(2).map(|w| (w[1] - w[0]).max(1.0)).collect();
        widths.push(1.0);

        let half = (nc / 2.0).round();
        let mut raw = vec![vec![0.0f64; n_fft]; n_chroma];
        for (k, (&fb, &width)) in frqbins.iter().zip(&widths).enumerate() {
            for (c, row) in raw.iter_mut().enumerate() {
                let d = (fb - c as f64 + half + 10.0 * nc).rem_euclid(nc) - half;
                row[k] = (-0.5 * (2.0 * d / width).powi(2)).exp();
            }
        }

        // L2-normalize each column, then apply the octave weighting
        for k in 0..n_fft {
            let norm = raw.iter().map(|row| row[k] * row[k]).sum::<f64>().sqrt();
            let octave_weight =
                (-0.5 * ((frqbins[k] / nc - CENTER_OCTAVE) / OCTAVE_WIDTH).powi(2)).exp();
            for row in raw.iter_mut() {
                if norm > f64::MIN_POSITIVE {
                    row[k] /= norm;
                }
                row[k] *= octave_weight;
            }
        }

        let shift = 3 * (n_chroma / 12);
        let weights = (0..n_chroma)
            .map(|c| {
                raw[(c + shift) % n_chroma][..n_bins]
                    .iter()
                    .map(|&v| v as f32)
                    .collect()
            })
            .collect();

        Self { weights }
    }

    pub fn n_chroma(&self) -> usize {
        self.weights.len()
    }

    /// Chroma from a power spectrogram, each frame scaled by its maximum
    pub fn apply(&self, power: &FeatureMatrix) -> FeatureMatrix {
        let raw = FeatureMatrix::project(&self.weights, power);
        normalize_columns(&raw, Norm::Max)
    }
}

/// Octaves relative to C0 (A440 / 16) with no tuning offset
fn hz_to_octs(hz: f64) -> f64 {
    (hz / (440.0 / 16.0)).log2()
}

#[derive(Debug, Clone, Copy)]
enum Norm {
    Max,
    L1,
}

/// Per-frame normalization; frames with a negligible norm are left untouched
fn normalize_columns(m: &FeatureMatrix, norm: Norm) -> FeatureMatrix {
    let mut out = m.clone();
    for t in 0..m.cols() {
        let column = m.column(t);
        let scale = match norm {
            Norm::Max => column.iter().fold(0.0f32, |acc, v| acc.max(v.abs())),
            Norm::L1 => column.iter().map(|v| v.abs()).sum(),
        };
        if scale > f32::MIN_POSITIVE {
            for (r, v) in column.iter().enumerate() {
                out.set(r, t, v / scale);
            }
        }
    }
    out
}

/// Median of `values` (upper median for even lengths)
fn median(values: &mut [f32]) -> f32 {
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}

/// Mirror an out-of-range index back into `0..n` (half-sample symmetric)
fn reflect_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Sliding median along rows (`along_time`) or columns
fn median_filter(m: &FeatureMatrix, kernel: usize, along_time: bool) -> FeatureMatrix {
    let (rows, cols) = m.shape();
    let half = (kernel / 2) as isize;
    let mut out = FeatureMatrix::zeros(rows, cols);
    let mut window = Vec::with_capacity(kernel);
    for r in 0..rows {
        for c in 0..cols {
            window.clear();
            for o in -half..=half {
                let v = if along_time {
                    m.get(r, reflect_index(c as isize + o, cols))
                } else {
                    m.get(reflect_index(r as isize + o, rows), c)
                };
                window.push(v);
            }
            out.set(r, c, median(&mut window));
        }
    }
    out
}

/// Soft mask selecting the harmonic part of a magnitude spectrogram
///
/// Harmonic energy is smooth in time, percussive energy is smooth in
/// frequency; each is estimated with a median filter of length `kernel`.
pub fn harmonic_mask(magnitude: &FeatureMatrix, kernel: usize) -> FeatureMatrix {
    let harm = median_filter(magnitude, kernel, true);
    let perc = median_filter(magnitude, kernel, false);

    let mut mask = FeatureMatrix::zeros(magnitude.rows(), magnitude.cols());
    for r in 0..magnitude.rows() {
        for c in 0..magnitude.cols() {
            let h = harm.get(r, c);
            let p = perc.get(r, c);
            let z = h.max(p);
            if z >= f32::MIN_POSITIVE {
                let hm = (h / z).powi(HPSS_MASK_POWER);
                let pm = (p / z).powi(HPSS_MASK_POWER);
                mask.set(r, c, hm / (hm + pm));
            }
        }
    }
    mask
}

/// Power spectrogram of the harmonic component of `spectrum`
pub fn harmonic_power(spectrum: &Spectrum, kernel: usize) -> FeatureMatrix {
    let power = spectrum.power();
    let mask = harmonic_mask(&spectrum.magnitude(), kernel);
    let mut out = power.clone();
    for r in 0..power.rows() {
        for c in 0..power.cols() {
            let m = mask.get(r, c);
            out.set(r, c, power.get(r, c) * m * m);
        }
    }
    out
}

/// Projection of 12-bin chroma onto fifths, minor-thirds and major-thirds
fn tonnetz_basis() -> Vec<Vec<f32>> {
    let scale = [7.0 / 6.0, 7.0 / 6.0, 3.0 / 2.0, 3.0 / 2.0, 2.0 / 3.0, 2.0 / 3.0];
    let radius = [1.0, 1.0, 1.0, 1.0, 0.5, 0.5];
    (0..6)
        .map(|axis| {
            (0..12)
                .map(|pc| {
                    let mut v = scale[axis] * pc as f64;
                    if axis % 2 == 0 {
                        v -= 0.5;
                    }
                    (radius[axis] * (PI * v).cos()) as f32
                })
                .collect()
        })
        .collect()
}

/// Tonal centroid features (6 x T) from a 12-class chroma
pub fn tonnetz(chroma: &FeatureMatrix) -> FeatureMatrix {
    let normalized = normalize_columns(chroma, Norm::L1);
    FeatureMatrix::project(&tonnetz_basis(), &normalized)
}
