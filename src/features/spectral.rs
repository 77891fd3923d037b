//! Frame-level spectral and temporal descriptors

use super::stft::{centered_frames, power_to_db};
use super::FeatureMatrix;
use crate::error::{Result, ShieldError};

/// Fraction of each band averaged for the peak/valley estimate
const CONTRAST_QUANTILE: f32 = 0.02;
/// Samples with magnitude at or below this count as zero for crossings
const ZCR_THRESHOLD: f32 = 1e-10;
/// dB range kept when converting peaks, valleys and onset mel power
const TOP_DB: f32 = 80.0;

/// Octave-band spectral contrast (`n_bands + 1` rows)
///
/// Bands are `[0, fmin], [fmin, 2 fmin], ...` with the last band extended to
/// Nyquist. Each row is the dB gap between the loudest and quietest
/// `CONTRAST_QUANTILE` of bins in the band.
pub fn spectral_contrast(
    magnitude: &FeatureMatrix,
    freqs: &[f32],
    fmin: f32,
    n_bands: usize,
) -> Result<FeatureMatrix> {
    let n_frames = magnitude.cols();
    let nyquist = freqs.last().copied().unwrap_or(0.0);

    let mut edges = vec![0.0f32];
    edges.extend((0..=n_bands).map(|i| fmin * 2f32.powi(i as i32)));
    if edges[n_bands] >= nyquist {
        return Err(ShieldError::extraction(
            "spectral_contrast",
            format!("band edge {} Hz exceeds Nyquist {} Hz", edges[n_bands], nyquist),
        ));
    }

    let mut peaks = FeatureMatrix::zeros(n_bands + 1, n_frames);
    let mut valleys = FeatureMatrix::zeros(n_bands + 1, n_frames);

    for k in 0..=n_bands {
        let (lo, hi) = (edges[k], edges[k + 1]);
        let in_band: Vec<usize> = (0..freqs.len())
            .filter(|&i| freqs[i] >= lo && freqs[i] <= hi)
            .collect();
        let (Some(&first), Some(&last)) = (in_band.first(), in_band.last()) else {
            return Err(ShieldError::extraction(
                "spectral_contrast",
                format!("no FFT bins between {} and {} Hz", lo, hi),
            ));
        };

        let start = if k > 0 { first.saturating_sub(1) } else { first };
        let end = if k == n_bands { freqs.len() } else { last + 1 };
        let selected = end - start;
        // Every band but the last drops its top bin, which the next band owns
        let used_end = if k < n_bands { end - 1 } else { end };
        let take = ((CONTRAST_QUANTILE * selected as f32).round() as usize).max(1);

        let mut column = Vec::with_capacity(used_end - start);
        for t in 0..n_frames {
            column.clear();
            column.extend((start..used_end).map(|b| magnitude.get(b, t)));
            column.sort_by(|a, b| a.total_cmp(b));
            let take = take.min(column.len());
            let valley = column[..take].iter().sum::<f32>() / take as f32;
            let peak = column[column.len() - take..].iter().sum::<f32>() / take as f32;
            valleys.set(k, t, valley);
            peaks.set(k, t, peak);
        }
    }

    let peak_db = power_to_db(&peaks, Some(TOP_DB));
    let valley_db = power_to_db(&valleys, Some(TOP_DB));
    let data = peak_db
        .data()
        .iter()
        .zip(valley_db.data())
        .map(|(p, v)| p - v)
        .collect();
    FeatureMatrix::new(n_bands + 1, n_frames, data)
}

/// Magnitude-weighted mean frequency of each frame; silent frames give 0
pub fn spectral_centroid(magnitude: &FeatureMatrix, freqs: &[f32]) -> FeatureMatrix {
    let centroid: Vec<f32> = (0..magnitude.cols())
        .map(|t| {
            let mut total = 0.0f32;
            let mut weighted = 0.0f32;
            for (b, &f) in freqs.iter().enumerate().take(magnitude.rows()) {
                let m = magnitude.get(b, t);
                total += m;
                weighted += m * f;
            }
            if total > f32::MIN_POSITIVE {
                weighted / total
            } else {
                0.0
            }
        })
        .collect();
    FeatureMatrix::from_row(&centroid)
}

/// Root-mean-square energy of centered, zero-padded frames
pub fn rms(samples: &[f32], frame_length: usize, hop_length: usize) -> FeatureMatrix {
    let energy: Vec<f32> = centered_frames(samples, frame_length, hop_length, false)
        .iter()
        .map(|frame| (frame.iter().map(|x| x * x).sum::<f32>() / frame_length as f32).sqrt())
        .collect();
    FeatureMatrix::from_row(&energy)
}

/// Fraction of sign changes per centered, edge-padded frame
///
/// Near-zero samples count as positive; the first sample of a frame is never
/// a crossing.
pub fn zero_crossing_rate(samples: &[f32], frame_length: usize, hop_length: usize) -> FeatureMatrix {
    let negative = |x: f32| x.abs() > ZCR_THRESHOLD && x.is_sign_negative();
    let rate: Vec<f32> = centered_frames(samples, frame_length, hop_length, true)
        .iter()
        .map(|frame| {
            let crossings = frame
                .windows(2)
                .filter(|w| negative(w[0]) != negative(w[1]))
                .count();
            crossings as f32 / frame_length as f32
        })
        .collect();
    FeatureMatrix::from_row(&rate)
}

/// Spectral flux onset envelope from a mel power spectrogram
///
/// Positive first difference of the dB mel spectrum averaged over bands,
/// shifted right by `1 + n_fft / (2 * hop)` frames to line up with the
/// STFT frame centres, and cropped to the input frame count.
pub fn onset_strength(mel_power: &FeatureMatrix, n_fft: usize, hop_length: usize) -> FeatureMatrix {
    let db = power_to_db(mel_power, Some(TOP_DB));
    let n_frames = db.cols();
    let n_bands = db.rows().max(1);
    let pad = 1 + n_fft / (2 * hop_length);

    let mut envelope = vec![0.0f32; n_frames];
    for t in 1..n_frames {
        let out = t - 1 + pad;
        if out >= n_frames {
            break;
        }
        let flux: f32 = (0..db.rows())
            .map(|b| (db.get(b, t) - db.get(b, t - 1)).max(0.0))
            .sum();
        envelope[out] = flux / n_bands as f32;
    }
    FeatureMatrix::from_row(&envelope)
}
