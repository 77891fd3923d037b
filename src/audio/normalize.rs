//! Clip conditioning ahead of feature extraction
//!
//! Every clip goes through the same fixed sequence: silence trim, optional
//! noise suppression, optional pre-emphasis, amplitude normalization, and a
//! hard pad/truncate to the pipeline's target length.

use serde::{Deserialize, Serialize};

use super::denoise::SpectralGate;
use super::AudioBuffer;
use crate::config::PipelineConfig;
use crate::error::{Result, ShieldError};

/// Guard added to the divisor of both amplitude normalizations
pub const NORM_EPSILON: f32 = 1e-6;

const TRIM_FRAME_LENGTH: usize = 2048;
const TRIM_HOP_LENGTH: usize = 512;
const AMIN: f32 = 1e-10;

/// Amplitude normalization mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizeMode {
    /// Divide by root-mean-square energy
    #[default]
    Rms,
    /// Divide by maximum absolute sample
    Peak,
}

/// Audio of exactly the pipeline's target length
///
/// Only [`AudioNormalizer::normalize`] can build one, so holding a value is
/// proof the length contract holds.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAudio {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl NormalizedAudio {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Stateless clip normalizer built from a validated [`PipelineConfig`]
#[derive(Debug, Clone)]
pub struct AudioNormalizer {
    sample_rate: u32,
    target_len: usize,
    mode: NormalizeMode,
    preemphasis: Option<f32>,
    denoiser: Option<SpectralGate>,
    trim_top_db: f32,
}

impl AudioNormalizer {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sample_rate: config.sample_rate,
            target_len: config.target_len(),
            mode: config.normalize_mode,
            preemphasis: config.preemphasis.then_some(config.preemphasis_coef),
            denoiser: config.noise_reduction.then(SpectralGate::default),
            trim_top_db: config.features.trim_top_db,
        })
    }

    pub fn target_len(&self) -> usize {
        self.target_len
    }

    /// Condition one clip; the buffer must already be at the pipeline rate
    pub fn normalize(&self, audio: &AudioBuffer) -> Result<NormalizedAudio> {
        audio.validate()?;
        if audio.sample_rate != self.sample_rate {
            return Err(ShieldError::MalformedAudio(format!(
                "expected {} Hz audio, got {} Hz",
                self.sample_rate, audio.sample_rate
            )));
        }

        let trimmed = trim_silence(&audio.samples, self.trim_top_db);
        let mut samples = match &self.denoiser {
            Some(gate) => gate.apply(trimmed),
            None => trimmed.to_vec(),
        };
        if let Some(coef) = self.preemphasis {
            samples = preemphasis(&samples, coef);
        }
        match self.mode {
            NormalizeMode::Rms => rms_normalize(&mut samples),
            NormalizeMode::Peak => peak_normalize(&mut samples),
        }
        let trimmed_len = samples.len();
        let samples = fix_length(samples, self.target_len);

        tracing::debug!(
            "Normalized clip: {} -> {} trimmed -> {} samples ({:?})",
            audio.len(),
            trimmed_len,
            samples.len(),
            self.mode
        );

        Ok(NormalizedAudio {
            samples,
            sample_rate: self.sample_rate,
        })
    }
}

/// Strip leading and trailing frames quieter than `top_db` below the loudest
///
/// Frame power is the mean square of centered, zero-padded 2048-sample frames
/// every 512 samples. A clip whose frames are all equally loud (including
/// digital silence) is returned whole.
pub fn trim_silence(samples: &[f32], top_db: f32) -> &[f32] {
    if samples.is_empty() {
        return samples;
    }
    let pad = TRIM_FRAME_LENGTH / 2;
    let n_frames = 1 + samples.len() / TRIM_HOP_LENGTH;
    let power: Vec<f32> = (0..n_frames)
        .map(|i| {
            let center = i * TRIM_HOP_LENGTH;
            let start = center.saturating_sub(pad);
            let end = (center + pad).min(samples.len());
            let energy: f32 = samples[start.min(end)..end].iter().map(|x| x * x).sum();
            energy / TRIM_FRAME_LENGTH as f32
        })
        .collect();

    let reference = power.iter().copied().fold(0.0f32, f32::max).max(AMIN);
    let ref_db = 10.0 * reference.log10();
    let loud = |p: f32| 10.0 * p.max(AMIN).log10() - ref_db > -top_db;

    let first = power.iter().position(|&p| loud(p));
    let last = power.iter().rposition(|&p| loud(p));
    match (first, last) {
        (Some(first), Some(last)) => {
            let start = (first * TRIM_HOP_LENGTH).min(samples.len());
            let end = ((last + 1) * TRIM_HOP_LENGTH).min(samples.len());
            &samples[start..end]
        }
        _ => &samples[..0],
    }
}

/// First-order high-pass `y[n] = x[n] - coef * x[n-1]`
///
/// The sample before the clip is extrapolated linearly as `2 x[0] - x[1]`.
pub fn preemphasis(samples: &[f32], coef: f32) -> Vec<f32> {
    let Some(&first) = samples.first() else {
        return Vec::new();
    };
    let before = match samples.get(1) {
        Some(&second) => 2.0 * first - second,
        None => first,
    };
    let mut prev = before;
    samples
        .iter()
        .map(|&x| {
            let y = x - coef * prev;
            prev = x;
            y
        })
        .collect()
}

pub fn rms_normalize(samples: &mut [f32]) {
    if samples.is_empty() {
        return;
    }
    let rms = (samples.iter().map(|x| x * x).sum::<f32>() / samples.len() as f32).sqrt();
    let scale = 1.0 / (rms + NORM_EPSILON);
    samples.iter_mut().for_each(|x| *x *= scale);
}

pub fn peak_normalize(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |acc, x| acc.max(x.abs()));
    let scale = 1.0 / (peak + NORM_EPSILON);
    samples.iter_mut().for_each(|x| *x *= scale);
}

/// Zero-pad or truncate at the tail to exactly `len` samples
pub fn fix_length(mut samples: Vec<f32>, len: usize) -> Vec<f32> {
    samples.resize(len, 0.0);
    samples
}
