//! Audio handling ahead of feature extraction
//!
//! This module provides:
//! - The PCM buffer type and WAV I/O
//! - Audio resampling
//! - Silence trimming, noise suppression and amplitude normalization

mod denoise;
mod io;
mod normalize;
mod resample;

pub use denoise::SpectralGate;
pub use io::{load_wav, save_wav, AudioBuffer};
pub use normalize::{
    fix_length, peak_normalize, preemphasis, rms_normalize, trim_silence, AudioNormalizer,
    NormalizeMode, NormalizedAudio, NORM_EPSILON,
};
pub use resample::{resample, ResampleQuality, Resampler};

/// Sample rate of the deployed models
pub const SAMPLE_RATE: u32 = 22050;
