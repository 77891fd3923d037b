//! Runtime configuration for the inference pipelines

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::audio::NormalizeMode;
use crate::error::{Result, ShieldError};

/// Longest clip a pipeline can be configured to pad or truncate to, in seconds
pub const MAX_TARGET_DURATION: f32 = 600.0;

/// Knobs of one inference pipeline (authenticity or identity)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Sample rate every input buffer must already be at
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Length in seconds every clip is padded or truncated to
    #[serde(default = "default_target_duration")]
    pub target_duration: f32,

    /// (rows, frames) every standardized feature is forced into
    #[serde(default = "default_target_shape")]
    pub target_shape: (usize, usize),

    #[serde(default)]
    pub normalize_mode: NormalizeMode,

    /// Apply a first-order pre-emphasis filter after trimming
    #[serde(default)]
    pub preemphasis: bool,

    #[serde(default = "default_preemphasis_coef")]
    pub preemphasis_coef: f32,

    /// Apply stationary spectral-gate noise suppression after trimming
    #[serde(default)]
    pub noise_reduction: bool,

    /// Minimum cosine similarity for a verification to be confirmed
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// L2-normalize identity embeddings before returning them
    #[serde(default = "default_normalize_embedding")]
    pub normalize_embedding: bool,

    #[serde(default)]
    pub features: FeatureConfig,
}

/// Analysis parameters shared by every descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default = "default_n_fft")]
    pub n_fft: usize,

    #[serde(default = "default_hop_length")]
    pub hop_length: usize,

    #[serde(default = "default_n_mels")]
    pub n_mels: usize,

    #[serde(default = "default_n_mfcc")]
    pub n_mfcc: usize,

    #[serde(default = "default_n_chroma")]
    pub n_chroma: usize,

    /// Octave bands above `contrast_fmin`; contrast has one more row
    #[serde(default = "default_contrast_bands")]
    pub contrast_bands: usize,

    #[serde(default = "default_contrast_fmin")]
    pub contrast_fmin: f32,

    #[serde(default = "default_pitch_fmin")]
    pub pitch_fmin: f32,

    #[serde(default = "default_pitch_fmax")]
    pub pitch_fmax: f32,

    #[serde(default = "default_yin_threshold")]
    pub yin_threshold: f32,

    /// Median-filter length for harmonic/percussive separation
    #[serde(default = "default_hpss_kernel")]
    pub hpss_kernel: usize,

    /// Frames quieter than this many dB below the peak are trimmed
    #[serde(default = "default_trim_top_db")]
    pub trim_top_db: f32,
}

/// Configuration of both pipelines served by one process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShieldConfig {
    #[serde(default = "PipelineConfig::deepfake")]
    pub authenticity: PipelineConfig,

    #[serde(default = "PipelineConfig::verification")]
    pub identity: PipelineConfig,
}

fn default_sample_rate() -> u32 {
    22050
}

fn default_target_duration() -> f32 {
    6.0
}

fn default_target_shape() -> (usize, usize) {
    (128, 259)
}

fn default_preemphasis_coef() -> f32 {
    0.5
}

fn default_similarity_threshold() -> f32 {
    0.6
}

fn default_normalize_embedding() -> bool {
    true
}

fn default_n_fft() -> usize {
    2048
}

fn default_hop_length() -> usize {
    512
}

fn default_n_mels() -> usize {
    128
}

fn default_n_mfcc() -> usize {
    20
}

fn default_n_chroma() -> usize {
    12
}

fn default_contrast_bands() -> usize {
    6
}

fn default_contrast_fmin() -> f32 {
    200.0
}

fn default_pitch_fmin() -> f32 {
    50.0
}

fn default_pitch_fmax() -> f32 {
    300.0
}

fn default_yin_threshold() -> f32 {
    0.1
}

fn default_hpss_kernel() -> usize {
    31
}

fn default_trim_top_db() -> f32 {
    60.0
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            n_fft: default_n_fft(),
            hop_length: default_hop_length(),
            n_mels: default_n_mels(),
            n_mfcc: default_n_mfcc(),
            n_chroma: default_n_chroma(),
            contrast_bands: default_contrast_bands(),
            contrast_fmin: default_contrast_fmin(),
            pitch_fmin: default_pitch_fmin(),
            pitch_fmax: default_pitch_fmax(),
            yin_threshold: default_yin_threshold(),
            hpss_kernel: default_hpss_kernel(),
            trim_top_db: default_trim_top_db(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            target_duration: default_target_duration(),
            target_shape: default_target_shape(),
            normalize_mode: NormalizeMode::default(),
            preemphasis: false,
            preemphasis_coef: default_preemphasis_coef(),
            noise_reduction: false,
            similarity_threshold: default_similarity_threshold(),
            normalize_embedding: default_normalize_embedding(),
            features: FeatureConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Settings of the deployed deepfake detector
    pub fn deepfake() -> Self {
        Self::default()
    }

    /// Settings of the deployed speaker-verification model
    pub fn verification() -> Self {
        Self::default()
    }

    /// Exact sample count of a normalized clip
    pub fn target_len(&self) -> usize {
        (self.sample_rate as f64 * self.target_duration as f64) as usize
    }

    /// Load configuration from a local JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no pipeline can run with
    pub fn validate(&self) -> Result<()> {
        let f = &self.features;
        if self.sample_rate == 0 {
            return Err(ShieldError::Config("sample_rate must be positive".into()));
        }
        if !self.target_duration.is_finite()
            || self.target_duration <= 0.0
            || self.target_duration > MAX_TARGET_DURATION
        {
            return Err(ShieldError::Config(format!(
                "target_duration must be in (0, {}] seconds, got {}",
                MAX_TARGET_DURATION, self.target_duration
            )));
        }
        if self.target_shape.0 == 0 || self.target_shape.1 == 0 {
            return Err(ShieldError::Config(format!(
                "target_shape must be non-empty, got {:?}",
                self.target_shape
            )));
        }
        if f.n_fft < 4 || f.hop_length == 0 {
            return Err(ShieldError::Config(format!(
                "invalid STFT parameters n_fft={} hop_length={}",
                f.n_fft, f.hop_length
            )));
        }
        if f.n_mfcc == 0 || f.n_mfcc > f.n_mels {
            return Err(ShieldError::Config(format!(
                "n_mfcc must be in 1..={}, got {}",
                f.n_mels, f.n_mfcc
            )));
        }
        if f.n_chroma != 12 {
            return Err(ShieldError::Config(format!(
                "tonnetz needs 12 chroma bins, got {}",
                f.n_chroma
            )));
        }
        if !(0.0..=1.0).contains(&self.preemphasis_coef) {
            return Err(ShieldError::Config(format!(
                "preemphasis_coef must be in [0, 1], got {}",
                self.preemphasis_coef
            )));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ShieldError::Config(format!(
                "similarity_threshold must be in [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

impl ShieldConfig {
    /// Load configuration from a local JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = read_json(path.as_ref())?;
        config.authenticity.validate()?;
        config.identity.validate()?;
        Ok(config)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ShieldError::Config(format!("failed to read config from {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        ShieldError::Config(format!("failed to parse config from {}: {}", path.display(), e))
    })
}
