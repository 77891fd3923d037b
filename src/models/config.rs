//! Architecture configuration for the fusion models
//!
//! Defaults reproduce the deployed checkpoints; tests shrink the widths.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, ShieldError};

/// Scalar-descriptor branch: three Linear+BN+ReLU stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseBranchConfig {
    pub input_dim: usize,

    #[serde(default = "default_dense_hidden")]
    pub hidden_dim: usize,

    #[serde(default = "default_branch_dim")]
    pub output_dim: usize,
}

/// MFCC surface branch: three convolutions, two max-pools, one projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvBranchConfig {
    /// (H, W) of the standardized input surface
    #[serde(default = "default_feature_shape")]
    pub input_shape: (usize, usize),

    #[serde(default = "default_conv_channels")]
    pub channels: Vec<usize>,

    #[serde(default = "default_branch_dim")]
    pub output_dim: usize,
}

/// Mel surface branch: four conv blocks, adaptive pool, bidirectional LSTM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvRecurrentConfig {
    #[serde(default = "default_recurrent_channels")]
    pub channels: Vec<usize>,

    #[serde(default = "default_first_kernel")]
    pub first_kernel: usize,

    /// (time steps, width) after adaptive pooling
    #[serde(default = "default_pooled_shape")]
    pub pooled_shape: (usize, usize),

    #[serde(default = "default_lstm_hidden")]
    pub hidden_size: usize,

    #[serde(default = "default_lstm_layers")]
    pub num_layers: usize,

    #[serde(default = "default_leaky_slope")]
    pub leaky_slope: f64,
}

/// Dense fusion stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    pub input_dim: usize,

    #[serde(default = "default_fusion_hidden")]
    pub hidden_dims: Vec<usize>,

    pub output_dim: usize,
}

/// Ten-branch authenticity classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepfakeModelConfig {
    /// Standardized shape every descriptor is forced into
    #[serde(default = "default_feature_shape")]
    pub feature_shape: (usize, usize),

    #[serde(default = "default_conv_channels")]
    pub conv_channels: Vec<usize>,

    #[serde(default = "default_dense_hidden")]
    pub dense_hidden: usize,

    #[serde(default = "default_branch_dim")]
    pub branch_dim: usize,

    #[serde(default = "default_fusion_hidden")]
    pub fusion_hidden: Vec<usize>,
}

/// Five-branch speaker embedding model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerModelConfig {
    /// Standardized shape of the mel surface
    #[serde(default = "default_feature_shape")]
    pub feature_shape: (usize, usize),

    #[serde(default)]
    pub mel: ConvRecurrentConfig,

    #[serde(default = "default_n_mfcc")]
    pub n_mfcc: usize,

    #[serde(default = "default_n_chroma")]
    pub n_chroma: usize,

    #[serde(default = "default_n_tonnetz")]
    pub n_tonnetz: usize,

    #[serde(default = "default_n_contrast")]
    pub n_contrast: usize,

    #[serde(default = "default_dense_hidden")]
    pub dense_hidden: usize,

    #[serde(default = "default_branch_dim")]
    pub branch_dim: usize,

    #[serde(default = "default_fusion_hidden")]
    pub fusion_hidden: Vec<usize>,

    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
}

fn default_dense_hidden() -> usize {
    256
}

fn default_branch_dim() -> usize {
    128
}

fn default_feature_shape() -> (usize, usize) {
    (128, 259)
}

fn default_conv_channels() -> Vec<usize> {
    vec![32, 64, 128]
}

fn default_recurrent_channels() -> Vec<usize> {
    vec![32, 64, 128, 256]
}

fn default_first_kernel() -> usize {
    5
}

fn default_pooled_shape() -> (usize, usize) {
    (32, 8)
}

fn default_lstm_hidden() -> usize {
    512
}

fn default_lstm_layers() -> usize {
    2
}

fn default_leaky_slope() -> f64 {
    0.01
}

fn default_fusion_hidden() -> Vec<usize> {
    vec![512, 256]
}

fn default_n_mfcc() -> usize {
    20
}

fn default_n_chroma() -> usize {
    12
}

fn default_n_tonnetz() -> usize {
    6
}

fn default_n_contrast() -> usize {
    7
}

fn default_embedding_dim() -> usize {
    128
}

impl ConvBranchConfig {
    /// Width of the flattened map after two 2x2 max-pools
    pub fn flattened_dim(&self) -> usize {
        let (h, w) = self.input_shape;
        self.channels.last().copied().unwrap_or(0) * (h / 2 / 2) * (w / 2 / 2)
    }
}

impl Default for ConvBranchConfig {
    fn default() -> Self {
        Self {
            input_shape: default_feature_shape(),
            channels: default_conv_channels(),
            output_dim: default_branch_dim(),
        }
    }
}

impl ConvRecurrentConfig {
    /// Per-step LSTM input width: last conv channels times pooled width
    pub fn sequence_dim(&self) -> usize {
        self.channels.last().copied().unwrap_or(0) * self.pooled_shape.1
    }

    /// Final-step output width (both directions)
    pub fn output_dim(&self) -> usize {
        2 * self.hidden_size
    }
}

impl Default for ConvRecurrentConfig {
    fn default() -> Self {
        Self {
            channels: default_recurrent_channels(),
            first_kernel: default_first_kernel(),
            pooled_shape: default_pooled_shape(),
            hidden_size: default_lstm_hidden(),
            num_layers: default_lstm_layers(),
            leaky_slope: default_leaky_slope(),
        }
    }
}

impl DeepfakeModelConfig {
    pub fn mfcc_branch(&self) -> ConvBranchConfig {
        ConvBranchConfig {
            input_shape: self.feature_shape,
            channels: self.conv_channels.clone(),
            output_dim: self.branch_dim,
        }
    }

    /// Dense branches see the time-averaged standardized surface
    pub fn dense_branch(&self) -> DenseBranchConfig {
        DenseBranchConfig {
            input_dim: self.feature_shape.0,
            hidden_dim: self.dense_hidden,
            output_dim: self.branch_dim,
        }
    }

    pub fn fusion(&self, n_branches: usize) -> FusionConfig {
        FusionConfig {
            input_dim: n_branches * self.branch_dim,
            hidden_dims: self.fusion_hidden.clone(),
            output_dim: 1,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_json(path.as_ref())
    }
}

impl Default for DeepfakeModelConfig {
    fn default() -> Self {
        Self {
            feature_shape: default_feature_shape(),
            conv_channels: default_conv_channels(),
            dense_hidden: default_dense_hidden(),
            branch_dim: default_branch_dim(),
            fusion_hidden: default_fusion_hidden(),
        }
    }
}

impl SpeakerModelConfig {
    pub fn dense_branch(&self, input_dim: usize) -> DenseBranchConfig {
        DenseBranchConfig {
            input_dim,
            hidden_dim: self.dense_hidden,
            output_dim: self.branch_dim,
        }
    }

    pub fn fusion(&self, n_dense: usize) -> FusionConfig {
        FusionConfig {
            input_dim: self.mel.output_dim() + n_dense * self.branch_dim,
            hidden_dims: self.fusion_hidden.clone(),
            output_dim: self.embedding_dim,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_json(path.as_ref())
    }
}

impl Default for SpeakerModelConfig {
    fn default() -> Self {
        Self {
            feature_shape: default_feature_shape(),
            mel: ConvRecurrentConfig::default(),
            n_mfcc: default_n_mfcc(),
            n_chroma: default_n_chroma(),
            n_tonnetz: default_n_tonnetz(),
            n_contrast: default_n_contrast(),
            dense_hidden: default_dense_hidden(),
            branch_dim: default_branch_dim(),
            fusion_hidden: default_fusion_hidden(),
            embedding_dim: default_embedding_dim(),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ShieldError::ModelNotLoaded(format!("failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        ShieldError::ModelNotLoaded(format!("failed to parse {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deepfake_defaults_match_checkpoint() {
        let config = DeepfakeModelConfig::default();
        assert_eq!(config.mfcc_branch().flattened_dim(), 128 * 32 * 64);
        assert_eq!(config.dense_branch().input_dim, 128);
        let fusion = config.fusion(10);
        assert_eq!(fusion.input_dim, 1280);
        assert_eq!(fusion.hidden_dims, vec![512, 256]);
        assert_eq!(fusion.output_dim, 1);
    }

    #[test]
    fn test_speaker_defaults_match_checkpoint() {
        let config = SpeakerModelConfig::default();
        assert_eq!(config.mel.sequence_dim(), 2048);
        assert_eq!(config.mel.output_dim(), 1024);
        let fusion = config.fusion(4);
        assert_eq!(fusion.input_dim, 1536);
        assert_eq!(fusion.output_dim, 128);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"n_mfcc": 40, "mel": {"hidden_size": 64}}"#;
        let config: SpeakerModelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.n_mfcc, 40);
        assert_eq!(config.mel.hidden_size, 64);
        assert_eq!(config.mel.num_layers, 2);
        assert_eq!(config.embedding_dim, 128);
    }

    #[test]
    fn test_from_file_nonexistent() {
        let result = DeepfakeModelConfig::from_file("/nonexistent/df_config.json");
        assert!(matches!(result, Err(ShieldError::ModelNotLoaded(_))));
    }
}
