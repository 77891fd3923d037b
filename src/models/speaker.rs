//! Five-branch speaker embedding model
//!
//! The standardized mel surface is read by the conv+BiLSTM encoder; MFCC,
//! chroma, tonnetz and spectral contrast are time-averaged at their native
//! heights and passed through dense encoders. The fused vector is projected
//! to the identity embedding.

use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;

use super::branch::{BranchPlan, BranchSet};
use super::config::SpeakerModelConfig;
use super::fusion::{FusionHead, FusionOutput};
use crate::error::{Result, ShieldError};
use crate::features::FeatureMap;

pub struct SpeakerModel {
    config: SpeakerModelConfig,
    branches: BranchSet,
    head: FusionHead,
    device: Device,
}

impl SpeakerModel {
    pub fn new(config: SpeakerModelConfig, vb: VarBuilder) -> Result<Self> {
        let plan = BranchPlan::verification(&config);
        let branches = plan.build(&vb)?;
        // The mel branch is not a dense branch
        let head = FusionHead::new(
            &config.fusion(plan.len() - 1),
            "fc_fusion",
            "embedding_out",
            vb.clone(),
        )?;
        if branches.output_dim() != head.input_dim() {
            return Err(ShieldError::shape(
                "speaker fusion width",
                head.input_dim(),
                branches.output_dim(),
            ));
        }

        tracing::debug!(
            "Speaker model: {} branches, fusion input {}, embedding {}",
            plan.len(),
            head.input_dim(),
            head.output_dim()
        );

        Ok(Self {
            config,
            branches,
            head,
            device: vb.device().clone(),
        })
    }

    pub fn config(&self) -> &SpeakerModelConfig {
        &self.config
    }

    pub fn feature_shape(&self) -> (usize, usize) {
        self.config.feature_shape
    }

    pub fn embedding_dim(&self) -> usize {
        self.head.output_dim()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Concatenated branch outputs, [1, 2H + 4 * branch_dim]
    pub fn fuse(&self, features: &FeatureMap) -> Result<Tensor> {
        self.branches
            .fuse_inputs(features, self.config.feature_shape, &self.device)
    }

    /// Identity embedding of one clip
    pub fn forward(&self, features: &FeatureMap, l2_normalize: bool) -> Result<Vec<f32>> {
        let fused = self.fuse(features)?;
        let embedding = self
            .head
            .forward(&fused, FusionOutput::Embedding { l2_normalize })?
            .flatten_all()?
            .to_vec1::<f32>()?;
        if embedding.len() != self.embedding_dim() {
            return Err(ShieldError::shape(
                "speaker embedding",
                self.embedding_dim(),
                embedding.len(),
            ));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(ShieldError::extraction("embedding", "non-finite value"));
        }
        Ok(embedding)
    }
}
