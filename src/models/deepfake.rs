//! Ten-branch authenticity classifier
//!
//! The MFCC surface goes through a small CNN; the other nine descriptors are
//! standardized, averaged over time and passed through dense encoders. The
//! ten 128-wide outputs are concatenated and reduced to a single
//! bona fide probability.

use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;

use super::branch::{BranchPlan, BranchSet};
use super::config::DeepfakeModelConfig;
use super::fusion::{FusionHead, FusionOutput};
use crate::error::{Result, ShieldError};
use crate::features::FeatureMap;

pub struct DeepfakeModel {
    config: DeepfakeModelConfig,
    branches: BranchSet,
    head: FusionHead,
    device: Device,
}

impl DeepfakeModel {
    pub fn new(config: DeepfakeModelConfig, vb: VarBuilder) -> Result<Self> {
        let plan = BranchPlan::deepfake(&config);
        let branches = plan.build(&vb)?;
        let head = FusionHead::new(
            &config.fusion(plan.len()),
            "fusion_layer",
            "output_layer",
            vb.clone(),
        )?;
        if branches.output_dim() != head.input_dim() {
            return Err(ShieldError::shape(
                "deepfake fusion width",
                head.input_dim(),
                branches.output_dim(),
            ));
        }

        tracing::debug!(
            "Deepfake model: {} branches, fusion input {}",
            plan.len(),
            head.input_dim()
        );

        Ok(Self {
            config,
            branches,
            head,
            device: vb.device().clone(),
        })
    }

    pub fn config(&self) -> &DeepfakeModelConfig {
        &self.config
    }

    pub fn feature_shape(&self) -> (usize, usize) {
        self.config.feature_shape
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Concatenated branch outputs, [1, 10 * branch_dim]
    pub fn fuse(&self, features: &FeatureMap) -> Result<Tensor> {
        self.branches
            .fuse_inputs(features, self.config.feature_shape, &self.device)
    }

    /// Probability that the clip is bona fide
    pub fn forward(&self, features: &FeatureMap) -> Result<f32> {
        let fused = self.fuse(features)?;
        let prob = self
            .head
            .forward(&fused, FusionOutput::Probability)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        match prob.as_slice() {
            [p] if p.is_finite() => Ok(*p),
            [p] => Err(ShieldError::extraction("fusion", format!("probability {}", p))),
            other => Err(ShieldError::shape("deepfake output", 1, other.len())),
        }
    }
}
