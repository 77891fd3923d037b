//! Per-feature encoder branches and the plan that wires them to features

use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;

use super::config::{
    ConvBranchConfig, ConvRecurrentConfig, DeepfakeModelConfig, DenseBranchConfig,
    SpeakerModelConfig,
};
use super::conv::ConvBranch;
use super::dense::DenseBranch;
use super::recurrent::ConvRecurrentBranch;
use crate::error::{Result, ShieldError};
use crate::features::{standardize, time_average, FeatureKind, FeatureMap};

/// Maps one prepared feature tensor to a fixed-length vector
///
/// Implementations hold read-only weights; `encode` never mutates state.
pub trait BranchEncoder: Send + Sync {
    /// `x` is a batch of prepared inputs; the result is [batch, output_dim]
    fn encode(&self, x: &Tensor) -> Result<Tensor>;

    fn output_dim(&self) -> usize;

    fn name(&self) -> &str;
}

/// How a branch's input is derived from the feature map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchInput {
    /// Row means of the standardized surface: [1, H]
    StandardizedMean,
    /// Row means of the native descriptor: [1, rows]
    NativeMean,
    /// The standardized surface with a channel axis: [1, 1, H, W]
    Surface,
}

/// Which encoder a branch uses, with its architecture
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderSpec {
    Dense(DenseBranchConfig),
    Conv(ConvBranchConfig),
    ConvRecurrent(ConvRecurrentConfig),
}

/// One entry of a branch plan
#[derive(Debug, Clone, PartialEq)]
pub struct BranchSpec {
    pub kind: FeatureKind,
    /// Weight prefix in the checkpoint
    pub prefix: &'static str,
    pub input: BranchInput,
    pub encoder: EncoderSpec,
}

/// Ordered list of branches; the order is the fusion-vector layout
#[derive(Debug, Clone, PartialEq)]
pub struct BranchPlan {
    specs: Vec<BranchSpec>,
}

impl BranchPlan {
    /// MFCC surface through the conv encoder, the other nine descriptors
    /// time-averaged through dense encoders
    pub fn deepfake(config: &DeepfakeModelConfig) -> Self {
        let dense = |kind, prefix| BranchSpec {
            kind,
            prefix,
            input: BranchInput::StandardizedMean,
            encoder: EncoderSpec::Dense(config.dense_branch()),
        };
        Self {
            specs: vec![
                BranchSpec {
                    kind: FeatureKind::Mfcc,
                    prefix: "mfcc_branch",
                    input: BranchInput::Surface,
                    encoder: EncoderSpec::Conv(config.mfcc_branch()),
                },
                dense(FeatureKind::Chroma, "chroma_branch"),
                dense(FeatureKind::Tonnetz, "tonnetz_branch"),
                dense(FeatureKind::SpectralContrast, "contrast_branch"),
                dense(FeatureKind::Pitch, "pitch_branch"),
                dense(FeatureKind::Energy, "energy_branch"),
                dense(FeatureKind::Zcr, "zcr_branch"),
                dense(FeatureKind::OnsetStrength, "onset_branch"),
                dense(FeatureKind::SpectralCentroid, "centroid_branch"),
                dense(FeatureKind::MelSpectrogram, "mel_spec_branch"),
            ],
        }
    }

    /// Mel surface through the conv+LSTM encoder, four native descriptors
    /// time-averaged through dense encoders
    pub fn verification(config: &SpeakerModelConfig) -> Self {
        let dense = |kind, prefix, input_dim| BranchSpec {
            kind,
            prefix,
            input: BranchInput::NativeMean,
            encoder: EncoderSpec::Dense(config.dense_branch(input_dim)),
        };
        Self {
            specs: vec![
                BranchSpec {
                    kind: FeatureKind::MelSpectrogram,
                    prefix: "mel_branch",
                    input: BranchInput::Surface,
                    encoder: EncoderSpec::ConvRecurrent(config.mel.clone()),
                },
                dense(FeatureKind::Mfcc, "mfcc_branch", config.n_mfcc),
                dense(FeatureKind::Chroma, "chroma_branch", config.n_chroma),
                dense(FeatureKind::Tonnetz, "tonnetz_branch", config.n_tonnetz),
                dense(FeatureKind::SpectralContrast, "contrast_branch", config.n_contrast),
            ],
        }
    }

    pub fn specs(&self) -> &[BranchSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Instantiate every branch from `vb`
    pub fn build(&self, vb: &VarBuilder) -> Result<BranchSet> {
        let branches = self
            .specs
            .iter()
            .map(|spec| -> Result<Branch> {
                let vb = vb.pp(spec.prefix);
                let encoder: Box<dyn BranchEncoder> = match &spec.encoder {
                    EncoderSpec::Dense(c) => Box::new(DenseBranch::new(spec.prefix, c, vb)?),
                    EncoderSpec::Conv(c) => Box::new(ConvBranch::new(spec.prefix, c, vb)?),
                    EncoderSpec::ConvRecurrent(c) => {
                        Box::new(ConvRecurrentBranch::new(spec.prefix, c, vb)?)
                    }
                };
                Ok(Branch {
                    kind: spec.kind,
                    input: spec.input,
                    encoder,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(BranchSet { branches })
    }
}

/// A loaded encoder bound to its feature and input preparation
pub struct Branch {
    kind: FeatureKind,
    input: BranchInput,
    encoder: Box<dyn BranchEncoder>,
}

impl Branch {
    pub fn kind(&self) -> FeatureKind {
        self.kind
    }

    /// Build this branch's input tensor (batch of one)
    pub fn prepare(
        &self,
        features: &FeatureMap,
        target_shape: (usize, usize),
        device: &Device,
    ) -> Result<Tensor> {
        let feature = features.get(self.kind);
        match self.input {
            BranchInput::NativeMean => {
                let means = time_average(feature);
                let n = means.len();
                Ok(Tensor::from_vec(means, (1, n), device)?)
            }
            BranchInput::StandardizedMean => {
                let means = standardize(feature, target_shape)?.time_average();
                let n = means.len();
                Ok(Tensor::from_vec(means, (1, n), device)?)
            }
            BranchInput::Surface => Ok(standardize(feature, target_shape)?
                .to_tensor(device)?
                .unsqueeze(0)?),
        }
    }

    /// Prepare and encode; the result is [1, output_dim]
    pub fn forward(
        &self,
        features: &FeatureMap,
        target_shape: (usize, usize),
        device: &Device,
    ) -> Result<Tensor> {
        let x = self.prepare(features, target_shape, device)?;
        let out = self.encoder.encode(&x)?;
        let expected = [1, self.encoder.output_dim()];
        if out.dims() != expected {
            return Err(ShieldError::shape(
                format!("{} output", self.encoder.name()),
                expected,
                out.dims().to_vec(),
            ));
        }
        Ok(out)
    }
}

/// All branches of one model, in fusion order
pub struct BranchSet {
    branches: Vec<Branch>,
}

impl BranchSet {
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// Sum of branch output widths
    pub fn output_dim(&self) -> usize {
        self.branches.iter().map(|b| b.encoder.output_dim()).sum()
    }

    /// Encode every branch and concatenate: [1, output_dim]
    pub fn fuse_inputs(
        &self,
        features: &FeatureMap,
        target_shape: (usize, usize),
        device: &Device,
    ) -> Result<Tensor> {
        let outputs = self
            .branches
            .iter()
            .map(|b| b.forward(features, target_shape, device))
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::cat(&outputs, 1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deepfake_plan_order_and_prefixes() {
        let plan = BranchPlan::deepfake(&DeepfakeModelConfig::default());
        let kinds: Vec<_> = plan.specs().iter().map(|s| s.kind).collect();
        assert_eq!(kinds, FeatureKind::ALL.to_vec());
        assert_eq!(plan.specs()[0].prefix, "mfcc_branch");
        assert!(matches!(plan.specs()[0].encoder, EncoderSpec::Conv(_)));
        assert_eq!(plan.specs()[9].prefix, "mel_spec_branch");
        assert_eq!(plan.specs()[9].input, BranchInput::StandardizedMean);
    }

    #[test]
    fn test_verification_plan_order_and_widths() {
        let plan = BranchPlan::verification(&SpeakerModelConfig::default());
        let kinds: Vec<_> = plan.specs().iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FeatureKind::MelSpectrogram,
                FeatureKind::Mfcc,
                FeatureKind::Chroma,
                FeatureKind::Tonnetz,
                FeatureKind::SpectralContrast,
            ]
        );
        let widths: Vec<_> = plan.specs()[1..]
            .iter()
            .map(|s| match &s.encoder {
                EncoderSpec::Dense(c) => c.input_dim,
                _ => 0,
            })
            .collect();
        assert_eq!(widths, vec![20, 12, 6, 7]);
    }
}
