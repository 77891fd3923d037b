//! Convolutional encoder for the standardized MFCC surface

use candle_core::{Module, Tensor};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, VarBuilder};

use super::branch::BranchEncoder;
use super::config::ConvBranchConfig;
use super::ops::relu;
use crate::error::{Result, ShieldError};

/// conv1 -> ReLU -> conv2 -> ReLU -> pool -> conv3 -> ReLU -> pool -> fc
///
/// All convolutions are 3x3 with padding 1, so only the two 2x2 max-pools
/// shrink the surface. There is no activation after `fc`.
pub struct ConvBranch {
    name: String,
    convs: Vec<Conv2d>,
    fc: Linear,
    input_shape: (usize, usize),
    output_dim: usize,
}

impl ConvBranch {
    pub fn new(name: &str, config: &ConvBranchConfig, vb: VarBuilder) -> Result<Self> {
        if config.channels.len() != 3 {
            return Err(ShieldError::Config(format!(
                "{} expects 3 conv stages, got {}",
                name,
                config.channels.len()
            )));
        }
        let conv_cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let mut in_channels = 1;
        let mut convs = Vec::with_capacity(3);
        for (i, &out_channels) in config.channels.iter().enumerate() {
            convs.push(conv2d(
                in_channels,
                out_channels,
                3,
                conv_cfg,
                vb.pp(format!("conv{}", i + 1)),
            )?);
            in_channels = out_channels;
        }
        let fc = linear(config.flattened_dim(), config.output_dim, vb.pp("fc"))?;

        Ok(Self {
            name: name.to_string(),
            convs,
            fc,
            input_shape: config.input_shape,
            output_dim: config.output_dim,
        })
    }
}

impl BranchEncoder for ConvBranch {
    fn encode(&self, x: &Tensor) -> Result<Tensor> {
        let (_, c, h, w) = x.dims4()?;
        if c != 1 || (h, w) != self.input_shape {
            return Err(ShieldError::shape(
                format!("{} input", self.name),
                (1, self.input_shape.0, self.input_shape.1),
                (c, h, w),
            ));
        }

        // conv1 keeps full resolution; conv2 and conv3 are each followed by a pool
        let mut hidden = relu(&self.convs[0].forward(x)?)?;
        for conv in &self.convs[1..] {
            hidden = relu(&conv.forward(&hidden)?)?.max_pool2d(2)?;
        }

        let flat = hidden.flatten_from(1)?;
        Ok(self.fc.forward(&flat)?)
    }

    fn output_dim(&self) -> usize {
        self.output_dim
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn small_config() -> ConvBranchConfig {
        ConvBranchConfig {
            input_shape: (8, 10),
            channels: vec![2, 3, 4],
            output_dim: 5,
        }
    }

    #[test]
    fn test_flattened_width_matches_pooling() {
        // 8x10 -> 4x5 -> 2x2
        assert_eq!(small_config().flattened_dim(), 4 * 2 * 2);
    }

    #[test]
    fn test_encode_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let branch = ConvBranch::new("mfcc_branch", &small_config(), vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 1, 8, 10), &Device::Cpu).unwrap();
        assert_eq!(branch.encode(&x).unwrap().dims(), &[2, 5]);
    }

    #[test]
    fn test_rejects_wrong_surface() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let branch = ConvBranch::new("mfcc_branch", &small_config(), vb).unwrap();
        let x = Tensor::zeros((1, 1, 8, 12), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            branch.encode(&x),
            Err(ShieldError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_wrong_stage_count() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = ConvBranchConfig {
            channels: vec![2, 3],
            ..small_config()
        };
        assert!(ConvBranch::new("mfcc_branch", &config, vb).is_err());
    }
}
